//! The broker state machine.
//!
//! [`transition`] is the whole table; [`Lifecycle`] applies events one at a
//! time and runs the action bound to the state an event leads to.

use std::collections::HashMap;
use std::fmt;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// States of a broker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BrokerState {
    /// Registering and downloading the own descriptor.
    Boot,

    /// Waiting for dependencies.
    Init,

    /// The process runs with its dependencies satisfied.
    Start,

    /// Restarted with changed configuration.
    Update,

    /// Failed; terminal until an operator restarts the container.
    Error,

    /// Shutting down.
    Shutdown,
}

impl BrokerState {
    /// Every state, in lifecycle order.
    pub const ALL: [Self; 6] = [
        Self::Boot,
        Self::Init,
        Self::Start,
        Self::Update,
        Self::Error,
        Self::Shutdown,
    ];
}

impl fmt::Display for BrokerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Boot => "BOOT",
            Self::Init => "INIT",
            Self::Start => "START",
            Self::Update => "UPDATE",
            Self::Error => "ERROR",
            Self::Shutdown => "SHUTDOWN",
        };
        f.write_str(name)
    }
}

/// Events a broker reacts to.
#[allow(missing_docs)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BrokerEvent {
    Boot,
    ConInit,
    SrvAdded,
    SrvInitialized,
    SrvNotInitialized,
    SrvNotRunning,
    SrvUpdated,
    SrvDeleted,
    SrvNone,
    ConUpdated,
    Error,
    Shutdown,
}

impl BrokerEvent {
    /// Every event.
    pub const ALL: [Self; 12] = [
        Self::Boot,
        Self::ConInit,
        Self::SrvAdded,
        Self::SrvInitialized,
        Self::SrvNotInitialized,
        Self::SrvNotRunning,
        Self::SrvUpdated,
        Self::SrvDeleted,
        Self::SrvNone,
        Self::ConUpdated,
        Self::Error,
        Self::Shutdown,
    ];
}

/// Aggregate dependency status an event is judged against.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DependencyView {
    /// Every dependency's descriptor has been downloaded.
    pub all_processed: bool,

    /// Every dependency reports itself initialized.
    pub all_initialized: bool,
}

impl DependencyView {
    /// A view with every dependency ready.
    pub const SATISFIED: Self = Self {
        all_processed: true,
        all_initialized: true,
    };

    /// Whether the dependencies allow the process to run.
    #[must_use]
    pub const fn is_satisfied(self) -> bool {
        self.all_processed && self.all_initialized
    }
}

/// The result of applying one event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Transition {
    /// State after the event.
    pub next: BrokerState,

    /// Whether the action bound to `next` runs.
    pub exec: bool,
}

impl Transition {
    const fn exec(next: BrokerState) -> Self {
        Self { next, exec: true }
    }

    const fn stay(state: BrokerState) -> Self {
        Self {
            next: state,
            exec: false,
        }
    }
}

/// Computes the transition for `event` in `state`.
///
/// Pairs the table does not name leave the state unchanged and run nothing.
#[must_use]
pub const fn transition(state: BrokerState, event: BrokerEvent, view: DependencyView) -> Transition {
    use BrokerEvent as E;
    use BrokerState as S;

    let satisfied = view.is_satisfied();

    match (state, event) {
        (S::Shutdown, _) => Transition::stay(S::Shutdown),
        (_, E::Shutdown) => Transition::exec(S::Shutdown),
        (_, E::Error) => Transition::exec(S::Error),
        (S::Boot, E::Boot) => Transition::exec(S::Boot),
        (S::Boot, E::ConInit) => Transition::exec(S::Init),
        (S::Init, E::SrvAdded | E::SrvInitialized | E::SrvUpdated) if satisfied => {
            Transition::exec(S::Start)
        }
        (S::Init, E::SrvNone) => Transition::exec(S::Start),
        (S::Init, E::SrvDeleted | E::SrvNotRunning | E::ConUpdated)
        | (S::Start | S::Update, E::SrvDeleted | E::SrvNotRunning | E::SrvNotInitialized) => {
            Transition::exec(S::Error)
        }
        (S::Start, E::SrvUpdated) if satisfied => Transition::exec(S::Update),
        (S::Start, E::ConUpdated) => Transition::exec(S::Update),
        (S::Update, E::SrvUpdated | E::ConUpdated) if satisfied => Transition::exec(S::Update),
        (state, _) => Transition::stay(state),
    }
}

type Action = Box<dyn Fn() + Send + Sync>;

struct Machine {
    state: BrokerState,
    actions: HashMap<BrokerState, Action>,
}

/// Applies events strictly one at a time.
pub struct Lifecycle {
    name: String,
    machine: Mutex<Machine>,
}

impl Lifecycle {
    /// Creates a lifecycle in [`BrokerState::Boot`] with no actions bound.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            machine: Mutex::new(Machine {
                state: BrokerState::Boot,
                actions: HashMap::new(),
            }),
        }
    }

    /// Binds the action run on entering `state`, replacing any earlier one.
    ///
    /// Actions run inside the critical section and must not block.
    pub fn bind(&self, state: BrokerState, action: impl Fn() + Send + Sync + 'static) {
        self.machine.lock().actions.insert(state, Box::new(action));
    }

    /// The current state.
    #[must_use]
    pub fn state(&self) -> BrokerState {
        self.machine.lock().state
    }

    /// Applies the boot event.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingAction`] unless every state has an action.
    pub fn boot(&self) -> Result<Transition> {
        {
            let machine = self.machine.lock();
            if let Some(state) = BrokerState::ALL
                .into_iter()
                .find(|state| !machine.actions.contains_key(state))
            {
                return Err(Error::MissingAction(state));
            }
        }

        Ok(self.apply(BrokerEvent::Boot, || DependencyView::SATISFIED))
    }

    /// Applies `event`, judging it against the view `view` computes while the
    /// lifecycle is locked.
    pub fn apply(&self, event: BrokerEvent, view: impl FnOnce() -> DependencyView) -> Transition {
        let mut machine = self.machine.lock();
        let current = machine.state;
        let step = transition(current, event, view());
        machine.state = step.next;

        if step.exec {
            info!("{}: {current} --{event:?}--> {}", self.name, step.next);
            if let Some(action) = machine.actions.get(&step.next) {
                action();
            }
        } else {
            debug!("{}: {event:?} ignored in {current}", self.name);
        }

        step
    }
}

impl fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lifecycle")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
