use std::collections::{HashMap, HashSet};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::descriptor::{ContainerDescriptor, ReadinessSpec};
use crate::error::{Error, Result};

/// A multi-container application.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Application {
    /// Application name.
    pub name: String,

    /// The containers, in declaration order.
    pub containers: Vec<ContainerDescriptor>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

impl Application {
    /// Looks up a container by name.
    #[must_use]
    pub fn container(&self, name: &str) -> Option<&ContainerDescriptor> {
        self.containers
            .iter()
            .find(|container| container.name == name)
    }

    /// Checks the application can be deployed: unique names, known
    /// dependencies, a port wherever readiness is probed over a socket, and
    /// no dependency cycles.
    ///
    /// # Errors
    ///
    /// Returns the first problem found.
    pub fn validate(&self) -> Result<()> {
        self.boot_order().map(|_| ())
    }

    /// Orders the containers so every container follows its dependencies.
    /// Ties keep declaration order.
    ///
    /// # Errors
    ///
    /// Returns the first validation problem found.
    pub fn boot_order(&self) -> Result<Vec<&ContainerDescriptor>> {
        let mut by_name = HashMap::new();
        for container in &self.containers {
            if container.name.is_empty() {
                return Err(Error::InvalidField {
                    container: container.name.clone(),
                    field: "name",
                });
            }
            if by_name.insert(container.name.as_str(), container).is_some() {
                return Err(Error::DuplicateContainer(container.name.clone()));
            }
            if container.start.readiness == ReadinessSpec::Socket && container.start.port.is_none()
            {
                return Err(Error::MissingPort(container.name.clone()));
            }
        }

        for container in &self.containers {
            let mut seen = HashSet::new();
            for dependency in &container.dependencies {
                if !by_name.contains_key(dependency.as_str()) {
                    return Err(Error::UnknownDependency {
                        container: container.name.clone(),
                        dependency: dependency.clone(),
                    });
                }
                if !seen.insert(dependency.as_str()) {
                    return Err(Error::InvalidField {
                        container: container.name.clone(),
                        field: "dependencies",
                    });
                }
            }
        }

        let mut marks = HashMap::new();
        let mut order = Vec::with_capacity(self.containers.len());
        for container in &self.containers {
            let mut trail = Vec::new();
            visit(container, &by_name, &mut marks, &mut trail, &mut order)?;
        }

        Ok(order)
    }

    /// Serializes the application.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_bytes(&self) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec_pretty(self)?))
    }
}

fn visit<'a>(
    container: &'a ContainerDescriptor,
    by_name: &HashMap<&str, &'a ContainerDescriptor>,
    marks: &mut HashMap<&'a str, Mark>,
    trail: &mut Vec<&'a str>,
    order: &mut Vec<&'a ContainerDescriptor>,
) -> Result<()> {
    let name = container.name.as_str();
    match marks.get(name) {
        Some(Mark::Done) => return Ok(()),
        Some(Mark::Visiting) => {
            let start = trail.iter().position(|entry| *entry == name).unwrap_or(0);
            let mut cycle: Vec<String> = trail[start..].iter().map(ToString::to_string).collect();
            cycle.push(name.to_string());
            return Err(Error::CircularDependency(cycle));
        }
        None => {}
    }

    marks.insert(name, Mark::Visiting);
    trail.push(name);

    for dependency in &container.dependencies {
        if let Some(next) = by_name.get(dependency.as_str()) {
            visit(next, by_name, marks, trail, order)?;
        }
    }

    trail.pop();
    marks.insert(name, Mark::Done);
    order.push(container);

    Ok(())
}

impl TryFrom<Bytes> for Application {
    type Error = Error;

    fn try_from(bytes: Bytes) -> Result<Self> {
        Ok(serde_json::from_slice(&bytes)?)
    }
}
