use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::Instant;
use tracing::debug;

/// Token a wrapper prints to hand over the pid of the real service.
pub const DEFAULT_CONTROL_TOKEN: &str = "CONVOY_INIT_PID=";

/// Timing of a socket readiness probe.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProbeOptions {
    /// Pause between connection attempts.
    pub interval: Duration,

    /// Total time before the process is declared not initialized.
    pub timeout: Duration,
}

impl Default for ProbeOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            timeout: Duration::from_secs(120),
        }
    }
}

/// How a supervised process is judged ready.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Readiness {
    /// Ready once a TCP connection to `addr` succeeds.
    Socket {
        /// Address to probe.
        addr: SocketAddr,

        /// Probe timing.
        options: ProbeOptions,
    },

    /// Ready once stdout carries `token` followed by a pid.
    OutputToken {
        /// Marker preceding the pid.
        token: String,
    },

    /// Ready as soon as it is spawned.
    Immediate,
}

impl Readiness {
    /// Output token readiness with the default marker.
    #[must_use]
    pub fn output_token() -> Self {
        Self::OutputToken {
            token: DEFAULT_CONTROL_TOKEN.to_string(),
        }
    }
}

/// Polls `addr` until it accepts a connection or the budget runs out.
///
/// Returns `Ok(true)` when the socket answered and `Ok(false)` on timeout.
///
/// # Errors
///
/// Returns connection errors that retrying cannot fix.
pub async fn probe_socket(addr: SocketAddr, options: ProbeOptions) -> io::Result<bool> {
    let started = Instant::now();

    loop {
        match TcpStream::connect(addr).await {
            Ok(_) => return Ok(true),
            Err(error) if is_transient(&error) => {
                debug!("{addr} not accepting connections yet: {error}");
            }
            Err(error) => return Err(error),
        }

        if started.elapsed() >= options.timeout {
            return Ok(false);
        }

        tokio::time::sleep(options.interval).await;
    }
}

fn is_transient(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::TimedOut
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    )
}

/// Looks for `token` in an output line.
///
/// Returns `None` when the token is absent, otherwise the pid that follows
/// it if one parses.
#[must_use]
pub fn match_control_token(line: &str, token: &str) -> Option<Option<u32>> {
    let index = line.find(token)?;
    let rest = &line[index + token.len()..];
    let digits: String = rest
        .trim_start()
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();

    Some(digits.parse().ok())
}
