//! A development coordination server serving the in-memory store over TCP,
//! and the matching session client.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod client;
mod error;
pub mod protocol;
mod server;

pub use client::{TcpClientOptions, TcpCoordinationClient};
pub use error::{Error, Result};
pub use server::{CoordinationServer, ServerOptions};
