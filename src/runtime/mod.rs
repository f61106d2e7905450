//! Connection-multiplexing runtime.
//!
//! - `event_loop`: the mio reactor accepting and reading client sockets
//! - `framing`: separator-based document extraction per client
//! - `dispatch`: sticky round-robin lanes that process documents
//! - `connection`: per-socket write state and the slab registry

pub mod connection;
pub mod dispatch;
mod event_loop;
pub mod framing;

pub use event_loop::Server;

use crate::config::Config;
use std::fmt;

/// Identifies one accepted connection for the lifetime of the server.
///
/// Ids are never reused, unlike slab slots, so state keyed by a client can
/// not be confused with a later connection in the same slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(pub u64);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Bind and run the server until the event loop fails.
pub fn run(config: &Config) -> std::io::Result<()> {
    Server::bind(config)?.run()
}
