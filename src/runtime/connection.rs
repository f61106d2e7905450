//! Connection state for the reactor.
//!
//! Each open socket tracks which client it belongs to and the reply bytes
//! still waiting to be written. Connections live in a slab so their slot
//! index can double as the poll token.

use crate::runtime::ClientId;
use bytes::{Buf, BytesMut};
use mio::Interest;
use slab::Slab;
use std::io::{self, Write};

/// Current state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Nothing queued; waiting for the next document.
    Reading,
    /// Reply bytes are queued and the socket stopped accepting them.
    Writing,
}

/// Outcome of a flush attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushStatus {
    /// Everything queued has been written.
    Drained,
    /// The socket would block with bytes still queued.
    Blocked,
}

/// A single client connection.
#[derive(Debug)]
pub struct Connection<S> {
    pub stream: S,
    pub client: ClientId,
    outbound: BytesMut,
    state: ConnState,
}

impl<S> Connection<S> {
    /// Create a new connection in initial reading state.
    pub fn new(stream: S, client: ClientId) -> Self {
        Self {
            stream,
            client,
            outbound: BytesMut::new(),
            state: ConnState::Reading,
        }
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    /// Append a reply behind anything already queued.
    pub fn queue_reply(&mut self, reply: &[u8]) {
        self.outbound.extend_from_slice(reply);
    }

    /// Reply bytes not yet written.
    pub fn pending_write(&self) -> usize {
        self.outbound.len()
    }

    /// Readiness this connection needs in its current state.
    pub fn interest(&self) -> Interest {
        match self.state {
            ConnState::Reading => Interest::READABLE,
            ConnState::Writing => Interest::READABLE | Interest::WRITABLE,
        }
    }
}

impl<S: Write> Connection<S> {
    /// Write queued bytes until drained or the socket would block.
    pub fn flush(&mut self) -> io::Result<FlushStatus> {
        while !self.outbound.is_empty() {
            match self.stream.write(&self.outbound) {
                Ok(0) => {
                    return Err(io::Error::new(io::ErrorKind::WriteZero, "write returned 0"));
                }
                Ok(n) => self.outbound.advance(n),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.state = ConnState::Writing;
                    return Ok(FlushStatus::Blocked);
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        self.state = ConnState::Reading;
        Ok(FlushStatus::Drained)
    }
}

/// Registry of open connections using slab allocation.
///
/// Provides O(1) insert, lookup, and remove operations.
pub struct ConnectionRegistry<S> {
    connections: Slab<Connection<S>>,
    max_connections: usize,
}

impl<S> ConnectionRegistry<S> {
    /// Create a new registry with specified maximum capacity.
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: Slab::with_capacity(max_connections.min(1024)),
            max_connections,
        }
    }

    /// Insert a new connection into the registry.
    ///
    /// Returns `None` if the registry is at capacity.
    pub fn insert(&mut self, conn: Connection<S>) -> Option<usize> {
        if self.connections.len() >= self.max_connections {
            return None;
        }
        Some(self.connections.insert(conn))
    }

    pub fn get_mut(&mut self, id: usize) -> Option<&mut Connection<S>> {
        self.connections.get_mut(id)
    }

    /// Look up a slot only if it still belongs to `client`.
    ///
    /// Slots are reused after close, so a late reply for a departed client
    /// must not land on whoever holds the slot now.
    pub fn get_for_client(&mut self, id: usize, client: ClientId) -> Option<&mut Connection<S>> {
        self.connections.get_mut(id).filter(|conn| conn.client == client)
    }

    pub fn remove(&mut self, id: usize) -> Option<Connection<S>> {
        self.connections.try_remove(id)
    }

    pub fn contains(&self, id: usize) -> bool {
        self.connections.contains(id)
    }

    /// Number of open connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.max_connections
    }
}
