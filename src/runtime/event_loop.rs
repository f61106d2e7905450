//! mio event loop implementation.
//!
//! Readiness-based model: poll tells us when sockets are ready,
//! then we perform non-blocking read/write syscalls on this one thread.
//! Uses epoll on Linux, kqueue on macOS.
//!
//! Completed documents go through the controller's dispatcher. Inline
//! dispatch hands the reply straight back; lane dispatch delivers it later
//! through the completion channel and wakes the poll with a [`Waker`]. All
//! socket writes happen here, so each socket has a single writer.

use crate::config::Config;
use crate::controller::{ExperimentReport, ServerController};
use crate::pipeline::Pipeline;
use crate::runtime::connection::{Connection, ConnectionRegistry};
use crate::runtime::dispatch::{Completion, CompletionQueue, Dispatcher};
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token, Waker};
use std::io::{self, Read};
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};

const LISTENER_TOKEN: Token = Token(usize::MAX);
const WAKER_TOKEN: Token = Token(usize::MAX - 1);

/// The reactor: one listener, many client sockets, one thread.
pub struct Server {
    poll: Poll,
    listener: TcpListener,
    completions: Receiver<Completion>,
    controller: ServerController,
    connections: ConnectionRegistry<TcpStream>,
    /// Reused for every read.
    scratch: Vec<u8>,
    event_batch: usize,
}

impl Server {
    /// Bind the listener and start the worker lanes, if any.
    pub fn bind(config: &Config) -> io::Result<Self> {
        let addr = resolve(&config.host, config.port)?;

        let poll = Poll::new()?;
        let mut listener = TcpListener::from_std(create_listener(addr)?);
        poll.registry()
            .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;

        let waker = Arc::new(Waker::new(poll.registry(), WAKER_TOKEN)?);
        let (tx, completions) = mpsc::channel();
        let dispatcher = Dispatcher::new(
            config.workers,
            Pipeline::new(config.cleaning),
            CompletionQueue::new(tx, Some(waker)),
        )?;

        info!(
            addr = %addr,
            cleaning = config.cleaning,
            workers = config.workers,
            lanes = config.uses_lanes(),
            separator = %(config.separator as char),
            "Starting mio runtime"
        );

        Ok(Self {
            poll,
            listener,
            completions,
            controller: ServerController::new(config, dispatcher),
            connections: ConnectionRegistry::new(config.max_connections),
            scratch: vec![0u8; config.read_buffer_size],
            event_batch: config.event_batch,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Receive every experiment report produced after this call.
    pub fn reports(&mut self) -> Receiver<ExperimentReport> {
        self.controller.subscribe()
    }

    /// Run the event loop. Only returns on a poll failure.
    pub fn run(mut self) -> io::Result<()> {
        let mut events = Events::with_capacity(self.event_batch);
        info!(addr = %self.local_addr()?, "Server started");

        loop {
            if let Err(e) = self.poll.poll(&mut events, None) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(e);
            }

            for event in events.iter() {
                match event.token() {
                    LISTENER_TOKEN => self.accept_connections(),
                    WAKER_TOKEN => self.drain_completions(),
                    Token(conn_id) => {
                        if let Err(e) = self.handle_connection_event(conn_id, event) {
                            debug!(conn_id, error = %e, "Connection error");
                            self.close_connection(conn_id);
                        }
                    }
                }
            }
        }
    }

    fn accept_connections(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    if self.connections.len() >= self.connections.capacity() {
                        warn!(peer = %peer, "Connection limit reached");
                        continue;
                    }
                    if let Err(e) = self.register(stream, peer) {
                        error!(peer = %peer, error = %e, "Failed to register connection");
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!("Accept error: {}", e);
                    break;
                }
            }
        }
    }

    fn register(&mut self, stream: TcpStream, peer: SocketAddr) -> io::Result<()> {
        stream.set_nodelay(true)?;
        let client = self.controller.open();

        let Some(conn_id) = self.connections.insert(Connection::new(stream, client)) else {
            self.controller.close(client);
            return Err(io::Error::other("connection registry full"));
        };

        let conn = self
            .connections
            .get_mut(conn_id)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "connection not found"))?;
        let registered =
            self.poll
                .registry()
                .register(&mut conn.stream, Token(conn_id), Interest::READABLE);
        if let Err(e) = registered {
            self.close_connection(conn_id);
            return Err(e);
        }

        debug!(
            conn_id,
            %client,
            peer = %peer,
            active = self.controller.active_connections(),
            "Accepted connection"
        );
        Ok(())
    }

    fn handle_connection_event(
        &mut self,
        conn_id: usize,
        event: &mio::event::Event,
    ) -> io::Result<()> {
        if !self.connections.contains(conn_id) {
            return Ok(());
        }

        if event.is_readable() || event.is_read_closed() {
            self.handle_readable(conn_id)?;
        }

        // Re-check connection exists (may have been removed)
        if !self.connections.contains(conn_id) {
            return Ok(());
        }

        if event.is_writable() {
            self.flush_connection(conn_id)?;
        }

        Ok(())
    }

    /// Read until the socket would block, framing and dispatching as
    /// documents complete.
    fn handle_readable(&mut self, conn_id: usize) -> io::Result<()> {
        loop {
            let Some(conn) = self.connections.get_mut(conn_id) else {
                return Ok(());
            };
            let client = conn.client;

            let n = match conn.stream.read(&mut self.scratch) {
                Ok(0) => {
                    return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "peer closed"));
                }
                Ok(n) => n,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            trace!(conn_id, %client, bytes = n, "Read chunk");

            let document = match self.controller.receive(client, &self.scratch[..n]) {
                Ok(Some(document)) => document,
                Ok(None) => continue,
                Err(e) => {
                    error!(conn_id, %client, error = %e, "Framing anomaly, closing connection");
                    return Err(io::Error::new(io::ErrorKind::InvalidData, e));
                }
            };

            if let Some(completion) = self.controller.dispatch(conn_id, client, document)? {
                self.deliver(completion)?;
            }
        }
    }

    /// Pull every reply the lanes have finished since the last wake.
    fn drain_completions(&mut self) {
        while let Ok(completion) = self.completions.try_recv() {
            let conn_id = completion.conn_id;
            if let Err(e) = self.deliver(completion) {
                debug!(conn_id, error = %e, "Reply write failed");
                self.close_connection(conn_id);
            }
        }
    }

    /// Queue a reply on its connection and write what the socket accepts.
    fn deliver(&mut self, completion: Completion) -> io::Result<()> {
        if completion.reply.is_empty() {
            return Ok(());
        }
        let Some(conn) = self
            .connections
            .get_for_client(completion.conn_id, completion.client)
        else {
            trace!(client = %completion.client, "Dropping reply for closed connection");
            return Ok(());
        };
        conn.queue_reply(completion.reply.as_bytes());
        self.flush_connection(completion.conn_id)
    }

    fn flush_connection(&mut self, conn_id: usize) -> io::Result<()> {
        let Some(conn) = self.connections.get_mut(conn_id) else {
            return Ok(());
        };

        let before = conn.state();
        conn.flush()?;
        if conn.state() != before {
            let interest = conn.interest();
            self.poll
                .registry()
                .reregister(&mut conn.stream, Token(conn_id), interest)?;
        }
        Ok(())
    }

    fn close_connection(&mut self, conn_id: usize) {
        if let Some(mut conn) = self.connections.remove(conn_id) {
            let _ = self.poll.registry().deregister(&mut conn.stream);
            debug!(
                conn_id,
                client = %conn.client,
                idle = self.connections.is_empty(),
                "Connection closed"
            );
            self.controller.close(conn.client);
        }
    }
}

fn resolve(host: &str, port: u16) -> io::Result<SocketAddr> {
    (host, port).to_socket_addrs()?.next().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("no address for {host}:{port}"),
        )
    })
}

/// Create a non-blocking TCP listener.
fn create_listener(addr: SocketAddr) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;

    Ok(socket.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_localhost() {
        let addr = resolve("127.0.0.1", 4242).unwrap();
        assert_eq!(addr.port(), 4242);
        assert!(addr.ip().is_loopback());
    }

    #[test]
    fn test_bind_ephemeral_port() {
        let server = Server::bind(&Config::new("127.0.0.1", 0, false, 1)).unwrap();
        let addr = server.local_addr().unwrap();
        assert_ne!(addr.port(), 0);
    }
}
