//! wordcount-bench: a benchmarkable word-count service
//!
//! Clients stream documents over persistent TCP connections; the server
//! frames them on a separator character, counts words, and answers with the
//! serialized counts while recording per-stage latency.
//!
//! Features:
//! - Single-threaded mio reactor multiplexing all client sockets
//! - Optional pool of worker lanes with per-client ordering
//! - Optional HTML tag stripping before counting
//! - Per-experiment latency summaries and percentile dumps
//! - Async load-generating client

pub mod client;
pub mod config;
pub mod controller;
pub mod pipeline;
pub mod runtime;
pub mod stats;
