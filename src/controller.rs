//! Experiment lifecycle and per-client bookkeeping.
//!
//! An experiment starts with the first accepted connection and ends when the
//! last open connection closes. At that point every client's latency samples
//! are merged per stage, reported, and all per-client state is discarded so
//! the next connection starts a fresh experiment.

use crate::config::Config;
use crate::pipeline::{elapsed_ms, Session, StageLatencies};
use crate::runtime::dispatch::{Completion, Dispatcher, Job};
use crate::runtime::framing::{FrameAssembler, FramingError};
use crate::runtime::ClientId;
use crate::stats::{self, Summary};
use bytes::Bytes;
use chrono::{DateTime, Local};
use std::collections::HashMap;
use std::io;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Everything the server remembers about one client during an experiment.
#[derive(Debug)]
struct ClientState {
    assembler: FrameAssembler,
    /// Arrival of the first byte of the document being assembled.
    receive_start: Option<Instant>,
    receive: Vec<f64>,
    session: Arc<Mutex<Session>>,
    documents: u64,
}

impl ClientState {
    fn new(separator: u8) -> Self {
        Self {
            assembler: FrameAssembler::new(separator),
            receive_start: None,
            receive: Vec::new(),
            session: Arc::new(Mutex::new(Session::new())),
            documents: 0,
        }
    }
}

/// Merged samples of one stage across all clients.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StageReport {
    pub samples: Vec<f64>,
    pub summary: Summary,
}

impl StageReport {
    fn from_samples(samples: Vec<f64>) -> Self {
        let summary = Summary::of(&samples);
        Self { samples, summary }
    }
}

/// Statistics of one finished experiment.
#[derive(Debug, Clone)]
pub struct ExperimentReport {
    pub experiment: u64,
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
    pub clients: usize,
    pub documents: u64,
    pub receive: StageReport,
    pub clean: StageReport,
    pub count: StageReport,
    pub serialize: StageReport,
}

impl ExperimentReport {
    /// `recAvg;recStd;cleanAvg;cleanStd;wcAvg;wcStd;serAvg;serStd`
    pub fn summary_line(&self) -> String {
        [&self.receive, &self.clean, &self.count, &self.serialize]
            .iter()
            .map(|stage| format!("{};{}", stage.summary.mean, stage.summary.std_dev))
            .collect::<Vec<_>>()
            .join(";")
    }

    /// Percentile dumps of all four stages.
    pub fn percentile_dump(&self) -> String {
        let mut out = String::new();
        for (name, stage) in [
            ("Receive", &self.receive),
            ("Cleaning", &self.clean),
            ("Word count", &self.count),
            ("Serialization", &self.serialize),
        ] {
            out.push_str(&stats::render_percentiles(name, &stage.samples));
        }
        out
    }
}

/// Owns the active-connection count, the per-client registry and the
/// dispatcher that processes completed documents.
pub struct ServerController {
    separator: u8,
    percentiles: bool,
    dispatcher: Dispatcher,
    active: usize,
    next_client: u64,
    experiment: u64,
    started_at: Option<DateTime<Local>>,
    clients: HashMap<ClientId, ClientState>,
    subscribers: Vec<Sender<ExperimentReport>>,
}

impl ServerController {
    pub fn new(config: &Config, dispatcher: Dispatcher) -> Self {
        Self {
            separator: config.separator,
            percentiles: config.percentiles,
            dispatcher,
            active: 0,
            next_client: 0,
            experiment: 1,
            started_at: None,
            clients: HashMap::new(),
            subscribers: Vec::new(),
        }
    }

    /// Receive a copy of every report from now on.
    pub fn subscribe(&mut self) -> Receiver<ExperimentReport> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.push(tx);
        rx
    }

    /// Number of connections accepted and not yet closed.
    pub fn active_connections(&self) -> usize {
        self.active
    }

    /// Clients seen during the current experiment, open or closed.
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Register a newly accepted connection and hand out its client id.
    pub fn open(&mut self) -> ClientId {
        if self.started_at.is_none() {
            self.started_at = Some(Local::now());
            info!(experiment = self.experiment, "Experiment started");
        }
        self.active += 1;
        self.next_client += 1;
        ClientId(self.next_client)
    }

    /// Feed bytes read from `client` into its assembler.
    ///
    /// Returns the document once its separator has arrived, recording the
    /// receive latency measured from the document's first chunk.
    pub fn receive(
        &mut self,
        client: ClientId,
        chunk: &[u8],
    ) -> Result<Option<Bytes>, FramingError> {
        let separator = self.separator;
        let state = self
            .clients
            .entry(client)
            .or_insert_with(|| ClientState::new(separator));

        let started = *state.receive_start.get_or_insert_with(Instant::now);

        let Some(frame) = state.assembler.append(chunk) else {
            return Ok(None);
        };

        state.receive_start = None;
        let document = frame.into_document()?;
        state.receive.push(elapsed_ms(started));

        if document.is_empty() {
            warn!(%client, "Empty document");
        }
        state.documents += 1;
        Ok(Some(document))
    }

    /// Process or queue a completed document for the connection in `conn_id`.
    pub fn dispatch(
        &mut self,
        conn_id: usize,
        client: ClientId,
        document: Bytes,
    ) -> io::Result<Option<Completion>> {
        let separator = self.separator;
        let session = Arc::clone(
            &self
                .clients
                .entry(client)
                .or_insert_with(|| ClientState::new(separator))
                .session,
        );
        self.dispatcher.dispatch(Job {
            conn_id,
            client,
            document,
            session,
        })
    }

    pub fn lane_of(&self, client: ClientId) -> Option<usize> {
        self.dispatcher.lane_of(client)
    }

    /// Retire a connection. When it was the last one, the experiment ends:
    /// the report is emitted and returned and all state is reset.
    pub fn close(&mut self, client: ClientId) -> Option<ExperimentReport> {
        self.active = self.active.saturating_sub(1);
        if let Some(state) = self.clients.get_mut(&client) {
            state.assembler.clear();
            state.receive_start = None;
        }
        debug!(%client, active = self.active, "Client retired");

        if self.active > 0 {
            return None;
        }

        let report = self.finish_experiment();
        self.emit(&report);
        self.reset();
        Some(report)
    }

    /// Merge every client's samples once all queued documents are done.
    fn finish_experiment(&self) -> ExperimentReport {
        self.dispatcher.quiesce();

        let mut receive = Vec::with_capacity(self.clients.len());
        let mut processing: Vec<StageLatencies> = Vec::with_capacity(self.clients.len());
        let mut documents = 0;

        for state in self.clients.values() {
            receive.push(state.receive.as_slice());
            documents += state.documents;
            let session = state.session.lock().unwrap_or_else(PoisonError::into_inner);
            processing.push(session.latencies().clone());
        }

        let finished_at = Local::now();
        ExperimentReport {
            experiment: self.experiment,
            started_at: self.started_at.unwrap_or(finished_at),
            finished_at,
            clients: self.clients.len(),
            documents,
            receive: StageReport::from_samples(stats::merge(receive)),
            clean: StageReport::from_samples(stats::merge(
                processing.iter().map(|l| l.clean.as_slice()),
            )),
            count: StageReport::from_samples(stats::merge(
                processing.iter().map(|l| l.count.as_slice()),
            )),
            serialize: StageReport::from_samples(stats::merge(
                processing.iter().map(|l| l.serialize.as_slice()),
            )),
        }
    }

    fn emit(&mut self, report: &ExperimentReport) {
        info!(
            experiment = report.experiment,
            clients = report.clients,
            documents = report.documents,
            started = %report.started_at.format("%H:%M:%S%.3f"),
            "Experiment finished"
        );

        println!("{}", report.summary_line());
        if self.percentiles {
            print!("{}", report.percentile_dump());
        }

        self.subscribers.retain(|tx| tx.send(report.clone()).is_ok());
    }

    /// Discard all per-client state and lane assignments.
    pub fn reset(&mut self) {
        self.clients.clear();
        self.dispatcher.reset();
        if self.started_at.take().is_some() {
            self.experiment += 1;
        }
        info!("Server reset");
    }
}
