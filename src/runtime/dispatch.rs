//! Document dispatch onto worker lanes.
//!
//! A lane is one thread draining one queue, so everything submitted to the
//! same lane runs one at a time in submission order. Clients are pinned to a
//! lane on their first document (round-robin), which keeps each client's
//! documents strictly ordered while different clients run in parallel.
//!
//! With one lane or fewer there is no pool: documents are processed inline on
//! the reactor thread.

use crate::pipeline::{Pipeline, Session};
use crate::runtime::ClientId;
use bytes::Bytes;
use mio::Waker;
use std::collections::HashMap;
use std::io;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, trace, warn};

/// Sticky round-robin assignment of clients to lanes.
#[derive(Debug)]
pub struct LaneScheduler {
    lanes: usize,
    next: usize,
    assignments: HashMap<ClientId, usize>,
}

impl LaneScheduler {
    pub fn new(lanes: usize) -> Self {
        Self {
            lanes: lanes.max(1),
            next: 0,
            assignments: HashMap::new(),
        }
    }

    /// Lane for `client`, assigning the next one in rotation on first use.
    pub fn assign(&mut self, client: ClientId) -> usize {
        if let Some(&lane) = self.assignments.get(&client) {
            return lane;
        }
        let lane = self.next;
        self.next = (self.next + 1) % self.lanes;
        self.assignments.insert(client, lane);
        lane
    }

    pub fn lane_of(&self, client: ClientId) -> Option<usize> {
        self.assignments.get(&client).copied()
    }

    pub fn assigned(&self) -> usize {
        self.assignments.len()
    }

    /// Forget every assignment and restart the rotation at lane 0.
    pub fn reset(&mut self) {
        self.assignments.clear();
        self.next = 0;
    }
}

/// One document handed to a lane.
#[derive(Debug)]
pub struct Job {
    /// Slab slot of the connection the reply goes to.
    pub conn_id: usize,
    pub client: ClientId,
    pub document: Bytes,
    pub session: Arc<Mutex<Session>>,
}

/// A processed document waiting to be written back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub conn_id: usize,
    pub client: ClientId,
    pub reply: String,
}

/// Where lanes deliver replies. Wakes the reactor after each push.
#[derive(Clone)]
pub struct CompletionQueue {
    sender: Sender<Completion>,
    waker: Option<Arc<Waker>>,
}

impl CompletionQueue {
    pub fn new(sender: Sender<Completion>, waker: Option<Arc<Waker>>) -> Self {
        Self { sender, waker }
    }

    fn push(&self, completion: Completion) {
        if self.sender.send(completion).is_err() {
            // Reactor is gone; nothing left to deliver to.
            return;
        }
        if let Some(waker) = &self.waker {
            if let Err(e) = waker.wake() {
                error!(error = %e, "Failed to wake reactor");
            }
        }
    }
}

enum LaneMessage {
    Process(Job),
    Barrier(Sender<()>),
}

struct Lane {
    sender: Sender<LaneMessage>,
    handle: Option<JoinHandle<()>>,
}

/// Fixed set of single-threaded lanes.
pub struct WorkerPool {
    lanes: Vec<Lane>,
}

impl WorkerPool {
    /// Spawn `lanes` lane threads, each running `pipeline`.
    pub fn spawn(lanes: usize, pipeline: Pipeline, completions: CompletionQueue) -> io::Result<Self> {
        let mut pool = Vec::with_capacity(lanes);

        for lane_id in 0..lanes {
            let (sender, receiver) = mpsc::channel();
            let completions = completions.clone();

            let handle = thread::Builder::new()
                .name(format!("lane-{lane_id}"))
                .spawn(move || lane_loop(lane_id, pipeline, receiver, completions))?;

            pool.push(Lane {
                sender,
                handle: Some(handle),
            });
        }

        debug!(lanes, "Worker lanes started");
        Ok(Self { lanes: pool })
    }

    /// Queue a job on `lane`.
    pub fn submit(&self, lane: usize, job: Job) -> io::Result<()> {
        let target = self.lanes.get(lane).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, format!("no lane {lane}"))
        })?;
        target
            .sender
            .send(LaneMessage::Process(job))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, format!("lane {lane} stopped")))
    }

    /// Block until every lane has finished everything queued before this call.
    pub fn quiesce(&self) {
        let mut acks = Vec::with_capacity(self.lanes.len());
        for (lane_id, lane) in self.lanes.iter().enumerate() {
            let (ack_tx, ack_rx) = mpsc::channel();
            if lane.sender.send(LaneMessage::Barrier(ack_tx)).is_err() {
                warn!(lane = lane_id, "Lane stopped before barrier");
                continue;
            }
            acks.push(ack_rx);
        }
        for ack in acks {
            let _ = ack.recv();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        let handles: Vec<_> = self
            .lanes
            .drain(..)
            .filter_map(|mut lane| lane.handle.take())
            .collect();
        // Senders are dropped with the lanes above, ending each lane loop.
        for handle in handles {
            let _ = handle.join();
        }
    }
}

fn lane_loop(
    lane: usize,
    pipeline: Pipeline,
    jobs: Receiver<LaneMessage>,
    completions: CompletionQueue,
) {
    while let Ok(message) = jobs.recv() {
        match message {
            LaneMessage::Process(job) => {
                trace!(lane, client = %job.client, bytes = job.document.len(), "Processing document");
                let completion = run_job(&pipeline, job);
                completions.push(completion);
            }
            LaneMessage::Barrier(ack) => {
                let _ = ack.send(());
            }
        }
    }
    debug!(lane, "Lane stopped");
}

fn run_job(pipeline: &Pipeline, job: Job) -> Completion {
    let reply = {
        let mut session = job.session.lock().unwrap_or_else(PoisonError::into_inner);
        pipeline.process(&job.document, &mut session)
    };
    Completion {
        conn_id: job.conn_id,
        client: job.client,
        reply,
    }
}

/// Routes documents either inline or onto the lane pool.
pub enum Dispatcher {
    Inline(Pipeline),
    Lanes {
        scheduler: LaneScheduler,
        pool: WorkerPool,
    },
}

impl Dispatcher {
    /// Inline for `workers <= 1`, otherwise a pool of `workers` lanes.
    pub fn new(workers: usize, pipeline: Pipeline, completions: CompletionQueue) -> io::Result<Self> {
        if workers <= 1 {
            return Ok(Dispatcher::Inline(pipeline));
        }
        Ok(Dispatcher::Lanes {
            scheduler: LaneScheduler::new(workers),
            pool: WorkerPool::spawn(workers, pipeline, completions)?,
        })
    }

    /// Run or queue `job`. Inline dispatch returns the completion directly;
    /// lane dispatch delivers it later through the completion queue.
    pub fn dispatch(&mut self, job: Job) -> io::Result<Option<Completion>> {
        match self {
            Dispatcher::Inline(pipeline) => Ok(Some(run_job(pipeline, job))),
            Dispatcher::Lanes { scheduler, pool } => {
                let lane = scheduler.assign(job.client);
                pool.submit(lane, job)?;
                Ok(None)
            }
        }
    }

    /// Wait for all queued documents to finish.
    pub fn quiesce(&self) {
        if let Dispatcher::Lanes { pool, .. } = self {
            pool.quiesce();
        }
    }

    /// Drop all lane assignments.
    pub fn reset(&mut self) {
        if let Dispatcher::Lanes { scheduler, .. } = self {
            scheduler.reset();
        }
    }

    pub fn lane_of(&self, client: ClientId) -> Option<usize> {
        match self {
            Dispatcher::Inline(_) => None,
            Dispatcher::Lanes { scheduler, .. } => scheduler.lane_of(client),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn job(conn_id: usize, client: u64, doc: &'static [u8], session: &Arc<Mutex<Session>>) -> Job {
        Job {
            conn_id,
            client: ClientId(client),
            document: Bytes::from_static(doc),
            session: Arc::clone(session),
        }
    }

    #[test]
    fn test_round_robin_is_sticky() {
        let mut scheduler = LaneScheduler::new(3);

        assert_eq!(scheduler.assign(ClientId(10)), 0);
        assert_eq!(scheduler.assign(ClientId(11)), 1);
        assert_eq!(scheduler.assign(ClientId(10)), 0);
        assert_eq!(scheduler.assign(ClientId(12)), 2);
        assert_eq!(scheduler.assign(ClientId(13)), 0);
        assert_eq!(scheduler.assign(ClientId(11)), 1);
        assert_eq!(scheduler.assigned(), 4);
    }

    #[test]
    fn test_scheduler_reset() {
        let mut scheduler = LaneScheduler::new(2);
        scheduler.assign(ClientId(1));
        scheduler.assign(ClientId(2));

        scheduler.reset();
        assert_eq!(scheduler.assigned(), 0);
        assert!(scheduler.lane_of(ClientId(1)).is_none());
        assert_eq!(scheduler.assign(ClientId(2)), 0);

        scheduler.reset();
        assert_eq!(scheduler.assigned(), 0);
    }

    #[test]
    fn test_inline_dispatch_completes_immediately() {
        let (tx, _rx) = mpsc::channel();
        let mut dispatcher =
            Dispatcher::new(1, Pipeline::new(false), CompletionQueue::new(tx, None)).unwrap();
        let session = Arc::new(Mutex::new(Session::new()));

        let completion = dispatcher.dispatch(job(7, 1, b"Hi hi", &session)).unwrap();
        assert_eq!(
            completion,
            Some(Completion {
                conn_id: 7,
                client: ClientId(1),
                reply: "hi,2,\n".to_string(),
            })
        );
        assert!(dispatcher.lane_of(ClientId(1)).is_none());
    }

    #[test]
    fn test_lane_preserves_per_client_order() {
        let (tx, rx) = mpsc::channel();
        let mut dispatcher =
            Dispatcher::new(2, Pipeline::new(false), CompletionQueue::new(tx, None)).unwrap();
        let first = Arc::new(Mutex::new(Session::new()));
        let second = Arc::new(Mutex::new(Session::new()));

        let docs: [&'static [u8]; 3] = [b"a", b"b", b"c"];
        for doc in docs {
            assert!(dispatcher.dispatch(job(0, 1, doc, &first)).unwrap().is_none());
            assert!(dispatcher.dispatch(job(1, 2, doc, &second)).unwrap().is_none());
        }
        dispatcher.quiesce();

        assert_eq!(dispatcher.lane_of(ClientId(1)), Some(0));
        assert_eq!(dispatcher.lane_of(ClientId(2)), Some(1));

        let replies: Vec<Completion> = rx.try_iter().collect();
        assert_eq!(replies.len(), 6);
        for client in [1, 2] {
            let ordered: Vec<&str> = replies
                .iter()
                .filter(|c| c.client == ClientId(client))
                .map(|c| c.reply.as_str())
                .collect();
            assert_eq!(ordered, vec!["a,1,\n", "b,1,\n", "c,1,\n"]);
        }

        let latencies = first.lock().unwrap().latencies().clone();
        assert_eq!(latencies.count.len(), 3);
    }

    #[test]
    fn test_quiesce_waits_for_queued_work() {
        let (tx, rx) = mpsc::channel();
        let pool = WorkerPool::spawn(2, Pipeline::new(true), CompletionQueue::new(tx, None)).unwrap();
        let session = Arc::new(Mutex::new(Session::new()));

        for _ in 0..50 {
            pool.submit(1, job(3, 9, b"<b>bold</b> text", &session)).unwrap();
        }
        pool.quiesce();

        let first = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert!(first.reply == "bold,1,text,1,\n" || first.reply == "text,1,bold,1,\n");
        assert_eq!(rx.try_iter().count(), 49);
    }

    #[test]
    fn test_submit_to_unknown_lane() {
        let (tx, _rx) = mpsc::channel();
        let pool = WorkerPool::spawn(1, Pipeline::new(false), CompletionQueue::new(tx, None)).unwrap();
        let session = Arc::new(Mutex::new(Session::new()));

        let err = pool.submit(5, job(0, 1, b"x", &session)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }
}
