//! Decode worker pool.
//!
//! - Fixed pool of worker threads fed through a bounded flume queue (FIFO)
//! - One decode per key: a submission for a key already in flight attaches a
//!   new ticket to the existing job
//! - Cancelled tickets are skipped before decode and muted after it
//! - Completions go out on an async channel so the UI thread can await them

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use flume::{Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, error, trace, warn};

use super::ticket::{Completion, LoadTicket, TicketId, TicketState};
use crate::cache::CacheStore;
use crate::config::{LoaderConfig, MAX_WORKERS};
use crate::decoder::Decoder;
use crate::error::{DecodeError, SchedulerError};
use crate::models::{MediaEntry, MediaKey, SourceStamp};

/// How long an idle worker waits before re-checking the shutdown flag.
const WORKER_POLL_MS: u64 = 100;

type JobId = u64;

/// One decode of one key, shared by every ticket attached to it.
struct Job {
    /// File to decode.
    key: MediaKey,
    /// Attached tickets in submission order.
    tickets: Vec<TicketId>,
    /// Set once a worker has claimed the job.
    running: bool,
}

/// Book-keeping for a ticket until its job resolves.
struct TicketRecord {
    /// Key the ticket was submitted for.
    key: MediaKey,
    /// Navigation generation captured at submission.
    generation: u64,
    /// Pending, Running or Cancelled while the record exists.
    state: TicketState,
}

#[derive(Default)]
struct State {
    /// Jobs queued or running.
    jobs: HashMap<JobId, Job>,
    /// Job currently serving each key (for dedup).
    in_flight: HashMap<MediaKey, JobId>,
    /// Tickets whose job has not resolved yet.
    tickets: HashMap<TicketId, TicketRecord>,
    /// Jobs that did not fit in the work queue, oldest first.
    backlog: VecDeque<JobId>,
    /// Next job id to hand out.
    next_job: JobId,
    /// Next ticket id to hand out. Ticket ids start at 1.
    next_ticket: u64,
}

/// State shared between the scheduler handle and its workers.
struct Shared {
    /// Job and ticket tables.
    state: Mutex<State>,
    /// Cache that successful decodes go into.
    cache: CacheStore,
    /// Decode collaborator called by workers.
    decoder: Arc<dyn Decoder>,
    /// Sender for job ids (bounded).
    work_tx: Sender<JobId>,
    /// Sender for completions back to the session.
    completion_tx: async_channel::Sender<Completion>,
    /// Flag to signal workers to stop.
    shutdown: AtomicBool,
    /// Number of workers currently running a job.
    active_workers: AtomicUsize,
}

/// Runs decode jobs on a fixed pool of worker threads.
pub struct LoadScheduler {
    /// State shared with the workers.
    shared: Arc<Shared>,
    /// Receiver for completions (cloned out by `completions`).
    completion_rx: async_channel::Receiver<Completion>,
    /// Worker thread handles, drained on shutdown.
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl LoadScheduler {
    pub fn new(
        workers: usize,
        queue_capacity: usize,
        cache: CacheStore,
        decoder: Arc<dyn Decoder>,
    ) -> Self {
        let num_workers = workers.clamp(1, MAX_WORKERS);

        let (work_tx, work_rx) = flume::bounded(queue_capacity.max(1));
        let (completion_tx, completion_rx) = async_channel::unbounded();

        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                next_ticket: 1,
                ..State::default()
            }),
            cache,
            decoder,
            work_tx,
            completion_tx,
            shutdown: AtomicBool::new(false),
            active_workers: AtomicUsize::new(0),
        });

        let mut handles = Vec::with_capacity(num_workers);
        for worker_id in 0..num_workers {
            let rx = work_rx.clone();
            let shared = Arc::clone(&shared);
            let handle = thread::Builder::new()
                .name(format!("load-worker-{}", worker_id))
                .spawn(move || worker_loop(worker_id, rx, shared))
                .expect("Failed to spawn load worker");
            handles.push(handle);
        }

        debug!(num_workers = handles.len(), "Started load worker pool");

        Self {
            shared,
            completion_rx,
            workers: Mutex::new(handles),
        }
    }

    pub fn with_config(config: &LoaderConfig, cache: CacheStore, decoder: Arc<dyn Decoder>) -> Self {
        Self::new(config.workers, config.queue_capacity, cache, decoder)
    }

    /// Queue a load for `key`. Returns immediately.
    ///
    /// If a job for `key` is already pending or running, the new ticket is
    /// attached to it instead of starting a second decode.
    pub fn submit(&self, key: MediaKey, generation: u64) -> LoadTicket {
        let mut guard = self.shared.state.lock();
        let state = &mut *guard;

        let id = TicketId(state.next_ticket);
        state.next_ticket += 1;

        let existing = state.in_flight.get(&key).copied();
        let job_id = match existing {
            Some(job_id) => job_id,
            None => {
                let job_id = state.next_job;
                state.next_job += 1;
                state.jobs.insert(
                    job_id,
                    Job {
                        key: key.clone(),
                        tickets: Vec::new(),
                        running: false,
                    },
                );
                state.in_flight.insert(key.clone(), job_id);
                job_id
            }
        };

        let mut ticket_state = TicketState::Pending;
        if let Some(job) = state.jobs.get_mut(&job_id) {
            job.tickets.push(id);
            if job.running {
                ticket_state = TicketState::Running;
            }
        }
        state.tickets.insert(
            id,
            TicketRecord {
                key: key.clone(),
                generation,
                state: ticket_state,
            },
        );

        if existing.is_some() {
            trace!(ticket = %id, %key, generation, "Attached to in-flight load");
        } else {
            trace!(ticket = %id, %key, generation, "Queued load");
            self.shared.enqueue(state, job_id);
        }

        LoadTicket {
            id,
            key,
            generation,
            state: ticket_state,
        }
    }

    /// Mark a ticket cancelled. Returns false if it is unknown or already done.
    ///
    /// A running decode is not interrupted; its result is simply not
    /// delivered to this ticket.
    pub fn cancel(&self, id: TicketId) -> bool {
        let mut state = self.shared.state.lock();
        match state.tickets.get_mut(&id) {
            Some(record) if !record.state.is_terminal() => {
                record.state = TicketState::Cancelled;
                trace!(ticket = %id, key = %record.key, "Cancelled load");
                true
            }
            _ => false,
        }
    }

    /// State of a ticket whose job has not resolved yet. Resolved tickets are
    /// forgotten; their final state travels with the `Completion`.
    pub fn ticket_state(&self, id: TicketId) -> Option<TicketState> {
        self.shared.state.lock().tickets.get(&id).map(|r| r.state)
    }

    pub fn is_in_flight(&self, key: &MediaKey) -> bool {
        self.shared.state.lock().in_flight.contains_key(key)
    }

    /// Receiver for completions. All clones share one queue.
    pub fn completions(&self) -> async_channel::Receiver<Completion> {
        self.completion_rx.clone()
    }

    /// Drain completed loads without blocking.
    pub fn poll_completions(&self) -> Vec<Completion> {
        let mut completions = Vec::new();
        while let Ok(completion) = self.completion_rx.try_recv() {
            completions.push(completion);
        }
        completions
    }

    pub fn cache(&self) -> &CacheStore {
        &self.shared.cache
    }

    /// Number of jobs queued or running.
    pub fn pending_count(&self) -> usize {
        self.shared.state.lock().jobs.len()
    }

    pub fn backlog_len(&self) -> usize {
        self.shared.state.lock().backlog.len()
    }

    pub fn active_worker_count(&self) -> usize {
        self.shared.active_workers.load(Ordering::Relaxed)
    }

    pub fn worker_count(&self) -> usize {
        self.workers.lock().len()
    }

    pub fn is_busy(&self) -> bool {
        self.pending_count() > 0 || self.active_worker_count() > 0
    }

    /// Stop the workers and wait for them. Decodes in progress finish first.
    pub fn shutdown(&self) {
        if self.shared.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("Shutting down load workers");

        let handles: Vec<_> = self.workers.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.join();
        }

        debug!("Load worker shutdown complete");
    }
}

impl Drop for LoadScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Shared {
    fn enqueue(&self, state: &mut State, job_id: JobId) {
        // Anything already parked must go first.
        if !state.backlog.is_empty() {
            state.backlog.push_back(job_id);
            return;
        }

        match self.work_tx.try_send(job_id) {
            Ok(()) => {}
            Err(flume::TrySendError::Full(job_id)) => {
                let err = SchedulerError::PoolSaturatedTransient {
                    queued: self.work_tx.len(),
                };
                debug!(%err, job_id, "Parking load job");
                state.backlog.push_back(job_id);
            }
            Err(flume::TrySendError::Disconnected(_)) => {
                error!("Load queue disconnected");
            }
        }
    }

    fn refill(&self, state: &mut State) {
        while let Some(&job_id) = state.backlog.front() {
            match self.work_tx.try_send(job_id) {
                Ok(()) => {
                    state.backlog.pop_front();
                }
                Err(_) => break,
            }
        }
    }

    /// Claim a job for decoding. Returns `None` when it should be skipped.
    fn start_job(&self, worker_id: usize, job_id: JobId) -> Option<MediaKey> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        self.refill(state);

        let Some(job) = state.jobs.get_mut(&job_id) else {
            error!(worker_id, job_id, "Picked up a load job missing from the job table");
            return None;
        };

        let live = job.tickets.iter().any(|id| {
            state
                .tickets
                .get(id)
                .is_some_and(|r| r.state != TicketState::Cancelled)
        });

        if !live {
            trace!(worker_id, key = %job.key, "Skipping cancelled load");
            let key = job.key.clone();
            let tickets = std::mem::take(&mut job.tickets);
            state.jobs.remove(&job_id);
            if state.in_flight.get(&key) == Some(&job_id) {
                state.in_flight.remove(&key);
            }
            for id in tickets {
                state.tickets.remove(&id);
            }
            return None;
        }

        job.running = true;
        for id in &job.tickets {
            if let Some(record) = state.tickets.get_mut(id) {
                if record.state == TicketState::Pending {
                    record.state = TicketState::Running;
                }
            }
        }
        Some(job.key.clone())
    }

    fn run_job(&self, worker_id: usize, job_id: JobId) {
        let Some(key) = self.start_job(worker_id, job_id) else {
            return;
        };

        trace!(worker_id, %key, "Decoding");
        let stamp = SourceStamp::read(key.as_path());
        let outcome: Result<MediaEntry, DecodeError> = self
            .decoder
            .decode(key.as_path())
            .map(|decoded| MediaEntry::new(key.clone(), decoded, stamp));

        match &outcome {
            Ok(entry) => {
                // Oversized entries are still cached; the store already logged it.
                let _ = self.cache.put(entry.clone());
            }
            Err(e) => warn!(worker_id, %key, error = %e, "Failed to decode media"),
        }

        self.finish_job(worker_id, job_id, outcome);
    }

    fn finish_job(
        &self,
        worker_id: usize,
        job_id: JobId,
        outcome: Result<MediaEntry, DecodeError>,
    ) {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let Some(job) = state.jobs.remove(&job_id) else {
            error!(worker_id, job_id, "Finished a load job missing from the job table");
            return;
        };
        if state.in_flight.get(&job.key) == Some(&job_id) {
            state.in_flight.remove(&job.key);
        }

        // Sent under the state lock so a later job for the same key cannot
        // overtake these completions.
        for id in job.tickets {
            let Some(record) = state.tickets.remove(&id) else {
                error!(worker_id, ticket = %id, "Load ticket missing from the ticket table");
                continue;
            };
            if record.state == TicketState::Cancelled {
                trace!(ticket = %id, key = %record.key, "Dropping result for cancelled ticket");
                continue;
            }

            let completion = Completion {
                ticket: id,
                key: record.key,
                generation: record.generation,
                outcome: outcome.clone(),
            };
            if let Err(e) = self.completion_tx.try_send(completion) {
                debug!(worker_id, error = %e, "Completion receiver closed");
            }
        }
    }
}

fn worker_loop(worker_id: usize, rx: Receiver<JobId>, shared: Arc<Shared>) {
    debug!(worker_id, "Load worker started");

    loop {
        if shared.shutdown.load(Ordering::Relaxed) {
            break;
        }

        match rx.recv_timeout(Duration::from_millis(WORKER_POLL_MS)) {
            Ok(job_id) => {
                shared.active_workers.fetch_add(1, Ordering::Relaxed);
                shared.run_job(worker_id, job_id);
                shared.active_workers.fetch_sub(1, Ordering::Relaxed);
            }
            Err(flume::RecvTimeoutError::Timeout) => continue,
            Err(flume::RecvTimeoutError::Disconnected) => break,
        }
    }

    debug!(worker_id, "Load worker stopped");
}
