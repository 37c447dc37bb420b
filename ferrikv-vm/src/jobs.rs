use ferrikv_core::{Bytes, SwappedKind, ValueData};
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

/// One unit of pager work (spec §4.12). `PrepareSwap` carries an
/// already-unshared, owned copy of the value -- the main thread deep
/// clones it off the keyspace first if its refcount was greater than one,
/// since only plain owned data, never the `Rc`-based live object, crosses
/// the worker-thread boundary.
pub enum JobKind {
    PrepareSwap { data: ValueData },
    DoSwap { data: ValueData, page: usize, page_count: usize },
}

pub struct Job {
    pub db: usize,
    pub key: Bytes,
    pub kind: JobKind,
}

/// What a worker reports back after finishing a job.
pub enum JobOutcome {
    Prepared { page_count: usize, data: ValueData },
    Written { page: usize, page_count: usize, swapped_kind: SwappedKind },
    Canceled,
}

pub struct JobResult {
    pub db: usize,
    pub key: Bytes,
    pub outcome: JobOutcome,
}

/// Identity-only record of a job currently being worked on; kept separate
/// from `Job` itself so the "processing" queue never needs to own (or
/// clone) the payload, only enough to answer "is `key` in flight" during
/// a cancellation sweep.
struct InFlight {
    db: usize,
    key: Bytes,
}

/// The three locked job queues from spec §4.12 ("new/processing/processed"),
/// plus the condvar a worker blocks on while `new` is empty.
pub struct JobQueues {
    new: Mutex<VecDeque<Job>>,
    new_ready: Condvar,
    processing: Mutex<Vec<InFlight>>,
    processed: Mutex<VecDeque<JobResult>>,
    shutdown: Mutex<bool>,
}

impl Default for JobQueues {
    fn default() -> JobQueues {
        JobQueues {
            new: Mutex::new(VecDeque::new()),
            new_ready: Condvar::new(),
            processing: Mutex::new(Vec::new()),
            processed: Mutex::new(VecDeque::new()),
            shutdown: Mutex::new(false),
        }
    }
}

impl JobQueues {
    pub fn new() -> JobQueues {
        JobQueues::default()
    }

    pub fn submit(&self, job: Job) {
        self.new.lock().unwrap().push_back(job);
        self.new_ready.notify_one();
    }

    /// Blocks until a job is available or the queue is shut down, moving
    /// the job's identity into `processing` before handing the job itself
    /// to the caller -- so a concurrent cancellation sweep always finds
    /// `key` in exactly one queue.
    pub fn take_for_processing(&self) -> Option<Job> {
        let mut guard = self.new.lock().unwrap();
        loop {
            if let Some(job) = guard.pop_front() {
                self.processing.lock().unwrap().push(InFlight {
                    db: job.db,
                    key: job.key.clone(),
                });
                return Some(job);
            }
            if *self.shutdown.lock().unwrap() {
                return None;
            }
            guard = self.new_ready.wait(guard).unwrap();
        }
    }

    pub fn complete(&self, db: usize, key: &[u8], outcome: JobOutcome) {
        self.processing
            .lock()
            .unwrap()
            .retain(|job| !(job.db == db && job.key == key));
        self.processed.lock().unwrap().push_back(JobResult {
            db,
            key: key.to_vec(),
            outcome,
        });
    }

    /// Drains up to `limit` completed results for the main thread to apply
    /// (spec §4.12: "drains up to max(1, 1% of processed) completions per
    /// call").
    pub fn drain_processed(&self, limit: usize) -> Vec<JobResult> {
        let mut guard = self.processed.lock().unwrap();
        let take = limit.max(1).min(guard.len());
        guard.drain(..take).collect()
    }

    pub fn processed_len(&self) -> usize {
        self.processed.lock().unwrap().len()
    }

    /// Cancels in-flight work for `key` (spec §4.12 swap-in path): removes
    /// it from `new` outright and flags it in `processed` so the main
    /// thread discards the result instead of applying it. Returns `true`
    /// if `key` is currently in `processing` -- the caller should sleep
    /// briefly and retry the cancellation sweep until this goes `false`.
    pub fn cancel(&self, db: usize, key: &[u8]) -> bool {
        self.new.lock().unwrap().retain(|job| !(job.db == db && job.key == key));

        for result in self.processed.lock().unwrap().iter_mut() {
            if result.db == db && result.key == key {
                result.outcome = JobOutcome::Canceled;
            }
        }

        self.processing
            .lock()
            .unwrap()
            .iter()
            .any(|job| job.db == db && job.key == key)
    }

    pub fn shutdown(&self) {
        *self.shutdown.lock().unwrap() = true;
        self.new_ready.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferrikv_core::StrValue;

    fn job(db: usize, key: &[u8]) -> Job {
        Job {
            db,
            key: key.to_vec(),
            kind: JobKind::PrepareSwap {
                data: ValueData::Str(StrValue::Raw(b"v".to_vec())),
            },
        }
    }

    #[test]
    fn submit_and_take_round_trips_and_marks_processing() {
        let queues = JobQueues::new();
        queues.submit(job(0, b"k"));
        let taken = queues.take_for_processing().unwrap();
        assert_eq!(taken.key, b"k".to_vec());
    }

    #[test]
    fn complete_removes_from_processing_and_adds_to_processed() {
        let queues = JobQueues::new();
        queues.submit(job(0, b"k"));
        queues.take_for_processing().unwrap();
        queues.complete(
            0,
            b"k",
            JobOutcome::Prepared {
                page_count: 1,
                data: ValueData::Hash(Default::default()),
            },
        );
        assert_eq!(queues.processed_len(), 1);
        assert!(!queues.cancel(0, b"k")); // no longer in processing
    }

    #[test]
    fn cancel_removes_queued_job_outright() {
        let queues = JobQueues::new();
        queues.submit(job(0, b"k"));
        let still_processing = queues.cancel(0, b"k");
        assert!(!still_processing);
        assert!(queues.new.lock().unwrap().is_empty());
    }

    #[test]
    fn cancel_while_processing_reports_still_in_flight() {
        let queues = JobQueues::new();
        queues.submit(job(0, b"k"));
        queues.take_for_processing().unwrap();
        assert!(queues.cancel(0, b"k"));
    }

    #[test]
    fn shutdown_wakes_a_blocked_worker_with_none() {
        let queues = std::sync::Arc::new(JobQueues::new());
        let worker_queues = queues.clone();
        let handle = std::thread::spawn(move || worker_queues.take_for_processing());
        // Give the worker a moment to start blocking, then shut down.
        std::thread::sleep(std::time::Duration::from_millis(20));
        queues.shutdown();
        assert!(handle.join().unwrap().is_none());
    }
}
