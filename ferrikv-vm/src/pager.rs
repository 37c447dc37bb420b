use crate::bitmap::PageBitmap;
use crate::jobs::{Job, JobKind, JobOutcome, JobQueues};
use ferrikv_core::{Bytes, Entry, Keyspace, Object, ObjectRef, Storage, SwapDescriptor, SwappedKind};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::rc::Rc;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

/// Default fixed page size (spec §4.12: "default 256 bytes").
pub const DEFAULT_PAGE_SIZE: usize = 256;

/// Key identity as seen by the pager's bookkeeping maps.
type KeyId = (usize, Bytes);

/// The virtual-memory pager: a fixed-size-page swap file, its free-page
/// bitmap, a pool of IO worker threads draining `JobQueues`, and the
/// completion channel (a `mio::Waker`, the cross-platform equivalent of
/// the historical self-pipe trick) the main loop polls alongside its
/// client sockets (spec §4.12).
pub struct Pager {
    page_size: usize,
    compress: bool,
    bitmap: Mutex<PageBitmap>,
    swapfile: Arc<Mutex<File>>,
    queues: Arc<JobQueues>,
    pending_allocations: Mutex<HashMap<KeyId, (usize, usize)>>,
    workers: Vec<JoinHandle<()>>,
}

impl Pager {
    pub fn open(
        swap_path: &Path,
        page_count: usize,
        page_size: usize,
        worker_threads: usize,
        compress: bool,
        waker: Arc<mio::Waker>,
    ) -> io::Result<Pager> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(swap_path)?;
        file.set_len((page_count * page_size) as u64)?;

        let queues = Arc::new(JobQueues::new());
        let swapfile = Arc::new(Mutex::new(file));

        let mut workers = Vec::with_capacity(worker_threads);
        for _ in 0..worker_threads.max(1) {
            let queues = Arc::clone(&queues);
            let swapfile = Arc::clone(&swapfile);
            let waker = Arc::clone(&waker);
            workers.push(std::thread::spawn(move || worker_loop(queues, swapfile, page_size, compress, waker)));
        }

        Ok(Pager {
            page_size,
            compress,
            bitmap: Mutex::new(PageBitmap::new(page_count)),
            swapfile,
            queues,
            pending_allocations: Mutex::new(HashMap::new()),
            workers,
        })
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Initiates a threaded swap-out for `key`: unshares the object if it's
    /// still referenced elsewhere, flips it to `Swapping`, and hands a
    /// deep-cloned copy of its payload to a worker (spec §4.12).
    pub fn begin_swap_out(&self, keyspace: &mut Keyspace, db: usize, key: &[u8]) -> bool {
        let db_ref = keyspace.db_mut(db);
        let entry = match db_ref.entries.get(key) {
            Some(Entry::Resident(obj)) => Rc::clone(obj),
            _ => return false,
        };

        if entry.borrow().storage != Storage::Memory {
            return false;
        }

        let obj = if Rc::strong_count(&entry) > 1 {
            let cloned = entry.borrow().clone();
            let fresh: ObjectRef = Rc::new(RefCell::new(cloned));
            db_ref.entries.insert(key.to_vec(), Entry::Resident(Rc::clone(&fresh)));
            fresh
        } else {
            entry
        };

        let data = {
            let mut guard = obj.borrow_mut();
            guard.storage = Storage::Swapping;
            guard.data.clone()
        };

        self.queues.submit(Job {
            db,
            key: key.to_vec(),
            kind: JobKind::PrepareSwap { data },
        });
        true
    }

    /// Drains up to `limit` pager completions and applies them to
    /// `keyspace`: `Prepared` results get pages allocated and a follow-up
    /// `DoSwap` job; `Written` results finally replace the resident entry
    /// with a `Swapped` descriptor (spec §4.12).
    pub fn apply_completions(&self, keyspace: &mut Keyspace, limit: usize) -> usize {
        let results = self.queues.drain_processed(limit);
        let applied = results.len();

        for result in results {
            match result.outcome {
                JobOutcome::Canceled => {
                    self.pending_allocations.lock().unwrap().remove(&(result.db, result.key));
                }
                JobOutcome::Prepared { page_count, data } => {
                    let page = self.bitmap.lock().unwrap().allocate(page_count);
                    match page {
                        Some(page) => {
                            self.pending_allocations
                                .lock()
                                .unwrap()
                                .insert((result.db, result.key.clone()), (page, page_count));
                            self.queues.submit(Job {
                                db: result.db,
                                key: result.key,
                                kind: JobKind::DoSwap { data, page, page_count },
                            });
                        }
                        None => {
                            // No room on the swap file: abandon this swap-out and
                            // leave the key resident.
                            if let Some(Entry::Resident(obj)) = keyspace.db_mut(result.db).entries.get(&result.key) {
                                obj.borrow_mut().storage = Storage::Memory;
                            }
                        }
                    }
                }
                JobOutcome::Written { page, page_count, swapped_kind } => {
                    self.pending_allocations.lock().unwrap().remove(&(result.db, result.key.clone()));
                    let db_ref = keyspace.db_mut(result.db);
                    let last_access = db_ref
                        .entries
                        .get(&result.key)
                        .and_then(|e| e.as_resident())
                        .map(|obj| obj.borrow().last_access)
                        .unwrap_or(0);
                    db_ref.entries.insert(
                        result.key,
                        Entry::Swapped(SwapDescriptor {
                            page,
                            page_count,
                            last_access,
                            swapped_kind,
                        }),
                    );
                }
            }
        }

        applied
    }

    /// Cancels an in-flight swap-out for a key that's about to be read or
    /// written while still `Swapping` (spec §4.12 swap-in path): sweeps
    /// the job queues and, if pages were already allocated for it, frees
    /// them. Busy-waits in bounded, small increments while the job is
    /// still `processing` on a worker.
    pub fn cancel_if_swapping(&self, keyspace: &mut Keyspace, db: usize, key: &[u8]) {
        let is_swapping = matches!(
            keyspace.db(db).entries.get(key),
            Some(Entry::Resident(obj)) if obj.borrow().storage == Storage::Swapping
        );
        if !is_swapping {
            return;
        }

        for _ in 0..1000 {
            if !self.queues.cancel(db, key) {
                break;
            }
            std::thread::sleep(Duration::from_millis(1));
        }

        if let Some((page, page_count)) = self.pending_allocations.lock().unwrap().remove(&(db, key.to_vec())) {
            self.bitmap.lock().unwrap().free(page, page_count);
        }

        if let Some(Entry::Resident(obj)) = keyspace.db_mut(db).entries.get(key) {
            obj.borrow_mut().storage = Storage::Memory;
        }
    }

    /// Swaps a key back into memory synchronously: swap-in is always
    /// performed inline on the main thread since the caller is blocked on
    /// the result regardless (spec §4.12 "Swap-in: on read of a SWAPPED
    /// key, seek and deserialize, transition to MEMORY, free pages").
    pub fn swap_in(&self, keyspace: &mut Keyspace, db: usize, key: &[u8], now: u64) -> Result<bool, crate::PagerError> {
        let descriptor = match keyspace.db(db).entries.get(key) {
            Some(Entry::Swapped(descriptor)) => *descriptor,
            _ => return Ok(false),
        };

        let mut buf = vec![0u8; descriptor.page_count * self.page_size];
        {
            let mut file = self.swapfile.lock().unwrap();
            file.seek(SeekFrom::Start((descriptor.page * self.page_size) as u64))?;
            file.read_exact(&mut buf)?;
        }
        let data = ferrikv_persist::decode_object(&buf)?;

        self.bitmap.lock().unwrap().free(descriptor.page, descriptor.page_count);

        let mut object = Object::new(data, now);
        object.last_access = now;
        keyspace
            .db_mut(db)
            .entries
            .insert(key.to_vec(), Entry::resident(object));
        Ok(true)
    }

    /// The synchronous, non-threaded fallback path (`vm_max_threads == 0`):
    /// does the whole serialize/allocate/write/retire sequence inline on
    /// the calling thread (spec §4.12 "In blocking mode...").
    pub fn swap_out_blocking(&self, keyspace: &mut Keyspace, db: usize, key: &[u8]) -> Result<bool, crate::PagerError> {
        let db_ref = keyspace.db_mut(db);
        let entry = match db_ref.entries.get(key) {
            Some(Entry::Resident(obj)) if obj.borrow().storage == Storage::Memory => Rc::clone(obj),
            _ => return Ok(false),
        };

        let data = entry.borrow().data.clone();
        let encoded = ferrikv_persist::encode_object(&data, self.compress)?;
        let page_count = encoded.len().div_ceil(self.page_size).max(1);

        let page = self
            .bitmap
            .lock()
            .unwrap()
            .allocate(page_count)
            .ok_or(crate::PagerError::SwapFileFull)?;

        {
            let mut file = self.swapfile.lock().unwrap();
            file.seek(SeekFrom::Start((page * self.page_size) as u64))?;
            file.write_all(&encoded)?;
        }

        let last_access = entry.borrow().last_access;
        let swapped_kind = SwappedKind::from(&data);
        keyspace.db_mut(db).entries.insert(
            key.to_vec(),
            Entry::Swapped(SwapDescriptor {
                page,
                page_count,
                last_access,
                swapped_kind,
            }),
        );
        Ok(true)
    }

    pub fn shutdown(self) {
        self.queues.shutdown();
        for worker in self.workers {
            let _ = worker.join();
        }
    }
}

fn worker_loop(queues: Arc<JobQueues>, swapfile: Arc<Mutex<File>>, page_size: usize, compress: bool, waker: Arc<mio::Waker>) {
    while let Some(job) = queues.take_for_processing() {
        match job.kind {
            JobKind::PrepareSwap { data } => {
                let page_count = ferrikv_persist::encode_object(&data, compress)
                    .map(|bytes| bytes.len().div_ceil(page_size).max(1))
                    .unwrap_or(1);
                queues.complete(job.db, &job.key, JobOutcome::Prepared { page_count, data });
            }
            JobKind::DoSwap { data, page, page_count } => {
                let swapped_kind = SwappedKind::from(&data);
                if let Ok(encoded) = ferrikv_persist::encode_object(&data, compress) {
                    let mut file = swapfile.lock().unwrap();
                    let _ = file.seek(SeekFrom::Start((page * page_size) as u64));
                    let _ = file.write_all(&encoded);
                }
                queues.complete(job.db, &job.key, JobOutcome::Written { page, page_count, swapped_kind });
            }
        }
        let _ = waker.wake();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferrikv_core::{StrValue, ValueData};
    use mio::{Poll, Waker};

    fn new_waker() -> (Poll, Arc<Waker>) {
        let poll = Poll::new().unwrap();
        let waker = Arc::new(Waker::new(poll.registry(), mio::Token(0)).unwrap());
        (poll, waker)
    }

    /// A throwaway swap file path under the OS temp dir, unique per test
    /// via the monotonic `Instant` the call is made at, cleaned up on drop.
    struct ScratchFile(std::path::PathBuf);

    impl ScratchFile {
        fn new(tag: &str) -> ScratchFile {
            let unique = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos();
            let path = std::env::temp_dir().join(format!("ferrikv-vm-test-{}-{}-{}.swap", tag, std::process::id(), unique));
            ScratchFile(path)
        }

        fn path(&self) -> &std::path::Path {
            &self.0
        }
    }

    impl Drop for ScratchFile {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.0);
        }
    }

    #[test]
    fn blocking_swap_out_and_swap_in_round_trip() {
        let tmp = ScratchFile::new("blocking");
        let (_poll, waker) = new_waker();
        let pager = Pager::open(tmp.path(), 64, DEFAULT_PAGE_SIZE, 1, false, waker).unwrap();

        let mut keyspace = Keyspace::new(1);
        keyspace.db_mut(0).set(
            b"k".to_vec(),
            Entry::resident(Object::new(ValueData::Str(StrValue::Raw(b"payload".to_vec())), 0)),
        );

        assert!(pager.swap_out_blocking(&mut keyspace, 0, b"k").unwrap());
        assert!(matches!(keyspace.db(0).entries.get(b"k".as_slice()), Some(Entry::Swapped(_))));

        assert!(pager.swap_in(&mut keyspace, 0, b"k", 42).unwrap());
        match keyspace.db(0).entries.get(b"k".as_slice()) {
            Some(Entry::Resident(obj)) => match &obj.borrow().data {
                ValueData::Str(s) => assert_eq!(s.as_bytes(), b"payload".to_vec()),
                other => panic!("expected string, got {:?}", other),
            },
            other => panic!("expected resident entry after swap-in, got {:?}", other.is_some()),
        }
    }

    #[test]
    fn threaded_swap_out_eventually_produces_a_swapped_entry() {
        let tmp = ScratchFile::new("threaded");
        let (_poll, waker) = new_waker();
        let pager = Pager::open(tmp.path(), 64, DEFAULT_PAGE_SIZE, 2, false, waker).unwrap();

        let mut keyspace = Keyspace::new(1);
        keyspace.db_mut(0).set(
            b"k".to_vec(),
            Entry::resident(Object::new(ValueData::Str(StrValue::Raw(b"threaded".to_vec())), 0)),
        );

        assert!(pager.begin_swap_out(&mut keyspace, 0, b"k"));
        assert!(matches!(
            keyspace.db(0).entries.get(b"k".as_slice()),
            Some(Entry::Resident(obj)) if obj.borrow().storage == Storage::Swapping
        ));

        let mut swapped = false;
        for _ in 0..200 {
            pager.apply_completions(&mut keyspace, 10);
            if matches!(keyspace.db(0).entries.get(b"k".as_slice()), Some(Entry::Swapped(_))) {
                swapped = true;
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(swapped, "expected key to reach Swapped state");
    }
}
