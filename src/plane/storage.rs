//! The storage worker and the outbound path.
//!
//! One background thread owns everything that talks to the remote table
//! store. Tasks flow in through the two queues; the worker admits them
//! against the read/write capacity limiters, submits them, and task
//! completions flow back to the command thread through the completion
//! queue.
//!
//! ## Worker loop
//!
//! 1. Drain mock-upstream entries whose latency has elapsed.
//! 2. If the RCU limiter permits, pop one read and submit it, prepaying
//!    1 RCU. The true cost is unknown until the response size is known;
//!    the prepayment stops the limiter from admitting a flood of reads
//!    before the first completion settles the bill.
//! 3. If the WCU limiter permits, pop one write and submit it, charging
//!    its full cost immediately (the size is known).
//! 4. If nothing happened, sleep `min(rcu_wait, wcu_wait, poll period)`.
//!
//! ## Mock upstream
//!
//! With `dynamo.mock` enabled, requests are answered locally after a
//! fixed latency, either from a loaded *image* (hashed key -> value size)
//! or by synthesizing a value from the deterministic key-value format.
//! Keys look like `K<offset>s<key_size><pad>L` and values like
//! `V<offset>s<val_size><pad>L`, so a synthesized value is checkable by
//! the load generator.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashMap;
use tracing::{debug, info};

use crate::error::FormatError;
use crate::ghost::gshash;
use crate::plane::config::{MOCK_DYNAMO_LATENCY_SEC, STORAGE_THREAD_POLL_FREQ_SEC};
use crate::plane::rate::{ConcurrentProgress, RateLimiter};
use crate::plane::task::{GetTask, SetTask, TaskQueue, TaskStatus};

/// Completion callback for an upstream read.
pub type GetCompletion = Box<dyn FnOnce(Result<String, String>) + Send>;
/// Completion callback for an upstream write.
pub type PutCompletion = Box<dyn FnOnce(Result<(), String>) + Send>;

/// The seam to the real remote table store.
///
/// Implementations submit asynchronously and may invoke the completion on
/// any thread. Completions must be cheap: they run on the client
/// library's threads and only settle task state.
pub trait RemoteStore: Send + Sync {
    fn get(&self, table: &str, key: &str, done: GetCompletion);
    fn put(&self, table: &str, key: &str, value: &str, done: PutCompletion);
}

/// A finished task on its way back to the command thread.
#[derive(Debug)]
pub enum DoneTask {
    Get(Arc<GetTask>),
    Set(Arc<SetTask>),
}

/// Queue of finished tasks plus the command thread's wakeup.
#[derive(Debug, Default)]
pub struct CompletionQueue {
    queue: Mutex<VecDeque<DoneTask>>,
    cv: Condvar,
}

impl CompletionQueue {
    pub fn push(&self, task: DoneTask) {
        self.queue.lock().push_back(task);
        self.cv.notify_one();
    }

    pub fn try_pop(&self) -> Option<DoneTask> {
        self.queue.lock().pop_front()
    }

    /// Blocks up to `timeout` for the next finished task.
    pub fn pop_wait(&self, timeout: Duration) -> Option<DoneTask> {
        let deadline = Instant::now() + timeout;
        let mut queue = self.queue.lock();
        loop {
            if let Some(task) = queue.pop_front() {
                return Some(task);
            }
            if self.cv.wait_until(&mut queue, deadline).timed_out() {
                return queue.pop_front();
            }
        }
    }
}

/// The deterministic mock key-value format.
///
/// Derived from `(key_size, val_size)`; the layout reserves three bytes
/// for the frame characters (`K`/`V`, `s`, `L`) and splits the rest
/// between a zero-padded offset, the zero-padded size, and filler.
#[derive(Debug, Clone, Copy)]
pub struct MockFormat {
    pub key_size: u32,
    pub val_size: u32,
    pub size_len: u32,
    pub offset_len: u32,
    pub k_pad_len: u32,
    pub v_pad_len: u32,
}

impl MockFormat {
    /// Computes the layout for the given sizes.
    ///
    /// # Errors
    ///
    /// Returns [`FormatError`] when the sizes cannot carry the frame,
    /// offset, and size fields.
    pub fn derive(key_size: u32, val_size: u32) -> Result<Self, FormatError> {
        let size_len = key_size
            .to_string()
            .len()
            .max(val_size.to_string().len()) as u32;
        let least_len_left = key_size.min(val_size) as i64 - 3 - i64::from(size_len);
        if least_len_left <= 0 {
            return Err(FormatError::new("least_len_left <= 0"));
        }
        let offset_len = least_len_left.min(10) as u32;
        let k_pad_len = key_size as i64 - 3 - i64::from(size_len) - i64::from(offset_len);
        let v_pad_len = val_size as i64 - 3 - i64::from(size_len) - i64::from(offset_len);
        if k_pad_len < 0 {
            return Err(FormatError::new("k_pad_len < 0"));
        }
        if v_pad_len < 0 {
            return Err(FormatError::new("v_pad_len < 0"));
        }
        Ok(Self {
            key_size,
            val_size,
            size_len,
            offset_len,
            k_pad_len: k_pad_len as u32,
            v_pad_len: v_pad_len as u32,
        })
    }

    /// Builds the key for `offset` under this format.
    pub fn make_key(&self, offset: u64) -> String {
        format!(
            "K{:0ow$}s{:0sw$}{}L",
            offset,
            self.key_size,
            "A".repeat(self.k_pad_len as usize),
            ow = self.offset_len as usize,
            sw = self.size_len as usize,
        )
    }

    /// Synthesizes the value for `key`.
    ///
    /// # Errors
    ///
    /// Returns [`FormatError`] when `key` does not match this format.
    pub fn make_val(&self, key: &str) -> Result<String, FormatError> {
        if key.len() != self.key_size as usize {
            return Err(FormatError::new(format!("key length mismatch: {key}")));
        }
        let bytes = key.as_bytes();
        if bytes[0] != b'K' {
            return Err(FormatError::new(format!(
                "leading char must be 'K': {key}"
            )));
        }
        let mut offset: u64 = 0;
        for &b in &bytes[1..] {
            if b == b's' {
                break;
            }
            if b.is_ascii_digit() {
                offset = offset * 10 + u64::from(b - b'0');
            } else {
                return Err(FormatError::new(format!(
                    "non-digit char found in offset: {key}"
                )));
            }
        }
        Ok(format!(
            "V{:0ow$}s{:0sw$}{}L",
            offset,
            self.val_size,
            "A".repeat(self.v_pad_len as usize),
            ow = self.offset_len as usize,
            sw = self.size_len as usize,
        ))
    }
}

/// Mock-upstream state shared between the config plane and the worker.
#[derive(Debug)]
pub struct MockState {
    enabled: AtomicBool,
    format: Mutex<MockFormat>,
    // hashed key -> value size; present once image mode was configured
    image: Mutex<Option<FxHashMap<u32, u32>>>,
    upstream_gets: AtomicU64,
    upstream_puts: AtomicU64,
}

impl MockState {
    fn new() -> Self {
        Self {
            enabled: AtomicBool::new(false),
            format: Mutex::new(MockFormat::derive(16, 500).expect("default format is valid")),
            image: Mutex::new(None),
            upstream_gets: AtomicU64::new(0),
            upstream_puts: AtomicU64::new(0),
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, v: bool) {
        self.enabled.store(v, Ordering::Relaxed);
    }

    pub fn format(&self) -> MockFormat {
        *self.format.lock()
    }

    pub fn set_format(&self, f: MockFormat) {
        *self.format.lock() = f;
    }

    /// Creates the image table if absent. Image mode persists until the
    /// instance is torn down; disabling the mock only stops serving it.
    pub fn init_image(&self) {
        let mut image = self.image.lock();
        if image.is_none() {
            *image = Some(FxHashMap::default());
        }
    }

    pub fn insert_image_entry(&self, key_hash: u32, val_size: u32) {
        let mut image = self.image.lock();
        image
            .as_mut()
            .expect("image initialized before load")
            .insert(key_hash, val_size);
    }

    pub fn has_image(&self) -> bool {
        self.image.lock().is_some()
    }

    /// Upstream reads served, for observability and tests.
    pub fn upstream_gets(&self) -> u64 {
        self.upstream_gets.load(Ordering::Relaxed)
    }

    /// Upstream writes served.
    pub fn upstream_puts(&self) -> u64 {
        self.upstream_puts.load(Ordering::Relaxed)
    }
}

/// State shared between the command thread, the worker, and completion
/// callbacks.
pub struct StorageShared {
    pub get_queue: TaskQueue<GetTask>,
    pub set_queue: TaskQueue<SetTask>,
    pub completions: CompletionQueue,
    pub rcu_limiter: RateLimiter<ConcurrentProgress>,
    pub wcu_limiter: RateLimiter<ConcurrentProgress>,
    pub mock: MockState,
    pub table: Mutex<String>,
    remote: Option<Arc<dyn RemoteStore>>,
    running: AtomicBool,
}

impl std::fmt::Debug for StorageShared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageShared")
            .field("get_queue_len", &self.get_queue.len())
            .field("set_queue_len", &self.set_queue.len())
            .field("mock_enabled", &self.mock.enabled())
            .finish_non_exhaustive()
    }
}

impl StorageShared {
    pub fn new(table: String, remote: Option<Arc<dyn RemoteStore>>) -> Self {
        Self {
            get_queue: TaskQueue::new(),
            set_queue: TaskQueue::new(),
            completions: CompletionQueue::default(),
            rcu_limiter: RateLimiter::new(1_000_000.0),
            wcu_limiter: RateLimiter::new(1_000_000.0),
            mock: MockState::new(),
            table: Mutex::new(table),
            remote,
            running: AtomicBool::new(true),
        }
    }

    /// Enqueues a read for the worker.
    pub fn get_async(&self, task: Arc<GetTask>) {
        self.get_queue.push(task);
    }

    /// Enqueues a write for the worker.
    pub fn set_async(&self, task: Arc<SetTask>) {
        self.set_queue.push(task);
    }
}

/// Owns the worker thread; joins it on drop.
#[derive(Debug)]
pub struct StorageWorker {
    shared: Arc<StorageShared>,
    handle: Option<JoinHandle<()>>,
}

impl StorageWorker {
    pub fn spawn(shared: Arc<StorageShared>) -> Self {
        let thread_shared = Arc::clone(&shared);
        let handle = std::thread::Builder::new()
            .name("hopperkv-storage".into())
            .spawn(move || worker_main(thread_shared))
            .expect("spawn storage worker");
        info!("storage worker started");
        Self {
            shared,
            handle: Some(handle),
        }
    }
}

impl Drop for StorageWorker {
    fn drop(&mut self) {
        self.shared.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        debug!("storage worker stopped");
    }
}

enum MockItem {
    Get(Arc<GetTask>),
    Set(Arc<SetTask>),
}

fn worker_main(shared: Arc<StorageShared>) {
    // latency-ordered because the latency is constant and the queue is
    // FIFO
    let mut mock_queue: VecDeque<(Instant, MockItem)> = VecDeque::new();

    while shared.running.load(Ordering::Relaxed) {
        let mut work_done = false;

        // mock completions are independent of the capacity limiters
        if shared.mock.enabled() {
            work_done = process_mock(&shared, &mut mock_queue);
        }

        let rcu_wait = shared.rcu_limiter.check_wait_time();
        let wcu_wait = shared.wcu_limiter.check_wait_time();

        if rcu_wait <= 0.0 {
            if let Some(task) = shared.get_queue.pop() {
                submit_get(&shared, &mut mock_queue, task);
                // the exact cost is settled at completion; prepay one unit
                // so the limiter sees the outstanding read
                shared.rcu_limiter.consume(1);
                work_done = true;
            }
        }
        if wcu_wait <= 0.0 {
            if let Some(task) = shared.set_queue.pop() {
                let cost = task.wcu_cost();
                submit_set(&shared, &mut mock_queue, task);
                shared.wcu_limiter.consume(cost);
                work_done = true;
            }
        }

        if !work_done {
            let mut sleep_for = STORAGE_THREAD_POLL_FREQ_SEC;
            if rcu_wait > 0.0 && wcu_wait > 0.0 {
                sleep_for = sleep_for.min(rcu_wait).min(wcu_wait);
            }
            std::thread::sleep(Duration::from_secs_f64(sleep_for));
        }
    }
}

fn submit_get(
    shared: &Arc<StorageShared>,
    mock_queue: &mut VecDeque<(Instant, MockItem)>,
    task: Arc<GetTask>,
) {
    if shared.mock.enabled() {
        let ready = Instant::now() + Duration::from_secs_f64(MOCK_DYNAMO_LATENCY_SEC);
        mock_queue.push_back((ready, MockItem::Get(task)));
        return;
    }

    let Some(remote) = shared.remote.as_ref() else {
        task.complete(TaskStatus::Err, "no upstream storage configured".into());
        shared.completions.push(DoneTask::Get(task));
        return;
    };

    let table = shared.table.lock().clone();
    let cb_shared = Arc::clone(shared);
    let cb_task = Arc::clone(&task);
    remote.get(
        &table,
        &task.key,
        Box::new(move |result| {
            match result {
                Ok(value) => {
                    cb_task.complete(TaskStatus::Ok, value);
                    // settle the true cost; one unit was prepaid
                    cb_shared.rcu_limiter.consume(cb_task.rcu_cost() - 1);
                }
                Err(err) => {
                    // the prepaid unit is still charged on failure
                    cb_task.complete(TaskStatus::Err, err);
                }
            }
            cb_shared.completions.push(DoneTask::Get(cb_task));
        }),
    );
}

fn submit_set(
    shared: &Arc<StorageShared>,
    mock_queue: &mut VecDeque<(Instant, MockItem)>,
    task: Arc<SetTask>,
) {
    if shared.mock.enabled() {
        let ready = Instant::now() + Duration::from_secs_f64(MOCK_DYNAMO_LATENCY_SEC);
        mock_queue.push_back((ready, MockItem::Set(task)));
        return;
    }

    let Some(remote) = shared.remote.as_ref() else {
        task.complete(TaskStatus::Err, "no upstream storage configured".into());
        shared.completions.push(DoneTask::Set(task));
        return;
    };

    let table = shared.table.lock().clone();
    let cb_shared = Arc::clone(shared);
    let cb_task = Arc::clone(&task);
    remote.put(
        &table,
        &task.key,
        &task.value,
        Box::new(move |result| {
            match result {
                // WCU already charged at submission
                Ok(()) => cb_task.complete(TaskStatus::Ok, String::new()),
                Err(err) => cb_task.complete(TaskStatus::Err, err),
            }
            cb_shared.completions.push(DoneTask::Set(cb_task));
        }),
    );
}

// Completes one due mock entry, if any. Returns whether work happened.
fn process_mock(
    shared: &Arc<StorageShared>,
    mock_queue: &mut VecDeque<(Instant, MockItem)>,
) -> bool {
    let Some((ready, _)) = mock_queue.front() else {
        return false;
    };
    if Instant::now() < *ready {
        return false;
    }
    let (_, item) = mock_queue.pop_front().unwrap();

    match item {
        MockItem::Get(task) => {
            shared.mock.upstream_gets.fetch_add(1, Ordering::Relaxed);
            let image = shared.mock.image.lock();
            let outcome = if let Some(image) = image.as_ref() {
                match image.get(&gshash(task.key.as_bytes())) {
                    Some(&val_size) => Ok("v".repeat(val_size as usize)),
                    None => Err("key not found in image".to_string()),
                }
            } else {
                shared
                    .mock
                    .format()
                    .make_val(&task.key)
                    .map_err(|e| e.to_string())
            };
            drop(image);
            match outcome {
                Ok(value) => {
                    task.complete(TaskStatus::Ok, value);
                    shared.rcu_limiter.consume(task.rcu_cost() - 1);
                }
                Err(err) => task.complete(TaskStatus::Err, err),
            }
            shared.completions.push(DoneTask::Get(task));
        }
        MockItem::Set(task) => {
            shared.mock.upstream_puts.fetch_add(1, Ordering::Relaxed);
            let mut image = shared.mock.image.lock();
            if let Some(image) = image.as_mut() {
                image.insert(gshash(task.key.as_bytes()), task.value.len() as u32);
            }
            drop(image);
            task.complete(TaskStatus::Ok, String::new());
            shared.completions.push(DoneTask::Set(task));
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_format_layout() {
        let f = MockFormat::derive(16, 500).unwrap();
        assert_eq!(f.size_len, 3);
        assert_eq!(f.offset_len, 10);
        assert_eq!(f.k_pad_len, 0);
        assert_eq!(f.v_pad_len, 484);
    }

    #[test]
    fn format_rejects_tiny_sizes() {
        assert!(MockFormat::derive(4, 500).is_err());
        assert!(MockFormat::derive(16, 4).is_err());
    }

    #[test]
    fn key_and_value_round_trip() {
        let f = MockFormat::derive(8, 16).unwrap();
        let key = f.make_key(1);
        assert_eq!(key, "K001s08L");
        assert_eq!(key.len(), 8);

        let val = f.make_val(&key).unwrap();
        assert_eq!(val.len(), 16);
        assert!(val.starts_with("V001s16"));
        assert!(val.ends_with('L'));
    }

    #[test]
    fn make_val_rejects_malformed_keys() {
        let f = MockFormat::derive(8, 16).unwrap();
        assert!(f.make_val("too long key!").is_err());
        assert!(f.make_val("X001s08L").is_err());
        assert!(f.make_val("Kxx1s08L").is_err());
    }

    #[test]
    fn worker_serves_mock_get() {
        let shared = Arc::new(StorageShared::new("t".into(), None));
        shared.mock.set_enabled(true);
        shared.mock.set_format(MockFormat::derive(8, 16).unwrap());
        let _worker = StorageWorker::spawn(Arc::clone(&shared));

        let key = shared.mock.format().make_key(7);
        let task = Arc::new(GetTask::new(key, crate::plane::client::ClientHandle::new()));
        shared.get_async(Arc::clone(&task));

        let done = shared
            .completions
            .pop_wait(Duration::from_secs(2))
            .expect("mock completion");
        match done {
            DoneTask::Get(t) => {
                let result = t.result.lock();
                assert_eq!(result.status, TaskStatus::Ok);
                assert!(result.value.starts_with("V"));
            }
            DoneTask::Set(_) => panic!("unexpected set completion"),
        }
        assert_eq!(shared.mock.upstream_gets(), 1);
    }

    #[test]
    fn worker_without_backend_fails_tasks() {
        let shared = Arc::new(StorageShared::new("t".into(), None));
        let _worker = StorageWorker::spawn(Arc::clone(&shared));

        let task = Arc::new(GetTask::new(
            "k".into(),
            crate::plane::client::ClientHandle::new(),
        ));
        shared.get_async(task);

        let done = shared
            .completions
            .pop_wait(Duration::from_secs(2))
            .expect("failure completion");
        match done {
            DoneTask::Get(t) => {
                assert_eq!(t.result.lock().status, TaskStatus::Err);
            }
            DoneTask::Set(_) => panic!("unexpected set completion"),
        }
    }

    #[test]
    fn image_mode_overrides_format() {
        let shared = Arc::new(StorageShared::new("t".into(), None));
        shared.mock.set_enabled(true);
        shared.mock.init_image();
        shared
            .mock
            .insert_image_entry(gshash(b"imaged-key"), 12);
        let _worker = StorageWorker::spawn(Arc::clone(&shared));

        let task = Arc::new(GetTask::new(
            "imaged-key".into(),
            crate::plane::client::ClientHandle::new(),
        ));
        shared.get_async(task);

        let done = shared
            .completions
            .pop_wait(Duration::from_secs(2))
            .expect("completion");
        match done {
            DoneTask::Get(t) => {
                let result = t.result.lock();
                assert_eq!(result.status, TaskStatus::Ok);
                assert_eq!(result.value, "v".repeat(12));
            }
            DoneTask::Set(_) => panic!("unexpected set completion"),
        }
    }
}
