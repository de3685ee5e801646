//! The per-tenant cache instance.
//!
//! `Instance` concentrates all command-thread state: the real cache, the
//! ghost cache, the inflight registry, statistics, configuration, the
//! egress limiter, and the barrier. Everything here is `&mut self` on one
//! thread; the only cross-thread traffic is task hand-off to the storage
//! worker and the completion queue flowing back.
//!
//! ## Read path
//!
//! ```text
//!   GET key
//!     ├─ hit:  ghost access, stats, egress throttle, reply
//!     └─ miss: ghost access (size 0)
//!          ├─ inflight?  register as dependent, block
//!          └─ else       begin inflight, enqueue Get task, block
//!
//!   pump() on Get completion:
//!     end_inflight ──► permitted? install value, update ghost size
//!     reply to the primary, wake dependents with value copies
//!     stats + egress throttle
//! ```
//!
//! A SET on a key with an outstanding GET overwrites the cache and
//! invalidates the inflight entry; the fetch still completes and wakes
//! its dependents with the (possibly stale) fetched value, but leaves the
//! cache alone. Eventual consistency, by contract.
//!
//! Egress throttling is a synchronous sleep on the command thread. That
//! is deliberate single-tenant back-pressure: one instance serves one
//! tenant, so stalling the command loop throttles exactly the tenant
//! that overran its bandwidth.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::error::CkptError;
use crate::ghost::{ckpt, mem_estimate, round_tick, AccessMode, SampledGhostCache};
use crate::plane::barrier::Barrier;
use crate::plane::cache::CacheStore;
use crate::plane::client::{ClientHandle, Reply};
use crate::plane::config::{heuristic, Config};
use crate::plane::inflight::InflightRegistry;
use crate::plane::rate::{RateLimiter, SingleThreadProgress};
use crate::plane::stats::{
    kv_to_net_get_client, kv_to_net_get_storage, kv_to_net_set_client, kv_to_net_set_storage,
    MemStats, Stats,
};
use crate::plane::storage::{
    DoneTask, MockFormat, RemoteStore, StorageShared, StorageWorker,
};
use crate::plane::task::{GetTask, SetTask, TaskStatus};

// startup allocation reported in memory stats; a stand-in for what a
// full server process would measure before any key lands
const STARTUP_ALLOCATED: u64 = 0;

/// Construction options for an [`Instance`].
pub struct InstanceOptions {
    /// Cache byte budget.
    pub cache_capacity_bytes: u64,
    /// Ghost checkpoint location.
    pub ckpt_path: PathBuf,
    /// Whether the allocator governs total bandwidth (client + storage
    /// legs). Fixed for the instance lifetime.
    pub alloc_total_net_bw: bool,
    /// The real upstream store, if any. Tests and warmup runs use the
    /// mock instead.
    pub remote: Option<Arc<dyn RemoteStore>>,
}

impl Default for InstanceOptions {
    fn default() -> Self {
        Self {
            cache_capacity_bytes: 64 * 1024 * 1024,
            ckpt_path: PathBuf::from("dump.ghc"),
            alloc_total_net_bw: true,
            remote: None,
        }
    }
}

impl std::fmt::Debug for InstanceOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceOptions")
            .field("cache_capacity_bytes", &self.cache_capacity_bytes)
            .field("ckpt_path", &self.ckpt_path)
            .field("alloc_total_net_bw", &self.alloc_total_net_bw)
            .field("has_remote", &self.remote.is_some())
            .finish()
    }
}

// allocation caps last applied through RESRC.SET
#[derive(Debug, Default, Clone, Copy)]
struct AllocatedResrc {
    cache_size: u64,
    db_rcu: f64,
    db_wcu: f64,
    net_bw: f64,
}

/// A single-tenant cache instance.
#[derive(Debug)]
pub struct Instance {
    config: Config,
    cache: CacheStore,
    ghost: SampledGhostCache,
    inflight: InflightRegistry,
    stats: Stats,
    net_limiter: RateLimiter<SingleThreadProgress>,
    barrier: Barrier,
    shared: Arc<StorageShared>,
    // joins the worker on drop; field order keeps it alive while shared
    // state exists
    _worker: StorageWorker,
    allocated: AllocatedResrc,
    ckpt_path: PathBuf,
}

impl Instance {
    /// Builds an instance and starts its storage worker.
    ///
    /// A ghost checkpoint at the configured path is loaded best-effort: a
    /// missing file is fine, an incompatible one aborts initialization.
    ///
    /// # Errors
    ///
    /// Returns [`CkptError::Incompatible`] for a checkpoint produced by a
    /// different build.
    pub fn new(opts: InstanceOptions) -> Result<Self, CkptError> {
        let mut config = Config::default();
        config.alloc_total_net_bw = opts.alloc_total_net_bw;

        let mut ghost =
            SampledGhostCache::new(config.ghost_tick, config.ghost_min_tick, config.ghost_max_tick);
        load_ckpt_best_effort(&mut ghost, &opts.ckpt_path)?;

        let shared = Arc::new(StorageShared::new(config.dynamo_table.clone(), opts.remote));
        let worker = StorageWorker::spawn(Arc::clone(&shared));

        Ok(Self {
            config,
            cache: CacheStore::new(opts.cache_capacity_bytes),
            ghost,
            inflight: InflightRegistry::new(),
            stats: Stats::new(),
            net_limiter: RateLimiter::new(1_000_000_000.0),
            barrier: Barrier::new(),
            shared,
            _worker: worker,
            allocated: AllocatedResrc::default(),
            ckpt_path: opts.ckpt_path,
        })
    }

    /// Read-only view of the configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Instance statistics.
    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    /// The cache store, for inspection.
    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    /// Upstream reads actually issued (mock mode), for observability.
    pub fn upstream_gets(&self) -> u64 {
        self.shared.mock.upstream_gets()
    }

    // -- request pipeline ---------------------------------------------------

    /// Read-through GET. The handle resolves immediately on a hit, or
    /// when the upstream fetch completes (see [`pump`](Self::pump)).
    pub fn get(&mut self, key: &str) -> ClientHandle {
        let client = ClientHandle::new();

        if let Some(value) = self.cache.get(key) {
            self.ghost
                .access(key.as_bytes(), mem_estimate::estimate(key.len(), value.len()), AccessMode::Default);
            self.stats.record_get_done(
                key.len(),
                value.len(),
                false,
                self.config.alloc_total_net_bw,
            );
            self.wait_until_can_send();
            self.net_limiter
                .consume(kv_to_net_get_client(key.len(), value.len()));
            client.resolve(Reply::Bulk(value));
            return client;
        }

        // the true size is unknown until the fetch returns; the
        // completion fixes the ghost entry up
        self.ghost.access(
            key.as_bytes(),
            mem_estimate::estimate(key.len(), 0),
            AccessMode::Default,
        );

        if self.inflight.check_inflight(key) {
            // coalesce with the outstanding fetch
            self.inflight.add_dependent(key, client.clone());
        } else {
            let task = Arc::new(GetTask::new(key.to_string(), client.clone()));
            self.inflight
                .begin_inflight(key.to_string(), Arc::clone(&task));
            self.shared.get_async(task);
        }
        client
    }

    /// Write-through SET. The cache is updated (or the slot admitted)
    /// before the write is queued, and any outstanding fetch for the key
    /// is invalidated so it cannot clobber the newer value.
    pub fn set(&mut self, key: &str, value: &str) -> ClientHandle {
        if self.cache.contains(key) {
            self.cache.insert(key, value, self.config.admit_write);
            self.inflight.invalidate_inflight(key);
        } else if self.config.admit_write {
            self.cache.insert(key, value, true);
            self.inflight.invalidate_inflight(key);
        }

        let client = ClientHandle::new();
        let task = Arc::new(SetTask::new(
            key.to_string(),
            value.to_string(),
            client.clone(),
        ));

        self.ghost.access(
            key.as_bytes(),
            mem_estimate::estimate(key.len(), value.len()),
            AccessMode::Noop,
        );
        self.stats
            .record_set_done(key.len(), value.len(), self.config.alloc_total_net_bw, self.config.admit_write);

        self.wait_until_can_send();
        let mut net = kv_to_net_set_client(key.len(), value.len());
        if self.config.alloc_total_net_bw {
            net += kv_to_net_set_storage(key.len(), value.len());
        }
        self.net_limiter.consume(net);

        self.shared.set_async(task);
        client
    }

    /// Cache-only SET, for warmup. No stats, no throttling, no upstream.
    pub fn setc(&mut self, key: &str, value: &str) -> Reply {
        self.cache.insert(key, value, true);
        self.ghost.access(
            key.as_bytes(),
            mem_estimate::estimate(key.len(), value.len()),
            AccessMode::Noop,
        );
        Reply::ok()
    }

    /// Bulk cache-only load from a CSV of `key,val_size` records; values
    /// are synthesized filler bytes.
    pub fn load_csv(&mut self, path: &str) -> Reply {
        let Ok(content) = std::fs::read_to_string(path) else {
            return Reply::err("ERR Failed to open file");
        };
        let mut lines = content.lines();
        if lines.next() != Some("key,val_size") {
            return Reply::err("ERR Invalid image file format");
        }
        for line in lines {
            let Some((key, val_size)) = line.split_once(',') else {
                return Reply::err("ERR Invalid image file format");
            };
            let Ok(val_size) = val_size.trim().parse::<usize>() else {
                return Reply::err("ERR Invalid image file format");
            };
            let value = "v".repeat(val_size);
            self.cache.insert(key, &value, true);
            self.ghost.access(
                key.as_bytes(),
                mem_estimate::estimate(key.len(), value.len()),
                AccessMode::Noop,
            );
        }
        Reply::ok()
    }

    // -- completion pump ----------------------------------------------------

    /// Drains finished tasks without blocking; returns how many were
    /// processed. Runs on the command thread: this is where cache and
    /// ghost mutations from fetched values happen.
    pub fn pump(&mut self) -> usize {
        let mut processed = 0;
        while let Some(done) = self.shared.completions.try_pop() {
            self.dispatch_completion(done);
            processed += 1;
        }
        processed
    }

    /// Waits up to `timeout` for at least one completion, then drains.
    pub fn pump_wait(&mut self, timeout: Duration) -> usize {
        match self.shared.completions.pop_wait(timeout) {
            Some(done) => {
                self.dispatch_completion(done);
                1 + self.pump()
            }
            None => 0,
        }
    }

    fn dispatch_completion(&mut self, done: DoneTask) {
        match done {
            DoneTask::Get(task) => self.complete_get(task),
            DoneTask::Set(task) => self.complete_set(task),
        }
    }

    fn complete_get(&mut self, task: Arc<GetTask>) {
        let result = task.result.lock().clone();
        debug_assert_ne!(result.status, TaskStatus::Pending);

        let update_cache = self.inflight.end_inflight(&task.key, &task);
        let dependents: Vec<ClientHandle> = task.dependents.lock().drain(..).collect();

        if result.status == TaskStatus::Err {
            let msg = format!("ERR Fail to read from upstream: {}", result.value);
            for dep in dependents {
                dep.resolve(Reply::err(msg.clone()));
            }
            task.client.resolve(Reply::err(msg));
            return;
        }

        let key = &task.key;
        let value = &result.value;

        if update_cache {
            self.cache.insert(key, value, true);
            self.ghost
                .update_size(key.as_bytes(), mem_estimate::estimate(key.len(), value.len()));
        }
        // else: a concurrent SET made this value stale; leave the cache

        self.stats
            .record_get_done(key.len(), value.len(), true, self.config.alloc_total_net_bw);
        self.wait_until_can_send();
        let mut net = kv_to_net_get_client(key.len(), value.len());
        if self.config.alloc_total_net_bw {
            net += kv_to_net_get_storage(key.len(), value.len());
        }
        self.net_limiter.consume(net);

        task.client.resolve(Reply::Bulk(value.clone()));

        // dependents observe the fetched value without re-updating the
        // cache; each is billed as a hit on the client leg
        for dep in dependents {
            self.stats
                .record_get_done(key.len(), value.len(), false, self.config.alloc_total_net_bw);
            self.wait_until_can_send();
            self.net_limiter
                .consume(kv_to_net_get_client(key.len(), value.len()));
            dep.resolve(Reply::Bulk(value.clone()));
        }
    }

    fn complete_set(&mut self, task: Arc<SetTask>) {
        let result = task.result.lock().clone();
        debug_assert_ne!(result.status, TaskStatus::Pending);

        if result.status == TaskStatus::Err {
            // drop the cached value so a lost write cannot be served
            // forever; the next read refetches
            self.cache.remove(&task.key);
            task.client.resolve(Reply::err(format!(
                "ERR Fail to write to upstream: {}",
                result.value
            )));
            return;
        }
        task.client.resolve(Reply::ok());
    }

    fn wait_until_can_send(&mut self) {
        let wait = self.net_limiter.check_wait_time();
        if wait > 0.0 {
            std::thread::sleep(Duration::from_secs_f64(wait));
        }
    }

    // -- resource plane -----------------------------------------------------

    /// `RESRC.GET`: the caps last applied.
    pub fn resrc_get(&self) -> Reply {
        Reply::Array(vec![
            Reply::Int(self.allocated.cache_size as i64),
            Reply::Double(self.allocated.db_rcu),
            Reply::Double(self.allocated.db_wcu),
            Reply::Double(self.allocated.net_bw),
        ])
    }

    /// `RESRC.SET`: applies new caps. A negative value skips that
    /// dimension. Rate changes take effect at the limiters' next frame
    /// rollover; the cache resize evicts immediately.
    pub fn resrc_set(&mut self, cache_size: i64, db_rcu: f64, db_wcu: f64, net_bw: f64) -> Reply {
        if cache_size >= 0 {
            self.cache.set_capacity(cache_size as u64);
            self.allocated.cache_size = cache_size as u64;
        }
        if db_rcu >= 0.0 {
            self.shared.rcu_limiter.propose_new_rate(db_rcu);
            self.allocated.db_rcu = db_rcu;
        }
        if db_wcu >= 0.0 {
            self.shared.wcu_limiter.propose_new_rate(db_wcu);
            self.allocated.db_wcu = db_wcu;
        }
        if net_bw >= 0.0 {
            self.net_limiter.propose_new_rate(net_bw);
            self.allocated.net_bw = net_bw;
        }
        Reply::ok()
    }

    // -- config plane -------------------------------------------------------

    /// `CONFIG.GET`: every config variable and the derived mock format.
    pub fn config_get(&self) -> Reply {
        let f = self.shared.mock.format();
        Reply::Array(vec![
            Reply::Simple("policy.alloc_total_net_bw".into()),
            Reply::Int(i64::from(self.config.alloc_total_net_bw)),
            Reply::Simple("dynamo.table".into()),
            Reply::Bulk(self.config.dynamo_table.clone()),
            Reply::Simple("dynamo.mock".into()),
            Reply::Int(i64::from(self.config.dynamo_mock)),
            Reply::Simple("dynamo.mock_format".into()),
            Reply::Array(vec![
                Reply::Int(i64::from(f.key_size)),
                Reply::Int(i64::from(f.val_size)),
                Reply::Int(i64::from(f.size_len)),
                Reply::Int(i64::from(f.offset_len)),
                Reply::Int(i64::from(f.k_pad_len)),
                Reply::Int(i64::from(f.v_pad_len)),
            ]),
            Reply::Simple("cache.admit_write".into()),
            Reply::Int(i64::from(self.config.admit_write)),
            Reply::Simple("ghost.range".into()),
            Reply::Array(vec![
                Reply::Int(i64::from(self.config.ghost_tick)),
                Reply::Int(i64::from(self.config.ghost_min_tick)),
                Reply::Int(i64::from(self.config.ghost_max_tick)),
            ]),
        ])
    }

    pub fn set_dynamo_table(&mut self, table: &str) -> Reply {
        self.config.dynamo_table = table.to_string();
        *self.shared.table.lock() = table.to_string();
        Reply::ok()
    }

    pub fn set_mock_disable(&mut self) -> Reply {
        self.config.dynamo_mock = false;
        self.shared.mock.set_enabled(false);
        Reply::ok()
    }

    /// Enables mock image mode, loading `key,val_size` CSVs into the
    /// image table.
    pub fn set_mock_image(&mut self, paths: &[&str]) -> Reply {
        self.shared.mock.init_image();
        for path in paths {
            let Ok(content) = std::fs::read_to_string(path) else {
                return Reply::err("ERR Failed to open image file");
            };
            let mut lines = content.lines();
            if lines.next() != Some("key,val_size") {
                return Reply::err("ERR Invalid image file format");
            }
            for line in lines {
                let Some((key, val_size)) = line.split_once(',') else {
                    return Reply::err("ERR Invalid image file format");
                };
                let Ok(val_size) = val_size.trim().parse::<u32>() else {
                    return Reply::err("ERR Invalid image file format");
                };
                self.shared
                    .mock
                    .insert_image_entry(crate::ghost::gshash(key.as_bytes()), val_size);
            }
        }
        self.config.dynamo_mock = true;
        self.shared.mock.set_enabled(true);
        Reply::ok()
    }

    /// Enables mock format mode with the given synthesized sizes.
    pub fn set_mock_format(&mut self, key_size: u32, val_size: u32) -> Reply {
        match MockFormat::derive(key_size, val_size) {
            Ok(format) => {
                self.shared.mock.set_format(format);
                self.config.dynamo_mock = true;
                self.shared.mock.set_enabled(true);
                Reply::ok()
            }
            Err(e) => Reply::err(format!("ERR Ill-formed key-value format: {e}")),
        }
    }

    pub fn set_admit_write(&mut self, admit: bool) -> Reply {
        self.config.admit_write = admit;
        Reply::ok()
    }

    /// Reconfigures the ghost tiers and re-initializes the ghost cache.
    ///
    /// Each value is rounded down to a multiple of the sampling factor,
    /// and `max_tick` is further aligned so the span is a whole number of
    /// ticks. A checkpoint at the configured path is replayed
    /// best-effort into the fresh ghost.
    pub fn set_ghost_range(&mut self, tick: u32, min_tick: u32, max_tick: u32) -> Reply {
        let tick = round_tick(tick);
        let min_tick = round_tick(min_tick);
        let mut max_tick = round_tick(max_tick);
        if tick == 0 || min_tick == 0 || max_tick < min_tick {
            return Reply::err("ERR Invalid value for <ghost.range>");
        }
        max_tick = min_tick + (max_tick - min_tick) / tick * tick;

        self.config.ghost_tick = tick;
        self.config.ghost_min_tick = min_tick;
        self.config.ghost_max_tick = max_tick;

        self.ghost = SampledGhostCache::new(tick, min_tick, max_tick);
        match load_ckpt_best_effort(&mut self.ghost, &self.ckpt_path) {
            Ok(()) => Reply::ok(),
            Err(_) => Reply::err("ERR Detect incompatible ghost checkpoint"),
        }
    }

    // -- ghost checkpoints --------------------------------------------------

    /// `GHOST.SAVE`: dumps the ghost cache to the checkpoint path.
    pub fn ghost_save(&self) -> Reply {
        match ckpt::save(&self.ghost, &self.ckpt_path) {
            Ok(()) => Reply::ok(),
            Err(_) => Reply::err("ERR Fail to open ghost checkpoint file"),
        }
    }

    /// `GHOST.LOAD`: replays the checkpoint into the current ghost cache.
    pub fn ghost_load(&mut self) -> Reply {
        match ckpt::load(&mut self.ghost, &self.ckpt_path) {
            Ok(()) => Reply::ok(),
            Err(CkptError::Incompatible) => Reply::err("ERR Detect incompatible ghost checkpoint"),
            Err(CkptError::Io(_)) => Reply::err("ERR Fail to open ghost checkpoint file"),
        }
    }

    /// Direct access to the ghost cache, for the controller and tests.
    pub fn ghost(&self) -> &SampledGhostCache {
        &self.ghost
    }

    // -- barrier ------------------------------------------------------------

    pub fn barrier_wait(&mut self) -> ClientHandle {
        self.barrier.wait()
    }

    pub fn barrier_signal(&mut self) -> Reply {
        self.barrier.signal();
        Reply::ok()
    }

    pub fn barrier_count(&self) -> Reply {
        Reply::Int(self.barrier.count() as i64)
    }

    // -- statistics ---------------------------------------------------------

    /// Synthesizes the memory figures the ghost report calibrates
    /// against.
    pub fn collect_mem_stats(&self) -> MemStats {
        MemStats {
            total_allocated: STARTUP_ALLOCATED + self.cache.used_bytes(),
            keys_count: self.cache.len() as u64,
            startup_allocated: STARTUP_ALLOCATED,
            clients_normal: 0,
            functions_caches: 0,
            avg_kv_size: self.stats.avg_kv_size,
        }
    }

    /// `STATS`: the ghost curve report followed by the resource counters.
    pub fn stats_reply(&mut self) -> Reply {
        let ms = self.collect_mem_stats();
        let mut items = ghost_stats_reply(&self.ghost, &ms);
        let s = &self.stats;
        for (label, value) in [
            ("req_cnt", s.req_cnt),
            ("hit_cnt", s.hit_cnt),
            ("miss_cnt", s.miss_cnt),
            ("db_rcu_consump_if_miss", s.db_rcu_consump_if_miss),
            ("net_bw_consump_if_miss", s.net_bw_consump_if_miss),
            ("net_bw_consump_if_hit", s.net_bw_consump_if_hit),
            ("db_rcu_consump", s.db_rcu_consump),
            ("db_wcu_consump", s.db_wcu_consump),
            ("net_bw_consump", s.net_bw_consump),
        ] {
            items.push(Reply::Simple(label.into()));
            items.push(Reply::Int(value as i64));
        }
        Reply::Array(items)
    }
}

fn load_ckpt_best_effort(ghost: &mut SampledGhostCache, path: &Path) -> Result<(), CkptError> {
    match ckpt::load(ghost, path) {
        Ok(()) => {
            info!(?path, "ghost checkpoint loaded");
            Ok(())
        }
        Err(CkptError::Io(_)) => Ok(()), // no checkpoint; start cold
        Err(CkptError::Incompatible) => {
            warn!(
                ?path,
                "incompatible ghost checkpoint; likely produced under a \
                 different hasher or corrupted"
            );
            Err(CkptError::Incompatible)
        }
    }
}

// Builds the three ghost.{ticks, hit_cnt, miss_cnt} label/value pairs.
//
// Predicted memory per tier = tier kv bytes scaled by the measured
// memory-amplification factor, plus the startup overhead. The
// amplification factor is bytes-per-resident-key over
// bytes-per-ghost-key, picked from the largest tier that still covers
// the resident key count.
fn ghost_stats_reply(ghost: &SampledGhostCache, ms: &MemStats) -> Vec<Reply> {
    fn null_report() -> Vec<Reply> {
        vec![
            Reply::Simple("ghost.ticks".into()),
            Reply::Null,
            Reply::Simple("ghost.hit_cnt".into()),
            Reply::Null,
            Reply::Simple("ghost.miss_cnt".into()),
            Reply::Null,
        ]
    }

    if ms.keys_count == 0 {
        return null_report();
    }
    let curve = ghost.get_cache_stat_curve();
    if curve.is_empty() || curve[0].key_count == 0 {
        return null_report();
    }

    let mut bytes_startup = ms.startup_allocated + ms.clients_normal + ms.functions_caches;
    if heuristic::CALIB_SMALL_CACHE
        && ms.total_allocated - bytes_startup < heuristic::SMALL_CACHE_THRESHOLD
    {
        if bytes_startup + heuristic::SMALL_CACHE_OVERHEAD < ms.total_allocated {
            bytes_startup += heuristic::SMALL_CACHE_OVERHEAD;
        }
    } else if heuristic::CALIB_FIXED
        && bytes_startup + heuristic::MEM_FIXED_OVERHEAD < ms.total_allocated
    {
        bytes_startup += heuristic::MEM_FIXED_OVERHEAD;
    }

    let mut bytes_per_key = (ms.total_allocated - bytes_startup) as f64 / ms.keys_count as f64;

    if heuristic::CALIB_ABNORMAL
        && ms.total_allocated < heuristic::MIN_TOTAL_ALLOCATED
        && bytes_per_key > ms.avg_kv_size + heuristic::MAX_PER_KEY_OVERHEAD
    {
        // per-key overhead is implausible; trust the measured kv average
        bytes_per_key = ms.avg_kv_size + heuristic::MAX_PER_KEY_OVERHEAD;
        bytes_startup = ms.total_allocated - (bytes_per_key * ms.keys_count as f64) as u64;
    }

    let acc_cnt = curve[0].hit_cnt + curve[0].miss_cnt;
    let mut mem_amplify = bytes_per_key / (curve[0].kv_size as f64 / curve[0].key_count as f64);
    for tier in &curve {
        if ms.keys_count > tier.key_count {
            break;
        }
        if tier.key_count > 0 {
            mem_amplify = bytes_per_key / (tier.kv_size as f64 / tier.key_count as f64);
        }
    }

    let mut ticks = vec![Reply::Int(bytes_startup as i64)];
    let mut hits = vec![Reply::Int(0)];
    let mut misses = vec![Reply::Int(acc_cnt as i64)];
    for tier in &curve {
        let data_mem = tier.kv_size as f64 * mem_amplify;
        let mut mem = data_mem as u64 + bytes_startup;
        if heuristic::CALIB_SMALL_CACHE && (data_mem as u64) < heuristic::SMALL_CACHE_THRESHOLD {
            mem += heuristic::SMALL_CACHE_OVERHEAD;
            if heuristic::CALIB_FIXED {
                mem -= heuristic::MEM_FIXED_OVERHEAD;
            }
        }
        ticks.push(Reply::Int(mem as i64));
        hits.push(Reply::Int(tier.hit_cnt as i64));
        misses.push(Reply::Int(tier.miss_cnt as i64));
    }

    vec![
        Reply::Simple("ghost.ticks".into()),
        Reply::Array(ticks),
        Reply::Simple("ghost.hit_cnt".into()),
        Reply::Array(hits),
        Reply::Simple("ghost.miss_cnt".into()),
        Reply::Array(misses),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_options(name: &str) -> InstanceOptions {
        InstanceOptions {
            cache_capacity_bytes: 1024 * 1024,
            ckpt_path: std::env::temp_dir()
                .join(format!("hopperkv-inst-{}-{}.ghc", name, std::process::id())),
            alloc_total_net_bw: false,
            remote: None,
        }
    }

    #[test]
    fn setc_then_get_hits() {
        let mut inst = Instance::new(test_options("setc")).unwrap();
        assert_eq!(inst.setc("k", "v"), Reply::ok());
        let reply = inst.get("k").wait();
        assert_eq!(reply, Reply::Bulk("v".into()));
        assert_eq!(inst.stats().hit_cnt, 1);
        assert_eq!(inst.stats().miss_cnt, 0);
    }

    #[test]
    fn get_through_mock_upstream() {
        let mut inst = Instance::new(test_options("mockget")).unwrap();
        assert_eq!(inst.set_mock_format(8, 16), Reply::ok());
        let key = inst.shared.mock.format().make_key(3);

        let handle = inst.get(&key);
        assert_eq!(handle.peek(), None);

        let mut waited = 0;
        while handle.peek().is_none() && waited < 100 {
            inst.pump_wait(Duration::from_millis(50));
            waited += 1;
        }
        let reply = handle.wait();
        match reply {
            Reply::Bulk(v) => assert_eq!(v.len(), 16),
            other => panic!("unexpected reply: {other:?}"),
        }
        // the fetched value is now cached
        assert!(inst.cache().contains(&key));
        assert_eq!(inst.stats().miss_cnt, 1);
    }

    #[test]
    fn resrc_set_skips_negative_dimensions() {
        let mut inst = Instance::new(test_options("resrc")).unwrap();
        assert_eq!(inst.resrc_set(-1, 100.0, -1.0, 5000.0), Reply::ok());
        match inst.resrc_get() {
            Reply::Array(items) => {
                assert_eq!(items[0], Reply::Int(0));
                assert_eq!(items[1], Reply::Double(100.0));
                assert_eq!(items[2], Reply::Double(0.0));
                assert_eq!(items[3], Reply::Double(5000.0));
            }
            other => panic!("unexpected reply: {other:?}"),
        }
    }

    #[test]
    fn stats_reply_has_ghost_and_counter_sections() {
        let mut inst = Instance::new(test_options("stats")).unwrap();
        inst.setc("k", "v");
        match inst.stats_reply() {
            Reply::Array(items) => {
                // 3 ghost pairs + 9 counter pairs
                assert_eq!(items.len(), 24);
                assert_eq!(items[0], Reply::Simple("ghost.ticks".into()));
            }
            other => panic!("unexpected reply: {other:?}"),
        }
    }

    #[test]
    fn ghost_range_realigns_ticks() {
        let mut inst = Instance::new(test_options("range")).unwrap();
        // 100 -> 96, 40 -> 32, 300 -> 288 -> 32 + (288-32)/96*96 = 224
        assert_eq!(inst.set_ghost_range(100, 40, 300), Reply::ok());
        assert_eq!(inst.config().ghost_tick, 96);
        assert_eq!(inst.config().ghost_min_tick, 32);
        assert_eq!(inst.config().ghost_max_tick, 224);
    }

    #[test]
    fn barrier_roundtrip() {
        let mut inst = Instance::new(test_options("barrier")).unwrap();
        let h = inst.barrier_wait();
        assert_eq!(inst.barrier_count(), Reply::Int(1));
        assert_eq!(inst.barrier_signal(), Reply::ok());
        assert_eq!(inst.barrier_count(), Reply::Int(0));
        assert_eq!(h.wait(), Reply::ok());
    }
}
