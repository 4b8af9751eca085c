//! Prioritized background thumbnail loading
//!
//! [`ThumbnailLoader`] owns a single worker thread, a request cache keyed
//! by content-addressed cache key, and six FIFO queues — the cross product
//! of two stages (disk lookup, generation) and three priorities. Items
//! subscribe to requests from the requester thread; the worker resolves
//! them against the [`ThumbnailCache`](crate::cache::ThumbnailCache) and
//! hands completions back through [`ThumbnailLoader::drain_completions`],
//! which the host calls on the requester thread after a wake notification.
//!
//! Completed results are retained in a cost-bounded cache (pixel units,
//! width × height per entry) and evicted least-recently-renewed first once
//! no subscriber holds them.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::thread;

use image::{DynamicImage, GenericImageView};
use parking_lot::{Condvar, Mutex};

use crate::cache::{local_path, ThumbnailCache};
use crate::key::cache_key;
use crate::LoaderConfig;

/// Handle the host uses to identify one subscribing display item.
pub type ItemId = u64;

/// Scheduling priority; `High` sorts before `Normal` before `Low`, and a
/// request runs at the minimum (most urgent) of its subscribers'
/// priorities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    High,
    Normal,
    Low,
}

/// Lifecycle state a subscriber observes for its request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Loading,
    Ready,
    Error,
}

/// How the thumbnail fills the requested rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillMode {
    /// Scale uniformly to fit; one edge may come up short.
    PreserveAspectFit,
    /// Scale uniformly to fill and center-crop the excess.
    PreserveAspectCrop,
}

/// One completion handed to a subscriber.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub item: ItemId,
    pub status: Status,
    pub pixels: Option<Arc<DynamicImage>>,
    /// Width × height of the decoded preview; `(0, 0)` on error.
    pub intrinsic_size: (u32, u32),
}

/// Snapshot of the loader's bookkeeping, for tests and diagnostics.
#[derive(Debug, Clone)]
pub struct LoaderStats {
    pub requests: usize,
    pub queued: usize,
    pub cached: usize,
    pub total_cost: u64,
    pub max_cost: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Lookup,
    Generate,
}

/// Worker scan order: high and normal priority work of either stage beats
/// all low priority work, and within high/normal every pending disk lookup
/// runs before any generation so the gallery paints from cache first.
const QUEUE_SCAN_ORDER: [(Stage, Priority); 6] = [
    (Stage::Lookup, Priority::High),
    (Stage::Lookup, Priority::Normal),
    (Stage::Generate, Priority::High),
    (Stage::Generate, Priority::Normal),
    (Stage::Lookup, Priority::Low),
    (Stage::Generate, Priority::Low),
];

fn queue_index(stage: Stage, priority: Priority) -> usize {
    let stage_base = match stage {
        Stage::Lookup => 0,
        Stage::Generate => 3,
    };
    stage_base + priority as usize
}

struct Request {
    key: String,
    source: String,
    mime: Option<String>,
    requested_size: (u32, u32),
    crop: bool,
    subscribers: Vec<ItemId>,
    /// Minimum of subscriber priorities; `None` until first prioritized.
    priority: Option<Priority>,
    stage: Stage,
    status: Status,
    loading: bool,
    loaded: bool,
    pixels: Option<Arc<DynamicImage>>,
    cache_cost: u64,
    /// Queue membership: index currently valid plus the epoch stamped on
    /// the live queue entry. Stale entries are skipped on pop.
    queued: Option<usize>,
    queue_epoch: u64,
    cached_seq: Option<u64>,
    in_completed: bool,
}

impl Request {
    fn new(key: String, source: String, mime: Option<String>, requested_size: (u32, u32), crop: bool) -> Self {
        Self {
            key,
            source,
            mime,
            requested_size,
            crop,
            subscribers: Vec::new(),
            priority: None,
            stage: Stage::Lookup,
            status: Status::Loading,
            loading: false,
            loaded: false,
            pixels: None,
            cache_cost: 0,
            queued: None,
            queue_epoch: 0,
            cached_seq: None,
            in_completed: false,
        }
    }
}

struct ItemEntry {
    request: Option<u64>,
    priority: Priority,
}

struct Job {
    id: u64,
    stage: Stage,
    source: String,
    mime: Option<String>,
    requested_size: (u32, u32),
    crop: bool,
}

struct LoaderState {
    requests: HashMap<u64, Request>,
    by_key: HashMap<String, u64>,
    items: HashMap<ItemId, ItemEntry>,
    queues: [VecDeque<(u64, u64)>; 6],
    completed: VecDeque<u64>,
    /// Retained completions in renewal order; the front is evicted first.
    cached: BTreeMap<u64, u64>,
    /// Items whose attach could not be scheduled; they receive an error
    /// delivery on the next drain.
    failed_items: Vec<ItemId>,
    next_request: u64,
    next_seq: u64,
    total_cost: u64,
    max_cost: u64,
    quit: bool,
    suspended: bool,
}

impl LoaderState {
    fn new(max_cost: u64) -> Self {
        Self {
            requests: HashMap::new(),
            by_key: HashMap::new(),
            items: HashMap::new(),
            queues: Default::default(),
            completed: VecDeque::new(),
            cached: BTreeMap::new(),
            failed_items: Vec::new(),
            next_request: 0,
            next_seq: 0,
            total_cost: 0,
            max_cost,
            quit: false,
            suspended: false,
        }
    }

    fn alloc_request_id(&mut self) -> u64 {
        let id = self.next_request;
        self.next_request += 1;
        id
    }

    fn alloc_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    fn enqueue(&mut self, id: u64, stage: Stage, priority: Priority) {
        let idx = queue_index(stage, priority);
        let Some(request) = self.requests.get_mut(&id) else {
            return;
        };
        request.queue_epoch += 1;
        request.queued = Some(idx);
        request.stage = stage;
        let epoch = request.queue_epoch;
        self.queues[idx].push_back((id, epoch));
    }

    fn take_next_job(&mut self) -> Option<Job> {
        for (stage, priority) in QUEUE_SCAN_ORDER {
            let idx = queue_index(stage, priority);
            while let Some((id, epoch)) = self.queues[idx].pop_front() {
                let Some(request) = self.requests.get_mut(&id) else {
                    continue;
                };
                if request.queue_epoch != epoch || request.queued != Some(idx) {
                    continue;
                }
                request.queued = None;
                request.loading = true;
                return Some(Job {
                    id,
                    stage,
                    source: request.source.clone(),
                    mime: request.mime.clone(),
                    requested_size: request.requested_size,
                    crop: request.crop,
                });
            }
        }
        None
    }

    /// Recompute a request's effective priority from its subscribers and
    /// rehome or destroy it accordingly. Requests owned by the worker are
    /// left alone; it resolves them at commit time.
    fn reprioritize(&mut self, id: u64) {
        let Some(request) = self.requests.get(&id) else {
            return;
        };
        if request.loaded {
            return;
        }

        let effective = request
            .subscribers
            .iter()
            .filter_map(|item| self.items.get(item).map(|entry| entry.priority))
            .min();

        match effective {
            None => {
                if !request.loading {
                    self.destroy(id);
                }
            }
            Some(priority) => {
                if request.priority != Some(priority) {
                    let loading = request.loading;
                    let stage = request.stage;
                    if let Some(request) = self.requests.get_mut(&id) {
                        request.priority = Some(priority);
                    }
                    if !loading {
                        self.enqueue(id, stage, priority);
                    }
                }
            }
        }
    }

    fn detach_item(&mut self, item: ItemId) {
        let request_id = self
            .items
            .get_mut(&item)
            .and_then(|entry| entry.request.take());
        if let Some(id) = request_id {
            if let Some(request) = self.requests.get_mut(&id) {
                request.subscribers.retain(|&subscriber| subscriber != item);
            }
            self.reprioritize(id);
        }
    }

    fn destroy(&mut self, id: u64) {
        if let Some(request) = self.requests.remove(&id) {
            self.by_key.remove(&request.key);
            if let Some(seq) = request.cached_seq {
                self.cached.remove(&seq);
                self.total_cost = self.total_cost.saturating_sub(request.cache_cost);
            }
        }
    }

    /// Move a retained completion to the back of the renewal order.
    fn renew_cached(&mut self, id: u64) {
        let old_seq = self.requests.get(&id).and_then(|request| request.cached_seq);
        let Some(old_seq) = old_seq else {
            return;
        };
        self.cached.remove(&old_seq);
        let seq = self.alloc_seq();
        self.cached.insert(seq, id);
        if let Some(request) = self.requests.get_mut(&id) {
            request.cached_seq = Some(seq);
        }
    }

    /// Release unreferenced retained completions, oldest renewal first,
    /// until the cost budget is respected or only subscribed entries
    /// remain.
    fn evict(&mut self) {
        if self.total_cost <= self.max_cost {
            return;
        }
        let mut projected = self.total_cost;
        let mut victims = Vec::new();
        for (&seq, &id) in self.cached.iter() {
            if projected <= self.max_cost {
                break;
            }
            match self.requests.get(&id) {
                Some(request) if request.subscribers.is_empty() => {
                    projected = projected.saturating_sub(request.cache_cost);
                    victims.push((seq, id));
                }
                Some(_) => {}
                None => victims.push((seq, id)),
            }
        }
        for (seq, id) in victims {
            self.cached.remove(&seq);
            if let Some(request) = self.requests.remove(&id) {
                self.by_key.remove(&request.key);
                self.total_cost = self.total_cost.saturating_sub(request.cache_cost);
            }
        }
    }

    /// Record a terminal worker result. Returns true when the host should
    /// be woken, i.e. this was the first undelivered completion.
    fn complete(&mut self, id: u64, pixels: Option<DynamicImage>) -> bool {
        let was_idle = self.completed.is_empty() && self.failed_items.is_empty();
        let Some(request) = self.requests.get_mut(&id) else {
            return false;
        };
        request.loading = false;
        request.loaded = true;
        request.pixels = pixels.map(Arc::new);
        request.in_completed = true;
        self.completed.push_back(id);
        was_idle
    }
}

struct Shared {
    cache: ThumbnailCache,
    state: Mutex<LoaderState>,
    work_available: Condvar,
    wake_hook: Option<Box<dyn Fn() + Send + Sync>>,
}

impl Shared {
    fn wake_host(&self) {
        if let Some(hook) = &self.wake_hook {
            hook();
        }
    }
}

/// The loader core: request cache, priority queues and worker thread.
///
/// All methods are called from the requester thread; the worker only
/// touches the shared state under the loader mutex and releases it across
/// disk and decode work.
pub struct ThumbnailLoader {
    shared: Arc<Shared>,
    worker: Option<thread::JoinHandle<()>>,
}

impl ThumbnailLoader {
    pub fn new(config: LoaderConfig) -> Self {
        Self::with_wake_hook(config, None)
    }

    /// Create a loader whose worker invokes `wake_hook` whenever the
    /// completion queue becomes non-empty. The host should respond by
    /// calling [`ThumbnailLoader::drain_completions`] on the requester
    /// thread.
    pub fn with_wake_hook(
        config: LoaderConfig,
        wake_hook: Option<Box<dyn Fn() + Send + Sync>>,
    ) -> Self {
        let shared = Arc::new(Shared {
            cache: ThumbnailCache::new(&config),
            state: Mutex::new(LoaderState::new(config.max_cost)),
            work_available: Condvar::new(),
            wake_hook,
        });

        let worker_shared = Arc::clone(&shared);
        let worker = thread::spawn(move || worker_loop(&worker_shared));

        Self {
            shared,
            worker: Some(worker),
        }
    }

    /// Subscribe `item` to the thumbnail identified by `(source_uri,
    /// requested_size, fill_mode)`.
    ///
    /// A request already completed for the same identity is renewed and
    /// delivered straight back as the return value; anything else is
    /// scheduled and delivered later through
    /// [`ThumbnailLoader::drain_completions`]. A source that is not a
    /// local file, or an empty requested size, is never scheduled and
    /// fails on the next drain.
    pub fn attach(
        &self,
        item: ItemId,
        source_uri: &str,
        requested_size: (u32, u32),
        fill_mode: FillMode,
        priority: Priority,
        mime: Option<&str>,
    ) -> Option<Delivery> {
        let crop = fill_mode == FillMode::PreserveAspectCrop;
        let mut state = self.shared.state.lock();

        // Re-attaching always releases the item's previous request first.
        state.detach_item(item);

        let path = local_path(source_uri).filter(|path| !path.is_empty());
        let Some(path) = path else {
            return self.fail_attach(state, item, priority);
        };
        if requested_size.0 == 0 || requested_size.1 == 0 {
            return self.fail_attach(state, item, priority);
        }

        let size = self.shared.cache.ladder().select(requested_size, crop, true);
        let key = cache_key(&path, size, crop);

        let id = match state.by_key.get(&key).copied() {
            Some(id) => id,
            None => {
                let id = state.alloc_request_id();
                state
                    .requests
                    .insert(id, Request::new(key.clone(), path, mime.map(String::from), requested_size, crop));
                state.by_key.insert(key, id);
                id
            }
        };

        if let Some(request) = state.requests.get_mut(&id) {
            request.subscribers.push(item);
        }
        state.items.insert(
            item,
            ItemEntry {
                request: Some(id),
                priority,
            },
        );

        let delivered = {
            let request = state.requests.get(&id);
            match request {
                Some(request) if request.loaded && !request.in_completed => {
                    let intrinsic = request
                        .pixels
                        .as_ref()
                        .map(|pixels| pixels.dimensions())
                        .unwrap_or((0, 0));
                    Some(Delivery {
                        item,
                        status: request.status,
                        pixels: request.pixels.clone(),
                        intrinsic_size: intrinsic,
                    })
                }
                _ => None,
            }
        };

        if delivered.is_some() {
            state.renew_cached(id);
        } else {
            state.reprioritize(id);
            self.shared.work_available.notify_one();
        }

        state.evict();
        delivered
    }

    fn fail_attach(
        &self,
        mut state: parking_lot::MutexGuard<'_, LoaderState>,
        item: ItemId,
        priority: Priority,
    ) -> Option<Delivery> {
        state.items.insert(
            item,
            ItemEntry {
                request: None,
                priority,
            },
        );
        let was_idle = state.completed.is_empty() && state.failed_items.is_empty();
        state.failed_items.push(item);
        drop(state);
        if was_idle {
            self.shared.wake_host();
        }
        None
    }

    /// Change an item's priority; its request is rehomed onto the queue
    /// matching the new effective priority.
    pub fn update_priority(&self, item: ItemId, priority: Priority) {
        let mut state = self.shared.state.lock();
        let request_id = match state.items.get_mut(&item) {
            Some(entry) if entry.priority != priority => {
                entry.priority = priority;
                entry.request
            }
            _ => return,
        };
        if let Some(id) = request_id {
            state.reprioritize(id);
            self.shared.work_available.notify_one();
        }
    }

    /// Unsubscribe `item`. A request left without subscribers is destroyed
    /// unless the worker currently owns it, in which case it resolves at
    /// commit time.
    pub fn cancel(&self, item: ItemId) {
        let mut state = self.shared.state.lock();
        state.detach_item(item);
        state.items.remove(&item);
        state.evict();
    }

    /// Collect all pending completions, in completion order.
    ///
    /// Called by the host on the requester thread after a wake
    /// notification. Terminal state is assigned here, each subscriber
    /// receives a [`Delivery`], and completed requests move into the
    /// retained cache followed by an eviction pass.
    pub fn drain_completions(&self) -> Vec<Delivery> {
        let mut state = self.shared.state.lock();
        let mut deliveries = Vec::new();

        for item in std::mem::take(&mut state.failed_items) {
            deliveries.push(Delivery {
                item,
                status: Status::Error,
                pixels: None,
                intrinsic_size: (0, 0),
            });
        }

        while let Some(id) = state.completed.pop_front() {
            let Some(request) = state.requests.get_mut(&id) else {
                continue;
            };
            request.in_completed = false;
            let pixels = request.pixels.clone();
            let intrinsic = pixels
                .as_ref()
                .map(|pixels| pixels.dimensions())
                .unwrap_or((0, 0));
            let (status, cost) = if pixels.is_some() {
                (Status::Ready, intrinsic.0 as u64 * intrinsic.1 as u64)
            } else {
                (Status::Error, 0)
            };
            request.status = status;
            request.cache_cost = cost;
            let subscribers = request.subscribers.clone();

            state.total_cost += cost;
            let seq = state.alloc_seq();
            state.cached.insert(seq, id);
            if let Some(request) = state.requests.get_mut(&id) {
                request.cached_seq = Some(seq);
            }

            for item in subscribers {
                deliveries.push(Delivery {
                    item,
                    status,
                    pixels: pixels.clone(),
                    intrinsic_size: intrinsic,
                });
            }
        }

        state.evict();
        deliveries
    }

    /// Park the worker and reschedule every delivered pixel-carrying
    /// request onto its priority's lookup queue; their disk entries are
    /// assumed to persist. Used when the downstream render context is
    /// invalidated.
    pub fn suspend(&self) {
        let mut state = self.shared.state.lock();
        state.suspended = true;

        let rescheduled: Vec<(u64, u64)> = state
            .cached
            .iter()
            .filter(|(_, id)| {
                state
                    .requests
                    .get(id)
                    .is_some_and(|request| request.pixels.is_some())
            })
            .map(|(&seq, &id)| (seq, id))
            .collect();

        for (seq, id) in rescheduled {
            state.cached.remove(&seq);
            let Some(request) = state.requests.get_mut(&id) else {
                continue;
            };
            let cost = request.cache_cost;
            let priority = request.priority.unwrap_or(Priority::Normal);
            request.cached_seq = None;
            request.cache_cost = 0;
            request.loaded = false;
            request.status = Status::Loading;
            request.pixels = None;
            state.total_cost = state.total_cost.saturating_sub(cost);
            state.enqueue(id, Stage::Lookup, priority);
        }
    }

    /// Wake the worker after a [`ThumbnailLoader::suspend`].
    pub fn resume(&self) {
        let mut state = self.shared.state.lock();
        state.suspended = false;
        drop(state);
        self.shared.work_available.notify_all();
    }

    /// Adjust the pixel-cost budget of the retained completion cache.
    pub fn set_max_cost(&self, max_cost: u64) {
        let mut state = self.shared.state.lock();
        state.max_cost = max_cost;
        state.evict();
    }

    pub fn max_cost(&self) -> u64 {
        self.shared.state.lock().max_cost
    }

    pub fn stats(&self) -> LoaderStats {
        let state = self.shared.state.lock();
        LoaderStats {
            requests: state.requests.len(),
            queued: state
                .requests
                .values()
                .filter(|request| request.queued.is_some())
                .count(),
            cached: state.cached.len(),
            total_cost: state.total_cost,
            max_cost: state.max_cost,
        }
    }
}

impl Drop for ThumbnailLoader {
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.lock();
            state.quit = true;
        }
        self.shared.work_available.notify_all();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn worker_loop(shared: &Shared) {
    loop {
        let job = {
            let mut state = shared.state.lock();
            loop {
                if state.quit {
                    return;
                }
                if state.suspended {
                    shared.work_available.wait(&mut state);
                    continue;
                }
                if let Some(job) = state.take_next_job() {
                    break job;
                }
                shared.work_available.wait(&mut state);
            }
        };

        match job.stage {
            Stage::Lookup => run_lookup(shared, job),
            Stage::Generate => run_generate(shared, job),
        }
    }
}

/// Lookup stage: serve from an existing disk entry at the selected size or
/// a neighboring one. On a miss the request migrates to the generate queue
/// of its effective priority.
fn run_lookup(shared: &Shared, job: Job) {
    let pixels = shared
        .cache
        .existing_thumbnail(&job.source, job.requested_size, job.crop, true)
        .and_then(|data| {
            data.scaled_pixels(job.requested_size, job.crop, true)
                .map_err(|err| {
                    log::debug!("cached thumbnail unusable for {}: {err}", job.source);
                })
                .ok()
        });

    let mut state = shared.state.lock();
    match pixels {
        Some(image) => {
            let wake = state.complete(job.id, Some(image));
            drop(state);
            if wake {
                shared.wake_host();
            }
        }
        None => {
            let Some(request) = state.requests.get_mut(&job.id) else {
                return;
            };
            request.loading = false;
            let abandoned = request.subscribers.is_empty();
            let priority = request.priority.unwrap_or(Priority::Low);
            if abandoned {
                state.destroy(job.id);
            } else {
                state.enqueue(job.id, Stage::Generate, priority);
            }
        }
    }
}

/// Generate stage: always terminal. Failures surface as an error
/// completion, never as a panic across the thread boundary.
fn run_generate(shared: &Shared, job: Job) {
    let produced = shared.cache.request_thumbnail(
        &job.source,
        job.requested_size,
        job.crop,
        true,
        job.mime.as_deref(),
    );
    let pixels = match produced {
        Ok(data) => match data.scaled_pixels(job.requested_size, job.crop, true) {
            Ok(image) => Some(image),
            Err(err) => {
                log::debug!("could not decode generated thumbnail for {}: {err}", job.source);
                None
            }
        },
        Err(err) => {
            log::debug!("could not generate thumbnail for {}: {err}", job.source);
            None
        }
    };

    let mut state = shared.state.lock();
    let wake = state.complete(job.id, pixels);
    drop(state);
    if wake {
        shared.wake_host();
    }
}
