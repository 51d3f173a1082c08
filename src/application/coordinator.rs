//! Fetch coordination: dedup, waiter fan-out, and cancellation.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc, oneshot};
use tokio::task::AbortHandle;
use tracing::{debug, trace, warn};

use crate::domain::entities::{ImageId, Priority};
use crate::domain::errors::LoadError;
use crate::domain::ports::{ImageDecoder, ImageFetcher};
use crate::infrastructure::cache::CacheStore;

/// Result fanned out to every waiter of one fetch.
pub type FetchOutcome = Result<Arc<image::DynamicImage>, LoadError>;

/// Identifies one waiter attached to an in-flight fetch.
pub type WaiterId = u64;

const RETRY_BASE_DELAY: Duration = Duration::from_millis(200);

/// Handle returned by [`FetchCoordinator::request`]: await `receiver`
/// for the outcome, or pass `waiter` to `detach` to stop waiting.
#[derive(Debug)]
pub struct FetchTicket {
    /// The identifier being fetched.
    pub id: ImageId,
    /// This caller's waiter handle.
    pub waiter: WaiterId,
    /// Resolves when the shared fetch completes. A receive error means
    /// the coordinator shut down; treat it as cancellation.
    pub receiver: oneshot::Receiver<FetchOutcome>,
}

enum FetchState {
    /// Waiting in the dispatch queue behind the concurrency limit.
    Queued,
    /// Fetch task spawned; the handle aborts it.
    Running(AbortHandle),
}

struct InFlight {
    /// Registration order is notification order.
    waiters: Vec<(WaiterId, oneshot::Sender<FetchOutcome>)>,
    state: FetchState,
}

type InFlightTable = Arc<Mutex<HashMap<ImageId, InFlight>>>;

#[derive(Debug)]
enum Command {
    Fetch { id: ImageId, priority: Priority },
    Cancel { id: ImageId },
    CancelAll,
}

/// Deduplicates concurrent fetches per identifier and fans results out
/// to waiters.
///
/// At most one in-flight fetch exists per id: the first request enqueues
/// a fetch command, later requests attach as extra waiters. Dispatch is
/// throttled by a semaphore inside a background worker loop; `High`
/// priority requests jump to the front of the queue.
pub struct FetchCoordinator {
    table: InFlightTable,
    cmd_tx: mpsc::UnboundedSender<Command>,
    next_waiter: AtomicU64,
}

impl std::fmt::Debug for FetchCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchCoordinator")
            .field("in_flight", &self.in_flight_count())
            .finish_non_exhaustive()
    }
}

/// State for the background dispatch loop.
struct WorkerState {
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    semaphore: Arc<Semaphore>,
    task: FetchTask,
}

impl FetchCoordinator {
    /// Creates a coordinator and spawns its dispatch loop. Must be
    /// called from within a tokio runtime.
    #[must_use]
    pub fn new(
        fetcher: Arc<dyn ImageFetcher>,
        decoder: Arc<dyn ImageDecoder>,
        store: Arc<CacheStore>,
        max_concurrent: usize,
        retries: u32,
    ) -> Self {
        let table: InFlightTable = Arc::new(Mutex::new(HashMap::new()));
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();

        let worker = WorkerState {
            cmd_rx,
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
            task: FetchTask {
                table: table.clone(),
                fetcher,
                decoder,
                store,
                retries,
            },
        };

        tokio::spawn(run_worker_loop(worker));

        Self {
            table,
            cmd_tx,
            next_waiter: AtomicU64::new(1),
        }
    }

    /// Attaches a waiter to the fetch for `id`, starting one if none is
    /// in flight. Waiters are notified in registration order.
    pub fn request(&self, id: &ImageId, priority: Priority) -> FetchTicket {
        let (tx, rx) = oneshot::channel();
        let waiter = self.next_waiter.fetch_add(1, Ordering::Relaxed);

        let is_new = {
            let mut table = self.table.lock();
            match table.get_mut(id) {
                Some(entry) => {
                    entry.waiters.push((waiter, tx));
                    trace!(id = %id, waiter = waiter, "joined in-flight fetch");
                    false
                }
                None => {
                    table.insert(
                        id.clone(),
                        InFlight {
                            waiters: vec![(waiter, tx)],
                            state: FetchState::Queued,
                        },
                    );
                    true
                }
            }
        };

        if is_new {
            debug!(id = %id, ?priority, "queueing fetch");
            if self
                .cmd_tx
                .send(Command::Fetch {
                    id: id.clone(),
                    priority,
                })
                .is_err()
            {
                // Worker gone (shutdown); fail the waiter instead of
                // leaving it pending forever.
                notify_waiters(&self.table, id, &Err(LoadError::Cancelled));
            }
        }

        FetchTicket {
            id: id.clone(),
            waiter,
            receiver: rx,
        }
    }

    /// Detaches one waiter. The shared fetch keeps running for the
    /// remaining waiters; detaching the last one cancels it.
    pub fn detach(&self, id: &ImageId, waiter: WaiterId) {
        let mut table = self.table.lock();
        let Some(entry) = table.get_mut(id) else {
            return;
        };

        entry.waiters.retain(|(w, _)| *w != waiter);
        trace!(id = %id, waiter = waiter, "waiter detached");

        if !entry.waiters.is_empty() {
            return;
        }

        if let Some(entry) = table.remove(id) {
            match entry.state {
                FetchState::Running(handle) => {
                    handle.abort();
                    debug!(id = %id, "last waiter gone, aborted fetch");
                }
                FetchState::Queued => {
                    let _ = self.cmd_tx.send(Command::Cancel { id: id.clone() });
                    debug!(id = %id, "last waiter gone, dequeued fetch");
                }
            }
        }
    }

    /// Cancels every in-flight and queued fetch, notifying all waiters
    /// with `Cancelled`.
    pub fn cancel_all(&self) {
        let _ = self.cmd_tx.send(Command::CancelAll);

        let entries: Vec<(ImageId, InFlight)> = self.table.lock().drain().collect();
        let count = entries.len();
        for (_, entry) in entries {
            if let FetchState::Running(handle) = entry.state {
                handle.abort();
            }
            for (_, tx) in entry.waiters {
                let _ = tx.send(Err(LoadError::Cancelled));
            }
        }
        if count > 0 {
            debug!(count = count, "cancelled all in-flight fetches");
        }
    }

    /// Returns true if a fetch for `id` is queued or running.
    pub fn is_in_flight(&self, id: &ImageId) -> bool {
        self.table.lock().contains_key(id)
    }

    /// Number of identifiers currently queued or running.
    pub fn in_flight_count(&self) -> usize {
        self.table.lock().len()
    }
}

/// Removes the table entry for `id` and sends `outcome` to its waiters
/// in registration order.
fn notify_waiters(table: &InFlightTable, id: &ImageId, outcome: &FetchOutcome) {
    let waiters = table
        .lock()
        .remove(id)
        .map(|entry| entry.waiters)
        .unwrap_or_default();

    trace!(id = %id, waiters = waiters.len(), ok = outcome.is_ok(), "notifying waiters");
    for (_, tx) in waiters {
        let _ = tx.send(outcome.clone());
    }
}

/// Dispatch loop: collects fetch commands into a priority-ordered queue
/// and spawns fetch tasks as semaphore permits free up.
async fn run_worker_loop(mut state: WorkerState) {
    let mut queue: VecDeque<ImageId> = VecDeque::new();

    loop {
        tokio::select! {
            cmd = state.cmd_rx.recv() => {
                match cmd {
                    Some(Command::Fetch { id, priority }) => {
                        if !queue.contains(&id) {
                            match priority {
                                Priority::High => queue.push_front(id),
                                Priority::Normal | Priority::Low => queue.push_back(id),
                            }
                        }
                    }
                    Some(Command::Cancel { id }) => {
                        queue.retain(|queued| *queued != id);
                    }
                    Some(Command::CancelAll) => {
                        queue.clear();
                    }
                    None => break,
                }
            }
            Ok(permit) = state.semaphore.clone().acquire_owned(), if !queue.is_empty() => {
                if let Some(id) = queue.pop_front() {
                    dispatch(&state.task, id, permit);
                }
            }
        }
    }
}

/// Spawns the fetch task for `id` and records its abort handle.
fn dispatch(task: &FetchTask, id: ImageId, permit: OwnedSemaphorePermit) {
    // Cancelled while queued: the table entry is already gone.
    if !task.table.lock().contains_key(&id) {
        return;
    }

    let spawned = task.clone();
    let fetch_id = id.clone();
    let handle = tokio::spawn(async move {
        let outcome = spawned.run(&fetch_id).await;
        notify_waiters(&spawned.table, &fetch_id, &outcome);
        drop(permit);
    });

    let mut table = task.table.lock();
    match table.get_mut(&id) {
        Some(entry) => entry.state = FetchState::Running(handle.abort_handle()),
        // All waiters left between the queue pop and here.
        None => handle.abort(),
    }
}

/// One fetch: network, decode, cache, in that order.
#[derive(Clone)]
struct FetchTask {
    table: InFlightTable,
    fetcher: Arc<dyn ImageFetcher>,
    decoder: Arc<dyn ImageDecoder>,
    store: Arc<CacheStore>,
    retries: u32,
}

impl FetchTask {
    async fn run(&self, id: &ImageId) -> FetchOutcome {
        let bytes = self.fetch_with_retries(id).await?;

        let decoder = self.decoder.clone();
        let raw = bytes.clone();
        let decoded = tokio::task::spawn_blocking(move || decoder.decode(&raw))
            .await
            .map_err(|e| LoadError::decode(format!("decode task panicked: {e}")))??;

        let image = Arc::new(decoded);

        // Refresh-on-success: overwrite whatever the cache held.
        self.store.put(id, image.clone(), &bytes).await;

        debug!(id = %id, size = bytes.len(), "image fetched and cached");
        Ok(image)
    }

    async fn fetch_with_retries(&self, id: &ImageId) -> Result<bytes::Bytes, LoadError> {
        let mut attempt = 0u32;
        loop {
            match self.fetcher.fetch(id.url()).await {
                Ok(bytes) => return Ok(bytes),
                Err(e @ LoadError::Network(_)) if attempt < self.retries => {
                    attempt += 1;
                    warn!(id = %id, attempt = attempt, error = %e, "fetch failed, retrying");
                    tokio::time::sleep(RETRY_BASE_DELAY * attempt).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::CacheResult;
    use crate::infrastructure::cache::MemoryImageCache;
    use crate::infrastructure::codec::ImageCodec;
    use std::sync::atomic::AtomicUsize;

    fn encode_png(width: u32, height: u32) -> Vec<u8> {
        let img = image::DynamicImage::new_rgb8(width, height);
        let mut buf = std::io::Cursor::new(Vec::new());
        img.write_to(&mut buf, image::ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    /// Fetcher that counts calls and optionally stalls until released.
    struct FakeFetcher {
        calls: AtomicUsize,
        payload: Vec<u8>,
        gate: Option<Arc<tokio::sync::Notify>>,
        fail: bool,
    }

    impl FakeFetcher {
        fn succeeding() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                payload: encode_png(8, 8),
                gate: None,
                fail: false,
            })
        }

        fn gated(gate: Arc<tokio::sync::Notify>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                payload: encode_png(8, 8),
                gate: Some(gate),
                fail: false,
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                payload: Vec::new(),
                gate: None,
                fail: true,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl ImageFetcher for FakeFetcher {
        async fn fetch(&self, _url: &str) -> CacheResult<bytes::Bytes> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if self.fail {
                return Err(LoadError::network("unreachable"));
            }
            Ok(bytes::Bytes::from(self.payload.clone()))
        }
    }

    fn make_store() -> Arc<CacheStore> {
        Arc::new(CacheStore::new(
            MemoryImageCache::with_default_budget(),
            None,
            Arc::new(ImageCodec::default()),
        ))
    }

    fn make_coordinator(fetcher: Arc<FakeFetcher>) -> (FetchCoordinator, Arc<CacheStore>) {
        let store = make_store();
        let coordinator = FetchCoordinator::new(
            fetcher,
            Arc::new(ImageCodec::default()),
            store.clone(),
            4,
            0,
        );
        (coordinator, store)
    }

    #[tokio::test]
    async fn concurrent_requests_share_one_fetch() {
        let gate = Arc::new(tokio::sync::Notify::new());
        let fetcher = FakeFetcher::gated(gate.clone());
        let (coordinator, _store) = make_coordinator(fetcher.clone());
        let id = ImageId::new("img://a");

        let first = coordinator.request(&id, Priority::Normal);
        let second = coordinator.request(&id, Priority::Normal);
        let third = coordinator.request(&id, Priority::Normal);

        // Let the fetch start, then release it.
        tokio::time::sleep(Duration::from_millis(20)).await;
        gate.notify_waiters();

        assert!(first.receiver.await.unwrap().is_ok());
        assert!(second.receiver.await.unwrap().is_ok());
        assert!(third.receiver.await.unwrap().is_ok());
        assert_eq!(fetcher.calls(), 1);
        assert!(!coordinator.is_in_flight(&id));
    }

    #[tokio::test]
    async fn distinct_ids_fetch_separately() {
        let fetcher = FakeFetcher::succeeding();
        let (coordinator, _store) = make_coordinator(fetcher.clone());

        let a = coordinator.request(&ImageId::new("img://a"), Priority::Normal);
        let b = coordinator.request(&ImageId::new("img://b"), Priority::Normal);

        assert!(a.receiver.await.unwrap().is_ok());
        assert!(b.receiver.await.unwrap().is_ok());
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn success_populates_the_cache() {
        let fetcher = FakeFetcher::succeeding();
        let (coordinator, store) = make_coordinator(fetcher);
        let id = ImageId::new("img://a");

        let ticket = coordinator.request(&id, Priority::Normal);
        assert!(ticket.receiver.await.unwrap().is_ok());

        let cached = store
            .get(&id, &crate::domain::entities::LoadOptions::default())
            .await;
        assert!(cached.is_some());
    }

    #[tokio::test]
    async fn failure_reaches_every_waiter_and_caches_nothing() {
        let fetcher = FakeFetcher::failing();
        let (coordinator, store) = make_coordinator(fetcher);
        let id = ImageId::new("img://a");

        let first = coordinator.request(&id, Priority::Normal);
        let second = coordinator.request(&id, Priority::Normal);

        assert!(matches!(
            first.receiver.await.unwrap(),
            Err(LoadError::Network(_))
        ));
        assert!(matches!(
            second.receiver.await.unwrap(),
            Err(LoadError::Network(_))
        ));
        let cached = store
            .get(&id, &crate::domain::entities::LoadOptions::default())
            .await;
        assert!(cached.is_none());
    }

    #[tokio::test]
    async fn partial_detach_keeps_the_fetch_alive() {
        let gate = Arc::new(tokio::sync::Notify::new());
        let fetcher = FakeFetcher::gated(gate.clone());
        let (coordinator, _store) = make_coordinator(fetcher.clone());
        let id = ImageId::new("img://a");

        let first = coordinator.request(&id, Priority::Normal);
        let second = coordinator.request(&id, Priority::Normal);

        tokio::time::sleep(Duration::from_millis(20)).await;
        coordinator.detach(&id, first.waiter);
        assert!(coordinator.is_in_flight(&id));

        gate.notify_waiters();
        assert!(second.receiver.await.unwrap().is_ok());
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn last_detach_cancels_the_fetch() {
        let gate = Arc::new(tokio::sync::Notify::new());
        let fetcher = FakeFetcher::gated(gate.clone());
        let (coordinator, _store) = make_coordinator(fetcher.clone());
        let id = ImageId::new("img://a");

        let ticket = coordinator.request(&id, Priority::Normal);
        tokio::time::sleep(Duration::from_millis(20)).await;

        coordinator.detach(&id, ticket.waiter);
        assert!(!coordinator.is_in_flight(&id));

        // The abandoned fetch task was aborted; releasing the gate must
        // not resurrect it.
        gate.notify_waiters();
        tokio::time::sleep(Duration::from_millis(20)).await;

        // A new request starts a fresh fetch.
        let retry = coordinator.request(&id, Priority::Normal);
        tokio::time::sleep(Duration::from_millis(20)).await;
        gate.notify_waiters();
        assert!(retry.receiver.await.unwrap().is_ok());
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn cancel_all_notifies_waiters_with_cancelled() {
        let gate = Arc::new(tokio::sync::Notify::new());
        let fetcher = FakeFetcher::gated(gate.clone());
        let (coordinator, _store) = make_coordinator(fetcher);
        let id = ImageId::new("img://a");

        let ticket = coordinator.request(&id, Priority::Normal);
        tokio::time::sleep(Duration::from_millis(20)).await;

        coordinator.cancel_all();
        assert!(matches!(
            ticket.receiver.await.unwrap(),
            Err(LoadError::Cancelled)
        ));
        assert_eq!(coordinator.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn retries_network_errors_up_to_the_limit() {
        let fetcher = FakeFetcher::failing();
        let store = make_store();
        let coordinator = FetchCoordinator::new(
            fetcher.clone(),
            Arc::new(ImageCodec::default()),
            store,
            4,
            2,
        );
        let id = ImageId::new("img://a");

        let ticket = coordinator.request(&id, Priority::Normal);
        assert!(ticket.receiver.await.unwrap().is_err());
        assert_eq!(fetcher.calls(), 3);
    }
}
