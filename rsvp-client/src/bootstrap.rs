//! Page-load bootstrap.
//!
//! Hydrates synchronously from the local cache and the URL, then revalidates
//! in the background against the remote store. The transitions live in a pure
//! [`Machine`]; [`Bootstrap`] executes its effects on the tokio runtime and
//! publishes every state change on a watch channel.
//!
//! ```text
//! initializing --Hydrated--> hydrated --Tick--> complete
//!      |                        |
//!      |                        +--Tick, no cache, id known--> revalidating --fetch done--> complete
//!      +--HydrationFailed--> error
//! ```
//!
//! With a cached record the fetch starts together with hydration and never
//! moves the phase; its result only refreshes the data.

use crate::cache::{CacheError, LocalCache};
use crate::cancel::CancelSignal;
use crate::metrics_defs::{CACHE_HIT, CACHE_MISS, REVALIDATION};
use crate::remote::{FetchOutcome, RemoteError, RsvpRemote};
use crate::types::{CachedRsvp, RsvpRecord};
use crate::url_params::UrlParams;
use parking_lot::Mutex;
use shared::counter;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Upper bound on the background revalidation fetch.
pub const REVALIDATE_TIMEOUT: Duration = Duration::from_millis(1800);

#[derive(thiserror::Error, Debug)]
pub enum BootstrapError {
    #[error("failed to read cached RSVP: {0}")]
    Cache(#[from] CacheError),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Phase {
    #[default]
    Initializing,
    Hydrated,
    Revalidating,
    Complete,
    Error,
}

impl Phase {
    /// Interactive content may render as soon as synchronous data is in.
    pub fn is_ready(&self) -> bool {
        matches!(self, Phase::Hydrated | Phase::Complete)
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Phase::Initializing => "initializing",
            Phase::Hydrated => "hydrated",
            Phase::Revalidating => "revalidating",
            Phase::Complete => "complete",
            Phase::Error => "error",
        }
    }
}

/// What the UI renders from.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub phase: Phase,
    /// Best known record: cached, then replaced by whatever the store returns.
    pub record: Option<RsvpRecord>,
    pub url: UrlParams,
    /// The record came from the local cache and has not been refreshed yet.
    pub from_cache: bool,
    /// A background fetch is in flight.
    pub revalidating: bool,
    pub error: Option<String>,
}

impl Snapshot {
    pub fn is_ready(&self) -> bool {
        self.phase.is_ready()
    }
}

#[derive(Debug)]
pub enum Event {
    Mount,
    Hydrated {
        cached: Option<CachedRsvp>,
        url: UrlParams,
        /// Identity saved by an earlier submission. Outlives the cached record.
        saved_id: Option<String>,
    },
    HydrationFailed {
        message: String,
    },
    Tick,
    FetchResolved {
        generation: u64,
        outcome: FetchOutcome,
    },
    FetchFailed {
        generation: u64,
        error: RemoteError,
    },
    Teardown,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Effect {
    /// Deliver `Event::Tick` on the next turn of the event loop.
    ScheduleTick,
    StartFetch { generation: u64, id: String },
    CancelFetch,
    SaveCache(RsvpRecord),
    ClearCache,
}

/// The bootstrap state machine. Holds no I/O; feed it events and carry out
/// the effects it returns.
#[derive(Debug, Default)]
pub struct Machine {
    phase: Phase,
    record: Option<RsvpRecord>,
    url: UrlParams,
    saved_id: Option<String>,
    from_cache: bool,
    error: Option<String>,
    generation: u64,
    in_flight: Option<(u64, String)>,
    torn_down: bool,
}

impl Machine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            phase: self.phase,
            record: self.record.clone(),
            url: self.url.clone(),
            from_cache: self.from_cache,
            revalidating: self.in_flight.is_some(),
            error: self.error.clone(),
        }
    }

    /// The URL id wins, then the cached record's id, then the saved one.
    fn revalidation_id(&self) -> Option<String> {
        self.url
            .id
            .clone()
            .or_else(|| self.record.as_ref().map(|record| record.report_id.clone()))
            .filter(|id| !id.is_empty())
            .or_else(|| self.saved_id.clone().filter(|id| !id.is_empty()))
    }

    /// Whether `generation` is the fetch the machine is waiting on.
    fn is_live(&self, generation: u64) -> bool {
        self.in_flight
            .as_ref()
            .is_some_and(|(live, _)| *live == generation)
    }

    fn start_fetch(&mut self, id: String, effects: &mut Vec<Effect>) {
        if self.in_flight.is_some() {
            effects.push(Effect::CancelFetch);
        }
        self.generation += 1;
        self.in_flight = Some((self.generation, id.clone()));
        effects.push(Effect::StartFetch {
            generation: self.generation,
            id,
        });
    }

    /// Returns the id of the in-flight fetch if `generation` is the live one.
    fn settle(&mut self, generation: u64) -> Option<String> {
        match &self.in_flight {
            Some((live, _)) if *live == generation => self.in_flight.take().map(|(_, id)| id),
            _ => None,
        }
    }

    fn finish_revalidation(&mut self) {
        if self.phase == Phase::Revalidating {
            self.phase = Phase::Complete;
        }
    }

    pub fn handle(&mut self, event: Event) -> Vec<Effect> {
        let mut effects = Vec::new();

        if self.torn_down && !matches!(event, Event::Mount) {
            tracing::trace!(?event, "bootstrap torn down, ignoring event");
            return effects;
        }

        match event {
            Event::Mount => {
                if self.in_flight.is_some() {
                    effects.push(Effect::CancelFetch);
                }
                // The generation counter survives remounts so stale completions
                // from an earlier mount can never match.
                *self = Machine {
                    generation: self.generation,
                    ..Machine::default()
                };
            }
            Event::Hydrated {
                cached,
                url,
                saved_id,
            } if self.phase == Phase::Initializing => {
                self.url = url;
                self.saved_id = saved_id;
                self.from_cache = cached.is_some();
                self.record = cached.map(|cached| cached.record);
                self.phase = Phase::Hydrated;

                effects.push(Effect::ScheduleTick);
                if self.from_cache
                    && let Some(id) = self.revalidation_id()
                {
                    self.start_fetch(id, &mut effects);
                }
            }
            Event::HydrationFailed { message } if self.phase == Phase::Initializing => {
                self.phase = Phase::Error;
                self.error = Some(message);
            }
            Event::Tick if self.phase == Phase::Hydrated => {
                match self.revalidation_id() {
                    Some(id) if !self.from_cache => {
                        self.phase = Phase::Revalidating;
                        self.start_fetch(id, &mut effects);
                    }
                    _ => self.phase = Phase::Complete,
                }
            }
            Event::FetchResolved {
                generation,
                outcome,
            } => {
                let Some(id) = self.settle(generation) else {
                    tracing::debug!(generation, "discarding stale fetch result");
                    return effects;
                };

                match outcome {
                    FetchOutcome::Found(record) => {
                        self.record = Some(record.clone());
                        self.from_cache = false;
                        effects.push(Effect::SaveCache(record));
                    }
                    FetchOutcome::NotFound => {
                        // Only an identity the store now contradicts is dropped.
                        let stale_record = self
                            .record
                            .as_ref()
                            .is_some_and(|record| record.report_id == id);
                        let stale_saved_id =
                            self.record.is_none() && self.saved_id.as_deref() == Some(id.as_str());
                        if stale_record || stale_saved_id {
                            tracing::info!(%id, "saved RSVP no longer exists remotely");
                            self.record = None;
                            self.saved_id = None;
                            self.from_cache = false;
                            effects.push(Effect::ClearCache);
                        }
                    }
                }
                self.finish_revalidation();
            }
            Event::FetchFailed { generation, error } => {
                if self.settle(generation).is_none() {
                    tracing::debug!(generation, "discarding stale fetch failure");
                    return effects;
                }

                if error.is_soft() {
                    tracing::debug!("revalidation gave up: {error}");
                } else {
                    tracing::warn!("revalidation failed: {error}");
                }
                self.finish_revalidation();
            }
            Event::Teardown => {
                if self.in_flight.take().is_some() {
                    effects.push(Effect::CancelFetch);
                }
                self.torn_down = true;
            }
            event => {
                tracing::trace!(?event, phase = self.phase.as_str(), "ignoring event");
            }
        }

        effects
    }
}

struct InFlight {
    generation: u64,
    signal: CancelSignal,
    task: JoinHandle<()>,
}

impl InFlight {
    fn cancel(self) {
        self.signal.cancel();
        self.task.abort();
    }
}

struct Shared {
    machine: Mutex<Machine>,
    cache: LocalCache,
    remote: Arc<dyn RsvpRemote>,
    timeout: Duration,
    snapshots: watch::Sender<Snapshot>,
    in_flight: Mutex<Option<InFlight>>,
}

impl Shared {
    fn dispatch(self: &Arc<Self>, event: Event) {
        let effects = {
            let mut machine = self.machine.lock();
            let effects = machine.handle(event);
            // Published under the lock so snapshots go out in transition order.
            self.snapshots.send_replace(machine.snapshot());
            effects
        };

        for effect in effects {
            self.apply(effect);
        }
    }

    fn apply(self: &Arc<Self>, effect: Effect) {
        match effect {
            Effect::ScheduleTick => match Handle::try_current() {
                Ok(handle) => {
                    let weak = Arc::downgrade(self);
                    handle.spawn(async move {
                        tokio::task::yield_now().await;
                        if let Some(shared) = weak.upgrade() {
                            shared.dispatch(Event::Tick);
                        }
                    });
                }
                Err(_) => self.dispatch(Event::Tick),
            },
            Effect::StartFetch { generation, id } => self.start_fetch(generation, id),
            Effect::CancelFetch => {
                if let Some(in_flight) = self.in_flight.lock().take() {
                    in_flight.cancel();
                }
            }
            Effect::SaveCache(record) => {
                self.cache.save(&record);
                self.cache.save_report_id(&record.report_id);
            }
            Effect::ClearCache => {
                self.cache.clear();
                self.cache.clear_report_id();
            }
        }
    }

    fn start_fetch(self: &Arc<Self>, generation: u64, id: String) {
        let Ok(handle) = Handle::try_current() else {
            tracing::warn!("no async runtime, skipping revalidation");
            self.dispatch(Event::FetchFailed {
                generation,
                error: RemoteError::Cancelled,
            });
            return;
        };

        let signal = CancelSignal::new();
        {
            // Spawned and registered under one lock so a concurrent cancel
            // always finds the task.
            let mut in_flight = self.in_flight.lock();
            let task = handle.spawn(revalidate(
                Arc::downgrade(self),
                self.remote.clone(),
                self.timeout,
                signal.clone(),
                generation,
                id,
            ));
            if let Some(previous) = in_flight.replace(InFlight {
                generation,
                signal,
                task,
            }) {
                previous.cancel();
            }
        }

        // A teardown or remount may have settled this generation between the
        // transition and the registration above.
        if !self.machine.lock().is_live(generation) {
            let orphan = self
                .in_flight
                .lock()
                .take_if(|in_flight| in_flight.generation == generation);
            if let Some(orphan) = orphan {
                tracing::debug!(generation, "cancelling fetch superseded before it registered");
                orphan.cancel();
            }
        }
    }
}

async fn revalidate(
    shared: Weak<Shared>,
    remote: Arc<dyn RsvpRemote>,
    timeout: Duration,
    signal: CancelSignal,
    generation: u64,
    id: String,
) {
    let result = match tokio::time::timeout(timeout, remote.fetch_by_id(&id, Some(&signal))).await
    {
        Ok(result) => result,
        Err(_) => {
            signal.cancel();
            Err(RemoteError::TimedOut)
        }
    };

    let outcome = match &result {
        Ok(FetchOutcome::Found(_)) => "found",
        Ok(FetchOutcome::NotFound) => "not_found",
        Err(RemoteError::TimedOut) => "timeout",
        Err(RemoteError::Cancelled) => "cancelled",
        Err(_) => "error",
    };
    counter!(REVALIDATION, "outcome" => outcome).increment(1);

    let event = match result {
        Ok(outcome) => Event::FetchResolved {
            generation,
            outcome,
        },
        Err(error) => Event::FetchFailed { generation, error },
    };

    if let Some(shared) = shared.upgrade() {
        shared.dispatch(event);
    }
}

/// Drives a [`Machine`] for one page. Dropping it tears the bootstrap down
/// and cancels any outstanding fetch.
pub struct Bootstrap {
    shared: Arc<Shared>,
}

impl Bootstrap {
    pub fn new(cache: LocalCache, remote: Arc<dyn RsvpRemote>) -> Self {
        Self::with_timeout(cache, remote, REVALIDATE_TIMEOUT)
    }

    pub fn with_timeout(cache: LocalCache, remote: Arc<dyn RsvpRemote>, timeout: Duration) -> Self {
        let (snapshots, _) = watch::channel(Snapshot::default());
        Bootstrap {
            shared: Arc::new(Shared {
                machine: Mutex::new(Machine::new()),
                cache,
                remote,
                timeout,
                snapshots,
                in_flight: Mutex::new(None),
            }),
        }
    }

    /// Runs hydration synchronously and returns the hydrated snapshot before
    /// any network activity. Calling it again restarts from `initializing`
    /// and cancels the previous fetch.
    pub fn mount(&self, location: Option<&str>) -> Snapshot {
        self.shared.dispatch(Event::Mount);

        let url = UrlParams::from_location(location);
        let event = match self.shared.cache.read() {
            Ok(cached) => {
                match cached {
                    Some(_) => counter!(CACHE_HIT).increment(1),
                    None => counter!(CACHE_MISS).increment(1),
                }
                Event::Hydrated {
                    cached,
                    url,
                    saved_id: self.shared.cache.saved_report_id(),
                }
            }
            Err(e) => {
                let error = BootstrapError::from(e);
                tracing::error!("bootstrap failed: {error}");
                Event::HydrationFailed {
                    message: error.to_string(),
                }
            }
        };
        self.shared.dispatch(event);

        self.snapshot()
    }

    pub fn snapshot(&self) -> Snapshot {
        self.shared.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.shared.snapshots.subscribe()
    }

    pub fn teardown(&self) {
        self.shared.dispatch(Event::Teardown);
    }
}

impl Drop for Bootstrap {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CACHE_KEY, now_millis};
    use crate::storage::{MemoryStorage, Storage};
    use crate::testutils::{FakeRemote, FetchBehavior};
    use crate::types::RsvpStatus;

    fn record(id: &str, status: RsvpStatus, guests: u32) -> RsvpRecord {
        RsvpRecord {
            report_id: id.into(),
            name: "Jane Doe".into(),
            status,
            guests,
            blessing: String::new(),
        }
    }

    fn cached(id: &str, status: RsvpStatus, guests: u32) -> CachedRsvp {
        CachedRsvp::new(record(id, status, guests), now_millis())
    }

    fn setup() -> (Arc<MemoryStorage>, LocalCache, Arc<FakeRemote>) {
        let storage = Arc::new(MemoryStorage::new());
        let cache = LocalCache::new(storage.clone());
        (storage, cache, Arc::new(FakeRemote::new()))
    }

    async fn wait_for_complete(rx: &mut watch::Receiver<Snapshot>) -> Snapshot {
        rx.wait_for(|s| s.phase == Phase::Complete && !s.revalidating)
            .await
            .unwrap()
            .clone()
    }

    #[test]
    fn test_machine_cache_miss_with_id() {
        let mut machine = Machine::new();
        machine.handle(Event::Mount);

        let effects = machine.handle(Event::Hydrated {
            saved_id: None,
            cached: None,
            url: UrlParams {
                name: None,
                id: Some("r-1".into()),
            },
        });
        assert_eq!(effects, vec![Effect::ScheduleTick]);
        assert_eq!(machine.phase(), Phase::Hydrated);
        assert!(machine.snapshot().is_ready());

        let effects = machine.handle(Event::Tick);
        assert_eq!(
            effects,
            vec![Effect::StartFetch {
                generation: 1,
                id: "r-1".into()
            }]
        );
        assert_eq!(machine.phase(), Phase::Revalidating);
        assert!(!machine.snapshot().is_ready());

        let found = record("r-1", RsvpStatus::Maybe, 3);
        let effects = machine.handle(Event::FetchResolved {
            generation: 1,
            outcome: FetchOutcome::Found(found.clone()),
        });
        assert_eq!(effects, vec![Effect::SaveCache(found.clone())]);
        assert_eq!(machine.phase(), Phase::Complete);
        assert_eq!(machine.snapshot().record, Some(found));
    }

    #[test]
    fn test_machine_cache_hit_revalidates_silently() {
        let mut machine = Machine::new();
        machine.handle(Event::Mount);

        let effects = machine.handle(Event::Hydrated {
            saved_id: None,
            cached: Some(cached("r-1", RsvpStatus::No, 0)),
            url: UrlParams::default(),
        });
        assert_eq!(
            effects,
            vec![
                Effect::ScheduleTick,
                Effect::StartFetch {
                    generation: 1,
                    id: "r-1".into()
                }
            ]
        );

        machine.handle(Event::Tick);
        assert_eq!(machine.phase(), Phase::Complete);
        assert!(machine.snapshot().revalidating);

        // A failed check keeps the cached data and the phase.
        machine.handle(Event::FetchFailed {
            generation: 1,
            error: RemoteError::Network("offline".into()),
        });
        let snapshot = machine.snapshot();
        assert_eq!(snapshot.phase, Phase::Complete);
        assert!(!snapshot.revalidating);
        assert_eq!(snapshot.record, Some(record("r-1", RsvpStatus::No, 0)));
        assert!(snapshot.from_cache);
    }

    #[test]
    fn test_machine_without_id_skips_revalidation() {
        let mut machine = Machine::new();
        machine.handle(Event::Mount);
        machine.handle(Event::Hydrated {
            saved_id: None,
            cached: None,
            url: UrlParams {
                name: Some("Jane Doe".into()),
                id: None,
            },
        });

        assert!(machine.handle(Event::Tick).is_empty());
        assert_eq!(machine.phase(), Phase::Complete);
    }

    #[test]
    fn test_machine_discards_stale_generation() {
        let mut machine = Machine::new();
        machine.handle(Event::Mount);
        machine.handle(Event::Hydrated {
            saved_id: None,
            cached: Some(cached("r-1", RsvpStatus::Yes, 2)),
            url: UrlParams::default(),
        });

        // Remount: generation 1 is superseded by generation 2.
        assert_eq!(machine.handle(Event::Mount), vec![Effect::CancelFetch]);
        machine.handle(Event::Hydrated {
            saved_id: None,
            cached: Some(cached("r-1", RsvpStatus::Yes, 2)),
            url: UrlParams::default(),
        });

        let stale = machine.handle(Event::FetchResolved {
            generation: 1,
            outcome: FetchOutcome::Found(record("r-1", RsvpStatus::No, 0)),
        });
        assert!(stale.is_empty());
        assert_eq!(
            machine.snapshot().record,
            Some(record("r-1", RsvpStatus::Yes, 2))
        );

        let fresh = machine.handle(Event::FetchResolved {
            generation: 2,
            outcome: FetchOutcome::Found(record("r-1", RsvpStatus::Maybe, 2)),
        });
        assert_eq!(fresh.len(), 1);
        assert_eq!(machine.snapshot().record.unwrap().status, RsvpStatus::Maybe);
    }

    #[test]
    fn test_machine_not_found_clears_contradicted_record() {
        let mut machine = Machine::new();
        machine.handle(Event::Mount);
        machine.handle(Event::Hydrated {
            saved_id: None,
            cached: Some(cached("r-1", RsvpStatus::Yes, 2)),
            url: UrlParams::default(),
        });

        let effects = machine.handle(Event::FetchResolved {
            generation: 1,
            outcome: FetchOutcome::NotFound,
        });
        assert_eq!(effects, vec![Effect::ClearCache]);
        assert_eq!(machine.snapshot().record, None);
    }

    #[test]
    fn test_machine_not_found_keeps_unrelated_record() {
        let mut machine = Machine::new();
        machine.handle(Event::Mount);
        // The link points at a different guest than the one cached.
        machine.handle(Event::Hydrated {
            saved_id: None,
            cached: Some(cached("r-1", RsvpStatus::Yes, 2)),
            url: UrlParams {
                name: None,
                id: Some("r-2".into()),
            },
        });

        let effects = machine.handle(Event::FetchResolved {
            generation: 1,
            outcome: FetchOutcome::NotFound,
        });
        assert!(effects.is_empty());
        assert!(machine.snapshot().record.is_some());
    }

    #[test]
    fn test_machine_teardown() {
        let mut machine = Machine::new();
        machine.handle(Event::Mount);
        machine.handle(Event::Hydrated {
            saved_id: None,
            cached: Some(cached("r-1", RsvpStatus::Yes, 2)),
            url: UrlParams::default(),
        });

        assert_eq!(machine.handle(Event::Teardown), vec![Effect::CancelFetch]);
        assert!(
            machine
                .handle(Event::FetchResolved {
                    generation: 1,
                    outcome: FetchOutcome::NotFound,
                })
                .is_empty()
        );
        assert!(machine.handle(Event::Tick).is_empty());
        assert_eq!(machine.phase(), Phase::Hydrated);
    }

    #[tokio::test]
    async fn test_scenario_cached_confirmation_renders_before_network() {
        let (storage, cache, remote) = setup();
        let twelve_hours_ago = now_millis() - 12 * 60 * 60 * 1000;
        let entry = CachedRsvp::new(record("r-1", RsvpStatus::No, 0), twelve_hours_ago);
        storage
            .set(CACHE_KEY, &serde_json::to_string(&entry).unwrap())
            .unwrap();
        remote.insert(record("r-1", RsvpStatus::No, 0));
        remote.set_fetch_behavior(FetchBehavior::Delayed(Duration::from_millis(200)));

        let bootstrap = Bootstrap::new(cache, remote.clone());
        let mut rx = bootstrap.subscribe();
        let snapshot = bootstrap.mount(Some("https://rsvp.example/"));

        assert_eq!(snapshot.phase, Phase::Hydrated);
        assert!(snapshot.is_ready());
        assert!(snapshot.from_cache);
        assert_eq!(snapshot.record, Some(record("r-1", RsvpStatus::No, 0)));

        let done = wait_for_complete(&mut rx).await;
        assert_eq!(done.record, Some(record("r-1", RsvpStatus::No, 0)));
        assert_eq!(remote.fetch_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_fetch_completes_within_timeout() {
        let (_storage, cache, remote) = setup();
        remote.set_fetch_behavior(FetchBehavior::Hang);

        let bootstrap = Bootstrap::new(cache, remote.clone());
        let mut rx = bootstrap.subscribe();
        let started = tokio::time::Instant::now();
        let snapshot = bootstrap.mount(Some("/?name=Jane%20Doe&id=r-1"));
        assert_eq!(snapshot.phase, Phase::Hydrated);

        let done = wait_for_complete(&mut rx).await;
        assert!(started.elapsed() <= REVALIDATE_TIMEOUT + Duration::from_millis(10));
        assert_eq!(done.record, None);
        assert_eq!(done.url.name.as_deref(), Some("Jane Doe"));
        assert_eq!(done.error, None);
    }

    #[tokio::test]
    async fn test_fetched_record_is_cached() {
        let (_storage, cache, remote) = setup();
        remote.insert(record("r-7", RsvpStatus::Yes, 4));

        let bootstrap = Bootstrap::new(cache.clone(), remote.clone());
        let mut rx = bootstrap.subscribe();
        bootstrap.mount(Some("https://rsvp.example/?id=r-7"));

        let done = wait_for_complete(&mut rx).await;
        assert_eq!(done.record, Some(record("r-7", RsvpStatus::Yes, 4)));
        assert!(!done.from_cache);
        assert_eq!(
            cache.load().map(|c| c.record),
            Some(record("r-7", RsvpStatus::Yes, 4))
        );
        assert_eq!(cache.saved_report_id().as_deref(), Some("r-7"));
    }

    #[tokio::test]
    async fn test_revalidation_refreshes_stale_cache() {
        let (_storage, cache, remote) = setup();
        cache.save(&record("r-1", RsvpStatus::Maybe, 2));
        remote.insert(record("r-1", RsvpStatus::Yes, 3));

        let bootstrap = Bootstrap::new(cache.clone(), remote.clone());
        let mut rx = bootstrap.subscribe();
        bootstrap.mount(None);

        let done = wait_for_complete(&mut rx).await;
        assert_eq!(done.record, Some(record("r-1", RsvpStatus::Yes, 3)));
        assert_eq!(cache.load().unwrap().record.guests, 3);
    }

    #[tokio::test]
    async fn test_corrupt_cache_reaches_error_phase() {
        let (storage, cache, remote) = setup();
        storage.set(CACHE_KEY, "{not json").unwrap();

        let bootstrap = Bootstrap::new(cache.clone(), remote.clone());
        let snapshot = bootstrap.mount(None);

        assert_eq!(snapshot.phase, Phase::Error);
        assert!(!snapshot.is_ready());
        assert!(snapshot.error.is_some());
        assert_eq!(remote.fetch_calls(), 0);

        // The blob is gone, so the next mount recovers.
        let snapshot = bootstrap.mount(None);
        assert_eq!(snapshot.phase, Phase::Hydrated);
    }

    #[tokio::test]
    async fn test_remount_cancels_previous_fetch() {
        let (_storage, cache, remote) = setup();
        remote.set_fetch_behavior(FetchBehavior::Hang);

        let bootstrap = Bootstrap::new(cache, remote.clone());
        let mut rx = bootstrap.subscribe();
        bootstrap.mount(Some("/?id=r-1"));
        rx.wait_for(|s| s.phase == Phase::Revalidating).await.unwrap();
        while remote.fetch_calls() == 0 {
            tokio::task::yield_now().await;
        }
        let first = remote.last_fetch_signal().unwrap();

        remote.insert(record("r-1", RsvpStatus::Yes, 2));
        remote.set_fetch_behavior(FetchBehavior::Store);
        bootstrap.mount(Some("/?id=r-1"));
        assert!(first.is_cancelled());

        let done = wait_for_complete(&mut rx).await;
        assert_eq!(done.record, Some(record("r-1", RsvpStatus::Yes, 2)));
        assert_eq!(remote.fetch_calls(), 2);
    }

    async fn start_hanging_fetch(remote: &FakeRemote) -> CancelSignal {
        while remote.fetch_calls() == 0 {
            tokio::task::yield_now().await;
        }
        remote.last_fetch_signal().unwrap()
    }

    #[tokio::test]
    async fn test_teardown_cancels_in_flight_fetch() {
        let (_storage, cache, remote) = setup();
        remote.set_fetch_behavior(FetchBehavior::Hang);

        let bootstrap = Bootstrap::new(cache, remote.clone());
        bootstrap.mount(Some("/?id=r-1"));
        let signal = start_hanging_fetch(&remote).await;
        assert!(!signal.is_cancelled());
        assert!(bootstrap.snapshot().revalidating);

        bootstrap.teardown();

        assert!(signal.is_cancelled());
        assert!(!bootstrap.snapshot().revalidating);
        assert!(bootstrap.shared.in_flight.lock().is_none());
    }

    #[tokio::test]
    async fn test_dropping_bootstrap_releases_fetch() {
        let (_storage, cache, remote) = setup();
        remote.set_fetch_behavior(FetchBehavior::Hang);

        let bootstrap = Bootstrap::new(cache, remote.clone());
        bootstrap.mount(Some("/?id=r-1"));
        let signal = start_hanging_fetch(&remote).await;

        drop(bootstrap);

        assert!(signal.is_cancelled());
        tokio::time::timeout(Duration::from_secs(1), async {
            while Arc::strong_count(&remote) > 1 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("fetch task released the remote");
    }

    #[tokio::test]
    async fn test_fetch_registered_after_teardown_is_cancelled() {
        let (_storage, cache, remote) = setup();
        remote.set_fetch_behavior(FetchBehavior::Hang);

        let bootstrap = Bootstrap::new(cache, remote.clone());
        bootstrap.mount(Some("/?name=Jane%20Doe"));
        bootstrap.teardown();

        // The effect of a transition that lost the race with teardown.
        bootstrap.shared.start_fetch(99, "r-1".into());

        assert!(bootstrap.shared.in_flight.lock().is_none());
    }

    #[tokio::test]
    async fn test_saved_identity_recovers_expired_record() {
        let (_storage, cache, remote) = setup();
        cache.save_report_id("r-1");
        cache.set_submitted(true);
        remote.insert(record("r-1", RsvpStatus::No, 0));

        let bootstrap = Bootstrap::new(cache.clone(), remote.clone());
        let mut rx = bootstrap.subscribe();
        let snapshot = bootstrap.mount(Some("https://rsvp.example/"));
        assert_eq!(snapshot.record, None);

        let done = wait_for_complete(&mut rx).await;
        assert_eq!(remote.fetch_calls(), 1);
        assert_eq!(done.record, Some(record("r-1", RsvpStatus::No, 0)));
        assert_eq!(
            cache.load().map(|c| c.record),
            Some(record("r-1", RsvpStatus::No, 0))
        );
    }

    #[test]
    fn test_machine_forgets_saved_identity_the_store_denies() {
        let mut machine = Machine::new();
        machine.handle(Event::Mount);
        machine.handle(Event::Hydrated {
            cached: None,
            url: UrlParams::default(),
            saved_id: Some("r-1".into()),
        });
        assert_eq!(
            machine.handle(Event::Tick),
            vec![Effect::StartFetch {
                generation: 1,
                id: "r-1".into()
            }]
        );

        let effects = machine.handle(Event::FetchResolved {
            generation: 1,
            outcome: FetchOutcome::NotFound,
        });
        assert_eq!(effects, vec![Effect::ClearCache]);
        assert_eq!(machine.phase(), Phase::Complete);
        assert_eq!(machine.revalidation_id(), None);
    }

    #[test]
    fn test_mount_without_runtime() {
        let (_storage, cache, remote) = setup();
        cache.save(&record("r-1", RsvpStatus::Yes, 2));

        let bootstrap = Bootstrap::new(cache, remote.clone());
        let snapshot = bootstrap.mount(None);

        // Tick runs inline and the fetch is skipped.
        assert_eq!(snapshot.phase, Phase::Complete);
        assert!(!snapshot.revalidating);
        assert_eq!(snapshot.record, Some(record("r-1", RsvpStatus::Yes, 2)));
        assert_eq!(remote.fetch_calls(), 0);
    }
}
