//! The update scheduler.
//!
//! Turns the registry's declarative update records into timed fetch calls.
//! One armed entry per record sits in a min-heap keyed by next-fire time;
//! fires run as spawned tasks so a slow fetch never blocks the loop, and a
//! record is only re-armed once its previous fire has completed, so a record
//! never overlaps itself. The registry is re-polled on an interval, picking
//! up newly added records without a restart; a record removed before its
//! deadline is dropped instead of fired.

use crate::config::Config;
use crate::covid::{self, CovidApi};
use crate::model::Domain;
use crate::news::{self, NewsApi, NewsError};
use crate::store::{Store, StoreError};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

/// Scheduler tunables plus the fetch targets, derived from [`Config`].
#[derive(Debug, Clone)]
pub struct Settings {
    pub poll_interval: Duration,
    pub news_backoff_max: Duration,
    pub local_area: String,
    pub local_area_type: String,
    pub nation: String,
    pub search_terms: String,
}

impl From<&Config> for Settings {
    fn from(cfg: &Config) -> Self {
        Self {
            poll_interval: Duration::from_millis(cfg.app.poll_interval_ms),
            news_backoff_max: Duration::from_secs(cfg.app.max_backoff_seconds),
            local_area: cfg.covid.local_area.clone(),
            local_area_type: cfg.covid.local_area_type.clone(),
            nation: cfg.covid.nation.clone(),
            search_terms: cfg.news.search_terms.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct Key {
    domain: Domain,
    name: String,
}

#[derive(Debug)]
struct FireDone {
    key: Key,
    rate_limited: bool,
}

/// Capped exponential backoff for the news rate limit: each exhausted fire
/// doubles the delay, one successful fetch resets it.
#[derive(Debug)]
struct Backoff {
    max: Duration,
    attempt: u32,
    resume_at: Option<Instant>,
}

impl Backoff {
    fn new(max: Duration) -> Self {
        Self {
            max,
            attempt: 0,
            resume_at: None,
        }
    }

    fn observe(&mut self, rate_limited: bool) {
        if rate_limited {
            // 5s * 2^attempt, capped
            let secs = 5u64.saturating_mul(1 << self.attempt.min(10));
            let delay = if self.max.is_zero() {
                Duration::from_secs(secs)
            } else {
                Duration::from_secs(secs).min(self.max)
            };
            self.attempt += 1;
            self.resume_at = Some(Instant::now() + delay);
            warn!(attempt = self.attempt, ?delay, "news fires deferred");
        } else {
            self.attempt = 0;
            self.resume_at = None;
        }
    }

    fn resume_at(&self) -> Option<Instant> {
        self.resume_at
    }

    fn deferral(&self, now: Instant) -> Option<Instant> {
        self.resume_at.filter(|t| *t > now)
    }
}

pub struct Scheduler {
    store: Arc<Store>,
    covid: Arc<dyn CovidApi>,
    news: Arc<dyn NewsApi>,
    settings: Settings,
}

impl Scheduler {
    pub fn new(
        store: Arc<Store>,
        covid: Arc<dyn CovidApi>,
        news: Arc<dyn NewsApi>,
        settings: Settings,
    ) -> Self {
        Self {
            store,
            covid,
            news,
            settings,
        }
    }

    /// Run forever. Intended to be handed to `tokio::spawn`.
    pub async fn run(self) {
        let mut heap: BinaryHeap<Reverse<(Instant, Key)>> = BinaryHeap::new();
        // keys currently in the heap or in flight
        let mut scheduled: HashSet<Key> = HashSet::new();
        let (tx, mut rx) = mpsc::channel::<FireDone>(16);
        let mut poll = tokio::time::interval(self.settings.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut news_backoff = Backoff::new(self.settings.news_backoff_max);

        loop {
            let next_due = heap.peek().map(|Reverse((due, _))| *due);
            tokio::select! {
                _ = poll.tick() => {
                    self.arm_new(&mut heap, &mut scheduled).await;
                }
                Some(done) = rx.recv() => {
                    if done.key.domain == Domain::News {
                        news_backoff.observe(done.rate_limited);
                    }
                    self.settle(done.key, &mut heap, &mut scheduled, &news_backoff).await;
                }
                _ = sleep_until(next_due.unwrap_or_else(Instant::now)), if next_due.is_some() => {
                    self.fire_due(&mut heap, &mut scheduled, &news_backoff, &tx).await;
                }
            }
        }
    }

    /// Arm every registry record that is neither armed nor in flight.
    async fn arm_new(
        &self,
        heap: &mut BinaryHeap<Reverse<(Instant, Key)>>,
        scheduled: &mut HashSet<Key>,
    ) {
        let doc = self.store.snapshot().await;
        for domain in Domain::ALL {
            for record in doc.updates(domain) {
                let key = Key {
                    domain,
                    name: record.name.clone(),
                };
                if scheduled.contains(&key) {
                    continue;
                }
                let due = Instant::now() + Duration::from_secs(record.interval);
                debug!(name = %key.name, %domain, interval = record.interval, "armed update");
                scheduled.insert(key.clone());
                heap.push(Reverse((due, key)));
            }
        }
    }

    /// Pop and fire everything whose deadline has passed.
    async fn fire_due(
        &self,
        heap: &mut BinaryHeap<Reverse<(Instant, Key)>>,
        scheduled: &mut HashSet<Key>,
        news_backoff: &Backoff,
        tx: &mpsc::Sender<FireDone>,
    ) {
        let now = Instant::now();
        loop {
            match heap.peek() {
                Some(Reverse((due, _))) if *due <= now => {}
                _ => break,
            }
            let Some(Reverse((_, key))) = heap.pop() else {
                break;
            };

            // a record removed since arming must not fire
            let doc = self.store.snapshot().await;
            if !doc.updates(key.domain).iter().any(|u| u.name == key.name) {
                debug!(name = %key.name, domain = %key.domain, "update removed before firing");
                scheduled.remove(&key);
                continue;
            }

            if key.domain == Domain::News {
                if let Some(resume) = news_backoff.deferral(now) {
                    heap.push(Reverse((resume, key)));
                    continue;
                }
            }

            self.spawn_fire(key, tx.clone());
        }
    }

    fn spawn_fire(&self, key: Key, tx: mpsc::Sender<FireDone>) {
        let store = self.store.clone();
        let covid_api = self.covid.clone();
        let news_api = self.news.clone();
        let settings = self.settings.clone();
        tokio::spawn(async move {
            let rate_limited = match key.domain {
                Domain::Covid => {
                    run_covid_update(store.as_ref(), covid_api.as_ref(), &settings, &key.name)
                        .await;
                    false
                }
                Domain::News => {
                    run_news_update(store.as_ref(), news_api.as_ref(), &settings, &key.name).await
                }
            };
            let _ = tx.send(FireDone { key, rate_limited }).await;
        });
    }

    /// A fire finished: evict one-shot records, re-arm repetitive ones.
    async fn settle(
        &self,
        key: Key,
        heap: &mut BinaryHeap<Reverse<(Instant, Key)>>,
        scheduled: &mut HashSet<Key>,
        news_backoff: &Backoff,
    ) {
        let doc = self.store.snapshot().await;
        let Some(record) = doc.updates(key.domain).iter().find(|u| u.name == key.name) else {
            // removed while in flight; the fire was allowed to finish
            scheduled.remove(&key);
            return;
        };

        if record.repetitive {
            let mut due = Instant::now() + Duration::from_secs(record.interval);
            if key.domain == Domain::News {
                if let Some(resume) = news_backoff.resume_at() {
                    due = due.max(resume);
                }
            }
            heap.push(Reverse((due, key)));
        } else {
            scheduled.remove(&key);
            match self.store.remove_update(&key.name, key.domain).await {
                Ok(()) => {
                    info!(name = %key.name, domain = %key.domain, "one-shot update completed")
                }
                Err(StoreError::UpdateNotFound(..)) => {}
                Err(err) => warn!(?err, "failed to evict one-shot update"),
            }
        }
    }
}

#[instrument(skip_all, fields(update = name))]
async fn run_covid_update(store: &Store, api: &dyn CovidApi, settings: &Settings, name: &str) {
    info!("covid update fired");
    let snapshot = covid::fetch_covid(
        api,
        &settings.local_area,
        &settings.local_area_type,
        &settings.nation,
    )
    .await;
    if let Err(err) = store.apply_covid(snapshot).await {
        warn!(?err, "failed to store covid snapshot");
    }
}

/// Returns true when the upstream reported rate-limit exhaustion.
#[instrument(skip_all, fields(update = name))]
async fn run_news_update(store: &Store, api: &dyn NewsApi, settings: &Settings, name: &str) -> bool {
    info!("news update fired");
    let doc = store.snapshot().await;
    match news::fetch_news(
        api,
        &settings.search_terms,
        &doc.api_key,
        &doc.blacklisted_articles,
    )
    .await
    {
        Ok(articles) => {
            if let Err(err) = store.apply_news(articles).await {
                warn!(?err, "failed to store news articles");
            }
            false
        }
        Err(NewsError::RateLimited) => true,
        Err(err) => {
            warn!(?err, "news update failed");
            false
        }
    }
}
