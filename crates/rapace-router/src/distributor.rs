//! Topic-based pub/sub fan-out: subscribers get a bounded, drop-oldest
//! buffer each, so one slow subscriber never backpressures publishers or
//! other subscribers. Subscriptions idle past an inactivity threshold are
//! evicted by the router's health-check loop.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use rapace_wire::{Status, StatusCode};
use tokio::sync::Notify;

/// Atomic counters mirroring a subscription's lifetime activity.
#[derive(Default)]
pub struct DistributorMetrics {
    pub total_subscribers_ever: AtomicU64,
    pub current_subscribers: AtomicU64,
    pub total_publishes: AtomicU64,
    pub total_deliveries: AtomicU64,
    pub dropped_for_overflow: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DistributorMetricsSnapshot {
    pub total_subscribers_ever: u64,
    pub current_subscribers: u64,
    pub total_publishes: u64,
    pub total_deliveries: u64,
    pub dropped_for_overflow: u64,
}

impl DistributorMetrics {
    fn snapshot(&self) -> DistributorMetricsSnapshot {
        DistributorMetricsSnapshot {
            total_subscribers_ever: self.total_subscribers_ever.load(Ordering::Relaxed),
            current_subscribers: self.current_subscribers.load(Ordering::Relaxed),
            total_publishes: self.total_publishes.load(Ordering::Relaxed),
            total_deliveries: self.total_deliveries.load(Ordering::Relaxed),
            dropped_for_overflow: self.dropped_for_overflow.load(Ordering::Relaxed),
        }
    }
}

struct Subscription {
    buffer: Mutex<VecDeque<Bytes>>,
    notify: Notify,
    paused: AtomicBool,
    last_activity: Mutex<Instant>,
}

type TopicMap = HashMap<String, HashMap<u64, Arc<Subscription>>>;

/// Owns every subscription across every topic for one router.
pub struct EventDistributor {
    topics: Mutex<TopicMap>,
    next_id: AtomicU64,
    metrics: DistributorMetrics,
    buffer_capacity: usize,
    inactivity_timeout: Duration,
    disposed: AtomicBool,
}

impl EventDistributor {
    /// `client_inactivity_timeout` is the router's health-check timeout for
    /// a connection; a subscription is considered idle, and eligible for
    /// eviction, once it has gone 80% of that duration without a delivery.
    pub fn new(buffer_capacity: usize, client_inactivity_timeout: Duration) -> Arc<Self> {
        Arc::new(EventDistributor {
            topics: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            metrics: DistributorMetrics::default(),
            buffer_capacity,
            inactivity_timeout: client_inactivity_timeout.mul_f64(0.8),
            disposed: AtomicBool::new(false),
        })
    }

    /// Fails with `RESOURCE_EXHAUSTED` once `dispose()` has run.
    pub fn subscribe(self: &Arc<Self>, topic: impl Into<String>) -> Result<Subscriber, Status> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(Status::new(StatusCode::ResourceExhausted, "distributor disposed"));
        }
        let topic = topic.into();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let inner = Arc::new(Subscription {
            buffer: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            paused: AtomicBool::new(false),
            last_activity: Mutex::new(Instant::now()),
        });
        self.topics
            .lock()
            .entry(topic.clone())
            .or_default()
            .insert(id, inner.clone());
        self.metrics
            .total_subscribers_ever
            .fetch_add(1, Ordering::Relaxed);
        self.metrics
            .current_subscribers
            .fetch_add(1, Ordering::Relaxed);

        Ok(Subscriber {
            id,
            topic,
            inner,
            distributor: self.clone(),
        })
    }

    fn deliver_one(sub: &Subscription, payload: Bytes, buffer_capacity: usize, metrics: &DistributorMetrics) {
        {
            let mut buf = sub.buffer.lock();
            if buf.len() >= buffer_capacity {
                buf.pop_front();
                metrics.dropped_for_overflow.fetch_add(1, Ordering::Relaxed);
            }
            buf.push_back(payload);
        }
        *sub.last_activity.lock() = Instant::now();
        sub.notify.notify_one();
        metrics.total_deliveries.fetch_add(1, Ordering::Relaxed);
    }

    /// Delivers `payload` to every non-paused subscriber of `topic`,
    /// dropping the oldest buffered item for any subscriber whose buffer is
    /// full. Returns the number of subscribers it was delivered to.
    pub fn publish(&self, topic: &str, payload: Bytes) -> usize {
        self.metrics.total_publishes.fetch_add(1, Ordering::Relaxed);
        let topics = self.topics.lock();
        let Some(subs) = topics.get(topic) else {
            return 0;
        };

        let mut delivered = 0;
        for sub in subs.values() {
            if sub.paused.load(Ordering::Acquire) {
                continue;
            }
            Self::deliver_one(sub, payload.clone(), self.buffer_capacity, &self.metrics);
            delivered += 1;
        }
        delivered
    }

    /// Delivers `payload` to exactly one subscriber by id, wherever its
    /// topic is. Returns `false` if the subscriber doesn't exist or is
    /// paused.
    pub fn publish_to_subscriber(&self, id: u64, payload: Bytes) -> bool {
        self.metrics.total_publishes.fetch_add(1, Ordering::Relaxed);
        let topics = self.topics.lock();
        for subs in topics.values() {
            if let Some(sub) = subs.get(&id) {
                if sub.paused.load(Ordering::Acquire) {
                    return false;
                }
                Self::deliver_one(sub, payload, self.buffer_capacity, &self.metrics);
                return true;
            }
        }
        false
    }

    /// Delivers `payload` to every non-paused subscriber, across every
    /// topic, for which `predicate(subscriber_id, topic)` returns `true`.
    /// Returns how many subscribers it was delivered to.
    pub fn publish_filtered(&self, payload: Bytes, predicate: impl Fn(u64, &str) -> bool) -> usize {
        self.metrics.total_publishes.fetch_add(1, Ordering::Relaxed);
        let topics = self.topics.lock();
        let mut delivered = 0;
        for (topic, subs) in topics.iter() {
            for (id, sub) in subs.iter() {
                if sub.paused.load(Ordering::Acquire) || !predicate(*id, topic) {
                    continue;
                }
                Self::deliver_one(sub, payload.clone(), self.buffer_capacity, &self.metrics);
                delivered += 1;
            }
        }
        delivered
    }

    /// Closes every subscriber and refuses further `subscribe` calls with
    /// `RESOURCE_EXHAUSTED`. Idempotent: calling it again once already
    /// disposed is a no-op.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut topics = self.topics.lock();
        let remaining: u64 = topics.values().map(|subs| subs.len() as u64).sum();
        topics.clear();
        if remaining > 0 {
            self.metrics
                .current_subscribers
                .fetch_sub(remaining, Ordering::Relaxed);
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Drops every subscription idle longer than the inactivity threshold.
    /// Returns how many were evicted.
    pub fn evict_inactive(&self) -> usize {
        let now = Instant::now();
        let mut evicted = 0;
        let mut topics = self.topics.lock();
        topics.retain(|_, subs| {
            subs.retain(|_, sub| {
                let idle = now.duration_since(*sub.last_activity.lock());
                let stale = idle > self.inactivity_timeout;
                if stale {
                    evicted += 1;
                }
                !stale
            });
            !subs.is_empty()
        });
        if evicted > 0 {
            self.metrics
                .current_subscribers
                .fetch_sub(evicted as u64, Ordering::Relaxed);
        }
        evicted
    }

    pub fn metrics(&self) -> DistributorMetricsSnapshot {
        self.metrics.snapshot()
    }

    fn remove(&self, topic: &str, id: u64) {
        let mut topics = self.topics.lock();
        if let Some(subs) = topics.get_mut(topic) {
            if subs.remove(&id).is_some() {
                self.metrics
                    .current_subscribers
                    .fetch_sub(1, Ordering::Relaxed);
            }
            if subs.is_empty() {
                topics.remove(topic);
            }
        }
    }
}

/// A live subscription to one topic. Unsubscribes automatically on drop.
pub struct Subscriber {
    id: u64,
    topic: String,
    inner: Arc<Subscription>,
    distributor: Arc<EventDistributor>,
}

impl Subscriber {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Waits for the next published event. Never returns `None`: a
    /// subscriber only stops receiving when dropped or evicted, at which
    /// point nothing else calls `recv`.
    pub async fn recv(&self) -> Bytes {
        loop {
            if let Some(item) = self.inner.buffer.lock().pop_front() {
                return item;
            }
            self.inner.notify.notified().await;
        }
    }

    pub fn pause(&self) {
        self.inner.paused.store(true, Ordering::Release);
    }

    pub fn resume(&self) {
        self.inner.paused.store(false, Ordering::Release);
    }

    pub fn is_paused(&self) -> bool {
        self.inner.paused.load(Ordering::Acquire)
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        self.distributor.remove(&self.topic, self.id);
    }
}
