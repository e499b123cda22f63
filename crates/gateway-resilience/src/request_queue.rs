//! Advisory request queue.
//!
//! Throttled callers receive a [`QueueTicket`] describing how many callers are
//! ahead of them and roughly how long they will wait. The queue does not
//! schedule anything and is not durable.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use gateway_core::{Clock, Identity, LatencyEstimator, Tier};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// Queue lane
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lane {
    /// Premium callers, served first
    Premium,
    /// Free callers
    Free,
}

impl From<Tier> for Lane {
    fn from(tier: Tier) -> Self {
        match tier {
            Tier::Premium => Self::Premium,
            Tier::Free => Self::Free,
        }
    }
}

/// Caller's place in the queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueTicket {
    /// Ticket ID
    pub id: Uuid,
    /// Identity holding the ticket
    pub identity_id: String,
    /// Lane the ticket is in
    pub lane: Lane,
    /// Live tickets ahead in the same lane
    pub position: usize,
    /// Estimated wait in milliseconds
    pub estimated_wait_ms: u64,
    /// When the ticket was issued
    pub enqueued_at: DateTime<Utc>,
}

/// Queue configuration
#[derive(Debug, Clone)]
pub struct RequestQueueConfig {
    /// Per-call latency assumed when no backend call has been observed
    pub default_latency: Duration,
    /// Tickets older than this are swept
    pub ticket_ttl: Duration,
}

impl Default for RequestQueueConfig {
    fn default() -> Self {
        Self {
            default_latency: Duration::from_secs(2),
            ticket_ttl: Duration::from_secs(300),
        }
    }
}

/// Ordering key: arrival time, then issue sequence
type SlotKey = (DateTime<Utc>, u64);

#[derive(Debug)]
struct Slot {
    id: Uuid,
    identity_id: String,
}

#[derive(Debug, Default)]
struct Lanes {
    premium: BTreeMap<SlotKey, Slot>,
    free: BTreeMap<SlotKey, Slot>,
    index: HashMap<Uuid, (Lane, SlotKey)>,
}

impl Lanes {
    fn lane(&self, lane: Lane) -> &BTreeMap<SlotKey, Slot> {
        match lane {
            Lane::Premium => &self.premium,
            Lane::Free => &self.free,
        }
    }

    fn lane_mut(&mut self, lane: Lane) -> &mut BTreeMap<SlotKey, Slot> {
        match lane {
            Lane::Premium => &mut self.premium,
            Lane::Free => &mut self.free,
        }
    }

    fn position(&self, lane: Lane, key: SlotKey) -> usize {
        self.lane(lane).range(..key).count()
    }

    fn remove(&mut self, id: Uuid) -> bool {
        match self.index.remove(&id) {
            Some((lane, key)) => self.lane_mut(lane).remove(&key).is_some(),
            None => false,
        }
    }
}

/// Two-lane advisory queue
pub struct RequestQueue {
    config: RequestQueueConfig,
    clock: Arc<dyn Clock>,
    latency: Option<Arc<dyn LatencyEstimator>>,
    lanes: Mutex<Lanes>,
    sequence: AtomicU64,
}

impl RequestQueue {
    /// Create a queue that estimates waits from `default_latency` only
    #[must_use]
    pub fn new(config: RequestQueueConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            latency: None,
            lanes: Mutex::new(Lanes::default()),
            sequence: AtomicU64::new(0),
        }
    }

    /// Use observed backend latency for wait estimates
    #[must_use]
    pub fn with_latency_estimator(mut self, estimator: Arc<dyn LatencyEstimator>) -> Self {
        self.latency = Some(estimator);
        self
    }

    fn average_latency_ms(&self) -> f64 {
        self.latency
            .as_ref()
            .and_then(|l| l.moving_average_latency_ms())
            .unwrap_or_else(|| self.config.default_latency.as_millis() as f64)
    }

    /// Estimated wait for a caller at `position`
    #[must_use]
    pub fn estimate_wait_ms(&self, position: usize) -> u64 {
        (position as f64 * self.average_latency_ms()).round() as u64
    }

    fn ticket(&self, lanes: &Lanes, id: Uuid) -> Option<QueueTicket> {
        let (lane, key) = *lanes.index.get(&id)?;
        let slot = lanes.lane(lane).get(&key)?;
        let position = lanes.position(lane, key);
        Some(QueueTicket {
            id,
            identity_id: slot.identity_id.clone(),
            lane,
            position,
            estimated_wait_ms: self.estimate_wait_ms(position),
            enqueued_at: key.0,
        })
    }

    fn sweep_locked(&self, lanes: &mut Lanes, now: DateTime<Utc>) -> usize {
        let ttl = ChronoDuration::from_std(self.config.ticket_ttl)
            .unwrap_or_else(|_| ChronoDuration::weeks(52));
        let cutoff = now - ttl;
        let stale: Vec<Uuid> = lanes
            .index
            .iter()
            .filter(|(_, (_, key))| key.0 < cutoff)
            .map(|(id, _)| *id)
            .collect();
        for id in &stale {
            lanes.remove(*id);
        }
        stale.len()
    }

    /// Issue a ticket for `identity`.
    ///
    /// An identity holding a live ticket in its lane gets that ticket back with
    /// a refreshed position instead of a second place in line.
    pub fn enter(&self, identity: &Identity) -> QueueTicket {
        let lane = Lane::from(identity.tier);
        let now = self.clock.now();
        let mut lanes = self.lanes.lock();

        let swept = self.sweep_locked(&mut lanes, now);
        if swept > 0 {
            debug!(swept, "Swept stale queue tickets");
        }

        let existing = lanes
            .lane(lane)
            .values()
            .find(|slot| slot.identity_id == identity.id)
            .map(|slot| slot.id);
        if let Some(ticket) = existing.and_then(|id| self.ticket(&lanes, id)) {
            return ticket;
        }

        let id = Uuid::new_v4();
        let key = (now, self.sequence.fetch_add(1, Ordering::Relaxed));
        lanes.lane_mut(lane).insert(
            key,
            Slot {
                id,
                identity_id: identity.id.clone(),
            },
        );
        lanes.index.insert(id, (lane, key));

        let position = lanes.position(lane, key);
        let ticket = QueueTicket {
            id,
            identity_id: identity.id.clone(),
            lane,
            position,
            estimated_wait_ms: self.estimate_wait_ms(position),
            enqueued_at: now,
        };
        debug!(
            identity = %identity.id,
            lane = ?lane,
            position,
            estimated_wait_ms = ticket.estimated_wait_ms,
            "Queue ticket issued"
        );
        ticket
    }

    /// Give up a ticket; returns false if it was already gone
    pub fn leave(&self, ticket: &QueueTicket) -> bool {
        self.lanes.lock().remove(ticket.id)
    }

    /// Current view of a ticket, or `None` once it left or was swept
    #[must_use]
    pub fn position(&self, ticket: &QueueTicket) -> Option<QueueTicket> {
        let lanes = self.lanes.lock();
        self.ticket(&lanes, ticket.id)
    }

    /// Live tickets in a lane
    #[must_use]
    pub fn lane_len(&self, lane: Lane) -> usize {
        self.lanes.lock().lane(lane).len()
    }

    /// Live tickets across both lanes
    #[must_use]
    pub fn len(&self) -> usize {
        self.lanes.lock().index.len()
    }

    /// Check if no tickets are live
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove tickets older than `ticket_ttl`
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let mut lanes = self.lanes.lock();
        self.sweep_locked(&mut lanes, now)
    }
}

impl std::fmt::Debug for RequestQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestQueue")
            .field("config", &self.config)
            .field("len", &self.len())
            .finish()
    }
}
