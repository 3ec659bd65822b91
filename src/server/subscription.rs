//! Subscriptions: the per-subscription publish timer, keep-alive and
//! lifetime counters, notification assembly and the republish buffer.
//!
//! State machine:
//!
//! ```text
//!   Creating -> Normal <-> Late <-> KeepAlive -> Closed
//! ```
//!
//! `Closed` is terminal and always emits a final StatusChange.

use std::collections::BTreeMap;
use std::collections::VecDeque;

use tokio::time::{Duration, Instant};
use tracing::{debug, trace};

use crate::config::ServerConfig;
use crate::messages::{EventFieldList, MonitoredItemNotification, NotificationMessage};
use crate::server::monitored_item::MonitoredItem;
use crate::types::{DateTime, StatusCode};

/// Smallest keep-alive count a client may request.
const MIN_KEEP_ALIVE_COUNT: u32 = 1;
/// Lifetime must cover at least three keep-alive periods.
const LIFETIME_KEEP_ALIVE_FACTOR: u32 = 3;
/// Durable subscription ceiling, in hours.
pub const MAX_DURABLE_LIFETIME_HOURS: u32 = 2400;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Creating,
    Normal,
    Late,
    KeepAlive,
    Closed,
}

/// Result of one publishing-timer tick.
#[derive(Debug, Default)]
pub struct TickOutcome {
    /// Messages ready to hand to parked Publish requests, one credit
    /// each, in order.
    pub ready: Vec<NotificationMessage>,
    /// The subscription closed this tick.
    pub closed: bool,
    /// The final StatusChange of a closed subscription. Delivered with a
    /// credit when one is parked, stashed by the session otherwise.
    pub status_change: Option<NotificationMessage>,
}

/// One subscription and everything it owns.
pub struct Subscription {
    pub id: u32,
    pub publishing_interval: f64,
    pub lifetime_count: u32,
    pub max_keep_alive_count: u32,
    pub max_notifications_per_publish: usize,
    pub priority: u8,
    pub publishing_enabled: bool,
    pub state: SubscriptionState,
    pub monitored_items: BTreeMap<u32, MonitoredItem>,
    next_item_id_seed: u32,
    next_sequence_number: u32,
    keep_alive_counter: u32,
    lifetime_counter: u32,
    next_tick: Instant,
    /// Undelivered messages waiting for a publish credit.
    pending: VecDeque<NotificationMessage>,
    /// Dispatched messages retained for Republish until acknowledged.
    retransmission: VecDeque<NotificationMessage>,
    retransmission_cap: usize,
    /// Durable lifetime in hours once SetSubscriptionDurable succeeded.
    pub durable_lifetime_hours: Option<u32>,
}

/// Clamp requested timing parameters per server policy.
pub fn revise_parameters(
    config: &ServerConfig,
    requested_publishing_interval: f64,
    requested_lifetime_count: u32,
    requested_max_keep_alive_count: u32,
) -> (f64, u32, u32) {
    let publishing_interval = if requested_publishing_interval.is_finite() {
        requested_publishing_interval.max(config.min_publishing_interval)
    } else {
        config.min_publishing_interval
    };
    let max_keep_alive = requested_max_keep_alive_count.max(MIN_KEEP_ALIVE_COUNT);
    let lifetime = requested_lifetime_count.max(max_keep_alive * LIFETIME_KEEP_ALIVE_FACTOR);
    (publishing_interval, lifetime, max_keep_alive)
}

impl Subscription {
    pub fn new(
        id: u32,
        config: &ServerConfig,
        requested_publishing_interval: f64,
        requested_lifetime_count: u32,
        requested_max_keep_alive_count: u32,
        max_notifications_per_publish: u32,
        publishing_enabled: bool,
        priority: u8,
        now: Instant,
    ) -> Self {
        let (publishing_interval, lifetime_count, max_keep_alive_count) = revise_parameters(
            config,
            requested_publishing_interval,
            requested_lifetime_count,
            requested_max_keep_alive_count,
        );
        let retransmission_cap = (2 * max_keep_alive_count + max_keep_alive_count.min(100)) as usize;
        Self {
            id,
            publishing_interval,
            lifetime_count,
            max_keep_alive_count,
            max_notifications_per_publish: if max_notifications_per_publish == 0 {
                usize::MAX
            } else {
                max_notifications_per_publish as usize
            },
            priority,
            publishing_enabled,
            state: SubscriptionState::Creating,
            monitored_items: BTreeMap::new(),
            next_item_id_seed: 0,
            next_sequence_number: 1,
            keep_alive_counter: 0,
            lifetime_counter: 0,
            next_tick: now + interval_duration(publishing_interval),
            pending: VecDeque::new(),
            retransmission: VecDeque::new(),
            retransmission_cap,
            durable_lifetime_hours: None,
        }
    }

    /// Apply ModifySubscription semantics, revising as on create.
    pub fn modify(
        &mut self,
        config: &ServerConfig,
        requested_publishing_interval: f64,
        requested_lifetime_count: u32,
        requested_max_keep_alive_count: u32,
        max_notifications_per_publish: u32,
        priority: u8,
    ) -> (f64, u32, u32) {
        let (publishing_interval, lifetime_count, max_keep_alive_count) = revise_parameters(
            config,
            requested_publishing_interval,
            requested_lifetime_count,
            requested_max_keep_alive_count,
        );
        self.publishing_interval = publishing_interval;
        self.lifetime_count = lifetime_count;
        self.max_keep_alive_count = max_keep_alive_count;
        self.max_notifications_per_publish = if max_notifications_per_publish == 0 {
            usize::MAX
        } else {
            max_notifications_per_publish as usize
        };
        self.priority = priority;
        self.retransmission_cap =
            (2 * max_keep_alive_count + max_keep_alive_count.min(100)) as usize;
        (publishing_interval, lifetime_count, max_keep_alive_count)
    }

    pub fn next_tick(&self) -> Instant {
        self.next_tick
    }

    pub fn next_item_id(&mut self) -> u32 {
        self.next_item_id_seed += 1;
        self.next_item_id_seed
    }

    pub fn is_closed(&self) -> bool {
        self.state == SubscriptionState::Closed
    }

    /// Sequence numbers still held for Republish.
    pub fn available_sequence_numbers(&self) -> Vec<u32> {
        self.retransmission.iter().map(|m| m.sequence_number).collect()
    }

    fn take_sequence_number(&mut self) -> u32 {
        let seq = self.next_sequence_number;
        // Wrap skips 0.
        self.next_sequence_number = self.next_sequence_number.checked_add(1).unwrap_or(1);
        seq
    }

    // ------------------------------------------------------------------
    // TICK
    // ------------------------------------------------------------------

    /// One firing of the publishing timer.
    ///
    /// `credits` is the number of parked Publish requests the caller can
    /// spend; at most that many messages come back in
    /// [`TickOutcome::ready`].
    pub fn tick(&mut self, now: Instant, credits: usize) -> TickOutcome {
        if self.state == SubscriptionState::Closed {
            return TickOutcome::default();
        }
        self.next_tick = now + interval_duration(self.publishing_interval);
        if self.state == SubscriptionState::Creating {
            self.state = SubscriptionState::Normal;
        }

        let mut outcome = TickOutcome::default();

        // 1. Collect reportable notifications from items in Reporting mode,
        // plus the flushed queues of items they trigger. With publishing
        // disabled the item queues keep accumulating untouched.
        let (data, events) = if self.publishing_enabled {
            self.collect_reportable()
        } else {
            (Vec::new(), Vec::new())
        };
        let has_notifications = !data.is_empty() || !events.is_empty() || !self.pending.is_empty();

        if has_notifications {
            self.package_notifications(data, events);
            outcome.ready = self.dispatch_up_to(credits);
            if !outcome.ready.is_empty() {
                self.keep_alive_counter = 0;
                self.lifetime_counter = 0;
            }
            if self.pending.is_empty() {
                self.state = SubscriptionState::Normal;
            } else {
                self.state = SubscriptionState::Late;
                trace!(subscription = self.id, "late: notifications outnumber publish credits");
            }
        } else {
            // 3. Keep-alive when idle long enough.
            self.keep_alive_counter += 1;
            if self.keep_alive_counter >= self.max_keep_alive_count && credits > 0 {
                let message =
                    NotificationMessage::keep_alive(self.take_sequence_number(), DateTime::now());
                self.remember(message.clone());
                outcome.ready.push(message);
                self.keep_alive_counter = 0;
                self.lifetime_counter = 0;
                self.state = SubscriptionState::KeepAlive;
            }
            // Without a credit the counter stays saturated; the keep-
            // alive goes out with the next parked Publish.
        }

        // 4. Lifetime accounting: any tick that dispatched nothing ages
        // the subscription.
        if outcome.ready.is_empty() {
            self.lifetime_counter += 1;
            if self.lifetime_counter >= self.lifetime_count {
                debug!(subscription = self.id, "lifetime expired, closing");
                outcome.closed = true;
                self.state = SubscriptionState::Closed;
                outcome.status_change = NotificationMessage::status_change(
                    self.take_sequence_number(),
                    DateTime::now(),
                    StatusCode::BAD_TIMEOUT,
                )
                .ok();
            }
        }

        outcome
    }

    /// One Publish credit arrived outside the timer: hand back a pending
    /// (late) message or an overdue keep-alive.
    pub fn on_publish_available(&mut self) -> Option<NotificationMessage> {
        if self.state == SubscriptionState::Closed {
            return None;
        }
        if !self.pending.is_empty() {
            self.keep_alive_counter = 0;
            self.lifetime_counter = 0;
            let message = self.dispatch_up_to(1).pop();
            self.state = if self.pending.is_empty() {
                SubscriptionState::Normal
            } else {
                SubscriptionState::Late
            };
            return message;
        }
        if self.keep_alive_counter >= self.max_keep_alive_count {
            let message =
                NotificationMessage::keep_alive(self.take_sequence_number(), DateTime::now());
            self.remember(message.clone());
            self.keep_alive_counter = 0;
            self.lifetime_counter = 0;
            self.state = SubscriptionState::KeepAlive;
            return Some(message);
        }
        None
    }

    fn collect_reportable(&mut self) -> (Vec<MonitoredItemNotification>, Vec<EventFieldList>) {
        use crate::messages::MonitoringMode;

        let mut data = Vec::new();
        let mut events = Vec::new();
        let mut flush_later: Vec<u32> = Vec::new();

        let reporting_ids: Vec<u32> = self
            .monitored_items
            .values()
            .filter(|item| item.monitoring_mode == MonitoringMode::Reporting)
            .map(|item| item.id)
            .collect();
        for id in reporting_ids {
            let Some(item) = self.monitored_items.get_mut(&id) else {
                continue;
            };
            if !item.has_notifications() {
                continue;
            }
            let (mut d, mut e) = item.drain();
            data.append(&mut d);
            events.append(&mut e);
            // Linked items flush alongside their trigger. Removed link
            // targets are silent no-ops.
            flush_later.extend(item.triggered_items.iter().copied());
        }
        for id in flush_later {
            if let Some(linked) = self.monitored_items.get_mut(&id) {
                if linked.monitoring_mode == MonitoringMode::Sampling && linked.has_notifications()
                {
                    let (mut d, mut e) = linked.drain();
                    data.append(&mut d);
                    events.append(&mut e);
                }
            }
        }
        (data, events)
    }

    /// Package collected notifications into one or more messages under
    /// `max_notifications_per_publish`.
    fn package_notifications(
        &mut self,
        data: Vec<MonitoredItemNotification>,
        events: Vec<EventFieldList>,
    ) {
        if data.is_empty() && events.is_empty() {
            return;
        }
        let cap = self.max_notifications_per_publish.max(1);
        let mut data = data.into_iter().peekable();
        let mut events = events.into_iter().peekable();
        while data.peek().is_some() || events.peek().is_some() {
            let mut chunk_data = Vec::new();
            let mut chunk_events = Vec::new();
            while chunk_data.len() + chunk_events.len() < cap {
                if let Some(d) = data.next() {
                    chunk_data.push(d);
                } else if let Some(e) = events.next() {
                    chunk_events.push(e);
                } else {
                    break;
                }
            }
            let sequence_number = self.take_sequence_number();
            if let Ok(message) = NotificationMessage::data_change(
                sequence_number,
                DateTime::now(),
                chunk_data,
                chunk_events,
            ) {
                self.pending.push_back(message);
            }
        }
    }

    fn dispatch_up_to(&mut self, credits: usize) -> Vec<NotificationMessage> {
        let count = credits.min(self.pending.len());
        let messages: Vec<NotificationMessage> = self.pending.drain(..count).collect();
        for message in &messages {
            self.remember(message.clone());
        }
        messages
    }

    fn remember(&mut self, message: NotificationMessage) {
        self.retransmission.push_back(message);
        while self.retransmission.len() > self.retransmission_cap {
            let evicted = self.retransmission.pop_front();
            if let Some(evicted) = evicted {
                trace!(
                    subscription = self.id,
                    seq = evicted.sequence_number,
                    "retransmission entry evicted before acknowledgement"
                );
            }
        }
    }

    /// How many messages wait for a credit (for `moreNotifications`).
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    // ------------------------------------------------------------------
    // ACK / REPUBLISH
    // ------------------------------------------------------------------

    /// Acknowledge one sequence number, evicting it from the
    /// retransmission queue.
    pub fn acknowledge(&mut self, sequence_number: u32) -> StatusCode {
        let before = self.retransmission.len();
        self.retransmission
            .retain(|m| m.sequence_number != sequence_number);
        if self.retransmission.len() < before {
            StatusCode::GOOD
        } else {
            StatusCode::BAD_SEQUENCE_NUMBER_UNKNOWN
        }
    }

    /// Fetch a retained message for Republish.
    pub fn republish(&self, sequence_number: u32) -> Result<NotificationMessage, StatusCode> {
        self.retransmission
            .iter()
            .find(|m| m.sequence_number == sequence_number)
            .cloned()
            .ok_or(StatusCode::BAD_MESSAGE_NOT_AVAILABLE)
    }

    /// SetSubscriptionDurable: only while no monitored items exist.
    pub fn set_durable(&mut self, lifetime_hours: u32) -> Result<u32, StatusCode> {
        if !self.monitored_items.is_empty() {
            return Err(StatusCode::BAD_INVALID_STATE);
        }
        let revised = match lifetime_hours {
            0 => MAX_DURABLE_LIFETIME_HOURS,
            h => h.clamp(1, MAX_DURABLE_LIFETIME_HOURS),
        };
        self.durable_lifetime_hours = Some(revised);
        // Lifetime expressed in publishing intervals.
        let interval_ms = self.publishing_interval.max(1.0);
        let ticks = (f64::from(revised) * 3_600_000.0 / interval_ms).min(f64::from(u32::MAX));
        self.lifetime_count = (ticks as u32).max(self.max_keep_alive_count * LIFETIME_KEEP_ALIVE_FACTOR);
        Ok(revised)
    }
}

fn interval_duration(interval_ms: f64) -> Duration {
    Duration::from_micros((interval_ms.max(0.0) * 1000.0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{MonitoringFilter, MonitoringMode, TimestampsToReturn};
    use crate::server::monitored_item::MonitoredItem;
    use crate::types::{DataValue, NodeId, Variant};

    fn config() -> ServerConfig {
        ServerConfig::default()
    }

    fn subscription(id: u32, interval: f64, lifetime: u32, keep_alive: u32) -> Subscription {
        Subscription::new(
            id,
            &config(),
            interval,
            lifetime,
            keep_alive,
            0,
            true,
            0,
            Instant::now(),
        )
    }

    fn add_reporting_item(sub: &mut Subscription) -> u32 {
        let id = sub.next_item_id();
        let item = MonitoredItem::new(
            id,
            NodeId::new_string(1, "v"),
            crate::types::AttributeId::Value as u32,
            7,
            0.0,
            10,
            true,
            MonitoringFilter::None,
            MonitoringMode::Reporting,
            TimestampsToReturn::Both,
        );
        sub.monitored_items.insert(id, item);
        id
    }

    #[tokio::test(start_paused = true)]
    async fn revision_enforces_floors() {
        let (interval, lifetime, keep_alive) = revise_parameters(&config(), 1.0, 2, 0);
        assert_eq!(interval, 100.0);
        assert_eq!(keep_alive, 1);
        assert_eq!(lifetime, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn lifetime_floor_tracks_keep_alive() {
        let (_, lifetime, keep_alive) = revise_parameters(&config(), 100.0, 5, 10);
        assert_eq!(keep_alive, 10);
        assert_eq!(lifetime, 30);
    }

    #[tokio::test(start_paused = true)]
    async fn keep_alive_emitted_after_max_count() {
        let mut sub = subscription(1, 100.0, 60, 10);
        // Nine idle ticks: nothing.
        for _ in 0..9 {
            let outcome = sub.tick(Instant::now(), 1);
            assert!(outcome.ready.is_empty());
        }
        // The tenth tick emits the keep-alive with sequence number 1.
        let outcome = sub.tick(Instant::now(), 1);
        assert_eq!(outcome.ready.len(), 1);
        assert!(outcome.ready[0].is_keep_alive());
        assert_eq!(outcome.ready[0].sequence_number, 1);

        // And the next keep-alive takes the next sequence number.
        for _ in 0..9 {
            assert!(sub.tick(Instant::now(), 1).ready.is_empty());
        }
        let outcome = sub.tick(Instant::now(), 1);
        assert_eq!(outcome.ready[0].sequence_number, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn notifications_dispatch_with_sequence_one() {
        let mut sub = subscription(1, 100.0, 60, 10);
        let item_id = add_reporting_item(&mut sub);
        sub.monitored_items
            .get_mut(&item_id)
            .unwrap()
            .sample(Instant::now(), DataValue::new(1.5, crate::types::DateTime::now()));
        let outcome = sub.tick(Instant::now(), 1);
        assert_eq!(outcome.ready.len(), 1);
        assert!(!outcome.ready[0].is_keep_alive());
        assert_eq!(outcome.ready[0].sequence_number, 1);
        assert_eq!(sub.available_sequence_numbers(), vec![1]);
    }

    #[tokio::test(start_paused = true)]
    async fn late_state_holds_notifications_until_credit() {
        let mut sub = subscription(1, 100.0, 60, 10);
        let item_id = add_reporting_item(&mut sub);
        sub.monitored_items
            .get_mut(&item_id)
            .unwrap()
            .sample(Instant::now(), DataValue::new(1.5, crate::types::DateTime::now()));
        let outcome = sub.tick(Instant::now(), 0);
        assert!(outcome.ready.is_empty());
        assert_eq!(sub.state, SubscriptionState::Late);
        assert_eq!(sub.pending_count(), 1);

        let drained = sub.on_publish_available();
        assert!(drained.is_some());
        assert_eq!(sub.state, SubscriptionState::Normal);
        assert!(sub.on_publish_available().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn lifetime_expiry_closes_with_status_change() {
        let mut sub = subscription(1, 100.0, 3, 1);
        // Ticks with no publish parked: keep-alives cannot be sent either.
        let mut closed = false;
        for _ in 0..3 {
            let outcome = sub.tick(Instant::now(), 0);
            if outcome.closed {
                closed = true;
                let status_change = outcome.status_change.unwrap();
                assert!(!status_change.is_keep_alive());
                break;
            }
        }
        assert!(closed);
        assert!(sub.is_closed());
        // A closed subscription ignores further ticks.
        assert!(sub.tick(Instant::now(), 1).ready.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn publishing_disabled_emits_keep_alives_only() {
        let mut sub = subscription(1, 100.0, 60, 5);
        sub.publishing_enabled = false;
        let item_id = add_reporting_item(&mut sub);
        for tick in 1..=5 {
            sub.monitored_items
                .get_mut(&item_id)
                .unwrap()
                .sample(Instant::now(), DataValue::new(tick as f64, crate::types::DateTime::now()));
            let outcome = sub.tick(Instant::now(), 1);
            if tick < 5 {
                assert!(outcome.ready.is_empty());
            } else {
                assert_eq!(outcome.ready.len(), 1);
                assert!(outcome.ready[0].is_keep_alive());
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn max_notifications_per_publish_splits_messages() {
        let mut sub = Subscription::new(
            1,
            &config(),
            100.0,
            60,
            10,
            2,
            true,
            0,
            Instant::now(),
        );
        let item_id = add_reporting_item(&mut sub);
        let item = sub.monitored_items.get_mut(&item_id).unwrap();
        for v in 0..5 {
            item.sample(Instant::now(), DataValue::new(f64::from(v), crate::types::DateTime::now()));
        }
        let outcome = sub.tick(Instant::now(), 8);
        assert_eq!(outcome.ready.len(), 3);
        let sequence: Vec<u32> = outcome.ready.iter().map(|m| m.sequence_number).collect();
        assert_eq!(sequence, vec![1, 2, 3]);

        // With a single credit only the first goes out; the rest wait.
        let mut sub = Subscription::new(2, &config(), 100.0, 60, 10, 2, true, 0, Instant::now());
        let item_id = add_reporting_item(&mut sub);
        let item = sub.monitored_items.get_mut(&item_id).unwrap();
        for v in 0..5 {
            item.sample(Instant::now(), DataValue::new(f64::from(v), crate::types::DateTime::now()));
        }
        let outcome = sub.tick(Instant::now(), 1);
        assert_eq!(outcome.ready.len(), 1);
        assert_eq!(sub.state, SubscriptionState::Late);
        assert_eq!(sub.pending_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn acknowledge_evicts_and_republish_misses() {
        let mut sub = subscription(1, 100.0, 60, 10);
        let item_id = add_reporting_item(&mut sub);
        sub.monitored_items
            .get_mut(&item_id)
            .unwrap()
            .sample(Instant::now(), DataValue::new(1.0, crate::types::DateTime::now()));
        sub.tick(Instant::now(), 1);

        assert!(sub.republish(1).is_ok());
        assert_eq!(sub.acknowledge(1), StatusCode::GOOD);
        assert_eq!(sub.acknowledge(1), StatusCode::BAD_SEQUENCE_NUMBER_UNKNOWN);
        assert_eq!(
            sub.republish(1).unwrap_err(),
            StatusCode::BAD_MESSAGE_NOT_AVAILABLE
        );
    }

    #[tokio::test(start_paused = true)]
    async fn retransmission_cap_evicts_oldest() {
        let mut sub = subscription(1, 100.0, 10_000, 1);
        let cap = 2 * 1 + 1;
        // Keep-alives consume sequence numbers and fill the queue.
        for _ in 0..(cap + 3) {
            let outcome = sub.tick(Instant::now(), 1);
            assert_eq!(outcome.ready.len(), 1);
        }
        let available = sub.available_sequence_numbers();
        assert_eq!(available.len(), cap);
        // Oldest entries are gone.
        assert_eq!(
            sub.republish(1).unwrap_err(),
            StatusCode::BAD_MESSAGE_NOT_AVAILABLE
        );
    }

    #[tokio::test(start_paused = true)]
    async fn durable_requires_no_items() {
        let mut sub = subscription(1, 100.0, 60, 10);
        assert_eq!(sub.set_durable(0).unwrap(), MAX_DURABLE_LIFETIME_HOURS);
        assert_eq!(sub.set_durable(5000).unwrap(), MAX_DURABLE_LIFETIME_HOURS);
        assert_eq!(sub.set_durable(12).unwrap(), 12);
        add_reporting_item(&mut sub);
        assert_eq!(sub.set_durable(1).unwrap_err(), StatusCode::BAD_INVALID_STATE);
    }

    #[tokio::test(start_paused = true)]
    async fn triggered_item_flushes_with_trigger() {
        let mut sub = subscription(1, 100.0, 60, 10);
        let reporting = add_reporting_item(&mut sub);
        let sampling_id = sub.next_item_id();
        let mut sampling_item = MonitoredItem::new(
            sampling_id,
            NodeId::new_string(1, "linked"),
            crate::types::AttributeId::Value as u32,
            8,
            0.0,
            10,
            true,
            MonitoringFilter::None,
            MonitoringMode::Sampling,
            TimestampsToReturn::Both,
        );
        sampling_item.sample(Instant::now(), DataValue::new(9.0, crate::types::DateTime::now()));
        sub.monitored_items.insert(sampling_id, sampling_item);
        sub.monitored_items
            .get_mut(&reporting)
            .unwrap()
            .triggered_items
            .insert(sampling_id);

        // Sampling alone does not report.
        let outcome = sub.tick(Instant::now(), 1);
        assert!(outcome.ready.is_empty());

        // When the triggering item reports, the linked queue flushes into
        // the same message.
        sub.monitored_items
            .get_mut(&reporting)
            .unwrap()
            .sample(Instant::now(), DataValue::new(1.0, crate::types::DateTime::now()));
        sub.monitored_items
            .get_mut(&sampling_id)
            .unwrap()
            .sample(Instant::now(), DataValue::new(10.0, crate::types::DateTime::now()));
        let outcome = sub.tick(Instant::now(), 1);
        assert_eq!(outcome.ready.len(), 1);
        let body: crate::messages::DataChangeNotification = outcome.ready[0]
            .notification_data
            .as_ref()
            .unwrap()[0]
            .decode_body(&crate::types::DecodingLimits::default())
            .unwrap();
        let handles: Vec<u32> = body
            .monitored_items
            .unwrap()
            .iter()
            .map(|n| n.client_handle)
            .collect();
        // The trigger's own change plus both queued linked samples.
        assert_eq!(handles, vec![7, 8, 8]);
    }
}
