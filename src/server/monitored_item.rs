//! Monitored items: sampling, filtering and queueing.
//!
//! A data-change item samples its attribute on the subscription's cadence
//! (or on write, when the sampling interval is zero), compares against the
//! last value under the configured trigger and deadband, and queues
//! survivors in a bounded ring. An event item queues projected event
//! fields instead. Queue overflow marks exactly one surviving value with
//! the overflow info bit.

use std::collections::{HashSet, VecDeque};

use tokio::time::{Duration, Instant};
use tracing::trace;

use crate::messages::{
    deadband_type, DataChangeTrigger, EventFieldList, MonitoredItemNotification,
    MonitoringFilter, MonitoringMode, TimestampsToReturn,
};
use crate::types::{DataValue, NodeId, StatusCode, Variant};

/// One queued notification.
#[derive(Debug, Clone, PartialEq)]
pub enum QueuedNotification {
    DataChange(DataValue),
    Event(Vec<Variant>),
}

/// A subscription's interest in one attribute or event source.
pub struct MonitoredItem {
    pub id: u32,
    pub node_id: NodeId,
    pub attribute_id: u32,
    pub client_handle: u32,
    /// Revised sampling interval in ms; 0 means exception-based.
    pub sampling_interval: f64,
    pub queue_size: usize,
    pub discard_oldest: bool,
    pub filter: MonitoringFilter,
    pub monitoring_mode: MonitoringMode,
    pub timestamps_to_return: TimestampsToReturn,
    /// Items whose queues flush when this item reports.
    pub triggered_items: HashSet<u32>,
    queue: VecDeque<QueuedNotification>,
    overflow: bool,
    last_value: Option<DataValue>,
    last_sampled_at: Option<Instant>,
    /// Write version seen at the last exception-based sample.
    pub last_write_version: u64,
}

impl MonitoredItem {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: u32,
        node_id: NodeId,
        attribute_id: u32,
        client_handle: u32,
        sampling_interval: f64,
        queue_size: usize,
        discard_oldest: bool,
        filter: MonitoringFilter,
        monitoring_mode: MonitoringMode,
        timestamps_to_return: TimestampsToReturn,
    ) -> Self {
        Self {
            id,
            node_id,
            attribute_id,
            client_handle,
            sampling_interval,
            queue_size: queue_size.max(1),
            discard_oldest,
            filter,
            monitoring_mode,
            timestamps_to_return,
            triggered_items: HashSet::new(),
            queue: VecDeque::new(),
            overflow: false,
            last_value: None,
            last_sampled_at: None,
            last_write_version: 0,
        }
    }

    pub fn is_event_item(&self) -> bool {
        matches!(self.filter, MonitoringFilter::Event(_))
    }

    /// When this item next wants to be sampled; `None` for event items,
    /// disabled items and exception-based (interval 0) items.
    pub fn sampling_deadline(&self, now: Instant) -> Option<Instant> {
        if self.monitoring_mode == MonitoringMode::Disabled
            || self.is_event_item()
            || self.sampling_interval == 0.0
        {
            return None;
        }
        match self.last_sampled_at {
            None => Some(now),
            Some(last) => {
                Some(last + Duration::from_micros((self.sampling_interval * 1000.0) as u64))
            }
        }
    }

    /// Whether the sampling interval has elapsed since the last sample.
    pub fn due(&self, now: Instant) -> bool {
        if self.monitoring_mode == MonitoringMode::Disabled {
            return false;
        }
        match self.last_sampled_at {
            None => true,
            Some(last) => {
                let interval = Duration::from_micros((self.sampling_interval * 1000.0) as u64);
                now.duration_since(last) >= interval
            }
        }
    }

    /// Offer a sampled value. Applies trigger and deadband; queues when
    /// the value counts as changed.
    pub fn sample(&mut self, now: Instant, value: DataValue) {
        if self.monitoring_mode == MonitoringMode::Disabled {
            return;
        }
        self.last_sampled_at = Some(now);
        let changed = match &self.last_value {
            None => true,
            Some(previous) => self.value_changed(previous, &value),
        };
        if !changed {
            return;
        }
        trace!(item = self.id, node = %self.node_id, "data change queued");
        self.last_value = Some(value.clone());
        self.enqueue(QueuedNotification::DataChange(value));
    }

    /// Queue a projected event.
    pub fn post_event(&mut self, fields: Vec<Variant>) {
        if self.monitoring_mode == MonitoringMode::Disabled {
            return;
        }
        self.enqueue(QueuedNotification::Event(fields));
    }

    fn value_changed(&self, previous: &DataValue, current: &DataValue) -> bool {
        let (trigger, deadband_kind, deadband_value) = match &self.filter {
            MonitoringFilter::DataChange(f) => (f.trigger, f.deadband_type, f.deadband_value),
            _ => (DataChangeTrigger::StatusValue, deadband_type::NONE, 0.0),
        };

        let status_changed = previous.status.sub_code() != current.status.sub_code();
        if trigger == DataChangeTrigger::Status {
            return status_changed;
        }
        // Status changes always pass, deadband or not.
        if status_changed {
            return true;
        }

        let value_changed = if previous.value == current.value {
            false
        } else {
            match (
                deadband_kind,
                previous.value.as_f64(),
                current.value.as_f64(),
            ) {
                (deadband_type::ABSOLUTE, Some(old), Some(new)) => {
                    (new - old).abs() > deadband_value
                }
                // Percent deadband is resolved against the EURange at
                // creation time and rewritten to an absolute threshold.
                _ => true,
            }
        };
        if value_changed {
            return true;
        }

        if trigger == DataChangeTrigger::StatusValueTimestamp {
            return previous.source_timestamp != current.source_timestamp;
        }
        false
    }

    fn enqueue(&mut self, notification: QueuedNotification) {
        if self.queue.len() < self.queue_size {
            self.queue.push_back(notification);
            return;
        }
        // Overflow: keep the newest or the oldest run, and flag exactly
        // one survivor.
        if self.discard_oldest {
            self.queue.pop_front();
            self.queue.push_back(notification);
            if let Some(QueuedNotification::DataChange(head)) = self.queue.front_mut() {
                head.status = head.status.with_overflow();
            }
        } else {
            self.queue.pop_back();
            self.queue.push_back(notification);
            if let Some(QueuedNotification::DataChange(tail)) = self.queue.back_mut() {
                tail.status = tail.status.with_overflow();
            }
        }
        self.overflow = true;
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn has_notifications(&self) -> bool {
        !self.queue.is_empty()
    }

    /// Drain queued notifications into wire form, stripping timestamps the
    /// client did not ask for.
    pub fn drain(&mut self) -> (Vec<MonitoredItemNotification>, Vec<EventFieldList>) {
        let mut data = Vec::new();
        let mut events = Vec::new();
        for queued in self.queue.drain(..) {
            match queued {
                QueuedNotification::DataChange(mut value) => {
                    match self.timestamps_to_return {
                        TimestampsToReturn::Source => value.server_timestamp = None,
                        TimestampsToReturn::Server => value.source_timestamp = None,
                        TimestampsToReturn::Neither => {
                            value.source_timestamp = None;
                            value.server_timestamp = None;
                        }
                        TimestampsToReturn::Both | TimestampsToReturn::Invalid => {}
                    }
                    data.push(MonitoredItemNotification {
                        client_handle: self.client_handle,
                        value,
                    });
                }
                QueuedNotification::Event(fields) => {
                    events.push(EventFieldList {
                        client_handle: self.client_handle,
                        event_fields: Some(fields),
                    });
                }
            }
        }
        self.overflow = false;
        (data, events)
    }

    /// Re-queue the current value, used by TransferSubscriptions with
    /// `sendInitialValues` and by the ResendData method.
    pub fn requeue_last_value(&mut self) {
        if self.is_event_item() {
            return;
        }
        if let Some(value) = self.last_value.clone() {
            self.enqueue(QueuedNotification::DataChange(value));
        }
    }

    /// Forget sampling history, forcing the next sample to report.
    pub fn reset_last_value(&mut self) {
        self.last_value = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::DataChangeFilter;
    use crate::types::DateTime;

    fn item(filter: MonitoringFilter, queue_size: usize, discard_oldest: bool) -> MonitoredItem {
        MonitoredItem::new(
            1,
            NodeId::new_string(1, "v"),
            crate::types::AttributeId::Value as u32,
            100,
            50.0,
            queue_size,
            discard_oldest,
            filter,
            MonitoringMode::Reporting,
            TimestampsToReturn::Both,
        )
    }

    fn value(v: f64) -> DataValue {
        DataValue::new(v, DateTime::now())
    }

    fn deadband(deadband_value: f64) -> MonitoringFilter {
        MonitoringFilter::DataChange(DataChangeFilter {
            trigger: DataChangeTrigger::StatusValue,
            deadband_type: deadband_type::ABSOLUTE,
            deadband_value,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn deadband_suppresses_small_changes() {
        let mut item = item(deadband(0.5), 10, true);
        let now = Instant::now();
        for v in [1.0, 1.2, 1.8, 2.5, 2.6] {
            item.sample(now, value(v));
        }
        let (data, _) = item.drain();
        let reported: Vec<f64> = data
            .iter()
            .filter_map(|n| n.value.value.as_f64())
            .collect();
        assert_eq!(reported, vec![1.0, 1.8, 2.5]);
    }

    #[tokio::test(start_paused = true)]
    async fn status_change_passes_deadband() {
        let mut item = item(deadband(100.0), 10, true);
        let now = Instant::now();
        item.sample(now, value(1.0));
        let mut bad = value(1.0);
        bad.status = StatusCode::BAD_NOT_CONNECTED;
        item.sample(now, bad);
        assert_eq!(item.queue_len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn status_trigger_ignores_value_changes() {
        let mut item = item(
            MonitoringFilter::DataChange(DataChangeFilter {
                trigger: DataChangeTrigger::Status,
                deadband_type: deadband_type::NONE,
                deadband_value: 0.0,
            }),
            10,
            true,
        );
        let now = Instant::now();
        item.sample(now, value(1.0));
        item.sample(now, value(2.0));
        item.sample(now, value(3.0));
        assert_eq!(item.queue_len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn overflow_discard_oldest_keeps_newest() {
        let mut item = item(deadband(0.0), 2, true);
        let now = Instant::now();
        item.sample(now, value(1.0));
        item.sample(now, value(2.0));
        item.sample(now, value(3.0));
        assert_eq!(item.queue_len(), 2);
        let (data, _) = item.drain();
        let values: Vec<f64> = data.iter().filter_map(|n| n.value.value.as_f64()).collect();
        assert_eq!(values, vec![2.0, 3.0]);
        // Exactly one value carries the overflow bit, on the surviving head.
        let flagged: Vec<bool> = data.iter().map(|n| n.value.status.overflow()).collect();
        assert_eq!(flagged, vec![true, false]);
    }

    #[tokio::test(start_paused = true)]
    async fn overflow_discard_newest_keeps_first() {
        let mut item = item(deadband(0.0), 2, false);
        let now = Instant::now();
        item.sample(now, value(1.0));
        item.sample(now, value(2.0));
        item.sample(now, value(3.0));
        let (data, _) = item.drain();
        let values: Vec<f64> = data.iter().filter_map(|n| n.value.value.as_f64()).collect();
        // First N-1 plus the last.
        assert_eq!(values, vec![1.0, 3.0]);
        let flagged: Vec<bool> = data.iter().map(|n| n.value.status.overflow()).collect();
        assert_eq!(flagged, vec![false, true]);
    }

    #[tokio::test(start_paused = true)]
    async fn queue_never_exceeds_queue_size() {
        let mut item = item(deadband(0.0), 4, true);
        let now = Instant::now();
        for v in 0..100 {
            item.sample(now, value(f64::from(v)));
            assert!(item.queue_len() <= 4);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_mode_drops_samples() {
        let mut item = item(deadband(0.0), 4, true);
        item.monitoring_mode = MonitoringMode::Disabled;
        item.sample(Instant::now(), value(1.0));
        assert!(!item.has_notifications());
    }

    #[tokio::test(start_paused = true)]
    async fn sampling_interval_gates_due() {
        let mut item = item(deadband(0.0), 4, true);
        let start = Instant::now();
        assert!(item.due(start));
        item.sample(start, value(1.0));
        assert!(!item.due(start + Duration::from_millis(20)));
        assert!(item.due(start + Duration::from_millis(50)));
    }

    #[tokio::test(start_paused = true)]
    async fn requeue_last_value_repeats_current() {
        let mut item = item(deadband(0.0), 4, true);
        item.sample(Instant::now(), value(7.0));
        let _ = item.drain();
        item.requeue_last_value();
        let (data, _) = item.drain();
        assert_eq!(data.len(), 1);
        assert_eq!(data[0].value.value.as_f64(), Some(7.0));
    }
}
