//! # Engine State (Internal)
//!
//! All mutable engine state lives in [`EngineState`], owned exclusively by
//! the event loop. Service handlers take `&mut EngineState` and return
//! response messages; nothing here is locked. The only state shared
//! outside the loop is the [`Diagnostics`] atomics and the address space
//! behind its `RwLock`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use rand::Rng;
use tokio::time::Instant;

use crate::address_space::AddressSpace;
use crate::config::ServerConfig;
use crate::server::session::Session;
use crate::server::subscription::Subscription;
use crate::types::{ByteString, DateTime, NodeId};

/// Where a subscription currently lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionHome {
    /// Owned by the session with this authentication token.
    Session(NodeId),
    /// Detached, running headless in the orphanage.
    Orphanage,
}

/// Process-unique id generator, seeded at startup from a random base so
/// ids never collide with clients lingering from a previous incarnation.
pub struct IdGenerator {
    next: u32,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self {
            next: rand::thread_rng().gen_range(1..=0x3FFF_FFFF),
        }
    }

    pub fn next(&mut self) -> u32 {
        let id = self.next;
        self.next = self.next.checked_add(1).unwrap_or(1);
        id
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Fresh opaque 16-byte authentication token.
pub fn random_authentication_token() -> NodeId {
    let mut bytes = vec![0u8; 16];
    rand::thread_rng().fill(&mut bytes[..]);
    NodeId::new_opaque(0, ByteString::from_bytes(bytes))
}

// ============================================================================
// DIAGNOSTICS
// ============================================================================

/// Server-wide diagnostics counters, shared with handles. Mirrors the
/// ServerDiagnosticsSummary structure.
#[derive(Debug, Default)]
pub struct Diagnostics {
    pub cumulated_session_count: AtomicU32,
    pub current_session_count: AtomicU32,
    pub rejected_session_count: AtomicU32,
    pub security_rejected_session_count: AtomicU32,
    pub session_timeout_count: AtomicU32,
    pub session_abort_count: AtomicU32,
    pub cumulated_subscription_count: AtomicU32,
    pub current_subscription_count: AtomicU32,
    pub rejected_requests_count: AtomicU32,
    pub security_rejected_requests_count: AtomicU32,
    pub publish_request_count: AtomicU32,
    pub transfer_request_count: AtomicU32,
    pub transferred_to_alt_client_count: AtomicU32,
}

impl Diagnostics {
    pub fn bump(counter: &AtomicU32) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decrement(counter: &AtomicU32) {
        counter.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn get(counter: &AtomicU32) -> u32 {
        counter.load(Ordering::Relaxed)
    }
}

/// Point-in-time copy of the counters, the handle-facing view.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiagnosticsSnapshot {
    pub cumulated_session_count: u32,
    pub current_session_count: u32,
    pub rejected_session_count: u32,
    pub session_timeout_count: u32,
    pub cumulated_subscription_count: u32,
    pub current_subscription_count: u32,
    pub rejected_requests_count: u32,
    pub security_rejected_requests_count: u32,
    pub publish_request_count: u32,
    pub transfer_request_count: u32,
}

impl Diagnostics {
    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            cumulated_session_count: Self::get(&self.cumulated_session_count),
            current_session_count: Self::get(&self.current_session_count),
            rejected_session_count: Self::get(&self.rejected_session_count),
            session_timeout_count: Self::get(&self.session_timeout_count),
            cumulated_subscription_count: Self::get(&self.cumulated_subscription_count),
            current_subscription_count: Self::get(&self.current_subscription_count),
            rejected_requests_count: Self::get(&self.rejected_requests_count),
            security_rejected_requests_count: Self::get(&self.security_rejected_requests_count),
            publish_request_count: Self::get(&self.publish_request_count),
            transfer_request_count: Self::get(&self.transfer_request_count),
        }
    }
}

/// Per-session info mirrored for the handle API.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub session_id: NodeId,
    pub name: String,
    pub created_at: DateTime,
    pub subscription_count: usize,
}

// ============================================================================
// ENGINE STATE
// ============================================================================

/// Central mutable state of one server engine.
pub struct EngineState {
    pub config: ServerConfig,
    pub address_space: Arc<RwLock<AddressSpace>>,
    /// Sessions indexed by authentication token, the key every request
    /// header carries.
    pub sessions: HashMap<NodeId, Session>,
    /// Detached subscriptions running their lifetime counters headless.
    pub orphanage: HashMap<u32, Subscription>,
    /// Global subscription index; ids are server-global so subscriptions
    /// can move between sessions.
    pub subscription_home: HashMap<u32, SubscriptionHome>,
    pub session_ids: IdGenerator,
    pub subscription_ids: IdGenerator,
    pub channel_ids: IdGenerator,
    pub diagnostics: Arc<Diagnostics>,
    /// Mirror of live sessions for the handle API.
    pub session_infos: Arc<DashMap<NodeId, SessionInfo>>,
    pub started_at: DateTime,
}

impl EngineState {
    pub fn new(config: ServerConfig, address_space: Arc<RwLock<AddressSpace>>) -> Self {
        Self {
            config,
            address_space,
            sessions: HashMap::new(),
            orphanage: HashMap::new(),
            subscription_home: HashMap::new(),
            session_ids: IdGenerator::new(),
            subscription_ids: IdGenerator::new(),
            channel_ids: IdGenerator::new(),
            diagnostics: Arc::new(Diagnostics::default()),
            session_infos: Arc::new(DashMap::new()),
            started_at: DateTime::now(),
        }
    }

    /// Earliest deadline across sessions, subscriptions, sampling timers
    /// and orphans, for the event loop's timer.
    pub fn next_deadline(&self, now: Instant) -> Option<Instant> {
        let session_deadlines = self.sessions.values().filter_map(|s| s.watchdog_deadline());
        let subscription_ticks = self
            .sessions
            .values()
            .flat_map(|s| s.subscriptions.values())
            .map(Subscription::next_tick);
        let sampling_deadlines = self
            .sessions
            .values()
            .flat_map(|s| s.subscriptions.values())
            .flat_map(|sub| sub.monitored_items.values())
            .filter_map(|item| item.sampling_deadline(now));
        let orphan_ticks = self.orphanage.values().map(Subscription::next_tick);
        session_deadlines
            .chain(subscription_ticks)
            .chain(sampling_deadlines)
            .chain(orphan_ticks)
            .min()
            // Never sleep in the past; the loop would spin.
            .map(|deadline| deadline.max(now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_generator_is_monotonic_and_nonzero() {
        let mut ids = IdGenerator::new();
        let a = ids.next();
        let b = ids.next();
        assert_ne!(a, 0);
        assert_eq!(b, a + 1);
    }

    #[test]
    fn auth_tokens_are_opaque_and_distinct() {
        let a = random_authentication_token();
        let b = random_authentication_token();
        assert_ne!(a, b);
        match &a.identifier {
            crate::types::Identifier::Opaque(bytes) => assert_eq!(bytes.len(), 16),
            other => panic!("unexpected identifier {other:?}"),
        }
    }

    #[test]
    fn diagnostics_snapshot_reflects_bumps() {
        let diagnostics = Diagnostics::default();
        Diagnostics::bump(&diagnostics.cumulated_session_count);
        Diagnostics::bump(&diagnostics.cumulated_session_count);
        Diagnostics::bump(&diagnostics.publish_request_count);
        let snapshot = diagnostics.snapshot();
        assert_eq!(snapshot.cumulated_session_count, 2);
        assert_eq!(snapshot.publish_request_count, 1);
        assert_eq!(snapshot.current_session_count, 0);
    }
}
