//! Sessions: authenticated user contexts that survive channel loss.
//!
//! A session is created over a channel, activated with a user identity,
//! and from then on identified purely by its authentication token, so a
//! client can re-bind it to a new channel after a transport drop. Losing
//! the channel flips an active session to `Screwed`; only the watchdog
//! timeout (or an explicit CloseSession) ends it.

use std::collections::{BTreeMap, HashMap};

use tokio::time::{Duration, Instant};
use tracing::debug;

use crate::messages::ReferenceDescription;
use crate::server::publish::PublishQueue;
use crate::server::subscription::Subscription;
use crate::types::{ByteString, DateTime, NodeId};

/// Session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// Created, not yet activated.
    New,
    /// Activated and bound to a live channel.
    Active,
    /// Lost its channel; waiting for re-activation or timeout.
    Screwed,
    /// Closed; resources released.
    Closed,
    /// Terminal bookkeeping state.
    Disposed,
}

/// Why a session is being closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    Timeout,
    Terminated,
    CloseSession,
    Forcing,
}

/// The authenticated identity bound at ActivateSession. Transfer between
/// sessions requires equal identities.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum UserIdentity {
    #[default]
    Anonymous,
    UserName {
        user: String,
        /// Digest of the credential material, for transfer comparison.
        key: ByteString,
    },
}

/// Saved browse state for BrowseNext.
pub struct BrowseContinuationPoint {
    pub id: ByteString,
    pub remaining: Vec<ReferenceDescription>,
    pub max_references: usize,
}

/// One session.
pub struct Session {
    pub session_id: NodeId,
    pub authentication_token: NodeId,
    pub name: String,
    pub status: SessionStatus,
    /// Revised timeout in milliseconds.
    pub timeout_ms: f64,
    pub last_activity: Instant,
    /// Connection currently owning this session; `None` while screwed.
    pub connection_id: Option<u64>,
    pub user_identity: UserIdentity,
    /// Client application URI from CreateSession, checked on re-binding.
    pub client_application_uri: String,
    pub server_nonce: ByteString,
    pub created_at: DateTime,
    pub subscriptions: BTreeMap<u32, Subscription>,
    pub publish_queue: PublishQueue,
    pub continuation_points: Vec<BrowseContinuationPoint>,
    /// RegisterNodes alias table. This server registers identity
    /// mappings, the table tracks what must be unregistered.
    pub registered_nodes: HashMap<NodeId, NodeId>,
    /// Final StatusChange messages of closed subscriptions, waiting for a
    /// Publish credit to deliver them.
    pub pending_status_changes: Vec<(u32, crate::messages::NotificationMessage)>,
}

impl Session {
    pub fn new(
        session_id: NodeId,
        authentication_token: NodeId,
        name: String,
        timeout_ms: f64,
        connection_id: u64,
        client_application_uri: String,
        now: Instant,
    ) -> Self {
        Self {
            session_id,
            authentication_token,
            name,
            status: SessionStatus::New,
            timeout_ms,
            last_activity: now,
            connection_id: Some(connection_id),
            user_identity: UserIdentity::Anonymous,
            client_application_uri,
            server_nonce: ByteString::null(),
            created_at: DateTime::now(),
            subscriptions: BTreeMap::new(),
            publish_queue: PublishQueue::default(),
            continuation_points: Vec::new(),
            registered_nodes: HashMap::new(),
            pending_status_changes: Vec::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }

    /// Every valid service request resets the watchdog.
    pub fn touch(&mut self, now: Instant) {
        self.last_activity = now;
    }

    /// When the watchdog fires for this session.
    pub fn watchdog_deadline(&self) -> Option<Instant> {
        match self.status {
            SessionStatus::Closed | SessionStatus::Disposed => None,
            _ => Some(self.last_activity + Duration::from_micros((self.timeout_ms * 1000.0) as u64)),
        }
    }

    pub fn timed_out(&self, now: Instant) -> bool {
        self.watchdog_deadline().is_some_and(|deadline| now >= deadline)
    }

    /// The owning channel went away. Active sessions become screwed and
    /// live on until the watchdog fires.
    pub fn on_channel_lost(&mut self) {
        if self.status == SessionStatus::Active || self.status == SessionStatus::New {
            debug!(session = %self.session_id, "channel lost, session screwed");
            self.status = SessionStatus::Screwed;
            self.connection_id = None;
        }
    }

    /// Bind to a (possibly new) channel on ActivateSession.
    pub fn bind_channel(&mut self, connection_id: u64, now: Instant) {
        self.connection_id = Some(connection_id);
        self.status = SessionStatus::Active;
        self.touch(now);
    }

    /// Identities must match for TransferSubscriptions: same token type
    /// and same key material.
    pub fn same_identity(&self, other: &Session) -> bool {
        self.user_identity == other.user_identity
    }

    pub fn store_continuation_point(
        &mut self,
        point: BrowseContinuationPoint,
        max_points: usize,
    ) -> bool {
        if self.continuation_points.len() >= max_points {
            return false;
        }
        self.continuation_points.push(point);
        true
    }

    pub fn take_continuation_point(&mut self, id: &ByteString) -> Option<BrowseContinuationPoint> {
        let position = self.continuation_points.iter().position(|p| &p.id == id)?;
        Some(self.continuation_points.remove(position))
    }
}

/// Revise a requested session timeout into the configured window.
pub fn revise_session_timeout(requested_ms: f64, min_ms: f64, max_ms: f64) -> f64 {
    if !requested_ms.is_finite() || requested_ms <= 0.0 {
        return min_ms;
    }
    requested_ms.clamp(min_ms, max_ms)
}
