//! # Server Configuration
//!
//! Limits and timing knobs of the engine. For most applications the
//! defaults work out of the box:
//!
//! ```no_run
//! use uastack::{Server, ServerConfig};
//!
//! # async fn example() -> uastack::Result<()> {
//! let server = Server::new(ServerConfig::default());
//! # Ok(())
//! # }
//! ```
//!
//! ## Builder Pattern
//!
//! ```
//! use uastack::ServerConfig;
//!
//! let config = ServerConfig::builder()
//!     .application_uri("urn:plant:line4")
//!     .max_sessions(32)
//!     .min_publishing_interval(50.0)
//!     .max_session_timeout(120_000.0)
//!     .build();
//! ```
//!
//! ## Options
//!
//! | Option | Default | Description |
//! |--------|---------|-------------|
//! | `application_uri` | `urn:uastack:server` | Server application URI |
//! | `port` | 4840 | TCP port for `opc.tcp` endpoints |
//! | `max_sessions` | 64 | Admission limit, oldest inactive evicted first |
//! | `max_subscriptions_per_session` | 32 | Admission limit |
//! | `max_monitored_items_per_subscription` | 1000 | Admission limit |
//! | `min_publishing_interval` | 100 ms | Floor for revised publishing intervals |
//! | `min_sampling_interval` | 10 ms | Floor for revised sampling intervals |
//! | `max_session_timeout` | 3 600 000 ms | Ceiling for revised session timeouts |
//! | `max_token_lifetime` | 3 600 000 ms | Ceiling for secure-channel tokens |
//! | `max_publish_requests_per_session` | 8 | Publish FIFO depth |
//! | `max_browse_continuation_points` | 10 | Per session |

use std::time::Duration;

use crate::chunk::TransportLimits;
use crate::types::DecodingLimits;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Application URI advertised in the server array and endpoints.
    pub application_uri: String,
    /// Product URI for endpoint descriptions.
    pub product_uri: String,
    /// Human-readable server name.
    pub application_name: String,
    /// TCP port (`opc.tcp://host:port/`).
    pub port: u16,
    /// Transport limits offered during HEL/ACK.
    pub transport: TransportLimits,
    /// Decoding limits applied to untrusted bytes.
    pub decoding: DecodingLimits,
    /// Ceiling for secure-channel token lifetimes.
    pub max_token_lifetime: Duration,
    /// Admission limit on concurrent sessions.
    pub max_sessions: usize,
    /// Floor applied to revised session timeouts (ms).
    pub min_session_timeout: f64,
    /// Ceiling applied to revised session timeouts (ms).
    pub max_session_timeout: f64,
    /// Admission limit on subscriptions per session.
    pub max_subscriptions_per_session: usize,
    /// Admission limit on monitored items per subscription.
    pub max_monitored_items_per_subscription: usize,
    /// Floor for revised publishing intervals (ms).
    pub min_publishing_interval: f64,
    /// Floor for revised sampling intervals (ms).
    pub min_sampling_interval: f64,
    /// Ceiling for revised sampling intervals (ms).
    pub max_sampling_interval: f64,
    /// Parked Publish requests tolerated per session before the oldest is
    /// completed with `Bad_TooManyPublishRequests`.
    pub max_publish_requests_per_session: usize,
    /// Browse continuation points retained per session.
    pub max_browse_continuation_points: usize,
    /// Ceiling on references returned per browse result before paging.
    pub max_references_per_node: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            application_uri: "urn:uastack:server".to_string(),
            product_uri: "urn:uastack".to_string(),
            application_name: "uastack server".to_string(),
            port: 4840,
            transport: TransportLimits::default(),
            decoding: DecodingLimits::default(),
            max_token_lifetime: Duration::from_secs(3600),
            max_sessions: 64,
            min_session_timeout: 10_000.0,
            max_session_timeout: 3_600_000.0,
            max_subscriptions_per_session: 32,
            max_monitored_items_per_subscription: 1000,
            min_publishing_interval: 100.0,
            min_sampling_interval: 10.0,
            max_sampling_interval: 3_600_000.0,
            max_publish_requests_per_session: 8,
            max_browse_continuation_points: 10,
            max_references_per_node: 1000,
        }
    }
}

impl ServerConfig {
    /// Create a new builder
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }
}

/// Builder for [`ServerConfig`].
#[derive(Default)]
pub struct ServerConfigBuilder {
    config: ServerConfig,
}

impl ServerConfigBuilder {
    pub fn application_uri(mut self, uri: impl Into<String>) -> Self {
        self.config.application_uri = uri.into();
        self
    }

    pub fn application_name(mut self, name: impl Into<String>) -> Self {
        self.config.application_name = name.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn transport_limits(mut self, limits: TransportLimits) -> Self {
        self.config.transport = limits;
        self
    }

    pub fn max_sessions(mut self, max: usize) -> Self {
        self.config.max_sessions = max;
        self
    }

    pub fn max_subscriptions_per_session(mut self, max: usize) -> Self {
        self.config.max_subscriptions_per_session = max;
        self
    }

    pub fn max_monitored_items_per_subscription(mut self, max: usize) -> Self {
        self.config.max_monitored_items_per_subscription = max;
        self
    }

    pub fn min_publishing_interval(mut self, interval_ms: f64) -> Self {
        self.config.min_publishing_interval = interval_ms;
        self
    }

    pub fn min_sampling_interval(mut self, interval_ms: f64) -> Self {
        self.config.min_sampling_interval = interval_ms;
        self
    }

    pub fn max_session_timeout(mut self, timeout_ms: f64) -> Self {
        self.config.max_session_timeout = timeout_ms;
        self
    }

    pub fn max_token_lifetime(mut self, lifetime: Duration) -> Self {
        self.config.max_token_lifetime = lifetime;
        self
    }

    pub fn max_publish_requests_per_session(mut self, max: usize) -> Self {
        self.config.max_publish_requests_per_session = max;
        self
    }

    /// Build the configuration
    pub fn build(self) -> ServerConfig {
        self.config
    }
}
