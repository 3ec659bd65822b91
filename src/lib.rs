//! # uastack
//!
//! An async OPC UA (IEC 62541) server stack for tokio.
//!
//! The crate covers the binary wire codec, chunked secure-channel
//! transport, and the server engine: sessions, subscriptions, monitored
//! items and the publish machinery. Cryptography plugs in through
//! [`channel::SecurityPolicy`]; sockets plug in through [`net::Transport`].
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use uastack::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> uastack::Result<()> {
//!     let server = Server::new(ServerConfig::builder().port(4840).build());
//!
//!     // Publish a variable under the Objects folder.
//!     let space = server.address_space();
//!     let speed = NodeId::new_string(1, "Motor.Speed");
//!     {
//!         let mut space = space.write();
//!         space.add_variable(
//!             VariableBuilder::new(speed.clone(), QualifiedName::new(1, "Speed"))
//!                 .parent(NodeId::from(85u32), reference_type_ids::ORGANIZES)
//!                 .value(0.0)
//!                 .writable(),
//!         );
//!     }
//!
//!     server.bind().await?;
//!
//!     loop {
//!         tokio::time::sleep(std::time::Duration::from_millis(100)).await;
//!         server.set_value(&speed, 1480.0);
//!     }
//! }
//! ```
//!
//! ## Layering
//!
//! | Layer | Module |
//! |-------|--------|
//! | Built-in types & codec | [`types`] |
//! | Service messages | [`messages`] |
//! | Chunking | [`chunk`] |
//! | Secure channel | [`channel`] |
//! | Transport seam | [`net`] |
//! | Address space | [`address_space`] |
//! | Engine | [`server`] |

#![warn(clippy::all)]

pub mod address_space;
pub mod channel;
pub mod chunk;
pub mod config;
pub mod error;
pub mod messages;
pub mod net;
pub mod server;
pub mod types;

pub use config::{ServerConfig, ServerConfigBuilder};
pub use error::{Error, Result};
pub use server::{Server, ServerEvent};

pub mod prelude {
    pub use crate::address_space::{
        access_level, AddressSpace, CallContext, MethodCallback, VariableBuilder,
    };
    pub use crate::config::{ServerConfig, ServerConfigBuilder};
    pub use crate::error::{Error, Result};
    pub use crate::server::{DiagnosticsSnapshot, Server, ServerEvent};
    pub use crate::types::ids::{object_ids, reference_type_ids, AttributeId};
    pub use crate::types::{
        ByteString, DataValue, DateTime, Guid, LocalizedText, NodeId, QualifiedName, StatusCode,
        Variant, VariantType,
    };
}
