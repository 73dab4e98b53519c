//! Filegate client - typed calls over one multiplexed gateway channel
//!
//! The gateway speaks a single persistent, bidirectional message channel.
//! This crate turns that channel into independent, typed request/response
//! operations with timeout, cancellation, and incremental progress.
//!
//! ## Architecture
//!
//! ```text
//! Files (typed facade)
//!     │
//!     └─► GatewayClient::call() ──► channel ──► gateway
//!              │                       │
//!              │                  dispatcher (one per session)
//!              │                       │
//!              └──◄── CallHandle ◄── registry (settle by correlation key)
//! ```
//!
//! Every invocation is tagged with its own correlation key; a single
//! receiver task routes each inbound frame to the matching pending call.
//! A call settles exactly once — result, remote error, timeout,
//! cancellation, or connection close, whichever fires first.
//!
//! ## Usage
//!
//! ```ignore
//! use filegate_client::{Credential, Files, GatewayClient, GatewayConfig};
//! use std::sync::Arc;
//!
//! let client = Arc::new(GatewayClient::new(GatewayConfig::default())?);
//! client.connect(Credential::bearer(token)).await?;
//!
//! let files = Files::new(Arc::clone(&client));
//! let content = files.read_resource("/docs/a.txt").await?;
//!
//! // Transfers expose progress and cancellation through the handle
//! let mut handle = files.start_write("/docs/b.txt", &data).await?;
//! while let Some(event) = handle.progress().await {
//!     println!("{} bytes", event.loaded);
//! }
//! ```
//!
//! No retries happen anywhere in this layer: a failed `connect()` or a
//! settled error is the caller's to handle.

pub mod config;
pub mod error;
pub mod gateway;
pub mod ops;
pub mod progress;
pub mod protocol;
pub mod subscriptions;

// Re-exports
pub use config::GatewayConfig;
pub use error::GatewayError;
pub use gateway::{
    CallHandle, CallOptions, ConnectionState, Connector, Credential, GatewayClient,
    MessageSink, MessageSource, OperationClass, WsConnector,
};
pub use ops::{EntryInfo, EntryKind, Files, ResourceContent};
pub use progress::{Direction, ProgressEvent};
pub use protocol::{Method, OperationRequest};
pub use subscriptions::{ChangeEvent, Subscription};
