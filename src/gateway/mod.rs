//! Gateway Connection Module
//!
//! Everything between the caller and the wire, organized by concern:
//!
//! | Module      | Responsibility                                       |
//! |-------------|------------------------------------------------------|
//! | `transport` | Channel seams + WebSocket connect/send/receive       |
//! | `auth`      | Credential and the authenticate handshake            |
//! | `session`   | Correlation registry, `call()`, inbound dispatcher   |
//! | `client`    | Connect/disconnect lifecycle and connected state     |
//!
//! # Key Design Principles
//!
//! ## 1. One Demux Point
//!
//! A single receiver task per session routes every inbound frame by its
//! correlation key. Per-call listeners are registry entries, removed
//! atomically exactly once — there is no ad-hoc listener add/remove on
//! a shared emitter to leak.
//!
//! ## 2. Keys Belong to Invocations
//!
//! Correlation keys come from a per-session counter, never from the
//! operation name. Two concurrent `file.read` calls each settle with
//! their own response, whatever the arrival order.
//!
//! ## 3. Failure Is a Settlement
//!
//! Timeout, cancellation, remote error, and connection close all travel
//! the same settlement path as success. A call settles exactly once;
//! everything after that is a logged no-op.

mod auth;
mod session;
mod transport;

mod client;

#[cfg(test)]
pub(crate) mod testing;

pub use auth::Credential;
pub use client::{ConnectionState, GatewayClient};
pub use session::{CallHandle, CallOptions, OperationClass};
pub use transport::{Connector, MessageSink, MessageSource, WsConnector};
