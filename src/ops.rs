//! Typed file operations over the call primitive
//!
//! Each operation is a pure wrapper: build the `OperationRequest` from
//! typed arguments, delegate to `call()`, decode the opaque payload into
//! a typed result. Decode failures surface as `MalformedResponse`; the
//! wrappers add no behavior of their own — no retries, no caching.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::error::GatewayError;
use crate::gateway::{CallHandle, CallOptions, GatewayClient};
use crate::protocol::{Method, OperationRequest};
use crate::subscriptions::Subscription;

/// Kind of a gateway entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    File,
    Directory,
}

/// Metadata for one entry, as reported by the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryInfo {
    pub path: String,
    pub name: String,
    pub kind: EntryKind,
    #[serde(default)]
    pub size: Option<u64>,
}

/// Contents of a read resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceContent {
    pub path: String,
    pub content: String,
}

/// Typed facade over the gateway's file operations.
pub struct Files {
    client: Arc<GatewayClient>,
}

impl Files {
    pub fn new(client: Arc<GatewayClient>) -> Self {
        Self { client }
    }

    /// Read a resource's contents.
    pub async fn read_resource(&self, path: &str) -> Result<ResourceContent, GatewayError> {
        let handle = self.client.call("file.read", read_request(path)).await?;
        decode(handle.result().await?)
    }

    /// Write a resource's contents.
    pub async fn write_resource(&self, path: &str, content: &str) -> Result<(), GatewayError> {
        let handle = self
            .client
            .call("file.write", write_request(path, content))
            .await?;
        handle.result().await?;
        Ok(())
    }

    /// Read with a progress stream and cancellation: returns the raw
    /// call handle, settled under the transfer-class timeout.
    pub async fn start_read(&self, path: &str) -> Result<CallHandle, GatewayError> {
        self.client
            .call_with_options("file.read", read_request(path), CallOptions::transfer())
            .await
    }

    /// Write with a progress stream and cancellation.
    pub async fn start_write(
        &self,
        path: &str,
        content: &str,
    ) -> Result<CallHandle, GatewayError> {
        self.client
            .call_with_options(
                "file.write",
                write_request(path, content),
                CallOptions::transfer(),
            )
            .await
    }

    /// Create a file or directory.
    pub async fn create_entry(
        &self,
        path: &str,
        kind: EntryKind,
    ) -> Result<EntryInfo, GatewayError> {
        let handle = self
            .client
            .call("entry.create", create_request(path, kind))
            .await?;
        decode(handle.result().await?)
    }

    /// Delete an entry.
    pub async fn delete_entry(&self, path: &str) -> Result<(), GatewayError> {
        let handle = self
            .client
            .call("entry.delete", delete_request(path))
            .await?;
        handle.result().await?;
        Ok(())
    }

    /// Rename an entry in place.
    pub async fn rename_entry(
        &self,
        path: &str,
        new_name: &str,
    ) -> Result<EntryInfo, GatewayError> {
        let handle = self
            .client
            .call("entry.rename", rename_request(path, new_name))
            .await?;
        decode(handle.result().await?)
    }

    /// Copy an entry to a new location.
    pub async fn copy_entry(
        &self,
        source: &str,
        destination: &str,
    ) -> Result<EntryInfo, GatewayError> {
        let handle = self
            .client
            .call("entry.copy", transfer_request("/storage/entries/copy", source, destination))
            .await?;
        decode(handle.result().await?)
    }

    /// Move an entry to a new location.
    pub async fn move_entry(
        &self,
        source: &str,
        destination: &str,
    ) -> Result<EntryInfo, GatewayError> {
        let handle = self
            .client
            .call("entry.move", transfer_request("/storage/entries/move", source, destination))
            .await?;
        decode(handle.result().await?)
    }

    /// List a container's entries.
    pub async fn scan_container(&self, path: &str) -> Result<Vec<EntryInfo>, GatewayError> {
        let handle = self
            .client
            .call("container.scan", scan_request(path))
            .await?;
        decode(handle.result().await?)
    }

    /// Watch a resource for changes. Not a call: no correlation key,
    /// no timeout.
    pub async fn subscribe_to_changes(&self, path: &str) -> Result<Subscription, GatewayError> {
        self.client.subscribe_to_changes(path).await
    }

    /// Stop watching a resource.
    pub async fn unsubscribe(&self, subscription: Subscription) -> Result<(), GatewayError> {
        self.client.unsubscribe(subscription).await
    }
}

fn decode<T: DeserializeOwned>(payload: Value) -> Result<T, GatewayError> {
    serde_json::from_value(payload).map_err(|e| GatewayError::MalformedResponse(e.to_string()))
}

fn read_request(path: &str) -> OperationRequest {
    OperationRequest::new("/storage/files", Method::Get).with_param("path", path)
}

fn write_request(path: &str, content: &str) -> OperationRequest {
    OperationRequest::new("/storage/files", Method::Put)
        .with_body(json!({ "path": path, "content": content }))
}

fn create_request(path: &str, kind: EntryKind) -> OperationRequest {
    OperationRequest::new("/storage/entries", Method::Post)
        .with_body(json!({ "path": path, "kind": kind }))
}

fn delete_request(path: &str) -> OperationRequest {
    OperationRequest::new("/storage/entries", Method::Delete).with_param("path", path)
}

fn rename_request(path: &str, new_name: &str) -> OperationRequest {
    OperationRequest::new("/storage/entries/rename", Method::Post)
        .with_body(json!({ "path": path, "new_name": new_name }))
}

fn transfer_request(endpoint: &str, source: &str, destination: &str) -> OperationRequest {
    OperationRequest::new(endpoint, Method::Post)
        .with_body(json!({ "source": source, "destination": destination }))
}

fn scan_request(path: &str) -> OperationRequest {
    OperationRequest::new("/storage/containers", Method::Get).with_param("path", path)
}
