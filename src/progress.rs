//! Incremental progress events for long-running transfers
//!
//! Progress is a side-channel tied to one in-flight call: zero or more
//! events, always before the call's terminal settlement. The stream ends
//! when the call settles, whichever terminal path fired.

use serde::{Deserialize, Serialize};

/// Transfer direction of a progress event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Upload,
    Download,
}

/// One incremental update for an in-flight transfer.
///
/// `loaded` is informational: the channel does not guarantee in-order
/// delivery, so consumers must not assume it is monotonic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Bytes transferred so far
    pub loaded: u64,
    /// Total bytes, when the gateway knows it
    pub total: Option<u64>,
    /// Completion ratio in percent, when the gateway computed one
    pub percent: Option<f64>,
    /// Upload or download
    pub direction: Direction,
}

impl ProgressEvent {
    /// Percent if reported, otherwise derived from `loaded`/`total`.
    pub fn completion(&self) -> Option<f64> {
        self.percent.or_else(|| {
            self.total
                .filter(|t| *t > 0)
                .map(|t| self.loaded as f64 / t as f64 * 100.0)
        })
    }
}
