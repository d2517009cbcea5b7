//! Debounced batch reporting of counted campaigns.
//!
//! `notify` stores the latest payload and schedules a flush one debounce
//! interval out unless one is already pending; repeated calls before the
//! deadline coalesce into a single flush carrying the latest payload.
//! The flush serializes the payload as JSON and performs exactly one
//! outbound POST through the host-supplied transport. Responses, when
//! present and parseable, go to the registered callback; anything
//! malformed or failed is dropped silently. Reporting is best-effort
//! telemetry — there is no retry and no effect on applied state.

use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;

use crate::variation::CampaignId;

/// Fixed path report flushes are posted to.
pub const REPORT_PATH: &str = "/__variations/report";

/// Debounce delay between a notify and its flush, in virtual ms.
pub const REPORT_DEBOUNCE_MS: u64 = 100;

// ---------------------------------------------------------------------------
// Transport boundary
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("report request failed: {reason}")]
    Failed { reason: String },
}

impl TransportError {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }
}

/// Host-supplied outbound request primitive: one POST, body already
/// serialized, returning the raw response body if any arrived.
pub trait ReportTransport {
    fn post(&mut self, path: &str, body: &str) -> Result<Option<String>, TransportError>;
}

/// Callback handed the parsed JSON response of a successful flush.
pub type ReportCallback = Box<dyn FnMut(serde_json::Value)>;

// ---------------------------------------------------------------------------
// ReportChannel
// ---------------------------------------------------------------------------

pub struct ReportChannel {
    path: String,
    debounce_ms: u64,
    pending: Option<BTreeMap<CampaignId, bool>>,
    deadline: Option<u64>,
    callback: Option<ReportCallback>,
}

impl ReportChannel {
    pub fn new(path: impl Into<String>, debounce_ms: u64) -> Self {
        Self {
            path: path.into(),
            debounce_ms,
            pending: None,
            deadline: None,
            callback: None,
        }
    }

    pub fn set_callback(&mut self, callback: ReportCallback) {
        self.callback = Some(callback);
    }

    /// Store the latest payload and schedule a flush if none is pending.
    /// An already-scheduled flush keeps its deadline; only the payload is
    /// replaced.
    pub fn notify(&mut self, payload: BTreeMap<CampaignId, bool>, now: u64) {
        self.pending = Some(payload);
        if self.deadline.is_none() {
            self.deadline = Some(now + self.debounce_ms);
        }
    }

    pub fn deadline(&self) -> Option<u64> {
        self.deadline
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Flush once the deadline has passed. Returns true when a flush was
    /// performed (successfully or not).
    pub fn poll(&mut self, now: u64, transport: &mut dyn ReportTransport) -> bool {
        let Some(deadline) = self.deadline else {
            return false;
        };
        if now < deadline {
            return false;
        }
        self.deadline = None;
        let Some(payload) = self.pending.take() else {
            return false;
        };
        let Ok(body) = serde_json::to_string(&payload) else {
            return false;
        };
        match transport.post(&self.path, &body) {
            Ok(Some(response)) => {
                if let Ok(value) = serde_json::from_str::<serde_json::Value>(&response) {
                    if let Some(callback) = self.callback.as_mut() {
                        callback(value);
                    }
                } else {
                    tracing::debug!(path = %self.path, "malformed report response ignored");
                }
            }
            Ok(None) => {}
            Err(err) => {
                tracing::debug!(path = %self.path, error = %err, "report flush failed, payload dropped");
            }
        }
        true
    }
}

impl fmt::Debug for ReportChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReportChannel")
            .field("path", &self.path)
            .field("debounce_ms", &self.debounce_ms)
            .field("pending", &self.pending)
            .field("deadline", &self.deadline)
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
