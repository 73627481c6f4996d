//! Resource transfer progress tracking
//!
//! A [`ResourceProgress`] snapshot is published on a `watch` channel for each
//! outgoing resource transfer.

use crate::identity::PeerIdentity;

/// Resource transfer status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceStatus {
    /// Transfer accepted, no bytes moved yet
    Pending,
    /// Transfer is in progress
    Transferring,
    /// Transfer completed successfully
    Complete,
    /// Transfer failed
    Failed,
}

impl std::fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Transferring => write!(f, "Transferring"),
            Self::Complete => write!(f, "Complete"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// Progress snapshot of a single (peer, resource name) transfer
#[derive(Debug, Clone)]
pub struct ResourceProgress {
    /// Name the resource is sent under
    pub resource_name: String,

    /// Receiving peer
    pub peer: PeerIdentity,

    /// Bytes copied so far
    pub bytes_done: u64,

    /// Total bytes to copy
    pub bytes_total: u64,

    /// Progress percentage (0.0 to 100.0)
    pub percent: f64,

    /// Current status
    pub status: ResourceStatus,
}

impl ResourceProgress {
    /// Create a pending progress record
    pub fn new(resource_name: impl Into<String>, peer: PeerIdentity, bytes_total: u64) -> Self {
        Self {
            resource_name: resource_name.into(),
            peer,
            bytes_done: 0,
            bytes_total,
            percent: 0.0,
            status: ResourceStatus::Pending,
        }
    }

    /// Update with the number of bytes copied so far
    pub fn update(&mut self, bytes_done: u64) {
        self.bytes_done = bytes_done.min(self.bytes_total);

        if self.bytes_total > 0 {
            self.percent = (self.bytes_done as f64 / self.bytes_total as f64) * 100.0;
        }

        if self.bytes_done > 0 && self.status == ResourceStatus::Pending {
            self.status = ResourceStatus::Transferring;
        }
    }

    /// Mark as completed
    pub fn complete(&mut self) {
        self.bytes_done = self.bytes_total;
        self.percent = 100.0;
        self.status = ResourceStatus::Complete;
    }

    /// Mark as failed; bytes copied so far are kept
    pub fn fail(&mut self) {
        self.status = ResourceStatus::Failed;
    }

    /// Completed fraction in `0.0..=1.0`
    pub fn fraction(&self) -> f64 {
        match self.status {
            ResourceStatus::Complete => 1.0,
            _ => self.percent / 100.0,
        }
    }

    /// Check if the transfer reached a terminal state
    pub fn is_finished(&self) -> bool {
        matches!(self.status, ResourceStatus::Complete | ResourceStatus::Failed)
    }
}
