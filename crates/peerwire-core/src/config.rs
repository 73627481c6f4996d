//! Transceiver configuration

use crate::error::{CoreError, Result};
use crate::event::DEFAULT_MAX_EVENT_SIZE;
use peerwire_transport::{DEFAULT_INVITE_TIMEOUT_SECS, PeerIdentity};
use std::time::Duration;

/// Longest display name accepted (bytes)
pub const MAX_DISPLAY_NAME_LEN: usize = 63;

/// Longest service type accepted (characters)
pub const MAX_SERVICE_TYPE_LEN: usize = 15;

/// Smallest event size limit that still fits a named event
const MIN_EVENT_SIZE: usize = 64;

/// Environment variables consulted for the default display name, in order
const NAME_VARS: [&str; 3] = ["PEERWIRE_NAME", "HOSTNAME", "COMPUTERNAME"];

/// Transceiver configuration
#[derive(Debug, Clone)]
pub struct TransceiverConfig {
    /// Name other peers see
    pub display_name: String,

    /// How long an invitation waits for an answer
    pub invite_timeout: Duration,

    /// Upper bound for one encoded event, both directions
    pub max_event_size: usize,
}

impl Default for TransceiverConfig {
    fn default() -> Self {
        Self {
            display_name: default_display_name(),
            invite_timeout: Duration::from_secs(DEFAULT_INVITE_TIMEOUT_SECS),
            max_event_size: DEFAULT_MAX_EVENT_SIZE,
        }
    }
}

impl TransceiverConfig {
    /// Default configuration under an explicit display name
    pub fn with_display_name(name: impl Into<String>) -> Self {
        Self {
            display_name: name.into(),
            ..Self::default()
        }
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidConfig` describing the first bad field.
    pub fn validate(&self) -> Result<()> {
        if self.display_name.trim().is_empty() {
            return Err(CoreError::InvalidConfig("display name is empty".into()));
        }
        if self.display_name.len() > MAX_DISPLAY_NAME_LEN {
            return Err(CoreError::InvalidConfig(
                format!(
                    "display name is {} bytes (max {})",
                    self.display_name.len(),
                    MAX_DISPLAY_NAME_LEN
                )
                .into(),
            ));
        }
        if self.invite_timeout.is_zero() {
            return Err(CoreError::InvalidConfig(
                "invite timeout must be positive".into(),
            ));
        }
        if self.max_event_size < MIN_EVENT_SIZE {
            return Err(CoreError::InvalidConfig(
                format!("max event size must be at least {MIN_EVENT_SIZE} bytes").into(),
            ));
        }
        Ok(())
    }

    /// Fresh identity for this configuration's display name
    pub fn identity(&self) -> PeerIdentity {
        PeerIdentity::new(self.display_name.clone())
    }
}

fn default_display_name() -> String {
    NAME_VARS
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .map(|name| name.trim().to_string())
        .find(|name| !name.is_empty() && name.len() <= MAX_DISPLAY_NAME_LEN)
        .unwrap_or_else(|| "peerwire".to_string())
}

/// Check a service type against the Bonjour service name rules
///
/// # Errors
///
/// Returns `CoreError::InvalidServiceType` naming the violated rule.
pub fn validate_service_type(service_type: &str) -> Result<()> {
    let reject = |reason: &'static str| {
        Err(CoreError::InvalidServiceType {
            service_type: service_type.to_string(),
            reason,
        })
    };

    if service_type.is_empty() {
        return reject("empty");
    }
    if service_type.chars().count() > MAX_SERVICE_TYPE_LEN {
        return reject("longer than 15 characters");
    }
    if !service_type
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return reject("only lowercase letters, digits and hyphens are allowed");
    }
    if !service_type.chars().any(|c| c.is_ascii_lowercase()) {
        return reject("must contain at least one letter");
    }
    if service_type.starts_with('-') || service_type.ends_with('-') {
        return reject("must not start or end with a hyphen");
    }
    if service_type.contains("--") {
        return reject("must not contain consecutive hyphens");
    }
    Ok(())
}
