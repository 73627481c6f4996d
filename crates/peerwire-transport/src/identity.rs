//! Peer identity.
//!
//! Every participant owns exactly one [`PeerIdentity`] for the lifetime of the
//! process. Identities carry a human-readable display name and a 64-bit order
//! key; the order key is what invitation arbitration compares.

use std::fmt;

/// Opaque, totally-ordered participant identifier.
///
/// Ordering compares the order key first and the display name second, so two
/// distinct identities never compare equal unless both fields match.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PeerIdentity {
    order_key: u64,
    display_name: String,
}

impl PeerIdentity {
    /// Create a fresh identity for `display_name`.
    ///
    /// The order key is the first 8 bytes of `BLAKE3(display_name || nonce)`
    /// with a random 16-byte nonce, so two devices sharing a name still get
    /// distinct keys.
    pub fn new(display_name: impl Into<String>) -> Self {
        let display_name = display_name.into();
        let nonce: [u8; 16] = rand::random();

        let mut hasher = blake3::Hasher::new();
        hasher.update(display_name.as_bytes());
        hasher.update(&nonce);
        let digest = hasher.finalize();

        let mut key_bytes = [0u8; 8];
        key_bytes.copy_from_slice(&digest.as_bytes()[..8]);

        Self {
            order_key: u64::from_be_bytes(key_bytes),
            display_name,
        }
    }

    /// Create an identity with a fixed order key (tests, simulations)
    pub fn with_order_key(display_name: impl Into<String>, order_key: u64) -> Self {
        Self {
            order_key,
            display_name: display_name.into(),
        }
    }

    /// Human-readable name
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Key compared by invitation arbitration
    pub fn order_key(&self) -> u64 {
        self.order_key
    }
}

impl fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{:08x}", self.display_name, self.order_key >> 32)
    }
}
