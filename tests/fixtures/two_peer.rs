//! Two-peer test fixture for integration testing
//!
//! Provides two transceivers on a private `LocalNetwork`:
//! - `a` holds the larger order key, so it is the side that accepts
//! - `b` holds the smaller one
//!
//! # Example
//!
//! ```ignore
//! use peerwire_integration_tests::TwoPeerFixture;
//!
//! #[tokio::test]
//! async fn test_basic_session() {
//!     let fixture = TwoPeerFixture::new();
//!     fixture.transceive("cards").await;
//!     assert!(fixture.wait_connected().await);
//! }
//! ```

use peerwire_core::{LocalNetwork, PeerIdentity, Transceiver, TransceiverConfig};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;

/// Upper bound for any single wait in the integration tests
pub const WAIT: Duration = Duration::from_secs(5);

/// Two transceivers sharing one in-process network
pub struct TwoPeerFixture {
    /// The shared hub
    pub network: Arc<LocalNetwork>,
    /// Peer with the larger order key
    pub a: Transceiver,
    /// Peer with the smaller order key
    pub b: Transceiver,
    resource_root: TempDir,
}

impl TwoPeerFixture {
    /// Fixture with `a` = key 200, `b` = key 100
    pub fn new() -> Self {
        Self::with_keys(200, 100)
    }

    /// Fixture with explicit order keys
    pub fn with_keys(a_key: u64, b_key: u64) -> Self {
        let resource_root = tempfile::tempdir().expect("temp dir");
        let network = LocalNetwork::with_resource_root(resource_root.path());
        let a = Self::peer(&network, "alpha", a_key);
        let b = Self::peer(&network, "bravo", b_key);

        Self {
            network,
            a,
            b,
            resource_root,
        }
    }

    /// Add another transceiver to the same network
    pub fn peer(network: &Arc<LocalNetwork>, name: &str, key: u64) -> Transceiver {
        let transport = network.join(PeerIdentity::with_order_key(name, key));
        Transceiver::new(
            Arc::new(transport),
            TransceiverConfig {
                invite_timeout: Duration::from_secs(2),
                ..TransceiverConfig::with_display_name(name)
            },
        )
        .expect("valid config")
    }

    /// Directory received resources land under
    pub fn resource_root(&self) -> &Path {
        self.resource_root.path()
    }

    /// Start both peers advertising and browsing `service_type`
    pub async fn transceive(&self, service_type: &str) {
        self.a
            .transceive(service_type, None)
            .await
            .expect("valid service type");
        self.b
            .transceive(service_type, None)
            .await
            .expect("valid service type");
    }

    /// Wait until each peer sees the other as connected
    pub async fn wait_connected(&self) -> bool {
        let a = self.a.local_peer().clone();
        let b = self.b.local_peer().clone();
        wait_for(|| {
            self.a.connected_peers().contains(&b) && self.b.connected_peers().contains(&a)
        })
        .await
    }

    /// Stop both peers
    pub async fn stop(&self) {
        self.a.stop_transceiving().await;
        self.b.stop_transceiving().await;
    }
}

impl Default for TwoPeerFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// Poll `condition` until it holds or [`WAIT`] elapses
pub async fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    let poll = async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    tokio::time::timeout(WAIT, poll).await.is_ok()
}

/// Receive the next item, giving up after [`WAIT`]
pub async fn recv<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> Option<T> {
    within(rx.recv()).await.flatten()
}

async fn within<F: Future>(future: F) -> Option<F::Output> {
    tokio::time::timeout(WAIT, future).await.ok()
}
