//! In-process demo: several peers on one `LocalNetwork`.

use crate::config::Config;
use crate::progress::{TransferProgress, format_bytes, format_duration};
use indicatif::MultiProgress;
use peerwire_core::{LocalNetwork, ResourceStatus, Transceiver, Value};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Demo parameters
#[derive(Debug, Clone)]
pub struct DemoOptions {
    /// Number of in-process peers
    pub peers: usize,
    /// Service type override
    pub service: Option<String>,
    /// Event broadcast by the first peer
    pub event: String,
    /// Text payload for the event
    pub payload: Option<String>,
    /// File sent by the first peer to every connected peer
    pub file: Option<PathBuf>,
    /// How long to wait for sessions and deliveries
    pub wait: Duration,
}

/// What the demo observed
#[derive(Debug, Default)]
pub struct DemoReport {
    /// `(peer, connected peer count)` for every peer
    pub connections: Vec<(String, usize)>,
    /// One line per event delivery
    pub received: Vec<String>,
    /// One line per received resource
    pub resources: Vec<String>,
}

type Lines = Arc<Mutex<Vec<String>>>;

fn push(lines: &Lines, line: String) {
    if let Ok(mut lines) = lines.lock() {
        lines.push(line);
    }
}

fn count(lines: &Lines) -> usize {
    lines.lock().map(|lines| lines.len()).unwrap_or(0)
}

fn drain(lines: &Lines) -> Vec<String> {
    lines
        .lock()
        .map(|mut lines| std::mem::take(&mut *lines))
        .unwrap_or_default()
}

async fn wait_until(deadline: Instant, mut done: impl FnMut() -> bool) -> bool {
    while !done() {
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    true
}

/// Run the demo
///
/// # Errors
///
/// Returns an error for invalid options or configuration.
pub async fn run(config: &Config, options: DemoOptions) -> anyhow::Result<DemoReport> {
    if options.peers < 2 {
        anyhow::bail!("The demo needs at least 2 peers");
    }
    if let Some(file) = &options.file {
        if !file.is_file() {
            anyhow::bail!("File not found: {:?}", file);
        }
    }

    let service = options
        .service
        .clone()
        .unwrap_or_else(|| config.discovery.service_type.clone());
    let network = LocalNetwork::with_resource_root(config.resources.dir.clone());
    let base = config.transceiver_config();

    let received: Lines = Arc::default();
    let resources: Lines = Arc::default();
    let mut peers = Vec::with_capacity(options.peers);

    for i in 0..options.peers {
        let mut peer_config = base.clone();
        peer_config.display_name = format!("{}-{}", base.display_name, i + 1);
        let transceiver = Transceiver::with_network(&network, peer_config)?;

        let lines = Arc::clone(&received);
        transceiver.on_event(move |from, event, object| {
            push(&lines, format!("'{}' from {}: {:?}", event, from, object));
        });
        transceiver.on_connect(|local, remote| {
            tracing::info!("{} connected to {}", local, remote);
        });
        transceiver.on_disconnect(|local, remote| {
            tracing::debug!("{} not connected to {}", local, remote);
        });
        let lines = Arc::clone(&resources);
        transceiver.on_finish_receiving_resource(move |local, name, from, path| {
            push(
                &lines,
                format!("{} received '{}' from {} at {}", local, name, from, path.display()),
            );
        });

        peers.push(transceiver);
    }

    let started = Instant::now();
    for transceiver in &peers {
        transceiver
            .transceive(&service, Some(config.discovery.info.clone()))
            .await?;
    }

    let deadline = started + options.wait;
    let formed = wait_until(deadline, || {
        peers.iter().all(|peer| !peer.connected_peers().is_empty())
    })
    .await;
    if formed {
        println!("Sessions formed in {}", format_duration(started.elapsed()));
    } else {
        println!("Not every peer connected within {}", format_duration(options.wait));
    }

    let sender = &peers[0];
    let audience = sender.connected_peers();
    let payload = options.payload.as_deref().map(Value::from);
    sender.send_event(&options.event, payload.as_ref(), None);
    wait_until(Instant::now() + options.wait, || count(&received) >= audience.len()).await;

    if let Some(file) = &options.file {
        let size = std::fs::metadata(file)?.len();
        let name = file
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "resource".to_string());
        println!("Sending {} ({}) to {} peer(s)", name, format_bytes(size), audience.len());

        let bars = MultiProgress::new();
        let handles = sender
            .send_resource(file, &name, None, |peer, error| match error {
                None => tracing::debug!("Resource delivered to {}", peer),
                Some(e) => tracing::warn!("Resource to {} failed: {}", peer, e),
            })
            .await
            .unwrap_or_default();

        let mut trackers = Vec::new();
        for progress in handles.into_iter().flatten() {
            let bar = TransferProgress::new(&bars, &progress.borrow());
            trackers.push(tokio::spawn(async move { bar.track(progress).await }));
        }
        let mut sent = 0;
        for tracker in trackers {
            if matches!(tracker.await, Ok(ResourceStatus::Complete)) {
                sent += 1;
            }
        }
        wait_until(Instant::now() + options.wait, || count(&resources) >= sent).await;
    }

    let report = DemoReport {
        connections: peers
            .iter()
            .map(|peer| (peer.local_peer().to_string(), peer.connected_peers().len()))
            .collect(),
        received: drain(&received),
        resources: drain(&resources),
    };

    for transceiver in &peers {
        transceiver.stop_transceiving().await;
    }

    Ok(report)
}
