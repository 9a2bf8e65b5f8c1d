//! WS-Discovery responder.
//!
//! Listens for Probe envelopes on the discovery multicast group and answers
//! with ProbeMatch responses for the registered cameras. Three response
//! strategies are supported (one per run):
//!
//! - `single`: one ProbeMatch for a single camera, for one-camera-per-process
//!   deployments;
//! - `combined`: one ProbeMatches envelope carrying every camera;
//! - `paced`: one datagram per camera with a fixed inter-datagram delay, each
//!   sent from that camera's own IP where the platform allows, so NVRs with
//!   small receive buffers or per-source dedup logic see N distinct devices.

use socket2::{Domain, Protocol, Socket, Type};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{DiscoveryConfig, DiscoveryMode};
use crate::errors::{Result, ServerError};
use crate::registry::{CameraRegistration, CameraRegistry};
use crate::soap;
use crate::templates;

const NVT_TYPE: &str = "NetworkVideoTransmitter";

/// Probe-id observations are kept only to log duplicate probes; entries are
/// evicted by age so the map cannot grow without bound.
const PROBE_SEEN_TTL: Duration = Duration::from_secs(30);

/// A parsed, accepted discovery Probe.
#[derive(Debug, PartialEq)]
pub struct Probe {
    pub message_id: String,
}

/// Parse a datagram as a WS-Discovery Probe. Returns `None` for anything
/// else: non-XML noise, non-Probe messages, or a Types filter this responder
/// does not match. All of those are expected multicast background traffic.
pub fn parse_probe(datagram: &str) -> Option<Probe> {
    if !soap::has_element(datagram, "Probe") {
        return None;
    }
    if let Some(types) = soap::element_text(datagram, "Types") {
        if !types.contains(NVT_TYPE) {
            return None;
        }
    }
    Some(Probe {
        message_id: soap::element_text(datagram, "MessageID").unwrap_or_default(),
    })
}

pub struct DiscoveryResponder {
    registry: Arc<CameraRegistry>,
    config: DiscoveryConfig,
    message_counter: Arc<AtomicU64>,
    instance_id: i64,
}

/// Handle to a running responder; aborting the task closes the socket and
/// frees the discovery port.
pub struct DiscoveryHandle {
    task: JoinHandle<()>,
    pub local_addr: SocketAddr,
}

impl DiscoveryHandle {
    pub fn stop(self) {
        self.task.abort();
    }
}

impl DiscoveryResponder {
    pub fn new(registry: Arc<CameraRegistry>, config: DiscoveryConfig) -> Self {
        Self {
            registry,
            config,
            message_counter: Arc::new(AtomicU64::new(0)),
            instance_id: chrono::Utc::now().timestamp(),
        }
    }

    /// Bind the discovery socket and start answering probes. Bind failure is
    /// fatal; multicast-join failure degrades to unicast-only operation.
    pub fn spawn(self) -> Result<DiscoveryHandle> {
        let socket = self.bind_socket()?;
        let local_addr = socket.local_addr()?;
        info!(
            port = local_addr.port(),
            mode = ?self.config.mode,
            "Discovery responder started"
        );
        let task = tokio::spawn(self.run(socket));
        Ok(DiscoveryHandle { task, local_addr })
    }

    fn bind_socket(&self) -> Result<UdpSocket> {
        // SO_REUSEADDR before bind so several processes can share port 3702.
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        socket.set_nonblocking(true)?;
        let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.config.port));
        socket.bind(&addr.into()).map_err(|e| {
            ServerError::bind(format!("Discovery port {}: {}", self.config.port, e))
        })?;

        let socket = UdpSocket::from_std(socket.into())?;
        let interface = self.config.interface.unwrap_or(Ipv4Addr::UNSPECIFIED);
        match socket.join_multicast_v4(self.config.multicast_addr, interface) {
            Ok(()) => debug!(group = %self.config.multicast_addr, "Joined multicast group"),
            Err(e) => warn!(
                group = %self.config.multicast_addr,
                "Failed to join multicast group, running unicast-only: {}", e
            ),
        }
        Ok(socket)
    }

    async fn run(self, socket: UdpSocket) {
        let mut buf = [0u8; 8192];
        let mut seen_probes: HashMap<String, Instant> = HashMap::new();

        loop {
            let (len, remote) = match socket.recv_from(&mut buf).await {
                Ok(received) => received,
                Err(e) => {
                    error!("Discovery socket receive error: {}", e);
                    continue;
                }
            };

            let datagram = String::from_utf8_lossy(&buf[..len]);
            let Some(probe) = parse_probe(&datagram) else {
                continue;
            };

            seen_probes.retain(|_, at| at.elapsed() < PROBE_SEEN_TTL);
            if !probe.message_id.is_empty() {
                if seen_probes
                    .insert(probe.message_id.clone(), Instant::now())
                    .is_some()
                {
                    debug!(probe = %probe.message_id, from = %remote, "Repeated probe");
                }
            }

            let cameras = self.registry.snapshot().await;
            if cameras.is_empty() {
                debug!(from = %remote, "Probe received but no cameras registered");
                continue;
            }
            debug!(
                from = %remote,
                cameras = cameras.len(),
                "Probe received, responding"
            );

            match self.config.mode {
                DiscoveryMode::Single => {
                    if cameras.len() > 1 {
                        debug!("Single mode with {} cameras, answering for the first", cameras.len());
                    }
                    let envelope = self.envelope_for(&probe, &cameras[..1]);
                    send_from_default(&envelope, remote, &cameras[0].name).await;
                }
                DiscoveryMode::Combined => {
                    let envelope = self.envelope_for(&probe, &cameras);
                    send_from_default(&envelope, remote, "all cameras").await;
                }
                DiscoveryMode::Paced => {
                    // Answer on a separate task so a slow paced burst never
                    // blocks the listener for the next probe.
                    let delay = Duration::from_millis(self.config.pace_delay_ms);
                    let counter = self.message_counter.clone();
                    let instance_id = self.instance_id;
                    let relates_to = probe.message_id.clone();
                    tokio::spawn(async move {
                        for (i, camera) in cameras.iter().enumerate() {
                            if i > 0 {
                                tokio::time::sleep(delay).await;
                            }
                            let matches = templates::probe_match_xml(
                                &camera.uuid.to_string(),
                                &camera.name,
                                &camera.hostname,
                                camera.port,
                            );
                            let envelope = templates::probe_matches_envelope(
                                &Uuid::new_v4().to_string(),
                                &relates_to,
                                counter.fetch_add(1, Ordering::Relaxed),
                                instance_id,
                                &matches,
                            );
                            send_from_camera(&envelope, remote, camera).await;
                        }
                    });
                }
            }
        }
    }

    fn envelope_for(&self, probe: &Probe, cameras: &[CameraRegistration]) -> String {
        let matches: String = cameras
            .iter()
            .map(|c| {
                templates::probe_match_xml(&c.uuid.to_string(), &c.name, &c.hostname, c.port)
            })
            .collect();
        templates::probe_matches_envelope(
            &Uuid::new_v4().to_string(),
            &probe.message_id,
            self.message_counter.fetch_add(1, Ordering::Relaxed),
            self.instance_id,
            &matches,
        )
    }
}

/// Send one response datagram from an ephemeral socket on the default
/// interface.
async fn send_from_default(envelope: &str, remote: SocketAddr, what: &str) {
    match UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await {
        Ok(socket) => {
            if let Err(e) = socket.send_to(envelope.as_bytes(), remote).await {
                error!(to = %remote, "Failed to send discovery response for {}: {}", what, e);
            } else {
                debug!(to = %remote, "Sent discovery response for {}", what);
            }
        }
        Err(e) => error!("Failed to open discovery reply socket: {}", e),
    }
}

/// Send one response datagram, preferring the camera's own IP as source so
/// the reply preserves the per-device origin illusion. Falls back to the
/// default interface with a warning.
async fn send_from_camera(envelope: &str, remote: SocketAddr, camera: &CameraRegistration) {
    let bind_addr: std::io::Result<UdpSocket> = match camera.hostname.parse::<IpAddr>() {
        Ok(ip) => UdpSocket::bind((ip, 0)).await,
        Err(e) => Err(std::io::Error::new(std::io::ErrorKind::InvalidInput, e)),
    };

    let socket = match bind_addr {
        Ok(socket) => socket,
        Err(e) => {
            warn!(
                camera = %camera.name,
                "Cannot bind reply socket to {}, using default interface: {}",
                camera.hostname, e
            );
            match UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await {
                Ok(socket) => socket,
                Err(e) => {
                    error!(camera = %camera.name, "Failed to open discovery reply socket: {}", e);
                    return;
                }
            }
        }
    };

    if let Err(e) = socket.send_to(envelope.as_bytes(), remote).await {
        error!(camera = %camera.name, to = %remote, "Failed to send discovery response: {}", e);
    } else {
        debug!(camera = %camera.name, to = %remote, "Sent discovery response");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn probe_envelope(message_id: &str, types: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope"
            xmlns:wsa="http://schemas.xmlsoap.org/ws/2004/08/addressing"
            xmlns:d="http://schemas.xmlsoap.org/ws/2005/04/discovery"
            xmlns:dn="http://www.onvif.org/ver10/network/wsdl">
  <s:Header>
    <wsa:MessageID>{}</wsa:MessageID>
    <wsa:To>urn:schemas-xmlsoap-org:ws:2005:04:discovery</wsa:To>
    <wsa:Action>http://schemas.xmlsoap.org/ws/2005/04/discovery/Probe</wsa:Action>
  </s:Header>
  <s:Body>
    <d:Probe>{}</d:Probe>
  </s:Body>
</s:Envelope>"#,
            message_id,
            if types.is_empty() {
                String::new()
            } else {
                format!("<d:Types>{}</d:Types>", types)
            }
        )
    }

    fn registration(name: &str, port: u16) -> CameraRegistration {
        CameraRegistration {
            uuid: Uuid::new_v4(),
            name: name.to_string(),
            hostname: "127.0.0.1".to_string(),
            port,
            mac: "02:42:ac:11:00:02".to_string(),
            registered_at: Utc::now(),
        }
    }

    fn test_config(mode: DiscoveryMode, pace_delay_ms: u64) -> DiscoveryConfig {
        DiscoveryConfig {
            enabled: true,
            mode,
            pace_delay_ms,
            // Ephemeral port: tests must not depend on 3702 being free.
            port: 0,
            multicast_addr: Ipv4Addr::new(239, 255, 255, 250),
            interface: None,
        }
    }

    async fn probe_responder(
        handle: &DiscoveryHandle,
        probe: &str,
    ) -> (UdpSocket, SocketAddr) {
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target = SocketAddr::from(([127, 0, 0, 1], handle.local_addr.port()));
        client.send_to(probe.as_bytes(), target).await.unwrap();
        (client, target)
    }

    async fn recv_with_timeout(socket: &UdpSocket) -> Option<String> {
        let mut buf = [0u8; 16384];
        match tokio::time::timeout(Duration::from_secs(2), socket.recv_from(&mut buf)).await {
            Ok(Ok((len, _))) => Some(String::from_utf8_lossy(&buf[..len]).to_string()),
            _ => None,
        }
    }

    #[test]
    fn accepts_probe_without_types() {
        let probe = parse_probe(&probe_envelope("uuid:p-1", "")).unwrap();
        assert_eq!(probe.message_id, "uuid:p-1");
    }

    #[test]
    fn accepts_probe_with_nvt_type() {
        let xml = probe_envelope("uuid:p-2", "dn:NetworkVideoTransmitter");
        assert!(parse_probe(&xml).is_some());
    }

    #[test]
    fn ignores_probe_with_unrelated_type() {
        let xml = probe_envelope("uuid:p-3", "dn:NetworkVideoDisplay");
        assert!(parse_probe(&xml).is_none());
    }

    #[test]
    fn ignores_non_probe_traffic() {
        assert!(parse_probe("totally not xml \x00\x01").is_none());
        let resolve = probe_envelope("uuid:p-4", "").replace("Probe>", "Resolve>");
        assert!(parse_probe(&resolve).is_none());
    }

    #[tokio::test]
    async fn combined_mode_answers_with_all_cameras() {
        let registry = Arc::new(CameraRegistry::new());
        registry.register(registration("Channel1", 8081)).await;
        registry.register(registration("Channel2", 8082)).await;
        registry.register(registration("Channel3", 8083)).await;

        let responder =
            DiscoveryResponder::new(registry.clone(), test_config(DiscoveryMode::Combined, 0));
        let handle = responder.spawn().unwrap();

        let (client, _) = probe_responder(&handle, &probe_envelope("uuid:probe-combined", "")).await;
        let response = recv_with_timeout(&client).await.unwrap();

        assert!(response.contains("<wsa:RelatesTo>uuid:probe-combined</wsa:RelatesTo>"));
        assert_eq!(response.matches("<d:ProbeMatch>").count(), 3);
        for camera in registry.snapshot().await {
            assert!(response.contains(&format!("urn:uuid:{}", camera.uuid)));
            assert!(response
                .contains(&format!("http://127.0.0.1:{}/onvif/device_service", camera.port)));
        }
        handle.stop();
    }

    #[tokio::test]
    async fn paced_mode_sends_one_datagram_per_camera_with_spacing() {
        let registry = Arc::new(CameraRegistry::new());
        registry.register(registration("Channel1", 8081)).await;
        registry.register(registration("Channel2", 8082)).await;
        registry.register(registration("Channel3", 8083)).await;

        let delay_ms = 50u64;
        let responder =
            DiscoveryResponder::new(registry.clone(), test_config(DiscoveryMode::Paced, delay_ms));
        let handle = responder.spawn().unwrap();

        let (client, _) = probe_responder(&handle, &probe_envelope("uuid:probe-paced", "")).await;

        let mut endpoints = std::collections::HashSet::new();
        let mut arrivals = Vec::new();
        for _ in 0..3 {
            let response = recv_with_timeout(&client).await.unwrap();
            arrivals.push(Instant::now());
            assert!(response.contains("<wsa:RelatesTo>uuid:probe-paced</wsa:RelatesTo>"));
            assert_eq!(response.matches("<d:ProbeMatch>").count(), 1);
            let start = response.find("urn:uuid:").unwrap();
            endpoints.insert(response[start..start + 45].to_string());
        }

        assert_eq!(endpoints.len(), 3);
        // Spread between first and last datagram is at least (N-1) * delay.
        let spread = arrivals[2].duration_since(arrivals[0]);
        assert!(spread >= Duration::from_millis(2 * delay_ms), "spread {:?}", spread);
        handle.stop();
    }

    #[tokio::test]
    async fn single_mode_answers_for_one_camera() {
        let registry = Arc::new(CameraRegistry::new());
        registry.register(registration("Channel1", 8081)).await;

        let responder =
            DiscoveryResponder::new(registry.clone(), test_config(DiscoveryMode::Single, 0));
        let handle = responder.spawn().unwrap();

        let (client, _) = probe_responder(&handle, &probe_envelope("uuid:probe-single", "")).await;
        let response = recv_with_timeout(&client).await.unwrap();
        assert_eq!(response.matches("<d:ProbeMatch>").count(), 1);
        handle.stop();
    }

    #[tokio::test]
    async fn unrelated_types_and_empty_registry_get_no_response() {
        let registry = Arc::new(CameraRegistry::new());
        let responder =
            DiscoveryResponder::new(registry.clone(), test_config(DiscoveryMode::Combined, 0));
        let handle = responder.spawn().unwrap();

        // Empty registry: accepted probe, no answer.
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target = SocketAddr::from(([127, 0, 0, 1], handle.local_addr.port()));
        client
            .send_to(probe_envelope("uuid:p-a", "").as_bytes(), target)
            .await
            .unwrap();
        let mut buf = [0u8; 1024];
        assert!(
            tokio::time::timeout(Duration::from_millis(300), client.recv_from(&mut buf))
                .await
                .is_err()
        );

        // Registered camera but a filter for some other device type.
        registry.register(registration("Channel1", 8081)).await;
        client
            .send_to(
                probe_envelope("uuid:p-b", "dn:NetworkVideoDisplay").as_bytes(),
                target,
            )
            .await
            .unwrap();
        assert!(
            tokio::time::timeout(Duration::from_millis(300), client.recv_from(&mut buf))
                .await
                .is_err()
        );
        handle.stop();
    }

    #[tokio::test]
    async fn message_numbers_increase_across_probes() {
        let registry = Arc::new(CameraRegistry::new());
        registry.register(registration("Channel1", 8081)).await;

        let responder =
            DiscoveryResponder::new(registry.clone(), test_config(DiscoveryMode::Combined, 0));
        let handle = responder.spawn().unwrap();

        let (client, target) = probe_responder(&handle, &probe_envelope("uuid:p-1", "")).await;
        let first = recv_with_timeout(&client).await.unwrap();
        client
            .send_to(probe_envelope("uuid:p-2", "").as_bytes(), target)
            .await
            .unwrap();
        let second = recv_with_timeout(&client).await.unwrap();

        assert!(first.contains("MessageNumber=\"0\""));
        assert!(second.contains("MessageNumber=\"1\""));
        handle.stop();
    }

    #[tokio::test]
    async fn port_is_rebindable_after_stop() {
        let registry = Arc::new(CameraRegistry::new());
        let responder =
            DiscoveryResponder::new(registry, test_config(DiscoveryMode::Combined, 0));
        let handle = responder.spawn().unwrap();
        let port = handle.local_addr.port();
        handle.stop();

        // Aborting the task drops the socket; give the runtime a beat.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let rebound = std::net::UdpSocket::bind(("0.0.0.0", port));
        assert!(rebound.is_ok());
    }
}
