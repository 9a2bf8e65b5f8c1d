use serde::{Deserialize, Serialize};
use std::fs;
use std::net::Ipv4Addr;
use uuid::Uuid;

use crate::errors::{Result, ServerError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// One entry per virtual camera.
    pub onvif: Vec<CameraConfig>,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    /// WS-Security credentials. SOAP endpoints run unauthenticated when absent.
    pub auth: Option<AuthConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraConfig {
    pub mac: String,
    pub name: String,
    pub uuid: Uuid,
    /// Explicit bind address. When absent the host's primary IPv4 is used.
    pub hostname: Option<String>,
    /// Recorder channel number backing this camera. Also substituted for
    /// `{channel}` in the quality profile path templates.
    #[serde(default = "default_channel")]
    pub channel: u16,
    pub ports: CameraPorts,
    #[serde(rename = "highQuality")]
    pub high_quality: QualityProfile,
    #[serde(rename = "lowQuality")]
    pub low_quality: Option<QualityProfile>,
    pub target: TargetConfig,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CameraPorts {
    pub server: u16,
    pub rtsp: u16,
    pub snapshot: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QualityProfile {
    /// RTSP path template, e.g. "/live/ch{channel}/main".
    pub rtsp: String,
    /// Snapshot path template. A camera without one falls back to the
    /// built-in placeholder image.
    pub snapshot: Option<String>,
    pub width: u32,
    pub height: u32,
    pub framerate: u32,
    pub bitrate: u32,
    pub quality: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    pub hostname: String,
    pub ports: TargetPorts,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TargetPorts {
    pub rtsp: u16,
    pub snapshot: u16,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DiscoveryMode {
    /// One ProbeMatch for a single camera (one listener per process).
    Single,
    /// One ProbeMatches envelope carrying every registered camera.
    Combined,
    /// One datagram per camera, spaced by `pace_delay_ms`.
    Paced,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_discovery_mode")]
    pub mode: DiscoveryMode,
    /// Inter-datagram delay for the paced mode. The useful value depends on
    /// the NVR's receive behavior, so it is a knob rather than a constant.
    #[serde(default = "default_pace_delay_ms")]
    pub pace_delay_ms: u64,
    #[serde(default = "default_discovery_port")]
    pub port: u16,
    #[serde(default = "default_multicast_addr")]
    pub multicast_addr: Ipv4Addr,
    /// Interface IP to join the multicast group on (all interfaces if unset).
    pub interface: Option<Ipv4Addr>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub username: String,
    pub password: String,
}

fn default_channel() -> u16 { 1 }
fn default_true() -> bool { true }
fn default_discovery_mode() -> DiscoveryMode { DiscoveryMode::Paced }
fn default_pace_delay_ms() -> u64 { 200 }
fn default_discovery_port() -> u16 { 3702 }
fn default_multicast_addr() -> Ipv4Addr { Ipv4Addr::new(239, 255, 255, 250) }

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: default_discovery_mode(),
            pace_delay_ms: default_pace_delay_ms(),
            port: default_discovery_port(),
            multicast_addr: default_multicast_addr(),
            interface: None,
        }
    }
}

impl QualityProfile {
    /// Substitute the `{channel}` placeholder in the path templates.
    pub fn resolve(&self, channel: u16) -> QualityProfile {
        let ch = channel.to_string();
        QualityProfile {
            rtsp: self.rtsp.replace("{channel}", &ch),
            snapshot: self.snapshot.as_ref().map(|s| s.replace("{channel}", &ch)),
            ..self.clone()
        }
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Config = if path.ends_with(".json") {
            serde_json::from_str(&content)?
        } else {
            serde_yaml::from_str(&content)?
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for camera in &self.onvif {
            if !seen.insert(camera.uuid) {
                return Err(ServerError::config(format!(
                    "Duplicate camera uuid {} ({})",
                    camera.uuid, camera.name
                )));
            }
        }
        Ok(())
    }
}
