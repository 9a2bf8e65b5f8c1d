//! Server orchestrator.
//!
//! Brings up the discovery responder and one device façade plus stream
//! proxy pair per configured camera. A single camera failing to start never
//! blocks the rest of the fleet; the summary reports how many made it.

use chrono::Utc;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::{CameraConfig, Config};
use crate::device::{self, DeviceFacade};
use crate::discovery::{DiscoveryHandle, DiscoveryResponder};
use crate::errors::{Result, ServerError};
use crate::proxy::StreamProxy;
use crate::registry::{CameraRegistration, CameraRegistry};

pub struct StartSummary {
    pub started: usize,
    pub failed: usize,
}

struct RunningCamera {
    uuid: Uuid,
    name: String,
    facade_task: JoinHandle<()>,
    proxies: Vec<StreamProxy>,
}

pub struct Fleet {
    registry: Arc<CameraRegistry>,
    discovery: Option<DiscoveryHandle>,
    cameras: Vec<RunningCamera>,
}

impl Fleet {
    /// Start the whole fleet. Discovery bind failure is fatal when discovery
    /// is enabled; per-camera failures are logged and counted.
    pub async fn start(config: Config, enable_discovery: bool) -> Result<(Fleet, StartSummary)> {
        let registry = Arc::new(CameraRegistry::new());

        let discovery = if enable_discovery && config.discovery.enabled {
            let responder = DiscoveryResponder::new(registry.clone(), config.discovery.clone());
            Some(responder.spawn()?)
        } else {
            info!("Discovery responder disabled");
            None
        };

        let mut fleet = Fleet {
            registry: registry.clone(),
            discovery,
            cameras: Vec::new(),
        };

        let mut summary = StartSummary { started: 0, failed: 0 };
        for camera_config in &config.onvif {
            match fleet.start_camera(camera_config, &config).await {
                Ok(()) => {
                    info!(
                        camera = %camera_config.name,
                        port = camera_config.ports.server,
                        "Camera started"
                    );
                    summary.started += 1;
                }
                Err(e) => {
                    error!(camera = %camera_config.name, "Failed to start camera: {}", e);
                    summary.failed += 1;
                }
            }
        }

        info!(
            started = summary.started,
            failed = summary.failed,
            "Fleet startup complete"
        );
        Ok((fleet, summary))
    }

    pub fn registry(&self) -> Arc<CameraRegistry> {
        self.registry.clone()
    }

    async fn start_camera(&mut self, camera: &CameraConfig, config: &Config) -> Result<()> {
        let hostname = match camera.hostname.clone().or_else(primary_local_ipv4) {
            Some(hostname) => hostname,
            None => {
                return Err(ServerError::config(format!(
                    "Failed to find IP address for MAC address {}",
                    camera.mac
                )))
            }
        };

        let facade = Arc::new(DeviceFacade::new(
            camera.clone(),
            hostname.clone(),
            config.auth.clone(),
        ));
        let (facade_task, _) = device::spawn(facade).await?;

        let mut proxies = Vec::new();
        let proxy_plan = [
            ("rtsp", camera.ports.rtsp, camera.target.ports.rtsp),
            ("snapshot", camera.ports.snapshot, camera.target.ports.snapshot),
        ];
        for (kind, local_port, target_port) in proxy_plan {
            let spawned = StreamProxy::spawn(
                format!("{}-{}", camera.name, kind),
                format!("{}:{}", hostname, local_port),
                format!("{}:{}", camera.target.hostname, target_port),
            )
            .await;
            match spawned {
                Ok(proxy) => proxies.push(proxy),
                Err(e) => {
                    // Marked failed as a whole: an ONVIF device whose stream
                    // ports are dead only confuses the NVR.
                    facade_task.abort();
                    for proxy in proxies {
                        proxy.stop();
                    }
                    return Err(e);
                }
            }
        }

        self.registry
            .register(CameraRegistration {
                uuid: camera.uuid,
                name: camera.name.clone(),
                hostname,
                port: camera.ports.server,
                mac: camera.mac.clone(),
                registered_at: Utc::now(),
            })
            .await;

        self.cameras.push(RunningCamera {
            uuid: camera.uuid,
            name: camera.name.clone(),
            facade_task,
            proxies,
        });
        Ok(())
    }

    /// Ordered teardown: unregister every camera, stop its listeners, then
    /// stop the discovery responder. Leaves the registry empty and the
    /// discovery port free for an immediate rebind.
    pub async fn shutdown(self) {
        info!("Shutting down fleet...");
        for camera in self.cameras {
            if !self.registry.unregister(camera.uuid).await {
                warn!(camera = %camera.name, "Camera was not registered at shutdown");
            }
            camera.facade_task.abort();
            for proxy in camera.proxies {
                proxy.stop();
            }
            info!(camera = %camera.name, "Camera stopped");
        }
        if let Some(discovery) = self.discovery {
            discovery.stop();
            info!("Discovery responder stopped");
        }
    }
}

/// Primary non-loopback IPv4 of this host, discovered by opening a UDP
/// socket towards a public address (no packets are sent).
fn primary_local_ipv4() -> Option<String> {
    let socket = std::net::UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    let addr = socket.local_addr().ok()?;
    Some(addr.ip().to_string())
}
