use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Registry entry for one running camera, as advertised over WS-Discovery.
#[derive(Debug, Clone)]
pub struct CameraRegistration {
    pub uuid: Uuid,
    pub name: String,
    pub hostname: String,
    pub port: u16,
    pub mac: String,
    pub registered_at: DateTime<Utc>,
}

/// Shared table of running cameras. Registering is a side effect of starting
/// a camera, unregistering a side effect of stopping it. The lock is held
/// only for insert/remove/snapshot, never across network I/O.
#[derive(Default)]
pub struct CameraRegistry {
    cameras: RwLock<HashMap<Uuid, CameraRegistration>>,
}

impl CameraRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, registration: CameraRegistration) {
        let mut cameras = self.cameras.write().await;
        cameras.insert(registration.uuid, registration);
    }

    pub async fn unregister(&self, uuid: Uuid) -> bool {
        let mut cameras = self.cameras.write().await;
        cameras.remove(&uuid).is_some()
    }

    /// Point-in-time copy of all registrations, ordered by name so that
    /// discovery responses are emitted in a stable order.
    pub async fn snapshot(&self) -> Vec<CameraRegistration> {
        let cameras = self.cameras.read().await;
        let mut list: Vec<CameraRegistration> = cameras.values().cloned().collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        list
    }

    pub async fn count(&self) -> usize {
        self.cameras.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.cameras.read().await.is_empty()
    }
}
