//! Shared test doubles.

use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::init::InitSystem;
use crate::runtime::{ContainerHandle, ContainerStatus, RuntimeService};
use crate::watch::HealthProbe;
use crate::ClusterError;

/// Runtime with no containers; queries fail.
pub struct NullRuntime;

#[async_trait]
impl RuntimeService for NullRuntime {
    async fn list_components(&self, _component: &str) -> Result<Vec<ContainerHandle>, ClusterError> {
        Ok(Vec::new())
    }

    async fn container_status(&self, id: &str) -> Result<ContainerStatus, ClusterError> {
        Err(ClusterError::Runtime(format!("no such container: {id}")))
    }

    async fn read_logs(&self, path: &Path) -> Result<String, ClusterError> {
        Err(ClusterError::Runtime(format!(
            "no such log: {}",
            path.display()
        )))
    }

    async fn tail_logs(&self, _path: &Path) -> Result<(), ClusterError> {
        std::future::pending::<()>().await;
        Ok(())
    }
}

/// Init system recording start/stop calls.
#[derive(Default)]
pub struct RecordingInit {
    calls: Mutex<Vec<(String, String)>>,
}

impl RecordingInit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn started(&self) -> Vec<String> {
        self.units("start")
    }

    pub fn stopped(&self) -> Vec<String> {
        self.units("stop")
    }

    fn units(&self, op: &str) -> Vec<String> {
        self.calls
            .lock()
            .expect("init lock poisoned")
            .iter()
            .filter(|(o, _)| o == op)
            .map(|(_, unit)| unit.clone())
            .collect()
    }
}

#[async_trait]
impl InitSystem for RecordingInit {
    async fn start(&self, unit: &str) -> Result<(), ClusterError> {
        self.calls
            .lock()
            .expect("init lock poisoned")
            .push(("start".to_string(), unit.to_string()));
        Ok(())
    }

    async fn stop(&self, unit: &str) -> Result<(), ClusterError> {
        self.calls
            .lock()
            .expect("init lock poisoned")
            .push(("stop".to_string(), unit.to_string()));
        Ok(())
    }

    async fn is_active(&self, _unit: &str) -> Result<bool, ClusterError> {
        Ok(true)
    }
}

/// Probe that always reports healthy.
pub struct AlwaysHealthy;

#[async_trait]
impl HealthProbe for AlwaysHealthy {
    async fn healthy(&self) -> bool {
        true
    }
}

/// Probe that never reports healthy.
pub struct NeverHealthy;

#[async_trait]
impl HealthProbe for NeverHealthy {
    async fn healthy(&self) -> bool {
        false
    }
}
