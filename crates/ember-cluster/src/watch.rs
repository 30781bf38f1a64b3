//! Cluster availability watcher.
//!
//! After the control-plane manifests are written, the API server container
//! is expected to come up under the node agent. The watcher locates it
//! through the container runtime, then races two polling activities under a
//! shared deadline: container status (a non-zero exit code fails the wait
//! immediately) and the component health endpoint (the first 200 succeeds
//! it immediately, cancelling the status poll).
//!
//! When the component crashes and live logs were not requested, the node
//! agent is stopped to halt restart churn and the runtime's log directory
//! is scanned newest-first for the crashed container's most recent log
//! segment, whose contents are surfaced alongside the failure. Under fast
//! restart loops the recorded log path itself may already have rotated
//! away.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::error::ComponentFailure;
use crate::init::InitSystem;
use crate::runtime::{ContainerHandle, RuntimeService};
use crate::ClusterError;

/// Health probing seam; the production implementation issues HTTP requests
/// against the component's health endpoint.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// One probe attempt. `true` means definitively healthy.
    async fn healthy(&self) -> bool;
}

/// Probe that treats any 200 response from `url` as healthy. The client is
/// rebuilt per attempt so a CA certificate written earlier in the same run
/// is picked up.
pub struct HttpHealthProbe {
    pub url: String,
    pub ca_path: Option<std::path::PathBuf>,
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn healthy(&self) -> bool {
        let mut builder = reqwest::Client::builder().timeout(Duration::from_secs(1));
        if let Some(ca_path) = &self.ca_path {
            match std::fs::read(ca_path).map(|pem| reqwest::Certificate::from_pem(&pem)) {
                Ok(Ok(ca)) => builder = builder.add_root_certificate(ca),
                _ => return false,
            }
        }
        let Ok(client) = builder.build() else {
            return false;
        };
        match client.get(&self.url).send().await {
            Ok(resp) => resp.status() == reqwest::StatusCode::OK,
            Err(e) => {
                debug!(url = %self.url, error = %e, "health probe failed");
                false
            }
        }
    }
}

/// Watcher states, in the order they are normally traversed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WatchState {
    Locating,
    Racing,
    Succeeded,
    Failed,
    TimedOut,
}

/// Watches one managed component until it becomes available, crashes, or
/// the deadline elapses.
pub struct AvailabilityWatcher {
    pub runtime: Arc<dyn RuntimeService>,
    pub init: Arc<dyn InitSystem>,
    pub probe: Arc<dyn HealthProbe>,

    /// Component label value to locate, e.g. `ember-apiserver`.
    pub component: String,

    /// Node agent unit to stop when recovering logs from a crash loop.
    pub agent_service: String,

    pub timeout: Duration,
    pub poll_interval: Duration,

    /// Stream component logs live instead of recovering them on failure.
    pub verbose: bool,
}

impl AvailabilityWatcher {
    /// Run the watcher to completion.
    pub async fn wait_available(&self) -> Result<(), ClusterError> {
        let deadline = Instant::now() + self.timeout;
        debug!(component = %self.component, state = ?WatchState::Locating);

        let container = match tokio::time::timeout_at(deadline, self.locate()).await {
            Ok(container) => container?,
            Err(elapsed) => {
                debug!(component = %self.component, state = ?WatchState::TimedOut);
                return Err(elapsed.into());
            }
        };

        // The container is located once; managed components are not
        // expected to be replaced during initial bootstrapping.
        let initial = self.runtime.container_status(&container.id).await?;
        debug!(component = %self.component, id = %container.id, state = ?WatchState::Racing);

        let tail = if self.verbose {
            let runtime = self.runtime.clone();
            let log_path = initial.log_path.clone();
            Some(tokio::spawn(async move {
                if let Err(e) = runtime.tail_logs(&log_path).await {
                    error!(error = %e, "cannot tail log");
                }
            }))
        } else {
            None
        };

        let raced = tokio::time::timeout_at(deadline, self.race(&container)).await;
        if let Some(tail) = tail {
            tail.abort();
        }
        match raced {
            Ok(Ok(())) => {
                debug!(component = %self.component, state = ?WatchState::Succeeded);
                Ok(())
            }
            Ok(Err(failure)) => {
                debug!(component = %self.component, state = ?WatchState::Failed);
                self.report_failure(failure, &initial.log_path).await
            }
            Err(elapsed) => {
                debug!(component = %self.component, state = ?WatchState::TimedOut);
                Err(elapsed.into())
            }
        }
    }

    /// Poll the runtime until exactly one container carries the component
    /// label.
    async fn locate(&self) -> Result<ContainerHandle, ClusterError> {
        loop {
            match self.runtime.list_components(&self.component).await {
                Ok(mut containers) if containers.len() == 1 => {
                    return Ok(containers.remove(0));
                }
                Ok(containers) => {
                    debug!(
                        component = %self.component,
                        found = containers.len(),
                        "waiting for exactly one component container"
                    );
                }
                Err(e) => debug!(component = %self.component, error = %e, "cannot list containers"),
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Race status polling against health polling. Returns `Ok(())` on the
    /// first healthy response and `Err` on the first observed crash; the
    /// losing activity is cancelled.
    async fn race(&self, container: &ContainerHandle) -> Result<(), ComponentFailure> {
        let status_poll = async {
            loop {
                match self.runtime.container_status(&container.id).await {
                    Ok(status) if status.exit_code != 0 => {
                        return ComponentFailure {
                            name: self.component.clone(),
                            exit_code: status.exit_code,
                            logs: None,
                        };
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "cannot query container status");
                        return ComponentFailure {
                            name: self.component.clone(),
                            exit_code: -1,
                            logs: None,
                        };
                    }
                }
                tokio::time::sleep(self.poll_interval).await;
            }
        };
        let health_poll = async {
            loop {
                if self.probe.healthy().await {
                    return;
                }
                tokio::time::sleep(self.poll_interval).await;
            }
        };
        tokio::select! {
            failure = status_poll => Err(failure),
            () = health_poll => Ok(()),
        }
    }

    /// Attach the crashed container's most recent log segment to the
    /// failure. The agent is stopped first: under its restart policy the
    /// component may be restarting every second, rotating the recorded log
    /// path away before it can be read.
    async fn report_failure(
        &self,
        mut failure: ComponentFailure,
        log_path: &Path,
    ) -> Result<(), ClusterError> {
        if self.verbose {
            // Logs already streamed live.
            return Err(ClusterError::ComponentFailed(failure));
        }
        self.init.stop(&self.agent_service).await?;

        let dir = log_path.parent().unwrap_or(log_path);
        let mut files: Vec<_> = match std::fs::read_dir(dir) {
            Ok(entries) => entries.filter_map(|e| e.ok()).map(|e| e.path()).collect(),
            Err(e) => {
                debug!(dir = %dir.display(), error = %e, "cannot read log directory");
                Vec::new()
            }
        };
        files.sort();
        files.reverse();
        for file in files {
            match self.runtime.read_logs(&file).await {
                Ok(contents) => {
                    failure.logs = Some(contents);
                    return Err(ClusterError::ComponentFailed(failure));
                }
                Err(e) => {
                    debug!(path = %file.display(), error = %e, "cannot read log path");
                    continue;
                }
            }
        }
        Err(ClusterError::ComponentFailed(failure))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};
    use std::sync::Mutex;

    use crate::runtime::ContainerStatus;

    use super::*;

    struct FakeRuntime {
        containers: Vec<ContainerHandle>,
        exit_code: AtomicI32,
        log_path: std::path::PathBuf,
        log_contents: Mutex<std::collections::BTreeMap<std::path::PathBuf, String>>,
    }

    impl FakeRuntime {
        fn new(log_path: std::path::PathBuf) -> Self {
            Self {
                containers: vec![ContainerHandle {
                    id: "abc123".to_string(),
                }],
                exit_code: AtomicI32::new(0),
                log_path,
                log_contents: Mutex::new(Default::default()),
            }
        }
    }

    #[async_trait]
    impl RuntimeService for FakeRuntime {
        async fn list_components(
            &self,
            _component: &str,
        ) -> Result<Vec<ContainerHandle>, ClusterError> {
            Ok(self.containers.clone())
        }

        async fn container_status(&self, _id: &str) -> Result<ContainerStatus, ClusterError> {
            Ok(ContainerStatus {
                exit_code: self.exit_code.load(Ordering::SeqCst),
                log_path: self.log_path.clone(),
            })
        }

        async fn read_logs(&self, path: &Path) -> Result<String, ClusterError> {
            self.log_contents
                .lock()
                .unwrap()
                .get(path)
                .cloned()
                .ok_or_else(|| ClusterError::Runtime("no such log".to_string()))
        }

        async fn tail_logs(&self, _path: &Path) -> Result<(), ClusterError> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    struct FakeInit {
        stopped: AtomicBool,
    }

    #[async_trait]
    impl InitSystem for FakeInit {
        async fn start(&self, _unit: &str) -> Result<(), ClusterError> {
            Ok(())
        }

        async fn stop(&self, _unit: &str) -> Result<(), ClusterError> {
            self.stopped.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn is_active(&self, _unit: &str) -> Result<bool, ClusterError> {
            Ok(true)
        }
    }

    struct ScriptedProbe {
        healthy_after: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl HealthProbe for ScriptedProbe {
        async fn healthy(&self) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst) + 1 >= self.healthy_after
        }
    }

    fn watcher(
        runtime: Arc<FakeRuntime>,
        init: Arc<FakeInit>,
        probe: Arc<ScriptedProbe>,
        timeout: Duration,
    ) -> AvailabilityWatcher {
        AvailabilityWatcher {
            runtime,
            init,
            probe,
            component: "ember-apiserver".to_string(),
            agent_service: "ember-agent.service".to_string(),
            timeout,
            poll_interval: Duration::from_millis(10),
            verbose: false,
        }
    }

    #[tokio::test]
    async fn test_health_success_returns_before_timeout() {
        let runtime = Arc::new(FakeRuntime::new("/logs/apiserver/0.log".into()));
        let init = Arc::new(FakeInit {
            stopped: AtomicBool::new(false),
        });
        let probe = Arc::new(ScriptedProbe {
            healthy_after: 3,
            calls: AtomicUsize::new(0),
        });
        let w = watcher(runtime, init.clone(), probe, Duration::from_secs(30));

        let started = std::time::Instant::now();
        w.wait_available().await.unwrap();
        assert!(
            started.elapsed() < Duration::from_secs(5),
            "must not wait out the full timeout"
        );
        assert!(!init.stopped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_crash_fails_immediately_with_recovered_logs() {
        let dir = tempfile::tempdir().unwrap();
        let log_dir = dir.path().join("apiserver");
        std::fs::create_dir_all(&log_dir).unwrap();
        // The recorded log path has rotated away; only a newer rotated
        // segment remains on disk.
        let recorded = log_dir.join("3.log");
        let rotated = log_dir.join("9.log");
        std::fs::write(&rotated, "fatal: flag provided but not defined").unwrap();

        let runtime = Arc::new(FakeRuntime::new(recorded));
        runtime.exit_code.store(1, Ordering::SeqCst);
        runtime.log_contents.lock().unwrap().insert(
            rotated.clone(),
            "fatal: flag provided but not defined".to_string(),
        );
        let init = Arc::new(FakeInit {
            stopped: AtomicBool::new(false),
        });
        let probe = Arc::new(ScriptedProbe {
            healthy_after: usize::MAX,
            calls: AtomicUsize::new(0),
        });
        let w = watcher(runtime, init.clone(), probe, Duration::from_secs(30));

        let started = std::time::Instant::now();
        let err = w.wait_available().await.unwrap_err();
        assert!(
            started.elapsed() < Duration::from_secs(5),
            "must fail immediately instead of waiting out the timeout"
        );
        match err {
            ClusterError::ComponentFailed(failure) => {
                assert_eq!(failure.exit_code, 1);
                assert_eq!(
                    failure.logs.as_deref(),
                    Some("fatal: flag provided but not defined")
                );
            }
            other => panic!("expected component failure, got {other}"),
        }
        assert!(
            init.stopped.load(Ordering::SeqCst),
            "agent must be stopped to halt restart churn"
        );
    }

    #[tokio::test]
    async fn test_deadline_elapses_while_locating() {
        // No containers ever match.
        let mut runtime = FakeRuntime::new("/logs/apiserver/0.log".into());
        runtime.containers.clear();
        let runtime = Arc::new(runtime);
        let init = Arc::new(FakeInit {
            stopped: AtomicBool::new(false),
        });
        let probe = Arc::new(ScriptedProbe {
            healthy_after: 1,
            calls: AtomicUsize::new(0),
        });
        let w = watcher(runtime, init, probe, Duration::from_millis(100));
        let err = w.wait_available().await.unwrap_err();
        assert!(matches!(err, ClusterError::DeadlineExceeded(_)));
    }
}
