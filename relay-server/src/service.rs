use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use relay_config::{BackendKind, Config, HttpRelayConfig};

use crate::services::backend::Backend;
use crate::services::metering::Metering;
use crate::services::server::{HttpRelay, ServerError};
use crate::utils::BufferPool;

/// Number of idle request buffers kept by every relay.
const IDLE_BUFFERS: usize = 64;

/// Indicates the type of failure of the relay service.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// Two relays were configured with the same name.
    #[error("duplicate relay: {0:?}")]
    DuplicateRelay(String),

    /// A relay could not be created.
    #[error("could not create relay {name:?}")]
    Relay {
        /// Name of the relay.
        name: String,
        /// The reason the relay could not be created.
        #[source]
        source: ServerError,
    },
}

/// A relay that can be run and stopped by the [`RelayService`].
#[async_trait]
pub trait Relay: Send + Sync {
    /// Unique name of the relay.
    fn name(&self) -> &str;

    /// Runs the relay until it is stopped.
    async fn run(&self) -> anyhow::Result<()>;

    /// Stops the relay, making [`run`](Self::run) return.
    fn stop(&self);
}

#[derive(Debug)]
struct StateInner {
    name: String,
    config: HttpRelayConfig,
    backends: Vec<Backend>,
    metering: Option<Arc<Metering>>,
    pool: BufferPool,
}

/// Shared state of an HTTP relay, available to all request handlers.
#[derive(Clone, Debug)]
pub struct RelayState {
    inner: Arc<StateInner>,
}

impl RelayState {
    pub fn new(config: HttpRelayConfig, backends: Vec<Backend>) -> Self {
        let metering = config.enable_metering.then(|| Arc::new(Metering::new()));

        Self {
            inner: Arc::new(StateInner {
                name: config.name(),
                config,
                backends,
                metering,
                pool: BufferPool::new(IDLE_BUFFERS),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn config(&self) -> &HttpRelayConfig {
        &self.inner.config
    }

    pub fn backends(&self) -> &[Backend] {
        &self.inner.backends
    }

    /// Returns `true` if any backend receives split batches.
    pub fn has_time_series(&self) -> bool {
        self.backends()
            .iter()
            .any(|b| b.kind() == BackendKind::TimeSeries)
    }

    /// Returns `true` if any backend is a hierarchy store.
    pub fn has_hierarchy(&self) -> bool {
        self.backends()
            .iter()
            .any(|b| b.kind() == BackendKind::Hierarchy)
    }

    pub fn metering(&self) -> Option<&Arc<Metering>> {
        self.inner.metering.as_ref()
    }

    pub fn pool(&self) -> &BufferPool {
        &self.inner.pool
    }
}

/// Runs a set of uniquely named relays as a group.
pub struct RelayService {
    relays: BTreeMap<String, Arc<dyn Relay>>,
}

impl RelayService {
    /// Creates all relays configured in `config`.
    ///
    /// Listeners are bound immediately. Creating the service fails if two relays share a name or
    /// if any relay cannot be created.
    pub fn new(config: &Config) -> Result<Self, ServiceError> {
        let mut relays: Vec<Arc<dyn Relay>> = Vec::new();

        for relay_config in config.http_relays() {
            let name = relay_config.name();
            if relays.iter().any(|r| r.name() == name) {
                return Err(ServiceError::DuplicateRelay(name));
            }

            let relay = HttpRelay::new(relay_config.clone())
                .map_err(|source| ServiceError::Relay { name, source })?;
            relays.push(Arc::new(relay));
        }

        Self::from_relays(relays)
    }

    /// Creates a service from already constructed relays.
    pub fn from_relays(
        relays: impl IntoIterator<Item = Arc<dyn Relay>>,
    ) -> Result<Self, ServiceError> {
        let mut map = BTreeMap::new();

        for relay in relays {
            let name = relay.name().to_owned();
            if map.contains_key(&name) {
                return Err(ServiceError::DuplicateRelay(name));
            }
            map.insert(name, relay);
        }

        Ok(Self { relays: map })
    }

    /// Returns the names of all relays.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.relays.keys().map(String::as_str)
    }

    /// Runs all relays concurrently until every one of them has exited.
    ///
    /// A relay that fails is logged and does not affect the others.
    pub async fn run(&self) {
        let runs = self.relays.values().map(|relay| async move {
            if let Err(error) = relay.run().await {
                let error: &dyn std::error::Error = error.as_ref();
                relay_log::error!(
                    "relay {:?} stopped: {}",
                    relay.name(),
                    relay_log::LogError(error)
                );
            }
        });

        futures::future::join_all(runs).await;
    }

    /// Stops all relays.
    pub fn stop(&self) {
        for relay in self.relays.values() {
            relay.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use tokio::sync::Notify;

    use super::*;

    struct TestRelay {
        name: &'static str,
        fail: bool,
        stopped: AtomicBool,
        notify: Notify,
    }

    impl TestRelay {
        fn new(name: &'static str, fail: bool) -> Arc<Self> {
            Arc::new(Self {
                name,
                fail,
                stopped: AtomicBool::new(false),
                notify: Notify::new(),
            })
        }
    }

    #[async_trait]
    impl Relay for TestRelay {
        fn name(&self) -> &str {
            self.name
        }

        async fn run(&self) -> anyhow::Result<()> {
            if self.fail {
                anyhow::bail!("startup failed");
            }
            self.notify.notified().await;
            Ok(())
        }

        fn stop(&self) {
            self.stopped.store(true, Ordering::Relaxed);
            self.notify.notify_one();
        }
    }

    #[test]
    fn test_duplicate_relay() {
        let relays: Vec<Arc<dyn Relay>> = vec![
            TestRelay::new("r1", false) as Arc<dyn Relay>,
            TestRelay::new("r2", false),
            TestRelay::new("r1", false),
        ];

        let error = RelayService::from_relays(relays).err().unwrap();
        insta::assert_snapshot!(error.to_string(), @r#"duplicate relay: "r1""#);
    }

    #[tokio::test]
    async fn test_duplicate_configured_relay() {
        let config = Config::from_json_value(serde_json::json!({
            "http_relays": [
                {"name": "r1", "bind_addr": "127.0.0.1:0"},
                {"name": "r1", "bind_addr": "127.0.0.1:0"},
            ]
        }))
        .unwrap();

        let error = RelayService::new(&config).err().unwrap();
        assert!(matches!(error, ServiceError::DuplicateRelay(name) if name == "r1"));
    }

    #[tokio::test]
    async fn test_run_until_stopped() {
        let healthy = TestRelay::new("healthy", false);
        let broken = TestRelay::new("broken", true);
        let relays: Vec<Arc<dyn Relay>> = vec![healthy.clone() as Arc<dyn Relay>, broken.clone()];

        let service = Arc::new(RelayService::from_relays(relays).unwrap());
        assert_eq!(service.names().collect::<Vec<_>>(), ["broken", "healthy"]);

        let task = tokio::spawn({
            let service = service.clone();
            async move { service.run().await }
        });

        // The failing relay exits on its own, the healthy one keeps running.
        tokio::task::yield_now().await;
        assert!(!task.is_finished());

        service.stop();
        task.await.unwrap();
        assert!(healthy.stopped.load(Ordering::Relaxed));
        assert!(broken.stopped.load(Ordering::Relaxed));
    }

    #[tokio::test]
    async fn test_bind_failure_keeps_other_relays() {
        let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let occupied_addr = occupied.local_addr().unwrap();

        let config = Config::from_json_value(serde_json::json!({
            "http_relays": [
                {"name": "healthy", "bind_addr": "127.0.0.1:0"},
                {"name": "broken", "bind_addr": occupied_addr},
            ]
        }))
        .unwrap();
        assert!(RelayService::new(&config).is_ok());

        let relay = |name: &str| {
            let relay_config = config
                .http_relays()
                .iter()
                .find(|r| r.name() == name)
                .unwrap()
                .clone();
            Arc::new(HttpRelay::new(relay_config).unwrap())
        };
        let healthy = relay("healthy");
        let broken = relay("broken");
        let addr = healthy.local_addr().unwrap();
        assert_eq!(broken.local_addr(), None);

        let relays: Vec<Arc<dyn Relay>> = vec![healthy as Arc<dyn Relay>, broken];
        let service = Arc::new(RelayService::from_relays(relays).unwrap());
        let task = tokio::spawn({
            let service = service.clone();
            async move { service.run().await }
        });

        let response = reqwest::get(format!("http://{addr}/ping")).await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::NO_CONTENT);
        assert!(!task.is_finished());

        service.stop();
        task.await.unwrap();
    }
}
