//! Test server harness for end-to-end tests.
//!
//! Provides TestGateServer, a real gate instance on a random local port.

use metrics_exporter_prometheus::PrometheusBuilder;
use registry_gate::config::Config;
use registry_gate::observability::metrics::init_metrics_recorder;
use registry_gate::routes::{self, AppState};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Running gate instance, aborted on drop.
///
/// # Example
/// ```rust,ignore
/// let cluster = MockServer::start().await;
/// let backend = MockServer::start().await;
/// let server = TestGateServer::spawn(test_config(&backend.uri(), &cluster.uri(), &[])).await?;
///
/// let response = reqwest::get(format!("{}/_ping", server.url())).await?;
/// assert_eq!(response.status(), 200);
/// ```
pub struct TestGateServer {
    addr: SocketAddr,
    config: Config,
    handle: JoinHandle<()>,
}

impl TestGateServer {
    /// Spawn a gate wired with the production collaborators built from `config`.
    pub async fn spawn(config: Config) -> Result<Self, anyhow::Error> {
        let state = AppState::from_config(config)
            .map_err(|e| anyhow::anyhow!("Failed to build application state: {}", e))?;
        Self::spawn_with_state(state).await
    }

    /// Spawn a gate around a hand-assembled state, for tests that swap in
    /// mock collaborators.
    pub async fn spawn_with_state(state: AppState) -> Result<Self, anyhow::Error> {
        let config = state.config.clone();

        // The global recorder can only be installed once per test process;
        // later servers get a standalone one.
        let metrics_handle = match init_metrics_recorder() {
            Ok(handle) => handle,
            Err(_) => PrometheusBuilder::new().build_recorder().handle(),
        };

        let app = routes::build_routes(Arc::new(state), metrics_handle);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;
        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                eprintln!("Test server error: {}", e);
            }
        });

        Ok(Self {
            addr,
            config,
            handle,
        })
    }

    /// Base URL of the test server.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

impl Drop for TestGateServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Configuration pointing the gate at mock backend and cluster servers.
///
/// The tenant namespace is `tenant` and robot credentials are set, so the
/// broker can run its token exchange. `extra` adds or overrides variables.
pub fn test_config(backend_url: &str, cluster_url: &str, extra: &[(&str, &str)]) -> Config {
    let mut vars: HashMap<String, String> = [
        ("BIND_ADDRESS", "127.0.0.1:0"),
        ("PROXY_URL", "https://gate.example.com"),
        ("BACKEND_URL", backend_url),
        ("BACKEND_NAMESPACE", "tenant"),
        ("BACKEND_USERNAME", "robot"),
        ("BACKEND_PASSWORD", "hunter2"),
        ("CLUSTER_URL", cluster_url),
        ("CLUSTER_TOKEN", "gate-sa-token"),
        ("UPSTREAM_TIMEOUT_SECONDS", "5"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();

    for (k, v) in extra {
        vars.insert((*k).to_string(), (*v).to_string());
    }

    Config::from_vars(&vars).expect("test configuration should be valid")
}
