//! Test server management.
//!
//! Spawns and manages parleyd instances for integration testing.

use std::path::Path;
use std::process::{Child, Command};
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::sleep;

/// A test server instance.
pub struct TestServer {
    child: Child,
    port: u16,
    http_port: u16,
    // Owned scratch directory, removed on drop. `None` when the caller owns it.
    _data_dir: Option<TempDir>,
}

impl TestServer {
    /// Spawn a server on `port` with a fresh database and no HTTP surface.
    pub async fn spawn(port: u16) -> anyhow::Result<Self> {
        let dir = tempfile::tempdir()?;
        let mut server = Self::launch(port, 0, dir.path(), &[]).await?;
        server._data_dir = Some(dir);
        Ok(server)
    }

    /// Spawn a server with the HTTP surface on `http_port`.
    #[allow(dead_code)]
    pub async fn spawn_with_http(port: u16, http_port: u16) -> anyhow::Result<Self> {
        let dir = tempfile::tempdir()?;
        let mut server = Self::launch(port, http_port, dir.path(), &[]).await?;
        server.wait_for_port(http_port).await?;
        server._data_dir = Some(dir);
        Ok(server)
    }

    /// Spawn a server that only accepts the given WebSocket origins.
    #[allow(dead_code)]
    pub async fn spawn_with_origins(port: u16, origins: &[&str]) -> anyhow::Result<Self> {
        let dir = tempfile::tempdir()?;
        let mut server = Self::launch(port, 0, dir.path(), origins).await?;
        server._data_dir = Some(dir);
        Ok(server)
    }

    /// Spawn a server whose database lives in `dir`, which outlives the server.
    #[allow(dead_code)]
    pub async fn spawn_in(port: u16, dir: &Path) -> anyhow::Result<Self> {
        Self::launch(port, 0, dir, &[]).await
    }

    async fn launch(
        port: u16,
        http_port: u16,
        dir: &Path,
        origins: &[&str],
    ) -> anyhow::Result<Self> {
        let config_path = dir.join("config.toml");
        let origins = origins
            .iter()
            .map(|o| format!("{:?}", o))
            .collect::<Vec<_>>()
            .join(", ");
        let config_content = format!(
            r#"
[server]
name = "parley.test"
http_port = {http_port}

[listen]
address = "127.0.0.1:{port}"
allow_origins = [{origins}]
outbound_queue = 64

[database]
path = {db:?}

[security]
argon2_memory_kib = 1024
argon2_iterations = 1
argon2_parallelism = 1
"#,
            db = dir.join("parley.db").display().to_string(),
        );
        std::fs::write(&config_path, config_content)?;

        let child = Command::new(env!("CARGO_BIN_EXE_parleyd"))
            .arg(&config_path)
            .env("RUST_LOG", "warn")
            .spawn()?;

        let server = Self {
            child,
            port,
            http_port,
            _data_dir: None,
        };
        server.wait_for_port(port).await?;
        Ok(server)
    }

    /// Wait until something is accepting connections on `port`.
    async fn wait_for_port(&self, port: u16) -> anyhow::Result<()> {
        for _ in 0..50 {
            if tokio::net::TcpStream::connect(("127.0.0.1", port))
                .await
                .is_ok()
            {
                return Ok(());
            }
            sleep(Duration::from_millis(100)).await;
        }
        anyhow::bail!("Server failed to listen on {} within 5 seconds", port)
    }

    /// WebSocket URL of this server.
    pub fn url(&self) -> String {
        format!("ws://127.0.0.1:{}/", self.port)
    }

    /// Address of the HTTP surface.
    #[allow(dead_code)]
    pub fn http_address(&self) -> String {
        format!("127.0.0.1:{}", self.http_port)
    }

    /// Create a new test client connected to this server.
    pub async fn connect(&self) -> anyhow::Result<super::client::TestClient> {
        super::client::TestClient::connect(&self.url()).await
    }

    /// Kill the process without a clean shutdown.
    #[allow(dead_code)]
    pub fn kill(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.kill();
    }
}
