//! MySQL testcontainer harness

use anyhow::{Context, Result};
use sluice_cdc::mysql::{MySqlBinlogClient, SessionConfig};
use testcontainers::{runners::AsyncRunner, ContainerAsync, ImageExt};
use testcontainers_modules::mysql::Mysql;
use tokio::time::Duration;
use tracing::info;

const ROOT_PASSWORD: &str = "rootpassword";

/// MySQL container with row-based binary logging
pub struct MySqlTestContainer {
    #[allow(dead_code)]
    container: ContainerAsync<Mysql>,
    host: String,
    port: u16,
}

impl MySqlTestContainer {
    /// Start a MySQL container configured as a replication source
    pub async fn start() -> Result<Self> {
        info!("Starting MySQL test container...");

        let container = Mysql::default()
            .with_env_var("MYSQL_ROOT_PASSWORD", ROOT_PASSWORD)
            .with_cmd(vec![
                "--server-id=1",
                "--log-bin=mysql-bin",
                "--binlog-format=ROW",
                "--binlog-row-image=FULL",
                "--binlog-row-metadata=FULL",
                "--gtid_mode=ON",
                "--enforce-gtid-consistency=ON",
                // No TLS in tests, so avoid caching_sha2 full authentication
                "--default-authentication-plugin=mysql_native_password",
            ])
            .start()
            .await
            .context("Failed to start MySQL container")?;

        let host = container.get_host().await?.to_string();
        let port = container.get_host_port_ipv4(3306).await?;

        info!("MySQL container started at {}:{}", host, port);
        Self::wait_for_mysql(&host, port).await?;

        Ok(Self {
            container,
            host,
            port,
        })
    }

    async fn wait_for_mysql(host: &str, port: u16) -> Result<()> {
        let timeout_duration = Duration::from_secs(60);
        let check_interval = Duration::from_millis(500);

        let start = std::time::Instant::now();
        while start.elapsed() < timeout_duration {
            match connect(host, port).await {
                Ok(_) => {
                    info!("MySQL is ready");
                    return Ok(());
                }
                Err(e) => {
                    tracing::debug!("MySQL not ready yet: {}", e);
                    tokio::time::sleep(check_interval).await;
                }
            }
        }

        anyhow::bail!("MySQL did not become ready within {:?}", timeout_duration);
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn user(&self) -> &str {
        "root"
    }

    pub fn password(&self) -> &str {
        ROOT_PASSWORD
    }

    /// Run statements in order on one connection
    pub async fn execute_batch(&self, statements: &[&str]) -> Result<()> {
        let mut client = connect(&self.host, self.port).await?;
        for stmt in statements {
            client.query(stmt).await?;
        }
        Ok(())
    }

    pub async fn execute(&self, sql: &str) -> Result<()> {
        self.execute_batch(&[sql]).await
    }

    /// Session config pointing at this container
    pub fn session_config(&self, server_id: u32) -> SessionConfig {
        SessionConfig::new(&self.host, self.user())
            .with_password(self.password())
            .with_port(self.port)
            .with_server_id(server_id)
    }
}

async fn connect(host: &str, port: u16) -> Result<MySqlBinlogClient> {
    let password = Some(ROOT_PASSWORD);
    Ok(MySqlBinlogClient::connect(host, port, "root", password, Duration::from_secs(5)).await?)
}
