use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;
use std::time::Duration;

pub const DEFAULT_REMOTE_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_STORE_TIMEOUT_MS: u64 = 3_000;
pub const DEFAULT_GROUPS_RESOURCE_SERVER: &str = "groups.api.globus.org";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Memory,
    Postgres,
}

impl StorageBackend {
    fn parse(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "memory" => Ok(StorageBackend::Memory),
            "postgres" => Ok(StorageBackend::Postgres),
            other => bail!("unknown storage backend: {other}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub url: String,
    pub max_connections: u32,
    pub connect_timeout_ms: u64,
    pub acquire_timeout_ms: u64,
}

/// Endpoints and client credentials for the identity and group services.
#[derive(Debug, Clone)]
pub struct AuthServiceConfig {
    pub introspect_url: String,
    pub dependent_token_url: String,
    pub groups_url: String,
    pub groups_resource_server: String,
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Debug, Clone, Copy)]
pub struct TimeoutConfig {
    pub remote: Duration,
    pub store: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            remote: Duration::from_millis(DEFAULT_REMOTE_TIMEOUT_MS),
            store: Duration::from_millis(DEFAULT_STORE_TIMEOUT_MS),
        }
    }
}

// Control plane configuration sourced from environment variables.
#[derive(Debug, Clone)]
pub struct ControlPlaneConfig {
    pub metrics_bind: SocketAddr,
    pub storage: StorageBackend,
    pub postgres: Option<PostgresConfig>,
    pub auth: AuthServiceConfig,
    pub timeouts: TimeoutConfig,
}

#[derive(Debug, Default, Deserialize)]
struct ControlPlaneConfigOverride {
    metrics_bind: Option<String>,
    storage: Option<String>,
    postgres_url: Option<String>,
    postgres_max_connections: Option<u32>,
    introspect_url: Option<String>,
    dependent_token_url: Option<String>,
    groups_url: Option<String>,
    groups_resource_server: Option<String>,
    client_id: Option<String>,
    remote_timeout_ms: Option<u64>,
    store_timeout_ms: Option<u64>,
}

impl ControlPlaneConfig {
    pub fn from_env() -> Result<Self> {
        let metrics_bind = env_or("FNPLANE_METRICS_BIND", "0.0.0.0:9090")
            .parse()
            .with_context(|| "parse FNPLANE_METRICS_BIND")?;
        let storage = StorageBackend::parse(&env_or("FNPLANE_STORAGE", "memory"))?;
        let postgres = match std::env::var("FNPLANE_POSTGRES_URL") {
            Ok(url) => Some(PostgresConfig {
                url,
                max_connections: env_parse("FNPLANE_POSTGRES_MAX_CONNECTIONS", 10)?,
                connect_timeout_ms: env_parse("FNPLANE_POSTGRES_CONNECT_TIMEOUT_MS", 5_000)?,
                acquire_timeout_ms: env_parse("FNPLANE_POSTGRES_ACQUIRE_TIMEOUT_MS", 5_000)?,
            }),
            Err(_) => None,
        };
        let auth = AuthServiceConfig {
            introspect_url: env_or(
                "FNPLANE_AUTH_INTROSPECT_URL",
                "https://auth.globus.org/v2/oauth2/token/introspect",
            ),
            dependent_token_url: env_or(
                "FNPLANE_AUTH_TOKEN_URL",
                "https://auth.globus.org/v2/oauth2/token",
            ),
            groups_url: env_or(
                "FNPLANE_GROUPS_URL",
                "https://groups.api.globus.org/v2/groups/my_groups",
            ),
            groups_resource_server: env_or(
                "FNPLANE_GROUPS_RESOURCE_SERVER",
                DEFAULT_GROUPS_RESOURCE_SERVER,
            ),
            client_id: env_or("FNPLANE_CLIENT_ID", ""),
            client_secret: env_or("FNPLANE_CLIENT_SECRET", ""),
        };
        let timeouts = TimeoutConfig {
            remote: Duration::from_millis(env_parse(
                "FNPLANE_REMOTE_TIMEOUT_MS",
                DEFAULT_REMOTE_TIMEOUT_MS,
            )?),
            store: Duration::from_millis(env_parse(
                "FNPLANE_STORE_TIMEOUT_MS",
                DEFAULT_STORE_TIMEOUT_MS,
            )?),
        };
        Ok(Self {
            metrics_bind,
            storage,
            postgres,
            auth,
            timeouts,
        })
    }

    pub fn from_env_or_yaml() -> Result<Self> {
        let mut config = Self::from_env()?;
        if let Ok(path) = std::env::var("FNPLANE_CONFIG") {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("read FNPLANE_CONFIG: {path}"))?;
            config.apply_yaml(&contents)?;
        }
        Ok(config)
    }

    /// Apply a YAML override document on top of the current values.
    ///
    /// The client secret is deliberately env-only.
    pub fn apply_yaml(&mut self, contents: &str) -> Result<()> {
        let override_cfg: ControlPlaneConfigOverride =
            serde_yaml::from_str(contents).with_context(|| "parse control plane config yaml")?;
        if let Some(value) = override_cfg.metrics_bind {
            self.metrics_bind = value.parse().with_context(|| "parse metrics_bind")?;
        }
        if let Some(value) = override_cfg.storage {
            self.storage = StorageBackend::parse(&value)?;
        }
        if let Some(url) = override_cfg.postgres_url {
            let pg = self.postgres.get_or_insert_with(|| PostgresConfig {
                url: String::new(),
                max_connections: 10,
                connect_timeout_ms: 5_000,
                acquire_timeout_ms: 5_000,
            });
            pg.url = url;
        }
        if let (Some(value), Some(pg)) = (override_cfg.postgres_max_connections, &mut self.postgres)
        {
            pg.max_connections = value;
        }
        if let Some(value) = override_cfg.introspect_url {
            self.auth.introspect_url = value;
        }
        if let Some(value) = override_cfg.dependent_token_url {
            self.auth.dependent_token_url = value;
        }
        if let Some(value) = override_cfg.groups_url {
            self.auth.groups_url = value;
        }
        if let Some(value) = override_cfg.groups_resource_server {
            self.auth.groups_resource_server = value;
        }
        if let Some(value) = override_cfg.client_id {
            self.auth.client_id = value;
        }
        if let Some(value) = override_cfg.remote_timeout_ms {
            self.timeouts.remote = Duration::from_millis(value);
        }
        if let Some(value) = override_cfg.store_timeout_ms {
            self.timeouts.store = Duration::from_millis(value);
        }
        Ok(())
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(value) => value.parse().with_context(|| format!("parse {key}")),
        Err(_) => Ok(default),
    }
}
