use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub storage_backend: StorageBackend,
    /// Required for the Postgres backend.
    pub database_url: Option<String>,
    pub port: u16,
    pub db_max_connections: u32,
    pub rate_limit_per_second: u64,
    pub rate_limit_burst: u32,
    pub max_body_bytes: usize,
    /// Whether self-registration needs a verified contact code (2FA).
    pub require_verified_contact: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_backend: StorageBackend::Memory,
            database_url: None,
            port: 3000,
            db_max_connections: 10,
            rate_limit_per_second: 10,
            rate_limit_burst: 20,
            max_body_bytes: 1024 * 1024,
            require_verified_contact: false,
        }
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> anyhow::Result<T> {
    match std::env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("{} has an invalid value: {}", name, raw)),
        _ => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        let storage_backend = match std::env::var("STORAGE_BACKEND")
            .unwrap_or_else(|_| "postgres".to_string())
            .trim()
            .to_ascii_lowercase()
            .as_str()
        {
            "postgres" | "postgresql" => StorageBackend::Postgres,
            "memory" => StorageBackend::Memory,
            other => anyhow::bail!(
                "STORAGE_BACKEND must be 'postgres' or 'memory', got '{}'",
                other
            ),
        };

        let database_url = std::env::var("DB_URL")
            .or_else(|_| std::env::var("DATABASE_URL"))
            .ok()
            .filter(|url| !url.trim().is_empty());

        if storage_backend == StorageBackend::Postgres {
            match &database_url {
                None => anyhow::bail!("DB_URL or DATABASE_URL environment variable required"),
                Some(url) => {
                    if !url.starts_with("postgresql://") && !url.starts_with("postgres://") {
                        anyhow::bail!("DB_URL must start with postgresql:// or postgres://");
                    }
                }
            }
        }

        let config = Self {
            storage_backend,
            database_url,
            port: std::env::var("PORT")
                .unwrap_or_else(|_| defaults.port.to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number between 1-65535"))?,
            db_max_connections: parse_var("DB_MAX_CONNECTIONS", defaults.db_max_connections)?,
            rate_limit_per_second: parse_var(
                "RATE_LIMIT_PER_SECOND",
                defaults.rate_limit_per_second,
            )?,
            rate_limit_burst: parse_var("RATE_LIMIT_BURST", defaults.rate_limit_burst)?,
            max_body_bytes: parse_var("MAX_BODY_BYTES", defaults.max_body_bytes)?,
            require_verified_contact: parse_var(
                "REQUIRE_VERIFIED_CONTACT",
                defaults.require_verified_contact,
            )?,
        };

        if config.db_max_connections == 0 {
            anyhow::bail!("DB_MAX_CONNECTIONS must be at least 1");
        }
        if config.rate_limit_per_second == 0 || config.rate_limit_burst == 0 {
            anyhow::bail!("RATE_LIMIT_PER_SECOND and RATE_LIMIT_BURST must be at least 1");
        }

        // Log successful configuration load (without sensitive values)
        tracing::info!("Configuration loaded successfully");
        if let Some(url) = &config.database_url {
            tracing::debug!("Database URL: {}...", url.chars().take(20).collect::<String>());
        }
        tracing::debug!("Storage backend: {:?}", config.storage_backend);
        tracing::debug!("Server Port: {}", config.port);
        if !config.require_verified_contact {
            tracing::info!("Contact verification disabled for self-registration");
        }

        Ok(config)
    }
}
