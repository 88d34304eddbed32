use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Folder used for the signer KV store when none is configured.
pub const DEFAULT_SIGNER_DB_FOLDER: &str = "signer_data";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {var}: {value}")]
    InvalidValue { var: String, value: String },

    #[error("{0} is empty")]
    EmptyField(&'static str),
}

/// Configures retry behavior of the THORNode HTTP client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first attempt.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            jitter: Duration::from_millis(100),
        }
    }
}

/// How long startup waits for the node account to be whitelisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WhitelistPolicy {
    pub deadline: Duration,
    pub poll_interval: Duration,
}

impl Default for WhitelistPolicy {
    fn default() -> Self {
        Self {
            deadline: Duration::from_secs(60 * 60),
            poll_interval: Duration::from_secs(30),
        }
    }
}

/// How long startup waits for the node account to publish its secp256k1 key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PubKeyBootstrapPolicy {
    pub attempts: u32,
    pub interval: Duration,
}

impl Default for PubKeyBootstrapPolicy {
    fn default() -> Self {
        Self {
            attempts: 300,
            interval: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfiguration {
    pub chain_id: String,
    /// `host:port` of the THORNode REST API; the scheme is always `http`.
    pub chain_host: String,
    pub chain_home_folder: String,
    pub signer_name: String,
    pub signer_passwd: String,
    /// Bech32 address of this node's signer account.
    pub signer_address: String,
    pub request_timeout: Duration,
    pub retry_policy: RetryPolicy,
    pub whitelist: WhitelistPolicy,
    pub pub_key_bootstrap: PubKeyBootstrapPolicy,
}

impl ClientConfiguration {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chain_id.is_empty() {
            return Err(ConfigError::EmptyField("chain id"));
        }
        if self.chain_host.is_empty() {
            return Err(ConfigError::EmptyField("chain host"));
        }
        if self.signer_name.is_empty() {
            return Err(ConfigError::EmptyField("signer name"));
        }
        if self.signer_passwd.is_empty() {
            return Err(ConfigError::EmptyField("signer password"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockScannerConfiguration {
    pub start_block_height: i64,
    /// Sleep between tip polls once the scanner has caught up.
    pub block_height_discover_backoff: Duration,
    pub block_retry_interval: Duration,
    /// Capacity of the height channel between the scanner and the processor.
    pub block_scan_processors: usize,
    pub db_path: PathBuf,
}

impl Default for BlockScannerConfiguration {
    fn default() -> Self {
        Self {
            start_block_height: 0,
            block_height_discover_backoff: Duration::from_secs(1),
            block_retry_interval: Duration::from_secs(60),
            block_scan_processors: 2,
            db_path: PathBuf::from(DEFAULT_SIGNER_DB_FOLDER),
        }
    }
}

pub struct Config {
    pub client: ClientConfiguration,
    pub block_scanner: BlockScannerConfiguration,
    /// Default: 0.0.0.0:3000
    pub metrics_addr: SocketAddr,
    /// How often vault pubkeys are re-read from THORNode. Default: 60s
    pub pub_key_refresh_interval: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup so tests don't have to mutate the
    /// process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key)
                .filter(|value| !value.is_empty())
                .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
        };

        let retry_policy = RetryPolicy {
            max_attempts: parse_or(
                &lookup,
                "HTTP_MAX_ATTEMPTS",
                RetryPolicy::default().max_attempts,
            )?,
            ..RetryPolicy::default()
        };

        let client = ClientConfiguration {
            chain_id: required("THORNODE_CHAIN_ID")?,
            chain_host: required("THORNODE_HOST")?,
            chain_home_folder: lookup("CHAIN_HOME_FOLDER")
                .unwrap_or_else(|| "~/.thorcli".to_string()),
            signer_name: required("SIGNER_NAME")?,
            signer_passwd: required("SIGNER_PASSWD")?,
            signer_address: required("SIGNER_ADDRESS")?,
            request_timeout: Duration::from_secs(parse_or(
                &lookup,
                "HTTP_REQUEST_TIMEOUT_SECS",
                30,
            )?),
            retry_policy,
            whitelist: WhitelistPolicy::default(),
            pub_key_bootstrap: PubKeyBootstrapPolicy::default(),
        };
        client.validate()?;

        let defaults = BlockScannerConfiguration::default();
        let block_scanner = BlockScannerConfiguration {
            start_block_height: parse_or(
                &lookup,
                "START_BLOCK_HEIGHT",
                defaults.start_block_height,
            )?,
            block_height_discover_backoff: Duration::from_millis(parse_or(
                &lookup,
                "BLOCK_HEIGHT_DISCOVER_BACKOFF_MS",
                1000,
            )?),
            block_retry_interval: Duration::from_secs(parse_or(
                &lookup,
                "BLOCK_RETRY_INTERVAL_SECS",
                60,
            )?),
            block_scan_processors: parse_or(
                &lookup,
                "BLOCK_SCAN_PROCESSORS",
                defaults.block_scan_processors,
            )?,
            db_path: lookup("SIGNER_DB_PATH")
                .filter(|path| !path.is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
        };

        let metrics_addr = parse_or(
            &lookup,
            "METRICS_ADDR",
            SocketAddr::from(([0, 0, 0, 0], 3000)),
        )?;
        let pub_key_refresh_interval =
            Duration::from_secs(parse_or(&lookup, "PUBKEY_REFRESH_INTERVAL_SECS", 60)?);

        Ok(Self {
            client,
            block_scanner,
            metrics_addr,
            pub_key_refresh_interval,
        })
    }
}

fn parse_or<F, T>(lookup: &F, var: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(var) {
        Some(value) => value.trim().parse::<T>().map_err(|_| ConfigError::InvalidValue {
            var: var.to_string(),
            value,
        }),
        None => Ok(default),
    }
}
