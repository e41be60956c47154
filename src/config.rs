use clap::Parser;
use std::{env, fmt, path::PathBuf, str::FromStr, time::Duration};
use thiserror::Error;

/// Retry count handed to every store connection.
pub const STORE_RETRIES: u32 = 3;
/// TCP connect timeout for store requests.
pub const STORE_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Maximum time without receiving data from the store.
pub const STORE_READ_TIMEOUT: Duration = Duration::from_secs(60);
/// Container used when `SWIFT_CONTAINER` is not set.
pub const DEFAULT_CONTAINER: &str = "test";
/// Keystone version used when the configured one is absent or unparsable.
pub const DEFAULT_AUTH_VERSION: u8 = 3;

/// Which catalog endpoint to talk to after Keystone authentication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EndpointType {
    #[default]
    Public,
    Internal,
    Admin,
}

impl EndpointType {
    fn parse(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "internal" | "internalurl" => Self::Internal,
            "admin" | "adminurl" => Self::Admin,
            _ => Self::Public,
        }
    }

    /// Interface name as it appears in a Keystone v3 catalog.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Internal => "internal",
            Self::Admin => "admin",
        }
    }
}

/// Object store credentials and location, immutable for the process lifetime.
///
/// Built once at startup and shared by `Arc` with the connection pool and the
/// upload utility. Values are not validated; a missing username or key shows
/// up as an authentication failure on first use.
#[derive(Clone, Default)]
pub struct StoreConfig {
    pub username: String,
    pub api_key: String,
    pub auth_url: String,
    pub auth_version: u8,
    pub domain: String,
    pub tenant: String,
    pub tenant_id: String,
    pub tenant_domain: String,
    pub region: String,
    pub endpoint_type: EndpointType,
    pub container: String,
    pub local_file_path: Option<PathBuf>,
    pub object_name: Option<String>,
    pub retries: u32,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
}

impl StoreConfig {
    /// Read the store configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    ///
    /// Every field accepts both the `SWIFT_*` names and the OpenStack `OS_*`
    /// names; the first non-empty value wins.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let first = |keys: &[&str]| -> Option<String> {
            keys.iter()
                .filter_map(|&key| lookup(key))
                .map(|value| value.trim().to_string())
                .find(|value| !value.is_empty())
        };
        let text = |keys: &[&str]| first(keys).unwrap_or_default();

        let auth_version = first(&["SWIFT_AUTH_VERSION", "OS_IDENTITY_API_VERSION"])
            .and_then(|value| value.parse::<u8>().ok())
            .unwrap_or(DEFAULT_AUTH_VERSION);

        Self {
            username: text(&["SWIFT_USERNAME", "OS_USERNAME"]),
            api_key: text(&["SWIFT_PASSWORD", "SWIFT_API_KEY", "OS_PASSWORD"]),
            auth_url: text(&["SWIFT_AUTH_URL", "OS_AUTH_URL"]),
            auth_version,
            domain: text(&["SWIFT_DOMAIN", "OS_USER_DOMAIN_NAME", "OS_DOMAIN_NAME"]),
            tenant: text(&["SWIFT_TENANT", "OS_PROJECT_NAME", "OS_TENANT_NAME"]),
            tenant_id: text(&["SWIFT_TENANT_ID", "OS_PROJECT_ID", "OS_TENANT_ID"]),
            tenant_domain: text(&[
                "SWIFT_TENANT_DOMAIN",
                "OS_PROJECT_DOMAIN_NAME",
                "OS_PROJECT_DOMAIN",
            ]),
            region: text(&["SWIFT_REGION", "OS_REGION_NAME"]),
            endpoint_type: first(&["SWIFT_ENDPOINT_TYPE", "OS_INTERFACE"])
                .map(|value| EndpointType::parse(&value))
                .unwrap_or_default(),
            container: first(&["SWIFT_CONTAINER"]).unwrap_or_else(|| DEFAULT_CONTAINER.into()),
            local_file_path: first(&["LOCAL_FILE_PATH"]).map(PathBuf::from),
            object_name: first(&["SWIFT_OBJECT_NAME"]),
            retries: STORE_RETRIES,
            connect_timeout: STORE_CONNECT_TIMEOUT,
            read_timeout: STORE_READ_TIMEOUT,
        }
    }
}

impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfig")
            .field("username", &self.username)
            .field("api_key", &"<redacted>")
            .field("auth_url", &self.auth_url)
            .field("auth_version", &self.auth_version)
            .field("domain", &self.domain)
            .field("tenant", &self.tenant)
            .field("tenant_id", &self.tenant_id)
            .field("tenant_domain", &self.tenant_domain)
            .field("region", &self.region)
            .field("endpoint_type", &self.endpoint_type)
            .field("container", &self.container)
            .field("retries", &self.retries)
            .finish()
    }
}

/// Load `.env` into the process environment, best effort.
///
/// Must run before any configuration is read.
pub fn load_dotenv() {
    match dotenvy::dotenv() {
        Ok(path) => tracing::debug!("Loaded environment from {}", path.display()),
        Err(err) if err.not_found() => tracing::debug!("No .env file found: {}", err),
        Err(err) => tracing::warn!("Error loading .env file: {}", err),
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value `{value}` for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Gateway server configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub request_timeout: Duration,
    pub store: StoreConfig,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Streams objects out of an OpenStack Swift container")]
pub struct Args {
    /// Host to bind to (overrides GATEWAY_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides GATEWAY_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Container to serve objects from (overrides SWIFT_CONTAINER)
    #[arg(long)]
    pub container: Option<String>,

    /// Deadline in seconds for authenticating and opening an object
    /// (overrides GATEWAY_REQUEST_TIMEOUT_SECS)
    #[arg(long)]
    pub request_timeout_secs: Option<u64>,
}

impl AppConfig {
    /// Merge parsed CLI args over environment values.
    pub fn from_env_and_args(args: Args) -> Result<Self, ConfigError> {
        Self::from_lookup_and_args(args, |key| env::var(key).ok())
    }

    /// Merge parsed CLI args over values from an arbitrary key lookup.
    pub fn from_lookup_and_args<F>(args: Args, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env_host = lookup("GATEWAY_HOST")
            .filter(|host| !host.trim().is_empty())
            .unwrap_or_else(|| "0.0.0.0".into());
        let env_port = parse_value(&lookup, "GATEWAY_PORT", 8080u16)?;
        let env_timeout = parse_value(&lookup, "GATEWAY_REQUEST_TIMEOUT_SECS", 10u64)?;

        let mut store = StoreConfig::from_lookup(&lookup);
        if let Some(container) = args.container {
            store.container = container;
        }

        Ok(Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            request_timeout: Duration::from_secs(args.request_timeout_secs.unwrap_or(env_timeout)),
            store,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_value<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: fmt::Display,
{
    match lookup(key) {
        Some(value) if !value.trim().is_empty() => {
            value
                .trim()
                .parse::<T>()
                .map_err(|err| ConfigError::Invalid {
                    key,
                    value: value.clone(),
                    reason: err.to_string(),
                })
        }
        _ => Ok(default),
    }
}
