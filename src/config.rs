use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::Deserialize;

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_registration() -> bool {
    true
}

/// Server configuration. Priority: CLI args > environment > TOML file >
/// defaults. Environment variables use the `AIRLIFT_` prefix.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Holds the SQLite database and the object store root.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Public base URL for download links (e.g. "https://ota.example.com").
    /// Defaults to the bind address.
    #[serde(default)]
    pub public_base_url: Option<String>,
    /// Secret for signing download URLs. Defaults to the secret written by
    /// `admin init` into the data directory.
    #[serde(default)]
    pub url_signing_secret: Option<String>,
    /// Allowed CORS origins; empty or "*" allows any origin.
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// When false, the external identity layer must reject unknown emails.
    #[serde(default = "default_registration")]
    pub enable_account_registration: bool,
    // Pass-through credentials for the external identity collaborator.
    #[serde(default)]
    pub oauth_client_id: Option<String>,
    #[serde(default)]
    pub oauth_client_secret: Option<String>,
    #[serde(default)]
    pub jwt_secret: Option<String>,
}

/// CLI overrides that can be applied on top of a config file.
#[derive(Debug, Default)]
pub struct ServerConfigOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub data_dir: Option<PathBuf>,
    pub public_base_url: Option<String>,
}

impl ServerConfig {
    /// Default config file search paths.
    const SEARCH_PATHS: &'static [&'static str] = &["./airlift.toml", "/etc/airlift/airlift.toml"];

    pub fn socket_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
    }

    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("airlift.db")
    }

    #[must_use]
    pub fn signing_secret_path(&self) -> PathBuf {
        self.data_dir.join(".signing_secret")
    }

    /// The base URL clients reach this server under.
    #[must_use]
    pub fn base_url(&self) -> String {
        self.public_base_url
            .clone()
            .unwrap_or_else(|| format!("http://{}:{}", self.host, self.port))
    }

    /// Load config from a specific file path.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: ServerConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Search for a config file in default locations and load if found.
    pub fn load_from_search_paths() -> Option<Self> {
        for path_str in Self::SEARCH_PATHS {
            let path = Path::new(path_str);
            if path.exists() {
                if let Ok(config) = Self::load(path) {
                    return Some(config);
                }
            }
        }
        None
    }

    /// Applies `AIRLIFT_*` environment variables on top of the file values.
    pub fn apply_env(&mut self) {
        if let Ok(host) = std::env::var("AIRLIFT_HOST") {
            self.host = host;
        }
        if let Ok(port) = std::env::var("AIRLIFT_PORT") {
            if let Ok(port) = port.parse() {
                self.port = port;
            }
        }
        if let Ok(data_dir) = std::env::var("AIRLIFT_DATA_DIR") {
            self.data_dir = data_dir.into();
        }
        if let Ok(url) = std::env::var("AIRLIFT_PUBLIC_BASE_URL") {
            self.public_base_url = Some(url);
        }
        if let Ok(secret) = std::env::var("AIRLIFT_URL_SIGNING_SECRET") {
            self.url_signing_secret = Some(secret);
        }
        if let Ok(origins) = std::env::var("AIRLIFT_CORS_ORIGINS") {
            self.cors_origins = origins
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Ok(flag) = std::env::var("AIRLIFT_ENABLE_ACCOUNT_REGISTRATION") {
            self.enable_account_registration = flag != "false" && flag != "0";
        }
        if let Ok(id) = std::env::var("AIRLIFT_OAUTH_CLIENT_ID") {
            self.oauth_client_id = Some(id);
        }
        if let Ok(secret) = std::env::var("AIRLIFT_OAUTH_CLIENT_SECRET") {
            self.oauth_client_secret = Some(secret);
        }
        if let Ok(secret) = std::env::var("AIRLIFT_JWT_SECRET") {
            self.jwt_secret = Some(secret);
        }
    }

    /// Load config with env and CLI overrides applied.
    pub fn load_with_overrides(
        config_path: Option<&Path>,
        overrides: ServerConfigOverrides,
    ) -> anyhow::Result<Self> {
        let mut config = if let Some(path) = config_path {
            Self::load(path)?
        } else {
            Self::load_from_search_paths().unwrap_or_default()
        };

        config.apply_env();

        if let Some(host) = overrides.host {
            config.host = host;
        }
        if let Some(port) = overrides.port {
            config.port = port;
        }
        if let Some(data_dir) = overrides.data_dir {
            config.data_dir = data_dir;
        }
        if overrides.public_base_url.is_some() {
            config.public_base_url = overrides.public_base_url;
        }

        Ok(config)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            data_dir: default_data_dir(),
            public_base_url: None,
            url_signing_secret: None,
            cors_origins: Vec::new(),
            enable_account_registration: true,
            oauth_client_id: None,
            oauth_client_secret: None,
            jwt_secret: None,
        }
    }
}
