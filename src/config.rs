use std::collections::BTreeMap;
use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::bootstrap::{Bootstrap, ImportMap, DEFAULT_ENTRY_MODULE};
use crate::ipc::{
    BaseUrlResolver, CustomSchemeResolver, LocalhostResolver, ProtocolResolver, ProtocolStyle,
};

pub const CONFIG_ENV: &str = "LENZ_BRIDGE_CONFIG";
const DEFAULT_LISTEN: &str = "127.0.0.1:4815";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read bridge config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("failed to derive base url from {0}: {1}")]
    BaseUrl(SocketAddr, url::ParseError),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub window_id: String,
    pub listen: SocketAddr,
    pub protocol: ProtocolStyle,
    pub base_url: Option<Url>,
    pub asset_root: Option<PathBuf>,
    pub import_map: BTreeMap<String, String>,
    pub entry_module: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            window_id: String::from("1"),
            listen: DEFAULT_LISTEN
                .parse()
                .unwrap_or_else(|_| SocketAddr::from(([127, 0, 0, 1], 4815))),
            protocol: ProtocolStyle::default(),
            base_url: None,
            asset_root: None,
            import_map: BTreeMap::new(),
            entry_module: DEFAULT_ENTRY_MODULE.to_string(),
        }
    }
}

impl BridgeConfig {
    /// Load from `config_path`, falling back to defaults when no path is given
    /// or the file does not exist.
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        match config_path {
            Some(path) if path.exists() => {
                let contents = fs::read_to_string(path)?;
                Ok(serde_yaml::from_str(&contents)?)
            }
            _ => Ok(Self::default()),
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(std::env::var(CONFIG_ENV).ok().map(PathBuf::from))
    }

    /// The resolver pages and transports should use. `base-url` without an
    /// explicit `base_url` points at the peer's own listen address.
    pub fn resolver(&self) -> Result<Arc<dyn ProtocolResolver>, ConfigError> {
        Ok(match self.protocol {
            ProtocolStyle::Scheme => Arc::new(CustomSchemeResolver),
            ProtocolStyle::Localhost => Arc::new(LocalhostResolver),
            ProtocolStyle::BaseUrl => {
                let base = match &self.base_url {
                    Some(url) => url.clone(),
                    None => Url::parse(&format!("http://{}/", self.listen))
                        .map_err(|err| ConfigError::BaseUrl(self.listen, err))?,
                };
                Arc::new(BaseUrlResolver::new(base))
            }
        })
    }

    pub fn import_map(&self) -> ImportMap {
        self.import_map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }

    pub fn bootstrap(&self) -> Result<Bootstrap, ConfigError> {
        let resolver = self.resolver()?;
        Ok(Bootstrap::new(self.import_map(), resolver.as_ref())
            .with_entry_module(self.entry_module.clone()))
    }
}
