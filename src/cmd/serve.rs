//! HTTP service command — `cla-assistant serve`.

use anyhow::Result;

use cla_assistant::cla::server::{ServerConfig, start_server};
use cla_assistant::config::ClaConfig;

/// Flag overrides applied on top of the loaded configuration.
#[derive(Debug, Default)]
pub struct ServeOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub db_path: Option<std::path::PathBuf>,
    pub base_url: Option<String>,
    pub dev: bool,
}

pub async fn cmd_serve(config: &ClaConfig, overrides: ServeOverrides) -> Result<()> {
    for warning in config.validate() {
        tracing::warn!("{}", warning);
    }

    let mut server = ServerConfig::from(config);
    if let Some(host) = overrides.host {
        server.host = host;
    } else if overrides.dev {
        server.host = "0.0.0.0".to_string();
    }
    if let Some(port) = overrides.port {
        server.port = port;
    }
    if let Some(db_path) = overrides.db_path {
        server.db_path = db_path;
    }
    if let Some(base_url) = overrides.base_url {
        server.base_url = base_url;
    }
    server.dev_mode = overrides.dev;

    start_server(server).await
}
