use std::{
    env,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::PathBuf,
};

use crate::dataframe::Orient;

/// Per-serving configuration, checked once when the unit is built.
#[derive(Debug, Clone, Default)]
pub struct ServingConfig {
    pub test_data_path: Option<PathBuf>,
    pub model_name: Option<String>,
    pub pandas_orient: Orient,
}

impl ServingConfig {
    pub fn new(test_data_path: impl Into<PathBuf>) -> Self {
        Self {
            test_data_path: Some(test_data_path.into()),
            ..Self::default()
        }
    }

    pub fn with_model_name(mut self, name: impl Into<String>) -> Self {
        self.model_name = Some(name.into());
        self
    }

    pub fn with_orient(mut self, orient: Orient) -> Self {
        self.pandas_orient = orient;
        self
    }
}

/// Flags applied to every unit's router.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerOptions {
    pub gzip_response: bool,
    pub redirect_https: bool,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            gzip_response: true,
            redirect_https: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub listen_addr: SocketAddr,
    pub module_name: String,
    pub data_dir: PathBuf,
    pub pandas_orient: Orient,
    pub options: ServerOptions,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let listen_addr = env::var("SERVER_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:8080".into())
            .parse()
            .unwrap_or_else(|_| SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8080));

        let module_name = env::var("MODEL_MODULE").unwrap_or_else(|_| "models".to_string());
        let data_dir = PathBuf::from(env::var("DATA_DIR").unwrap_or_else(|_| "data".to_string()));
        let pandas_orient = match env::var("PANDAS_ORIENT") {
            Ok(raw) => raw.trim().parse::<Orient>()?,
            Err(_) => Orient::default(),
        };

        let defaults = ServerOptions::default();
        let gzip_response = env::var("GZIP_RESPONSE")
            .ok()
            .and_then(|v| parse_flag(&v))
            .unwrap_or(defaults.gzip_response);
        let redirect_https = env::var("REDIRECT_HTTPS")
            .ok()
            .and_then(|v| parse_flag(&v))
            .unwrap_or(defaults.redirect_https);

        Ok(Self {
            listen_addr,
            module_name,
            data_dir,
            pandas_orient,
            options: ServerOptions {
                gzip_response,
                redirect_https,
            },
        })
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags() {
        assert_eq!(parse_flag("TRUE"), Some(true));
        assert_eq!(parse_flag(" off "), Some(false));
        assert_eq!(parse_flag("maybe"), None);
    }

    #[test]
    fn gzip_on_by_default() {
        let options = ServerOptions::default();
        assert!(options.gzip_response);
        assert!(!options.redirect_https);
    }

    #[test]
    fn builder() {
        let config = ServingConfig::new("data/x.json")
            .with_model_name("x")
            .with_orient(Orient::Records);
        assert_eq!(config.test_data_path, Some(PathBuf::from("data/x.json")));
        assert_eq!(config.model_name.as_deref(), Some("x"));
        assert_eq!(config.pandas_orient, Orient::Records);
        assert_eq!(ServingConfig::default().pandas_orient, Orient::Index);
    }
}
