//! Server configuration: defaults, overridden by an optional config file,
//! then by `RC_`-prefixed environment variables, then by CLI flags.

use std::path::{Path, PathBuf};

use clap::Parser;
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 4515;
pub const DEFAULT_HOST: &str = "";
pub const DEFAULT_CERT_DIR: &str = "/etc/rc/certs";
pub const DEFAULT_CIPHERS: &str = "TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256:TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384:TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256:TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384";
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Configuration as loaded from a JSON/TOML config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    pub cert_dir: String,
    pub ciphers: String,
    pub log_level: String,
    pub pid_file: String,
    pub tls_cert_file: String,
    pub tls_key_file: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            host: DEFAULT_HOST.to_string(),
            cert_dir: DEFAULT_CERT_DIR.to_string(),
            ciphers: DEFAULT_CIPHERS.to_string(),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            pid_file: String::new(),
            tls_cert_file: String::new(),
            tls_key_file: String::new(),
        }
    }
}

impl ServerConfig {
    /// Load a config file, falling back to defaults if absent or invalid.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Runs the remote-control service, allowing remote commands to be
/// executed on the system using the rc protocol.
#[derive(Debug, Parser)]
#[command(name = "remote-control", version)]
pub struct Cli {
    /// Path to a TOML formatted configuration file.
    #[arg(short = 'c', long = "config-file", default_value = "")]
    pub config_file: String,

    /// Port to listen on.
    #[arg(short = 'p', long, env = "RC_PORT")]
    pub port: Option<u16>,

    /// Path to the folder that contains authorized client public keys.
    #[arg(short = 'd', long = "cert-dir", env = "RC_CERTDIR")]
    pub cert_dir: Option<String>,

    /// The list of ciphers to use for TLS encryption.
    #[arg(long, env = "RC_CIPHERS")]
    pub ciphers: Option<String>,

    /// The log level. One of: error, warn, info, debug.
    #[arg(long = "log-level", env = "RC_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// The file to write the pid to (used for initv-style services).
    #[arg(long = "pid-file", env = "RC_PID_FILE")]
    pub pid_file: Option<String>,

    /// The host address to bind to.
    #[arg(short = 'H', long, env = "RC_HOST")]
    pub host: Option<String>,

    /// TLS certificate file. When set together with tls-key-file, the
    /// listener serves TLS.
    #[arg(long = "tls-cert-file", env = "RC_TLS_CERT_FILE")]
    pub tls_cert_file: Option<String>,

    /// TLS private key file.
    #[arg(long = "tls-key-file", env = "RC_TLS_KEY_FILE")]
    pub tls_key_file: Option<String>,
}

impl Cli {
    /// Fold the config file (if any) and CLI/env overrides into one config.
    pub fn resolve(&self) -> ServerConfig {
        let mut cfg = if self.config_file.is_empty() {
            ServerConfig::default()
        } else {
            ServerConfig::load(&PathBuf::from(&self.config_file))
        };

        if let Some(port) = self.port {
            cfg.port = port;
        }
        if let Some(host) = &self.host {
            cfg.host = host.clone();
        }
        if let Some(cert_dir) = &self.cert_dir {
            cfg.cert_dir = cert_dir.clone();
        }
        if let Some(ciphers) = &self.ciphers {
            cfg.ciphers = ciphers.clone();
        }
        if let Some(log_level) = &self.log_level {
            cfg.log_level = log_level.clone();
        }
        if let Some(pid_file) = &self.pid_file {
            cfg.pid_file = pid_file.clone();
        }
        if let Some(tls_cert_file) = &self.tls_cert_file {
            cfg.tls_cert_file = tls_cert_file.clone();
        }
        if let Some(tls_key_file) = &self.tls_key_file {
            cfg.tls_key_file = tls_key_file.clone();
        }

        cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let cfg = ServerConfig::default();
        let text = toml::to_string_pretty(&cfg).unwrap();
        assert!(text.contains("port"));
        assert!(text.contains("cert_dir"));
    }

    #[test]
    fn roundtrip_config() {
        let cfg = ServerConfig::default();
        let text = toml::to_string_pretty(&cfg).unwrap();
        let parsed: ServerConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.port, DEFAULT_PORT);
        assert_eq!(parsed.cert_dir, DEFAULT_CERT_DIR);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let cfg = ServerConfig::load(Path::new("/nonexistent/path/rc.toml"));
        assert_eq!(cfg.port, DEFAULT_PORT);
    }
}
