//! Client configuration: defaults, overridden by an optional config file,
//! then by `RC_`-prefixed environment variables, then by CLI flags.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use rc_core::RcError;
use serde::{Deserialize, Serialize};
use tokio_tungstenite::Connector;

pub const DEFAULT_PORT: u16 = 4515;
pub const DEFAULT_KEY_DIR: &str = "/etc/rc/keys";
pub const DEFAULT_KEY_NAME: &str = "client";
pub const DEFAULT_LOG_LEVEL: &str = "info";
pub const DEFAULT_BATCH_SIZE: usize = 10;
pub const DEFAULT_DELAY_MS: u64 = 0;
pub const DEFAULT_RETRY: u32 = 0;

/// Configuration as loaded from a JSON/TOML config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub port: u16,
    pub key_dir: String,
    pub key_name: String,
    pub log_level: String,
    pub batch_size: usize,
    pub delay_ms: u64,
    pub verbose: bool,
    pub retry: u32,
    pub tls_ca_file: String,
    pub tls_skip_verify: bool,
    pub tls_disable: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            key_dir: DEFAULT_KEY_DIR.to_string(),
            key_name: DEFAULT_KEY_NAME.to_string(),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            delay_ms: DEFAULT_DELAY_MS,
            verbose: false,
            retry: DEFAULT_RETRY,
            tls_ca_file: String::new(),
            tls_skip_verify: false,
            tls_disable: false,
        }
    }
}

impl ClientConfig {
    /// Load a config file, falling back to defaults if absent or invalid.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    /// Build the TLS connector implied by this configuration: disabled
    /// entirely, skip-verify, pinned CA, or the platform's native roots.
    pub fn tls_connector(&self) -> Result<Connector, RcError> {
        if self.tls_disable {
            return Ok(Connector::Plain);
        }

        let mut roots = tokio_rustls::rustls::RootCertStore::empty();
        if self.tls_ca_file.is_empty() {
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        } else {
            let pem = std::fs::read(&self.tls_ca_file).map_err(|e| {
                RcError::ConfigInvalid(format!("reading {}: {e}", self.tls_ca_file))
            })?;
            let mut reader = std::io::BufReader::new(pem.as_slice());
            for cert in rustls_pemfile::certs(&mut reader) {
                let cert =
                    cert.map_err(|e| RcError::ConfigInvalid(format!("parsing CA file: {e}")))?;
                roots
                    .add(cert)
                    .map_err(|e| RcError::ConfigInvalid(format!("invalid CA cert: {e}")))?;
            }
        }

        let builder = tokio_rustls::rustls::ClientConfig::builder();
        let tls_config = if self.tls_skip_verify {
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(danger::NoVerify))
                .with_no_client_auth()
        } else {
            builder.with_root_certificates(roots).with_no_client_auth()
        };

        Ok(Connector::Rustls(Arc::new(tls_config)))
    }
}

/// Execute a shell command on one or many remote hosts running the
/// companion server.
#[derive(Debug, Parser)]
#[command(name = "rc", version)]
pub struct Cli {
    /// `COMMAND`, or `HOST COMMAND`. With a single positional argument,
    /// hosts are read line-by-line from standard input; with two, the
    /// first is the host.
    #[arg(required = true, num_args = 1..=2)]
    pub args: Vec<String>,

    /// Path to a TOML formatted configuration file.
    #[arg(short = 'c', long = "config-file", default_value = "")]
    pub config_file: String,

    /// Port to connect to.
    #[arg(short = 'p', long, env = "RC_PORT")]
    pub port: Option<u16>,

    /// Directory containing this client's private key.
    #[arg(short = 'd', long = "key-dir", env = "RC_KEY_DIR")]
    pub key_dir: Option<String>,

    /// Name of the key file (without extension) to sign requests with.
    #[arg(short = 'k', long = "key-name", env = "RC_KEY_NAME")]
    pub key_name: Option<String>,

    /// The log level. One of: error, warn, info, debug.
    #[arg(long = "log-level", env = "RC_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Number of hosts dispatched in parallel per batch.
    #[arg(short = 'b', long = "batch-size", env = "RC_BATCH_SIZE")]
    pub batch_size: Option<usize>,

    /// Milliseconds to sleep between batches.
    #[arg(long, env = "RC_DELAY")]
    pub delay: Option<u64>,

    /// Print the raw response object instead of colorized output.
    #[arg(short = 'v', long, env = "RC_VERBOSE")]
    pub verbose: bool,

    /// Number of times to retry a failed connection attempt.
    #[arg(short = 'r', long, env = "RC_RETRY")]
    pub retry: Option<u32>,

    /// Path to a CA bundle used to verify the server's certificate.
    #[arg(long = "tls-ca-file", env = "RC_TLS_CA_FILE")]
    pub tls_ca_file: Option<String>,

    /// Skip TLS certificate verification entirely.
    #[arg(long = "tls-skip-verify", env = "RC_TLS_SKIP_VERIFY")]
    pub tls_skip_verify: bool,

    /// Disable TLS and connect in plaintext.
    #[arg(long = "tls-disable", env = "RC_TLS_DISABLE")]
    pub tls_disable: bool,
}

/// The two accepted CLI argument shapes: `rc HOST COMMAND` (single host)
/// or `rc COMMAND` (hosts streamed from stdin).
pub enum Target {
    SingleHost { host: String, command: String },
    Streaming { command: String },
}

impl Cli {
    /// Fold the config file (if any) and CLI/env overrides into one config.
    pub fn resolve(&self) -> ClientConfig {
        let mut cfg = if self.config_file.is_empty() {
            ClientConfig::default()
        } else {
            ClientConfig::load(&PathBuf::from(&self.config_file))
        };

        if let Some(port) = self.port {
            cfg.port = port;
        }
        if let Some(key_dir) = &self.key_dir {
            cfg.key_dir = key_dir.clone();
        }
        if let Some(key_name) = &self.key_name {
            cfg.key_name = key_name.clone();
        }
        if let Some(log_level) = &self.log_level {
            cfg.log_level = log_level.clone();
        }
        if let Some(batch_size) = self.batch_size {
            cfg.batch_size = batch_size;
        }
        if let Some(delay) = self.delay {
            cfg.delay_ms = delay;
        }
        if self.verbose {
            cfg.verbose = true;
        }
        if let Some(retry) = self.retry {
            cfg.retry = retry;
        }
        if let Some(tls_ca_file) = &self.tls_ca_file {
            cfg.tls_ca_file = tls_ca_file.clone();
        }
        if self.tls_skip_verify {
            cfg.tls_skip_verify = true;
        }
        if self.tls_disable {
            cfg.tls_disable = true;
        }

        cfg
    }

    /// Resolve the positional arguments into single-host or streaming mode.
    ///
    /// With two positional args, the first is the host. With one, it's
    /// the command and hosts stream from stdin.
    pub fn target(&self) -> Target {
        match self.args.as_slice() {
            [host, command] => Target::SingleHost {
                host: host.clone(),
                command: command.clone(),
            },
            [command] => Target::Streaming {
                command: command.clone(),
            },
            _ => unreachable!("clap enforces num_args = 1..=2"),
        }
    }
}

mod danger {
    use tokio_rustls::rustls::client::danger::{
        HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
    };
    use tokio_rustls::rustls::pki_types::{CertificateDer, ServerName, UnixTime};
    use tokio_rustls::rustls::{DigitallySignedStruct, Error, SignatureScheme};

    /// Accepts any server certificate. Only reachable via `--tls-skip-verify`.
    #[derive(Debug)]
    pub struct NoVerify;

    impl ServerCertVerifier for NoVerify {
        fn verify_server_cert(
            &self,
            _end_entity: &CertificateDer<'_>,
            _intermediates: &[CertificateDer<'_>],
            _server_name: &ServerName<'_>,
            _ocsp_response: &[u8],
            _now: UnixTime,
        ) -> Result<ServerCertVerified, Error> {
            Ok(ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn verify_tls13_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
            vec![
                SignatureScheme::RSA_PKCS1_SHA256,
                SignatureScheme::ECDSA_NISTP256_SHA256,
                SignatureScheme::ED25519,
                SignatureScheme::RSA_PKCS1_SHA384,
                SignatureScheme::ECDSA_NISTP384_SHA384,
                SignatureScheme::RSA_PKCS1_SHA512,
            ]
        }
    }
}
