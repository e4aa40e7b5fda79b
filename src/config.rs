use std::fs::File;
use std::io::{self, BufReader, ErrorKind};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use pgwire::tokio::TlsAcceptor;
use pgwire::tokio::tokio_rustls::rustls::ServerConfig;

/// Server settings, read once from `SLOTD_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
    /// JSON offering catalog; empty catalog when unset.
    pub catalog_path: Option<PathBuf>,
    /// How long a provider has to answer a PENDING request.
    pub response_timeout: Duration,
    pub reaper_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5433,
            bind: "0.0.0.0".into(),
            data_dir: PathBuf::from("./data"),
            password: "slotd".into(),
            max_connections: 256,
            compact_threshold: 1000,
            metrics_port: None,
            tls_cert: None,
            tls_key: None,
            catalog_path: None,
            response_timeout: Duration::from_secs(48 * 3600),
            reaper_interval: Duration::from_secs(60),
        }
    }
}

fn parsed<T: std::str::FromStr>(vars: &impl Fn(&str) -> Option<String>, key: &str) -> io::Result<Option<T>> {
    match vars(key) {
        None => Ok(None),
        Some(raw) => raw.trim().parse().map(Some).map_err(|_| {
            io::Error::new(ErrorKind::InvalidInput, format!("{key}: cannot parse {raw:?}"))
        }),
    }
}

impl Config {
    pub fn from_env() -> io::Result<Self> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset keys keep their defaults.
    pub fn from_vars(vars: impl Fn(&str) -> Option<String>) -> io::Result<Self> {
        let d = Self::default();
        let config = Self {
            port: parsed(&vars, "SLOTD_PORT")?.unwrap_or(d.port),
            bind: vars("SLOTD_BIND").unwrap_or(d.bind),
            data_dir: vars("SLOTD_DATA_DIR").map(PathBuf::from).unwrap_or(d.data_dir),
            password: vars("SLOTD_PASSWORD").unwrap_or(d.password),
            max_connections: parsed(&vars, "SLOTD_MAX_CONNECTIONS")?.unwrap_or(d.max_connections),
            compact_threshold: parsed(&vars, "SLOTD_COMPACT_THRESHOLD")?.unwrap_or(d.compact_threshold),
            metrics_port: parsed(&vars, "SLOTD_METRICS_PORT")?,
            tls_cert: vars("SLOTD_TLS_CERT"),
            tls_key: vars("SLOTD_TLS_KEY"),
            catalog_path: vars("SLOTD_CATALOG").map(PathBuf::from),
            response_timeout: parsed(&vars, "SLOTD_RESPONSE_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(d.response_timeout),
            reaper_interval: parsed(&vars, "SLOTD_REAPER_INTERVAL_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(d.reaper_interval),
        };
        if config.max_connections == 0 {
            return Err(io::Error::new(ErrorKind::InvalidInput, "SLOTD_MAX_CONNECTIONS must be positive"));
        }
        if config.reaper_interval.is_zero() {
            return Err(io::Error::new(ErrorKind::InvalidInput, "SLOTD_REAPER_INTERVAL_SECS must be positive"));
        }
        Ok(config)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("slotd.wal")
    }

    pub fn tls_acceptor(&self) -> io::Result<Option<TlsAcceptor>> {
        load_tls_acceptor(self.tls_cert.as_deref(), self.tls_key.as_deref())
    }
}

pub fn load_tls_acceptor(
    cert_path: Option<&str>,
    key_path: Option<&str>,
) -> io::Result<Option<TlsAcceptor>> {
    let (cert_path, key_path) = match (cert_path, key_path) {
        (None, None) => return Ok(None),
        (Some(c), Some(k)) => (c, k),
        _ => {
            return Err(io::Error::new(
                ErrorKind::InvalidInput,
                "both SLOTD_TLS_CERT and SLOTD_TLS_KEY must be set, or neither",
            ));
        }
    };

    let certs: Vec<_> = rustls_pemfile::certs(&mut BufReader::new(File::open(cert_path)?))
        .collect::<Result<_, _>>()?;

    let key = rustls_pemfile::private_key(&mut BufReader::new(File::open(key_path)?))?
        .ok_or_else(|| io::Error::new(ErrorKind::InvalidInput, "no private key found in key file"))?;

    let mut config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| io::Error::new(ErrorKind::InvalidInput, e))?;

    config.alpn_protocols = vec![b"postgresql".to_vec()];

    Ok(Some(TlsAcceptor::from(Arc::new(config))))
}
