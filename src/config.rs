use crate::backup::DEFAULT_RETAIN;
use crate::error::VisitAtlasError;
use crate::guard;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_STORE: &str = "data/visits.json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Project root; static files are served from here.
    pub root: PathBuf,
    pub bind: IpAddr,
    pub port: u16,
    /// Store location relative to `root`.
    pub store: PathBuf,
    pub retain: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            bind: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: DEFAULT_PORT,
            store: PathBuf::from(DEFAULT_STORE),
            retain: DEFAULT_RETAIN,
        }
    }
}

impl ServerConfig {
    /// Defaults overlaid with `PORT` and `VISIT_ATLAS_ROOT`.
    pub fn from_env() -> crate::Result<Self> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    pub fn from_vars<F>(lookup: F) -> crate::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(port) = lookup("PORT") {
            config.port = port.trim().parse().map_err(|_| {
                VisitAtlasError::Configuration(format!("PORT must be a port number, got {:?}", port))
            })?;
        }
        if let Some(root) = lookup("VISIT_ATLAS_ROOT") {
            if !root.trim().is_empty() {
                config.root = PathBuf::from(root);
            }
        }
        Ok(config)
    }

    pub fn validate(&self) -> crate::Result<()> {
        if !guard::is_loopback(self.bind) {
            return Err(VisitAtlasError::Configuration(format!(
                "refusing to bind {}: the editor server only listens on loopback",
                self.bind
            )));
        }
        if self.retain == 0 {
            return Err(VisitAtlasError::Configuration(
                "backup retention must keep at least one backup".to_string(),
            ));
        }
        if !guard::is_contained(&self.store) {
            return Err(VisitAtlasError::Configuration(format!(
                "store path must be a file path relative to the root, got {}",
                self.store.display()
            )));
        }
        Ok(())
    }

    /// Replace `root` with its absolute form, so file paths reported back to
    /// callers do not depend on the working directory.
    pub fn canonicalize_root(&mut self) -> crate::Result<()> {
        self.root = self.root.canonicalize().map_err(|e| {
            VisitAtlasError::Configuration(format!(
                "project root {} is not usable: {}",
                self.root.display(),
                e
            ))
        })?;
        Ok(())
    }

    pub fn store_file(&self) -> PathBuf {
        self.root.join(&self.store)
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }
}
