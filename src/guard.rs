//! Loopback-only origin check for the save endpoint, plus the path check
//! that keeps served and staged files inside their directory.
//!
//! The server has no authentication, so writes are limited to callers on the
//! same machine. This is a coarse boundary: any local process can still save.

use crate::error::VisitAtlasError;
use std::net::{IpAddr, SocketAddr};
use std::path::{Component, Path};

/// Accepts `127.0.0.0/8`, `::1` and IPv4-mapped loopback (`::ffff:127.0.0.1`).
pub fn is_loopback(addr: IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => v4.is_loopback(),
        IpAddr::V6(v6) => {
            v6.is_loopback() || v6.to_ipv4_mapped().is_some_and(|v4| v4.is_loopback())
        }
    }
}

pub fn check_origin(peer: Option<SocketAddr>) -> crate::Result<()> {
    match peer {
        Some(addr) if is_loopback(addr.ip()) => Ok(()),
        _ => Err(VisitAtlasError::Forbidden),
    }
}

/// True for a non-empty relative path made only of plain names, i.e. one
/// that stays inside whatever directory it is joined to.
pub fn is_contained(path: &Path) -> bool {
    path.components().next().is_some()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
}
