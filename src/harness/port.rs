//! Port availability check
//!
//! A service must never be started on a port somebody else holds: the
//! readiness probe would happily talk to the squatter instead.

use std::net::{Ipv4Addr, TcpListener};

use crate::common::{Error, Result};

/// Fail with `PortUnavailable` unless `port` can be bound on all interfaces
///
/// The listener is dropped before returning, so the only side effect is the
/// transient bind.
pub fn check_port_free(port: u16) -> Result<()> {
    match TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)) {
        Ok(listener) => {
            drop(listener);
            tracing::debug!(port, "Port is free");
            Ok(())
        }
        Err(source) => {
            tracing::error!(port, error = %source, "Port is not available");
            Err(Error::PortUnavailable { port, source })
        }
    }
}
