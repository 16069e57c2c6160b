//! Target address parsing and SRV-aware resolution
//!
//! Addresses come in as `host`, `host:port`, or `[v6addr]:port`. When no
//! explicit port is given, an SRV record may redirect both host and port;
//! any DNS trouble quietly falls back to the caller's default port, since a
//! missing SRV record is the common case, not an error.

use crate::error::{Error, Result};
use hickory_resolver::TokioAsyncResolver;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use tracing::debug;

/// Split an address into host and optional port.
///
/// IPv6 hosts must be bracketed when a port is attached; a bare bracketed
/// address without a port is also accepted.
pub fn parse_address(address: &str) -> Result<(String, Option<u16>)> {
    let address = address.trim();

    if let Some(rest) = address.strip_prefix('[') {
        let (host, tail) = rest
            .split_once(']')
            .ok_or_else(|| Error::invalid_address(format!("unclosed bracket in {address:?}")))?;
        if host.is_empty() {
            return Err(Error::invalid_address(format!("empty host in {address:?}")));
        }
        return match tail {
            "" => Ok((host.to_string(), None)),
            _ => {
                let port = tail.strip_prefix(':').ok_or_else(|| {
                    Error::invalid_address(format!("junk after bracket in {address:?}"))
                })?;
                Ok((host.to_string(), Some(parse_port(port, address)?)))
            }
        };
    }

    match address.split_once(':') {
        None => {
            if address.is_empty() {
                return Err(Error::invalid_address("empty address"));
            }
            Ok((address.to_string(), None))
        }
        Some((host, port)) => {
            if host.is_empty() {
                return Err(Error::invalid_address(format!("empty host in {address:?}")));
            }
            if port.contains(':') {
                return Err(Error::invalid_address(format!(
                    "IPv6 host must be bracketed in {address:?}"
                )));
            }
            Ok((host.to_string(), Some(parse_port(port, address)?)))
        }
    }
}

fn parse_port(port: &str, address: &str) -> Result<u16> {
    port.parse()
        .map_err(|_| Error::invalid_address(format!("invalid port {port:?} in {address:?}")))
}

/// Resolve an address to a concrete (host, port) pair.
///
/// An explicit port wins outright. Otherwise the first SRV answer for
/// `service.host` overrides both host (trailing dot stripped) and port; when
/// the query fails or comes back empty, the original host keeps
/// `default_port`.
pub async fn lookup(address: &str, default_port: u16, service: &str) -> Result<(String, u16)> {
    let (host, port) = parse_address(address)?;
    if let Some(port) = port {
        return Ok((host, port));
    }

    match srv_target(&host, service).await {
        Some((srv_host, srv_port)) => Ok((srv_host, srv_port)),
        None => Ok((host, default_port)),
    }
}

async fn srv_target(host: &str, service: &str) -> Option<(String, u16)> {
    let resolver = match TokioAsyncResolver::tokio_from_system_conf() {
        Ok(resolver) => resolver,
        Err(err) => {
            debug!(error = %err, "no system resolver config, using defaults");
            TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default())
        }
    };

    let name = format!("{service}.{host}.");
    match resolver.srv_lookup(name).await {
        Ok(answer) => answer.iter().next().map(|record| {
            let target = record.target().to_utf8();
            (target.trim_end_matches('.').to_string(), record.port())
        }),
        Err(err) => {
            debug!(host, error = %err, "no SRV record, falling back to default port");
            None
        }
    }
}
