//! Typed inputs the proxy core is built from.
//!
//! Parsing flags or files into these values is left to the embedding
//! program; every type here implements `FromStr` or has a plain constructor.

use std::time::Duration;

use crate::{
    address::Address,
    proxy_url::ProxyUrl,
    router::{Policy, RouteTable},
    server::ServerProtocol,
};

pub const DEFAULT_HTTP_PORT: u16 = 80;
pub const DEFAULT_SOCKS_PORT: u16 = 1080;
pub const DEFAULT_LISTEN_HOST: &str = "127.0.0.1";
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_BUFFER_SIZE: usize = 32 * 1024;

/// Which inbound protocol to serve, and where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSpec {
    pub protocol: ServerProtocol,
    pub listen: Address,
}

impl Default for ServerSpec {
    fn default() -> Self {
        Self {
            protocol: ServerProtocol::Socks,
            listen: Address::new(DEFAULT_LISTEN_HOST, DEFAULT_SOCKS_PORT),
        }
    }
}

/// A routing rule: every host in `hosts` goes through `proxy`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteEntry {
    pub hosts: Vec<String>,
    pub proxy: ProxyUrl,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub server: ServerSpec,
    /// Fallback upstream for hosts without a route.
    pub upstream: ProxyUrl,
    pub routes: Vec<RouteEntry>,
    pub io_timeout: Duration,
    pub buffer_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerSpec::default(),
            upstream: ProxyUrl::direct(),
            routes: Vec::new(),
            io_timeout: DEFAULT_IO_TIMEOUT,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

impl Config {
    /// Builds the read-only routing table. Later entries win on duplicate
    /// hosts; `upstream` is the fallback policy.
    pub fn route_table(&self) -> RouteTable {
        let mut table = RouteTable::new(Policy::new(self.upstream.clone()));
        for entry in &self.routes {
            for host in &entry.hosts {
                table.insert(host.clone(), Policy::new(entry.proxy.clone()));
            }
        }
        table
    }
}
