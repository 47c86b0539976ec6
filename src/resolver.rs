use std::{collections::HashMap, net::IpAddr};

use async_trait::async_trait;

use crate::error::{Error, Result};

/// Name resolution used when a proxy scheme resolves on this side
/// (SOCKS4, SOCKS5).
#[async_trait]
pub trait Resolver: Send + Sync + 'static {
    async fn resolve(&self, host: &str) -> Result<Vec<IpAddr>>;
}

/// The operating system resolver, through tokio.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

#[async_trait]
impl Resolver for SystemResolver {
    async fn resolve(&self, host: &str) -> Result<Vec<IpAddr>> {
        let addrs = tokio::net::lookup_host((host, 0))
            .await
            .map_err(|e| Error::NameResolution {
                host: host.to_owned(),
                reason: e.to_string(),
            })?;
        Ok(addrs.map(|a| a.ip()).collect())
    }
}

/// A fixed host table.
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    hosts: HashMap<String, Vec<IpAddr>>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, host: impl Into<String>, ip: IpAddr) -> Self {
        self.hosts.entry(host.into()).or_default().push(ip);
        self
    }
}

#[async_trait]
impl Resolver for StaticResolver {
    async fn resolve(&self, host: &str) -> Result<Vec<IpAddr>> {
        self.hosts
            .get(host)
            .cloned()
            .ok_or_else(|| Error::NameResolution {
                host: host.to_owned(),
                reason: "not in host table".to_owned(),
            })
    }
}
