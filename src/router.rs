use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;

use crate::{
    address::Address,
    client::Client,
    dialer::{Dialer, HttpHop},
    error::Result,
    proxy_url::ProxyUrl,
    resolver::{Resolver, SystemResolver},
};

/// What to do with traffic for a host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Policy {
    pub upstream: ProxyUrl,
}

impl Policy {
    pub fn new(upstream: ProxyUrl) -> Self {
        Self { upstream }
    }
}

/// Exact hostname to [`Policy`] mapping with a fallback.
///
/// Matching is by whole string only: `example.com` does not cover
/// `www.example.com`.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: HashMap<String, Policy>,
    default: Policy,
}

impl RouteTable {
    pub fn new(default: Policy) -> Self {
        Self {
            routes: HashMap::new(),
            default,
        }
    }

    /// Adds a route, replacing any earlier one for the same host.
    pub fn insert(&mut self, host: impl Into<String>, policy: Policy) {
        self.routes.insert(host.into(), policy);
    }

    pub fn lookup(&self, host: &str) -> &Policy {
        self.routes.get(host).unwrap_or(&self.default)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Picks the upstream proxy per destination host, then dials through a
/// [`Client`] configured with it.
pub struct Router<D> {
    table: Arc<RouteTable>,
    dialer: Arc<D>,
    resolver: Arc<dyn Resolver>,
}

impl<D: Dialer> Router<D> {
    pub fn new(table: RouteTable, dialer: Arc<D>) -> Self {
        Self::with_resolver(table, dialer, Arc::new(SystemResolver))
    }

    pub fn with_resolver(table: RouteTable, dialer: Arc<D>, resolver: Arc<dyn Resolver>) -> Self {
        Self {
            table: Arc::new(table),
            dialer,
            resolver,
        }
    }

    fn client_for(&self, destination: &Address) -> Client<D> {
        let policy = self.table.lookup(&destination.host);
        log::info!("routing {destination} via {}", policy.upstream);
        Client::with_resolver(
            policy.upstream.clone(),
            self.dialer.clone(),
            self.resolver.clone(),
        )
    }
}

#[async_trait]
impl<D: Dialer> Dialer for Router<D> {
    type Conn = D::Conn;

    async fn dial(&self, destination: &Address) -> Result<D::Conn> {
        self.client_for(destination).dial(destination).await
    }

    async fn dial_http(&self, destination: &Address) -> Result<(D::Conn, HttpHop)> {
        self.client_for(destination).dial_http(destination).await
    }
}
