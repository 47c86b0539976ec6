//! Usage: `proxy [PROTOCOL] [LISTEN] [UPSTREAM] [HOST=PROXY_URL]...`
//!
//! `RUST_LOG=info cargo run --example proxy -- socks 127.0.0.1:1080 socks5h://tor:9050 example.com=direct://`

use socks_relay::{Address, Config, RouteEntry, Server, TcpDialer};
use tokio_util::sync::CancellationToken;

fn config() -> socks_relay::Result<Config> {
    let mut config = Config::default();
    let mut args = std::env::args().skip(1);
    if let Some(protocol) = args.next() {
        config.server.protocol = protocol.parse()?;
    }
    if let Some(listen) = args.next() {
        config.server.listen = listen.parse::<Address>()?;
    }
    if let Some(upstream) = args.next() {
        config.upstream = upstream.parse()?;
    }
    for route in args {
        let (host, proxy) = route
            .split_once('=')
            .ok_or_else(|| socks_relay::Error::InvalidProxyUrl(route.clone()))?;
        config.routes.push(RouteEntry {
            hosts: vec![host.to_owned()],
            proxy: proxy.parse()?,
        });
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> socks_relay::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let config = config()?;
    let listener = Server::<TcpDialer>::bind(&config.server.listen).await?;
    log::info!("Listening on {}", listener.local_addr()?);
    let server = Server::from_config(&config, TcpDialer::with_timeout(config.io_timeout));

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::info!("Shutting down");
            }
            shutdown.cancel();
        }
    });

    server.serve(listener, shutdown).await
}
