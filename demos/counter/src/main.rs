//! Counter server.
//!
//! Serves the counter over WebSocket and broadcasts a `tick` directive on a
//! fixed interval until interrupted.

use clap::Parser;
use std::net::SocketAddr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing_subscriber::EnvFilter;
use uiport_demo_counter::counter::Counter;
use uiport_demo_counter::protocol::{ENDPOINT, TICK, Tick};
use uiport_server::Server;
use uiport_ws::WsListener;

#[derive(Parser, Debug)]
#[command(name = "counter-server")]
#[command(about = "Serve a shared counter over WebSocket")]
struct Args {
    /// Address to listen on
    #[arg(long, env = "UIPORT_ADDR", default_value = "127.0.0.1:8080")]
    addr: SocketAddr,

    /// Seconds between tick directives
    #[arg(long, default_value_t = 5)]
    tick_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("counter_server=info".parse()?)
                .add_directive("uiport_demo_counter=info".parse()?)
                .add_directive("uiport_server=info".parse()?),
        )
        .init();

    let args = Args::parse();

    let counter = Counter::new();
    let config = counter.config().map_err(|e| anyhow::anyhow!(e))?;
    let listener = WsListener::bind(args.addr).await?;
    tracing::info!("Serving '{}' on ws://{}/{}", ENDPOINT, listener.local_addr(), ENDPOINT);
    let server = Server::create(ENDPOINT, config, listener);

    let mut interval = tokio::time::interval(Duration::from_secs(args.tick_secs.max(1)));
    let mut seq = 0;
    loop {
        tokio::select! {
            _ = interval.tick() => {
                seq += 1;
                let at = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs();
                server.send_directive(TICK, serde_json::to_value(Tick { seq, at })?).await?;
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    tracing::info!(count = counter.get().await, "Shutting down");
    Ok(())
}
