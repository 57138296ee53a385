use std::path::Path;

use clap::Parser;
use hyperfleet::{
    agent,
    config::Config,
    management::{self, spawn_reconciler},
    server::{self, AppState},
    HyperfleetResult,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Control-plane server for a fleet of microVM sandboxes.
#[derive(Debug, Parser)]
#[command(name = "hyperfleet", version, about)]
struct HyperfleetArgs {
    /// Listen host, overriding SERVER_HOST.
    #[arg(long)]
    host: Option<String>,

    /// Listen port, overriding SERVER_PORT.
    #[arg(long)]
    port: Option<u16>,
}

//--------------------------------------------------------------------------------------------------
// Functions: main
//--------------------------------------------------------------------------------------------------

#[tokio::main]
async fn main() -> HyperfleetResult<()> {
    tracing_subscriber::fmt::init();

    let args = HyperfleetArgs::parse();
    if let Some(host) = args.host {
        std::env::set_var("SERVER_HOST", host);
    }
    if let Some(port) = args.port {
        std::env::set_var("SERVER_PORT", port.to_string());
    }

    let cfg = Config::from_env();
    tracing::info!(
        instances_dir = %cfg.get_paths().get_instances_dir(),
        bridge = %cfg.get_network().get_bridge_name(),
        "starting hyperfleet"
    );

    let pool = management::init_db(Path::new(cfg.get_paths().get_db_path())).await?;

    // The agent HTTP pool must outlive requests; initialize it exactly once
    // before the first handler can run.
    agent::init(&cfg);

    spawn_reconciler(cfg.clone(), pool.clone());

    let state = AppState::new(cfg, pool);
    server::serve(state).await
}
