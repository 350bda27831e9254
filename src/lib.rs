pub mod agent;
pub mod cache;
pub mod categorizer;
pub mod cli;
pub mod history;
pub mod models;
pub mod provider;
pub mod server;
pub mod store;
pub mod sync;

use agent::ResponderAgent;
use cli::Args;
use log::{ info, warn };
use server::Server;
use std::error::Error;
use std::sync::Arc;

pub async fn run(args: Args) -> Result<(), Box<dyn Error + Send + Sync>> {
    info!("--- Core Configuration ---");
    info!("Server Address: {}", args.server_addr);
    info!("Conversations Dir: {}", args.conversations_dir);
    info!("Provider Type: {}", args.provider_type);
    info!("Dispatcher Type: {}", args.dispatcher_type);
    info!("Templates Path: {}", args.templates_path);
    info!("History Path: {}", args.history_path);
    info!("Cache TTL: {}s", args.cache_ttl_secs);
    info!("Sync Pace: {}ms", args.sync_pace_ms);
    info!("Default Sync Limit: {}", args.default_limit);
    info!("-------------------------");

    let agent = Arc::new(ResponderAgent::new(&args)?);

    if args.sync_on_startup {
        info!("Running startup sync...");
        match agent.sync_engine().full_sync(args.default_limit).await {
            Ok(outcome) =>
                info!("Startup sync processed {} conversation(s)", outcome.total_processed),
            Err(e) => warn!("Startup sync failed: {}. Continuing with stored data.", e),
        }
    }

    let addr = args.server_addr.clone();
    info!("Starting server on: {}", addr);
    let server = Server::new(addr, agent, args);
    server.run().await?;

    Ok(())
}
