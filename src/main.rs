mod config;
mod data;
mod diagnostics;
mod error;
mod format;
mod index;
mod model;
mod server;
mod solver;

use clap::Parser;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = config::Config::parse();
    log::debug!("Starting with {config:?}");

    server::run_server(&config).await
}
