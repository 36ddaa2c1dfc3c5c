mod client;
mod config;
mod coordinator;
mod texts;

use anyhow::Result;
use config::ServerConfig;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().init();

    tracing::info!("Server Version: {}", typerace_lib::PROTOCOL_VERSION);

    let config = ServerConfig::from_env();
    let listener = TcpListener::bind(("0.0.0.0", config.port)).await?;
    tracing::info!("Listening on port {}", config.port);

    let coordinator = coordinator::start(config.rules);
    loop {
        let (socket, _) = listener.accept().await?;

        tokio::spawn(client::handle_new_connection(coordinator.clone(), socket));
    }
}
