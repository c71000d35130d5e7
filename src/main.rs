use std::sync::Arc;

use anyhow::Context;

use lottery::{BetLedger, BetStore, CompletionBarrier, FileStore, WinnerResolver};
use server::{Server, ShutdownHandle};

mod config;
mod lottery;
mod protocol;
mod server;
mod session;
#[cfg(test)]
mod testing;

/// The state of the lottery shared by every connection
pub struct Lottery {
    pub bets: BetLedger,
    pub barrier: CompletionBarrier,
    pub winners: WinnerResolver,
}

impl Lottery {
    pub fn new(store: Arc<dyn BetStore>, agencies: usize) -> Self {
        let bets = BetLedger::new(store);
        let winners = WinnerResolver::new(bets.store());

        Self {
            bets,
            barrier: CompletionBarrier::new(agencies),
            winners,
        }
    }
}

pub type SharedLottery = Arc<Lottery>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = config::Config::from_env().context("failed to load the configuration")?;

    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .init();
    tracing::debug!("{:?}", config);

    let store = Arc::new(FileStore::new(&config.bets_file));
    let lottery = Arc::new(Lottery::new(store, config.agencies));

    let server = Server::bind(
        config.listen_addr(),
        config.listen_backlog,
        config.max_workers,
        lottery,
    )
    .with_context(|| format!("failed to listen on {}", config.listen_addr()))?;
    tracing::info!(
        "action: server_listening | result: success | address: {}",
        server.local_addr()?
    );

    tokio::spawn(watch_signals(server.shutdown_handle()));
    server.run().await;

    Ok(())
}

// Requests a graceful shutdown on the first SIGINT or SIGTERM
async fn watch_signals(shutdown: ShutdownHandle) {
    let signal = match wait_for_signal().await {
        Ok(signal) => signal,
        Err(err) => {
            tracing::error!("action: receive_signal | result: fail | error: {}", err);
            return;
        }
    };

    tracing::info!(
        "action: receive_signal | signal: {} | result: in_progress",
        signal
    );
    shutdown.shutdown();
}

#[cfg(unix)]
async fn wait_for_signal() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => res.map(|_| "SIGINT"),
        _ = terminate.recv() => Ok("SIGTERM"),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> std::io::Result<&'static str> {
    tokio::signal::ctrl_c().await.map(|_| "SIGINT")
}
