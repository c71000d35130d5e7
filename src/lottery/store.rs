use std::{path::PathBuf, sync::Arc};

use async_trait::async_trait;
use tokio::{io::AsyncWriteExt, sync::Mutex};

use super::bet::{Bet, BetParseErr};

#[derive(thiserror::Error, Debug)]
pub enum StoreErr {
    #[error("{0}")]
    Io(#[from] tokio::io::Error),

    #[error("corrupted record at line {line}: {reason}")]
    Corrupted { line: usize, reason: BetParseErr },
}

/// Durable storage for bets
#[async_trait]
pub trait BetStore: Send + Sync {
    /// Appends the bets to the store, in order
    async fn append(&self, bets: &[Bet]) -> Result<(), StoreErr>;

    /// Loads every bet stored so far
    async fn load_all(&self) -> Result<Vec<Bet>, StoreErr>;
}

/// Keeps every bet in memory, nothing survives a restart
#[derive(Debug, Default)]
pub struct MemoryStore {
    bets: std::sync::Mutex<Vec<Bet>>,
}

#[async_trait]
impl BetStore for MemoryStore {
    async fn append(&self, bets: &[Bet]) -> Result<(), StoreErr> {
        self.bets.lock().unwrap().extend_from_slice(bets);
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<Bet>, StoreErr> {
        Ok(self.bets.lock().unwrap().clone())
    }
}

/// Stores bets in a csv file, one bet per line
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl BetStore for FileStore {
    async fn append(&self, bets: &[Bet]) -> Result<(), StoreErr> {
        let mut records = String::new();
        for bet in bets {
            records += &bet.to_string();
            records.push('\n');
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;

        // a single write per batch, so a batch is never interleaved with another one
        file.write_all(records.as_bytes()).await?;
        file.flush().await?;

        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<Bet>, StoreErr> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            // nothing was stored yet
            Err(err) if err.kind() == tokio::io::ErrorKind::NotFound => return Ok(vec![]),
            Err(err) => return Err(err.into()),
        };

        // ignore a trailing record that is still being written
        let complete = match content.rfind('\n') {
            Some(end) => &content[..end],
            None => "",
        };

        complete
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(idx, line)| {
                Bet::from_record(line).map_err(|reason| StoreErr::Corrupted {
                    line: idx + 1,
                    reason,
                })
            })
            .collect()
    }
}

/// The write side of the store shared by every connection
///
/// appends are serialized, so batches coming from different agencies never interleave.
pub struct BetLedger {
    store: Arc<dyn BetStore>,
    write_lock: Mutex<()>,
}

impl BetLedger {
    pub fn new(store: Arc<dyn BetStore>) -> Self {
        Self {
            store,
            write_lock: Mutex::new(()),
        }
    }

    pub async fn append(&self, bets: &[Bet]) -> Result<(), StoreErr> {
        let _guard = self.write_lock.lock().await;
        self.store.append(bets).await
    }

    /// A handle to the underlying store, for readers
    pub fn store(&self) -> Arc<dyn BetStore> {
        self.store.clone()
    }
}
