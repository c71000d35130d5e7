// Helpers shared by the tests of the different modules
use std::{
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio_util::sync::CancellationToken;

use crate::{
    lottery::{
        bet::Bet,
        store::{BetStore, MemoryStore, StoreErr},
    },
    protocol::{codec, message_type},
};

pub fn bet(agency: u32, document: &str, number: &str) -> Bet {
    Bet {
        agency,
        first_name: "Ana".into(),
        last_name: "Gomez".into(),
        document: document.into(),
        birthdate: "2001-01-01".into(),
        number: number.into(),
    }
}

/// An in-memory store that counts how many times it was fully scanned
#[derive(Debug, Default)]
pub struct CountingStore {
    inner: MemoryStore,
    scans: AtomicUsize,
}

impl CountingStore {
    pub fn scans(&self) -> usize {
        self.scans.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BetStore for CountingStore {
    async fn append(&self, bets: &[Bet]) -> Result<(), StoreErr> {
        self.inner.append(bets).await
    }

    async fn load_all(&self) -> Result<Vec<Bet>, StoreErr> {
        self.scans.fetch_add(1, Ordering::SeqCst);
        // give concurrent callers a chance to pile up
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.inner.load_all().await
    }
}

/// The agency side of the protocol
pub struct AgencyClient<S> {
    stream: BufReader<S>,
    cancel: CancellationToken,
}

impl<S> AgencyClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream: BufReader::new(stream),
            cancel: CancellationToken::new(),
        }
    }

    pub async fn send(&mut self, payload: &[u8]) {
        codec::write_frame(&mut self.stream, payload, &self.cancel)
            .await
            .unwrap();
    }

    pub async fn read_message(&mut self) -> String {
        codec::read_message(&mut self.stream, &self.cancel)
            .await
            .unwrap()
    }

    /// Reads a status line, without the trailing new line
    pub async fn read_status(&mut self) -> String {
        let mut line = String::new();
        self.stream.read_line(&mut line).await.unwrap();
        assert_eq!(line.pop(), Some('\n'), "status lines end with a new line");
        line
    }

    /// Submits every batch and then ends the stream of batches
    ///
    /// returns the status line received for each batch
    pub async fn submit(&mut self, batches: &[&str]) -> Vec<String> {
        self.send(message_type::BETDATA.as_bytes()).await;

        let mut statuses = vec![];
        for batch in batches {
            self.send(batch.as_bytes()).await;
            statuses.push(self.read_status().await);
        }

        self.send(b"").await;
        statuses
    }

    /// Asks for the winners of an agency
    ///
    /// returns None if the server is still waiting for other agencies
    pub async fn request_winners(&mut self, agency: u32) -> Option<Vec<String>> {
        self.send(message_type::REQWINN.as_bytes()).await;
        self.send(agency.to_string().as_bytes()).await;

        match self.read_message().await.as_str() {
            message_type::NOWINN => None,
            message_type::WINNERS => {
                let documents = self.read_message().await;
                Some(
                    documents
                        .split(',')
                        .filter(|document| !document.is_empty())
                        .map(str::to_string)
                        .collect(),
                )
            }
            other => panic!("unexpected reply: {}", other),
        }
    }
}
