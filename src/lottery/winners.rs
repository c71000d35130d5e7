use std::{collections::HashMap, sync::Arc};

use tokio::sync::Mutex;

use super::{
    bet::AgencyId,
    store::{BetStore, StoreErr},
};

type WinnersByAgency = HashMap<AgencyId, Vec<String>>;

/// Computes the winners of the lottery, once
///
/// the full scan of the store happens on the first query and is cached for
/// the lifetime of the process. The caller is in charge of only asking once
/// every agency has finished submitting its bets.
pub struct WinnerResolver {
    store: Arc<dyn BetStore>,
    // None until the first successful scan
    cache: Mutex<Option<WinnersByAgency>>,
}

impl WinnerResolver {
    pub fn new(store: Arc<dyn BetStore>) -> Self {
        Self {
            store,
            cache: Mutex::default(),
        }
    }

    /// Returns the documents of the winning bets of an agency, in the order they were stored
    pub async fn resolve(&self, agency: AgencyId) -> Result<Vec<String>, StoreErr> {
        // the check and the scan share the lock, so concurrent first callers scan only once
        let mut cache = self.cache.lock().await;
        if cache.is_none() {
            *cache = Some(self.scan().await?);
        }

        Ok(cache
            .as_ref()
            .and_then(|winners| winners.get(&agency))
            .cloned()
            .unwrap_or_default())
    }

    async fn scan(&self) -> Result<WinnersByAgency, StoreErr> {
        let bets = self.store.load_all().await?;

        let mut winners = WinnersByAgency::new();
        for bet in bets.into_iter().filter(|bet| bet.has_won()) {
            winners.entry(bet.agency).or_default().push(bet.document);
        }

        tracing::debug!("winners resolved for {} agencies", winners.len());
        Ok(winners)
    }
}
