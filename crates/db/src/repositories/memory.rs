use tokio::sync::RwLock;

use beerbot_core::domain::beer::{Beer, BeerId, NewBeer};
use beerbot_core::ports::{BeerFilter, LedgerStore, StoreError};

/// Ledger kept in process memory, in insertion order.
#[derive(Default)]
pub struct InMemoryLedgerStore {
    beers: RwLock<Vec<Beer>>,
}

impl InMemoryLedgerStore {
    pub async fn len(&self) -> usize {
        self.beers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.beers.read().await.is_empty()
    }
}

#[async_trait::async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn insert(&self, beer: NewBeer) -> Result<BeerId, StoreError> {
        let id = BeerId(uuid::Uuid::new_v4().to_string());
        let mut beers = self.beers.write().await;
        beers.push(beer.into_beer(id.clone()));
        Ok(id)
    }

    async fn insert_many(&self, batch: Vec<NewBeer>) -> Result<Vec<BeerId>, StoreError> {
        let mut beers = self.beers.write().await;
        let mut ids = Vec::with_capacity(batch.len());
        for beer in batch {
            let id = BeerId(uuid::Uuid::new_v4().to_string());
            beers.push(beer.into_beer(id.clone()));
            ids.push(id);
        }
        Ok(ids)
    }

    async fn find(&self, filter: &BeerFilter) -> Result<Vec<Beer>, StoreError> {
        let beers = self.beers.read().await;
        let mut found: Vec<Beer> = beers.iter().filter(|beer| filter.matches(beer)).cloned().collect();
        found.sort_by_key(|beer| beer.created_at);
        Ok(found)
    }

    async fn exists(&self, filter: &BeerFilter) -> Result<bool, StoreError> {
        let beers = self.beers.read().await;
        Ok(beers.iter().any(|beer| filter.matches(beer)))
    }

    async fn delete_all(&self) -> Result<u64, StoreError> {
        let mut beers = self.beers.write().await;
        let deleted = beers.len() as u64;
        beers.clear();
        Ok(deleted)
    }
}
