use std::collections::HashMap;

use async_trait::async_trait;
use common::Challenge;
use dashmap::DashMap;

/// Read-only source of challenge metadata.
#[async_trait]
pub trait ChallengeCatalog: Send + Sync {
    async fn get_challenge(&self, id: &str) -> Option<Challenge>;
}

/// Catalog held in memory, for embedding and tests.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    challenges: DashMap<String, Challenge>,
}

impl MemoryCatalog {
    pub fn new(challenges: impl IntoIterator<Item = Challenge>) -> Self {
        let catalog = Self::default();
        for challenge in challenges {
            catalog.insert(challenge);
        }
        catalog
    }

    pub fn insert(&self, challenge: Challenge) {
        self.challenges.insert(challenge.id.clone(), challenge);
    }
}

#[async_trait]
impl ChallengeCatalog for MemoryCatalog {
    async fn get_challenge(&self, id: &str) -> Option<Challenge> {
        self.challenges.get(id).map(|c| c.value().clone())
    }
}

#[async_trait]
impl ChallengeCatalog for HashMap<String, Challenge> {
    async fn get_challenge(&self, id: &str) -> Option<Challenge> {
        self.get(id).cloned()
    }
}
