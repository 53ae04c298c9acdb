use std::collections::BTreeSet;

use common::{Acceptance, EngagementKey, Review, Submission};
use dashmap::DashMap;

use super::snapshot::{EngagementRecords, RecordChange, UserEngagements};

/// One user's slice of the local store.
#[derive(Debug, Clone, Default)]
pub struct UserEntry {
    pub engagements: UserEngagements,
    /// Keys whose local state has not yet been confirmed by the authority.
    pub unsynced: BTreeSet<EngagementKey>,
    /// Submissions a reviewer has opened; never persisted.
    pub under_review: BTreeSet<EngagementKey>,
}

impl UserEntry {
    fn new(username: &str) -> Self {
        Self {
            engagements: UserEngagements::new(username),
            ..Default::default()
        }
    }
}

/// Optimistic local cache of engagement records, sharded by username.
///
/// All access to a user goes through that user's map entry, so a
/// validate-then-apply sequence inside [`LocalStore::with_user_mut`] is
/// serialized against every other writer for the same user.
#[derive(Debug, Default)]
pub struct LocalStore {
    users: DashMap<String, UserEntry>,
}

impl LocalStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` with exclusive access to the user's entry, creating it if needed.
    ///
    /// `f` must not call back into the store.
    pub fn with_user_mut<R>(&self, username: &str, f: impl FnOnce(&mut UserEntry) -> R) -> R {
        let mut entry = self
            .users
            .entry(username.to_string())
            .or_insert_with(|| UserEntry::new(username));
        f(entry.value_mut())
    }

    /// Run `f` against the user's entry without creating it.
    pub fn read_user<R>(&self, username: &str, f: impl FnOnce(&UserEntry) -> R) -> Option<R> {
        self.users.get(username).map(|e| f(e.value()))
    }

    pub fn snapshot(&self, username: &str) -> UserEngagements {
        self.users
            .get(username)
            .map(|e| e.engagements.clone())
            .unwrap_or_else(|| UserEngagements::new(username))
    }

    pub fn entry(&self, username: &str) -> Option<UserEntry> {
        self.users.get(username).map(|e| e.value().clone())
    }

    pub fn usernames(&self) -> Vec<String> {
        let mut names: Vec<String> = self.users.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn get_acceptance(&self, key: &EngagementKey) -> Option<Acceptance> {
        self.users
            .get(&key.username)
            .and_then(|e| e.engagements.acceptances.get(key).cloned())
    }

    pub fn get_submission(&self, key: &EngagementKey) -> Option<Submission> {
        self.users
            .get(&key.username)
            .and_then(|e| e.engagements.submissions.get(key).cloned())
    }

    pub fn get_review(&self, key: &EngagementKey) -> Option<Review> {
        self.users
            .get(&key.username)
            .and_then(|e| e.engagements.reviews.get(key).cloned())
    }

    /// Acceptances of one user, or of everyone when `username` is `None`.
    pub fn list_acceptances(&self, username: Option<&str>) -> Vec<Acceptance> {
        let mut rows: Vec<Acceptance> = match username {
            Some(name) => self
                .users
                .get(name)
                .map(|e| e.engagements.acceptances.values().cloned().collect())
                .unwrap_or_default(),
            None => self
                .users
                .iter()
                .flat_map(|e| {
                    e.engagements
                        .acceptances
                        .values()
                        .cloned()
                        .collect::<Vec<_>>()
                })
                .collect(),
        };
        rows.sort_by(|a, b| a.key.cmp(&b.key));
        rows
    }

    pub fn list_by_challenge(&self, challenge_id: &str) -> Vec<Acceptance> {
        let mut rows: Vec<Acceptance> = self
            .users
            .iter()
            .flat_map(|e| {
                e.engagements
                    .acceptances
                    .values()
                    .filter(|a| a.key.challenge_id == challenge_id)
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect();
        rows.sort_by(|a, b| a.key.cmp(&b.key));
        rows
    }

    pub fn all_reviews(&self) -> Vec<Review> {
        self.users
            .iter()
            .flat_map(|e| e.engagements.reviews.values().cloned().collect::<Vec<_>>())
            .collect()
    }

    /// Apply `changes` and flag their keys as unsynced.
    pub fn apply(&self, username: &str, changes: &[RecordChange]) {
        self.with_user_mut(username, |entry| {
            entry.engagements.apply(changes);
            for change in changes {
                entry.unsynced.insert(change.key().clone());
            }
        });
    }

    /// Overwrite one key with the authority's view.
    pub fn replace_records(&self, records: EngagementRecords, synced: bool) {
        let username = records.key.username.clone();
        self.with_user_mut(&username, |entry| {
            if synced {
                entry.unsynced.remove(&records.key);
            }
            entry.engagements.replace(records);
        });
    }

    /// Replace every record of the user with a fresh snapshot.
    pub fn replace_user(&self, snapshot: UserEngagements) {
        let username = snapshot.username.clone();
        self.with_user_mut(&username, |entry| {
            entry
                .under_review
                .retain(|key| snapshot.submissions.contains_key(key));
            entry.unsynced.clear();
            entry.engagements = snapshot;
        });
    }

    pub fn mark_synced(&self, key: &EngagementKey) {
        if let Some(mut entry) = self.users.get_mut(&key.username) {
            entry.unsynced.remove(key);
        }
    }

    pub fn is_unsynced(&self, key: &EngagementKey) -> bool {
        self.users
            .get(&key.username)
            .is_some_and(|e| e.unsynced.contains(key))
    }

    pub fn is_under_review(&self, key: &EngagementKey) -> bool {
        self.users
            .get(&key.username)
            .is_some_and(|e| e.under_review.contains(key))
    }
}
