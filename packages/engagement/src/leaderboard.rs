use std::collections::{BTreeMap, HashMap};

use common::Review;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Standing {
    pub username: String,
    pub points: i32,
    /// Challenges with an approved review.
    pub completed: u32,
}

/// Total points per user, highest first, ties broken by username.
///
/// Each (user, challenge) pair contributes the points of its most recent
/// finalized review, so re-accepting a challenge never double-counts.
pub fn standings<'a>(reviews: impl IntoIterator<Item = &'a Review>) -> Vec<Standing> {
    let mut latest: HashMap<(&str, &str), &Review> = HashMap::new();
    for review in reviews.into_iter().filter(|r| r.status.is_final()) {
        let slot = (review.key.username.as_str(), review.key.challenge_id.as_str());
        match latest.get(&slot) {
            Some(existing) if existing.key.attempt >= review.key.attempt => {}
            _ => {
                latest.insert(slot, review);
            }
        }
    }

    let mut totals: BTreeMap<&str, Standing> = BTreeMap::new();
    for ((username, _), review) in latest {
        let standing = totals.entry(username).or_insert_with(|| Standing {
            username: username.to_string(),
            points: 0,
            completed: 0,
        });
        standing.points = standing
            .points
            .saturating_add(review.points_awarded.unwrap_or(0));
        if review.status == common::ReviewStatus::Approved {
            standing.completed += 1;
        }
    }

    let mut rows: Vec<Standing> = totals.into_values().collect();
    rows.sort_by(|a, b| b.points.cmp(&a.points).then(a.username.cmp(&b.username)));
    rows
}
