//! The authoritative store backed by a relational database.

use async_trait::async_trait;
use common::{Acceptance, AcceptanceStatus, EngagementKey, Review, Submission};
use sea_orm::sea_query::LockType;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, TransactionTrait,
};
use tracing::debug;

use crate::consistency::AuditEntry;
use crate::entity::{acceptance, engagement_id, repair_audit, review, submission};
use crate::error::StoreError;
use crate::store::{EngagementRecords, RecordChange, UserEngagements};
use crate::sync::{PendingWrite, RemoteStore, WriteOutcome, is_stale};

pub struct SeaOrmRemote {
    db: DatabaseConnection,
}

impl SeaOrmRemote {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

async fn load_records<C: ConnectionTrait>(
    conn: &C,
    key: &EngagementKey,
) -> Result<EngagementRecords, StoreError> {
    let id = engagement_id(key);
    let acceptance = acceptance::Entity::find_by_id(id.clone())
        .one(conn)
        .await?
        .map(Acceptance::from);
    let submission = submission::Entity::find_by_id(id.clone())
        .one(conn)
        .await?
        .map(Submission::try_from)
        .transpose()?;
    let review = review::Entity::find_by_id(id)
        .one(conn)
        .await?
        .map(Review::from);

    Ok(EngagementRecords {
        key: key.clone(),
        acceptance,
        submission,
        review,
    })
}

async fn apply_change<C: ConnectionTrait>(
    conn: &C,
    change: &RecordChange,
    op_id: &str,
) -> Result<(), StoreError> {
    let id = engagement_id(change.key());
    match change {
        RecordChange::PutAcceptance(a) => {
            let model = acceptance::active_model(a, op_id);
            if acceptance::Entity::find_by_id(id).one(conn).await?.is_some() {
                model.update(conn).await?;
            } else {
                model.insert(conn).await?;
            }
        }
        RecordChange::PutSubmission(s) => {
            let model = submission::active_model(s)?;
            if submission::Entity::find_by_id(id).one(conn).await?.is_some() {
                model.update(conn).await?;
            } else {
                model.insert(conn).await?;
            }
        }
        RecordChange::PutReview(r) => {
            let model = review::active_model(r);
            if review::Entity::find_by_id(id).one(conn).await?.is_some() {
                model.update(conn).await?;
            } else {
                model.insert(conn).await?;
            }
        }
        RecordChange::DeleteSubmission(_) => {
            submission::Entity::delete_by_id(id).exec(conn).await?;
        }
        RecordChange::DeleteReview(_) => {
            review::Entity::delete_by_id(id).exec(conn).await?;
        }
    }
    Ok(())
}

#[async_trait]
impl RemoteStore for SeaOrmRemote {
    async fn ping(&self) -> Result<(), StoreError> {
        self.db.ping().await?;
        Ok(())
    }

    async fn apply(&self, write: &PendingWrite) -> Result<WriteOutcome, StoreError> {
        let txn = self.db.begin().await?;

        // Lock the acceptance row so concurrent writes to this engagement serialize.
        let locked = acceptance::Entity::find_by_id(engagement_id(&write.key))
            .lock(LockType::Update)
            .one(&txn)
            .await?;
        let already_applied = locked
            .as_ref()
            .and_then(|m| m.last_operation_id.as_deref())
            == Some(write.op_id.as_str());

        let current = load_records(&txn, &write.key).await?;
        if already_applied {
            txn.commit().await?;
            debug!(op_id = %write.op_id, "Write already applied");
            return Ok(WriteOutcome::Applied(current));
        }
        if is_stale(current.updated_at(), write.base_updated_at) {
            txn.rollback().await?;
            debug!(
                op_id = %write.op_id,
                remote_updated_at = ?current.updated_at(),
                base_updated_at = ?write.base_updated_at,
                "Rejecting stale write"
            );
            return Ok(WriteOutcome::Conflict(current));
        }

        for change in &write.changes {
            apply_change(&txn, change, &write.op_id).await?;
        }
        let after = load_records(&txn, &write.key).await?;
        txn.commit().await?;

        Ok(WriteOutcome::Applied(after))
    }

    async fn fetch_user(&self, username: &str) -> Result<UserEngagements, StoreError> {
        let acceptances = acceptance::Entity::find()
            .filter(acceptance::Column::Username.eq(username))
            .all(&self.db)
            .await?;
        let submissions = submission::Entity::find()
            .filter(submission::Column::Username.eq(username))
            .all(&self.db)
            .await?
            .into_iter()
            .map(Submission::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        let reviews = review::Entity::find()
            .filter(review::Column::Username.eq(username))
            .all(&self.db)
            .await?;

        Ok(UserEngagements::from_records(
            username,
            acceptances.into_iter().map(Acceptance::from),
            submissions,
            reviews.into_iter().map(Review::from),
        ))
    }

    async fn fetch_active(&self) -> Result<Vec<Acceptance>, StoreError> {
        let active = AcceptanceStatus::ALL
            .iter()
            .copied()
            .filter(|status| status.is_active());
        let rows = acceptance::Entity::find()
            .filter(acceptance::Column::Status.is_in(active))
            .all(&self.db)
            .await?;
        Ok(rows.into_iter().map(Acceptance::from).collect())
    }

    async fn record_audit(&self, entry: &AuditEntry) -> Result<(), StoreError> {
        if repair_audit::Entity::find_by_id(entry.id)
            .one(&self.db)
            .await?
            .is_some()
        {
            debug!(audit_id = %entry.id, "Repair audit already recorded");
            return Ok(());
        }
        repair_audit::active_model(entry)?.insert(&self.db).await?;
        Ok(())
    }

    async fn fetch_audits(&self, username: &str) -> Result<Vec<AuditEntry>, StoreError> {
        repair_audit::Entity::find()
            .filter(repair_audit::Column::Username.eq(username))
            .order_by_asc(repair_audit::Column::Id)
            .all(&self.db)
            .await?
            .into_iter()
            .map(|row| AuditEntry::try_from(row).map_err(StoreError::from))
            .collect()
    }
}
