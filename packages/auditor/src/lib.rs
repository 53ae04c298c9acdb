//! Periodic scan of the authoritative store for users holding more than one
//! active engagement.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use common::config::AuditorConfig;
use engagement::consistency::{self, AuditEntry};
use engagement::sync::{PendingWrite, RemoteStore, WriteOutcome};
use tracing::{error, info, warn};

/// Run the auditor until the process exits.
pub async fn run_consistency_auditor(remote: &dyn RemoteStore, config: AuditorConfig) {
    let scan_interval = Duration::from_secs(config.scan_interval_secs);

    info!(
        scan_interval_secs = config.scan_interval_secs,
        "Starting consistency auditor"
    );

    let mut interval = tokio::time::interval(scan_interval);

    loop {
        interval.tick().await;

        match scan_once(remote, Utc::now()).await {
            Ok(repaired) if !repaired.is_empty() => {
                info!(users = repaired.len(), "Repaired engagement state");
            }
            Ok(_) => {}
            Err(e) => error!(error = %e, "Consistency scan failed"),
        }
    }
}

/// Find and repair every violation currently in the store.
pub async fn scan_once(
    remote: &dyn RemoteStore,
    now: DateTime<Utc>,
) -> anyhow::Result<Vec<AuditEntry>> {
    let mut active_per_user: BTreeMap<String, usize> = BTreeMap::new();
    for acceptance in remote.fetch_active().await? {
        *active_per_user.entry(acceptance.key.username).or_default() += 1;
    }

    let offenders: Vec<String> = active_per_user
        .into_iter()
        .filter(|(_, count)| *count > 1)
        .map(|(username, _)| username)
        .collect();
    if offenders.is_empty() {
        return Ok(Vec::new());
    }

    info!(count = offenders.len(), "Found users with multiple active engagements");

    let mut audits = Vec::new();
    for username in offenders {
        match repair_user(remote, &username, now).await {
            Ok(Some(audit)) => audits.push(audit),
            Ok(None) => {}
            Err(e) => error!(username = %username, error = %e, "Failed to repair user"),
        }
    }
    Ok(audits)
}

async fn repair_user(
    remote: &dyn RemoteStore,
    username: &str,
    now: DateTime<Utc>,
) -> anyhow::Result<Option<AuditEntry>> {
    let snapshot = remote.fetch_user(username).await?;
    let Some(plan) = consistency::repair(&snapshot, now) else {
        // Resolved by someone else since the scan.
        return Ok(None);
    };

    let mut withdrawn = Vec::new();
    for transition in &plan.transitions {
        let write = PendingWrite::from(transition);
        match remote.apply(&write).await? {
            WriteOutcome::Applied(_) => withdrawn.push(transition.key.clone()),
            WriteOutcome::Conflict(_) => warn!(
                username,
                op_id = %write.op_id,
                "Engagement changed during repair, leaving it for the next scan"
            ),
        }
    }
    if withdrawn.is_empty() {
        return Ok(None);
    }

    let audit = AuditEntry {
        withdrawn,
        ..plan.audit
    };
    remote
        .record_audit(&audit)
        .await
        .with_context(|| format!("Failed to record repair audit {}", audit.id))?;

    info!(
        username,
        audit_id = %audit.id,
        kept = %audit.kept,
        withdrawn = ?audit.withdrawn.iter().map(|k| k.to_string()).collect::<Vec<_>>(),
        "Repaired multiple active engagements"
    );
    Ok(Some(audit))
}
