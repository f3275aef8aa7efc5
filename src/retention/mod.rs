// clustervault/src/retention/mod.rs
//
// Tiered retention over the local artifact catalog. Each tier is swept
// independently against its own age limit; an artifact belongs to exactly
// one tier (the tier is a component of its filename). The sweep only ever
// touches local storage; remote copies are governed by the object-store
// provider's lifecycle rules.

use crate::catalog::{BackupArtifact, Catalog, RetentionTier};
use crate::config::RetentionDays;
use crate::errors::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write as _;
use uuid::Uuid;

const SWEPT_TIERS: [RetentionTier; 3] = [
    RetentionTier::Daily,
    RetentionTier::Weekly,
    RetentionTier::Monthly,
];

#[derive(Debug, Serialize)]
struct SweepAuditRecord {
    swept_at: DateTime<Utc>,
    daily_deleted: usize,
    weekly_deleted: usize,
    monthly_deleted: usize,
    deleted_ids: Vec<Uuid>,
}

/// Deletes every artifact whose tier age limit is exceeded and appends one
/// line to the sweep audit trail. Running the sweep twice in a row deletes
/// nothing on the second run.
pub fn sweep(catalog: &Catalog, policy: &RetentionDays) -> Result<Vec<Uuid>> {
    sweep_at(catalog, policy, Utc::now())
}

/// Sweep with an explicit clock, so age math is testable.
pub fn sweep_at(
    catalog: &Catalog,
    policy: &RetentionDays,
    now: DateTime<Utc>,
) -> Result<Vec<Uuid>> {
    let artifacts = catalog.list()?;
    let mut deleted_ids = Vec::new();
    let mut per_tier = [0usize; 3];

    for (tier_idx, tier) in SWEPT_TIERS.iter().enumerate() {
        let max_age_days = max_age_for(policy, *tier);

        // Tier isolation: only artifacts carrying this tier in their name
        // are candidates, and only this tier's limit is consulted.
        let expired: Vec<&BackupArtifact> = artifacts
            .iter()
            .filter(|a| a.retention_tier == *tier)
            .filter(|a| a.age_days(now) > max_age_days)
            .collect();

        for artifact in expired {
            println!(
                "🗑 Deleting expired {} artifact {} (age {} days > {} days)",
                tier.file_label(),
                artifact
                    .local_path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default(),
                artifact.age_days(now),
                max_age_days
            );
            catalog.delete(artifact)?;
            deleted_ids.push(artifact.id);
            per_tier[tier_idx] += 1;
        }
    }

    append_audit_record(
        catalog,
        &SweepAuditRecord {
            swept_at: now,
            daily_deleted: per_tier[0],
            weekly_deleted: per_tier[1],
            monthly_deleted: per_tier[2],
            deleted_ids: deleted_ids.clone(),
        },
    )?;

    if deleted_ids.is_empty() {
        println!("✓ Retention sweep complete, nothing to delete");
    } else {
        println!("✓ Retention sweep complete, deleted {} artifact(s)", deleted_ids.len());
    }

    Ok(deleted_ids)
}

fn max_age_for(policy: &RetentionDays, tier: RetentionTier) -> i64 {
    match tier {
        RetentionTier::Daily => policy.daily,
        RetentionTier::Weekly => policy.weekly,
        RetentionTier::Monthly => policy.monthly,
        // Ad hoc artifacts are never auto-swept.
        RetentionTier::Adhoc => i64::MAX,
    }
}

fn append_audit_record(catalog: &Catalog, record: &SweepAuditRecord) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(catalog.audit_log_path())?;
    writeln!(file, "{}", serde_json::to_string(record)?)?;
    Ok(())
}
