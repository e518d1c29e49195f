use std::collections::HashMap;

use sqlx::SqlitePool;
use tracing::{debug, warn};

use crate::db::services::backup_service;

pub const DEFAULT_RETENTION: i64 = 30;

/// Maps storage-target names (case-insensitive) to the number of backup
/// events kept per tenant for that target. Targets without a rule use the
/// default count.
#[derive(Debug, Clone)]
pub struct RetentionPolicy {
    default_limit: i64,
    rules: HashMap<String, i64>,
}

impl RetentionPolicy {
    pub fn new(default_limit: i64) -> Self {
        Self {
            default_limit,
            rules: HashMap::new(),
        }
    }

    pub fn with_rules(default_limit: i64, rules: HashMap<String, i64>) -> Self {
        let rules = rules
            .into_iter()
            .map(|(target, limit)| (target.to_lowercase(), limit))
            .collect();
        Self {
            default_limit,
            rules,
        }
    }

    pub fn limit_for(&self, target: &str) -> i64 {
        self.rules
            .get(&target.to_lowercase())
            .copied()
            .unwrap_or(self.default_limit)
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_RETENTION)
    }
}

/// Bounds one tenant's backup history after an ingest. Best-effort
/// maintenance: any storage failure is logged and swallowed, the committed
/// event stands. Tenants without a key are skipped.
pub async fn prune_company(pool: &SqlitePool, policy: &RetentionPolicy, company: Option<&str>) {
    let company = match company {
        Some(c) if !c.is_empty() => c,
        _ => return,
    };

    if let Err(e) = prune_inner(pool, policy, company).await {
        warn!(company, error = %e, "retention pruning failed, keeping prior state");
    }
}

/// All deletions for one pruning pass share a transaction, so a concurrent
/// rollup sees either the pre-prune or the post-prune set, never a partial
/// one.
async fn prune_inner(
    pool: &SqlitePool,
    policy: &RetentionPolicy,
    company: &str,
) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;

    let targets = backup_service::distinct_storage_targets(&mut *tx, company).await?;
    if targets.is_empty() {
        return Ok(());
    }

    for target in &targets {
        let keep = policy.limit_for(target);
        let deleted =
            backup_service::delete_beyond_retention(&mut *tx, company, target, keep).await?;
        if deleted > 0 {
            debug!(company, target, keep, deleted, "pruned backup history");
        }
    }

    tx.commit().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connect_in_memory;
    use crate::db::models::NewBackup;

    fn event(company: &str, target: &str, seq: i64) -> NewBackup {
        NewBackup {
            proxmox_host: Some("pve1".to_string()),
            company_name: Some(company.to_string()),
            vmid: Some(format!("{company}-{target}-{seq}")),
            vm_name: None,
            status: "SUCCESS".to_string(),
            storage_target: Some(target.to_string()),
            start_time: seq * 100,
            end_time: seq * 100 + 50,
            total_size_bytes: None,
            written_size_bytes: None,
            duration_seconds: 50,
            speed_mb_s: 0.0,
        }
    }

    async fn seed(pool: &sqlx::SqlitePool, company: &str, target: &str, n: i64) {
        for seq in 0..n {
            backup_service::insert_backup(pool, &event(company, target, seq))
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn keeps_the_n_most_recent_by_end_time() {
        let pool = connect_in_memory().await.unwrap();
        seed(&pool, "acme", "nas1", 10).await;

        let policy = RetentionPolicy::with_rules(30, HashMap::from([("nas1".to_string(), 4)]));
        prune_company(&pool, &policy, Some("acme")).await;

        let rows = backup_service::recent_for_company(&pool, "acme", 100)
            .await
            .unwrap();
        assert_eq!(rows.len(), 4);
        let ends: Vec<i64> = rows.iter().map(|r| r.end_time).collect();
        assert_eq!(ends, vec![950, 850, 750, 650]);
    }

    #[tokio::test]
    async fn rules_are_case_insensitive_and_scoped_per_target() {
        let pool = connect_in_memory().await.unwrap();
        seed(&pool, "acme", "NAS1", 6).await;
        seed(&pool, "acme", "tape", 6).await;

        let policy = RetentionPolicy::with_rules(5, HashMap::from([("nas1".to_string(), 2)]));
        prune_company(&pool, &policy, Some("acme")).await;

        let rows = backup_service::recent_for_company(&pool, "acme", 100)
            .await
            .unwrap();
        let nas: usize = rows
            .iter()
            .filter(|r| r.storage_target.as_deref() == Some("NAS1"))
            .count();
        let tape: usize = rows
            .iter()
            .filter(|r| r.storage_target.as_deref() == Some("tape"))
            .count();
        assert_eq!(nas, 2);
        assert_eq!(tape, 5);
    }

    #[tokio::test]
    async fn other_tenants_are_untouched() {
        let pool = connect_in_memory().await.unwrap();
        seed(&pool, "acme", "nas1", 6).await;
        seed(&pool, "globex", "nas1", 6).await;

        let policy = RetentionPolicy::with_rules(2, HashMap::new());
        prune_company(&pool, &policy, Some("acme")).await;

        assert_eq!(
            backup_service::count_for_company(&pool, "acme").await.unwrap(),
            2
        );
        assert_eq!(
            backup_service::count_for_company(&pool, "globex")
                .await
                .unwrap(),
            6
        );
    }

    #[tokio::test]
    async fn empty_tenant_key_is_skipped() {
        let pool = connect_in_memory().await.unwrap();
        seed(&pool, "", "nas1", 6).await;

        let policy = RetentionPolicy::with_rules(1, HashMap::new());
        prune_company(&pool, &policy, Some("")).await;
        prune_company(&pool, &policy, None).await;

        assert_eq!(
            backup_service::count_for_company(&pool, "").await.unwrap(),
            6
        );
    }
}
