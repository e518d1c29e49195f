use sqlx::sqlite::Sqlite;
use sqlx::{Executor, Result, SqlitePool};

use super::super::models::{BackupEvent, NewBackup};

/// 24h success/failure counters for one tenant.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct BackupStats {
    pub ok: i64,
    pub fail: i64,
    pub total: i64,
}

/// Per-tenant aggregate row used by the paginated fleet summary.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CompanyBackupTotals {
    pub company_name: Option<String>,
    pub last_backup: Option<i64>,
    pub total_backups: i64,
    pub successful_backups: i64,
}

/// Inserts a backup event, relying on the unique index over
/// `(proxmox_host, vmid, start_time, end_time)` for dedup. Returns `false`
/// when an identical event already existed. The check-and-insert is a single
/// statement so concurrent ingesters cannot race a duplicate in.
pub async fn insert_backup(pool: &SqlitePool, event: &NewBackup) -> Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT OR IGNORE INTO backups
          (proxmox_host, company_name, vmid, vm_name, status, storage_target,
           start_time, end_time, total_size_bytes, written_size_bytes,
           duration_seconds, speed_mb_s)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&event.proxmox_host)
    .bind(&event.company_name)
    .bind(&event.vmid)
    .bind(&event.vm_name)
    .bind(&event.status)
    .bind(&event.storage_target)
    .bind(event.start_time)
    .bind(event.end_time)
    .bind(event.total_size_bytes)
    .bind(event.written_size_bytes)
    .bind(event.duration_seconds)
    .bind(event.speed_mb_s)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Distinct raw `company_name` values, ascending. Tenant discovery is
/// backup-driven: hosts reporting only health or replication do not appear.
pub async fn distinct_companies(pool: &SqlitePool) -> Result<Vec<Option<String>>> {
    sqlx::query_scalar("SELECT DISTINCT company_name FROM backups ORDER BY company_name ASC")
        .fetch_all(pool)
        .await
}

/// Most recent `end_time` for one tenant key (trimmed; empty matches rows
/// with an empty or NULL company).
pub async fn last_update(pool: &SqlitePool, company_key: &str) -> Result<Option<i64>> {
    sqlx::query_scalar(
        r#"
        SELECT end_time FROM backups
        WHERE TRIM(IFNULL(company_name, '')) = ?
        ORDER BY end_time DESC LIMIT 1
        "#,
    )
    .bind(company_key)
    .fetch_optional(pool)
    .await
}

/// The `limit` most recent events for one tenant key, newest first.
pub async fn recent_for_company(
    pool: &SqlitePool,
    company_key: &str,
    limit: i64,
) -> Result<Vec<BackupEvent>> {
    sqlx::query_as(
        r#"
        SELECT id, proxmox_host, company_name, vmid, vm_name, status, storage_target,
               start_time, end_time, total_size_bytes, written_size_bytes,
               duration_seconds, speed_mb_s
        FROM backups
        WHERE TRIM(IFNULL(company_name, '')) = ?
        ORDER BY end_time DESC
        LIMIT ?
        "#,
    )
    .bind(company_key)
    .bind(limit)
    .fetch_all(pool)
    .await
}

/// Success/failure split over events with `end_time >= since`.
pub async fn stats_since(pool: &SqlitePool, company_key: &str, since: i64) -> Result<BackupStats> {
    let row: (Option<i64>, Option<i64>, i64) = sqlx::query_as(
        r#"
        SELECT
            SUM(CASE WHEN status = 'SUCCESS' THEN 1 ELSE 0 END),
            SUM(CASE WHEN status != 'SUCCESS' THEN 1 ELSE 0 END),
            COUNT(*)
        FROM backups
        WHERE TRIM(IFNULL(company_name, '')) = ? AND end_time >= ?
        "#,
    )
    .bind(company_key)
    .bind(since)
    .fetch_one(pool)
    .await?;
    Ok(BackupStats {
        ok: row.0.unwrap_or(0),
        fail: row.1.unwrap_or(0),
        total: row.2,
    })
}

pub async fn count_for_company(pool: &SqlitePool, company_key: &str) -> Result<i64> {
    sqlx::query_scalar("SELECT COUNT(*) FROM backups WHERE TRIM(IFNULL(company_name, '')) = ?")
        .bind(company_key)
        .fetch_one(pool)
        .await
}

/// One page of a tenant's history, newest first.
pub async fn recent_page(
    pool: &SqlitePool,
    company_key: &str,
    per_page: i64,
    offset: i64,
) -> Result<Vec<BackupEvent>> {
    sqlx::query_as(
        r#"
        SELECT id, proxmox_host, company_name, vmid, vm_name, status, storage_target,
               start_time, end_time, total_size_bytes, written_size_bytes,
               duration_seconds, speed_mb_s
        FROM backups
        WHERE TRIM(IFNULL(company_name, '')) = ?
        ORDER BY end_time DESC
        LIMIT ? OFFSET ?
        "#,
    )
    .bind(company_key)
    .bind(per_page)
    .bind(offset)
    .fetch_all(pool)
    .await
}

pub async fn count_distinct_companies(pool: &SqlitePool) -> Result<i64> {
    sqlx::query_scalar("SELECT COUNT(DISTINCT company_name) FROM backups")
        .fetch_one(pool)
        .await
}

/// One page of per-tenant aggregate totals, ordered by company name.
pub async fn company_totals_page(
    pool: &SqlitePool,
    per_page: i64,
    offset: i64,
) -> Result<Vec<CompanyBackupTotals>> {
    sqlx::query_as(
        r#"
        SELECT
            company_name,
            MAX(end_time) AS last_backup,
            COUNT(*) AS total_backups,
            SUM(CASE WHEN status = 'SUCCESS' THEN 1 ELSE 0 END) AS successful_backups
        FROM backups
        GROUP BY company_name
        ORDER BY company_name
        LIMIT ? OFFSET ?
        "#,
    )
    .bind(per_page)
    .bind(offset)
    .fetch_all(pool)
    .await
}

/// Administrative time-ranged delete, not retention-policy-aware.
pub async fn purge_range(pool: &SqlitePool, start_ts: i64, end_ts: i64) -> Result<u64> {
    let result = sqlx::query("DELETE FROM backups WHERE end_time >= ? AND end_time <= ?")
        .bind(start_ts)
        .bind(end_ts)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

/// Administrative full clear of the backup log.
pub async fn purge_all(pool: &SqlitePool) -> Result<u64> {
    let result = sqlx::query("DELETE FROM backups").execute(pool).await?;
    Ok(result.rows_affected())
}

/// Distinct non-empty storage targets one tenant has ever written to.
/// Generic over the executor so the pruner can run it inside its transaction.
pub async fn distinct_storage_targets<'e, E>(executor: E, company: &str) -> Result<Vec<String>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let targets: Vec<Option<String>> = sqlx::query_scalar(
        "SELECT DISTINCT storage_target FROM backups WHERE company_name = ?",
    )
    .bind(company)
    .fetch_all(executor)
    .await?;
    Ok(targets
        .into_iter()
        .flatten()
        .filter(|t| !t.is_empty())
        .collect())
}

/// Deletes every row beyond the `keep` most recent (by `end_time`) for one
/// tenant + storage target. `LIMIT -1 OFFSET keep` selects the tail.
pub async fn delete_beyond_retention<'e, E>(
    executor: E,
    company: &str,
    storage_target: &str,
    keep: i64,
) -> Result<u64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        r#"
        DELETE FROM backups
        WHERE id IN (
            SELECT id FROM backups
            WHERE company_name = ? AND storage_target = ?
            ORDER BY end_time DESC
            LIMIT -1 OFFSET ?
        )
        "#,
    )
    .bind(company)
    .bind(storage_target)
    .bind(keep)
    .execute(executor)
    .await?;
    Ok(result.rows_affected())
}
