use sqlx::{Result, SqlitePool};

use super::super::models::{NewReplication, ReplicationRow};

/// Inserts a replication report with insert-or-ignore semantics over the
/// dedup tuple `(proxmox_host, vmid, source_node, target_node, last_sync)`.
/// Returns `false` when the report was a resend and nothing was stored.
pub async fn insert_state(pool: &SqlitePool, report: &NewReplication) -> Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT OR IGNORE INTO replication
          (proxmox_host, company_name, vmid, vm_name, source_node, target_node,
           state, status, schedule, last_sync, duration_sec, fail_count)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&report.proxmox_host)
    .bind(&report.company_name)
    .bind(&report.vmid)
    .bind(&report.vm_name)
    .bind(&report.source_node)
    .bind(&report.target_node)
    .bind(&report.state)
    .bind(&report.status)
    .bind(&report.schedule)
    .bind(report.last_sync)
    .bind(report.duration_sec)
    .bind(report.fail_count)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Current state per job key `(company_name, vmid, source_node, target_node)`.
/// Recency is the highest row id: agents resend out-of-order reports, so
/// insertion order is the trustworthy signal, never `last_sync`.
pub async fn latest_per_job(pool: &SqlitePool) -> Result<Vec<ReplicationRow>> {
    sqlx::query_as(
        r#"
        SELECT r1.id, r1.proxmox_host, r1.company_name, r1.vmid, r1.vm_name,
               r1.source_node, r1.target_node, r1.state, r1.status, r1.schedule,
               r1.last_sync, r1.duration_sec, r1.fail_count, r1.received_at
        FROM replication r1
        JOIN (
            SELECT company_name, vmid, source_node, target_node, MAX(id) AS max_id
            FROM replication
            GROUP BY company_name, vmid, source_node, target_node
        ) x ON x.max_id = r1.id
        "#,
    )
    .fetch_all(pool)
    .await
}
