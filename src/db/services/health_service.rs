use sqlx::{Result, SqlitePool};

use super::super::models::HealthRow;

/// Appends one health snapshot; the payload is already canonical JSON.
/// Returns the assigned row id, the recency tiebreak for this stream.
pub async fn insert_snapshot(
    pool: &SqlitePool,
    proxmox_host: &str,
    company_name: &str,
    payload_json: &str,
) -> Result<i64> {
    let result = sqlx::query(
        "INSERT INTO health (proxmox_host, company_name, payload_json) VALUES (?, ?, ?)",
    )
    .bind(proxmox_host)
    .bind(company_name)
    .bind(payload_json)
    .execute(pool)
    .await?;
    Ok(result.last_insert_rowid())
}

/// Latest snapshot per `(company_name, proxmox_host)`, discovered from the
/// data. Recency is the insertion sequence, not any reported timestamp.
pub async fn latest_per_company_host(pool: &SqlitePool) -> Result<Vec<HealthRow>> {
    sqlx::query_as(
        r#"
        SELECT h1.id, h1.proxmox_host, h1.company_name, h1.payload_json, h1.received_at
        FROM health h1
        JOIN (
            SELECT company_name, proxmox_host, MAX(id) AS max_id
            FROM health
            GROUP BY company_name, proxmox_host
        ) x ON x.max_id = h1.id
        "#,
    )
    .fetch_all(pool)
    .await
}

/// Legacy global view: latest snapshot per host, regardless of tenant.
pub async fn latest_per_host(pool: &SqlitePool) -> Result<Vec<HealthRow>> {
    sqlx::query_as(
        r#"
        SELECT h1.id, h1.proxmox_host, h1.company_name, h1.payload_json, h1.received_at
        FROM health h1
        JOIN (
            SELECT proxmox_host, MAX(id) AS max_id
            FROM health
            GROUP BY proxmox_host
        ) x ON x.max_id = h1.id
        ORDER BY h1.company_name, h1.proxmox_host
        "#,
    )
    .fetch_all(pool)
    .await
}

/// Most recent snapshots in reverse insertion order, for the audit view.
pub async fn recent_snapshots(pool: &SqlitePool, limit: i64) -> Result<Vec<HealthRow>> {
    sqlx::query_as(
        r#"
        SELECT id, proxmox_host, company_name, payload_json, received_at
        FROM health
        ORDER BY id DESC
        LIMIT ?
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connect_in_memory;

    #[tokio::test]
    async fn latest_per_key_picks_highest_id() {
        let pool = connect_in_memory().await.unwrap();
        insert_snapshot(&pool, "pve1", "acme", r#"{"pools":[]}"#)
            .await
            .unwrap();
        let newer = insert_snapshot(&pool, "pve1", "acme", r#"{"pools":[{"name":"rpool"}]}"#)
            .await
            .unwrap();
        insert_snapshot(&pool, "pve2", "acme", r#"{}"#).await.unwrap();

        let rows = latest_per_company_host(&pool).await.unwrap();
        assert_eq!(rows.len(), 2);
        let pve1 = rows.iter().find(|r| r.proxmox_host == "pve1").unwrap();
        assert_eq!(pve1.id, newer);
    }

    #[tokio::test]
    async fn global_view_collapses_tenants_per_host() {
        let pool = connect_in_memory().await.unwrap();
        insert_snapshot(&pool, "pve1", "acme", "{}").await.unwrap();
        let newer = insert_snapshot(&pool, "pve1", "globex", "{}").await.unwrap();

        let rows = latest_per_host(&pool).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, newer);
        assert_eq!(rows[0].company_name.as_deref(), Some("globex"));
    }

    #[tokio::test]
    async fn reduction_is_idempotent() {
        let pool = connect_in_memory().await.unwrap();
        insert_snapshot(&pool, "pve1", "acme", "{}").await.unwrap();
        insert_snapshot(&pool, "pve1", "", "{}").await.unwrap();

        let first = latest_per_company_host(&pool).await.unwrap();
        let second = latest_per_company_host(&pool).await.unwrap();
        let ids = |rows: &[HealthRow]| {
            let mut v: Vec<i64> = rows.iter().map(|r| r.id).collect();
            v.sort_unstable();
            v
        };
        assert_eq!(ids(&first), ids(&second));
    }
}
