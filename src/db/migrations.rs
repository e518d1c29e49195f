use sqlx::SqlitePool;
use tracing::info;

/// Ordered, versioned schema history. Each entry runs once, in its own
/// transaction, and is recorded in `schema_migrations`. Runtime code never
/// alters the schema.
const MIGRATIONS: &[(i64, &str)] = &[
    (
        1,
        r#"
        CREATE TABLE IF NOT EXISTS backups (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            proxmox_host TEXT,
            company_name TEXT,
            vmid TEXT,
            vm_name TEXT,
            status TEXT NOT NULL,
            storage_target TEXT,
            start_time INTEGER NOT NULL,
            end_time INTEGER NOT NULL,
            total_size_bytes INTEGER,
            written_size_bytes INTEGER,
            duration_seconds INTEGER,
            speed_mb_s REAL
        );
        CREATE INDEX IF NOT EXISTS idx_backups_company ON backups(company_name);
        CREATE INDEX IF NOT EXISTS idx_backups_start_time ON backups(start_time);
        CREATE INDEX IF NOT EXISTS idx_backups_company_time ON backups(company_name, start_time);
        CREATE UNIQUE INDEX IF NOT EXISTS ux_backups_unique
            ON backups(proxmox_host, vmid, start_time, end_time);
        "#,
    ),
    (
        2,
        r#"
        CREATE TABLE IF NOT EXISTS health (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            proxmox_host TEXT NOT NULL,
            company_name TEXT,
            payload_json TEXT NOT NULL,
            received_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
        );
        "#,
    ),
    (
        3,
        r#"
        CREATE TABLE IF NOT EXISTS replication (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            proxmox_host TEXT NOT NULL,
            company_name TEXT,
            vmid TEXT,
            vm_name TEXT,
            source_node TEXT,
            target_node TEXT,
            state TEXT,
            status TEXT,
            schedule TEXT,
            last_sync INTEGER,
            duration_sec INTEGER,
            fail_count INTEGER,
            received_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
        );
        CREATE UNIQUE INDEX IF NOT EXISTS ux_replication_unique
            ON replication(proxmox_host, vmid, source_node, target_node, last_sync);
        "#,
    ),
];

/// Applies every migration newer than the recorded schema version.
pub async fn run(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    let current: Option<i64> = sqlx::query_scalar("SELECT MAX(version) FROM schema_migrations")
        .fetch_one(pool)
        .await?;
    let current = current.unwrap_or(0);

    for (version, sql) in MIGRATIONS {
        if *version <= current {
            continue;
        }
        let mut tx = pool.begin().await?;
        sqlx::raw_sql(sql).execute(&mut *tx).await?;
        sqlx::query("INSERT INTO schema_migrations (version) VALUES (?)")
            .bind(version)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        info!(version, "applied schema migration");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn migrations_apply_and_record_versions() {
        let pool = crate::db::connect_in_memory().await.unwrap();

        let latest: i64 = sqlx::query_scalar("SELECT MAX(version) FROM schema_migrations")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(latest, MIGRATIONS.last().unwrap().0);

        // All three event tables must exist.
        for table in ["backups", "health", "replication"] {
            let count: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
            )
            .bind(table)
            .fetch_one(&pool)
            .await
            .unwrap();
            assert_eq!(count, 1, "missing table {table}");
        }
    }

    #[tokio::test]
    async fn rerun_is_a_no_op() {
        let pool = crate::db::connect_in_memory().await.unwrap();
        run(&pool).await.unwrap();
        run(&pool).await.unwrap();

        let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM schema_migrations")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(rows, MIGRATIONS.len() as i64);
    }
}
