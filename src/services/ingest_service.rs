use std::sync::Arc;

use serde_json::{Map, Value};
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::debug;

use crate::alerting::{self, AlertSender};
use crate::db::models::{DiskStatus, HealthPayload, NewBackup, NewReplication, PoolStatus};
use crate::db::services::{backup_service, health_service, replication_service};
use crate::services::retention_service::{self, RetentionPolicy};

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("{0}")]
    Validation(String),
    #[error("Database error: {0}")]
    Storage(#[from] sqlx::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupOutcome {
    Stored,
    /// Well-formed but intentionally not stored, with the reason reported
    /// back to the agent.
    Ignored(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicationOutcome {
    Stored,
    /// The dedup tuple already existed; agents resend unchanged state.
    Duplicate,
}

/// Validates and canonicalizes inbound events into the store's schema.
/// Agents send loosely-typed payloads, so numeric fields coerce with a
/// fallback-to-zero policy instead of rejecting on type mismatch.
#[derive(Clone)]
pub struct IngestService {
    pool: SqlitePool,
    retention: RetentionPolicy,
    alerts: Option<Arc<dyn AlertSender>>,
}

impl IngestService {
    pub fn new(
        pool: SqlitePool,
        retention: RetentionPolicy,
        alerts: Option<Arc<dyn AlertSender>>,
    ) -> Self {
        Self {
            pool,
            retention,
            alerts,
        }
    }

    /// Normalizes and stores one backup event, then synchronously prunes the
    /// tenant's history. A SUCCESS with zero duration is a known noisy-client
    /// artifact and is ignored outright: storing it would corrupt throughput
    /// and retention statistics.
    pub async fn ingest_backup(&self, payload: Value) -> Result<BackupOutcome, IngestError> {
        let obj = payload
            .as_object()
            .ok_or_else(|| IngestError::Validation("invalid JSON".to_string()))?;

        let start_time = to_i64(obj.get("start_time"));
        let end_time = to_i64(obj.get("end_time"));
        let duration = if end_time > start_time {
            end_time - start_time
        } else {
            0
        };

        let written = to_f64(obj.get("written_size_bytes"));
        let speed_mb_s = if duration > 0 {
            (written / 1024.0 / 1024.0) / duration as f64
        } else {
            0.0
        };

        let status = opt_string(obj.get("status"))
            .unwrap_or_default()
            .to_uppercase();

        if status == "SUCCESS" && duration <= 0 {
            debug!(
                host = ?obj.get("proxmox_host"),
                vmid = ?obj.get("vmid"),
                "ignored zero-duration success"
            );
            return Ok(BackupOutcome::Ignored("zero-duration-success"));
        }

        let event = NewBackup {
            proxmox_host: opt_string(obj.get("proxmox_host")),
            company_name: opt_string(obj.get("company_name")),
            vmid: opt_string(obj.get("vmid")),
            vm_name: opt_string(obj.get("vm_name")),
            status: status.clone(),
            storage_target: opt_string(obj.get("storage_target")),
            start_time,
            end_time,
            total_size_bytes: opt_i64(obj.get("total_size_bytes")),
            written_size_bytes: opt_i64(obj.get("written_size_bytes")),
            duration_seconds: duration,
            speed_mb_s,
        };

        let stored = backup_service::insert_backup(&self.pool, &event).await?;
        if !stored {
            debug!(
                host = ?event.proxmox_host,
                vmid = ?event.vmid,
                "duplicate backup event, kept existing row"
            );
        }

        // Best-effort: the committed event stands even if pruning fails.
        retention_service::prune_company(&self.pool, &self.retention, event.company_name.as_deref())
            .await;

        if status != "SUCCESS" {
            let company = event.company_name.clone().unwrap_or_default();
            let subject = format!("Backup alert: {status} for client {company}");
            let body = format!(
                "A backup needs attention.\n\n\
                 - Client: {company}\n\
                 - Host: {}\n\
                 - VM: {} ({})\n\
                 - Status: {status}",
                event.proxmox_host.clone().unwrap_or_default(),
                event.vm_name.clone().unwrap_or_default(),
                event.vmid.clone().unwrap_or_default(),
            );
            alerting::dispatch(self.alerts.clone(), subject, body);
        }

        Ok(BackupOutcome::Stored)
    }

    /// Normalizes and stores one health snapshot, returning the assigned row
    /// id. Pool and disk lists tolerate the field-name drift of heterogeneous
    /// reporting agents; malformed list items are dropped, never fatal.
    pub async fn ingest_health(&self, payload: Value) -> Result<i64, IngestError> {
        let obj = payload
            .as_object()
            .ok_or_else(|| IngestError::Validation("invalid JSON".to_string()))?;

        let proxmox_host = trimmed_string(obj.get("proxmox_host"));
        if proxmox_host.is_empty() {
            return Err(IngestError::Validation(
                "Missing 'proxmox_host' in payload".to_string(),
            ));
        }
        let company_name = trimmed_string(obj.get("company_name"));

        let pools = alias_items(obj, "pools", "zfs_pools")
            .iter()
            .filter_map(|item| item.as_object())
            .map(|p| PoolStatus {
                name: trimmed_string(p.get("name")),
                status: trimmed_string(p.get("status")).to_uppercase(),
            })
            .collect();

        let disks = alias_items(obj, "disks", "smart")
            .iter()
            .filter_map(|item| item.as_object())
            .map(|d| DiskStatus {
                name: trimmed_string(d.get("name")),
                smart_ok: d.get("smart_ok").map_or(true, value_truthy),
                temp: d.get("temp").and_then(Value::as_f64),
            })
            .collect();

        let canonical = HealthPayload {
            proxmox_host: proxmox_host.clone(),
            company_name: company_name.clone(),
            pools,
            disks,
        };
        let payload_json = serde_json::to_string(&canonical)?;

        let id =
            health_service::insert_snapshot(&self.pool, &proxmox_host, &company_name, &payload_json)
                .await?;
        Ok(id)
    }

    /// Normalizes and stores one replication report. Missing optional fields
    /// default to empty string / zero; only the host is mandatory.
    pub async fn ingest_replication(
        &self,
        payload: Value,
    ) -> Result<ReplicationOutcome, IngestError> {
        let obj = payload
            .as_object()
            .ok_or_else(|| IngestError::Validation("invalid JSON".to_string()))?;

        let proxmox_host = trimmed_string(obj.get("proxmox_host"));
        if proxmox_host.is_empty() {
            return Err(IngestError::Validation("Missing 'proxmox_host'".to_string()));
        }

        let report = NewReplication {
            proxmox_host,
            company_name: trimmed_string(obj.get("company_name")),
            vmid: trimmed_string(obj.get("vmid")),
            vm_name: trimmed_string(obj.get("vm_name")),
            source_node: trimmed_string(obj.get("source_node")),
            target_node: trimmed_string(obj.get("target_node")),
            state: trimmed_string(obj.get("state")),
            status: trimmed_string(obj.get("status")).to_uppercase(),
            schedule: trimmed_string(obj.get("schedule")),
            last_sync: to_i64(obj.get("last_sync")),
            duration_sec: to_i64(obj.get("duration_sec")),
            fail_count: to_i64(obj.get("fail_count")),
        };

        if replication_service::insert_state(&self.pool, &report).await? {
            Ok(ReplicationOutcome::Stored)
        } else {
            debug!(
                host = %report.proxmox_host,
                vmid = %report.vmid,
                last_sync = report.last_sync,
                "duplicate replication report dropped"
            );
            Ok(ReplicationOutcome::Duplicate)
        }
    }
}

/// First alias whose value is present and non-empty wins; no merge. A truthy
/// non-array value still shadows the second alias and yields nothing.
fn alias_items<'a>(obj: &'a Map<String, Value>, primary: &str, alias: &str) -> &'a [Value] {
    for key in [primary, alias] {
        if let Some(value) = obj.get(key) {
            if value_truthy(value) {
                return value.as_array().map(Vec::as_slice).unwrap_or(&[]);
            }
        }
    }
    &[]
}

fn value_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Integer coercion with fallback-to-zero: numbers truncate, numeric strings
/// parse, everything else is 0.
fn to_i64(value: Option<&Value>) -> i64 {
    match value {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        Some(Value::Bool(b)) => *b as i64,
        _ => 0,
    }
}

fn to_f64(value: Option<&Value>) -> f64 {
    match value {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0.0),
        Some(Value::Bool(b)) => *b as u8 as f64,
        _ => 0.0,
    }
}

fn opt_i64(value: Option<&Value>) -> Option<i64> {
    match value {
        None | Some(Value::Null) => None,
        some => Some(to_i64(some)),
    }
}

/// Pass-through string field: absent and null stay NULL in the store.
fn opt_string(value: Option<&Value>) -> Option<String> {
    match value {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(other) => Some(other.to_string()),
    }
}

/// Required/defaulted string field: absent and null become the empty string,
/// everything is whitespace-trimmed.
fn trimmed_string(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.trim().to_string(),
        Some(other) => other.to_string().trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connect_in_memory;
    use serde_json::json;
    use std::collections::HashMap;

    async fn service() -> IngestService {
        let pool = connect_in_memory().await.unwrap();
        IngestService::new(pool, RetentionPolicy::default(), None)
    }

    async fn backup_count(svc: &IngestService) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM backups")
            .fetch_one(&svc.pool)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn computes_duration_and_throughput() {
        let svc = service().await;
        let outcome = svc
            .ingest_backup(json!({
                "proxmox_host": "pve1",
                "vmid": "100",
                "status": "success",
                "start_time": 1000,
                "end_time": 1100,
                "written_size_bytes": 104857600u64,
            }))
            .await
            .unwrap();
        assert_eq!(outcome, BackupOutcome::Stored);

        let (status, duration, speed): (String, i64, f64) = sqlx::query_as(
            "SELECT status, duration_seconds, speed_mb_s FROM backups WHERE vmid = '100'",
        )
        .fetch_one(&svc.pool)
        .await
        .unwrap();
        assert_eq!(status, "SUCCESS");
        assert_eq!(duration, 100);
        assert!((speed - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn zero_duration_success_is_ignored_not_stored() {
        let svc = service().await;
        let outcome = svc
            .ingest_backup(json!({
                "proxmox_host": "pve1",
                "vmid": "100",
                "status": "SUCCESS",
                "start_time": 1000,
                "end_time": 1000,
            }))
            .await
            .unwrap();
        assert_eq!(outcome, BackupOutcome::Ignored("zero-duration-success"));
        assert_eq!(backup_count(&svc).await, 0);
    }

    #[tokio::test]
    async fn zero_duration_failure_is_still_stored() {
        let svc = service().await;
        let outcome = svc
            .ingest_backup(json!({
                "proxmox_host": "pve1",
                "vmid": "100",
                "status": "failed",
                "start_time": 1000,
                "end_time": 1000,
            }))
            .await
            .unwrap();
        assert_eq!(outcome, BackupOutcome::Stored);
        assert_eq!(backup_count(&svc).await, 1);
    }

    #[tokio::test]
    async fn numeric_fields_coerce_with_zero_fallback() {
        let svc = service().await;
        svc.ingest_backup(json!({
            "proxmox_host": "pve1",
            "vmid": "100",
            "status": "failed",
            "start_time": "1000",
            "end_time": "not-a-number",
            "written_size_bytes": "junk",
        }))
        .await
        .unwrap();

        let (start, end, duration): (i64, i64, i64) = sqlx::query_as(
            "SELECT start_time, end_time, duration_seconds FROM backups WHERE vmid = '100'",
        )
        .fetch_one(&svc.pool)
        .await
        .unwrap();
        assert_eq!((start, end, duration), (1000, 0, 0));
    }

    #[tokio::test]
    async fn backup_without_host_is_stored_with_null_host() {
        let svc = service().await;
        svc.ingest_backup(json!({
            "vmid": "100",
            "status": "failed",
            "start_time": 1000,
            "end_time": 1100,
        }))
        .await
        .unwrap();

        let host: Option<String> =
            sqlx::query_scalar("SELECT proxmox_host FROM backups WHERE vmid = '100'")
                .fetch_one(&svc.pool)
                .await
                .unwrap();
        assert_eq!(host, None);
    }

    #[tokio::test]
    async fn non_object_payload_is_rejected() {
        let svc = service().await;
        let err = svc.ingest_backup(json!([1, 2, 3])).await.unwrap_err();
        assert!(matches!(err, IngestError::Validation(_)));
        assert_eq!(backup_count(&svc).await, 0);
    }

    #[tokio::test]
    async fn empty_status_is_stored_as_its_own_kind() {
        let svc = service().await;
        svc.ingest_backup(json!({
            "proxmox_host": "pve1",
            "vmid": "7",
            "start_time": 100,
            "end_time": 200,
        }))
        .await
        .unwrap();

        let status: String = sqlx::query_scalar("SELECT status FROM backups WHERE vmid = '7'")
            .fetch_one(&svc.pool)
            .await
            .unwrap();
        assert_eq!(status, "");
    }

    #[tokio::test]
    async fn ingest_triggers_retention_synchronously() {
        let pool = connect_in_memory().await.unwrap();
        let policy =
            RetentionPolicy::with_rules(30, HashMap::from([("nas1".to_string(), 3)]));
        let svc = IngestService::new(pool, policy, None);

        for seq in 0..6i64 {
            svc.ingest_backup(json!({
                "proxmox_host": "pve1",
                "vmid": format!("{seq}"),
                "company_name": "acme",
                "storage_target": "nas1",
                "status": "SUCCESS",
                "start_time": seq * 100,
                "end_time": seq * 100 + 50,
            }))
            .await
            .unwrap();
        }

        assert_eq!(backup_count(&svc).await, 3);
    }

    #[tokio::test]
    async fn health_requires_host() {
        let svc = service().await;
        let err = svc
            .ingest_health(json!({"company_name": "acme"}))
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Validation(_)));
    }

    #[tokio::test]
    async fn health_accepts_aliases_and_drops_malformed_items() {
        let svc = service().await;
        let id = svc
            .ingest_health(json!({
                "proxmox_host": " pve1 ",
                "company_name": "acme",
                "zfs_pools": [
                    {"name": "rpool", "status": "online"},
                    "garbage",
                    42,
                ],
                "smart": [
                    {"name": "sda", "temp": 31.5},
                    {"name": "sdb", "smart_ok": false},
                    null,
                ],
            }))
            .await
            .unwrap();
        assert!(id > 0);

        let payload_json: String =
            sqlx::query_scalar("SELECT payload_json FROM health WHERE id = ?")
                .bind(id)
                .fetch_one(&svc.pool)
                .await
                .unwrap();
        let payload: HealthPayload = serde_json::from_str(&payload_json).unwrap();
        assert_eq!(payload.proxmox_host, "pve1");
        assert_eq!(payload.pools.len(), 1);
        assert_eq!(payload.pools[0].status, "ONLINE");
        assert_eq!(payload.disks.len(), 2);
        assert!(payload.disks[0].smart_ok);
        assert_eq!(payload.disks[0].temp, Some(31.5));
        assert!(!payload.disks[1].smart_ok);
    }

    #[tokio::test]
    async fn replication_defaults_and_dedup() {
        let svc = service().await;
        let report = json!({
            "proxmox_host": "pve1",
            "vmid": "100",
            "source_node": "a",
            "target_node": "b",
            "status": "failed",
            "last_sync": 2000,
        });

        let first = svc.ingest_replication(report.clone()).await.unwrap();
        assert_eq!(first, ReplicationOutcome::Stored);
        let second = svc.ingest_replication(report).await.unwrap();
        assert_eq!(second, ReplicationOutcome::Duplicate);

        let (count, status, schedule): (i64, String, String) = sqlx::query_as(
            "SELECT COUNT(*), status, schedule FROM replication",
        )
        .fetch_one(&svc.pool)
        .await
        .unwrap();
        assert_eq!(count, 1);
        assert_eq!(status, "FAILED");
        assert_eq!(schedule, "");
    }

    #[tokio::test]
    async fn replication_requires_host() {
        let svc = service().await;
        let err = svc
            .ingest_replication(json!({"vmid": "100"}))
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Validation(_)));
    }
}
