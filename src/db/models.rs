use serde::{Deserialize, Serialize};

/// One completed (or failed) backup attempt, as persisted. Rows are written
/// once and never updated; `(proxmox_host, vmid, start_time, end_time)` is
/// the natural dedup key enforced by a unique index.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct BackupEvent {
    pub id: i64,
    pub proxmox_host: Option<String>,
    pub company_name: Option<String>,
    pub vmid: Option<String>,
    pub vm_name: Option<String>,
    pub status: String,
    pub storage_target: Option<String>,
    pub start_time: i64,
    pub end_time: i64,
    pub total_size_bytes: Option<i64>,
    pub written_size_bytes: Option<i64>,
    pub duration_seconds: i64,
    pub speed_mb_s: f64,
}

/// A normalized backup event ready for insertion (derived fields computed).
#[derive(Debug, Clone)]
pub struct NewBackup {
    pub proxmox_host: Option<String>,
    pub company_name: Option<String>,
    pub vmid: Option<String>,
    pub vm_name: Option<String>,
    pub status: String,
    pub storage_target: Option<String>,
    pub start_time: i64,
    pub end_time: i64,
    pub total_size_bytes: Option<i64>,
    pub written_size_bytes: Option<i64>,
    pub duration_seconds: i64,
    pub speed_mb_s: f64,
}

/// A stored health snapshot row. The payload is kept as opaque JSON and
/// re-parsed when materialized into rollups.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct HealthRow {
    pub id: i64,
    pub proxmox_host: String,
    pub company_name: Option<String>,
    pub payload_json: String,
    pub received_at: String,
}

/// Canonical form of an ingested health snapshot, serialized into
/// `health.payload_json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthPayload {
    pub proxmox_host: String,
    pub company_name: String,
    pub pools: Vec<PoolStatus>,
    pub disks: Vec<DiskStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolStatus {
    pub name: String,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskStatus {
    pub name: String,
    pub smart_ok: bool,
    pub temp: Option<f64>,
}

/// Latest known state of one replication job as persisted. Agents resend
/// unchanged state, so `(proxmox_host, vmid, source_node, target_node,
/// last_sync)` carries a unique index and duplicate reports are dropped at
/// insert time.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ReplicationRow {
    pub id: i64,
    pub proxmox_host: String,
    pub company_name: Option<String>,
    pub vmid: Option<String>,
    pub vm_name: Option<String>,
    pub source_node: Option<String>,
    pub target_node: Option<String>,
    pub state: Option<String>,
    pub status: Option<String>,
    pub schedule: Option<String>,
    pub last_sync: Option<i64>,
    pub duration_sec: Option<i64>,
    pub fail_count: Option<i64>,
    pub received_at: String,
}

/// A normalized replication report ready for insertion.
#[derive(Debug, Clone)]
pub struct NewReplication {
    pub proxmox_host: String,
    pub company_name: String,
    pub vmid: String,
    pub vm_name: String,
    pub source_node: String,
    pub target_node: String,
    pub state: String,
    pub status: String,
    pub schedule: String,
    pub last_sync: i64,
    pub duration_sec: i64,
    pub fail_count: i64,
}
