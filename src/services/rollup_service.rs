use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{Local, TimeZone, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::{Result, SqlitePool};

use crate::db::models::{BackupEvent, PoolStatus, ReplicationRow};
use crate::db::services::backup_service::{self, BackupStats};
use crate::db::services::{health_service, replication_service};

/// Display name for the sentinel tenant of events reported without a
/// company. The join key stays the empty string; only presentation changes.
pub const UNASSIGNED_TENANT: &str = "Unassigned";

const STATS_WINDOW_SECS: i64 = 24 * 3600;

/// Derived per-tenant summary, computed fresh per request. Never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct CompanyRollup {
    pub company_name: String,
    pub company_key: String,
    pub last_update: Option<i64>,
    pub last_update_str: Option<String>,
    pub stats_24h: BackupStats,
    pub recent: Vec<BackupEvent>,
    pub health: BTreeMap<String, HostHealth>,
    pub replication: ReplicationSummary,
}

/// Current storage health of one host, from its latest snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct HostHealth {
    pub received_at: String,
    pub pools: Vec<PoolStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReplicationSummary {
    pub ok: i64,
    pub fail: i64,
    pub last_sync: Option<i64>,
    pub last_sync_str: Option<String>,
    pub jobs: Vec<ReplicationJob>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReplicationJob {
    pub vmid: Option<String>,
    pub vm_name: Option<String>,
    pub source_node: Option<String>,
    pub target_node: Option<String>,
    pub state: Option<String>,
    pub status: Option<String>,
    pub last_sync: Option<i64>,
    pub last_sync_str: Option<String>,
    pub duration_sec: Option<i64>,
    pub fail_count: Option<i64>,
    pub schedule: Option<String>,
}

/// Aggregate row of the paginated fleet listing.
#[derive(Debug, Clone, Serialize)]
pub struct CompanySummary {
    pub company_name: String,
    pub last_backup: Option<i64>,
    pub total_backups: i64,
    pub successful_backups: i64,
    pub recent_backups: Vec<RecentBackup>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecentBackup {
    pub status: String,
    pub start_time: i64,
    pub end_time: i64,
    pub total_size_bytes: Option<i64>,
    pub written_size_bytes: Option<i64>,
    pub duration_seconds: i64,
    pub speed_mb_s: f64,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct PageInfo {
    pub page: i64,
    pub per_page: i64,
    pub total: i64,
    pub pages: i64,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct RecentPageInfo {
    pub total_items: i64,
    pub per_page: i64,
    pub current_page: i64,
    pub total_pages: i64,
}

/// Summary row for the health audit listing.
#[derive(Debug, Clone, Serialize)]
pub struct HealthOverviewRow {
    pub id: i64,
    pub proxmox_host: String,
    pub company_name: Option<String>,
    pub received_at: String,
    pub pools: Vec<PoolStatus>,
    pub disks: Vec<String>,
}

/// Full per-tenant rollup for every enumerated tenant, ordered by display
/// name ascending. Tenants are discovered from the backup stream.
pub async fn tenant_summaries(
    pool: &SqlitePool,
    recent_limit: i64,
) -> Result<Vec<CompanyRollup>> {
    let recent_limit = recent_limit.clamp(1, 50);

    let companies: BTreeSet<String> = backup_service::distinct_companies(pool)
        .await?
        .into_iter()
        .map(|c| c.unwrap_or_default().trim().to_string())
        .collect();

    let health_by_company = latest_health_by_company(pool).await?;
    let repl_by_company = latest_replication_by_company(pool).await?;

    let now = Utc::now().timestamp();
    let since = now - STATS_WINDOW_SECS;

    let mut rollups = Vec::with_capacity(companies.len());
    for key in companies {
        let last_update = backup_service::last_update(pool, &key).await?;
        let recent = backup_service::recent_for_company(pool, &key, recent_limit).await?;
        let stats_24h = backup_service::stats_since(pool, &key, since).await?;

        let jobs: Vec<ReplicationJob> = repl_by_company
            .get(&key)
            .map(|rows| rows.iter().map(to_job).collect())
            .unwrap_or_default();
        let ok = jobs.iter().filter(|j| is_success(j.status.as_deref())).count() as i64;
        let fail = jobs.len() as i64 - ok;
        let last_sync = if jobs.is_empty() {
            None
        } else {
            Some(jobs.iter().map(|j| j.last_sync.unwrap_or(0)).max().unwrap_or(0))
        };

        let display_name = if key.is_empty() {
            UNASSIGNED_TENANT.to_string()
        } else {
            key.clone()
        };

        rollups.push(CompanyRollup {
            company_name: display_name,
            company_key: key.clone(),
            last_update,
            last_update_str: last_update.and_then(fmt_epoch),
            stats_24h,
            recent,
            health: health_by_company.get(&key).cloned().unwrap_or_default(),
            replication: ReplicationSummary {
                ok,
                fail,
                last_sync,
                last_sync_str: last_sync.filter(|s| *s > 0).and_then(fmt_epoch),
                jobs,
            },
        });
    }

    rollups.sort_by(|a, b| a.company_name.cmp(&b.company_name));
    Ok(rollups)
}

/// One page of per-tenant backup totals with a short recent history each.
pub async fn fleet_summaries_page(
    pool: &SqlitePool,
    page: i64,
    per_page: i64,
) -> Result<(Vec<CompanySummary>, PageInfo)> {
    let page = page.max(1);
    let per_page = per_page.clamp(10, 100);
    let offset = (page - 1) * per_page;

    let total = backup_service::count_distinct_companies(pool).await?;
    let totals = backup_service::company_totals_page(pool, per_page, offset).await?;

    let mut summaries = Vec::with_capacity(totals.len());
    for row in totals {
        let key = row.company_name.unwrap_or_default().trim().to_string();
        if key.is_empty() {
            continue;
        }
        let recent = backup_service::recent_for_company(pool, &key, 10).await?;
        summaries.push(CompanySummary {
            company_name: key,
            last_backup: row.last_backup,
            total_backups: row.total_backups,
            successful_backups: row.successful_backups,
            recent_backups: recent
                .into_iter()
                .map(|b| RecentBackup {
                    status: b.status,
                    start_time: b.start_time,
                    end_time: b.end_time,
                    total_size_bytes: b.total_size_bytes,
                    written_size_bytes: b.written_size_bytes,
                    duration_seconds: b.duration_seconds,
                    speed_mb_s: b.speed_mb_s,
                })
                .collect(),
        });
    }

    let info = PageInfo {
        page,
        per_page,
        total,
        pages: ceil_div(total, per_page),
    };
    Ok((summaries, info))
}

/// One page of a single tenant's backup history, newest first.
pub async fn tenant_recent(
    pool: &SqlitePool,
    company_key: &str,
    page: i64,
    per_page: i64,
) -> Result<(Vec<BackupEvent>, RecentPageInfo)> {
    let page = page.max(1);
    let per_page = per_page.clamp(10, 100);
    let offset = (page - 1) * per_page;

    let total_items = backup_service::count_for_company(pool, company_key).await?;
    let backups = backup_service::recent_page(pool, company_key, per_page, offset).await?;

    let info = RecentPageInfo {
        total_items,
        per_page,
        current_page: page,
        total_pages: ceil_div(total_items, per_page),
    };
    Ok((backups, info))
}

/// Most recent snapshots, summarized for the audit listing.
pub async fn health_overview(pool: &SqlitePool, limit: i64) -> Result<Vec<HealthOverviewRow>> {
    let rows = health_service::recent_snapshots(pool, limit).await?;
    Ok(rows
        .into_iter()
        .map(|r| {
            let (pools, disks) = parse_stored_payload(&r.payload_json);
            HealthOverviewRow {
                id: r.id,
                proxmox_host: r.proxmox_host,
                company_name: r.company_name,
                received_at: r.received_at,
                pools,
                disks,
            }
        })
        .collect())
}

async fn latest_health_by_company(
    pool: &SqlitePool,
) -> Result<HashMap<String, BTreeMap<String, HostHealth>>> {
    let rows = health_service::latest_per_company_host(pool).await?;
    let mut by_company: HashMap<String, BTreeMap<String, HostHealth>> = HashMap::new();
    for row in rows {
        let key = row.company_name.unwrap_or_default().trim().to_string();
        let (pools, _) = parse_stored_payload(&row.payload_json);
        by_company.entry(key).or_default().insert(
            row.proxmox_host,
            HostHealth {
                received_at: row.received_at,
                pools,
            },
        );
    }
    Ok(by_company)
}

async fn latest_replication_by_company(
    pool: &SqlitePool,
) -> Result<HashMap<String, Vec<ReplicationRow>>> {
    let rows = replication_service::latest_per_job(pool).await?;
    let mut by_company: HashMap<String, Vec<ReplicationRow>> = HashMap::new();
    for row in rows {
        let key = row
            .company_name
            .clone()
            .unwrap_or_default()
            .trim()
            .to_string();
        by_company.entry(key).or_default().push(row);
    }
    Ok(by_company)
}

fn to_job(row: &ReplicationRow) -> ReplicationJob {
    ReplicationJob {
        vmid: row.vmid.clone(),
        vm_name: row.vm_name.clone(),
        source_node: row.source_node.clone(),
        target_node: row.target_node.clone(),
        state: row.state.clone(),
        status: row.status.clone(),
        last_sync: row.last_sync,
        last_sync_str: row.last_sync.filter(|s| *s > 0).and_then(fmt_epoch),
        duration_sec: row.duration_sec,
        fail_count: row.fail_count,
        schedule: row.schedule.clone(),
    }
}

fn is_success(status: Option<&str>) -> bool {
    status.map(|s| s.to_uppercase() == "SUCCESS").unwrap_or(false)
}

fn ceil_div(total: i64, per_page: i64) -> i64 {
    (total + per_page - 1) / per_page
}

fn fmt_epoch(ts: i64) -> Option<String> {
    Local
        .timestamp_opt(ts, 0)
        .single()
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
}

/// Re-parses a stored snapshot payload, tolerating the same field-name drift
/// the normalizer accepts plus per-item `pool_name`/`health` variants seen
/// from older agents. Unparseable payloads yield empty lists.
fn parse_stored_payload(payload_json: &str) -> (Vec<PoolStatus>, Vec<String>) {
    let raw: Value = serde_json::from_str(payload_json).unwrap_or(Value::Null);
    let Some(obj) = raw.as_object() else {
        return (Vec::new(), Vec::new());
    };

    let pool_items = first_list(obj, "pools", "zfs_pools");
    let pools = pool_items
        .iter()
        .filter_map(|item| item.as_object())
        .map(|p| PoolStatus {
            name: str_field(p, "name")
                .or_else(|| str_field(p, "pool_name"))
                .unwrap_or_else(|| "?".to_string()),
            status: str_field(p, "status")
                .or_else(|| str_field(p, "health"))
                .unwrap_or_else(|| "UNKNOWN".to_string())
                .to_uppercase(),
        })
        .collect();

    let disk_items = first_list(obj, "disks", "smart");
    let disks = disk_items
        .iter()
        .filter_map(|item| item.as_object())
        .map(|d| str_field(d, "name").unwrap_or_else(|| "?".to_string()))
        .collect();

    (pools, disks)
}

fn first_list<'a>(
    obj: &'a serde_json::Map<String, Value>,
    primary: &str,
    alias: &str,
) -> &'a [Value] {
    for key in [primary, alias] {
        if let Some(items) = obj.get(key).and_then(Value::as_array) {
            if !items.is_empty() {
                return items;
            }
        }
    }
    &[]
}

fn str_field(obj: &serde_json::Map<String, Value>, key: &str) -> Option<String> {
    match obj.get(key) {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) if s.is_empty() => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(other) => Some(other.to_string()),
    }
}
