//! Spreadsheet-backed data access.
//!
//! Every remote call goes through the [`RequestGate`] and is retried with
//! backoff while the service reports rate limiting. Tenant lookups and the
//! team's client list are cached with fixed TTLs; nothing else is cached.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::Duration as StdDuration;

use backon::Retryable;
use chrono::Duration;
use futures::future::join_all;
use log::{debug, error, info, warn};
use serde::Serialize;
use tokio::sync::Mutex;

use crate::cache::{Clock, TtlCache};
use crate::columns::{
    A1Range, ViolationField, ViolationTab, HEADER_ROWS, MASTER_LAST_COLUMN, MASTER_TAB_NAMES,
    VIOLATION_LAST_COLUMN,
};
use crate::error::{SheetsError, StoreError};
use crate::gate::RequestGate;
use crate::models::{ClientOverview, ImpactLevel, Tenant, Violation, ViolationStatus};
use crate::retry::{is_retryable, RetryPolicy};
use crate::sheets::{RangeUpdate, Rows, SheetsApi};

const CLIENT_LIST_KEY: &str = "clients";

/// Settings for [`SheetStore`].
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub master_spreadsheet_id: String,
    pub max_concurrent: usize,
    pub retry: RetryPolicy,
    pub tenant_ttl: Duration,
    pub client_list_ttl: Duration,
}

impl StoreConfig {
    pub fn new(master_spreadsheet_id: impl Into<String>) -> Self {
        StoreConfig {
            master_spreadsheet_id: master_spreadsheet_id.into(),
            max_concurrent: 5,
            retry: RetryPolicy::default(),
            tenant_ttl: Duration::minutes(5),
            client_list_ttl: Duration::minutes(2),
        }
    }
}

/// Which logical tab to resolve a concrete name for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum TabKind {
    Master,
    Violations(ViolationTab),
}

impl TabKind {
    fn candidates(self) -> &'static [&'static str] {
        match self {
            TabKind::Master => MASTER_TAB_NAMES,
            TabKind::Violations(tab) => tab.name_variants(),
        }
    }
}

/// Result of [`SheetStore::resolve_violation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolveOutcome {
    /// Moved from the active tab to the resolved tab.
    Resolved,
    /// Already on the resolved tab; nothing was appended.
    AlreadyResolved,
}

/// Result of [`SheetStore::bulk_update`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BulkUpdateResult {
    pub updated: Vec<String>,
    pub missing: Vec<String>,
}

/// Data-access layer over tenant and master spreadsheets.
pub struct SheetStore {
    api: Arc<dyn SheetsApi>,
    gate: RequestGate,
    retry: RetryPolicy,
    master_spreadsheet_id: String,
    clock: Arc<dyn Clock>,
    tenants: TtlCache<Tenant>,
    client_list: TtlCache<Vec<ClientOverview>>,
    /// (spreadsheet id, kind) -> tab title that worked last time.
    tab_names: RwLock<HashMap<(String, TabKind), String>>,
    /// Held from row lookup to the last write of every mutation, so a
    /// resolve cannot shift rows under a pending field update.
    write_lock: Mutex<()>,
}

impl SheetStore {
    pub fn new(api: Arc<dyn SheetsApi>, config: StoreConfig, clock: Arc<dyn Clock>) -> Self {
        SheetStore {
            api,
            gate: RequestGate::new(config.max_concurrent),
            retry: config.retry,
            master_spreadsheet_id: config.master_spreadsheet_id,
            tenants: TtlCache::new(config.tenant_ttl, clock.clone()),
            client_list: TtlCache::new(config.client_list_ttl, clock.clone()),
            clock,
            tab_names: RwLock::new(HashMap::new()),
            write_lock: Mutex::new(()),
        }
    }

    pub fn gate(&self) -> &RequestGate {
        &self.gate
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Run one remote call through the gate, retrying while rate limited.
    async fn call<T, F, Fut>(&self, what: &str, f: F) -> Result<T, SheetsError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, SheetsError>>,
    {
        let attempt = || {
            let fut = f();
            let gate = self.gate.clone();
            async move {
                let _permit = gate
                    .acquire()
                    .await
                    .map_err(|_| SheetsError::Unknown("request gate closed".to_string()))?;
                fut.await
            }
        };

        attempt
            .retry(self.retry.backoff())
            .when(is_retryable)
            .notify(|err: &SheetsError, dur: StdDuration| {
                warn!("{} rate limited, retrying in {:?}: {}", what, dur, err);
            })
            .await
    }

    fn cached_tab_name(&self, spreadsheet_id: &str, kind: TabKind) -> Option<String> {
        self.tab_names
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&(spreadsheet_id.to_string(), kind))
            .cloned()
    }

    fn remember_tab_name(&self, spreadsheet_id: &str, kind: TabKind, name: Option<&str>) {
        let mut names = self.tab_names.write().unwrap_or_else(|e| e.into_inner());
        let key = (spreadsheet_id.to_string(), kind);
        match name {
            Some(name) => names.insert(key, name.to_string()),
            None => names.remove(&key),
        };
    }

    /// Read a range from the first tab name variant that exists.
    ///
    /// Returns the tab title that worked alongside the rows. A remembered
    /// title is tried first; if it has since disappeared every variant is
    /// probed again.
    async fn read_tab<R>(
        &self,
        spreadsheet_id: &str,
        kind: TabKind,
        range_for: R,
    ) -> Result<(String, Rows), StoreError>
    where
        R: Fn(&str) -> A1Range,
    {
        if let Some(name) = self.cached_tab_name(spreadsheet_id, kind) {
            let range = range_for(&name);
            match self
                .call("read", || self.api.read_range(spreadsheet_id, &range))
                .await
            {
                Ok(rows) => return Ok((name, rows)),
                Err(e) if e.is_not_found() => {
                    info!("tab '{}' vanished from {}, probing again", name, spreadsheet_id);
                    self.remember_tab_name(spreadsheet_id, kind, None);
                }
                Err(e) => return Err(e.into()),
            }
        }

        for name in kind.candidates() {
            let range = range_for(name);
            match self
                .call("read", || self.api.read_range(spreadsheet_id, &range))
                .await
            {
                Ok(rows) => {
                    debug!("resolved {:?} tab of {} as '{}'", kind, spreadsheet_id, name);
                    self.remember_tab_name(spreadsheet_id, kind, Some(name));
                    return Ok((name.to_string(), rows));
                }
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Err(StoreError::TabNotFound(
            kind.candidates().iter().map(|s| s.to_string()).collect(),
        ))
    }

    /// Resolve the concrete title of a tab.
    pub async fn resolve_tab(
        &self,
        spreadsheet_id: &str,
        tab: ViolationTab,
    ) -> Result<String, StoreError> {
        let (name, _) = self
            .read_tab(spreadsheet_id, TabKind::Violations(tab), |name| {
                A1Range::cell(name, "A", 1)
            })
            .await?;
        Ok(name)
    }

    // ---------------------------------------------------------------------
    // Tenants
    // ---------------------------------------------------------------------

    /// Every tenant listed in the master tab.
    pub async fn list_tenants(&self) -> Result<Vec<Tenant>, StoreError> {
        let (_, rows) = self
            .read_tab(&self.master_spreadsheet_id, TabKind::Master, |name| {
                A1Range::rows_from(name, HEADER_ROWS + 1, MASTER_LAST_COLUMN)
            })
            .await?;
        let tenants: Vec<Tenant> = rows.iter().filter_map(|r| Tenant::from_row(r)).collect();

        for tenant in &tenants {
            self.cache_tenant(tenant);
        }
        Ok(tenants)
    }

    fn cache_tenant(&self, tenant: &Tenant) {
        if !tenant.subdomain.is_empty() {
            self.tenants
                .insert(subdomain_key(&tenant.subdomain), tenant.clone());
        }
        if !tenant.store_name.is_empty() {
            self.tenants
                .insert(store_name_key(&tenant.store_name), tenant.clone());
        }
    }

    pub async fn tenant_by_subdomain(&self, subdomain: &str) -> Result<Tenant, StoreError> {
        let key = subdomain_key(subdomain);
        if let Some(tenant) = self.tenants.get(&key) {
            return Ok(tenant);
        }
        let wanted = subdomain.trim().to_ascii_lowercase();
        self.list_tenants()
            .await?
            .into_iter()
            .find(|t| t.subdomain == wanted)
            .ok_or_else(|| StoreError::TenantNotFound(subdomain.to_string()))
    }

    pub async fn tenant_by_store_name(&self, store_name: &str) -> Result<Tenant, StoreError> {
        let key = store_name_key(store_name);
        if let Some(tenant) = self.tenants.get(&key) {
            return Ok(tenant);
        }
        self.list_tenants()
            .await?
            .into_iter()
            .find(|t| t.store_name.trim().eq_ignore_ascii_case(store_name.trim()))
            .ok_or_else(|| StoreError::TenantNotFound(store_name.to_string()))
    }

    // ---------------------------------------------------------------------
    // Violations
    // ---------------------------------------------------------------------

    pub async fn violations(
        &self,
        tenant: &Tenant,
        tab: ViolationTab,
    ) -> Result<Vec<Violation>, StoreError> {
        let spreadsheet_id = spreadsheet_of(tenant)?;
        let (_, rows) = self
            .read_tab(&spreadsheet_id, TabKind::Violations(tab), |name| {
                A1Range::rows_from(name, HEADER_ROWS + 1, VIOLATION_LAST_COLUMN)
            })
            .await?;
        Ok(rows
            .iter()
            .filter_map(|r| Violation::from_row(r, tab))
            .collect())
    }

    pub async fn find_violation(
        &self,
        tenant: &Tenant,
        tab: ViolationTab,
        id: &str,
    ) -> Result<Violation, StoreError> {
        let id = id.trim();
        self.violations(tenant, tab)
            .await?
            .into_iter()
            .find(|v| !id.is_empty() && v.id == id)
            .ok_or_else(|| StoreError::ViolationNotFound(id.to_string()))
    }

    /// Column A of a violation tab; index `i` is sheet row `i + 1`.
    async fn id_column(
        &self,
        spreadsheet_id: &str,
        tab: ViolationTab,
    ) -> Result<(String, Vec<String>), StoreError> {
        let (name, rows) = self
            .read_tab(spreadsheet_id, TabKind::Violations(tab), |name| {
                A1Range::column(name, "A")
            })
            .await?;
        let ids = rows
            .into_iter()
            .map(|r| r.into_iter().next().unwrap_or_default().trim().to_string())
            .collect();
        Ok((name, ids))
    }

    /// Write one field of one violation.
    pub async fn update_violation_field(
        &self,
        tenant: &Tenant,
        tab: ViolationTab,
        id: &str,
        field: ViolationField,
        value: &str,
    ) -> Result<(), StoreError> {
        let column = column_for(field, tab)?;
        let value = normalize_value(field, value)?;
        let spreadsheet_id = spreadsheet_of(tenant)?;
        let id = id.trim();
        let _guard = self.write_lock.lock().await;

        let (tab_name, ids) = self.id_column(&spreadsheet_id, tab).await?;
        let row = row_of(&ids, id).ok_or_else(|| StoreError::ViolationNotFound(id.to_string()))?;

        let range = A1Range::cell(&tab_name, column, row);
        self.call("update", || {
            self.api
                .update_range(&spreadsheet_id, &range, vec![vec![value.clone()]])
        })
        .await?;

        info!(
            "{}: set {} of {} on {} tab (row {})",
            tenant.subdomain, field, id, tab.as_str(), row
        );
        self.client_list.clear();
        Ok(())
    }

    /// Write the same field value to many violations with one scan and one
    /// batch write. IDs that are not on the tab are reported, not fatal.
    pub async fn bulk_update(
        &self,
        tenant: &Tenant,
        tab: ViolationTab,
        ids: &[String],
        field: ViolationField,
        value: &str,
    ) -> Result<BulkUpdateResult, StoreError> {
        let column = column_for(field, tab)?;
        let value = normalize_value(field, value)?;
        let spreadsheet_id = spreadsheet_of(tenant)?;
        let _guard = self.write_lock.lock().await;

        let (tab_name, column_ids) = self.id_column(&spreadsheet_id, tab).await?;

        let mut result = BulkUpdateResult::default();
        let mut updates = Vec::new();
        for id in ids {
            let id = id.trim();
            if result.updated.iter().any(|u| u == id) {
                continue;
            }
            match row_of(&column_ids, id) {
                Some(row) => {
                    updates.push(RangeUpdate::single(
                        A1Range::cell(&tab_name, column, row),
                        value.clone(),
                    ));
                    result.updated.push(id.to_string());
                }
                None => result.missing.push(id.to_string()),
            }
        }

        if !updates.is_empty() {
            self.call("batch update", || {
                self.api.batch_update(&spreadsheet_id, updates.clone())
            })
            .await?;
            self.client_list.clear();
        }

        info!(
            "{}: bulk set {} on {} rows ({} missing)",
            tenant.subdomain,
            field,
            result.updated.len(),
            result.missing.len()
        );
        Ok(result)
    }

    /// Move a violation from the active tab to the resolved tab.
    ///
    /// The row is appended to the resolved tab only if that tab does not
    /// already hold the ID, then deleted from the active tab. A retry after a
    /// failed delete therefore finishes the move without duplicating the row.
    pub async fn resolve_violation(
        &self,
        tenant: &Tenant,
        id: &str,
    ) -> Result<ResolveOutcome, StoreError> {
        let id = id.trim();
        if id.is_empty() {
            return Err(StoreError::ViolationNotFound(String::new()));
        }
        let spreadsheet_id = spreadsheet_of(tenant)?;
        let _guard = self.write_lock.lock().await;

        let (active_tab, active_rows) = self
            .read_tab(
                &spreadsheet_id,
                TabKind::Violations(ViolationTab::Active),
                |name| A1Range::rows_from(name, HEADER_ROWS + 1, VIOLATION_LAST_COLUMN),
            )
            .await?;
        let (resolved_tab, resolved_ids) =
            self.id_column(&spreadsheet_id, ViolationTab::Resolved).await?;
        let already_resolved = row_of(&resolved_ids, id).is_some();

        let active_index = active_rows
            .iter()
            .position(|r| r.first().map(|c| c.trim()) == Some(id));

        let Some(index) = active_index else {
            return if already_resolved {
                Ok(ResolveOutcome::AlreadyResolved)
            } else {
                Err(StoreError::ViolationNotFound(id.to_string()))
            };
        };
        let row_number = HEADER_ROWS + 1 + index;

        if already_resolved {
            warn!(
                "{}: {} already on resolved tab, removing leftover active row {}",
                tenant.subdomain, id, row_number
            );
        } else {
            let mut violation = Violation::from_row(&active_rows[index], ViolationTab::Active)
                .ok_or_else(|| StoreError::ViolationNotFound(id.to_string()))?;
            violation.status = ViolationStatus::Resolved;
            violation.resolved_at = Some(self.clock.now().date_naive());
            violation.docs_needed.clear();

            let range = A1Range::rows_from(&resolved_tab, 1, VIOLATION_LAST_COLUMN);
            let row = violation.to_row(ViolationTab::Resolved);
            self.call("append", || {
                self.api
                    .append_rows(&spreadsheet_id, &range, vec![row.clone()])
            })
            .await?;
        }

        if let Err(e) = self
            .call("delete", || {
                self.api.delete_row(&spreadsheet_id, &active_tab, row_number)
            })
            .await
        {
            error!(
                "{}: {} appended to resolved tab but active row {} was not deleted: {}",
                tenant.subdomain, id, row_number, e
            );
            return Err(e.into());
        }

        info!("{}: resolved {}", tenant.subdomain, id);
        self.client_list.clear();
        Ok(if already_resolved {
            ResolveOutcome::AlreadyResolved
        } else {
            ResolveOutcome::Resolved
        })
    }

    // ---------------------------------------------------------------------
    // Team view
    // ---------------------------------------------------------------------

    /// Counters for every tenant, cached with the client-list TTL.
    ///
    /// A tenant whose spreadsheet cannot be read is listed with zeroed
    /// counters and an error note instead of failing the whole list.
    pub async fn client_overviews(&self) -> Result<Vec<ClientOverview>, StoreError> {
        if let Some(list) = self.client_list.get(CLIENT_LIST_KEY) {
            return Ok(list);
        }

        let tenants = self.list_tenants().await?;
        let now = self.clock.now();
        let overviews = join_all(tenants.iter().map(|tenant| async move {
            let loaded = futures::try_join!(
                self.violations(tenant, ViolationTab::Active),
                self.violations(tenant, ViolationTab::Resolved),
            );
            match loaded {
                Ok((active, resolved)) => ClientOverview::compute(tenant, &active, &resolved, now),
                Err(e) => {
                    warn!("client overview for {} unavailable: {}", tenant.subdomain, e);
                    ClientOverview::unavailable(tenant, e.to_string())
                }
            }
        }))
        .await;

        self.client_list.insert(CLIENT_LIST_KEY, overviews.clone());
        Ok(overviews)
    }

    /// Drop cached tenants and the client list.
    pub fn invalidate_caches(&self) {
        self.tenants.clear();
        self.client_list.clear();
    }
}

fn subdomain_key(subdomain: &str) -> String {
    format!("subdomain:{}", subdomain.trim().to_ascii_lowercase())
}

fn store_name_key(store_name: &str) -> String {
    format!("store:{}", store_name.trim().to_ascii_lowercase())
}

fn spreadsheet_of(tenant: &Tenant) -> Result<String, StoreError> {
    tenant
        .spreadsheet_id()
        .ok_or_else(|| StoreError::MissingSpreadsheet(tenant.store_name.clone()))
}

fn column_for(field: ViolationField, tab: ViolationTab) -> Result<&'static str, StoreError> {
    field.column(tab).ok_or_else(|| StoreError::FieldNotOnTab {
        field: field.to_string(),
        tab: tab.as_str().to_string(),
    })
}

/// Sheet row number (1-based) of `id`, skipping header rows.
fn row_of(ids: &[String], id: &str) -> Option<usize> {
    if id.is_empty() {
        return None;
    }
    ids.iter()
        .enumerate()
        .skip(HEADER_ROWS)
        .find(|(_, cell)| cell.as_str() == id)
        .map(|(i, _)| i + 1)
}

/// Canonicalise enum-valued fields; reject values they cannot hold.
fn normalize_value(field: ViolationField, value: &str) -> Result<String, StoreError> {
    let invalid = || StoreError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
    };
    match field {
        ViolationField::Status => ViolationStatus::try_parse(value)
            .map(|s| s.to_string())
            .ok_or_else(invalid),
        ViolationField::Impact => ImpactLevel::try_parse(value)
            .map(|i| i.to_string())
            .ok_or_else(invalid),
        ViolationField::DocsNeeded => Ok(value
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(", ")),
        _ => Ok(value.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_of_skips_header_and_blank_ids() {
        let ids: Vec<String> = ["ID", "V1", "", "V2"].iter().map(|s| s.to_string()).collect();
        assert_eq!(row_of(&ids, "V1"), Some(2));
        assert_eq!(row_of(&ids, "V2"), Some(4));
        assert_eq!(row_of(&ids, "ID"), None);
        assert_eq!(row_of(&ids, ""), None);
    }

    #[test]
    fn enum_fields_are_canonicalised() {
        assert_eq!(
            normalize_value(ViolationField::Status, "waiting on client").unwrap(),
            "Waiting on Client"
        );
        assert_eq!(normalize_value(ViolationField::Impact, "high impact").unwrap(), "High");
        assert!(matches!(
            normalize_value(ViolationField::Status, "maybe"),
            Err(StoreError::InvalidValue { .. })
        ));
        assert_eq!(
            normalize_value(ViolationField::DocsNeeded, " Invoice ,,LOA").unwrap(),
            "Invoice, LOA"
        );
        assert_eq!(normalize_value(ViolationField::Notes, "  keep  ").unwrap(), "  keep  ");
    }
}
