use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, TimeZone, Utc};
use violation_dashboard::cache::ManualClock;
use violation_dashboard::columns::{A1Range, ViolationField, ViolationTab};
use violation_dashboard::error::{SheetsError, StoreError};
use violation_dashboard::models::ViolationStatus;
use violation_dashboard::retry::RetryPolicy;
use violation_dashboard::sheets::{InMemorySheets, RangeUpdate, Rows, SheetsApi};
use violation_dashboard::store::{ResolveOutcome, SheetStore, StoreConfig};

const MASTER: &str = "master";
const ACME: &str = "acmeSheet123";

const HEADER: [&str; 14] = [
    "ID", "Imported At", "Reason", "Date", "ASIN", "Product Title", "At-Risk Sales",
    "Action Taken", "Impact", "Next Steps", "Options", "Status", "Notes", "Docs Needed",
];

fn sheets() -> InMemorySheets {
    InMemorySheets::new()
        .with_tab(
            MASTER,
            "Master",
            vec![
                vec!["Store Name", "Merchant ID", "Owner Email", "Spreadsheet URL"],
                vec![
                    "Acme Store",
                    "M1",
                    "owner@acme.com",
                    "https://docs.google.com/spreadsheets/d/acmeSheet123/edit#gid=0",
                    "3",
                    "1",
                    "$120.00",
                    "1",
                    "0",
                    "acme",
                    "",
                ],
                vec![],
                vec![
                    "Beta Goods",
                    "M2",
                    "beta@example.com",
                    "https://docs.google.com/spreadsheets/d/betaSheet456/edit",
                    "",
                    "",
                    "",
                    "",
                    "",
                    "beta",
                    "",
                ],
            ],
        )
        .with_tab(
            ACME,
            "Current Violations",
            vec![
                HEADER.to_vec(),
                violation_row("V1", "2026-03-09 10:00:00", "$100.00", "High", "Working")
                    .into_iter()
                    .chain(["", "Invoice"])
                    .collect(),
                vec!["", "", "orphan note"],
                violation_row("V2", "2026-03-07 18:00:00", "20", "Low", "Submitted"),
                violation_row("V3", "2026-02-01 00:00:00", "0", "No impact", "Working"),
            ],
        )
        .with_tab(ACME, "Resolved Violations", vec![resolved_header()])
}

/// Columns A through L of a violation row, dated on the day it was imported.
fn violation_row<'a>(
    id: &'a str,
    imported_at: &'a str,
    sales: &'a str,
    impact: &'a str,
    status: &'a str,
) -> Vec<&'a str> {
    let date = &imported_at[..10];
    vec![id, imported_at, "Listing", date, "B0TEST", "Mug", sales, "", impact, "", "", status]
}

fn resolved_header() -> Vec<&'static str> {
    HEADER[..13].iter().copied().chain(["Resolved At"]).collect()
}

struct Fixture {
    api: Arc<InMemorySheets>,
    clock: Arc<ManualClock>,
    store: SheetStore,
}

fn fixture_with(retry: RetryPolicy) -> Fixture {
    let api = Arc::new(sheets());
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap(),
    ));
    let mut config = StoreConfig::new(MASTER);
    config.retry = retry;
    let store = SheetStore::new(api.clone(), config, clock.clone());
    Fixture { api, clock, store }
}

fn fixture() -> Fixture {
    fixture_with(RetryPolicy::immediate(3))
}

fn ids_in(api: &InMemorySheets, tab: &str) -> Vec<String> {
    api.tab(ACME, tab)
        .unwrap_or_default()
        .into_iter()
        .skip(1)
        .filter_map(|r| r.first().cloned())
        .collect()
}

#[tokio::test]
async fn tenant_lookup_is_cached_until_ttl() {
    let f = fixture();

    let tenant = f.store.tenant_by_subdomain("ACME").await.unwrap();
    assert_eq!(tenant.store_name, "Acme Store");
    assert_eq!(tenant.spreadsheet_id().as_deref(), Some(ACME));
    let calls = f.api.call_count();

    let by_name = f.store.tenant_by_store_name(" acme store ").await.unwrap();
    assert_eq!(by_name, tenant);
    f.store.tenant_by_subdomain("beta").await.unwrap();
    assert_eq!(f.api.call_count(), calls);

    f.clock.advance(Duration::minutes(5));
    f.store.tenant_by_subdomain("acme").await.unwrap();
    assert_eq!(f.api.call_count(), calls + 1);
}

#[tokio::test]
async fn unknown_tenant_is_not_found() {
    let f = fixture();
    assert!(matches!(
        f.store.tenant_by_subdomain("nobody").await,
        Err(StoreError::TenantNotFound(_))
    ));
    assert_eq!(f.store.list_tenants().await.unwrap().len(), 2);
}

#[tokio::test]
async fn violations_come_from_whichever_tab_name_exists() {
    let f = fixture();
    let tenant = f.store.tenant_by_subdomain("acme").await.unwrap();

    assert_eq!(
        f.store.resolve_tab(ACME, ViolationTab::Active).await.unwrap(),
        "Current Violations"
    );

    let active = f.store.violations(&tenant, ViolationTab::Active).await.unwrap();
    let ids: Vec<&str> = active.iter().map(|v| v.id.as_str()).collect();
    assert_eq!(ids, vec!["V1", "V2", "V3"]);
    assert_eq!(active[0].docs_needed, vec!["Invoice"]);

    let resolved = f.store.violations(&tenant, ViolationTab::Resolved).await.unwrap();
    assert!(resolved.is_empty());

    let v2 = f.store.find_violation(&tenant, ViolationTab::Active, "V2").await.unwrap();
    assert_eq!(v2.status, ViolationStatus::Submitted);
}

#[tokio::test]
async fn missing_tabs_are_reported() {
    let f = fixture();
    let beta = f.store.tenant_by_subdomain("beta").await.unwrap();
    match f.store.violations(&beta, ViolationTab::Active).await {
        Err(StoreError::TabNotFound(names)) => {
            assert!(names.contains(&"All Current Violations".to_string()))
        }
        other => panic!("expected TabNotFound, got {:?}", other),
    }
}

#[tokio::test]
async fn field_update_writes_one_cell() {
    let f = fixture();
    let tenant = f.store.tenant_by_subdomain("acme").await.unwrap();

    f.store
        .update_violation_field(
            &tenant,
            ViolationTab::Active,
            "V2",
            ViolationField::Status,
            "waiting on client",
        )
        .await
        .unwrap();
    let rows = f.api.tab(ACME, "Current Violations").unwrap();
    assert_eq!(rows[3][11], "Waiting on Client");
    assert_eq!(rows[3][0], "V2");

    f.store
        .update_violation_field(
            &tenant,
            ViolationTab::Active,
            "V1",
            ViolationField::Notes,
            "called seller",
        )
        .await
        .unwrap();
    let v1 = f.store.find_violation(&tenant, ViolationTab::Active, "V1").await.unwrap();
    assert_eq!(v1.notes, "called seller");

    assert!(matches!(
        f.store
            .update_violation_field(
                &tenant,
                ViolationTab::Active,
                "V9",
                ViolationField::Notes,
                "x",
            )
            .await,
        Err(StoreError::ViolationNotFound(_))
    ));
    assert!(matches!(
        f.store
            .update_violation_field(
                &tenant,
                ViolationTab::Resolved,
                "V1",
                ViolationField::DocsNeeded,
                "x",
            )
            .await,
        Err(StoreError::FieldNotOnTab { .. })
    ));
    assert!(matches!(
        f.store
            .update_violation_field(
                &tenant,
                ViolationTab::Active,
                "V1",
                ViolationField::Impact,
                "enormous",
            )
            .await,
        Err(StoreError::InvalidValue { .. })
    ));
}

#[tokio::test]
async fn bulk_update_reports_missing_ids() {
    let f = fixture();
    let tenant = f.store.tenant_by_subdomain("acme").await.unwrap();

    let ids = vec!["V1".to_string(), "V3".to_string(), "nope".to_string(), "V1".to_string()];
    let result = f
        .store
        .bulk_update(&tenant, ViolationTab::Active, &ids, ViolationField::Status, "Denied")
        .await
        .unwrap();
    assert_eq!(result.updated, vec!["V1", "V3"]);
    assert_eq!(result.missing, vec!["nope"]);

    let active = f.store.violations(&tenant, ViolationTab::Active).await.unwrap();
    let statuses: Vec<ViolationStatus> = active.iter().map(|v| v.status).collect();
    assert_eq!(
        statuses,
        vec![ViolationStatus::Denied, ViolationStatus::Submitted, ViolationStatus::Denied]
    );
}

#[tokio::test]
async fn resolving_twice_leaves_one_resolved_row() {
    let f = fixture();
    let tenant = f.store.tenant_by_subdomain("acme").await.unwrap();

    let first = f.store.resolve_violation(&tenant, "V1").await.unwrap();
    assert_eq!(first, ResolveOutcome::Resolved);
    let second = f.store.resolve_violation(&tenant, "V1").await.unwrap();
    assert_eq!(second, ResolveOutcome::AlreadyResolved);

    assert_eq!(ids_in(&f.api, "Resolved Violations"), vec!["V1"]);
    assert_eq!(ids_in(&f.api, "Current Violations"), vec!["", "V2", "V3"]);

    let resolved = f.store.violations(&tenant, ViolationTab::Resolved).await.unwrap();
    assert_eq!(resolved.len(), 1);
    assert_eq!(resolved[0].status, ViolationStatus::Resolved);
    assert_eq!(resolved[0].resolved_at, NaiveDate::from_ymd_opt(2026, 3, 10));
    assert_eq!(resolved[0].at_risk_sales, 100.0);

    assert!(matches!(
        f.store.resolve_violation(&tenant, "V404").await,
        Err(StoreError::ViolationNotFound(_))
    ));
}

#[tokio::test]
async fn failed_delete_is_finished_by_retry() {
    let f = fixture();
    let tenant = f.store.tenant_by_subdomain("acme").await.unwrap();

    f.api.fail_deletes(true);
    assert!(f.store.resolve_violation(&tenant, "V2").await.is_err());
    assert_eq!(ids_in(&f.api, "Resolved Violations"), vec!["V2"]);
    assert!(ids_in(&f.api, "Current Violations").contains(&"V2".to_string()));

    f.api.fail_deletes(false);
    let outcome = f.store.resolve_violation(&tenant, "V2").await.unwrap();
    assert_eq!(outcome, ResolveOutcome::AlreadyResolved);
    assert_eq!(ids_in(&f.api, "Resolved Violations"), vec!["V2"]);
    assert!(!ids_in(&f.api, "Current Violations").contains(&"V2".to_string()));
}

#[tokio::test]
async fn rate_limits_are_retried_then_surface() {
    let f = fixture_with(RetryPolicy::immediate(3));
    let tenant = f.store.tenant_by_subdomain("acme").await.unwrap();
    f.api.rate_limit_next(2);
    assert_eq!(
        f.store.violations(&tenant, ViolationTab::Active).await.unwrap().len(),
        3
    );

    let f = fixture_with(RetryPolicy::immediate(1));
    f.api.rate_limit_next(10);
    assert!(matches!(
        f.store.tenant_by_subdomain("acme").await,
        Err(StoreError::Sheets(SheetsError::RateLimited(_)))
    ));
    // one attempt plus one retry
    assert_eq!(f.api.call_count(), 2);
}

#[tokio::test]
async fn client_overviews_degrade_per_tenant_and_cache() {
    let f = fixture();

    let list = f.store.client_overviews().await.unwrap();
    assert_eq!(list.len(), 2);

    let acme = list.iter().find(|c| c.subdomain == "acme").unwrap();
    assert_eq!(acme.violations_48h, 1);
    assert_eq!(acme.violations_72h, 2);
    assert_eq!(acme.high_impact_count, 1);
    assert_eq!(acme.at_risk_sales, 120.0);
    assert!(acme.error.is_none());

    let beta = list.iter().find(|c| c.subdomain == "beta").unwrap();
    assert!(beta.error.is_some());
    assert_eq!(beta.violations_48h, 0);

    let calls = f.api.call_count();
    f.store.client_overviews().await.unwrap();
    assert_eq!(f.api.call_count(), calls);

    let tenant = f.store.tenant_by_subdomain("acme").await.unwrap();
    f.store.resolve_violation(&tenant, "V1").await.unwrap();
    let list = f.store.client_overviews().await.unwrap();
    let acme = list.iter().find(|c| c.subdomain == "acme").unwrap();
    assert_eq!(acme.violations_48h, 0);
    assert_eq!(acme.resolved_total, 1);
    assert_eq!(acme.resolved_this_month, 1);
}

/// Backend whose cell writes take a while to land.
struct SlowWrites {
    inner: Arc<InMemorySheets>,
    delay: std::time::Duration,
}

#[async_trait]
impl SheetsApi for SlowWrites {
    async fn read_range(&self, spreadsheet_id: &str, range: &A1Range) -> Result<Rows, SheetsError> {
        self.inner.read_range(spreadsheet_id, range).await
    }

    async fn update_range(
        &self,
        spreadsheet_id: &str,
        range: &A1Range,
        values: Rows,
    ) -> Result<(), SheetsError> {
        tokio::time::sleep(self.delay).await;
        self.inner.update_range(spreadsheet_id, range, values).await
    }

    async fn batch_update(
        &self,
        spreadsheet_id: &str,
        updates: Vec<RangeUpdate>,
    ) -> Result<(), SheetsError> {
        tokio::time::sleep(self.delay).await;
        self.inner.batch_update(spreadsheet_id, updates).await
    }

    async fn append_rows(
        &self,
        spreadsheet_id: &str,
        range: &A1Range,
        values: Rows,
    ) -> Result<(), SheetsError> {
        self.inner.append_rows(spreadsheet_id, range, values).await
    }

    async fn delete_row(
        &self,
        spreadsheet_id: &str,
        tab: &str,
        row_number: usize,
    ) -> Result<(), SheetsError> {
        self.inner.delete_row(spreadsheet_id, tab, row_number).await
    }
}

fn slow_store() -> (Arc<InMemorySheets>, Arc<SheetStore>) {
    let inner = Arc::new(sheets());
    let api = Arc::new(SlowWrites {
        inner: inner.clone(),
        delay: std::time::Duration::from_millis(100),
    });
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap(),
    ));
    let store = SheetStore::new(api, StoreConfig::new(MASTER), clock);
    (inner, Arc::new(store))
}

fn notes_of(api: &InMemorySheets, id: &str) -> Option<String> {
    api.tab(ACME, "Current Violations")?
        .into_iter()
        .find(|r| r.first().map(String::as_str) == Some(id))
        .map(|r| r.get(12).cloned().unwrap_or_default())
}

#[tokio::test]
async fn resolve_waits_for_pending_field_update() {
    let (api, store) = slow_store();
    let tenant = store.tenant_by_subdomain("acme").await.unwrap();

    let update = {
        let store = store.clone();
        let tenant = tenant.clone();
        tokio::spawn(async move {
            store
                .update_violation_field(
                    &tenant,
                    ViolationTab::Active,
                    "V2",
                    ViolationField::Notes,
                    "V2 note",
                )
                .await
        })
    };
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    store.resolve_violation(&tenant, "V1").await.unwrap();
    update.await.unwrap().unwrap();

    assert_eq!(notes_of(&api, "V2").as_deref(), Some("V2 note"));
    assert_eq!(notes_of(&api, "V3").as_deref(), Some(""));
}

#[tokio::test]
async fn resolve_waits_for_pending_bulk_update() {
    let (api, store) = slow_store();
    let tenant = store.tenant_by_subdomain("acme").await.unwrap();

    let update = {
        let store = store.clone();
        let tenant = tenant.clone();
        tokio::spawn(async move {
            let ids = vec!["V2".to_string()];
            store
                .bulk_update(
                    &tenant,
                    ViolationTab::Active,
                    &ids,
                    ViolationField::Notes,
                    "bulk",
                )
                .await
        })
    };
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    store.resolve_violation(&tenant, "V1").await.unwrap();
    assert_eq!(update.await.unwrap().unwrap().updated, vec!["V2"]);

    assert_eq!(notes_of(&api, "V2").as_deref(), Some("bulk"));
    assert_eq!(notes_of(&api, "V3").as_deref(), Some(""));
}
