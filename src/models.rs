//! Row-shaped records read from tenant and master spreadsheets.
//!
//! Parsing never fails: unknown enum strings fall back to a defined value,
//! unparseable numbers become zero and unparseable dates become `None`.

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::columns::{MasterColumn, ViolationTab};

lazy_static! {
    static ref SPREADSHEET_ID_REGEX: Regex =
        Regex::new(r"/spreadsheets/d/([A-Za-z0-9_-]+)").unwrap();
    static ref BARE_ID_REGEX: Regex = Regex::new(r"^[A-Za-z0-9_-]{10,}$").unwrap();
}

/// Workflow status of a violation, as written in the status column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ViolationStatus {
    #[default]
    Working,
    WaitingOnClient,
    Submitted,
    ReviewResolved,
    Denied,
    Ignored,
    Resolved,
    Acknowledged,
    NeedsInfo,
}

impl ViolationStatus {
    pub const ALL: [ViolationStatus; 9] = [
        ViolationStatus::Working,
        ViolationStatus::WaitingOnClient,
        ViolationStatus::Submitted,
        ViolationStatus::ReviewResolved,
        ViolationStatus::Denied,
        ViolationStatus::Ignored,
        ViolationStatus::Resolved,
        ViolationStatus::Acknowledged,
        ViolationStatus::NeedsInfo,
    ];

    /// Parse a status cell. Anything unrecognised is `Working`.
    pub fn parse(raw: &str) -> Self {
        Self::try_parse(raw).unwrap_or_default()
    }

    /// Strict parse, used when validating writes.
    pub fn try_parse(raw: &str) -> Option<Self> {
        let key: String = raw
            .trim()
            .to_ascii_lowercase()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect();
        match key.as_str() {
            "working" | "inprogress" => Some(ViolationStatus::Working),
            "waitingonclient" | "waiting" => Some(ViolationStatus::WaitingOnClient),
            "submitted" => Some(ViolationStatus::Submitted),
            "reviewresolved" => Some(ViolationStatus::ReviewResolved),
            "denied" => Some(ViolationStatus::Denied),
            "ignored" => Some(ViolationStatus::Ignored),
            "resolved" => Some(ViolationStatus::Resolved),
            "acknowledged" => Some(ViolationStatus::Acknowledged),
            "needsinfo" | "needsinformation" => Some(ViolationStatus::NeedsInfo),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ViolationStatus::Working => "Working",
            ViolationStatus::WaitingOnClient => "Waiting on Client",
            ViolationStatus::Submitted => "Submitted",
            ViolationStatus::ReviewResolved => "Review Resolved",
            ViolationStatus::Denied => "Denied",
            ViolationStatus::Ignored => "Ignored",
            ViolationStatus::Resolved => "Resolved",
            ViolationStatus::Acknowledged => "Acknowledged",
            ViolationStatus::NeedsInfo => "Needs Info",
        }
    }
}

impl fmt::Display for ViolationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ViolationStatus {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ViolationStatus {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(ViolationStatus::parse(&raw))
    }
}

/// Marketplace impact rating of a violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ImpactLevel {
    High,
    Low,
    #[default]
    NoImpact,
}

impl ImpactLevel {
    /// Parse an impact cell. Anything unrecognised is `NoImpact`.
    pub fn parse(raw: &str) -> Self {
        Self::try_parse(raw).unwrap_or_default()
    }

    /// Strict parse, used when validating writes.
    pub fn try_parse(raw: &str) -> Option<Self> {
        let lower = raw.trim().to_ascii_lowercase();
        if lower.starts_with("high") {
            Some(ImpactLevel::High)
        } else if lower.starts_with("low") {
            Some(ImpactLevel::Low)
        } else if lower.starts_with("no") {
            Some(ImpactLevel::NoImpact)
        } else {
            None
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ImpactLevel::High => "High",
            ImpactLevel::Low => "Low",
            ImpactLevel::NoImpact => "No impact",
        }
    }
}

impl fmt::Display for ImpactLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ImpactLevel {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ImpactLevel {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(ImpactLevel::parse(&raw))
    }
}

/// One seller account, as listed in the master tab.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tenant {
    pub store_name: String,
    pub merchant_id: String,
    pub owner_email: String,
    pub spreadsheet_url: String,
    pub total_violations: u32,
    pub recent_violations: u32,
    pub at_risk_sales: f64,
    pub high_impact_count: u32,
    pub resolved_count: u32,
    pub subdomain: String,
    pub documents_folder: Option<String>,
}

impl Tenant {
    /// Build a tenant from a master-tab row. Rows without a store name or
    /// subdomain are not tenants.
    pub fn from_row(row: &[String]) -> Option<Self> {
        let cell = |col: MasterColumn| cell_at(row, col as usize);

        let store_name = cell(MasterColumn::StoreName);
        let subdomain = cell(MasterColumn::Subdomain).to_ascii_lowercase();
        if store_name.is_empty() && subdomain.is_empty() {
            return None;
        }

        let documents_folder = Some(cell(MasterColumn::DocumentsFolder)).filter(|s| !s.is_empty());

        Some(Tenant {
            store_name,
            merchant_id: cell(MasterColumn::MerchantId),
            owner_email: cell(MasterColumn::OwnerEmail),
            spreadsheet_url: cell(MasterColumn::SpreadsheetUrl),
            total_violations: parse_count(&cell(MasterColumn::TotalViolations)),
            recent_violations: parse_count(&cell(MasterColumn::RecentViolations)),
            at_risk_sales: parse_money(&cell(MasterColumn::AtRiskSales)),
            high_impact_count: parse_count(&cell(MasterColumn::HighImpactCount)),
            resolved_count: parse_count(&cell(MasterColumn::ResolvedCount)),
            subdomain,
            documents_folder,
        })
    }

    /// Spreadsheet ID extracted from `spreadsheet_url`. A bare ID is accepted.
    pub fn spreadsheet_id(&self) -> Option<String> {
        spreadsheet_id_from_url(&self.spreadsheet_url)
    }

    pub fn is_owned_by(&self, email: &str) -> bool {
        !self.owner_email.is_empty() && self.owner_email.trim().eq_ignore_ascii_case(email.trim())
    }
}

/// Extract the document ID from a spreadsheet URL such as
/// `https://docs.google.com/spreadsheets/d/<id>/edit#gid=0`.
pub fn spreadsheet_id_from_url(url: &str) -> Option<String> {
    let url = url.trim();
    if let Some(caps) = SPREADSHEET_ID_REGEX.captures(url) {
        return Some(caps[1].to_string());
    }
    if BARE_ID_REGEX.is_match(url) {
        return Some(url.to_string());
    }
    None
}

/// A compliance issue tracked for a tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    pub id: String,
    pub imported_at: Option<DateTime<Utc>>,
    pub reason: String,
    pub date: Option<NaiveDate>,
    pub asin: String,
    pub product_title: String,
    pub at_risk_sales: f64,
    pub action_taken: String,
    pub impact: ImpactLevel,
    pub next_steps: String,
    pub options: String,
    pub status: ViolationStatus,
    pub notes: String,
    /// Only present on the resolved tab.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<NaiveDate>,
    /// Only present on the active tab.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub docs_needed: Vec<String>,
}

impl Violation {
    /// Parse a row from a violation tab. Returns `None` when the row has
    /// neither an ID nor an ASIN.
    pub fn from_row(row: &[String], tab: ViolationTab) -> Option<Self> {
        let id = cell_at(row, 0);
        let asin = cell_at(row, 4);
        if id.is_empty() && asin.is_empty() {
            return None;
        }

        let last = cell_at(row, 13);
        let (resolved_at, docs_needed) = match tab {
            ViolationTab::Active => (None, split_list(&last)),
            ViolationTab::Resolved => (parse_date(&last), Vec::new()),
        };

        Some(Violation {
            id,
            imported_at: parse_timestamp(&cell_at(row, 1)),
            reason: cell_at(row, 2),
            date: parse_date(&cell_at(row, 3)),
            asin,
            product_title: cell_at(row, 5),
            at_risk_sales: parse_money(&cell_at(row, 6)),
            action_taken: cell_at(row, 7),
            impact: ImpactLevel::parse(&cell_at(row, 8)),
            next_steps: cell_at(row, 9),
            options: cell_at(row, 10),
            status: ViolationStatus::parse(&cell_at(row, 11)),
            notes: cell_at(row, 12),
            resolved_at,
            docs_needed,
        })
    }

    /// Serialise back into column order for `tab`.
    pub fn to_row(&self, tab: ViolationTab) -> Vec<String> {
        let last = match tab {
            ViolationTab::Active => self.docs_needed.join(", "),
            ViolationTab::Resolved => self
                .resolved_at
                .map(|d| d.format("%Y-%m-%d").to_string())
                .unwrap_or_default(),
        };
        vec![
            self.id.clone(),
            self.imported_at
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_default(),
            self.reason.clone(),
            self.date
                .map(|d| d.format("%Y-%m-%d").to_string())
                .unwrap_or_default(),
            self.asin.clone(),
            self.product_title.clone(),
            format!("{:.2}", self.at_risk_sales),
            self.action_taken.clone(),
            self.impact.to_string(),
            self.next_steps.clone(),
            self.options.clone(),
            self.status.to_string(),
            self.notes.clone(),
            last,
        ]
    }

    /// The date used for range filtering: the violation date, else the
    /// import date.
    pub fn effective_date(&self) -> Option<NaiveDate> {
        self.date.or_else(|| self.imported_at.map(|t| t.date_naive()))
    }
}

/// Aggregate counters shown in the internal team's client list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ClientOverview {
    pub store_name: String,
    pub subdomain: String,
    pub owner_email: String,
    pub violations_48h: u32,
    pub violations_72h: u32,
    pub resolved_this_month: u32,
    pub resolved_total: u32,
    pub high_impact_count: u32,
    pub at_risk_sales: f64,
    /// Set when the tenant's spreadsheet could not be read.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ClientOverview {
    /// Compute counters from a tenant's active and resolved records.
    pub fn compute(
        tenant: &Tenant,
        active: &[Violation],
        resolved: &[Violation],
        now: DateTime<Utc>,
    ) -> Self {
        let within = |v: &Violation, hours: i64| {
            v.imported_at
                .map(|t| t <= now && now - t <= chrono::Duration::hours(hours))
                .unwrap_or(false)
        };
        let today = now.date_naive();
        let month_start = today.with_day0(0).unwrap_or(today);

        ClientOverview {
            store_name: tenant.store_name.clone(),
            subdomain: tenant.subdomain.clone(),
            owner_email: tenant.owner_email.clone(),
            violations_48h: active.iter().filter(|v| within(v, 48)).count() as u32,
            violations_72h: active.iter().filter(|v| within(v, 72)).count() as u32,
            resolved_this_month: resolved
                .iter()
                .filter(|v| v.resolved_at.is_some_and(|d| d >= month_start && d <= today))
                .count() as u32,
            resolved_total: resolved.len() as u32,
            high_impact_count: active
                .iter()
                .filter(|v| v.impact == ImpactLevel::High)
                .count() as u32,
            at_risk_sales: active.iter().map(|v| v.at_risk_sales).sum(),
            error: None,
        }
    }

    /// Zeroed counters for a tenant whose data could not be loaded.
    pub fn unavailable(tenant: &Tenant, reason: String) -> Self {
        ClientOverview {
            store_name: tenant.store_name.clone(),
            subdomain: tenant.subdomain.clone(),
            owner_email: tenant.owner_email.clone(),
            error: Some(reason),
            ..Default::default()
        }
    }
}

fn cell_at(row: &[String], idx: usize) -> String {
    row.get(idx).map(|s| s.trim().to_string()).unwrap_or_default()
}

/// Parse "$1,234.56", "1234.5" or "(12.00)" into a number. Unparseable is 0.
pub fn parse_money(raw: &str) -> f64 {
    let trimmed = raw.trim();
    let negative = trimmed.starts_with('-') || (trimmed.starts_with('(') && trimmed.ends_with(')'));
    let digits: String = trimmed
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    match digits.parse::<f64>() {
        Ok(v) if negative => -v,
        Ok(v) => v,
        Err(_) => 0.0,
    }
}

fn parse_count(raw: &str) -> u32 {
    let value = parse_money(raw);
    if value.is_finite() && value > 0.0 {
        value.round() as u32
    } else {
        0
    }
}

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y", "%-m/%-d/%Y", "%m/%d/%y"];
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
];

/// Parse a date cell. Timestamps are truncated to their date.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
        .or_else(|| parse_timestamp(raw).map(|t| t.date_naive()))
}

/// Parse a timestamp cell. Naive timestamps are taken as UTC; a bare date is
/// midnight.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Some(t.with_timezone(&Utc));
    }
    if let Some(t) = DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
    {
        return Some(t.and_utc());
    }
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|t| t.and_utc())
}

/// Split a comma-separated document list.
fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn row(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn rows_without_id_and_asin_are_dropped() {
        let blank = row(&["", "2026-01-02", "Policy", "", "", "Widget"]);
        assert!(Violation::from_row(&blank, ViolationTab::Active).is_none());

        let asin_only = row(&["", "", "Policy", "", "B000TEST01"]);
        let v = Violation::from_row(&asin_only, ViolationTab::Active).unwrap();
        assert_eq!(v.asin, "B000TEST01");
        assert!(v.id.is_empty());

        assert!(Violation::from_row(&[], ViolationTab::Resolved).is_none());
    }

    #[test]
    fn unknown_status_falls_back_to_working() {
        assert_eq!(ViolationStatus::parse("Waiting on client"), ViolationStatus::WaitingOnClient);
        assert_eq!(ViolationStatus::parse("REVIEW-RESOLVED"), ViolationStatus::ReviewResolved);
        assert_eq!(ViolationStatus::parse("¯\\_(ツ)_/¯"), ViolationStatus::Working);
        assert_eq!(ViolationStatus::parse(""), ViolationStatus::Working);
        for status in ViolationStatus::ALL {
            assert_eq!(ViolationStatus::parse(status.as_str()), status);
        }
    }

    #[test]
    fn impact_parsing() {
        assert_eq!(ImpactLevel::parse("High Impact"), ImpactLevel::High);
        assert_eq!(ImpactLevel::parse(" low"), ImpactLevel::Low);
        assert_eq!(ImpactLevel::parse("No impact"), ImpactLevel::NoImpact);
        assert_eq!(ImpactLevel::parse("???"), ImpactLevel::NoImpact);
        assert_eq!(ImpactLevel::try_parse("???"), None);
        assert_eq!(ViolationStatus::try_parse("Done-ish"), None);
    }

    #[test]
    fn active_and_resolved_last_column() {
        let mut cells = vec![
            "V1",
            "2026-03-01 10:00:00",
            "IP",
            "03/02/2026",
            "B0",
            "Mug",
            "$1,250.50",
            "Appealed",
            "High",
            "Wait",
            "Appeal",
            "Submitted",
            "note",
        ];
        cells.push("Invoice, , LOA ");
        let active = Violation::from_row(&row(&cells), ViolationTab::Active).unwrap();
        assert_eq!(active.docs_needed, vec!["Invoice", "LOA"]);
        assert_eq!(active.resolved_at, None);
        assert_eq!(active.at_risk_sales, 1250.5);
        assert_eq!(active.date, NaiveDate::from_ymd_opt(2026, 3, 2));
        assert_eq!(active.status, ViolationStatus::Submitted);

        cells[13] = "2026-03-05";
        let resolved = Violation::from_row(&row(&cells), ViolationTab::Resolved).unwrap();
        assert!(resolved.docs_needed.is_empty());
        assert_eq!(resolved.resolved_at, NaiveDate::from_ymd_opt(2026, 3, 5));

        let back = resolved.to_row(ViolationTab::Resolved);
        assert_eq!(back.len(), 14);
        assert_eq!(back[13], "2026-03-05");
        assert_eq!(back[6], "1250.50");
    }

    #[test]
    fn tenant_rows_and_spreadsheet_ids() {
        let t = Tenant::from_row(&row(&[
            "Acme Store", "A1B2", "Owner@Acme.com",
            "https://docs.google.com/spreadsheets/d/1AbC_def-GHIjkl/edit#gid=0",
            "12", "3", "$9,000", "2", "7", "ACME", "",
        ]))
        .unwrap();
        assert_eq!(t.subdomain, "acme");
        assert_eq!(t.spreadsheet_id().as_deref(), Some("1AbC_def-GHIjkl"));
        assert_eq!(t.total_violations, 12);
        assert_eq!(t.documents_folder, None);
        assert!(t.is_owned_by("owner@acme.com "));
        assert!(!t.is_owned_by("someone@else.com"));

        assert!(Tenant::from_row(&row(&["", "", "x@y.z"])).is_none());
        assert_eq!(spreadsheet_id_from_url("not a url"), None);
    }

    #[test]
    fn money_and_dates() {
        assert_eq!(parse_money("(12.00)"), -12.0);
        assert_eq!(parse_money("n/a"), 0.0);
        assert_eq!(parse_date("2026-01-31T08:00:00Z"), NaiveDate::from_ymd_opt(2026, 1, 31));
        assert_eq!(parse_date("yesterday"), None);
        assert_eq!(
            parse_timestamp("1/5/2026"),
            Some(Utc.with_ymd_and_hms(2026, 1, 5, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn overview_counts_windows() {
        let now = Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap();
        let cells = ["Acme", "", "", "", "", "", "", "", "", "acme"];
        let tenant = Tenant::from_row(&row(&cells)).unwrap();
        let mk = |id: &str, imported: &str, impact: &str, sales: &str, resolved: &str| {
            Violation::from_row(
                &row(&[id, imported, "", "", "", "", sales, "", impact, "", "", "", "", resolved]),
                if resolved.is_empty() { ViolationTab::Active } else { ViolationTab::Resolved },
            )
            .unwrap()
        };
        let active = vec![
            mk("a", "2026-03-09 13:00:00", "High", "100", ""),
            mk("b", "2026-03-08 00:00:00", "Low", "50", ""),
            mk("c", "2026-02-01", "High", "", ""),
        ];
        let resolved = vec![
            mk("d", "", "", "", "2026-03-01"),
            mk("e", "", "", "", "2026-02-28"),
        ];
        let o = ClientOverview::compute(&tenant, &active, &resolved, now);
        assert_eq!(o.violations_48h, 1);
        assert_eq!(o.violations_72h, 2);
        assert_eq!(o.high_impact_count, 2);
        assert_eq!(o.at_risk_sales, 150.0);
        assert_eq!(o.resolved_this_month, 1);
        assert_eq!(o.resolved_total, 2);
    }
}
