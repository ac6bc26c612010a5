//! Listing filters applied to violations after they are read.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{ImpactLevel, Violation, ViolationStatus};

/// Query-string filter for violation listings and exports.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ViolationFilter {
    /// Keep records dated on or after this day.
    pub since: Option<NaiveDate>,
    /// Keep records from the last `days` days, counted from today.
    pub days: Option<u32>,
    pub status: Option<String>,
    pub impact: Option<String>,
    /// Case-insensitive match on id, ASIN, product title and reason.
    pub search: Option<String>,
}

impl ViolationFilter {
    /// The effective date cutoff: the later of `since` and `now - days`.
    ///
    /// A window reaching past the representable calendar keeps everything.
    pub fn cutoff(&self, now: DateTime<Utc>) -> Option<NaiveDate> {
        let relative = self.days.map(|d| {
            Duration::try_days(i64::from(d))
                .and_then(|window| now.checked_sub_signed(window))
                .map_or(NaiveDate::MIN, |start| start.date_naive())
        });
        match (self.since, relative) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }
    }

    /// Apply the filter. Records with no usable date are kept by the date
    /// cutoff, since nothing shows them to be older.
    pub fn apply(&self, violations: Vec<Violation>, now: DateTime<Utc>) -> Vec<Violation> {
        let cutoff = self.cutoff(now);
        let status = self
            .status
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .map(ViolationStatus::parse);
        let impact = self
            .impact
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .map(ImpactLevel::parse);
        let needle = self
            .search
            .as_deref()
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty());

        violations
            .into_iter()
            .filter(|v| match (cutoff, v.effective_date()) {
                (Some(cutoff), Some(date)) => date >= cutoff,
                _ => true,
            })
            .filter(|v| status.map_or(true, |s| v.status == s))
            .filter(|v| impact.map_or(true, |i| v.impact == i))
            .filter(|v| {
                needle.as_ref().map_or(true, |n| {
                    [&v.id, &v.asin, &v.product_title, &v.reason]
                        .iter()
                        .any(|field| field.to_lowercase().contains(n.as_str()))
                })
            })
            .collect()
    }
}

/// Newest first by effective date; undated records go last.
pub fn sort_newest_first(violations: &mut [Violation]) {
    violations.sort_by(|a, b| b.effective_date().cmp(&a.effective_date()));
}

/// Totals shown above a violation listing.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ListingSummary {
    pub count: usize,
    pub high_impact: usize,
    pub at_risk_sales: f64,
}

pub fn summarize(violations: &[Violation]) -> ListingSummary {
    ListingSummary {
        count: violations.len(),
        high_impact: violations
            .iter()
            .filter(|v| v.impact == ImpactLevel::High)
            .count(),
        at_risk_sales: violations.iter().map(|v| v.at_risk_sales).sum(),
    }
}
