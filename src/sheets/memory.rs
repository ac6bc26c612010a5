//! In-process spreadsheet backend with fault injection.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{RangeUpdate, Rows, SheetsApi};
use crate::columns::A1Range;
use crate::error::SheetsError;

type Book = HashMap<String, Rows>;

#[derive(Default)]
struct Faults {
    rate_limit_next: usize,
    fail_deletes: bool,
}

/// Spreadsheets held in memory, keyed by spreadsheet id then tab title.
///
/// Reads and writes follow the remote API: a missing tab is reported the way
/// the service reports it ("Unable to parse range"), reads drop trailing
/// empty cells, and appends land after the last row.
#[derive(Default)]
pub struct InMemorySheets {
    books: Mutex<HashMap<String, Book>>,
    faults: Mutex<Faults>,
    calls: AtomicUsize,
}

impl InMemorySheets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`set_tab`](Self::set_tab).
    pub fn with_tab(self, spreadsheet_id: &str, tab: &str, rows: Vec<Vec<&str>>) -> Self {
        self.set_tab(
            spreadsheet_id,
            tab,
            rows.into_iter()
                .map(|r| r.into_iter().map(str::to_string).collect())
                .collect(),
        );
        self
    }

    pub fn set_tab(&self, spreadsheet_id: &str, tab: &str, rows: Rows) {
        self.books
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(spreadsheet_id.to_string())
            .or_default()
            .insert(tab.to_string(), rows);
    }

    /// Snapshot of a tab's rows.
    pub fn tab(&self, spreadsheet_id: &str, tab: &str) -> Option<Rows> {
        self.books
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(spreadsheet_id)
            .and_then(|book| book.get(tab))
            .cloned()
    }

    /// Fail the next `n` calls with a rate-limit error.
    pub fn rate_limit_next(&self, n: usize) {
        self.faults.lock().unwrap_or_else(|e| e.into_inner()).rate_limit_next = n;
    }

    /// Make every `delete_row` fail until switched off.
    pub fn fail_deletes(&self, fail: bool) {
        self.faults.lock().unwrap_or_else(|e| e.into_inner()).fail_deletes = fail;
    }

    /// Total calls received, failed ones included.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn enter(&self) -> Result<(), SheetsError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut faults = self.faults.lock().unwrap_or_else(|e| e.into_inner());
        if faults.rate_limit_next > 0 {
            faults.rate_limit_next -= 1;
            return Err(SheetsError::RateLimited(
                "Quota exceeded for quota metric 'Read requests'".to_string(),
            ));
        }
        Ok(())
    }

    fn with_tab_mut<T>(
        &self,
        spreadsheet_id: &str,
        range: &A1Range,
        f: impl FnOnce(&mut Rows) -> Result<T, SheetsError>,
    ) -> Result<T, SheetsError> {
        let mut books = self.books.lock().unwrap_or_else(|e| e.into_inner());
        let book = books.get_mut(spreadsheet_id).ok_or_else(|| {
            SheetsError::NotFound(format!("Requested entity was not found: {}", spreadsheet_id))
        })?;
        let rows = book
            .get_mut(&range.tab)
            .ok_or_else(|| SheetsError::NotFound(format!("Unable to parse range: {}", range)))?;
        f(rows)
    }
}

fn write_at(rows: &mut Rows, start_row: usize, start_col: usize, values: Rows) {
    for (i, value_row) in values.into_iter().enumerate() {
        let r = start_row - 1 + i;
        if rows.len() <= r {
            rows.resize(r + 1, Vec::new());
        }
        for (j, value) in value_row.into_iter().enumerate() {
            let c = start_col - 1 + j;
            let row = &mut rows[r];
            if row.len() <= c {
                row.resize(c + 1, String::new());
            }
            row[c] = value;
        }
    }
}

fn trim_trailing(mut rows: Rows) -> Rows {
    for row in rows.iter_mut() {
        while row.last().is_some_and(|c| c.is_empty()) {
            row.pop();
        }
    }
    while rows.last().is_some_and(|r| r.is_empty()) {
        rows.pop();
    }
    rows
}

#[async_trait]
impl SheetsApi for InMemorySheets {
    async fn read_range(&self, spreadsheet_id: &str, range: &A1Range) -> Result<Rows, SheetsError> {
        self.enter()?;
        self.with_tab_mut(spreadsheet_id, range, |rows| {
            let first_row = range.start_row.unwrap_or(1).max(1);
            let last_row = range.end_row.unwrap_or(usize::MAX);
            let first_col = range.start_col.unwrap_or(1).max(1);
            let last_col = range.end_col.unwrap_or(usize::MAX);

            let selected: Rows = rows
                .iter()
                .enumerate()
                .filter(|(i, _)| *i + 1 >= first_row && *i + 1 <= last_row)
                .map(|(_, row)| {
                    row.iter()
                        .enumerate()
                        .filter(|(j, _)| *j + 1 >= first_col && *j < last_col)
                        .map(|(_, c)| c.clone())
                        .collect()
                })
                .collect();
            Ok(trim_trailing(selected))
        })
    }

    async fn update_range(
        &self,
        spreadsheet_id: &str,
        range: &A1Range,
        values: Rows,
    ) -> Result<(), SheetsError> {
        self.enter()?;
        self.with_tab_mut(spreadsheet_id, range, |rows| {
            write_at(
                rows,
                range.start_row.unwrap_or(1).max(1),
                range.start_col.unwrap_or(1).max(1),
                values,
            );
            Ok(())
        })
    }

    async fn batch_update(
        &self,
        spreadsheet_id: &str,
        updates: Vec<RangeUpdate>,
    ) -> Result<(), SheetsError> {
        self.enter()?;
        // Validate every range first: the remote batch is all-or-nothing.
        for update in &updates {
            self.with_tab_mut(spreadsheet_id, &update.range, |_| Ok(()))?;
        }
        for update in updates {
            let range = update.range;
            self.with_tab_mut(spreadsheet_id, &range, |rows| {
                write_at(
                    rows,
                    range.start_row.unwrap_or(1).max(1),
                    range.start_col.unwrap_or(1).max(1),
                    update.values,
                );
                Ok(())
            })?;
        }
        Ok(())
    }

    async fn append_rows(
        &self,
        spreadsheet_id: &str,
        range: &A1Range,
        values: Rows,
    ) -> Result<(), SheetsError> {
        self.enter()?;
        self.with_tab_mut(spreadsheet_id, range, |rows| {
            let used = trim_trailing(rows.clone()).len();
            rows.truncate(used);
            write_at(rows, used + 1, range.start_col.unwrap_or(1).max(1), values);
            Ok(())
        })
    }

    async fn delete_row(
        &self,
        spreadsheet_id: &str,
        tab: &str,
        row_number: usize,
    ) -> Result<(), SheetsError> {
        self.enter()?;
        if self.faults.lock().unwrap_or_else(|e| e.into_inner()).fail_deletes {
            return Err(SheetsError::Unknown("Internal error encountered.".to_string()));
        }
        let range = A1Range::whole_tab(tab);
        self.with_tab_mut(spreadsheet_id, &range, |rows| {
            if row_number == 0 || row_number > rows.len() {
                return Err(SheetsError::Unknown(format!(
                    "Invalid requests[0].deleteDimension: row {} is out of range",
                    row_number
                )));
            }
            rows.remove(row_number - 1);
            Ok(())
        })
    }
}
