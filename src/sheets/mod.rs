//! Transport to the spreadsheet service.
//!
//! [`SheetsApi`] is the seam between the store and the remote API. The
//! [`HttpSheetsClient`] talks to the Google Sheets v4 REST API;
//! [`InMemorySheets`] keeps tabs in process and is what the tests run against.

mod http;
mod memory;

pub use http::{HttpSheetsClient, SheetsClientConfig, DEFAULT_API_BASE};
pub use memory::InMemorySheets;

use async_trait::async_trait;

use crate::columns::A1Range;
use crate::error::SheetsError;

/// Rows of cell text, as returned by a range read.
pub type Rows = Vec<Vec<String>>;

/// One range write inside a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeUpdate {
    pub range: A1Range,
    pub values: Rows,
}

impl RangeUpdate {
    pub fn single(range: A1Range, value: impl Into<String>) -> Self {
        RangeUpdate {
            range,
            values: vec![vec![value.into()]],
        }
    }
}

/// Operations the store needs from a spreadsheet backend.
///
/// Row numbers are 1-based, matching A1 notation.
#[async_trait]
pub trait SheetsApi: Send + Sync {
    /// Read the cells of `range`. Trailing empty rows and cells are omitted.
    async fn read_range(&self, spreadsheet_id: &str, range: &A1Range) -> Result<Rows, SheetsError>;

    /// Overwrite cells starting at the top-left corner of `range`.
    async fn update_range(
        &self,
        spreadsheet_id: &str,
        range: &A1Range,
        values: Rows,
    ) -> Result<(), SheetsError>;

    /// Apply several range writes in one request.
    async fn batch_update(
        &self,
        spreadsheet_id: &str,
        updates: Vec<RangeUpdate>,
    ) -> Result<(), SheetsError>;

    /// Append rows after the last row of the table in `range`.
    async fn append_rows(
        &self,
        spreadsheet_id: &str,
        range: &A1Range,
        values: Rows,
    ) -> Result<(), SheetsError>;

    /// Delete one row from `tab`, shifting later rows up.
    async fn delete_row(
        &self,
        spreadsheet_id: &str,
        tab: &str,
        row_number: usize,
    ) -> Result<(), SheetsError>;
}
