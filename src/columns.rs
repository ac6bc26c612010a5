//! Column-letter contract for the violation and master tabs.
//!
//! Every tenant spreadsheet carries two violation tabs sharing columns A..M:
//!
//! | Col | Field          | Col | Field          |
//! |-----|----------------|-----|----------------|
//! | A   | id             | H   | action_taken   |
//! | B   | imported_at    | I   | impact         |
//! | C   | reason         | J   | next_steps     |
//! | D   | date           | K   | options        |
//! | E   | asin           | L   | status         |
//! | F   | product_title  | M   | notes          |
//! | G   | at_risk_sales  | N   | docs_needed (active) / resolved_at (resolved) |
//!
//! The master tab lists one tenant per row in columns A..K, see [`MasterColumn`].
//! Row 1 of every tab is a header.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Last column read from a violation tab.
pub const VIOLATION_LAST_COLUMN: &str = "N";
/// Last column read from the master tab.
pub const MASTER_LAST_COLUMN: &str = "K";
/// Number of header rows before the first record.
pub const HEADER_ROWS: usize = 1;

/// Known names for the active-violations tab, tried in order.
pub const ACTIVE_TAB_NAMES: &[&str] = &[
    "All Current Violations",
    "Current Violations",
    "Active Violations",
    "Violations",
];

/// Known names for the resolved-violations tab, tried in order.
pub const RESOLVED_TAB_NAMES: &[&str] = &[
    "All Resolved Violations",
    "Resolved Violations",
    "Resolved",
];

/// Known names for the tenant list in the master spreadsheet, tried in order.
pub const MASTER_TAB_NAMES: &[&str] = &["Master", "Clients", "Sheet1"];

lazy_static! {
    static ref CELL_REF_REGEX: Regex = Regex::new(r"^([A-Za-z]+)?([0-9]+)?$").unwrap();
}

/// Convert column number to letter (A=1, B=2, etc.)
///
/// # Examples
/// ```
/// use violation_dashboard::columns::column_letter;
///
/// assert_eq!(column_letter(1), "A");
/// assert_eq!(column_letter(26), "Z");
/// assert_eq!(column_letter(27), "AA");
/// ```
pub fn column_letter(col: usize) -> String {
    let mut name = String::new();
    let mut n = col;

    while n > 0 {
        n -= 1;
        name.insert(0, (b'A' + (n % 26) as u8) as char);
        n /= 26;
    }

    name
}

/// Convert column letters to a 1-based column number. Returns `None` for
/// anything that is not purely ASCII letters.
pub fn column_index(letters: &str) -> Option<usize> {
    if letters.is_empty() || !letters.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    Some(
        letters
            .to_ascii_uppercase()
            .bytes()
            .fold(0, |acc, b| acc * 26 + (b - b'A' + 1) as usize),
    )
}

/// Which logical violation tab a record lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ViolationTab {
    #[default]
    Active,
    Resolved,
}

impl ViolationTab {
    pub fn name_variants(self) -> &'static [&'static str] {
        match self {
            ViolationTab::Active => ACTIVE_TAB_NAMES,
            ViolationTab::Resolved => RESOLVED_TAB_NAMES,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ViolationTab::Active => "active",
            ViolationTab::Resolved => "resolved",
        }
    }
}

impl FromStr for ViolationTab {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "active" | "current" => Ok(ViolationTab::Active),
            "resolved" => Ok(ViolationTab::Resolved),
            other => Err(format!("unknown tab '{}'", other)),
        }
    }
}

/// Violation fields that may be written back to the spreadsheet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationField {
    ActionTaken,
    Impact,
    NextSteps,
    Options,
    Status,
    Notes,
    DocsNeeded,
}

/// Static field -> column table. `DocsNeeded` only exists on the active tab.
const FIELD_COLUMNS: &[(ViolationField, &str)] = &[
    (ViolationField::ActionTaken, "H"),
    (ViolationField::Impact, "I"),
    (ViolationField::NextSteps, "J"),
    (ViolationField::Options, "K"),
    (ViolationField::Status, "L"),
    (ViolationField::Notes, "M"),
    (ViolationField::DocsNeeded, "N"),
];

impl ViolationField {
    pub const ALL: [ViolationField; 7] = [
        ViolationField::ActionTaken,
        ViolationField::Impact,
        ViolationField::NextSteps,
        ViolationField::Options,
        ViolationField::Status,
        ViolationField::Notes,
        ViolationField::DocsNeeded,
    ];

    /// Column letter this field is stored in on `tab`, or `None` when the
    /// field does not exist there.
    pub fn column(self, tab: ViolationTab) -> Option<&'static str> {
        if self == ViolationField::DocsNeeded && tab == ViolationTab::Resolved {
            return None;
        }
        FIELD_COLUMNS
            .iter()
            .find(|(field, _)| *field == self)
            .map(|(_, col)| *col)
    }

    /// Fields a tenant may edit on their own records. Staff may edit all.
    pub fn is_client_editable(self) -> bool {
        matches!(
            self,
            ViolationField::Status | ViolationField::Notes | ViolationField::DocsNeeded
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ViolationField::ActionTaken => "action_taken",
            ViolationField::Impact => "impact",
            ViolationField::NextSteps => "next_steps",
            ViolationField::Options => "options",
            ViolationField::Status => "status",
            ViolationField::Notes => "notes",
            ViolationField::DocsNeeded => "docs_needed",
        }
    }
}

impl fmt::Display for ViolationField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ViolationField {
    type Err = String;

    /// Accepts snake_case keys as well as the spreadsheet header names
    /// ("Action Taken", "Next Steps", "Docs Needed", ...).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key: String = s
            .trim()
            .to_ascii_lowercase()
            .chars()
            .map(|c| if c == ' ' || c == '-' { '_' } else { c })
            .collect();
        match key.as_str() {
            "action_taken" => Ok(ViolationField::ActionTaken),
            "impact" => Ok(ViolationField::Impact),
            "next_steps" => Ok(ViolationField::NextSteps),
            "options" => Ok(ViolationField::Options),
            "status" => Ok(ViolationField::Status),
            "notes" => Ok(ViolationField::Notes),
            "docs_needed" | "needed_documents" | "documents" => Ok(ViolationField::DocsNeeded),
            _ => Err(format!("unknown field '{}'", s)),
        }
    }
}

/// Columns of the master tab, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MasterColumn {
    StoreName = 0,
    MerchantId,
    OwnerEmail,
    SpreadsheetUrl,
    TotalViolations,
    RecentViolations,
    AtRiskSales,
    HighImpactCount,
    ResolvedCount,
    Subdomain,
    DocumentsFolder,
}

/// An A1-notation range such as `'All Current Violations'!A2:N` or `Master!L5`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct A1Range {
    pub tab: String,
    /// 1-based inclusive column bounds; `None` means open.
    pub start_col: Option<usize>,
    pub start_row: Option<usize>,
    pub end_col: Option<usize>,
    pub end_row: Option<usize>,
}

impl A1Range {
    /// Whole-tab range starting at `first_row` across columns A..=`last_col`.
    pub fn rows_from(tab: &str, first_row: usize, last_col: &str) -> Self {
        A1Range {
            tab: tab.to_string(),
            start_col: Some(1),
            start_row: Some(first_row),
            end_col: column_index(last_col),
            end_row: None,
        }
    }

    /// The whole tab.
    pub fn whole_tab(tab: &str) -> Self {
        A1Range {
            tab: tab.to_string(),
            start_col: None,
            start_row: None,
            end_col: None,
            end_row: None,
        }
    }

    /// A single column, every row.
    pub fn column(tab: &str, col: &str) -> Self {
        let idx = column_index(col);
        A1Range {
            tab: tab.to_string(),
            start_col: idx,
            start_row: None,
            end_col: idx,
            end_row: None,
        }
    }

    /// A single cell.
    pub fn cell(tab: &str, col: &str, row: usize) -> Self {
        let idx = column_index(col);
        A1Range {
            tab: tab.to_string(),
            start_col: idx,
            start_row: Some(row),
            end_col: idx,
            end_row: Some(row),
        }
    }

    /// Parse `Tab!A1:B2`, `'Tab name'!A:A`, `Tab!L5` or a bare tab name.
    pub fn parse(input: &str) -> Result<Self, String> {
        let (tab, refs) = split_tab(input)?;
        if refs.is_empty() {
            return Ok(A1Range::whole_tab(&tab));
        }

        let (start, end) = match refs.split_once(':') {
            Some((a, b)) => (a, b),
            None => (refs, refs),
        };
        let (start_col, start_row) = parse_cell_ref(start)?;
        let (end_col, end_row) = parse_cell_ref(end)?;
        Ok(A1Range {
            tab,
            start_col,
            start_row,
            end_col,
            end_row,
        })
    }

    fn tab_ref(&self) -> String {
        let plain = self
            .tab
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
        if plain {
            self.tab.clone()
        } else {
            format!("'{}'", self.tab.replace('\'', "''"))
        }
    }
}

impl fmt::Display for A1Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cell = |col: Option<usize>, row: Option<usize>| {
            format!(
                "{}{}",
                col.map(column_letter).unwrap_or_default(),
                row.map(|r| r.to_string()).unwrap_or_default()
            )
        };
        let start = cell(self.start_col, self.start_row);
        let end = cell(self.end_col, self.end_row);

        write!(f, "{}", self.tab_ref())?;
        if start.is_empty() && end.is_empty() {
            return Ok(());
        }
        if start == end && self.start_row.is_some() {
            write!(f, "!{}", start)
        } else {
            write!(f, "!{}:{}", start, end)
        }
    }
}

fn split_tab(input: &str) -> Result<(String, &str), String> {
    let input = input.trim();
    if let Some(rest) = input.strip_prefix('\'') {
        // Quoted tab: a doubled quote is a literal quote.
        let mut tab = String::new();
        let mut chars = rest.char_indices().peekable();
        while let Some((i, c)) = chars.next() {
            if c == '\'' {
                if matches!(chars.peek(), Some((_, '\''))) {
                    tab.push('\'');
                    chars.next();
                    continue;
                }
                let after = &rest[i + 1..];
                return match after.strip_prefix('!') {
                    Some(refs) => Ok((tab, refs)),
                    None if after.is_empty() => Ok((tab, "")),
                    None => Err(format!("invalid range '{}'", input)),
                };
            }
            tab.push(c);
        }
        return Err(format!("unterminated tab name in '{}'", input));
    }

    match input.split_once('!') {
        Some((tab, refs)) if !tab.is_empty() => Ok((tab.to_string(), refs)),
        Some(_) => Err(format!("missing tab name in '{}'", input)),
        None if !input.is_empty() => Ok((input.to_string(), "")),
        None => Err("empty range".to_string()),
    }
}

fn parse_cell_ref(cell: &str) -> Result<(Option<usize>, Option<usize>), String> {
    let caps = CELL_REF_REGEX
        .captures(cell)
        .ok_or_else(|| format!("invalid cell reference '{}'", cell))?;
    let col = caps.get(1).and_then(|m| column_index(m.as_str()));
    let row = match caps.get(2) {
        Some(m) => Some(
            m.as_str()
                .parse::<usize>()
                .map_err(|_| format!("invalid row in '{}'", cell))?,
        ),
        None => None,
    };
    if col.is_none() && row.is_none() {
        return Err(format!("invalid cell reference '{}'", cell));
    }
    Ok((col, row))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_letters_round_trip_at_boundaries() {
        assert_eq!(column_letter(1), "A");
        assert_eq!(column_letter(14), "N");
        assert_eq!(column_letter(52), "AZ");
        assert_eq!(column_letter(703), "AAA");
        assert_eq!(column_index("n"), Some(14));
        assert_eq!(column_index("AZ"), Some(52));
        assert_eq!(column_index("A1"), None);
        assert_eq!(column_index(""), None);
    }

    #[test]
    fn docs_needed_only_maps_on_active_tab() {
        assert_eq!(
            ViolationField::DocsNeeded.column(ViolationTab::Active),
            Some("N")
        );
        assert_eq!(ViolationField::DocsNeeded.column(ViolationTab::Resolved), None);
        assert_eq!(ViolationField::Status.column(ViolationTab::Resolved), Some("L"));
        assert_eq!(ViolationField::Notes.column(ViolationTab::Active), Some("M"));
    }

    #[test]
    fn field_parses_header_names() {
        assert_eq!("Next Steps".parse(), Ok(ViolationField::NextSteps));
        assert_eq!("action_taken".parse(), Ok(ViolationField::ActionTaken));
        assert_eq!("Docs-Needed".parse(), Ok(ViolationField::DocsNeeded));
        assert!("asin".parse::<ViolationField>().is_err());
    }

    #[test]
    fn ranges_format_with_quoting() {
        let r = A1Range::rows_from("All Current Violations", 2, "N");
        assert_eq!(r.to_string(), "'All Current Violations'!A2:N");
        assert_eq!(A1Range::cell("Master", "L", 5).to_string(), "Master!L5");
        assert_eq!(A1Range::column("Resolved", "A").to_string(), "Resolved!A:A");
    }

    #[test]
    fn ranges_parse() {
        let r = A1Range::parse("'Bob''s Tab'!A2:N").unwrap();
        assert_eq!(r.tab, "Bob's Tab");
        assert_eq!(r.start_col, Some(1));
        assert_eq!(r.start_row, Some(2));
        assert_eq!(r.end_col, Some(14));
        assert_eq!(r.end_row, None);

        let r = A1Range::parse("Master!L5").unwrap();
        assert_eq!((r.start_col, r.start_row), (Some(12), Some(5)));
        assert_eq!((r.end_col, r.end_row), (Some(12), Some(5)));

        let r = A1Range::parse("Master").unwrap();
        assert_eq!(r.start_col, None);

        assert!(A1Range::parse("!A1").is_err());
        assert!(A1Range::parse("Tab!1A").is_err());
    }
}
