#![cfg(feature = "web")]

use crate::columns::ViolationTab;
use crate::models::Violation;
use std::error::Error;

const BASE_HEADERS: [&str; 13] = [
    "ID",
    "Imported At",
    "Reason",
    "Date",
    "ASIN",
    "Product Title",
    "At-Risk Sales",
    "Action Taken",
    "Impact",
    "Next Steps",
    "Options",
    "Status",
    "Notes",
];

/// Column headers for an export of `tab`
///
/// The active tab ends with the needed documents, the resolved tab with the
/// resolution date.
pub fn headers(tab: ViolationTab) -> Vec<&'static str> {
    let mut headers = BASE_HEADERS.to_vec();
    headers.push(match tab {
        ViolationTab::Active => "Docs Needed",
        ViolationTab::Resolved => "Resolved At",
    });
    headers
}

/// Cell text for every exported column, in header order.
fn cells(violation: &Violation, tab: ViolationTab) -> Vec<String> {
    let mut cells = vec![
        violation.id.clone(),
        violation
            .imported_at
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_default(),
        violation.reason.clone(),
        violation
            .date
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_default(),
        violation.asin.clone(),
        violation.product_title.clone(),
        format!("{:.2}", violation.at_risk_sales),
        violation.action_taken.clone(),
        violation.impact.to_string(),
        violation.next_steps.clone(),
        violation.options.clone(),
        violation.status.to_string(),
        violation.notes.clone(),
    ];
    cells.push(match tab {
        ViolationTab::Active => violation.docs_needed.join(", "),
        ViolationTab::Resolved => violation
            .resolved_at
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_default(),
    });
    cells
}

fn push_csv_field(out: &mut String, value: &str) {
    if value.contains(',') || value.contains('"') || value.contains('\n') || value.contains('\r') {
        let escaped = value.replace('"', "\"\"");
        out.push_str(&format!("\"{}\"", escaped));
    } else {
        out.push_str(value);
    }
}

/// Convert violations to CSV format
///
/// This function exports a violation listing to CSV (Comma-Separated Values) format:
/// - The first line holds the column headers for the tab
/// - Values are comma-separated, one violation per line
/// - Special characters (commas, quotes, newlines) are properly escaped
///
/// # Arguments
/// * `violations` - The records to export, in output order
/// * `tab` - Which tab the records come from (decides the last column)
///
/// # Returns
/// * `String` - CSV content
///
/// # Examples
/// ```
/// use violation_dashboard::columns::ViolationTab;
/// use violation_dashboard::downloader::to_csv;
///
/// let csv = to_csv(&[], ViolationTab::Resolved);
/// assert!(csv.ends_with("Resolved At\n"));
/// ```
pub fn to_csv(violations: &[Violation], tab: ViolationTab) -> String {
    let mut csv_content = String::new();

    for (i, header) in headers(tab).iter().enumerate() {
        if i > 0 {
            csv_content.push(',');
        }
        push_csv_field(&mut csv_content, header);
    }
    csv_content.push('\n');

    for violation in violations {
        for (i, value) in cells(violation, tab).iter().enumerate() {
            if i > 0 {
                csv_content.push(',');
            }
            push_csv_field(&mut csv_content, value);
        }
        csv_content.push('\n');
    }

    csv_content
}

/// Convert violations to XLSX format
///
/// This function exports a violation listing to XLSX (Excel) format using the
/// rust_xlsxwriter library.
/// Text columns are written as strings and the at-risk sales column as numbers, so the
/// sheet can be summed and sorted once opened.
///
/// # Arguments
/// * `violations` - The records to export, in output order
/// * `tab` - Which tab the records come from (decides the last column and sheet name)
///
/// # Returns
/// * `Result<Vec<u8>, Box<dyn Error>>` - XLSX file content as bytes or an error
pub fn to_xlsx(violations: &[Violation], tab: ViolationTab) -> Result<Vec<u8>, Box<dyn Error>> {
    use rust_xlsxwriter::{Format, Workbook};

    let mut workbook = Workbook::new();
    let bold = Format::new().set_bold();
    let money = Format::new().set_num_format("$#,##0.00");

    let worksheet = workbook.add_worksheet();
    worksheet.set_name(match tab {
        ViolationTab::Active => "Active Violations",
        ViolationTab::Resolved => "Resolved Violations",
    })?;

    for (c, header) in headers(tab).iter().enumerate() {
        worksheet.write_string_with_format(0, c as u16, *header, &bold)?;
    }

    for (r, violation) in violations.iter().enumerate() {
        let row = (r + 1) as u32;
        for (c, value) in cells(violation, tab).iter().enumerate() {
            if c == 6 {
                worksheet.write_number_with_format(row, c as u16, violation.at_risk_sales, &money)?;
            } else {
                worksheet.write_string(row, c as u16, value.as_str())?;
            }
        }
    }

    let buffer = workbook.save_to_buffer()?;

    Ok(buffer)
}

/// (index into the exported cells, character width) for each PDF column.
/// Import time, action taken, next steps, options and notes are left to the
/// CSV and XLSX exports.
const PDF_COLUMNS: [(usize, usize); 9] = [
    (0, 10),
    (3, 10),
    (2, 22),
    (4, 12),
    (5, 28),
    (6, 11),
    (8, 9),
    (11, 18),
    (13, 20),
];
const PDF_ROWS_PER_PAGE: usize = 40;
const PDF_PAGE_WIDTH: i64 = 792;
const PDF_PAGE_HEIGHT: i64 = 612;

/// Pad or cut `value` to `width` characters of printable ASCII.
fn pdf_cell(value: &str, width: usize) -> String {
    let text: String = value
        .chars()
        .map(|c| match c {
            ' '..='~' => c,
            '\n' | '\r' | '\t' => ' ',
            _ => '?',
        })
        .take(width)
        .collect();
    format!("{:<width$}", text, width = width)
}

fn pdf_line<S: AsRef<str>>(cells: &[S]) -> String {
    PDF_COLUMNS
        .iter()
        .map(|&(index, width)| {
            let value: &str = cells.get(index).map_or("", |c| c.as_ref());
            pdf_cell(value, width)
        })
        .collect::<Vec<_>>()
        .join(" ")
        .trim_end()
        .to_string()
}

/// Convert violations to PDF format
///
/// Produces a landscape Letter document with a fixed-width table in Courier.
/// Every page repeats the title and column headers; an empty listing still
/// yields one page with the headers.
///
/// # Arguments
/// * `violations` - The records to export, in output order
/// * `tab` - Which tab the records come from (decides the title and last column)
///
/// # Returns
/// * `Result<Vec<u8>, Box<dyn Error>>` - PDF file content as bytes or an error
pub fn to_pdf(violations: &[Violation], tab: ViolationTab) -> Result<Vec<u8>, Box<dyn Error>> {
    use lopdf::content::{Content, Operation};
    use lopdf::{Dictionary, Document, Object, Stream, StringFormat};

    let text = |line: String| {
        Operation::new(
            "Tj",
            vec![Object::String(line.into_bytes(), StringFormat::Literal)],
        )
    };

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let font = |base: &str| {
        Dictionary::from_iter(vec![
            ("Type", Object::Name(b"Font".to_vec())),
            ("Subtype", Object::Name(b"Type1".to_vec())),
            ("BaseFont", Object::Name(base.as_bytes().to_vec())),
        ])
    };
    let regular_id = doc.add_object(font("Courier"));
    let bold_id = doc.add_object(font("Courier-Bold"));
    let fonts = Dictionary::from_iter(vec![
        ("F1", Object::Reference(regular_id)),
        ("F2", Object::Reference(bold_id)),
    ]);
    let resources_id = doc.add_object(Dictionary::from_iter(vec![(
        "Font",
        Object::Dictionary(fonts),
    )]));

    let header = pdf_line(&headers(tab));
    let rule = "-".repeat(header.len());
    let title = format!(
        "{} violations ({})",
        match tab {
            ViolationTab::Active => "Active",
            ViolationTab::Resolved => "Resolved",
        },
        violations.len()
    );

    let rows: Vec<String> = violations
        .iter()
        .map(|v| pdf_line(&cells(v, tab)))
        .collect();
    let mut chunks: Vec<&[String]> = rows.chunks(PDF_ROWS_PER_PAGE).collect();
    if chunks.is_empty() {
        chunks.push(&[]);
    }
    let page_count = chunks.len();

    let mut page_ids = Vec::with_capacity(page_count);
    for (page, chunk) in chunks.into_iter().enumerate() {
        let mut operations = vec![
            Operation::new("BT", vec![]),
            Operation::new("TL", vec![Object::Integer(11)]),
            Operation::new("Td", vec![Object::Integer(36), Object::Integer(572)]),
            Operation::new("Tf", vec![Object::Name(b"F2".to_vec()), Object::Integer(11)]),
            text(format!("{}  page {} of {}", title, page + 1, page_count)),
            Operation::new("T*", vec![]),
            Operation::new("T*", vec![]),
            Operation::new("Tf", vec![Object::Name(b"F2".to_vec()), Object::Integer(8)]),
            text(header.clone()),
            Operation::new("T*", vec![]),
            Operation::new("Tf", vec![Object::Name(b"F1".to_vec()), Object::Integer(8)]),
            text(rule.clone()),
        ];
        for row in chunk {
            operations.push(Operation::new("T*", vec![]));
            operations.push(text(row.clone()));
        }
        operations.push(Operation::new("ET", vec![]));

        let content = Content { operations };
        let content_id = doc.add_object(Stream::new(Dictionary::new(), content.encode()?));
        page_ids.push(doc.add_object(Dictionary::from_iter(vec![
            ("Type", Object::Name(b"Page".to_vec())),
            ("Parent", Object::Reference(pages_id)),
            ("Contents", Object::Reference(content_id)),
        ])));
    }

    let pages = Dictionary::from_iter(vec![
        ("Type", Object::Name(b"Pages".to_vec())),
        ("Count", Object::Integer(page_count as i64)),
        (
            "Kids",
            Object::Array(page_ids.iter().map(|id| Object::Reference(*id)).collect()),
        ),
        ("Resources", Object::Reference(resources_id)),
        (
            "MediaBox",
            Object::Array(vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Integer(PDF_PAGE_WIDTH),
                Object::Integer(PDF_PAGE_HEIGHT),
            ]),
        ),
    ]);
    doc.objects.insert(pages_id, Object::Dictionary(pages));

    let catalog_id = doc.add_object(Dictionary::from_iter(vec![
        ("Type", Object::Name(b"Catalog".to_vec())),
        ("Pages", Object::Reference(pages_id)),
    ]));
    doc.trailer.set("Root", Object::Reference(catalog_id));

    let mut buffer = Vec::new();
    doc.save_to(&mut buffer)?;

    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn violation(id: &str, notes: &str) -> Violation {
        let row: Vec<String> = [
            id,
            "2026-03-01 09:30:00",
            "Listing, policy",
            "2026-03-01",
            "B0X",
            "Mug",
            "$12.5",
            "",
            "High",
            "",
            "",
            "Working",
            notes,
            "Invoice, LOA",
        ]
        .iter()
            .map(|s| s.to_string())
            .collect();
        Violation::from_row(&row, ViolationTab::Active).unwrap()
    }

    #[test]
    fn csv_escapes_and_orders_columns() {
        let csv = to_csv(&[violation("V1", "said \"no\"\nthen yes")], ViolationTab::Active);
        let mut lines = csv.splitn(2, '\n');
        let header = lines.next().unwrap();
        assert!(header.starts_with("ID,Imported At,Reason"));
        assert!(header.ends_with("Docs Needed"));

        let body = lines.next().unwrap();
        assert!(body
            .starts_with("V1,2026-03-01 09:30,\"Listing, policy\",2026-03-01,B0X,Mug,12.50,"));
        assert!(body.contains("\"said \"\"no\"\"\nthen yes\""));
        assert!(body.ends_with("\"Invoice, LOA\"\n"));
    }

    #[test]
    fn pdf_lines_are_fixed_width_ascii() {
        assert_eq!(pdf_cell("Caf\u{e9} (mug)", 12), "Caf? (mug)  ");
        assert_eq!(pdf_cell("a\nb", 3), "a b");
        assert_eq!(pdf_cell("truncated", 4), "trun");

        let header = pdf_line(&headers(ViolationTab::Resolved));
        assert!(header.starts_with("ID         Date       Reason"));
        assert!(header.ends_with("Resolved At"));
    }

    #[test]
    fn pdf_paginates_listing() {
        let bytes = to_pdf(&[violation("V1", "")], ViolationTab::Active).unwrap();
        assert!(bytes.starts_with(b"%PDF-1.5"));
        assert!(bytes.windows(4).any(|w| w == b"(V1 "));
        let doc = lopdf::Document::load_mem(&bytes).unwrap();
        assert_eq!(doc.get_pages().len(), 1);

        let many: Vec<Violation> = (0..(PDF_ROWS_PER_PAGE + 1))
            .map(|i| violation(&format!("V{}", i), ""))
            .collect();
        let bytes = to_pdf(&many, ViolationTab::Active).unwrap();
        let doc = lopdf::Document::load_mem(&bytes).unwrap();
        assert_eq!(doc.get_pages().len(), 2);

        let bytes = to_pdf(&[], ViolationTab::Resolved).unwrap();
        let empty = lopdf::Document::load_mem(&bytes).unwrap();
        assert_eq!(empty.get_pages().len(), 1);
    }

    #[test]
    fn xlsx_is_a_zip_archive() {
        let bytes = to_xlsx(&[violation("V1", "")], ViolationTab::Active).unwrap();
        assert!(bytes.len() > 100);
        assert_eq!(&bytes[..2], b"PK");
    }
}
