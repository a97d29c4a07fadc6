//! CSV artifacts.
//!
//! Builds the stock, history and account reports written at finalization
//! and reads staged import files. History reports group rows by
//! transaction: the first row of a transaction carries the shared columns,
//! later rows leave them blank. Imports reverse that rule.

use crate::application::worker::constants::DATA_PREVIEW_MAX_CHARS;
use crate::domain::inventory::CSV_DATE_FORMAT;
use crate::domain::schema::HISTORY_HEADERS;
use crate::domain::{Account, CsvSchema, HistoryEntry, Item};
use crate::error::{AppError, Result};
use std::collections::HashMap;
use std::path::Path;

/// History columns shared by every row of one transaction:
/// NIS, Nama Peminjam, Kelas, Mata Pelajaran, Tanggal Pinjam, Tanggal Kembali, Link Bukti
pub const HISTORY_SHARED_COLUMNS: [usize; 7] = [0, 1, 2, 3, 7, 8, 9];

/// One data record of an import file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvRecord {
    /// Line number in the file (header is line 1)
    pub row_number: usize,
    pub fields: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ParsedCsv {
    pub header: Vec<String>,
    pub records: Vec<CsvRecord>,
}

/// Parse CSV content into its header and non-blank data records
pub fn parse_csv(content: &[u8]) -> Result<ParsedCsv> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(content);
    let mut rows = reader.records();

    let header: Vec<String> = match rows.next() {
        Some(row) => row?.iter().map(str::to_string).collect(),
        None => return Err(AppError::Validation("CSV file is empty".to_string())),
    };

    let mut records = Vec::new();
    for row in rows {
        let row = row?;
        if row.iter().all(|field| field.trim().is_empty()) {
            continue;
        }
        let row_number = row
            .position()
            .map(|position| position.line() as usize)
            .unwrap_or(records.len() + 2);
        records.push(CsvRecord {
            row_number,
            fields: row.iter().map(str::to_string).collect(),
        });
    }

    Ok(ParsedCsv { header, records })
}

pub async fn read_csv(path: &Path) -> Result<ParsedCsv> {
    let content = tokio::fs::read(path).await?;
    parse_csv(&content)
}

/// Short preview of a record kept on its job
pub fn preview(fields: &[String]) -> String {
    let joined = fields
        .iter()
        .map(|field| field.trim())
        .filter(|field| !field.is_empty())
        .collect::<Vec<_>>()
        .join(" | ");
    if joined.chars().count() <= DATA_PREVIEW_MAX_CHARS {
        return joined;
    }
    let mut truncated: String = joined.chars().take(DATA_PREVIEW_MAX_CHARS - 1).collect();
    truncated.push('…');
    truncated
}

/// A history import record with its group's shared columns filled in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupedHistoryRow {
    /// Row number of the first row of the transaction group
    pub group_row: usize,
    pub fields: Vec<String>,
}

/// Resolve the history record at `row_number`, inheriting blank shared
/// columns from the first row of its group. A row with a non-blank NIS
/// starts a new group.
pub fn grouped_history_row(records: &[CsvRecord], row_number: usize) -> Option<GroupedHistoryRow> {
    let index = records.iter().position(|r| r.row_number == row_number)?;
    let start = records[..=index]
        .iter()
        .rposition(starts_history_group)
        .unwrap_or(0);
    let first = &records[start];

    let mut fields = records[index].fields.clone();
    if fields.len() < HISTORY_HEADERS.len() {
        fields.resize(HISTORY_HEADERS.len(), String::new());
    }
    for column in HISTORY_SHARED_COLUMNS {
        if fields[column].trim().is_empty() {
            if let Some(inherited) = first.fields.get(column) {
                fields[column] = inherited.clone();
            }
        }
    }

    Some(GroupedHistoryRow {
        group_row: first.row_number,
        fields,
    })
}

fn starts_history_group(record: &CsvRecord) -> bool {
    record
        .fields
        .first()
        .is_some_and(|nis| !nis.trim().is_empty())
}

/// Stock report rows. Uploaded drive links win over the stored image link.
pub fn stock_rows(items: &[Item], uploaded: &HashMap<i64, String>) -> Vec<Vec<String>> {
    items
        .iter()
        .map(|item| {
            let link = uploaded
                .get(&item.id)
                .cloned()
                .or_else(|| item.remote_image().map(str::to_string))
                .unwrap_or_default();
            vec![
                item.name.clone(),
                item.kind.clone(),
                item.quantity.to_string(),
                link,
            ]
        })
        .collect()
}

pub fn account_rows(accounts: &[Account]) -> Vec<Vec<String>> {
    accounts
        .iter()
        .map(|account| {
            vec![
                account.nis.clone(),
                account.password.clone(),
                account.name.clone(),
                account.class_name.clone(),
            ]
        })
        .collect()
}

/// History report rows. `proof_links` is keyed by local proof file name.
pub fn history_rows(
    history: &[HistoryEntry],
    proof_links: &HashMap<String, String>,
) -> Vec<Vec<String>> {
    let mut previous: Option<&str> = None;
    let mut rows = Vec::with_capacity(history.len());

    for entry in history {
        let first_of_group = previous != Some(entry.transaction_id.as_str());
        previous = Some(entry.transaction_id.as_str());

        let link = entry
            .local_proof()
            .and_then(|proof| proof_links.get(proof).cloned())
            .or_else(|| {
                entry
                    .proof_image
                    .as_deref()
                    .filter(|p| p.starts_with("http://") || p.starts_with("https://"))
                    .map(str::to_string)
            })
            .unwrap_or_default();

        let mut row = vec![
            entry.nis.clone(),
            entry.borrower_name.clone(),
            entry.class_name.clone(),
            entry.subject.clone(),
            entry.item_name.clone(),
            entry.item_kind.clone(),
            entry.quantity.to_string(),
            entry.borrowed_at.format(CSV_DATE_FORMAT).to_string(),
            entry
                .returned_at
                .map(|at| at.format(CSV_DATE_FORMAT).to_string())
                .unwrap_or_default(),
            link,
        ];
        if !first_of_group {
            for column in HISTORY_SHARED_COLUMNS {
                row[column].clear();
            }
        }
        rows.push(row);
    }
    rows
}

/// Write a report with the schema's header row
pub fn write_csv(path: &Path, schema: CsvSchema, rows: &[Vec<String>]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(schema.headers())?;
    for row in rows {
        writer.write_record(row)?;
    }
    writer.flush()?;
    Ok(())
}
