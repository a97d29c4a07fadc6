// CSV Schemas
//
// Column order is significant: exports write these headers verbatim and
// imports detect the schema from the first record.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::queue::ImportType;

pub const STOCK_HEADERS: [&str; 4] = ["Nama Barang", "Jenis Barang", "Jumlah", "Link Gambar"];

pub const HISTORY_HEADERS: [&str; 10] = [
    "NIS",
    "Nama Peminjam",
    "Kelas",
    "Mata Pelajaran",
    "Nama Barang",
    "Jenis Alat",
    "Jumlah",
    "Tanggal Pinjam",
    "Tanggal Kembali",
    "Link Bukti Google Drive",
];

pub const ACCOUNT_HEADERS: [&str; 4] = ["NIS", "Password", "Nama", "Kelas"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CsvSchema {
    Stock,
    History,
    Accounts,
}

impl CsvSchema {
    pub const ALL: [CsvSchema; 3] = [CsvSchema::Stock, CsvSchema::History, CsvSchema::Accounts];

    pub fn headers(&self) -> &'static [&'static str] {
        match self {
            CsvSchema::Stock => &STOCK_HEADERS,
            CsvSchema::History => &HISTORY_HEADERS,
            CsvSchema::Accounts => &ACCOUNT_HEADERS,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CsvSchema::Stock => "stock",
            CsvSchema::History => "history",
            CsvSchema::Accounts => "accounts",
        }
    }

    /// Detect which schema a header record belongs to.
    ///
    /// Cells are compared after trimming whitespace, stripping a UTF-8 BOM and
    /// lowercasing. Trailing empty cells (spreadsheet exports often add them)
    /// are ignored.
    pub fn detect<S: AsRef<str>>(header: &[S]) -> Option<CsvSchema> {
        let mut cells: Vec<String> = header.iter().map(|c| normalize(c.as_ref())).collect();
        while cells.last().is_some_and(|c| c.is_empty()) {
            cells.pop();
        }

        Self::ALL.into_iter().find(|schema| {
            let expected = schema.headers();
            expected.len() == cells.len()
                && expected
                    .iter()
                    .zip(cells.iter())
                    .all(|(want, got)| normalize(want) == *got)
        })
    }
}

impl From<ImportType> for CsvSchema {
    fn from(import_type: ImportType) -> Self {
        match import_type {
            ImportType::Stock => CsvSchema::Stock,
            ImportType::History => CsvSchema::History,
            ImportType::Accounts => CsvSchema::Accounts,
        }
    }
}

impl fmt::Display for CsvSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn normalize(cell: &str) -> String {
    cell.trim_start_matches('\u{feff}').trim().to_lowercase()
}
