// Inventory Domain Model
//
// Read-side rows the storage layer hands to exports, and write-side rows
// parsed from import CSVs.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use super::error::{DomainError, Result};

/// Image name the catalogue uses when an item has no photo
pub const PLACEHOLDER_IMAGE: &str = "default.png";

/// Format used for dates written to CSV artifacts
pub const CSV_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: i64,
    pub name: String,
    pub kind: String,
    pub quantity: i64,
    pub image: Option<String>,
}

impl Item {
    /// Local image file name, when the item has a photo worth uploading
    pub fn local_image(&self) -> Option<&str> {
        self.image
            .as_deref()
            .map(str::trim)
            .filter(|img| !img.is_empty() && *img != PLACEHOLDER_IMAGE && !is_url(img))
    }

    /// Image link that is already absolute and is exported as-is
    pub fn remote_image(&self) -> Option<&str> {
        self.image.as_deref().map(str::trim).filter(|img| is_url(img))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub transaction_id: String,
    pub nis: String,
    pub borrower_name: String,
    pub class_name: String,
    pub subject: String,
    pub item_name: String,
    pub item_kind: String,
    pub quantity: i64,
    pub borrowed_at: NaiveDateTime,
    pub returned_at: Option<NaiveDateTime>,
    pub proof_image: Option<String>,
}

impl HistoryEntry {
    /// Local proof photo file name, if any
    pub fn local_proof(&self) -> Option<&str> {
        self.proof_image
            .as_deref()
            .map(str::trim)
            .filter(|img| !img.is_empty() && !is_url(img))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub nis: String,
    pub password: String,
    pub name: String,
    pub class_name: String,
}

/// `Nama Barang, Jenis Barang, Jumlah, Link Gambar`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockImportRow {
    pub name: String,
    pub kind: String,
    pub quantity: i64,
    pub image_link: Option<String>,
}

impl StockImportRow {
    pub fn parse(row: usize, fields: &[String]) -> Result<Self> {
        let cells = Cells { row, fields };
        Ok(Self {
            name: cells.required(0, "Nama Barang")?,
            kind: cells.required(1, "Jenis Barang")?,
            quantity: cells.quantity(2, "Jumlah")?,
            image_link: cells.optional(3),
        })
    }
}

/// `NIS, Nama Peminjam, Kelas, Mata Pelajaran, Nama Barang, Jenis Alat,
/// Jumlah, Tanggal Pinjam, Tanggal Kembali, Link Bukti Google Drive`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryImportRow {
    pub transaction_id: String,
    pub nis: String,
    pub borrower_name: String,
    pub class_name: String,
    pub subject: String,
    pub item_name: String,
    pub item_kind: String,
    pub quantity: i64,
    pub borrowed_at: NaiveDateTime,
    pub returned_at: Option<NaiveDateTime>,
    pub proof_link: Option<String>,
}

impl HistoryImportRow {
    /// `fields` must already carry the shared columns inherited from the
    /// first row of its transaction group.
    pub fn parse(row: usize, transaction_id: String, fields: &[String]) -> Result<Self> {
        let cells = Cells { row, fields };
        Ok(Self {
            transaction_id,
            nis: cells.required(0, "NIS")?,
            borrower_name: cells.required(1, "Nama Peminjam")?,
            class_name: cells.optional(2).unwrap_or_default(),
            subject: cells.optional(3).unwrap_or_default(),
            item_name: cells.required(4, "Nama Barang")?,
            item_kind: cells.required(5, "Jenis Alat")?,
            quantity: cells.quantity(6, "Jumlah")?,
            borrowed_at: cells.date(7, "Tanggal Pinjam")?.ok_or_else(|| {
                DomainError::InvalidRow {
                    row,
                    message: "Tanggal Pinjam is required".to_string(),
                }
            })?,
            returned_at: cells.date(8, "Tanggal Kembali")?,
            proof_link: cells.optional(9),
        })
    }
}

/// `NIS, Password, Nama, Kelas`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountImportRow {
    pub nis: String,
    pub password: String,
    pub name: String,
    pub class_name: String,
}

impl AccountImportRow {
    pub fn parse(row: usize, fields: &[String]) -> Result<Self> {
        let cells = Cells { row, fields };
        Ok(Self {
            nis: cells.required(0, "NIS")?,
            password: cells.required(1, "Password")?,
            name: cells.required(2, "Nama")?,
            class_name: cells.required(3, "Kelas")?,
        })
    }
}

/// Parse `YYYY-MM-DD[ HH:MM[:SS]]`
pub fn parse_csv_date(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M"))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
}

fn is_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

struct Cells<'a> {
    row: usize,
    fields: &'a [String],
}

impl Cells<'_> {
    fn optional(&self, index: usize) -> Option<String> {
        self.fields
            .get(index)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    }

    fn required(&self, index: usize, column: &str) -> Result<String> {
        self.optional(index).ok_or_else(|| self.invalid(format!("{} is required", column)))
    }

    fn quantity(&self, index: usize, column: &str) -> Result<i64> {
        let raw = self.required(index, column)?;
        match raw.parse::<i64>() {
            Ok(quantity) if quantity > 0 => Ok(quantity),
            _ => Err(self.invalid(format!(
                "{} must be a positive whole number, got '{}'",
                column, raw
            ))),
        }
    }

    fn date(&self, index: usize, column: &str) -> Result<Option<NaiveDateTime>> {
        match self.optional(index) {
            None => Ok(None),
            Some(raw) => parse_csv_date(&raw).map(Some).ok_or_else(|| {
                self.invalid(format!(
                    "{} must look like YYYY-MM-DD HH:MM:SS, got '{}'",
                    column, raw
                ))
            }),
        }
    }

    fn invalid(&self, message: String) -> DomainError {
        DomainError::InvalidRow {
            row: self.row,
            message,
        }
    }
}
