// SQLite InventoryRepository Implementation

use crate::error::map_sqlx_error;
use async_trait::async_trait;
use chrono::NaiveDateTime;
use sarpras_core::domain::{
    Account, AccountImportRow, HistoryEntry, HistoryImportRow, Item, StockImportRow,
};
use sarpras_core::error::{AppError, Result};
use sarpras_core::port::{ImportEffect, InventoryRepository};
use sqlx::SqlitePool;
use tracing::debug;

pub struct SqliteInventoryRepository {
    pool: SqlitePool,
}

impl SqliteInventoryRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl InventoryRepository for SqliteInventoryRepository {
    async fn list_items(&self) -> Result<Vec<Item>> {
        let rows: Vec<ItemRow> =
            sqlx::query_as("SELECT id, name, kind, quantity, image FROM items ORDER BY id ASC")
                .fetch_all(&self.pool)
                .await
                .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(ItemRow::into_item).collect())
    }

    async fn list_history(&self) -> Result<Vec<HistoryEntry>> {
        let rows: Vec<HistoryRow> = sqlx::query_as(
            r#"
            SELECT transaction_id, nis, borrower_name, class_name, subject,
                   item_name, item_kind, quantity, borrowed_at, returned_at, proof_image
            FROM history
            ORDER BY borrowed_at ASC, transaction_id ASC, id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(HistoryRow::into_entry).collect())
    }

    async fn list_accounts(&self) -> Result<Vec<Account>> {
        let rows: Vec<AccountRow> = sqlx::query_as(
            r#"
            SELECT u.nis, u.password, u.name, c.name AS class_name
            FROM users u
            JOIN classes c ON c.id = u.class_id
            ORDER BY c.name ASC, u.name ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(AccountRow::into_account).collect())
    }

    async fn import_stock_row(&self, row: &StockImportRow) -> Result<ImportEffect> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        // The UPDATE is the first statement so the write lock is held before
        // the quantity is read
        let merged: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE items
            SET quantity = quantity + ?
            WHERE name = ? AND kind = ?
            RETURNING quantity
            "#,
        )
        .bind(row.quantity)
        .bind(&row.name)
        .bind(&row.kind)
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        let effect = match merged {
            Some(new_quantity) => ImportEffect::Merged { new_quantity },
            None => {
                sqlx::query("INSERT INTO items (name, kind, quantity, image) VALUES (?, ?, ?, ?)")
                    .bind(&row.name)
                    .bind(&row.kind)
                    .bind(row.quantity)
                    .bind(&row.image_link)
                    .execute(&mut *tx)
                    .await
                    .map_err(map_sqlx_error)?;
                ImportEffect::Inserted
            }
        };

        tx.commit().await.map_err(map_sqlx_error)?;
        debug!(name = %row.name, kind = %row.kind, effect = ?effect, "Stock row imported");
        Ok(effect)
    }

    async fn import_history_row(&self, row: &HistoryImportRow) -> Result<ImportEffect> {
        sqlx::query(
            r#"
            INSERT INTO history (
                transaction_id, nis, borrower_name, class_name, subject,
                item_name, item_kind, quantity, borrowed_at, returned_at, proof_image
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&row.transaction_id)
        .bind(&row.nis)
        .bind(&row.borrower_name)
        .bind(&row.class_name)
        .bind(&row.subject)
        .bind(&row.item_name)
        .bind(&row.item_kind)
        .bind(row.quantity)
        .bind(row.borrowed_at)
        .bind(row.returned_at)
        .bind(&row.proof_link)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(ImportEffect::Inserted)
    }

    async fn import_account_row(&self, row: &AccountImportRow) -> Result<ImportEffect> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        sqlx::query("INSERT OR IGNORE INTO classes (name) VALUES (?)")
            .bind(&row.class_name)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        let existing: Option<String> = sqlx::query_scalar("SELECT nis FROM users WHERE nis = ?")
            .bind(&row.nis)
            .fetch_optional(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        if existing.is_some() {
            return Err(AppError::Conflict(format!(
                "Account with NIS {} already exists",
                row.nis
            )));
        }

        sqlx::query(
            r#"
            INSERT INTO users (nis, password, name, class_id)
            SELECT ?, ?, ?, id FROM classes WHERE name = ?
            "#,
        )
        .bind(&row.nis)
        .bind(&row.password)
        .bind(&row.name)
        .bind(&row.class_name)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(ImportEffect::Inserted)
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ItemRow {
    id: i64,
    name: String,
    kind: String,
    quantity: i64,
    image: Option<String>,
}

impl ItemRow {
    fn into_item(self) -> Item {
        Item {
            id: self.id,
            name: self.name,
            kind: self.kind,
            quantity: self.quantity,
            image: self.image,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct HistoryRow {
    transaction_id: String,
    nis: String,
    borrower_name: String,
    class_name: String,
    subject: String,
    item_name: String,
    item_kind: String,
    quantity: i64,
    borrowed_at: NaiveDateTime,
    returned_at: Option<NaiveDateTime>,
    proof_image: Option<String>,
}

impl HistoryRow {
    fn into_entry(self) -> HistoryEntry {
        HistoryEntry {
            transaction_id: self.transaction_id,
            nis: self.nis,
            borrower_name: self.borrower_name,
            class_name: self.class_name,
            subject: self.subject,
            item_name: self.item_name,
            item_kind: self.item_kind,
            quantity: self.quantity,
            borrowed_at: self.borrowed_at,
            returned_at: self.returned_at,
            proof_image: self.proof_image,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct AccountRow {
    nis: String,
    password: String,
    name: String,
    class_name: String,
}

impl AccountRow {
    fn into_account(self) -> Account {
        Account {
            nis: self.nis,
            password: self.password,
            name: self.name,
            class_name: self.class_name,
        }
    }
}
