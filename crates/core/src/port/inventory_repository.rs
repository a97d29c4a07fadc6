// Inventory Repository Port (storage layer)

use crate::domain::{
    Account, AccountImportRow, HistoryEntry, HistoryImportRow, Item, StockImportRow,
};
use crate::error::Result;
use async_trait::async_trait;

/// How an imported row landed in storage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportEffect {
    Inserted,
    /// Quantity added to an existing item
    Merged { new_quantity: i64 },
}

#[async_trait]
pub trait InventoryRepository: Send + Sync {
    /// All items, ordered by id
    async fn list_items(&self) -> Result<Vec<Item>>;

    /// Borrowing history, ordered by borrow date then transaction
    async fn list_history(&self) -> Result<Vec<HistoryEntry>>;

    /// Student accounts, ordered by class then name
    async fn list_accounts(&self) -> Result<Vec<Account>>;

    /// Insert an item or add to the quantity of the same name+kind.
    /// Runs in a transaction that holds the write lock before the quantity is read.
    async fn import_stock_row(&self, row: &StockImportRow) -> Result<ImportEffect>;

    async fn import_history_row(&self, row: &HistoryImportRow) -> Result<ImportEffect>;

    /// Rejects an NIS that already exists (`AppError::Conflict`)
    async fn import_account_row(&self, row: &AccountImportRow) -> Result<ImportEffect>;
}

pub mod mocks {
    use super::*;
    use crate::error::AppError;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Tables {
        items: Vec<Item>,
        history: Vec<HistoryEntry>,
        accounts: Vec<Account>,
    }

    /// In-memory InventoryRepository for testing
    #[derive(Clone, Default)]
    pub struct InMemoryInventory {
        tables: Arc<Mutex<Tables>>,
    }

    impl InMemoryInventory {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn add_item(&self, name: &str, kind: &str, quantity: i64, image: Option<&str>) -> i64 {
            let mut tables = self.tables.lock().unwrap();
            let id = tables.items.len() as i64 + 1;
            tables.items.push(Item {
                id,
                name: name.to_string(),
                kind: kind.to_string(),
                quantity,
                image: image.map(str::to_string),
            });
            id
        }

        pub fn add_history(&self, entry: HistoryEntry) {
            self.tables.lock().unwrap().history.push(entry);
        }

        pub fn add_account(&self, account: Account) {
            self.tables.lock().unwrap().accounts.push(account);
        }

        pub fn items(&self) -> Vec<Item> {
            self.tables.lock().unwrap().items.clone()
        }

        pub fn history(&self) -> Vec<HistoryEntry> {
            self.tables.lock().unwrap().history.clone()
        }

        pub fn accounts(&self) -> Vec<Account> {
            self.tables.lock().unwrap().accounts.clone()
        }
    }

    #[async_trait]
    impl InventoryRepository for InMemoryInventory {
        async fn list_items(&self) -> Result<Vec<Item>> {
            Ok(self.items())
        }

        async fn list_history(&self) -> Result<Vec<HistoryEntry>> {
            Ok(self.history())
        }

        async fn list_accounts(&self) -> Result<Vec<Account>> {
            Ok(self.accounts())
        }

        async fn import_stock_row(&self, row: &StockImportRow) -> Result<ImportEffect> {
            let mut tables = self.tables.lock().unwrap();
            if let Some(item) = tables.items.iter_mut().find(|item| {
                item.name.eq_ignore_ascii_case(&row.name) && item.kind.eq_ignore_ascii_case(&row.kind)
            }) {
                item.quantity += row.quantity;
                return Ok(ImportEffect::Merged {
                    new_quantity: item.quantity,
                });
            }
            let id = tables.items.len() as i64 + 1;
            tables.items.push(Item {
                id,
                name: row.name.clone(),
                kind: row.kind.clone(),
                quantity: row.quantity,
                image: row.image_link.clone(),
            });
            Ok(ImportEffect::Inserted)
        }

        async fn import_history_row(&self, row: &HistoryImportRow) -> Result<ImportEffect> {
            self.tables.lock().unwrap().history.push(HistoryEntry {
                transaction_id: row.transaction_id.clone(),
                nis: row.nis.clone(),
                borrower_name: row.borrower_name.clone(),
                class_name: row.class_name.clone(),
                subject: row.subject.clone(),
                item_name: row.item_name.clone(),
                item_kind: row.item_kind.clone(),
                quantity: row.quantity,
                borrowed_at: row.borrowed_at,
                returned_at: row.returned_at,
                proof_image: row.proof_link.clone(),
            });
            Ok(ImportEffect::Inserted)
        }

        async fn import_account_row(&self, row: &AccountImportRow) -> Result<ImportEffect> {
            let mut tables = self.tables.lock().unwrap();
            if tables.accounts.iter().any(|account| account.nis == row.nis) {
                return Err(AppError::Conflict(format!("NIS {} already exists", row.nis)));
            }
            tables.accounts.push(Account {
                nis: row.nis.clone(),
                password: row.password.clone(),
                name: row.name.clone(),
                class_name: row.class_name.clone(),
            });
            Ok(ImportEffect::Inserted)
        }
    }
}
