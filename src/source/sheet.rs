use super::headers::{lead_from_row, lead_to_row, normalize_header};
use super::LeadSource;
use crate::db::Database;
use crate::errors::{AppError, AppResult};
use crate::models::{Lead, LeadField};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

/// Spreadsheet-backed lead source. Rows are stored with whatever headers the
/// sheet carried and normalized into canonical leads on every fetch.
#[derive(Debug, Clone)]
pub struct SheetSource {
    db: Arc<Database>,
}

impl SheetSource {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Loads raw sheet rows (header line plus data lines) as they appear in
    /// the spreadsheet. Rows without an id column value get a generated id.
    pub fn import_rows(&self, headers: &[String], rows: &[Vec<String>]) -> AppResult<usize> {
        let id_column = headers
            .iter()
            .position(|header| normalize_header(header) == Some(LeadField::Id));

        for row in rows {
            let values = headers
                .iter()
                .zip(row.iter())
                .filter(|(header, _)| !header.trim().is_empty())
                .map(|(header, value)| (header.clone(), value.clone()))
                .collect::<BTreeMap<_, _>>();
            let lead_id = id_column
                .and_then(|index| row.get(index))
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| Uuid::new_v4().to_string());
            self.db.insert_sheet_row(&lead_id, &values)?;
        }

        tracing::info!(rows = rows.len(), "imported raw sheet rows");
        Ok(rows.len())
    }
}

#[async_trait]
impl LeadSource for SheetSource {
    fn name(&self) -> &str {
        "sheet"
    }

    async fn fetch(&self) -> AppResult<Vec<Lead>> {
        let rows = self.db.list_sheet_rows()?;
        Ok(rows
            .into_iter()
            .map(|row| {
                let mut lead = lead_from_row(&row.values);
                lead.id = row.lead_id;
                lead
            })
            .collect())
    }

    async fn update(&self, lead: &Lead) -> AppResult<Lead> {
        if lead.id.trim().is_empty() {
            return Err(AppError::InvalidInput("lead id is required for update".to_string()));
        }
        self.db.update_sheet_row(&lead.id, &lead_to_row(lead))?;
        Ok(lead.clone())
    }

    async fn add(&self, lead: &Lead) -> AppResult<Lead> {
        let mut created = lead.clone();
        if created.id.trim().is_empty() {
            created.id = Uuid::new_v4().to_string();
        }
        self.db.insert_sheet_row(&created.id, &lead_to_row(&created))?;
        Ok(created)
    }

    async fn delete(&self, id: &str) -> AppResult<()> {
        self.db.delete_sheet_row(id)
    }
}
