pub mod headers;
pub mod memory;
pub mod sheet;

use crate::errors::AppResult;
use crate::models::Lead;
use async_trait::async_trait;

/// Remote collection the store mirrors. Implementations own id assignment and
/// header normalization; the store never rewrites what they return.
#[async_trait]
pub trait LeadSource: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch(&self) -> AppResult<Vec<Lead>>;

    async fn update(&self, lead: &Lead) -> AppResult<Lead>;

    async fn add(&self, lead: &Lead) -> AppResult<Lead>;

    async fn add_many(&self, leads: &[Lead]) -> AppResult<Vec<Lead>> {
        let mut added = Vec::with_capacity(leads.len());
        for lead in leads {
            added.push(self.add(lead).await?);
        }
        Ok(added)
    }

    async fn delete(&self, id: &str) -> AppResult<()>;
}
