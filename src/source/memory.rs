use super::LeadSource;
use crate::errors::{AppError, AppResult};
use crate::models::Lead;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceOp {
    Fetch,
    Update,
    Add,
    Delete,
}

/// Process-local lead collection. Useful for demos and for exercising the
/// store's failure paths through [`MemorySource::fail_next`].
#[derive(Debug, Default)]
pub struct MemorySource {
    leads: Mutex<Vec<Lead>>,
    failures: Mutex<HashSet<SourceOp>>,
    fetch_calls: AtomicUsize,
}

impl MemorySource {
    pub fn new(leads: Vec<Lead>) -> Self {
        Self {
            leads: Mutex::new(leads),
            ..Self::default()
        }
    }

    /// Makes the next call of `op` fail once.
    pub fn fail_next(&self, op: SourceOp) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.insert(op);
        }
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> Vec<Lead> {
        self.leads.lock().map(|leads| leads.clone()).unwrap_or_default()
    }

    fn check(&self, op: SourceOp) -> AppResult<()> {
        let mut failures = self
            .failures
            .lock()
            .map_err(|_| AppError::Internal("memory source mutex poisoned".to_string()))?;
        if failures.remove(&op) {
            return Err(AppError::Source(format!("{:?} rejected by memory source", op)));
        }
        Ok(())
    }

    fn with_leads<T>(&self, f: impl FnOnce(&mut Vec<Lead>) -> AppResult<T>) -> AppResult<T> {
        let mut leads = self
            .leads
            .lock()
            .map_err(|_| AppError::Internal("memory source mutex poisoned".to_string()))?;
        f(&mut leads)
    }
}

#[async_trait]
impl LeadSource for MemorySource {
    fn name(&self) -> &str {
        "memory"
    }

    async fn fetch(&self) -> AppResult<Vec<Lead>> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.check(SourceOp::Fetch)?;
        self.with_leads(|leads| Ok(leads.clone()))
    }

    async fn update(&self, lead: &Lead) -> AppResult<Lead> {
        self.check(SourceOp::Update)?;
        self.with_leads(|leads| {
            let Some(existing) = leads.iter_mut().find(|existing| existing.id == lead.id) else {
                return Err(AppError::NotFound(format!("lead {} does not exist", lead.id)));
            };
            *existing = lead.clone();
            Ok(lead.clone())
        })
    }

    async fn add(&self, lead: &Lead) -> AppResult<Lead> {
        self.check(SourceOp::Add)?;
        self.with_leads(|leads| {
            let mut created = lead.clone();
            if created.id.trim().is_empty() {
                created.id = Uuid::new_v4().to_string();
            }
            if leads.iter().any(|existing| existing.id == created.id) {
                return Err(AppError::InvalidInput(format!("lead {} already exists", created.id)));
            }
            leads.push(created.clone());
            Ok(created)
        })
    }

    async fn delete(&self, id: &str) -> AppResult<()> {
        self.check(SourceOp::Delete)?;
        self.with_leads(|leads| {
            let before = leads.len();
            leads.retain(|lead| lead.id != id);
            if leads.len() == before {
                return Err(AppError::NotFound(format!("lead {} does not exist", id)));
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{MemorySource, SourceOp};
    use crate::errors::AppError;
    use crate::models::{Lead, LeadField};
    use crate::source::LeadSource;

    #[tokio::test]
    async fn add_assigns_ids_and_rejects_duplicates() {
        let source = MemorySource::default();
        let created = source
            .add(&Lead::default().with(LeadField::Name, "Ada"))
            .await
            .expect("add");
        assert!(!created.id.is_empty());

        let err = source.add(&created).await.expect_err("duplicate id");
        assert!(matches!(err, AppError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn injected_failure_applies_once() {
        let source = MemorySource::new(vec![Lead::new("1")]);
        source.fail_next(SourceOp::Fetch);
        assert!(source.fetch().await.is_err());
        assert_eq!(source.fetch().await.expect("second fetch").len(), 1);
        assert_eq!(source.fetch_calls(), 2);
    }

    #[tokio::test]
    async fn update_and_delete_require_existing_ids() {
        let source = MemorySource::new(vec![Lead::new("1")]);
        assert!(matches!(
            source.update(&Lead::new("nope")).await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(source.delete("nope").await, Err(AppError::NotFound(_))));
        source.delete("1").await.expect("delete");
        assert!(source.snapshot().is_empty());
    }
}
