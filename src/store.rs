use crate::config::DashboardConfig;
use crate::errors::{AppError, AppResult};
use crate::filter::{distinct_values, filter_leads};
use crate::models::{
    DateRange, FilterCriteria, KanbanColumn, Lead, LeadField, LeadSummary, Notice, NoticeLevel, PageView,
    SortConfig, StoreSnapshot, ViewSettings,
};
use crate::pivot::{build_pivot, group_leads, PivotTable, MISSING_KEY};
use crate::sort::sort_leads;
use crate::source::LeadSource;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

const NOTICE_CAPACITY: usize = 64;

#[derive(Debug)]
struct StoreState {
    leads: Vec<Lead>,
    filters: FilterCriteria,
    sort: Option<SortConfig>,
    page: usize,
    page_size: usize,
    settings: ViewSettings,
    last_refreshed_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

impl StoreState {
    fn sorted(&self) -> Vec<Lead> {
        sort_leads(&filter_leads(&self.leads, &self.filters), self.sort.as_ref())
    }
}

/// Owns the canonical lead collection and the view state derived from it.
///
/// Mutations are written through to the source. Local changes are applied
/// optimistically and repaired by a full refetch when the source rejects them.
/// The state lock is never held across a source call.
pub struct LeadStore {
    source: Arc<dyn LeadSource>,
    state: RwLock<StoreState>,
    notices: broadcast::Sender<Notice>,
    converted_stage: String,
}

impl LeadStore {
    pub fn new(source: Arc<dyn LeadSource>, page_size: usize, converted_stage: impl Into<String>) -> Self {
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        Self {
            source,
            state: RwLock::new(StoreState {
                leads: Vec::new(),
                filters: FilterCriteria::default(),
                sort: None,
                page: 1,
                page_size: page_size.max(1),
                settings: ViewSettings::default(),
                last_refreshed_at: None,
                last_error: None,
            }),
            notices,
            converted_stage: converted_stage.into(),
        }
    }

    pub fn from_config(source: Arc<dyn LeadSource>, config: &DashboardConfig) -> Self {
        Self::new(source, config.page_size, config.converted_stage.clone())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.notices.subscribe()
    }

    fn notify(&self, level: NoticeLevel, message: String) {
        let _ = self.notices.send(Notice {
            level,
            message,
            timestamp: Utc::now(),
        });
    }

    /// Replaces the collection with the source's current state. On failure the
    /// previous collection stays available and the error is recorded.
    pub async fn refresh(&self) -> AppResult<usize> {
        match self.source.fetch().await {
            Ok(fetched) => {
                let leads = dedupe_by_id(fetched);
                let count = leads.len();
                let mut state = self.state.write().await;
                state.leads = leads;
                state.last_refreshed_at = Some(Utc::now());
                state.last_error = None;
                tracing::info!(source = self.source.name(), leads = count, "lead collection refreshed");
                Ok(count)
            }
            Err(error) => {
                tracing::warn!(source = self.source.name(), error = %error, "lead refresh failed; keeping previous collection");
                self.state.write().await.last_error = Some(error.to_string());
                self.notify(NoticeLevel::Error, format!("Failed to refresh leads: {error}"));
                Err(error)
            }
        }
    }

    /// Refetches after a rejected mutation, then records the mutation error.
    async fn reconcile(&self, operation: &str, error: AppError) -> AppError {
        tracing::warn!(operation, error = %error, "lead mutation failed; refetching to reconcile");
        if let Err(refresh_error) = self.refresh().await {
            tracing::error!(operation, error = %refresh_error, "reconciling refetch failed");
        }
        self.state.write().await.last_error = Some(error.to_string());
        self.notify(NoticeLevel::Error, format!("Failed to {operation} lead: {error}"));
        error
    }

    pub async fn update(&self, lead: Lead) -> AppResult<Lead> {
        let present = {
            let mut state = self.state.write().await;
            match state.leads.iter_mut().find(|existing| existing.id == lead.id) {
                Some(existing) => {
                    *existing = lead.clone();
                    true
                }
                None => false,
            }
        };
        if !present {
            let error = AppError::NotFound(format!("lead {} is not in the collection", lead.id));
            return Err(self.reconcile("update", error).await);
        }

        match self.source.update(&lead).await {
            Ok(confirmed) => {
                let mut state = self.state.write().await;
                if let Some(existing) = state.leads.iter_mut().find(|existing| existing.id == confirmed.id) {
                    *existing = confirmed.clone();
                }
                drop(state);
                tracing::info!(lead_id = %confirmed.id, "lead updated");
                self.notify(NoticeLevel::Success, "Lead updated".to_string());
                Ok(confirmed)
            }
            Err(error) => Err(self.reconcile("update", error).await),
        }
    }

    /// Persists a new lead and refetches; ids and ordering come from the source.
    /// Once the source accepts the lead the add succeeds, even if the refetch
    /// fails; that failure is recorded as the store's last error.
    pub async fn add(&self, lead: Lead) -> AppResult<Lead> {
        match self.source.add(&lead).await {
            Ok(created) => {
                tracing::info!(lead_id = %created.id, "lead added");
                if let Err(error) = self.refresh().await {
                    tracing::warn!(lead_id = %created.id, error = %error, "lead persisted but refetch failed");
                }
                self.notify(NoticeLevel::Success, "Lead added".to_string());
                Ok(created)
            }
            Err(error) => Err(self.reconcile("add", error).await),
        }
    }

    pub async fn add_many(&self, leads: Vec<Lead>) -> AppResult<usize> {
        if leads.is_empty() {
            return Ok(0);
        }
        match self.source.add_many(&leads).await {
            Ok(created) => {
                tracing::info!(count = created.len(), "leads imported");
                if let Err(error) = self.refresh().await {
                    tracing::warn!(count = created.len(), error = %error, "leads persisted but refetch failed");
                }
                self.notify(NoticeLevel::Success, format!("Imported {} leads", created.len()));
                Ok(created.len())
            }
            Err(error) => Err(self.reconcile("import", error).await),
        }
    }

    pub async fn delete(&self, id: &str) -> AppResult<()> {
        self.state.write().await.leads.retain(|lead| lead.id != id);

        match self.source.delete(id).await {
            Ok(()) => {
                tracing::info!(lead_id = %id, "lead deleted");
                self.notify(NoticeLevel::Success, "Lead deleted".to_string());
                Ok(())
            }
            Err(error) => Err(self.reconcile("delete", error).await),
        }
    }

    pub async fn leads(&self) -> Vec<Lead> {
        self.state.read().await.leads.clone()
    }

    pub async fn get(&self, id: &str) -> Option<Lead> {
        self.state
            .read()
            .await
            .leads
            .iter()
            .find(|lead| lead.id == id)
            .cloned()
    }

    pub async fn filters(&self) -> FilterCriteria {
        self.state.read().await.filters.clone()
    }

    pub async fn set_filters(&self, filters: FilterCriteria) {
        self.state.write().await.filters = filters;
    }

    pub async fn set_search(&self, search: impl Into<String>) {
        self.state.write().await.filters.search = search.into();
    }

    pub async fn toggle_filter(&self, field: LeadField, value: &str) -> bool {
        self.state.write().await.filters.toggle_selection(field, value)
    }

    pub async fn set_date_range(&self, range: DateRange) {
        self.state.write().await.filters.date_range = range;
    }

    pub async fn clear_filters(&self) {
        self.state.write().await.filters = FilterCriteria::default();
    }

    pub async fn sort_config(&self) -> Option<SortConfig> {
        self.state.read().await.sort
    }

    pub async fn set_sort(&self, sort: Option<SortConfig>) {
        self.state.write().await.sort = sort;
    }

    pub async fn toggle_sort(&self, field: LeadField) -> SortConfig {
        let mut state = self.state.write().await;
        let next = SortConfig::toggle(state.sort, field);
        state.sort = Some(next);
        next
    }

    /// Sets the 1-based page. The page is deliberately not clamped against the
    /// filtered size; see [`LeadStore::clamp_page`].
    pub async fn set_page(&self, page: usize) {
        self.state.write().await.page = page.max(1);
    }

    pub async fn set_page_size(&self, page_size: usize) {
        let mut state = self.state.write().await;
        state.page_size = page_size.max(1);
        state.page = 1;
    }

    /// Moves the page back onto the last non-empty page, if it ran past it.
    pub async fn clamp_page(&self) -> usize {
        let mut state = self.state.write().await;
        let total = filter_leads(&state.leads, &state.filters).len();
        let last_page = total.div_ceil(state.page_size).max(1);
        if state.page > last_page {
            state.page = last_page;
        }
        state.page
    }

    pub async fn settings(&self) -> ViewSettings {
        self.state.read().await.settings.clone()
    }

    /// Applies a JSON merge patch to the view settings.
    pub async fn update_settings(&self, update: serde_json::Value) -> AppResult<ViewSettings> {
        let mut state = self.state.write().await;
        let mut merged = serde_json::to_value(&state.settings)?;
        merge_json(&mut merged, update);
        let settings: ViewSettings = serde_json::from_value(merged)
            .map_err(|error| AppError::InvalidInput(format!("invalid view settings: {error}")))?;
        state.settings = settings.clone();
        Ok(settings)
    }

    pub async fn filtered(&self) -> Vec<Lead> {
        let state = self.state.read().await;
        filter_leads(&state.leads, &state.filters)
    }

    pub async fn sorted(&self) -> Vec<Lead> {
        self.state.read().await.sorted()
    }

    pub async fn page(&self) -> PageView {
        let state = self.state.read().await;
        let sorted = state.sorted();
        let total_items = sorted.len();
        let offset = (state.page - 1).saturating_mul(state.page_size);
        PageView {
            items: sorted.into_iter().skip(offset).take(state.page_size).collect(),
            page: state.page,
            page_size: state.page_size,
            total_items,
            total_pages: total_items.div_ceil(state.page_size),
        }
    }

    pub async fn summary(&self) -> LeadSummary {
        summarize(&self.filtered().await, &self.converted_stage)
    }

    pub async fn pivot(&self) -> PivotTable {
        let state = self.state.read().await;
        build_pivot(&filter_leads(&state.leads, &state.filters), &state.settings.pivot)
    }

    pub async fn kanban(&self) -> Vec<KanbanColumn> {
        let state = self.state.read().await;
        group_leads(&state.sorted(), state.settings.kanban_group_by)
    }

    /// Options for a multi-select filter, drawn from the whole collection so
    /// a selection never hides its own alternatives.
    pub async fn filter_options(&self, field: LeadField) -> Vec<String> {
        distinct_values(&self.state.read().await.leads, field)
    }

    pub async fn snapshot(&self) -> StoreSnapshot {
        let state = self.state.read().await;
        StoreSnapshot {
            lead_count: state.leads.len(),
            filtered_count: filter_leads(&state.leads, &state.filters).len(),
            page: state.page,
            page_size: state.page_size,
            last_refreshed_at: state.last_refreshed_at,
            last_error: state.last_error.clone(),
        }
    }
}

fn dedupe_by_id(leads: Vec<Lead>) -> Vec<Lead> {
    let mut seen = HashSet::new();
    let mut unique = Vec::with_capacity(leads.len());
    for lead in leads {
        if !lead.id.is_empty() && !seen.insert(lead.id.clone()) {
            tracing::warn!(lead_id = %lead.id, "dropping duplicate lead id from source");
            continue;
        }
        unique.push(lead);
    }
    unique
}

pub fn summarize(leads: &[Lead], converted_stage: &str) -> LeadSummary {
    let bucket = |value: &str| {
        let value = value.trim();
        if value.is_empty() {
            MISSING_KEY.to_string()
        } else {
            value.to_string()
        }
    };

    let mut by_status = BTreeMap::new();
    let mut by_source = BTreeMap::new();
    let mut by_associate = BTreeMap::new();
    let mut emails = HashSet::new();
    let mut converted = 0usize;

    for lead in leads {
        *by_status.entry(bucket(&lead.status)).or_insert(0) += 1;
        *by_source.entry(bucket(&lead.source)).or_insert(0) += 1;
        *by_associate.entry(bucket(&lead.associate)).or_insert(0) += 1;
        if lead.stage.trim().eq_ignore_ascii_case(converted_stage.trim()) {
            converted += 1;
        }
        let email = lead.email.trim().to_lowercase();
        if !email.is_empty() {
            emails.insert(email);
        }
    }

    let unique_emails = emails.len();
    LeadSummary {
        total: leads.len(),
        by_status,
        by_source,
        by_associate,
        converted,
        unique_emails,
        conversion_rate: if unique_emails == 0 {
            0.0
        } else {
            converted as f64 / unique_emails as f64
        },
    }
}

fn merge_json(target: &mut serde_json::Value, update: serde_json::Value) {
    match (target, update) {
        (serde_json::Value::Object(target_map), serde_json::Value::Object(update_map)) => {
            for (key, value) in update_map {
                merge_json(target_map.entry(key).or_insert(serde_json::Value::Null), value);
            }
        }
        (target, update) => {
            *target = update;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{summarize, LeadStore};
    use crate::errors::AppError;
    use crate::models::{
        AggregationMode, Lead, LeadField, NoticeLevel, PivotField, SortConfig, ViewMode,
    };
    use crate::source::memory::{MemorySource, SourceOp};
    use std::sync::Arc;

    fn seed() -> Vec<Lead> {
        vec![
            Lead::new("1")
                .with(LeadField::Name, "Ada")
                .with(LeadField::Email, "ada@example.com")
                .with(LeadField::Status, "Hot")
                .with(LeadField::Source, "Website")
                .with(LeadField::Stage, "Converted"),
            Lead::new("2")
                .with(LeadField::Name, "Grace")
                .with(LeadField::Email, "grace@example.com")
                .with(LeadField::Status, "Cold")
                .with(LeadField::Source, "Referral")
                .with(LeadField::Stage, "New"),
            Lead::new("3")
                .with(LeadField::Name, "Alan")
                .with(LeadField::Email, "ADA@example.com")
                .with(LeadField::Status, "Hot")
                .with(LeadField::Source, "Referral")
                .with(LeadField::Stage, "Contacted"),
        ]
    }

    async fn store_with(source: Arc<MemorySource>, page_size: usize) -> LeadStore {
        let store = LeadStore::new(source, page_size, "Converted");
        store.refresh().await.expect("initial refresh");
        store
    }

    #[tokio::test]
    async fn refresh_failure_keeps_previous_collection() {
        let source = Arc::new(MemorySource::new(seed()));
        let store = store_with(source.clone(), 10).await;
        let mut notices = store.subscribe();

        source.fail_next(SourceOp::Fetch);
        assert!(store.refresh().await.is_err());

        assert_eq!(store.leads().await.len(), 3);
        let snapshot = store.snapshot().await;
        assert!(snapshot.last_error.is_some());
        assert!(snapshot.last_refreshed_at.is_some());
        let notice = notices.recv().await.expect("notice");
        assert_eq!(notice.level, NoticeLevel::Error);

        store.refresh().await.expect("recovered refresh");
        assert!(store.snapshot().await.last_error.is_none());
    }

    #[tokio::test]
    async fn refresh_drops_duplicate_ids() {
        let mut leads = seed();
        leads.push(Lead::new("1").with(LeadField::Name, "Impostor"));
        let store = store_with(Arc::new(MemorySource::new(leads)), 10).await;
        let all = store.leads().await;
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].name, "Ada");
    }

    #[tokio::test]
    async fn update_applies_and_confirms() {
        let source = Arc::new(MemorySource::new(seed()));
        let store = store_with(source.clone(), 10).await;

        let mut lead = store.get("2").await.expect("lead 2");
        lead.stage = "Converted".to_string();
        store.update(lead.clone()).await.expect("update");

        assert_eq!(store.get("2").await, Some(lead.clone()));
        assert_eq!(source.snapshot()[1], lead);
    }

    #[tokio::test]
    async fn update_of_unknown_id_fails_and_refetches() {
        let source = Arc::new(MemorySource::new(seed()));
        let store = store_with(source.clone(), 10).await;
        let fetches_before = source.fetch_calls();

        let err = store
            .update(Lead::new("missing").with(LeadField::Name, "Nobody"))
            .await
            .expect_err("unknown id");
        assert!(matches!(err, AppError::NotFound(_)));
        assert_eq!(source.fetch_calls(), fetches_before + 1);
        assert_eq!(store.leads().await, source.snapshot());
        assert!(store.snapshot().await.last_error.is_some());
    }

    #[tokio::test]
    async fn rejected_update_is_rolled_back_by_refetch() {
        let source = Arc::new(MemorySource::new(seed()));
        let store = store_with(source.clone(), 10).await;

        source.fail_next(SourceOp::Update);
        let mut lead = store.get("1").await.expect("lead 1");
        lead.name = "Changed".to_string();
        assert!(store.update(lead).await.is_err());
        assert_eq!(store.get("1").await.expect("lead 1").name, "Ada");
    }

    #[tokio::test]
    async fn add_refetches_canonical_state() {
        let source = Arc::new(MemorySource::new(seed()));
        let store = store_with(source.clone(), 10).await;

        let created = store
            .add(Lead::default().with(LeadField::Name, "Barbara"))
            .await
            .expect("add");
        assert!(!created.id.is_empty());
        assert_eq!(store.leads().await.len(), 4);
        assert_eq!(store.get(&created.id).await.map(|lead| lead.name), Some("Barbara".to_string()));
    }

    #[tokio::test]
    async fn add_succeeds_when_only_the_refetch_fails() {
        let source = Arc::new(MemorySource::new(seed()));
        let store = store_with(source.clone(), 10).await;

        source.fail_next(SourceOp::Fetch);
        let created = store
            .add(Lead::default().with(LeadField::Name, "Barbara"))
            .await
            .expect("persisted add");
        assert_eq!(source.snapshot().len(), 4);
        assert_eq!(store.leads().await.len(), 3);
        assert!(store.snapshot().await.last_error.is_some());

        store.refresh().await.expect("later refresh");
        assert_eq!(store.get(&created.id).await.map(|lead| lead.name), Some("Barbara".to_string()));
    }

    #[tokio::test]
    async fn bulk_add_reports_persisted_count_despite_refetch_failure() {
        let source = Arc::new(MemorySource::new(seed()));
        let store = store_with(source.clone(), 10).await;

        source.fail_next(SourceOp::Fetch);
        let added = store
            .add_many(vec![Lead::new("9"), Lead::new("10")])
            .await
            .expect("persisted import");
        assert_eq!(added, 2);
        assert_eq!(source.snapshot().len(), 5);
    }

    #[tokio::test]
    async fn delete_is_optimistic_and_restored_on_failure() {
        let source = Arc::new(MemorySource::new(seed()));
        let store = store_with(source.clone(), 10).await;

        store.delete("2").await.expect("delete");
        assert!(store.get("2").await.is_none());
        assert_eq!(source.snapshot().len(), 2);

        source.fail_next(SourceOp::Delete);
        assert!(store.delete("3").await.is_err());
        assert!(store.get("3").await.is_some());
    }

    #[tokio::test]
    async fn derived_views_chain_filter_sort_and_page() {
        let store = store_with(Arc::new(MemorySource::new(seed())), 1).await;
        store.toggle_filter(LeadField::Status, "Hot").await;
        store.set_sort(Some(SortConfig::asc(LeadField::Name))).await;

        let filtered = store.filtered().await;
        assert_eq!(filtered.len(), 2);
        let sorted = store.sorted().await;
        assert_eq!(sorted[0].name, "Ada");
        assert_eq!(sorted[1].name, "Alan");

        store.set_page(2).await;
        let page = store.page().await;
        assert_eq!(page.total_items, 2);
        assert_eq!(page.total_pages, 2);
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].name, "Alan");
    }

    #[tokio::test]
    async fn page_is_not_clamped_until_asked() {
        let store = store_with(Arc::new(MemorySource::new(seed())), 1).await;
        store.set_page(3).await;
        store.set_search("grace").await;

        let page = store.page().await;
        assert_eq!(page.page, 3);
        assert!(page.items.is_empty());

        assert_eq!(store.clamp_page().await, 1);
        assert_eq!(store.page().await.items[0].name, "Grace");
    }

    #[tokio::test]
    async fn toggle_sort_cycles_direction() {
        let store = store_with(Arc::new(MemorySource::new(seed())), 10).await;
        store.toggle_sort(LeadField::Name).await;
        store.toggle_sort(LeadField::Name).await;
        let names = store
            .sorted()
            .await
            .into_iter()
            .map(|lead| lead.name)
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["Grace", "Alan", "Ada"]);
    }

    #[tokio::test]
    async fn settings_merge_patch_and_pivot_follow_settings() {
        let store = store_with(Arc::new(MemorySource::new(seed())), 10).await;
        let settings = store
            .update_settings(serde_json::json!({
                "viewMode": "pivot",
                "pivot": { "rows": { "field": "source" }, "aggregation": "unique-count" }
            }))
            .await
            .expect("settings");
        assert_eq!(settings.view_mode, ViewMode::Pivot);
        assert_eq!(settings.pivot.rows, PivotField::Field(LeadField::Source));
        assert_eq!(settings.pivot.aggregation, AggregationMode::UniqueCount);

        let pivot = store.pivot().await;
        assert_eq!(pivot.cell("Referral", "Referral"), Some(2.0));

        let err = store
            .update_settings(serde_json::json!({ "theme": "neon" }))
            .await
            .expect_err("bad theme");
        assert!(matches!(err, AppError::InvalidInput(_)));
        assert_eq!(store.settings().await, settings);
    }

    #[tokio::test]
    async fn kanban_and_filter_options_use_settings_and_collection() {
        let store = store_with(Arc::new(MemorySource::new(seed())), 10).await;
        store.toggle_filter(LeadField::Status, "Cold").await;
        let columns = store.kanban().await;
        assert_eq!(columns.len(), 1);
        assert_eq!(columns[0].key, "New");
        assert_eq!(
            store.filter_options(LeadField::Status).await,
            vec!["Cold".to_string(), "Hot".to_string()]
        );
    }

    #[test]
    fn summary_counts_and_conversion_rate() {
        let summary = summarize(&seed(), "converted");
        assert_eq!(summary.total, 3);
        assert_eq!(summary.by_status.get("Hot"), Some(&2));
        assert_eq!(summary.by_source.get("Referral"), Some(&2));
        assert_eq!(summary.by_associate.get("N/A"), Some(&3));
        assert_eq!(summary.converted, 1);
        assert_eq!(summary.unique_emails, 2);
        assert!((summary.conversion_rate - 0.5).abs() < f64::EPSILON);

        assert_eq!(summarize(&[], "Converted").conversion_rate, 0.0);
    }
}
