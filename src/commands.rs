//! View-facing operations. Errors are flattened to display strings at this
//! boundary; the store has already recorded them and emitted a notice.

use crate::import::ColumnMapping;
use crate::models::{
    FilterCriteria, KanbanColumn, Lead, LeadField, LeadSummary, PageView, SortConfig, StoreSnapshot,
    ViewSettings,
};
use crate::pivot::PivotTable;
use crate::refresh::TriggerOutcome;
use crate::AppState;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    pub started: bool,
    pub lead_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookmarkResponse {
    pub lead_id: String,
    pub bookmarked: bool,
}

pub async fn refresh_leads(state: &AppState) -> Result<RefreshResponse, String> {
    match state.refresher.trigger().await {
        TriggerOutcome::Skipped => Ok(RefreshResponse {
            started: false,
            lead_count: state.store.snapshot().await.lead_count,
        }),
        TriggerOutcome::Completed(result) => result
            .map(|lead_count| RefreshResponse {
                started: true,
                lead_count,
            })
            .map_err(to_client_error),
    }
}

pub async fn list_leads(state: &AppState) -> Result<PageView, String> {
    Ok(state.store.page().await)
}

pub async fn get_status(state: &AppState) -> Result<StoreSnapshot, String> {
    Ok(state.store.snapshot().await)
}

pub async fn set_filters(state: &AppState, filters: FilterCriteria) -> Result<PageView, String> {
    state.store.set_filters(filters).await;
    Ok(state.store.page().await)
}

pub async fn toggle_filter_value(state: &AppState, field: LeadField, value: String) -> Result<FilterCriteria, String> {
    state.store.toggle_filter(field, &value).await;
    Ok(state.store.filters().await)
}

pub async fn filter_options(state: &AppState) -> Result<Vec<(LeadField, Vec<String>)>, String> {
    let mut options = Vec::with_capacity(LeadField::CATEGORICAL.len());
    for field in LeadField::CATEGORICAL {
        options.push((field, state.store.filter_options(field).await));
    }
    Ok(options)
}

pub async fn toggle_sort(state: &AppState, field: LeadField) -> Result<SortConfig, String> {
    Ok(state.store.toggle_sort(field).await)
}

pub async fn go_to_page(state: &AppState, page: usize) -> Result<PageView, String> {
    state.store.set_page(page).await;
    Ok(state.store.page().await)
}

pub async fn get_summary(state: &AppState) -> Result<LeadSummary, String> {
    Ok(state.store.summary().await)
}

pub async fn get_pivot(state: &AppState) -> Result<PivotTable, String> {
    Ok(state.store.pivot().await)
}

pub async fn get_kanban(state: &AppState) -> Result<Vec<KanbanColumn>, String> {
    Ok(state.store.kanban().await)
}

pub async fn update_view_settings(state: &AppState, update: serde_json::Value) -> Result<ViewSettings, String> {
    state.store.update_settings(update).await.map_err(to_client_error)
}

pub async fn update_lead(state: &AppState, lead: Lead) -> Result<Lead, String> {
    state.store.update(lead).await.map_err(to_client_error)
}

pub async fn add_lead(state: &AppState, lead: Lead) -> Result<Lead, String> {
    state.store.add(lead).await.map_err(to_client_error)
}

pub async fn delete_lead(state: &AppState, lead_id: String) -> Result<(), String> {
    state.store.delete(&lead_id).await.map_err(to_client_error)
}

pub async fn import_leads(state: &AppState, csv: String, mapping: Option<ColumnMapping>) -> Result<usize, String> {
    state.import_csv(&csv, mapping).await.map_err(to_client_error)
}

pub async fn export_leads(state: &AppState) -> Result<String, String> {
    state.export_visible_csv().await.map_err(to_client_error)
}

pub fn toggle_bookmark(state: &AppState, lead_id: String) -> Result<BookmarkResponse, String> {
    let bookmarked = state.toggle_bookmark(&lead_id).map_err(to_client_error)?;
    Ok(BookmarkResponse { lead_id, bookmarked })
}

pub async fn list_bookmarked_leads(state: &AppState) -> Result<Vec<Lead>, String> {
    state.bookmarked_leads().await.map_err(to_client_error)
}

fn to_client_error(error: impl std::fmt::Display) -> String {
    error.to_string()
}
