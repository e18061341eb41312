pub mod commands;
pub mod config;
pub mod dates;
pub mod db;
pub mod errors;
pub mod filter;
pub mod import;
pub mod models;
pub mod pivot;
pub mod refresh;
pub mod sort;
pub mod source;
pub mod store;

use crate::config::DashboardConfig;
use crate::db::Database;
use crate::errors::{AppError, AppResult};
use crate::import::{import_csv, parse_csv, suggest_mapping, ColumnMapping};
use crate::models::{Lead, LeadField};
use crate::refresh::RefreshTimer;
use crate::source::sheet::SheetSource;
use crate::source::LeadSource;
use crate::store::LeadStore;
use anyhow::Context;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing_appender::non_blocking::WorkerGuard;

static LOG_GUARD: std::sync::OnceLock<WorkerGuard> = std::sync::OnceLock::new();

/// Everything a dashboard front end talks to, constructed once and shared.
#[derive(Clone)]
pub struct AppState {
    pub config: DashboardConfig,
    pub db: Arc<Database>,
    pub store: Arc<LeadStore>,
    pub refresher: RefreshTimer,
}

impl AppState {
    /// Opens the local database and serves leads from its sheet table.
    pub fn open(config: DashboardConfig) -> AppResult<Self> {
        let db = Arc::new(Database::new(&config.database_path())?);
        tracing::info!(path = %db.path().display(), "opened lead database");
        let source = Arc::new(SheetSource::new(db.clone()));
        Ok(Self::with_source(config, db, source))
    }

    pub fn with_source(config: DashboardConfig, db: Arc<Database>, source: Arc<dyn LeadSource>) -> Self {
        let store = Arc::new(LeadStore::from_config(source, &config));
        let refresher = RefreshTimer::new(store.clone(), config.refresh_interval());
        Self {
            config,
            db,
            store,
            refresher,
        }
    }

    /// Loads the first collection and starts polling. A failed first load is
    /// logged; the schedule retries it.
    pub async fn bootstrap(&self) {
        if let Err(error) = self.store.refresh().await {
            tracing::warn!(error = %error, "initial lead load failed");
        }
        self.refresher.start();
    }

    pub async fn shutdown(&self) {
        self.refresher.stop().await;
    }

    /// Imports CSV text through the source's bulk-add path. Without an explicit
    /// mapping, headers are matched against known field spellings and the
    /// remaining columns pass through as extra fields. A leftover header that
    /// spells a field key is a duplicate of a claimed field and is dropped.
    pub async fn import_csv(&self, text: &str, mapping: Option<ColumnMapping>) -> AppResult<usize> {
        let mapping = match mapping {
            Some(mapping) => mapping,
            None => {
                let headers = parse_csv(text)?.headers;
                let mut mapping = suggest_mapping(&headers);
                if mapping.is_empty() {
                    return Err(AppError::InvalidInput(
                        "no CSV column maps onto a lead field".to_string(),
                    ));
                }
                for header in headers {
                    if header.trim().is_empty() || LeadField::from_key(&header).is_some() {
                        continue;
                    }
                    mapping.entry(header.clone()).or_insert(header);
                }
                mapping
            }
        };
        let leads = import_csv(text, &mapping)?;
        self.store.add_many(leads).await
    }

    /// The current sorted view restricted to the visible columns.
    pub async fn export_visible_csv(&self) -> AppResult<String> {
        let settings = self.store.settings().await;
        import::export_csv(&self.store.sorted().await, &settings.visible_columns)
    }

    pub fn toggle_bookmark(&self, lead_id: &str) -> AppResult<bool> {
        self.db.toggle_bookmark(lead_id)
    }

    pub async fn bookmarked_leads(&self) -> AppResult<Vec<Lead>> {
        let bookmarks = self.db.bookmarks()?;
        Ok(self
            .store
            .leads()
            .await
            .into_iter()
            .filter(|lead| bookmarks.contains(&lead.id))
            .collect())
    }
}

/// Headless entry point: serves the sheet-backed store, polls it, and logs
/// notices until interrupted.
pub fn run() -> anyhow::Result<()> {
    let config = DashboardConfig::from_env().context("invalid dashboard configuration")?;
    init_tracing(&config.log_dir()).map_err(anyhow::Error::msg)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;

    runtime.block_on(async move {
        let state = AppState::open(config)?;

        if let Ok(path) = std::env::var("LEAD_DASHBOARD_IMPORT_CSV") {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read CSV import {path}"))?;
            let imported = state.import_csv(&text, None).await?;
            tracing::info!(path = %path, imported, "seeded leads from CSV");
        }

        state.bootstrap().await;
        let summary = state.store.summary().await;
        tracing::info!(
            leads = summary.total,
            converted = summary.converted,
            conversion_rate = summary.conversion_rate,
            "dashboard ready"
        );

        let mut notices = state.store.subscribe();
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                notice = notices.recv() => match notice {
                    Ok(notice) => tracing::info!(level = ?notice.level, message = %notice.message, "notice"),
                    Err(RecvError::Lagged(skipped)) => tracing::debug!(skipped, "notice stream lagged"),
                    Err(RecvError::Closed) => break,
                },
            }
        }

        state.shutdown().await;
        anyhow::Ok(())
    })
}

fn init_tracing(log_dir: &Path) -> Result<(), String> {
    std::fs::create_dir_all(log_dir).map_err(|error| error.to_string())?;
    let file_appender = tracing_appender::rolling::daily(log_dir, "dashboard.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let _ = LOG_GUARD.set(guard);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .json()
        .with_writer(non_blocking)
        .try_init()
        .map_err(|error| error.to_string())
}
