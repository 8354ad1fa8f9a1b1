use crate::application::bootstrap::bootstrap_workspace;
use crate::application::declarations::{
    BlockInput, DateWindow, ScheduleDeclarationService, TemplateGroups, TemplateInput,
};
use crate::application::learning::derive_learned_templates;
use crate::application::sync_apply::{ApplyReport, SyncApplyEngine};
use crate::application::sync_preview::{PrefillEntry, SyncPreview, SyncPreviewEngine};
use crate::domain::matcher::format_time_of_day;
use crate::domain::models::{
    AnswerWrite, BlockSource, ParticipantEvent, ScheduleBlock, ScheduleTemplate, SyncDiff,
    SyncSummary,
};
use crate::infrastructure::answer_store::{EventAnswerStore, SqliteEventAnswerStore};
use crate::infrastructure::config::AppSettings;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::schedule_repository::{
    BlockDraft, ScheduleRepository, SqliteScheduleRepository,
};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

pub struct AppState {
    settings: AppSettings,
    schedule_repository: Arc<dyn ScheduleRepository>,
    answer_store: Arc<dyn EventAnswerStore>,
}

impl AppState {
    pub fn new(workspace_root: PathBuf) -> Result<Self, InfraError> {
        let bootstrap = bootstrap_workspace(&workspace_root)?;
        let schedule_repository = Arc::new(SqliteScheduleRepository::new(&bootstrap.database_path));
        let answer_store = Arc::new(SqliteEventAnswerStore::new(&bootstrap.database_path));

        Ok(Self {
            settings: bootstrap.settings,
            schedule_repository,
            answer_store,
        })
    }

    /// Boots the workspace but routes reads and writes through the given stores.
    pub fn with_stores(
        workspace_root: PathBuf,
        schedule_repository: Arc<dyn ScheduleRepository>,
        answer_store: Arc<dyn EventAnswerStore>,
    ) -> Result<Self, InfraError> {
        let bootstrap = bootstrap_workspace(&workspace_root)?;
        Ok(Self {
            settings: bootstrap.settings,
            schedule_repository,
            answer_store,
        })
    }

    /// Logs the full error and returns the text the caller may show.
    pub fn command_error(&self, command: &str, error: &InfraError) -> String {
        if error.is_data_source_failure() {
            error!(command, error = %error, "command failed");
        } else {
            warn!(command, error = %error, "command rejected");
        }
        error.public_message()
    }

    fn declarations(&self) -> ScheduleDeclarationService<dyn ScheduleRepository> {
        ScheduleDeclarationService::new(Arc::clone(&self.schedule_repository))
    }

    fn preview_engine(&self) -> SyncPreviewEngine<dyn EventAnswerStore, dyn ScheduleRepository> {
        SyncPreviewEngine::new(
            Arc::clone(&self.answer_store),
            Arc::clone(&self.schedule_repository),
        )
        .with_learned_templates(self.settings.prediction.use_learned)
    }

    fn apply_engine(&self) -> SyncApplyEngine<dyn EventAnswerStore, dyn ScheduleRepository> {
        SyncApplyEngine::new(
            Arc::clone(&self.answer_store),
            Arc::clone(&self.schedule_repository),
        )
        .with_learned_templates(self.settings.prediction.use_learned)
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MutationResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl MutationResponse {
    pub fn ok() -> Self {
        Self {
            success: true,
            message: None,
        }
    }

    pub fn failed(message: String) -> Self {
        Self {
            success: false,
            message: Some(message),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SyncPreviewResponse {
    pub success: bool,
    pub diffs: Vec<SyncDiff>,
    pub summary: SyncSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ApplySyncResponse {
    pub success: bool,
    pub updated_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileOverridesResponse {
    pub success: bool,
    pub protected_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ImportEventBlocksResponse {
    pub success: bool,
    pub imported_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LearnTemplatesResponse {
    pub success: bool,
    pub learned_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

pub fn list_schedule_templates_impl(
    state: &AppState,
    user_id: Option<String>,
) -> Result<TemplateGroups, InfraError> {
    let user_id = require_user(user_id)?;
    state.declarations().list_templates(&user_id)
}

pub fn upsert_manual_template_impl(
    state: &AppState,
    user_id: Option<String>,
    input: TemplateInput,
) -> Result<ScheduleTemplate, InfraError> {
    let user_id = require_user(user_id)?;
    let template = state.declarations().upsert_manual_template(&user_id, &input)?;
    info!(
        command = "upsert_manual_template",
        user_id = %user_id,
        template_id = %template.id,
        weekday = template.weekday,
        start = %format_time_of_day(template.start_minute),
        end = %format_time_of_day(template.end_minute),
        "saved manual template"
    );
    Ok(template)
}

pub fn remove_template_impl(
    state: &AppState,
    user_id: Option<String>,
    template_id: String,
) -> Result<bool, InfraError> {
    let user_id = require_user(user_id)?;
    let removed = state.declarations().remove_template(&user_id, &template_id)?;
    info!(command = "remove_template", user_id = %user_id, removed, "template removal handled");
    Ok(removed)
}

pub fn list_schedule_blocks_impl(
    state: &AppState,
    user_id: Option<String>,
    window: Option<DateWindow>,
) -> Result<Vec<ScheduleBlock>, InfraError> {
    let user_id = require_user(user_id)?;
    state.declarations().list_blocks(&user_id, window.as_ref())
}

pub fn upsert_schedule_block_impl(
    state: &AppState,
    user_id: Option<String>,
    input: BlockInput,
) -> Result<ScheduleBlock, InfraError> {
    let user_id = require_user(user_id)?;
    let block = state.declarations().upsert_block(&user_id, &input)?;
    info!(
        command = "upsert_schedule_block",
        user_id = %user_id,
        block_id = %block.id,
        source = block.source.as_str(),
        "saved schedule block"
    );
    Ok(block)
}

pub fn remove_schedule_block_impl(
    state: &AppState,
    user_id: Option<String>,
    block_id: String,
) -> Result<bool, InfraError> {
    let user_id = require_user(user_id)?;
    let removed = state.declarations().remove_block(&user_id, &block_id)?;
    info!(command = "remove_schedule_block", user_id = %user_id, removed, "block removal handled");
    Ok(removed)
}

pub async fn preview_sync_impl(
    state: &AppState,
    user_id: Option<String>,
    exclude_event_id: Option<String>,
) -> Result<SyncPreview, InfraError> {
    let user_id = require_user(user_id)?;
    let exclude_event_id = exclude_event_id
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty());
    state.preview_engine().preview(&user_id, exclude_event_id).await
}

pub async fn apply_sync_impl(
    state: &AppState,
    user_id: Option<String>,
    event_id: String,
) -> Result<ApplyReport, InfraError> {
    let user_id = require_user(user_id)?;
    let event_id = required_text(&event_id, "eventId")?;
    let report = state.apply_engine().apply(&user_id, event_id).await?;
    info!(
        command = "apply_sync",
        user_id = %user_id,
        event_id = %report.event_id,
        updated_count = report.updated_count,
        "applied sync"
    );
    Ok(report)
}

/// Replaces the protected set of one event. Ids that are not dates of the
/// event are dropped.
pub async fn save_overrides_impl(
    state: &AppState,
    user_id: Option<String>,
    event_id: String,
    protected_date_ids: Vec<String>,
) -> Result<usize, InfraError> {
    let user_id = require_user(user_id)?;
    let event_id = required_text(&event_id, "eventId")?;
    let event = load_event(state, &user_id, event_id).await?;
    let protected = keep_event_dates(&event, protected_date_ids);
    let stored = state
        .answer_store
        .replace_overrides(&user_id, &event.id, &protected)
        .await?;
    info!(
        command = "save_overrides",
        user_id = %user_id,
        event_id = %event.id,
        protected_count = stored,
        "saved overrides"
    );
    Ok(stored)
}

pub async fn prefill_answers_impl(
    state: &AppState,
    user_id: Option<String>,
    event_id: String,
) -> Result<Vec<PrefillEntry>, InfraError> {
    let user_id = require_user(user_id)?;
    let event_id = required_text(&event_id, "eventId")?;
    state.preview_engine().prefill(&user_id, event_id).await
}

/// Protects every submitted date whose answer contradicts the prediction.
pub async fn reconcile_overrides_impl(
    state: &AppState,
    user_id: Option<String>,
    event_id: String,
    submitted: Vec<AnswerWrite>,
) -> Result<usize, InfraError> {
    let user_id = require_user(user_id)?;
    let event_id = required_text(&event_id, "eventId")?;
    let conflicts = state
        .preview_engine()
        .conflicting_dates(&user_id, event_id, &submitted)
        .await?;
    let stored = state
        .answer_store
        .replace_overrides(&user_id, event_id, &conflicts)
        .await?;
    info!(
        command = "reconcile_overrides",
        user_id = %user_id,
        event_id = %event_id,
        protected_count = stored,
        "reconciled overrides"
    );
    Ok(stored)
}

/// Copies every answered date of an event into an `event`-sourced block.
pub async fn import_event_blocks_impl(
    state: &AppState,
    user_id: Option<String>,
    event_id: String,
) -> Result<usize, InfraError> {
    let user_id = require_user(user_id)?;
    let event_id = required_text(&event_id, "eventId")?;
    let event = load_event(state, &user_id, event_id).await?;
    if event.answers.is_empty() {
        return Err(InfraError::NotFound(event.id));
    }

    let drafts = event
        .dates
        .iter()
        .filter(|date| date.end_at > date.start_at)
        .filter_map(|date| {
            event.answers.get(&date.id).map(|&available| BlockDraft {
                start_at: date.start_at,
                end_at: date.end_at,
                available,
                source: BlockSource::Event,
                event_id: Some(event.id.clone()),
            })
        })
        .collect::<Vec<_>>();
    let imported = state.declarations().upsert_block_drafts(&user_id, &drafts)?.len();

    info!(
        command = "import_event_blocks",
        user_id = %user_id,
        event_id = %event.id,
        imported_count = imported,
        "imported event blocks"
    );
    Ok(imported)
}

pub async fn learn_templates_impl(
    state: &AppState,
    user_id: Option<String>,
) -> Result<usize, InfraError> {
    let user_id = require_user(user_id)?;
    let learning = &state.settings.learning;
    if !learning.enabled {
        info!(command = "learn_templates", user_id = %user_id, "learning disabled");
        return Ok(0);
    }

    let history = state.answer_store.list_answered_events(&user_id).await?;
    let drafts = derive_learned_templates(&history, learning);
    let learned = state
        .declarations()
        .replace_learned_templates(&user_id, &drafts)?;
    info!(
        command = "learn_templates",
        user_id = %user_id,
        events = history.len(),
        learned_count = learned.len(),
        "rebuilt learned templates"
    );
    Ok(learned.len())
}

fn require_user(user_id: Option<String>) -> Result<String, InfraError> {
    user_id
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .ok_or(InfraError::NotAuthenticated)
}

fn required_text<'a>(value: &'a str, field_name: &str) -> Result<&'a str, InfraError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(InfraError::Validation(format!("{field_name} must not be empty")));
    }
    Ok(value)
}

async fn load_event(
    state: &AppState,
    user_id: &str,
    event_id: &str,
) -> Result<ParticipantEvent, InfraError> {
    state
        .answer_store
        .load_event(user_id, event_id)
        .await?
        .ok_or_else(|| InfraError::NotFound(event_id.to_string()))
}

fn keep_event_dates(event: &ParticipantEvent, date_ids: Vec<String>) -> Vec<String> {
    let known = event
        .dates
        .iter()
        .map(|date| date.id.as_str())
        .collect::<BTreeSet<_>>();
    date_ids
        .into_iter()
        .map(|date_id| date_id.trim().to_string())
        .filter(|date_id| known.contains(date_id.as_str()))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}
