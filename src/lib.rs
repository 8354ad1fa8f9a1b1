pub mod application;
pub mod domain;
pub mod infrastructure;

use application::bootstrap::bootstrap_workspace;
use application::commands::{
    apply_sync_impl, import_event_blocks_impl, learn_templates_impl, list_schedule_blocks_impl,
    list_schedule_templates_impl, prefill_answers_impl, preview_sync_impl,
    reconcile_overrides_impl, remove_schedule_block_impl, remove_template_impl,
    save_overrides_impl, upsert_manual_template_impl, upsert_schedule_block_impl,
};
use domain::models::{AnswerWrite, BlockSource, ScheduleBlock};
use serde::Serialize;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

pub use application::commands::{
    AppState, ApplySyncResponse, ImportEventBlocksResponse, LearnTemplatesResponse,
    MutationResponse, ReconcileOverridesResponse, SyncPreviewResponse,
};
pub use application::declarations::{BlockInput, DateWindow, TemplateGroups, TemplateInput};
pub use application::sync_preview::PrefillEntry;
pub use infrastructure::error::InfraError;

#[derive(Debug, Serialize)]
pub struct BootstrapResponse {
    pub workspace_root: String,
    pub database_path: String,
}

/// Installs a JSON `tracing` subscriber. `RUST_LOG` wins over `default_filter`.
/// Calling it again after a subscriber is set is a no-op.
pub fn init_logging(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().json().with_target(false))
        .try_init();
}

pub fn bootstrap(root: Option<String>) -> Result<BootstrapResponse, String> {
    let workspace_root = match root {
        Some(path) => PathBuf::from(path),
        None => std::env::current_dir().map_err(|error| error.to_string())?,
    };

    let result = bootstrap_workspace(&workspace_root).map_err(|error| error.to_string())?;
    Ok(BootstrapResponse {
        workspace_root: result.workspace_root.display().to_string(),
        database_path: result.database_path.display().to_string(),
    })
}

pub fn list_schedule_templates(
    state: &AppState,
    user_id: Option<String>,
) -> Result<TemplateGroups, String> {
    list_schedule_templates_impl(state, user_id)
        .map_err(|error| state.command_error("list_schedule_templates", &error))
}

pub fn upsert_manual_template(
    state: &AppState,
    user_id: Option<String>,
    weekday: u8,
    start_time: String,
    end_time: String,
    available: bool,
) -> MutationResponse {
    let input = TemplateInput {
        weekday,
        start_time,
        end_time,
        available,
    };
    match upsert_manual_template_impl(state, user_id, input) {
        Ok(_) => MutationResponse::ok(),
        Err(error) => {
            MutationResponse::failed(state.command_error("upsert_manual_template", &error))
        }
    }
}

pub fn remove_template(
    state: &AppState,
    user_id: Option<String>,
    template_id: String,
) -> MutationResponse {
    match remove_template_impl(state, user_id, template_id) {
        Ok(_) => MutationResponse::ok(),
        Err(error) => MutationResponse::failed(state.command_error("remove_template", &error)),
    }
}

pub fn list_schedule_blocks(
    state: &AppState,
    user_id: Option<String>,
    window: Option<DateWindow>,
) -> Result<Vec<ScheduleBlock>, String> {
    list_schedule_blocks_impl(state, user_id, window)
        .map_err(|error| state.command_error("list_schedule_blocks", &error))
}

pub fn upsert_schedule_block(
    state: &AppState,
    user_id: Option<String>,
    start_at: String,
    end_at: String,
    available: bool,
    source: Option<BlockSource>,
    event_id: Option<String>,
) -> MutationResponse {
    let input = BlockInput {
        start_at,
        end_at,
        available,
        source,
        event_id,
    };
    match upsert_schedule_block_impl(state, user_id, input) {
        Ok(_) => MutationResponse::ok(),
        Err(error) => {
            MutationResponse::failed(state.command_error("upsert_schedule_block", &error))
        }
    }
}

pub fn remove_schedule_block(
    state: &AppState,
    user_id: Option<String>,
    block_id: String,
) -> MutationResponse {
    match remove_schedule_block_impl(state, user_id, block_id) {
        Ok(_) => MutationResponse::ok(),
        Err(error) => {
            MutationResponse::failed(state.command_error("remove_schedule_block", &error))
        }
    }
}

/// A failed lookup comes back as `success: false` with no diffs, never as an
/// empty success.
pub async fn preview_sync(
    state: &AppState,
    user_id: Option<String>,
    exclude_event_id: Option<String>,
) -> SyncPreviewResponse {
    match preview_sync_impl(state, user_id, exclude_event_id).await {
        Ok(preview) => SyncPreviewResponse {
            success: true,
            diffs: preview.diffs,
            summary: preview.summary,
            message: None,
        },
        Err(error) => SyncPreviewResponse {
            success: false,
            diffs: Vec::new(),
            summary: Default::default(),
            message: Some(state.command_error("preview_sync", &error)),
        },
    }
}

pub async fn apply_sync(
    state: &AppState,
    user_id: Option<String>,
    event_id: String,
) -> ApplySyncResponse {
    match apply_sync_impl(state, user_id, event_id).await {
        Ok(report) => ApplySyncResponse {
            success: true,
            updated_count: report.updated_count,
            message: None,
        },
        Err(error) => ApplySyncResponse {
            success: false,
            updated_count: 0,
            message: Some(state.command_error("apply_sync", &error)),
        },
    }
}

pub async fn save_overrides(
    state: &AppState,
    user_id: Option<String>,
    event_id: String,
    protected_date_ids: Vec<String>,
) -> MutationResponse {
    match save_overrides_impl(state, user_id, event_id, protected_date_ids).await {
        Ok(_) => MutationResponse::ok(),
        Err(error) => MutationResponse::failed(state.command_error("save_overrides", &error)),
    }
}

pub async fn prefill_answers(
    state: &AppState,
    user_id: Option<String>,
    event_id: String,
) -> Result<Vec<PrefillEntry>, String> {
    prefill_answers_impl(state, user_id, event_id)
        .await
        .map_err(|error| state.command_error("prefill_answers", &error))
}

pub async fn reconcile_overrides(
    state: &AppState,
    user_id: Option<String>,
    event_id: String,
    submitted: Vec<AnswerWrite>,
) -> ReconcileOverridesResponse {
    match reconcile_overrides_impl(state, user_id, event_id, submitted).await {
        Ok(protected_count) => ReconcileOverridesResponse {
            success: true,
            protected_count,
            message: None,
        },
        Err(error) => ReconcileOverridesResponse {
            success: false,
            protected_count: 0,
            message: Some(state.command_error("reconcile_overrides", &error)),
        },
    }
}

pub async fn import_event_blocks(
    state: &AppState,
    user_id: Option<String>,
    event_id: String,
) -> ImportEventBlocksResponse {
    match import_event_blocks_impl(state, user_id, event_id).await {
        Ok(imported_count) => ImportEventBlocksResponse {
            success: true,
            imported_count,
            message: None,
        },
        Err(error) => ImportEventBlocksResponse {
            success: false,
            imported_count: 0,
            message: Some(state.command_error("import_event_blocks", &error)),
        },
    }
}

pub async fn learn_templates(state: &AppState, user_id: Option<String>) -> LearnTemplatesResponse {
    match learn_templates_impl(state, user_id).await {
        Ok(learned_count) => LearnTemplatesResponse {
            success: true,
            learned_count,
            message: None,
        },
        Err(error) => LearnTemplatesResponse {
            success: false,
            learned_count: 0,
            message: Some(state.command_error("learn_templates", &error)),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::matcher::parse_wall_clock;
    use crate::domain::models::{EventDate, ParticipantEvent};
    use crate::infrastructure::answer_store::{EventAnswerStore, InMemoryEventAnswerStore};
    use crate::infrastructure::schedule_repository::InMemoryScheduleRepository;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::Arc;
    use tempfile::TempDir;

    struct UnreachableAnswerStore;

    #[async_trait]
    impl EventAnswerStore for UnreachableAnswerStore {
        async fn list_answered_events(
            &self,
            _user_id: &str,
        ) -> Result<Vec<ParticipantEvent>, InfraError> {
            Err(InfraError::Join("store offline".to_string()))
        }

        async fn load_event(
            &self,
            _user_id: &str,
            _event_id: &str,
        ) -> Result<Option<ParticipantEvent>, InfraError> {
            Err(InfraError::Join("store offline".to_string()))
        }

        async fn list_overrides(
            &self,
            _user_id: &str,
            _event_id: &str,
        ) -> Result<HashSet<String>, InfraError> {
            Err(InfraError::Join("store offline".to_string()))
        }

        async fn replace_overrides(
            &self,
            _user_id: &str,
            _event_id: &str,
            _event_date_ids: &[String],
        ) -> Result<usize, InfraError> {
            Err(InfraError::Join("store offline".to_string()))
        }

        async fn write_answers(
            &self,
            _user_id: &str,
            _event_id: &str,
            _writes: &[AnswerWrite],
        ) -> Result<usize, InfraError> {
            Err(InfraError::Join("store offline".to_string()))
        }
    }

    fn state_with(dir: &TempDir, answers: Arc<dyn EventAnswerStore>) -> AppState {
        AppState::with_stores(
            dir.path().to_path_buf(),
            Arc::new(InMemoryScheduleRepository::default()),
            answers,
        )
        .expect("state")
    }

    #[test]
    fn logging_can_be_initialized_twice() {
        init_logging("info");
        init_logging("debug");
    }

    #[test]
    fn invalid_block_reports_message_without_writing() {
        let dir = TempDir::new().expect("temp dir");
        let state = state_with(&dir, Arc::new(InMemoryEventAnswerStore::default()));
        let response = upsert_schedule_block(
            &state,
            Some("user-1".to_string()),
            "2026-02-16T23:00".to_string(),
            "2026-02-16T22:00".to_string(),
            false,
            None,
            None,
        );
        assert!(!response.success);
        assert!(response.message.is_some());
        assert!(list_schedule_blocks(&state, Some("user-1".to_string()), None)
            .expect("blocks")
            .is_empty());
    }

    #[test]
    fn signed_out_callers_are_asked_to_sign_in() {
        let dir = TempDir::new().expect("temp dir");
        let state = state_with(&dir, Arc::new(InMemoryEventAnswerStore::default()));
        let response = upsert_manual_template(
            &state,
            None,
            1,
            "09:00".to_string(),
            "18:00".to_string(),
            false,
        );
        assert_eq!(response, MutationResponse::failed("please sign in".to_string()));
        assert_eq!(
            list_schedule_templates(&state, None),
            Err("please sign in".to_string())
        );
    }

    #[tokio::test]
    async fn preview_failure_is_distinguishable_from_nothing_to_sync() {
        let dir = TempDir::new().expect("temp dir");
        let healthy = state_with(&dir, Arc::new(InMemoryEventAnswerStore::default()));
        let empty = preview_sync(&healthy, Some("user-1".to_string()), None).await;
        assert!(empty.success);
        assert!(empty.diffs.is_empty());

        let broken = state_with(&dir, Arc::new(UnreachableAnswerStore));
        let failed = preview_sync(&broken, Some("user-1".to_string()), None).await;
        assert!(!failed.success);
        assert!(failed.diffs.is_empty());
        assert_eq!(
            failed.message.as_deref(),
            Some("could not reach the schedule store, please reload")
        );

        let applied = apply_sync(&broken, Some("user-1".to_string()), "evt-1".to_string()).await;
        assert!(!applied.success);
        assert_eq!(applied.updated_count, 0);
    }

    #[tokio::test]
    async fn apply_outcomes_cover_missing_and_finalized_events() {
        let dir = TempDir::new().expect("temp dir");
        let answers = Arc::new(InMemoryEventAnswerStore::default());
        answers
            .insert_event(
                "evt-1",
                "Team dinner",
                vec![EventDate {
                    id: "a".to_string(),
                    start_at: parse_wall_clock("2026-02-16T10:00").expect("start"),
                    end_at: parse_wall_clock("2026-02-16T11:00").expect("end"),
                }],
            )
            .expect("insert");
        answers.set_answer("user-1", "evt-1", "a", true).expect("answer");
        let state = state_with(&dir, Arc::clone(&answers) as Arc<dyn EventAnswerStore>);

        let nothing = apply_sync(&state, Some("user-1".to_string()), "evt-1".to_string()).await;
        assert_eq!(
            nothing,
            ApplySyncResponse {
                success: true,
                updated_count: 0,
                message: None,
            }
        );

        let missing = apply_sync(&state, Some("user-1".to_string()), "evt-2".to_string()).await;
        assert!(!missing.success);
        assert_eq!(missing.message.as_deref(), Some("event not found"));

        answers.set_finalized("evt-1", true).expect("finalize");
        let finalized = apply_sync(&state, Some("user-1".to_string()), "evt-1".to_string()).await;
        assert!(!finalized.success);
        assert_eq!(finalized.updated_count, 0);
    }
}
