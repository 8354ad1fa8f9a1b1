use crate::application::sync_preview::SyncPreviewEngine;
use crate::infrastructure::answer_store::EventAnswerStore;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::schedule_repository::ScheduleRepository;
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ApplyReport {
    pub event_id: String,
    pub updated_count: usize,
}

pub struct SyncApplyEngine<S, R>
where
    S: EventAnswerStore + ?Sized,
    R: ScheduleRepository + ?Sized,
{
    answer_store: Arc<S>,
    preview: SyncPreviewEngine<S, R>,
}

impl<S, R> SyncApplyEngine<S, R>
where
    S: EventAnswerStore + ?Sized,
    R: ScheduleRepository + ?Sized,
{
    pub fn new(answer_store: Arc<S>, schedule_repository: Arc<R>) -> Self {
        Self {
            preview: SyncPreviewEngine::new(Arc::clone(&answer_store), schedule_repository),
            answer_store,
        }
    }

    pub fn with_learned_templates(mut self, include_learned: bool) -> Self {
        self.preview = self.preview.with_learned_templates(include_learned);
        self
    }

    /// Recomputes the diff for one event and writes its pending answers as a
    /// single batch. Overrides are never created here.
    pub async fn apply(&self, user_id: &str, event_id: &str) -> Result<ApplyReport, InfraError> {
        let diff = self.preview.diff_for_event(user_id, event_id).await?;
        let writes = diff.pending_writes();
        if writes.is_empty() {
            return Ok(ApplyReport {
                event_id: diff.event_id,
                updated_count: 0,
            });
        }

        let written = self
            .answer_store
            .write_answers(user_id, &diff.event_id, &writes)
            .await
            .map_err(|error| match error {
                InfraError::BatchWrite(_) => error,
                other => InfraError::BatchWrite(other.to_string()),
            })?;
        if written != writes.len() {
            return Err(InfraError::BatchWrite(format!(
                "wrote {written} of {} answers for event {}",
                writes.len(),
                diff.event_id
            )));
        }

        Ok(ApplyReport {
            event_id: diff.event_id,
            updated_count: written,
        })
    }
}
