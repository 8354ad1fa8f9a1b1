use crate::application::declarations::{Declarations, ScheduleDeclarationService};
use crate::domain::matcher::{predict, Span};
use crate::domain::models::{
    AnswerWrite, DateDiff, ParticipantEvent, SyncDiff, SyncSummary,
};
use crate::infrastructure::answer_store::EventAnswerStore;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::schedule_repository::ScheduleRepository;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SyncPreview {
    pub diffs: Vec<SyncDiff>,
    pub summary: SyncSummary,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PrefillEntry {
    pub event_date_id: String,
    pub predicted: Option<bool>,
}

pub struct SyncPreviewEngine<S, R>
where
    S: EventAnswerStore + ?Sized,
    R: ScheduleRepository + ?Sized,
{
    answer_store: Arc<S>,
    declarations: ScheduleDeclarationService<R>,
    include_learned: bool,
}

impl<S, R> SyncPreviewEngine<S, R>
where
    S: EventAnswerStore + ?Sized,
    R: ScheduleRepository + ?Sized,
{
    pub fn new(answer_store: Arc<S>, schedule_repository: Arc<R>) -> Self {
        Self {
            answer_store,
            declarations: ScheduleDeclarationService::new(schedule_repository),
            include_learned: true,
        }
    }

    pub fn with_learned_templates(mut self, include_learned: bool) -> Self {
        self.include_learned = include_learned;
        self
    }

    /// Diffs for every open event the user answered, skipping `exclude_event_id`.
    /// Only events with at least one pending change are returned.
    pub async fn preview(
        &self,
        user_id: &str,
        exclude_event_id: Option<&str>,
    ) -> Result<SyncPreview, InfraError> {
        let declarations = self.declarations.declarations(user_id, self.include_learned)?;
        let events = self.answer_store.list_answered_events(user_id).await?;

        let mut diffs = Vec::new();
        for event in events {
            if event.finalized || Some(event.id.as_str()) == exclude_event_id {
                continue;
            }
            let protected = self.answer_store.list_overrides(user_id, &event.id).await?;
            let diff = diff_event(&event, &protected, &declarations);
            if diff.has_changes() {
                diffs.push(diff);
            }
        }

        let summary = SyncSummary::from_diffs(&diffs);
        Ok(SyncPreview { diffs, summary })
    }

    /// Diff for one answered, open event, protected-only dates included.
    pub async fn diff_for_event(
        &self,
        user_id: &str,
        event_id: &str,
    ) -> Result<SyncDiff, InfraError> {
        let event = self.load_answered_event(user_id, event_id).await?;
        if event.finalized {
            return Err(InfraError::EventFinalized(event.id));
        }
        let declarations = self.declarations.declarations(user_id, self.include_learned)?;
        let protected = self.answer_store.list_overrides(user_id, &event.id).await?;
        Ok(diff_event(&event, &protected, &declarations))
    }

    /// Suggested answers for the dates the user has not answered yet.
    pub async fn prefill(
        &self,
        user_id: &str,
        event_id: &str,
    ) -> Result<Vec<PrefillEntry>, InfraError> {
        let event = self.load_open_event(user_id, event_id).await?;
        let declarations = self.declarations.declarations(user_id, self.include_learned)?;
        Ok(event
            .dates
            .iter()
            .filter(|date| !event.answers.contains_key(&date.id))
            .map(|date| PrefillEntry {
                event_date_id: date.id.clone(),
                predicted: Span::new(date.start_at, date.end_at).and_then(|target| {
                    predict(&target, &declarations.blocks, &declarations.templates)
                }),
            })
            .collect())
    }

    /// Dates whose submitted answer contradicts a non-null prediction.
    pub async fn conflicting_dates(
        &self,
        user_id: &str,
        event_id: &str,
        submitted: &[AnswerWrite],
    ) -> Result<Vec<String>, InfraError> {
        let event = self.load_open_event(user_id, event_id).await?;
        let declarations = self.declarations.declarations(user_id, self.include_learned)?;
        Ok(conflicting_dates(&event, &declarations, submitted))
    }

    async fn load_open_event(
        &self,
        user_id: &str,
        event_id: &str,
    ) -> Result<ParticipantEvent, InfraError> {
        let event = self
            .answer_store
            .load_event(user_id, event_id)
            .await?
            .ok_or_else(|| InfraError::NotFound(event_id.to_string()))?;
        if event.finalized {
            return Err(InfraError::EventFinalized(event.id));
        }
        Ok(event)
    }

    async fn load_answered_event(
        &self,
        user_id: &str,
        event_id: &str,
    ) -> Result<ParticipantEvent, InfraError> {
        self.answer_store
            .load_event(user_id, event_id)
            .await?
            .filter(|event| !event.answers.is_empty())
            .ok_or_else(|| InfraError::NotFound(event_id.to_string()))
    }
}

pub fn diff_event(
    event: &ParticipantEvent,
    protected: &HashSet<String>,
    declarations: &Declarations,
) -> SyncDiff {
    let dates = event
        .dates
        .iter()
        .map(|date| {
            let current = event.answers.get(&date.id).copied();
            let desired = Span::new(date.start_at, date.end_at)
                .and_then(|target| predict(&target, &declarations.blocks, &declarations.templates));
            let is_protected = protected.contains(&date.id);
            DateDiff {
                event_date_id: date.id.clone(),
                start_at: date.start_at,
                end_at: date.end_at,
                current,
                desired,
                will_change: desired.is_some() && !is_protected && desired != current,
                is_protected,
            }
        })
        .collect::<Vec<_>>();

    let changed = dates.iter().filter(|date| date.will_change);
    let total_changes = changed.clone().count();
    let to_unavailable = changed.clone().filter(|date| date.desired == Some(false)).count();
    let to_available = changed.filter(|date| date.desired == Some(true)).count();
    let protected_skipped = dates
        .iter()
        .filter(|date| date.is_protected && date.desired.is_some() && date.desired != date.current)
        .count();

    SyncDiff {
        event_id: event.id.clone(),
        event_title: event.title.clone(),
        total_changes,
        to_unavailable,
        to_available,
        protected_skipped,
        dates,
    }
}

pub fn conflicting_dates(
    event: &ParticipantEvent,
    declarations: &Declarations,
    submitted: &[AnswerWrite],
) -> Vec<String> {
    let mut conflicts = Vec::new();
    for date in &event.dates {
        let Some(answer) = submitted.iter().find(|write| write.event_date_id == date.id) else {
            continue;
        };
        let predicted = Span::new(date.start_at, date.end_at)
            .and_then(|target| predict(&target, &declarations.blocks, &declarations.templates));
        if predicted.is_some_and(|predicted| predicted != answer.available) {
            conflicts.push(date.id.clone());
        }
    }
    conflicts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::matcher::parse_wall_clock;
    use crate::domain::models::{
        BlockSource, EventDate, ScheduleBlock, ScheduleTemplate, TemplateSource,
    };
    use crate::infrastructure::answer_store::InMemoryEventAnswerStore;
    use crate::infrastructure::schedule_repository::{
        BlockDraft, InMemoryScheduleRepository, TemplateDraft,
    };
    use proptest::prelude::*;
    use std::collections::HashMap;

    fn date(id: &str, start: &str, end: &str) -> EventDate {
        EventDate {
            id: id.to_string(),
            start_at: parse_wall_clock(start).expect("start"),
            end_at: parse_wall_clock(end).expect("end"),
        }
    }

    fn monday_busy_template() -> ScheduleTemplate {
        ScheduleTemplate {
            id: "tpl-1".to_string(),
            user_id: "user-1".to_string(),
            weekday: 1,
            start_minute: 9 * 60,
            end_minute: 18 * 60,
            available: false,
            source: TemplateSource::Manual,
            sample_count: 0,
        }
    }

    fn dinner_event(answers: &[(&str, bool)]) -> ParticipantEvent {
        ParticipantEvent {
            id: "evt-1".to_string(),
            title: "Team dinner".to_string(),
            finalized: false,
            dates: vec![
                date("mon", "2026-02-16T10:00", "2026-02-16T11:00"),
                date("tue", "2026-02-17T10:00", "2026-02-17T11:00"),
            ],
            answers: answers
                .iter()
                .map(|(id, value)| (id.to_string(), *value))
                .collect::<HashMap<_, _>>(),
        }
    }

    fn seeded_engine() -> (
        Arc<InMemoryEventAnswerStore>,
        Arc<InMemoryScheduleRepository>,
        SyncPreviewEngine<InMemoryEventAnswerStore, InMemoryScheduleRepository>,
    ) {
        let store = Arc::new(InMemoryEventAnswerStore::default());
        let repository = Arc::new(InMemoryScheduleRepository::default());
        for (event_id, title) in [
            ("evt-1", "Team dinner"),
            ("evt-2", "Offsite"),
            ("evt-3", "Retro"),
        ] {
            store
                .insert_event(
                    event_id,
                    title,
                    vec![
                        date("mon", "2026-02-16T10:00", "2026-02-16T11:00"),
                        date("tue", "2026-02-17T10:00", "2026-02-17T11:00"),
                    ],
                )
                .expect("insert event");
            store.set_answer("user-1", event_id, "mon", true).expect("answer");
        }
        store.set_finalized("evt-3", true).expect("finalize");
        repository
            .upsert_manual_template(
                "user-1",
                &TemplateDraft {
                    weekday: 1,
                    start_minute: 9 * 60,
                    end_minute: 18 * 60,
                    available: false,
                    sample_count: 0,
                },
            )
            .expect("template");
        let engine = SyncPreviewEngine::new(Arc::clone(&store), Arc::clone(&repository));
        (store, repository, engine)
    }

    #[test]
    fn diff_counts_directions_and_protected_skips() {
        let event = dinner_event(&[("mon", true), ("tue", true)]);
        let declarations = Declarations {
            blocks: Vec::new(),
            templates: vec![monday_busy_template()],
        };

        let diff = diff_event(&event, &HashSet::new(), &declarations);
        assert_eq!(diff.total_changes, 1);
        assert_eq!(diff.to_unavailable, 1);
        assert_eq!(diff.to_available, 0);
        assert!(diff.dates[0].will_change);
        assert_eq!(diff.dates[1].desired, None);
        assert!(!diff.dates[1].will_change);

        let protected = HashSet::from(["mon".to_string()]);
        let diff = diff_event(&event, &protected, &declarations);
        assert_eq!(diff.total_changes, 0);
        assert_eq!(diff.protected_skipped, 1);
        assert!(diff.dates[0].is_protected);
        assert!(!diff.dates[0].will_change);
        assert_eq!(diff.dates[0].current, Some(true));
        assert_eq!(diff.dates[0].desired, Some(false));
    }

    #[test]
    fn unanswered_dates_are_filled_when_prediction_exists() {
        let event = dinner_event(&[("tue", true)]);
        let declarations = Declarations {
            blocks: vec![ScheduleBlock {
                id: "blk-1".to_string(),
                user_id: "user-1".to_string(),
                start_at: parse_wall_clock("2026-02-16T08:00").expect("start"),
                end_at: parse_wall_clock("2026-02-16T12:00").expect("end"),
                available: true,
                source: BlockSource::Manual,
                event_id: None,
            }],
            templates: Vec::new(),
        };
        let diff = diff_event(&event, &HashSet::new(), &declarations);
        assert_eq!(diff.total_changes, 1);
        assert_eq!(diff.to_available, 1);
        assert_eq!(diff.dates[0].current, None);
    }

    #[tokio::test]
    async fn preview_skips_finalized_and_excluded_events() {
        let (_store, _repository, engine) = seeded_engine();

        let preview = engine.preview("user-1", None).await.expect("preview");
        let ids = preview.diffs.iter().map(|diff| diff.event_id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["evt-1", "evt-2"]);
        assert_eq!(preview.summary.events_with_changes, 2);
        assert_eq!(preview.summary.total_changes, 2);

        let preview = engine.preview("user-1", Some("evt-1")).await.expect("preview");
        let ids = preview.diffs.iter().map(|diff| diff.event_id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["evt-2"]);
    }

    #[tokio::test]
    async fn preview_reflects_latest_declarations() {
        let (_store, repository, engine) = seeded_engine();
        assert_eq!(engine.preview("user-1", None).await.expect("preview").diffs.len(), 2);

        repository
            .upsert_block(
                "user-1",
                &BlockDraft {
                    start_at: parse_wall_clock("2026-02-16T10:00").expect("start"),
                    end_at: parse_wall_clock("2026-02-16T11:00").expect("end"),
                    available: true,
                    source: BlockSource::Manual,
                    event_id: None,
                },
            )
            .expect("free block");
        let preview = engine.preview("user-1", None).await.expect("preview");
        assert!(preview.diffs.is_empty());
        assert_eq!(preview.summary, SyncSummary::default());
    }

    #[tokio::test]
    async fn diff_for_event_rejects_finalized_and_unknown() {
        let (_store, _repository, engine) = seeded_engine();
        assert!(matches!(
            engine.diff_for_event("user-1", "evt-3").await,
            Err(InfraError::EventFinalized(_))
        ));
        assert!(matches!(
            engine.diff_for_event("user-1", "missing").await,
            Err(InfraError::NotFound(_))
        ));
        assert!(matches!(
            engine.diff_for_event("user-2", "evt-1").await,
            Err(InfraError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn prefill_predicts_only_unanswered_dates() {
        let (store, _repository, engine) = seeded_engine();
        store
            .insert_event(
                "evt-new",
                "Kickoff",
                vec![
                    date("a", "2026-02-23T09:30", "2026-02-23T10:00"),
                    date("b", "2026-02-24T09:30", "2026-02-24T10:00"),
                ],
            )
            .expect("insert");
        store.set_answer("user-1", "evt-new", "b", true).expect("answer");

        let prefill = engine.prefill("user-1", "evt-new").await.expect("prefill");
        assert_eq!(
            prefill,
            vec![PrefillEntry {
                event_date_id: "a".to_string(),
                predicted: Some(false),
            }]
        );
    }

    #[tokio::test]
    async fn conflicts_only_where_prediction_disagrees() {
        let (_store, _repository, engine) = seeded_engine();
        let submitted = vec![
            AnswerWrite {
                event_date_id: "mon".to_string(),
                available: true,
            },
            AnswerWrite {
                event_date_id: "tue".to_string(),
                available: false,
            },
        ];
        let conflicts = engine
            .conflicting_dates("user-1", "evt-1", &submitted)
            .await
            .expect("conflicts");
        assert_eq!(conflicts, vec!["mon".to_string()]);
    }

    proptest! {
        #[test]
        fn protected_dates_never_change(
            answers in proptest::collection::vec(any::<bool>(), 2),
            protect_mon in any::<bool>(),
            protect_tue in any::<bool>(),
            template_available in any::<bool>(),
        ) {
            let event = dinner_event(&[("mon", answers[0]), ("tue", answers[1])]);
            let mut template = monday_busy_template();
            template.available = template_available;
            let declarations = Declarations { blocks: Vec::new(), templates: vec![template] };
            let mut protected = HashSet::new();
            if protect_mon {
                protected.insert("mon".to_string());
            }
            if protect_tue {
                protected.insert("tue".to_string());
            }

            let diff = diff_event(&event, &protected, &declarations);
            for date in &diff.dates {
                if date.is_protected {
                    prop_assert!(!date.will_change);
                }
            }
            prop_assert!(diff
                .pending_writes()
                .iter()
                .all(|write| !protected.contains(&write.event_date_id)));
        }

        #[test]
        fn finalized_events_never_appear(
            finalize_first in any::<bool>(),
            finalize_second in any::<bool>(),
        ) {
            let runtime = tokio::runtime::Runtime::new().expect("runtime");
            runtime.block_on(async move {
                let (store, _repository, engine) = seeded_engine();
                if finalize_first {
                    store.set_finalized("evt-1", true).expect("finalize");
                }
                if finalize_second {
                    store.set_finalized("evt-2", true).expect("finalize");
                }
                let preview = engine.preview("user-1", None).await.expect("preview");
                assert!(preview.diffs.iter().all(|diff| diff.event_id != "evt-3"));
                let listed =
                    |event_id: &str| preview.diffs.iter().any(|diff| diff.event_id == event_id);
                assert_eq!(listed("evt-1"), !finalize_first);
                assert_eq!(listed("evt-2"), !finalize_second);
            });
        }
    }
}
