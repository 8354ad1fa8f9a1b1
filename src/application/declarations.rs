use crate::domain::matcher::{parse_time_of_day, parse_wall_clock, Span, TimeRange};
use crate::domain::models::{BlockSource, ScheduleBlock, ScheduleTemplate, TemplateSource};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::schedule_repository::{BlockDraft, ScheduleRepository, TemplateDraft};
use chrono::{Duration, NaiveDateTime, NaiveTime, SubsecRound};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TemplateInput {
    pub weekday: u8,
    pub start_time: String,
    pub end_time: String,
    pub available: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BlockInput {
    pub start_at: String,
    pub end_at: String,
    pub available: bool,
    #[serde(default)]
    pub source: Option<BlockSource>,
    #[serde(default)]
    pub event_id: Option<String>,
}

/// Half-open `[from, to)` window used by calendar-style listings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DateWindow {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TemplateGroups {
    pub manual: Vec<ScheduleTemplate>,
    pub learned: Vec<ScheduleTemplate>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Declarations {
    pub blocks: Vec<ScheduleBlock>,
    pub templates: Vec<ScheduleTemplate>,
}

pub struct ScheduleDeclarationService<R>
where
    R: ScheduleRepository + ?Sized,
{
    repository: Arc<R>,
}

impl<R> ScheduleDeclarationService<R>
where
    R: ScheduleRepository + ?Sized,
{
    pub fn new(repository: Arc<R>) -> Self {
        Self { repository }
    }

    pub fn list_templates(&self, user_id: &str) -> Result<TemplateGroups, InfraError> {
        let (manual, learned): (Vec<_>, Vec<_>) = self
            .repository
            .list_templates(user_id)?
            .into_iter()
            .partition(|template| template.source == TemplateSource::Manual);
        Ok(TemplateGroups { manual, learned })
    }

    pub fn upsert_manual_template(
        &self,
        user_id: &str,
        input: &TemplateInput,
    ) -> Result<ScheduleTemplate, InfraError> {
        let draft = validate_template_input(input)?;
        self.repository.upsert_manual_template(user_id, &draft)
    }

    /// Learned templates are left alone; only manual rows owned by the caller go away.
    pub fn remove_template(&self, user_id: &str, template_id: &str) -> Result<bool, InfraError> {
        let template_id = template_id.trim();
        if template_id.is_empty() {
            return Ok(false);
        }
        self.repository.remove_manual_template(user_id, template_id)
    }

    pub fn replace_learned_templates(
        &self,
        user_id: &str,
        drafts: &[TemplateDraft],
    ) -> Result<Vec<ScheduleTemplate>, InfraError> {
        self.repository.replace_learned_templates(user_id, drafts)
    }

    pub fn list_blocks(
        &self,
        user_id: &str,
        window: Option<&DateWindow>,
    ) -> Result<Vec<ScheduleBlock>, InfraError> {
        let window = window.map(resolve_window).transpose()?;
        self.repository.list_blocks(user_id, window)
    }

    pub fn upsert_block(
        &self,
        user_id: &str,
        input: &BlockInput,
    ) -> Result<ScheduleBlock, InfraError> {
        let draft = validate_block_input(input)?;
        self.repository.upsert_block(user_id, &draft)
    }

    /// Validates every draft, then stores them as one batch. Nothing is
    /// written when any draft is rejected or the store fails part way.
    pub fn upsert_block_drafts(
        &self,
        user_id: &str,
        drafts: &[BlockDraft],
    ) -> Result<Vec<ScheduleBlock>, InfraError> {
        let resolved = drafts
            .iter()
            .map(|draft| {
                let (start_at, end_at) = resolve_block_range(draft.start_at, draft.end_at)
                    .map_err(InfraError::Validation)?;
                if draft.source == BlockSource::Event && draft.event_id.is_none() {
                    return Err(InfraError::Validation(
                        "event-sourced blocks need an event id".to_string(),
                    ));
                }
                Ok(BlockDraft {
                    start_at,
                    end_at,
                    ..draft.clone()
                })
            })
            .collect::<Result<Vec<_>, InfraError>>()?;
        self.repository.upsert_blocks(user_id, &resolved)
    }

    pub fn remove_block(&self, user_id: &str, block_id: &str) -> Result<bool, InfraError> {
        let block_id = block_id.trim();
        if block_id.is_empty() {
            return Ok(false);
        }
        self.repository.remove_block(user_id, block_id)
    }

    /// Everything `predict` consults for this user, read fresh.
    pub fn declarations(
        &self,
        user_id: &str,
        include_learned: bool,
    ) -> Result<Declarations, InfraError> {
        let blocks = self.repository.list_blocks(user_id, None)?;
        let templates = self
            .repository
            .list_templates(user_id)?
            .into_iter()
            .filter(|template| include_learned || template.source == TemplateSource::Manual)
            .collect();
        Ok(Declarations { blocks, templates })
    }
}

pub fn validate_template_input(input: &TemplateInput) -> Result<TemplateDraft, InfraError> {
    if input.weekday > 6 {
        return Err(InfraError::Validation(
            "weekday must be between 0 (Sunday) and 6 (Saturday)".to_string(),
        ));
    }
    let start_minute = parse_time_of_day(&input.start_time, false).map_err(InfraError::Validation)?;
    let end_minute = parse_time_of_day(&input.end_time, true).map_err(InfraError::Validation)?;
    if start_minute >= end_minute {
        return Err(InfraError::Validation(
            "start time must be before end time".to_string(),
        ));
    }
    Ok(TemplateDraft {
        weekday: input.weekday,
        start_minute,
        end_minute,
        available: input.available,
        sample_count: 0,
    })
}

pub fn validate_block_input(input: &BlockInput) -> Result<BlockDraft, InfraError> {
    let start_at = parse_wall_clock(&input.start_at).map_err(InfraError::Validation)?;
    let end_at = parse_wall_clock(&input.end_at).map_err(InfraError::Validation)?;
    let (start_at, end_at) = resolve_block_range(start_at, end_at).map_err(InfraError::Validation)?;

    let source = input.source.unwrap_or(BlockSource::Manual);
    let event_id = input
        .event_id
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned);
    if source == BlockSource::Event && event_id.is_none() {
        return Err(InfraError::Validation(
            "event-sourced blocks need an event id".to_string(),
        ));
    }

    Ok(BlockDraft {
        start_at,
        end_at,
        available: input.available,
        source,
        event_id,
    })
}

/// An end of 00:00 on the start's own calendar day means the following
/// midnight. Any other end at or before the start is rejected. Both ends are
/// cut to whole seconds first, which is what the store keeps.
pub fn resolve_block_range(
    start_at: NaiveDateTime,
    end_at: NaiveDateTime,
) -> Result<(NaiveDateTime, NaiveDateTime), String> {
    let start_at = start_at.trunc_subsecs(0);
    let end_at = end_at.trunc_subsecs(0);
    let end_at = if end_at.time() == NaiveTime::MIN && end_at.date() == start_at.date() {
        end_at
            .checked_add_signed(Duration::days(1))
            .ok_or_else(|| "end is out of range".to_string())?
    } else {
        end_at
    };
    if end_at <= start_at {
        return Err("end must be after start".to_string());
    }
    Ok((start_at, end_at))
}

fn resolve_window(window: &DateWindow) -> Result<TimeRange, InfraError> {
    let from = parse_wall_clock(&window.from).map_err(InfraError::Validation)?;
    let to = parse_wall_clock(&window.to).map_err(InfraError::Validation)?;
    Span::new(from, to)
        .ok_or_else(|| InfraError::Validation("window end must be after its start".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::schedule_repository::{
        InMemoryScheduleRepository, SqliteScheduleRepository,
    };
    use crate::infrastructure::storage::initialize_database;
    use tempfile::TempDir;

    fn service() -> ScheduleDeclarationService<InMemoryScheduleRepository> {
        ScheduleDeclarationService::new(Arc::new(InMemoryScheduleRepository::default()))
    }

    fn block_input(start: &str, end: &str) -> BlockInput {
        BlockInput {
            start_at: start.to_string(),
            end_at: end.to_string(),
            available: false,
            source: None,
            event_id: None,
        }
    }

    fn template_input(start: &str, end: &str) -> TemplateInput {
        TemplateInput {
            weekday: 1,
            start_time: start.to_string(),
            end_time: end.to_string(),
            available: true,
        }
    }

    #[test]
    fn midnight_end_rolls_over_and_upserts_once() {
        let service = service();
        for _ in 0..2 {
            service
                .upsert_block("user-1", &block_input("2026-02-16T23:00", "2026-02-16T00:00"))
                .expect("midnight block");
        }
        let blocks = service.list_blocks("user-1", None).expect("list");
        assert_eq!(blocks.len(), 1);
        assert_eq!(
            blocks[0].end_at,
            parse_wall_clock("2026-02-17T00:00").expect("datetime")
        );
    }

    #[test]
    fn end_before_start_is_rejected_every_time() {
        let service = service();
        for _ in 0..2 {
            let result = service.upsert_block(
                "user-1",
                &block_input("2026-02-16T23:00", "2026-02-16T22:00"),
            );
            assert!(matches!(result, Err(InfraError::Validation(_))));
        }
        assert!(service.list_blocks("user-1", None).expect("list").is_empty());
    }

    #[test]
    fn midnight_on_a_different_day_is_not_corrected() {
        let start = parse_wall_clock("2026-02-16T23:00").expect("start");
        let earlier_midnight = parse_wall_clock("2026-02-15T00:00").expect("end");
        assert!(resolve_block_range(start, earlier_midnight).is_err());

        let next_midnight = parse_wall_clock("2026-02-17T00:00").expect("end");
        assert_eq!(resolve_block_range(start, next_midnight), Ok((start, next_midnight)));

        let midnight = parse_wall_clock("2026-02-16T00:00").expect("start");
        assert_eq!(resolve_block_range(midnight, midnight), Ok((midnight, next_midnight)));
    }

    #[test]
    fn event_source_requires_event_id() {
        let service = service();
        let mut input = block_input("2026-02-16T10:00", "2026-02-16T11:00");
        input.source = Some(BlockSource::Event);
        assert!(matches!(
            service.upsert_block("user-1", &input),
            Err(InfraError::Validation(_))
        ));
        input.event_id = Some("evt-1".to_string());
        let block = service.upsert_block("user-1", &input).expect("event block");
        assert_eq!(block.source, BlockSource::Event);
    }

    #[test]
    fn template_validation_rejects_inverted_and_bad_weekday() {
        let service = service();
        assert!(service
            .upsert_manual_template("user-1", &template_input("18:00", "09:00"))
            .is_err());
        assert!(service
            .upsert_manual_template("user-1", &template_input("09:00", "09:00"))
            .is_err());
        let mut input = template_input("09:00", "18:00");
        input.weekday = 7;
        assert!(service.upsert_manual_template("user-1", &input).is_err());

        let evening = service
            .upsert_manual_template("user-1", &template_input("20:00", "24:00"))
            .expect("until midnight");
        assert_eq!(evening.end_minute, 1440);
    }

    #[test]
    fn templates_are_grouped_by_source_and_learned_are_not_removable() {
        let service = service();
        let manual = service
            .upsert_manual_template("user-1", &template_input("09:00", "18:00"))
            .expect("manual");
        let learned = service
            .replace_learned_templates(
                "user-1",
                &[TemplateDraft {
                    weekday: 3,
                    start_minute: 600,
                    end_minute: 660,
                    available: false,
                    sample_count: 5,
                }],
            )
            .expect("learned");

        let groups = service.list_templates("user-1").expect("groups");
        assert_eq!(groups.manual, vec![manual.clone()]);
        assert_eq!(groups.learned.len(), 1);

        assert!(!service.remove_template("user-1", &learned[0].id).expect("learned removal"));
        assert!(!service.remove_template("user-2", &manual.id).expect("foreign removal"));
        assert!(service.remove_template("user-1", &manual.id).expect("owner removal"));

        let manual_only = service.declarations("user-1", false).expect("declarations");
        assert!(manual_only.templates.is_empty());
        let with_learned = service.declarations("user-1", true).expect("declarations");
        assert_eq!(with_learned.templates.len(), 1);
    }

    #[test]
    fn window_filters_blocks() {
        let service = service();
        service
            .upsert_block("user-1", &block_input("2026-02-16T10:00", "2026-02-16T11:00"))
            .expect("february");
        service
            .upsert_block("user-1", &block_input("2026-03-16T10:00", "2026-03-16T11:00"))
            .expect("march");
        let window = DateWindow {
            from: "2026-02-01".to_string(),
            to: "2026-03-01".to_string(),
        };
        let blocks = service.list_blocks("user-1", Some(&window)).expect("window");
        assert_eq!(blocks.len(), 1);

        let inverted = DateWindow {
            from: "2026-03-01".to_string(),
            to: "2026-02-01".to_string(),
        };
        assert!(service.list_blocks("user-1", Some(&inverted)).is_err());
    }

    #[test]
    fn sub_second_range_is_rejected_before_reaching_sqlite() {
        let dir = TempDir::new().expect("temp dir");
        let db_path = dir.path().join("availsync.sqlite");
        initialize_database(&db_path).expect("initialize database");
        let repository = Arc::new(SqliteScheduleRepository::new(db_path));
        let service = ScheduleDeclarationService::new(repository);

        let result = service.upsert_block(
            "user-1",
            &block_input("2026-02-16T10:00:00.2", "2026-02-16T10:00:00.7"),
        );
        assert!(matches!(result, Err(InfraError::Validation(_))));
        assert!(service.list_blocks("user-1", None).expect("list").is_empty());

        let block = service
            .upsert_block(
                "user-1",
                &block_input("2026-02-16T10:00:00.9", "2026-02-16T10:00:01.2"),
            )
            .expect("one whole second");
        assert_eq!(block.start_at, parse_wall_clock("2026-02-16T10:00:00").expect("start"));
        assert_eq!(block.end_at, parse_wall_clock("2026-02-16T10:00:01").expect("end"));
    }

    #[test]
    fn midnight_rollover_on_the_last_representable_day_is_rejected() {
        let input = block_input("+262142-12-31T23:00", "+262142-12-31T00:00");
        assert!(matches!(
            validate_block_input(&input),
            Err(InfraError::Validation(_))
        ));
        let start = parse_wall_clock(&input.start_at).expect("start");
        let end = parse_wall_clock(&input.end_at).expect("end");
        assert!(resolve_block_range(start, end).is_err());
    }

    #[test]
    fn draft_batch_is_validated_before_anything_is_stored() {
        let service = service();
        let good = BlockDraft {
            start_at: parse_wall_clock("2026-02-16T10:00").expect("start"),
            end_at: parse_wall_clock("2026-02-16T11:00").expect("end"),
            available: false,
            source: BlockSource::Event,
            event_id: Some("evt-1".to_string()),
        };
        let missing_event = BlockDraft {
            event_id: None,
            ..good.clone()
        };
        assert!(matches!(
            service.upsert_block_drafts("user-1", &[good.clone(), missing_event]),
            Err(InfraError::Validation(_))
        ));
        assert!(service.list_blocks("user-1", None).expect("list").is_empty());

        let midnight = BlockDraft {
            start_at: parse_wall_clock("2026-02-16T23:00").expect("start"),
            end_at: parse_wall_clock("2026-02-16T00:00").expect("end"),
            ..good.clone()
        };
        let stored = service
            .upsert_block_drafts("user-1", &[good, midnight])
            .expect("batch");
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[1].end_at, parse_wall_clock("2026-02-17T00:00").expect("end"));
    }
}
