use crate::domain::matcher::{overlaps, Span, TimeRange};
use crate::domain::models::{BlockSource, ScheduleBlock, ScheduleTemplate, TemplateSource};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::storage::{
    format_wall_clock, next_id, open_connection, parse_stored_wall_clock,
};
use chrono::{NaiveDateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateDraft {
    pub weekday: u8,
    pub start_minute: u16,
    pub end_minute: u16,
    pub available: bool,
    pub sample_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockDraft {
    pub start_at: NaiveDateTime,
    pub end_at: NaiveDateTime,
    pub available: bool,
    pub source: BlockSource,
    pub event_id: Option<String>,
}

/// Storage for a user's declarations. Callers validate drafts first.
pub trait ScheduleRepository: Send + Sync {
    fn list_templates(&self, user_id: &str) -> Result<Vec<ScheduleTemplate>, InfraError>;
    fn upsert_manual_template(
        &self,
        user_id: &str,
        draft: &TemplateDraft,
    ) -> Result<ScheduleTemplate, InfraError>;
    /// Removes a manual template owned by `user_id`. Returns whether a row went away.
    fn remove_manual_template(&self, user_id: &str, template_id: &str) -> Result<bool, InfraError>;
    fn replace_learned_templates(
        &self,
        user_id: &str,
        drafts: &[TemplateDraft],
    ) -> Result<Vec<ScheduleTemplate>, InfraError>;
    fn list_blocks(
        &self,
        user_id: &str,
        window: Option<TimeRange>,
    ) -> Result<Vec<ScheduleBlock>, InfraError>;
    fn upsert_block(&self, user_id: &str, draft: &BlockDraft) -> Result<ScheduleBlock, InfraError>;
    /// Upserts every draft or none of them.
    fn upsert_blocks(
        &self,
        user_id: &str,
        drafts: &[BlockDraft],
    ) -> Result<Vec<ScheduleBlock>, InfraError>;
    fn remove_block(&self, user_id: &str, block_id: &str) -> Result<bool, InfraError>;
}

#[derive(Debug, Clone)]
pub struct SqliteScheduleRepository {
    db_path: PathBuf,
}

impl SqliteScheduleRepository {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }

    fn connect(&self) -> Result<Connection, InfraError> {
        open_connection(&self.db_path)
    }
}

struct TemplateRow {
    id: String,
    user_id: String,
    weekday: i64,
    start_minute: i64,
    end_minute: i64,
    available: bool,
    source: String,
    sample_count: i64,
}

impl TemplateRow {
    const COLUMNS: &'static str =
        "id, user_id, weekday, start_minute, end_minute, available, source, sample_count";

    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            weekday: row.get(2)?,
            start_minute: row.get(3)?,
            end_minute: row.get(4)?,
            available: row.get(5)?,
            source: row.get(6)?,
            sample_count: row.get(7)?,
        })
    }

    fn into_template(self) -> Result<ScheduleTemplate, InfraError> {
        let source = TemplateSource::parse(&self.source).ok_or_else(|| {
            InfraError::InvalidConfig(format!(
                "invalid schedule_templates.source '{}'",
                self.source
            ))
        })?;
        Ok(ScheduleTemplate {
            id: self.id,
            user_id: self.user_id,
            weekday: self.weekday as u8,
            start_minute: self.start_minute as u16,
            end_minute: self.end_minute as u16,
            available: self.available,
            source,
            sample_count: self.sample_count.max(0) as u32,
        })
    }
}

struct BlockRow {
    id: String,
    user_id: String,
    start_at: String,
    end_at: String,
    available: bool,
    source: String,
    event_id: Option<String>,
}

impl BlockRow {
    const COLUMNS: &'static str = "id, user_id, start_at, end_at, available, source, event_id";

    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            start_at: row.get(2)?,
            end_at: row.get(3)?,
            available: row.get(4)?,
            source: row.get(5)?,
            event_id: row.get(6)?,
        })
    }

    fn into_block(self) -> Result<ScheduleBlock, InfraError> {
        let source = BlockSource::parse(&self.source).ok_or_else(|| {
            InfraError::InvalidConfig(format!("invalid schedule_blocks.source '{}'", self.source))
        })?;
        Ok(ScheduleBlock {
            start_at: parse_stored_wall_clock(&self.start_at, "schedule_blocks.start_at")?,
            end_at: parse_stored_wall_clock(&self.end_at, "schedule_blocks.end_at")?,
            id: self.id,
            user_id: self.user_id,
            available: self.available,
            source,
            event_id: self.event_id,
        })
    }
}

fn select_template(
    connection: &Connection,
    user_id: &str,
    draft: &TemplateDraft,
    source: TemplateSource,
) -> Result<ScheduleTemplate, InfraError> {
    let row = connection.query_row(
        &format!(
            "SELECT {} FROM schedule_templates
             WHERE user_id = ?1 AND weekday = ?2 AND start_minute = ?3 AND end_minute = ?4
               AND source = ?5",
            TemplateRow::COLUMNS
        ),
        params![
            user_id,
            draft.weekday,
            draft.start_minute,
            draft.end_minute,
            source.as_str()
        ],
        TemplateRow::from_row,
    )?;
    row.into_template()
}

fn write_block(
    connection: &Connection,
    user_id: &str,
    draft: &BlockDraft,
    updated_at: &str,
) -> Result<ScheduleBlock, InfraError> {
    let start_at = format_wall_clock(draft.start_at);
    let end_at = format_wall_clock(draft.end_at);
    connection.execute(
        "INSERT INTO schedule_blocks
           (id, user_id, start_at, end_at, available, source, event_id, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(user_id, start_at, end_at) DO UPDATE SET
           available = excluded.available,
           source = excluded.source,
           event_id = excluded.event_id,
           updated_at = excluded.updated_at",
        params![
            next_id("blk"),
            user_id,
            start_at,
            end_at,
            draft.available,
            draft.source.as_str(),
            draft.event_id,
            updated_at
        ],
    )?;
    connection
        .query_row(
            &format!(
                "SELECT {} FROM schedule_blocks
                 WHERE user_id = ?1 AND start_at = ?2 AND end_at = ?3",
                BlockRow::COLUMNS
            ),
            params![user_id, start_at, end_at],
            BlockRow::from_row,
        )
        .optional()?
        .ok_or_else(|| InfraError::NotFound(format!("block {start_at}..{end_at}")))?
        .into_block()
}

impl ScheduleRepository for SqliteScheduleRepository {
    fn list_templates(&self, user_id: &str) -> Result<Vec<ScheduleTemplate>, InfraError> {
        let connection = self.connect()?;
        let mut statement = connection.prepare(&format!(
            "SELECT {} FROM schedule_templates WHERE user_id = ?1
             ORDER BY weekday, start_minute, end_minute",
            TemplateRow::COLUMNS
        ))?;
        let rows = statement
            .query_map(params![user_id], TemplateRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(TemplateRow::into_template).collect()
    }

    fn upsert_manual_template(
        &self,
        user_id: &str,
        draft: &TemplateDraft,
    ) -> Result<ScheduleTemplate, InfraError> {
        let connection = self.connect()?;
        connection.execute(
            "INSERT INTO schedule_templates
               (id, user_id, weekday, start_minute, end_minute, available, source,
                sample_count, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'manual', 0, ?7)
             ON CONFLICT(user_id, weekday, start_minute, end_minute, source) DO UPDATE SET
               available = excluded.available,
               updated_at = excluded.updated_at",
            params![
                next_id("tpl"),
                user_id,
                draft.weekday,
                draft.start_minute,
                draft.end_minute,
                draft.available,
                Utc::now().to_rfc3339()
            ],
        )?;
        select_template(&connection, user_id, draft, TemplateSource::Manual)
    }

    fn remove_manual_template(&self, user_id: &str, template_id: &str) -> Result<bool, InfraError> {
        let connection = self.connect()?;
        let removed = connection.execute(
            "DELETE FROM schedule_templates WHERE id = ?1 AND user_id = ?2 AND source = 'manual'",
            params![template_id, user_id],
        )?;
        Ok(removed > 0)
    }

    fn replace_learned_templates(
        &self,
        user_id: &str,
        drafts: &[TemplateDraft],
    ) -> Result<Vec<ScheduleTemplate>, InfraError> {
        let mut connection = self.connect()?;
        let transaction = connection.transaction()?;
        transaction.execute(
            "DELETE FROM schedule_templates WHERE user_id = ?1 AND source = 'learned'",
            params![user_id],
        )?;
        let updated_at = Utc::now().to_rfc3339();
        for draft in drafts {
            transaction.execute(
                "INSERT INTO schedule_templates
                   (id, user_id, weekday, start_minute, end_minute, available, source,
                    sample_count, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'learned', ?7, ?8)",
                params![
                    next_id("tpl"),
                    user_id,
                    draft.weekday,
                    draft.start_minute,
                    draft.end_minute,
                    draft.available,
                    draft.sample_count,
                    updated_at
                ],
            )?;
        }
        let learned = drafts
            .iter()
            .map(|draft| select_template(&transaction, user_id, draft, TemplateSource::Learned))
            .collect::<Result<Vec<_>, _>>()?;
        transaction.commit()?;
        Ok(learned)
    }

    fn list_blocks(
        &self,
        user_id: &str,
        window: Option<TimeRange>,
    ) -> Result<Vec<ScheduleBlock>, InfraError> {
        let connection = self.connect()?;
        let rows = match window {
            Some(window) => {
                let mut statement = connection.prepare(&format!(
                    "SELECT {} FROM schedule_blocks
                     WHERE user_id = ?1 AND start_at < ?3 AND end_at > ?2
                     ORDER BY start_at, end_at",
                    BlockRow::COLUMNS
                ))?;
                statement
                    .query_map(
                        params![
                            user_id,
                            format_wall_clock(window.start),
                            format_wall_clock(window.end)
                        ],
                        BlockRow::from_row,
                    )?
                    .collect::<Result<Vec<_>, _>>()?
            }
            None => {
                let mut statement = connection.prepare(&format!(
                    "SELECT {} FROM schedule_blocks WHERE user_id = ?1 ORDER BY start_at, end_at",
                    BlockRow::COLUMNS
                ))?;
                statement
                    .query_map(params![user_id], BlockRow::from_row)?
                    .collect::<Result<Vec<_>, _>>()?
            }
        };
        rows.into_iter().map(BlockRow::into_block).collect()
    }

    fn upsert_block(&self, user_id: &str, draft: &BlockDraft) -> Result<ScheduleBlock, InfraError> {
        let connection = self.connect()?;
        write_block(&connection, user_id, draft, &Utc::now().to_rfc3339())
    }

    fn upsert_blocks(
        &self,
        user_id: &str,
        drafts: &[BlockDraft],
    ) -> Result<Vec<ScheduleBlock>, InfraError> {
        let mut connection = self.connect()?;
        let transaction = connection.transaction()?;
        let updated_at = Utc::now().to_rfc3339();
        let blocks = drafts
            .iter()
            .map(|draft| write_block(&transaction, user_id, draft, &updated_at))
            .collect::<Result<Vec<_>, _>>()?;
        transaction.commit()?;
        Ok(blocks)
    }

    fn remove_block(&self, user_id: &str, block_id: &str) -> Result<bool, InfraError> {
        let connection = self.connect()?;
        let removed = connection.execute(
            "DELETE FROM schedule_blocks WHERE id = ?1 AND user_id = ?2",
            params![block_id, user_id],
        )?;
        Ok(removed > 0)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryScheduleRepository {
    templates: Mutex<Vec<ScheduleTemplate>>,
    blocks: Mutex<Vec<ScheduleBlock>>,
}

impl InMemoryScheduleRepository {
    fn lock_templates(&self) -> Result<MutexGuard<'_, Vec<ScheduleTemplate>>, InfraError> {
        self.templates
            .lock()
            .map_err(|error| {
                InfraError::InvalidConfig(format!("template store lock poisoned: {error}"))
            })
    }

    fn lock_blocks(&self) -> Result<MutexGuard<'_, Vec<ScheduleBlock>>, InfraError> {
        self.blocks
            .lock()
            .map_err(|error| {
                InfraError::InvalidConfig(format!("block store lock poisoned: {error}"))
            })
    }
}

fn draft_matches(template: &ScheduleTemplate, user_id: &str, draft: &TemplateDraft) -> bool {
    template.user_id == user_id
        && template.weekday == draft.weekday
        && template.start_minute == draft.start_minute
        && template.end_minute == draft.end_minute
}

fn put_block(blocks: &mut Vec<ScheduleBlock>, user_id: &str, draft: &BlockDraft) -> ScheduleBlock {
    if let Some(existing) = blocks.iter_mut().find(|block| {
        block.user_id == user_id && block.start_at == draft.start_at && block.end_at == draft.end_at
    }) {
        existing.available = draft.available;
        existing.source = draft.source;
        existing.event_id = draft.event_id.clone();
        return existing.clone();
    }
    let block = ScheduleBlock {
        id: next_id("blk"),
        user_id: user_id.to_string(),
        start_at: draft.start_at,
        end_at: draft.end_at,
        available: draft.available,
        source: draft.source,
        event_id: draft.event_id.clone(),
    };
    blocks.push(block.clone());
    block
}

impl ScheduleRepository for InMemoryScheduleRepository {
    fn list_templates(&self, user_id: &str) -> Result<Vec<ScheduleTemplate>, InfraError> {
        let templates = self.lock_templates()?;
        let mut owned = templates
            .iter()
            .filter(|template| template.user_id == user_id)
            .cloned()
            .collect::<Vec<_>>();
        owned.sort_by_key(|template| {
            (template.weekday, template.start_minute, template.end_minute)
        });
        Ok(owned)
    }

    fn upsert_manual_template(
        &self,
        user_id: &str,
        draft: &TemplateDraft,
    ) -> Result<ScheduleTemplate, InfraError> {
        let mut templates = self.lock_templates()?;
        if let Some(existing) = templates.iter_mut().find(|template| {
            template.source == TemplateSource::Manual && draft_matches(template, user_id, draft)
        }) {
            existing.available = draft.available;
            return Ok(existing.clone());
        }
        let template = ScheduleTemplate {
            id: next_id("tpl"),
            user_id: user_id.to_string(),
            weekday: draft.weekday,
            start_minute: draft.start_minute,
            end_minute: draft.end_minute,
            available: draft.available,
            source: TemplateSource::Manual,
            sample_count: 0,
        };
        templates.push(template.clone());
        Ok(template)
    }

    fn remove_manual_template(&self, user_id: &str, template_id: &str) -> Result<bool, InfraError> {
        let mut templates = self.lock_templates()?;
        let before = templates.len();
        templates.retain(|template| {
            !(template.id == template_id
                && template.user_id == user_id
                && template.source == TemplateSource::Manual)
        });
        Ok(templates.len() < before)
    }

    fn replace_learned_templates(
        &self,
        user_id: &str,
        drafts: &[TemplateDraft],
    ) -> Result<Vec<ScheduleTemplate>, InfraError> {
        let mut templates = self.lock_templates()?;
        templates.retain(|template| {
            !(template.user_id == user_id && template.source == TemplateSource::Learned)
        });
        let learned = drafts
            .iter()
            .map(|draft| ScheduleTemplate {
                id: next_id("tpl"),
                user_id: user_id.to_string(),
                weekday: draft.weekday,
                start_minute: draft.start_minute,
                end_minute: draft.end_minute,
                available: draft.available,
                source: TemplateSource::Learned,
                sample_count: draft.sample_count,
            })
            .collect::<Vec<_>>();
        templates.extend(learned.iter().cloned());
        Ok(learned)
    }

    fn list_blocks(
        &self,
        user_id: &str,
        window: Option<TimeRange>,
    ) -> Result<Vec<ScheduleBlock>, InfraError> {
        let blocks = self.lock_blocks()?;
        let mut owned = blocks
            .iter()
            .filter(|block| block.user_id == user_id)
            .filter(|block| {
                window
                    .map(|window| {
                        overlaps(
                            &Span {
                                start: block.start_at,
                                end: block.end_at,
                            },
                            &window,
                        )
                    })
                    .unwrap_or(true)
            })
            .cloned()
            .collect::<Vec<_>>();
        owned.sort_by_key(|block| (block.start_at, block.end_at));
        Ok(owned)
    }

    fn upsert_block(&self, user_id: &str, draft: &BlockDraft) -> Result<ScheduleBlock, InfraError> {
        let mut blocks = self.lock_blocks()?;
        Ok(put_block(&mut blocks, user_id, draft))
    }

    fn upsert_blocks(
        &self,
        user_id: &str,
        drafts: &[BlockDraft],
    ) -> Result<Vec<ScheduleBlock>, InfraError> {
        let mut blocks = self.lock_blocks()?;
        Ok(drafts
            .iter()
            .map(|draft| put_block(&mut blocks, user_id, draft))
            .collect())
    }

    fn remove_block(&self, user_id: &str, block_id: &str) -> Result<bool, InfraError> {
        let mut blocks = self.lock_blocks()?;
        let before = blocks.len();
        blocks.retain(|block| !(block.id == block_id && block.user_id == user_id));
        Ok(blocks.len() < before)
    }
}
