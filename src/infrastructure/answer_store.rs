use crate::domain::models::{AnswerWrite, AvailabilityOverride, EventDate, ParticipantEvent};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::storage::{open_connection, parse_stored_wall_clock};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// Read/write access to the event-answering subsystem, seen from one participant.
#[async_trait]
pub trait EventAnswerStore: Send + Sync {
    /// Every event in which `user_id` has answered at least one date.
    async fn list_answered_events(
        &self,
        user_id: &str,
    ) -> Result<Vec<ParticipantEvent>, InfraError>;

    async fn load_event(
        &self,
        user_id: &str,
        event_id: &str,
    ) -> Result<Option<ParticipantEvent>, InfraError>;

    async fn list_overrides(
        &self,
        user_id: &str,
        event_id: &str,
    ) -> Result<HashSet<String>, InfraError>;

    /// Replaces the protected date set of one event. Returns the stored count.
    async fn replace_overrides(
        &self,
        user_id: &str,
        event_id: &str,
        event_date_ids: &[String],
    ) -> Result<usize, InfraError>;

    /// Writes every answer or none of them.
    async fn write_answers(
        &self,
        user_id: &str,
        event_id: &str,
        writes: &[AnswerWrite],
    ) -> Result<usize, InfraError>;
}

#[derive(Debug, Clone)]
pub struct SqliteEventAnswerStore {
    db_path: PathBuf,
}

impl SqliteEventAnswerStore {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }

    async fn run<T, F>(&self, operation: F) -> Result<T, InfraError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, InfraError> + Send + 'static,
    {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut connection = open_connection(&db_path)?;
            operation(&mut connection)
        })
        .await
        .map_err(|error| InfraError::Join(error.to_string()))?
    }
}

fn load_event_with(
    connection: &Connection,
    user_id: &str,
    event_id: &str,
) -> Result<Option<ParticipantEvent>, InfraError> {
    let header: Option<(String, String, bool)> = connection
        .query_row(
            "SELECT id, title, finalized FROM events WHERE id = ?1",
            params![event_id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()?;
    let Some((id, title, finalized)) = header else {
        return Ok(None);
    };

    let mut statement = connection.prepare(
        "SELECT id, start_at, end_at FROM event_dates WHERE event_id = ?1 ORDER BY start_at, id",
    )?;
    let raw_dates = statement
        .query_map(params![event_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    let dates = raw_dates
        .into_iter()
        .map(|(id, start_at, end_at)| {
            Ok(EventDate {
                id,
                start_at: parse_stored_wall_clock(&start_at, "event_dates.start_at")?,
                end_at: parse_stored_wall_clock(&end_at, "event_dates.end_at")?,
            })
        })
        .collect::<Result<Vec<_>, InfraError>>()?;

    let mut statement = connection.prepare(
        "SELECT event_date_id, available FROM event_date_answers
         WHERE event_id = ?1 AND user_id = ?2",
    )?;
    let answers = statement
        .query_map(params![event_id, user_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, bool>(1)?))
        })?
        .collect::<Result<HashMap<_, _>, _>>()?;

    Ok(Some(ParticipantEvent {
        id,
        title,
        finalized,
        dates,
        answers,
    }))
}

#[async_trait]
impl EventAnswerStore for SqliteEventAnswerStore {
    async fn list_answered_events(
        &self,
        user_id: &str,
    ) -> Result<Vec<ParticipantEvent>, InfraError> {
        let user_id = user_id.to_string();
        self.run(move |connection| {
            let mut statement = connection.prepare(
                "SELECT DISTINCT event_id FROM event_date_answers
                 WHERE user_id = ?1 ORDER BY event_id",
            )?;
            let event_ids = statement
                .query_map(params![user_id], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            let mut events = Vec::with_capacity(event_ids.len());
            for event_id in event_ids {
                if let Some(event) = load_event_with(connection, &user_id, &event_id)? {
                    events.push(event);
                }
            }
            Ok(events)
        })
        .await
    }

    async fn load_event(
        &self,
        user_id: &str,
        event_id: &str,
    ) -> Result<Option<ParticipantEvent>, InfraError> {
        let user_id = user_id.to_string();
        let event_id = event_id.to_string();
        self.run(move |connection| load_event_with(connection, &user_id, &event_id))
            .await
    }

    async fn list_overrides(
        &self,
        user_id: &str,
        event_id: &str,
    ) -> Result<HashSet<String>, InfraError> {
        let user_id = user_id.to_string();
        let event_id = event_id.to_string();
        self.run(move |connection| {
            let mut statement = connection.prepare(
                "SELECT event_date_id FROM availability_overrides
                 WHERE user_id = ?1 AND event_id = ?2",
            )?;
            let ids = statement
                .query_map(params![user_id, event_id], |row| row.get::<_, String>(0))?
                .collect::<Result<HashSet<_>, _>>()?;
            Ok(ids)
        })
        .await
    }

    async fn replace_overrides(
        &self,
        user_id: &str,
        event_id: &str,
        event_date_ids: &[String],
    ) -> Result<usize, InfraError> {
        let user_id = user_id.to_string();
        let event_id = event_id.to_string();
        let event_date_ids = event_date_ids.to_vec();
        self.run(move |connection| {
            let transaction = connection.transaction()?;
            transaction.execute(
                "DELETE FROM availability_overrides WHERE user_id = ?1 AND event_id = ?2",
                params![user_id, event_id],
            )?;
            let created_at = Utc::now().to_rfc3339();
            let mut stored = 0;
            for event_date_id in &event_date_ids {
                stored += transaction.execute(
                    "INSERT OR IGNORE INTO availability_overrides
                       (user_id, event_id, event_date_id, created_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![user_id, event_id, event_date_id, created_at],
                )?;
            }
            transaction.commit()?;
            Ok(stored)
        })
        .await
    }

    async fn write_answers(
        &self,
        user_id: &str,
        event_id: &str,
        writes: &[AnswerWrite],
    ) -> Result<usize, InfraError> {
        let user_id = user_id.to_string();
        let event_id = event_id.to_string();
        let writes = writes.to_vec();
        self.run(move |connection| {
            let transaction = connection.transaction()?;
            let updated_at = Utc::now().to_rfc3339();
            for write in &writes {
                let written = transaction.execute(
                    "INSERT INTO event_date_answers
                       (event_id, event_date_id, user_id, available, updated_at)
                     SELECT event_id, id, ?3, ?4, ?5 FROM event_dates
                     WHERE id = ?2 AND event_id = ?1
                     ON CONFLICT(event_id, event_date_id, user_id) DO UPDATE SET
                       available = excluded.available,
                       updated_at = excluded.updated_at",
                    params![event_id, write.event_date_id, user_id, write.available, updated_at],
                )?;
                if written == 0 {
                    return Err(InfraError::BatchWrite(format!(
                        "event date {} does not belong to event {}",
                        write.event_date_id, event_id
                    )));
                }
            }
            transaction.commit()?;
            Ok(writes.len())
        })
        .await
    }
}

#[derive(Debug, Clone)]
struct StoredEvent {
    title: String,
    finalized: bool,
    dates: Vec<EventDate>,
    answers: HashMap<(String, String), bool>,
}

/// Process-local event store. Also used as the seedable collaborator in tests.
#[derive(Debug, Default)]
pub struct InMemoryEventAnswerStore {
    events: Mutex<HashMap<String, StoredEvent>>,
    overrides: Mutex<HashSet<AvailabilityOverride>>,
}

impl InMemoryEventAnswerStore {
    fn lock_events(&self) -> Result<MutexGuard<'_, HashMap<String, StoredEvent>>, InfraError> {
        self.events
            .lock()
            .map_err(|error| {
                InfraError::InvalidConfig(format!("event store lock poisoned: {error}"))
            })
    }

    fn lock_overrides(&self) -> Result<MutexGuard<'_, HashSet<AvailabilityOverride>>, InfraError> {
        self.overrides
            .lock()
            .map_err(|error| {
                InfraError::InvalidConfig(format!("override store lock poisoned: {error}"))
            })
    }

    pub fn insert_event(
        &self,
        event_id: &str,
        title: &str,
        dates: Vec<EventDate>,
    ) -> Result<(), InfraError> {
        let mut events = self.lock_events()?;
        events.insert(
            event_id.to_string(),
            StoredEvent {
                title: title.to_string(),
                finalized: false,
                dates,
                answers: HashMap::new(),
            },
        );
        Ok(())
    }

    pub fn set_finalized(&self, event_id: &str, finalized: bool) -> Result<(), InfraError> {
        let mut events = self.lock_events()?;
        let event = events
            .get_mut(event_id)
            .ok_or_else(|| InfraError::NotFound(event_id.to_string()))?;
        event.finalized = finalized;
        Ok(())
    }

    pub fn set_answer(
        &self,
        user_id: &str,
        event_id: &str,
        event_date_id: &str,
        available: bool,
    ) -> Result<(), InfraError> {
        let mut events = self.lock_events()?;
        let event = events
            .get_mut(event_id)
            .ok_or_else(|| InfraError::NotFound(event_id.to_string()))?;
        if !event.dates.iter().any(|date| date.id == event_date_id) {
            return Err(InfraError::NotFound(event_date_id.to_string()));
        }
        event
            .answers
            .insert((user_id.to_string(), event_date_id.to_string()), available);
        Ok(())
    }

    /// Deletes one answer together with its override.
    pub fn remove_answer(
        &self,
        user_id: &str,
        event_id: &str,
        event_date_id: &str,
    ) -> Result<(), InfraError> {
        {
            let mut events = self.lock_events()?;
            if let Some(event) = events.get_mut(event_id) {
                event
                    .answers
                    .remove(&(user_id.to_string(), event_date_id.to_string()));
            }
        }
        let mut overrides = self.lock_overrides()?;
        overrides.remove(&AvailabilityOverride {
            user_id: user_id.to_string(),
            event_id: event_id.to_string(),
            event_date_id: event_date_id.to_string(),
        });
        Ok(())
    }

    fn participant_view(event_id: &str, event: &StoredEvent, user_id: &str) -> ParticipantEvent {
        ParticipantEvent {
            id: event_id.to_string(),
            title: event.title.clone(),
            finalized: event.finalized,
            dates: event.dates.clone(),
            answers: event
                .answers
                .iter()
                .filter(|((owner, _), _)| owner == user_id)
                .map(|((_, date_id), available)| (date_id.clone(), *available))
                .collect(),
        }
    }
}

#[async_trait]
impl EventAnswerStore for InMemoryEventAnswerStore {
    async fn list_answered_events(
        &self,
        user_id: &str,
    ) -> Result<Vec<ParticipantEvent>, InfraError> {
        let events = self.lock_events()?;
        let mut answered = events
            .iter()
            .map(|(event_id, event)| Self::participant_view(event_id, event, user_id))
            .filter(|event| !event.answers.is_empty())
            .collect::<Vec<_>>();
        answered.sort_by(|left, right| left.id.cmp(&right.id));
        Ok(answered)
    }

    async fn load_event(
        &self,
        user_id: &str,
        event_id: &str,
    ) -> Result<Option<ParticipantEvent>, InfraError> {
        let events = self.lock_events()?;
        Ok(events
            .get(event_id)
            .map(|event| Self::participant_view(event_id, event, user_id)))
    }

    async fn list_overrides(
        &self,
        user_id: &str,
        event_id: &str,
    ) -> Result<HashSet<String>, InfraError> {
        let overrides = self.lock_overrides()?;
        Ok(overrides
            .iter()
            .filter(|entry| entry.user_id == user_id && entry.event_id == event_id)
            .map(|entry| entry.event_date_id.clone())
            .collect())
    }

    async fn replace_overrides(
        &self,
        user_id: &str,
        event_id: &str,
        event_date_ids: &[String],
    ) -> Result<usize, InfraError> {
        let mut overrides = self.lock_overrides()?;
        overrides.retain(|entry| !(entry.user_id == user_id && entry.event_id == event_id));
        for event_date_id in event_date_ids {
            overrides.insert(AvailabilityOverride {
                user_id: user_id.to_string(),
                event_id: event_id.to_string(),
                event_date_id: event_date_id.clone(),
            });
        }
        Ok(overrides
            .iter()
            .filter(|entry| entry.user_id == user_id && entry.event_id == event_id)
            .count())
    }

    async fn write_answers(
        &self,
        user_id: &str,
        event_id: &str,
        writes: &[AnswerWrite],
    ) -> Result<usize, InfraError> {
        let mut events = self.lock_events()?;
        let event = events
            .get_mut(event_id)
            .ok_or_else(|| InfraError::BatchWrite(format!("event {event_id} does not exist")))?;
        if let Some(unknown) = writes
            .iter()
            .find(|write| !event.dates.iter().any(|date| date.id == write.event_date_id))
        {
            return Err(InfraError::BatchWrite(format!(
                "event date {} does not belong to event {}",
                unknown.event_date_id, event_id
            )));
        }
        for write in writes {
            event.answers.insert(
                (user_id.to_string(), write.event_date_id.clone()),
                write.available,
            );
        }
        Ok(writes.len())
    }
}
