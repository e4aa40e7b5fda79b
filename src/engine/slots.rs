use chrono::{NaiveDate, NaiveTime};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{Engine, EngineError};

/// Fields a provider may change on a declared window. `None` leaves the
/// field unchanged; an empty note clears it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WindowPatch {
    pub start: Option<NaiveTime>,
    pub end: Option<NaiveTime>,
    pub state: Option<WindowState>,
    pub note: Option<String>,
}

pub(crate) fn validate_range(start: NaiveTime, end: NaiveTime) -> Result<TimeRange, EngineError> {
    let (start, end) = (to_minute(start), to_minute(end));
    if start >= end {
        return Err(EngineError::InvalidRange { start, end });
    }
    Ok(TimeRange::new(start, end))
}

pub(crate) fn validate_note(note: &Option<String>) -> Result<(), EngineError> {
    match note {
        Some(n) if n.len() > MAX_NOTE_LEN => Err(EngineError::LimitExceeded("note too long")),
        _ => Ok(()),
    }
}

impl Engine {
    /// Declare a window. Only exact (date, start, end) repeats are rejected;
    /// overlapping or adjacent windows are accepted as independent units.
    #[allow(clippy::too_many_arguments)]
    pub async fn declare_window(
        &self,
        actor: &Actor,
        id: Ulid,
        provider_id: Ulid,
        date: NaiveDate,
        start: NaiveTime,
        end: NaiveTime,
        state: WindowState,
        note: Option<String>,
    ) -> Result<AvailabilityWindow, EngineError> {
        if !actor.is_provider(provider_id) {
            return Err(EngineError::Forbidden("only the provider may declare its windows"));
        }
        if state == WindowState::Occupied {
            return Err(EngineError::Forbidden("occupied state is set by bookings"));
        }
        let range = validate_range(start, end)?;
        if date < self.now().date() {
            return Err(EngineError::PastDate(date));
        }
        validate_note(&note)?;
        if self.entity_to_provider.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let ps = self.provider_or_insert(provider_id)?;
        let mut guard = ps.write().await;
        if guard.windows.len() >= MAX_WINDOWS_PER_PROVIDER {
            return Err(EngineError::LimitExceeded("too many windows for provider"));
        }
        if guard.has_identical_window(date, range, None) {
            return Err(EngineError::DuplicateWindow {
                date,
                start: range.start,
                end: range.end,
            });
        }

        let event = Event::WindowDeclared { id, provider_id, date, range, state, note: note.clone() };
        self.persist_and_apply(&mut guard, event).await?;
        tracing::info!("provider {provider_id} declared window {id} on {date} {}-{}", range.start, range.end);
        Ok(AvailabilityWindow { id, provider_id, date, range, state, note })
    }

    /// Edit a window the actor owns. Someone else's window is reported as
    /// not found.
    pub async fn update_window(
        &self,
        actor: &Actor,
        id: Ulid,
        patch: WindowPatch,
    ) -> Result<AvailabilityWindow, EngineError> {
        let (provider_id, mut guard) = self.resolve_entity_write(&id).await?;
        let current = guard.window(id).cloned().ok_or(EngineError::NotFound(id))?;
        if !actor.is_provider(provider_id) {
            return Err(EngineError::NotFound(id));
        }

        let range = validate_range(
            patch.start.unwrap_or(current.range.start),
            patch.end.unwrap_or(current.range.end),
        )?;
        let state = patch.state.unwrap_or(current.state);
        // An occupied window keeps its booking's time; only the note may change.
        if current.state == WindowState::Occupied && (state != current.state || range != current.range) {
            return Err(EngineError::WindowOccupied(id));
        }
        if state != current.state {
            if state == WindowState::Occupied {
                return Err(EngineError::Forbidden("occupied state is set by bookings"));
            }
        }
        let note = match patch.note {
            Some(n) if n.is_empty() => None,
            Some(n) => Some(n),
            None => current.note.clone(),
        };
        validate_note(&note)?;
        if guard.has_identical_window(current.date, range, Some(id)) {
            return Err(EngineError::DuplicateWindow {
                date: current.date,
                start: range.start,
                end: range.end,
            });
        }

        let event = Event::WindowUpdated { id, provider_id, range, state, note: note.clone() };
        self.persist_and_apply(&mut guard, event).await?;
        Ok(AvailabilityWindow { range, state, note, ..current })
    }

    /// Delete a window. Occupied windows are only released through their
    /// booking.
    pub async fn remove_window(&self, actor: &Actor, id: Ulid) -> Result<Ulid, EngineError> {
        let (provider_id, mut guard) = self.resolve_entity_write(&id).await?;
        let window = guard.window(id).ok_or(EngineError::NotFound(id))?;
        if !actor.is_provider(provider_id) {
            return Err(EngineError::NotFound(id));
        }
        if window.state == WindowState::Occupied {
            return Err(EngineError::WindowOccupied(id));
        }

        let event = Event::WindowRemoved { id, provider_id };
        self.persist_and_apply(&mut guard, event).await?;
        Ok(provider_id)
    }
}
