use tokio::sync::oneshot;

use crate::model::*;

use super::{Engine, EngineError, WalCommand};

/// Events that rebuild one booking: its request plus the transitions that
/// reach its current status.
fn booking_events(b: &Booking) -> Vec<Event> {
    let mut events = vec![Event::BookingRequested {
        id: b.id,
        client_id: b.client_id,
        provider_id: b.provider_id,
        offering_id: b.offering_id,
        design_id: b.design_id,
        requested_at: b.requested_at,
        price: b.price,
        notes: b.client_notes.clone(),
        created_at: b.created_at,
    }];
    let responded_at = b.responded_at.unwrap_or(b.created_at);

    if let Some(proposed_at) = b.proposed_at {
        events.push(Event::AlternativeProposed {
            id: b.id,
            provider_id: b.provider_id,
            proposed_at,
            responded_at,
        });
    }
    if let Some(confirmed_at) = b.confirmed_at {
        // A proposal is only ever confirmed by the client accepting it.
        if b.proposed_at.is_some() {
            events.push(Event::AlternativeAccepted {
                id: b.id,
                provider_id: b.provider_id,
                confirmed_at,
                window_id: b.occupied_window,
            });
        } else {
            events.push(Event::BookingConfirmed {
                id: b.id,
                provider_id: b.provider_id,
                confirmed_at,
                responded_at,
                window_id: b.occupied_window,
            });
        }
    }

    match b.status {
        BookingStatus::Pending | BookingStatus::AlternativeProposed | BookingStatus::Confirmed => {}
        BookingStatus::Declined => events.push(Event::BookingDeclined {
            id: b.id,
            provider_id: b.provider_id,
            responded_at,
            notes: b.provider_notes.clone(),
        }),
        BookingStatus::TimedOut => events.push(Event::BookingTimedOut {
            id: b.id,
            provider_id: b.provider_id,
        }),
        BookingStatus::Cancelled => events.push(Event::BookingCancelled {
            id: b.id,
            provider_id: b.provider_id,
            released_window: None,
        }),
        BookingStatus::Completed => events.push(Event::BookingCompleted {
            id: b.id,
            provider_id: b.provider_id,
            completed_at: b.completed_at.unwrap_or(responded_at),
            completed_by: b.completed_by.unwrap_or(b.provider_id),
            notes: b.provider_notes.clone(),
            rating: b.rating,
        }),
    }
    events
}

/// Minimal event log for one provider. Bookings go first so that the
/// window declarations that follow carry each window's final state.
pub(super) fn provider_events(ps: &ProviderState) -> Vec<Event> {
    let mut events: Vec<Event> = ps.bookings.iter().flat_map(booking_events).collect();
    events.extend(ps.windows.iter().map(|w| Event::WindowDeclared {
        id: w.id,
        provider_id: w.provider_id,
        date: w.date,
        range: w.range,
        state: w.state,
        note: w.note.clone(),
    }));
    events
}

impl Engine {
    /// Rewrite the WAL as the smallest event set recreating current state.
    /// Returns `false` when a commit landed mid-snapshot and the log was
    /// left as it was; the next pass retries.
    pub async fn compact_wal(&self) -> Result<bool, EngineError> {
        let position = self.wal_position().await?;
        let events = self.snapshot_events().await;
        let count = events.len();
        let swapped = self.swap_in_snapshot(events, position).await?;
        if swapped {
            tracing::info!("compacted WAL to {count} events");
        } else {
            tracing::debug!("WAL compaction skipped: appends during snapshot");
        }
        Ok(swapped)
    }

    /// Records appended so far. A mutation whose append precedes this
    /// position has also been applied once its provider lock is free.
    pub(super) async fn wal_position(&self) -> Result<u64, EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Position { response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))
    }

    pub(super) async fn snapshot_events(&self) -> Vec<Event> {
        let providers: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut events = Vec::new();
        for ps in providers {
            let guard = ps.read().await;
            events.extend(provider_events(&guard));
        }
        events
    }

    pub(super) async fn swap_in_snapshot(
        &self,
        events: Vec<Event>,
        position: u64,
    ) -> Result<bool, EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, position, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
