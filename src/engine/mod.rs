mod compact;
mod error;
mod lifecycle;
mod occupancy;
mod queries;
mod slots;

pub use error::EngineError;
pub use lifecycle::{Action, COMPLETION_GRACE_HOURS, NewBooking, next_status};
pub use occupancy::{booking_marks, exclude_marked, free_windows, occupied_marks};
pub use slots::WindowPatch;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{OwnedRwLockWriteGuard, RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::catalog::OfferingCatalog;
use crate::clock::Clock;
use crate::limits::MAX_PROVIDERS;
use crate::model::*;
use crate::notify::{Notice, NotifyHub};
use crate::wal::Wal;

pub type SharedProviderState = Arc<RwLock<ProviderState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    /// Swap in `events` only if nothing was appended after `position`;
    /// replies `Ok(false)` when the snapshot went stale.
    Compact {
        events: Vec<Event>,
        position: u64,
        response: oneshot::Sender<io::Result<bool>>,
    },
    Position {
        response: oneshot::Sender<u64>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type Pending = (Event, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL and batches appends for group commit:
/// block for the first append, drain whatever else is already queued, then
/// one fsync for the lot.
async fn wal_writer_loop(mut wal: Wal<Event>, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }
                commit_batch(&mut wal, &mut batch);
                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn commit_batch(wal: &mut Wal<Event>, batch: &mut Vec<Pending>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!("WAL flush failed for {} events: {e}", batch.len());
    }
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal<Event>, batch: &[Pending]) -> io::Result<()> {
    let mut append_err = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even after a failed append so half-buffered bytes don't leak
    // into the next batch.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn handle_non_append(wal: &mut Wal<Event>, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, position, response } => {
            if wal.appends_total() != position {
                let _ = response.send(Ok(false));
                return;
            }
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file())
                .map(|()| true);
            let _ = response.send(result);
        }
        WalCommand::Position { response } => {
            let _ = response.send(wal.appends_total());
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the caller"),
    }
}

/// Scheduling engine: per-provider window inventory and booking records,
/// each provider behind its own write lock.
pub struct Engine {
    pub state: DashMap<Ulid, SharedProviderState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) catalog: Arc<dyn OfferingCatalog>,
    /// Reverse lookup: window/booking id → provider id.
    pub(super) entity_to_provider: DashMap<Ulid, Ulid>,
}

fn set_window_state(ps: &mut ProviderState, window_id: Option<Ulid>, state: WindowState) {
    if let Some(w) = window_id.and_then(|id| ps.window_mut(id)) {
        w.state = state;
    }
}

/// Apply an event to a provider's state (caller holds the lock).
fn apply_to_provider(ps: &mut ProviderState, event: &Event, entity_map: &DashMap<Ulid, Ulid>) {
    match event {
        Event::WindowDeclared { id, provider_id, date, range, state, note } => {
            ps.insert_window(AvailabilityWindow {
                id: *id,
                provider_id: *provider_id,
                date: *date,
                range: *range,
                state: *state,
                note: note.clone(),
            });
            entity_map.insert(*id, *provider_id);
        }
        Event::WindowUpdated { id, range, state, note, .. } => {
            // Re-insert so the (date, start) ordering holds after a start change.
            if let Some(mut w) = ps.remove_window(*id) {
                w.range = *range;
                w.state = *state;
                w.note = note.clone();
                ps.insert_window(w);
            }
        }
        Event::WindowRemoved { id, .. } => {
            ps.remove_window(*id);
            entity_map.remove(id);
        }
        Event::BookingRequested {
            id,
            client_id,
            provider_id,
            offering_id,
            design_id,
            requested_at,
            price,
            notes,
            created_at,
        } => {
            ps.bookings.push(Booking {
                id: *id,
                client_id: *client_id,
                provider_id: *provider_id,
                offering_id: *offering_id,
                design_id: *design_id,
                requested_at: *requested_at,
                proposed_at: None,
                confirmed_at: None,
                status: BookingStatus::Pending,
                responded_at: None,
                completed_at: None,
                completed_by: None,
                price: *price,
                client_notes: notes.clone(),
                provider_notes: None,
                rating: None,
                created_at: *created_at,
                occupied_window: None,
            });
            entity_map.insert(*id, *provider_id);
        }
        Event::BookingConfirmed { id, confirmed_at, responded_at, window_id, .. } => {
            if let Some(b) = ps.booking_mut(*id) {
                b.status = BookingStatus::Confirmed;
                b.confirmed_at = Some(*confirmed_at);
                b.responded_at = Some(*responded_at);
                b.occupied_window = *window_id;
            }
            set_window_state(ps, *window_id, WindowState::Occupied);
        }
        Event::AlternativeProposed { id, proposed_at, responded_at, .. } => {
            if let Some(b) = ps.booking_mut(*id) {
                b.status = BookingStatus::AlternativeProposed;
                b.proposed_at = Some(*proposed_at);
                b.responded_at = Some(*responded_at);
            }
        }
        Event::AlternativeAccepted { id, confirmed_at, window_id, .. } => {
            if let Some(b) = ps.booking_mut(*id) {
                b.status = BookingStatus::Confirmed;
                b.confirmed_at = Some(*confirmed_at);
                b.occupied_window = *window_id;
            }
            set_window_state(ps, *window_id, WindowState::Occupied);
        }
        Event::BookingDeclined { id, responded_at, notes, .. } => {
            if let Some(b) = ps.booking_mut(*id) {
                b.status = BookingStatus::Declined;
                b.responded_at = Some(*responded_at);
                b.provider_notes = notes.clone();
            }
        }
        Event::BookingCancelled { id, released_window, .. } => {
            if let Some(b) = ps.booking_mut(*id) {
                b.status = BookingStatus::Cancelled;
                b.occupied_window = None;
            }
            set_window_state(ps, *released_window, WindowState::Available);
        }
        Event::BookingCompleted { id, completed_at, completed_by, notes, rating, .. } => {
            if let Some(b) = ps.booking_mut(*id) {
                b.status = BookingStatus::Completed;
                b.completed_at = Some(*completed_at);
                b.completed_by = Some(*completed_by);
                if notes.is_some() {
                    b.provider_notes = notes.clone();
                }
                b.rating = *rating;
            }
        }
        Event::BookingTimedOut { id, .. } => {
            if let Some(b) = ps.booking_mut(*id) {
                b.status = BookingStatus::TimedOut;
            }
        }
    }
}

/// Booking an event refers to, if any.
fn event_booking_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::BookingRequested { id, .. }
        | Event::BookingConfirmed { id, .. }
        | Event::AlternativeProposed { id, .. }
        | Event::AlternativeAccepted { id, .. }
        | Event::BookingDeclined { id, .. }
        | Event::BookingCancelled { id, .. }
        | Event::BookingCompleted { id, .. }
        | Event::BookingTimedOut { id, .. } => Some(*id),
        Event::WindowDeclared { .. } | Event::WindowUpdated { .. } | Event::WindowRemoved { .. } => {
            None
        }
    }
}

impl Engine {
    pub fn new(
        wal_path: PathBuf,
        notify: Arc<NotifyHub>,
        clock: Arc<dyn Clock>,
        catalog: Arc<dyn OfferingCatalog>,
    ) -> io::Result<Self> {
        let events = Wal::<Event>::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            state: DashMap::new(),
            wal_tx,
            notify,
            clock,
            catalog,
            entity_to_provider: DashMap::new(),
        };

        // Sole owner of every lock during replay, so try_write never contends.
        // Never block here: this may run inside an async context.
        for event in &events {
            let provider_id = event.provider_id();
            let ps = engine
                .state
                .entry(provider_id)
                .or_insert_with(|| Arc::new(RwLock::new(ProviderState::new(provider_id))))
                .clone();
            let mut guard = ps.try_write().expect("replay: uncontended write");
            apply_to_provider(&mut guard, event, &engine.entity_to_provider);
        }
        if !events.is_empty() {
            tracing::info!(
                "replayed {} events for {} providers",
                events.len(),
                engine.state.len()
            );
        }

        Ok(engine)
    }

    pub fn now(&self) -> chrono::NaiveDateTime {
        self.clock.now()
    }

    pub fn catalog(&self) -> &dyn OfferingCatalog {
        self.catalog.as_ref()
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_provider(&self, id: &Ulid) -> Option<SharedProviderState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    pub fn get_provider_for_entity(&self, entity_id: &Ulid) -> Option<Ulid> {
        self.entity_to_provider.get(entity_id).map(|e| *e.value())
    }

    /// Provider state, created empty on first write.
    pub(super) fn provider_or_insert(&self, id: Ulid) -> Result<SharedProviderState, EngineError> {
        if let Some(ps) = self.get_provider(&id) {
            return Ok(ps);
        }
        if self.state.len() >= MAX_PROVIDERS {
            return Err(EngineError::LimitExceeded("too many providers"));
        }
        Ok(self
            .state
            .entry(id)
            .or_insert_with(|| Arc::new(RwLock::new(ProviderState::new(id))))
            .clone())
    }

    /// WAL-append, apply, then announce. Nothing is applied unless the
    /// append is durable; announcing can't fail.
    pub(super) async fn persist_and_apply(
        &self,
        ps: &mut ProviderState,
        event: Event,
    ) -> Result<(), EngineError> {
        self.wal_append(&event).await?;
        apply_to_provider(ps, &event, &self.entity_to_provider);
        let client_id = event_booking_id(&event)
            .and_then(|id| ps.booking(id))
            .map(|b| b.client_id);
        metrics::counter!(crate::observability::EVENTS_COMMITTED_TOTAL, "kind" => event.kind())
            .increment(1);
        self.notify.send(Notice {
            provider_id: ps.id,
            client_id,
            event,
        });
        Ok(())
    }

    /// Lookup entity → provider, then take that provider's write lock.
    pub(super) async fn resolve_entity_write(
        &self,
        entity_id: &Ulid,
    ) -> Result<(Ulid, OwnedRwLockWriteGuard<ProviderState>), EngineError> {
        let provider_id = self
            .get_provider_for_entity(entity_id)
            .ok_or(EngineError::NotFound(*entity_id))?;
        let ps = self
            .get_provider(&provider_id)
            .ok_or(EngineError::NotFound(provider_id))?;
        let guard = ps.write_owned().await;
        Ok((provider_id, guard))
    }
}
