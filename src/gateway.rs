use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use tracing::debug;
use ulid::Ulid;

use crate::engine::{Engine, EngineError, NewBooking, WindowPatch};
use crate::model::*;

/// Provider's answer to a PENDING request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderResponse {
    Confirm,
    ProposeAlternative(NaiveDateTime),
    Decline(Option<String>),
}

/// Every later move on a booking that isn't the provider's first answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    AcceptAlternative,
    Cancel,
    Complete { notes: Option<String>, rating: Option<u8> },
    Timeout,
}

/// Entry point for callers. Every booking path goes through the engine's
/// per-provider write lock, which is what keeps two bookings off the same
/// hour marks.
#[derive(Clone)]
pub struct ScheduleGateway {
    engine: Arc<Engine>,
}

impl ScheduleGateway {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    // ── Windows ──────────────────────────────────────────────

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
        self.engine
            .declare_window(actor, id, provider_id, date, start, end, state, note)
            .await
    }

    pub async fn update_window(
        &self,
        actor: &Actor,
        id: Ulid,
        patch: WindowPatch,
    ) -> Result<AvailabilityWindow, EngineError> {
        self.engine.update_window(actor, id, patch).await
    }

    pub async fn remove_window(&self, actor: &Actor, id: Ulid) -> Result<(), EngineError> {
        let provider_id = self.engine.remove_window(actor, id).await?;
        debug!("provider {provider_id} removed window {id}");
        Ok(())
    }

    pub async fn list_windows(
        &self,
        provider_id: Ulid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<AvailabilityWindow>, EngineError> {
        self.engine.list_windows(provider_id, from, to).await
    }

    /// Windows a client could book on `[from, to]`.
    pub async fn get_availability(
        &self,
        provider_id: Ulid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<AvailabilityWindow>, EngineError> {
        self.engine.compute_availability(provider_id, from, to).await
    }

    // ── Bookings ─────────────────────────────────────────────

    pub async fn request_booking(&self, actor: &Actor, req: NewBooking) -> Result<Booking, EngineError> {
        self.engine.create_booking(actor, req).await
    }

    pub async fn respond_to_booking(
        &self,
        actor: &Actor,
        id: Ulid,
        response: ProviderResponse,
    ) -> Result<Booking, EngineError> {
        match response {
            ProviderResponse::Confirm => self.engine.confirm_booking(actor, id).await,
            ProviderResponse::ProposeAlternative(at) => {
                self.engine.propose_alternative(actor, id, at).await
            }
            ProviderResponse::Decline(notes) => self.engine.decline_booking(actor, id, notes).await,
        }
    }

    pub async fn resolve_booking(
        &self,
        actor: &Actor,
        id: Ulid,
        resolution: Resolution,
    ) -> Result<Booking, EngineError> {
        match resolution {
            Resolution::AcceptAlternative => self.engine.accept_alternative(actor, id).await,
            Resolution::Cancel => self.engine.cancel_booking(actor, id).await,
            Resolution::Complete { notes, rating } => {
                self.engine.complete_booking(actor, id, notes, rating).await
            }
            Resolution::Timeout => self.engine.time_out_booking(actor, id).await,
        }
    }

    pub async fn get_booking(&self, actor: &Actor, id: Ulid) -> Result<Booking, EngineError> {
        self.engine.get_booking(actor, id).await
    }

    pub async fn list_bookings_for_provider(
        &self,
        actor: &Actor,
        provider_id: Ulid,
    ) -> Result<Vec<Booking>, EngineError> {
        self.engine.bookings_for_provider(actor, provider_id).await
    }

    pub async fn list_bookings_for_client(
        &self,
        actor: &Actor,
        client_id: Ulid,
    ) -> Result<Vec<Booking>, EngineError> {
        self.engine.bookings_for_client(actor, client_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MemoryCatalog;
    use crate::clock::ManualClock;
    use crate::notify::NotifyHub;
    use std::path::PathBuf;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("slotd_test_gateway");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 10).unwrap()
    }

    struct Setup {
        gateway: ScheduleGateway,
        clock: Arc<ManualClock>,
        provider: Actor,
        client: Actor,
        offering: Ulid,
    }

    fn setup(name: &str) -> Setup {
        let provider = Actor::provider(Ulid::new());
        let offering = Ulid::new();
        let catalog = Arc::new(MemoryCatalog::new());
        catalog.insert_offering(ServiceOffering {
            id: offering,
            provider_id: provider.id,
            duration_minutes: 90,
            price: 6000,
            active: true,
        });
        let clock = Arc::new(ManualClock::new(day().pred_opt().unwrap().and_time(t(12, 0))));
        let engine = Engine::new(test_wal_path(name), Arc::new(NotifyHub::new()), clock.clone(), catalog)
            .unwrap();
        Setup {
            gateway: ScheduleGateway::new(Arc::new(engine)),
            clock,
            provider,
            client: Actor::client(Ulid::new()),
            offering,
        }
    }

    async fn request(s: &Setup, h: u32) -> Booking {
        s.gateway
            .request_booking(
                &s.client,
                NewBooking {
                    id: Ulid::new(),
                    provider_id: s.provider.id,
                    offering_id: s.offering,
                    requested_at: day().and_time(t(h, 0)),
                    design_id: None,
                    notes: None,
                },
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn full_booking_round_trip() {
        let s = setup("round_trip.wal");
        for h in [9, 10, 11] {
            s.gateway
                .declare_window(&s.provider, Ulid::new(), s.provider.id, day(), t(h, 0), t(h + 1, 0), WindowState::Available, None)
                .await
                .unwrap();
        }

        let b = request(&s, 9).await;
        let mut rx = s.gateway.engine().notify.subscribe(s.provider.id);
        let b = s
            .gateway
            .respond_to_booking(&s.provider, b.id, ProviderResponse::Confirm)
            .await
            .unwrap();
        assert_eq!(b.status, BookingStatus::Confirmed);
        let notice = rx.recv().await.unwrap();
        assert!(matches!(notice.event, Event::BookingConfirmed { id, .. } if id == b.id));
        assert_eq!(notice.client_id, Some(s.client.id));

        let free = s.gateway.get_availability(s.provider.id, day(), day()).await.unwrap();
        assert_eq!(free.iter().map(|w| w.range.start).collect::<Vec<_>>(), vec![t(11, 0)]);

        s.clock.set(day().and_time(t(11, 0)));
        let b = s
            .gateway
            .resolve_booking(&s.provider, b.id, Resolution::Complete { notes: None, rating: Some(5) })
            .await
            .unwrap();
        assert_eq!(b.status, BookingStatus::Completed);

        let listed = s.gateway.list_bookings_for_client(&s.client, s.client.id).await.unwrap();
        assert_eq!(listed, vec![b]);
    }

    #[tokio::test]
    async fn propose_accept_and_decline_paths() {
        let s = setup("propose_decline.wal");
        let moved = request(&s, 9).await;
        s.gateway
            .respond_to_booking(&s.provider, moved.id, ProviderResponse::ProposeAlternative(day().and_time(t(15, 0))))
            .await
            .unwrap();
        let moved = s
            .gateway
            .resolve_booking(&s.client, moved.id, Resolution::AcceptAlternative)
            .await
            .unwrap();
        assert_eq!(moved.confirmed_at, Some(day().and_time(t(15, 0))));

        let refused = request(&s, 12).await;
        let refused = s
            .gateway
            .respond_to_booking(&s.provider, refused.id, ProviderResponse::Decline(Some("away".into())))
            .await
            .unwrap();
        assert_eq!(refused.status, BookingStatus::Declined);

        let r = s.gateway.resolve_booking(&s.client, refused.id, Resolution::Timeout).await;
        assert!(matches!(r, Err(EngineError::Forbidden(_))));
        let r = s
            .gateway
            .resolve_booking(&Actor::system(), refused.id, Resolution::Timeout)
            .await;
        assert!(matches!(r, Err(EngineError::InvalidTransition { .. })));
    }

    #[tokio::test]
    async fn window_edits_through_gateway() {
        let s = setup("window_edits.wal");
        let id = Ulid::new();
        s.gateway
            .declare_window(&s.provider, id, s.provider.id, day(), t(9, 0), t(10, 0), WindowState::Available, Some("chair 2".into()))
            .await
            .unwrap();
        let w = s
            .gateway
            .update_window(&s.provider, id, WindowPatch { end: Some(t(10, 30)), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(w.range.end, t(10, 30));
        assert_eq!(w.note.as_deref(), Some("chair 2"));

        s.gateway.remove_window(&s.provider, id).await.unwrap();
        assert!(s.gateway.list_windows(s.provider.id, day(), day()).await.unwrap().is_empty());
    }
}
