use chrono::{Duration, NaiveDateTime, NaiveTime};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::occupancy::{booking_marks, exclude_marked, occupied_marks, occupies};
use super::slots::validate_note;
use super::{Engine, EngineError};

/// How long after the appointment a provider may still mark it complete.
pub const COMPLETION_GRACE_HOURS: i64 = 24;

/// A booking state-machine edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Confirm,
    ProposeAlternative,
    AcceptAlternative,
    Decline,
    Cancel,
    Complete,
    Timeout,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Confirm => "confirm",
            Action::ProposeAlternative => "propose",
            Action::AcceptAlternative => "accept",
            Action::Decline => "decline",
            Action::Cancel => "cancel",
            Action::Complete => "complete",
            Action::Timeout => "timeout",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "confirm" => Some(Action::Confirm),
            "propose" | "propose_alternative" => Some(Action::ProposeAlternative),
            "accept" | "accept_alternative" => Some(Action::AcceptAlternative),
            "decline" => Some(Action::Decline),
            "cancel" => Some(Action::Cancel),
            "complete" => Some(Action::Complete),
            "timeout" => Some(Action::Timeout),
            _ => None,
        }
    }
}

/// The booking state machine. `None` means the edge does not exist.
pub fn next_status(from: BookingStatus, action: Action) -> Option<BookingStatus> {
    use BookingStatus::*;
    match (from, action) {
        (Pending, Action::Confirm) => Some(Confirmed),
        (Pending, Action::ProposeAlternative) => Some(AlternativeProposed),
        (Pending, Action::Decline) => Some(Declined),
        (Pending, Action::Timeout) => Some(TimedOut),
        (AlternativeProposed, Action::AcceptAlternative) => Some(Confirmed),
        (Pending | AlternativeProposed | Confirmed, Action::Cancel) => Some(Cancelled),
        (Confirmed, Action::Complete) => Some(Completed),
        _ => None,
    }
}

/// Which party a transition belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Party {
    Provider,
    Client,
    System,
}

fn party(action: Action) -> Party {
    match action {
        Action::Confirm | Action::ProposeAlternative | Action::Decline | Action::Complete => {
            Party::Provider
        }
        Action::AcceptAlternative | Action::Cancel => Party::Client,
        Action::Timeout => Party::System,
    }
}

/// Authorization first, then the status guard.
fn check_transition(actor: &Actor, booking: &Booking, action: Action) -> Result<(), EngineError> {
    let allowed = match party(action) {
        Party::Provider => actor.is_provider(booking.provider_id),
        Party::Client => actor.is_client(booking.client_id),
        Party::System => actor.role == Role::System,
    };
    if !allowed {
        return Err(EngineError::Forbidden(match party(action) {
            Party::Provider => "only the booking's provider may do this",
            Party::Client => "only the booking's client may do this",
            Party::System => "only the scheduler may do this",
        }));
    }
    if next_status(booking.status, action).is_none() {
        return Err(EngineError::InvalidTransition {
            id: booking.id,
            from: booking.status,
            action: action.as_str(),
        });
    }
    Ok(())
}

/// Request parameters for a new booking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBooking {
    pub id: Ulid,
    pub provider_id: Ulid,
    pub offering_id: Ulid,
    pub requested_at: NaiveDateTime,
    pub design_id: Option<Ulid>,
    pub notes: Option<String>,
}

impl Engine {
    /// Re-check, under the provider lock, that `at` is still free for
    /// `booking`. Returns the window the booking will occupy.
    fn claim_slot(
        &self,
        ps: &ProviderState,
        booking: &Booking,
        at: NaiveDateTime,
    ) -> Result<Option<Ulid>, EngineError> {
        let duration = self
            .catalog
            .offering(&booking.offering_id)
            .map(|o| o.duration_minutes);
        let wanted = occupied_marks(at.time(), duration);
        let held: Vec<NaiveTime> = ps
            .bookings
            .iter()
            .filter(|b| b.id != booking.id && occupies(b.status))
            .filter(|b| b.confirmed_at.is_some_and(|c| c.date() == at.date()))
            .flat_map(|b| booking_marks(b, self.catalog()))
            .collect();
        if wanted.iter().any(|m| held.contains(m)) {
            return Err(EngineError::SlotNoLongerAvailable(at));
        }
        // A window holding any mark is spent as a whole, the same way
        // availability hides it.
        let day_windows: Vec<&AvailabilityWindow> = ps.windows_between(at.date(), at.date()).collect();
        let open = exclude_marked(day_windows.iter().copied(), &held);
        let spent = day_windows
            .iter()
            .filter(|w| !open.iter().any(|o| o.id == w.id))
            .any(|w| wanted.iter().any(|m| w.range.contains(*m)));
        if spent {
            return Err(EngineError::SlotNoLongerAvailable(at));
        }
        match ps.matching_window(at) {
            Some(w) if w.state == WindowState::Occupied => {
                Err(EngineError::SlotNoLongerAvailable(at))
            }
            Some(w) => Ok(Some(w.id)),
            None => Ok(None),
        }
    }

    fn record_transition(action: Action) {
        metrics::counter!(crate::observability::BOOKING_TRANSITIONS_TOTAL, "action" => action.as_str())
            .increment(1);
    }

    /// Client request: validated against the catalog and stored as PENDING.
    /// Nothing is reserved until the provider confirms.
    pub async fn create_booking(&self, actor: &Actor, req: NewBooking) -> Result<Booking, EngineError> {
        if actor.role != Role::Client {
            return Err(EngineError::Forbidden("only clients may request bookings"));
        }
        let offering = self
            .catalog
            .offering(&req.offering_id)
            .filter(|o| o.provider_id == req.provider_id && o.active)
            .ok_or(EngineError::NotFound(req.offering_id))?;
        let surcharge = match req.design_id {
            Some(design) => self
                .catalog
                .design_surcharge(&design)
                .ok_or(EngineError::NotFound(design))?,
            None => 0,
        };
        let requested_at = req.requested_at.date().and_time(to_minute(req.requested_at.time()));
        let now = self.now();
        if requested_at < now {
            return Err(EngineError::PastDate(requested_at.date()));
        }
        validate_note(&req.notes)?;
        if self.entity_to_provider.contains_key(&req.id) {
            return Err(EngineError::AlreadyExists(req.id));
        }

        let ps = self.provider_or_insert(req.provider_id)?;
        let mut guard = ps.write().await;
        if guard.bookings.len() >= MAX_BOOKINGS_PER_PROVIDER {
            return Err(EngineError::LimitExceeded("too many bookings for provider"));
        }
        if guard
            .matching_window(requested_at)
            .is_some_and(|w| w.state == WindowState::Occupied)
        {
            return Err(EngineError::SlotNoLongerAvailable(requested_at));
        }

        let event = Event::BookingRequested {
            id: req.id,
            client_id: actor.id,
            provider_id: req.provider_id,
            offering_id: req.offering_id,
            design_id: req.design_id,
            requested_at,
            price: offering.price + surcharge,
            notes: req.notes,
            created_at: now,
        };
        self.persist_and_apply(&mut guard, event).await?;
        tracing::info!("booking {} requested with provider {} for {requested_at}", req.id, req.provider_id);
        guard.booking(req.id).cloned().ok_or(EngineError::NotFound(req.id))
    }

    /// Provider accepts the requested time; the matching window, if any,
    /// becomes occupied in the same commit.
    pub async fn confirm_booking(&self, actor: &Actor, id: Ulid) -> Result<Booking, EngineError> {
        let (provider_id, mut guard) = self.resolve_entity_write(&id).await?;
        let booking = guard.booking(id).cloned().ok_or(EngineError::NotFound(id))?;
        check_transition(actor, &booking, Action::Confirm)?;
        let at = booking.requested_at;
        let window_id = self.claim_slot(&guard, &booking, at)?;

        let event = Event::BookingConfirmed {
            id,
            provider_id,
            confirmed_at: at,
            responded_at: self.now(),
            window_id,
        };
        self.persist_and_apply(&mut guard, event).await?;
        Self::record_transition(Action::Confirm);
        tracing::info!("booking {id} confirmed for {at}");
        guard.booking(id).cloned().ok_or(EngineError::NotFound(id))
    }

    /// Provider counter-proposes another time. Nothing is occupied yet.
    pub async fn propose_alternative(
        &self,
        actor: &Actor,
        id: Ulid,
        proposed_at: NaiveDateTime,
    ) -> Result<Booking, EngineError> {
        let (provider_id, mut guard) = self.resolve_entity_write(&id).await?;
        let booking = guard.booking(id).cloned().ok_or(EngineError::NotFound(id))?;
        check_transition(actor, &booking, Action::ProposeAlternative)?;
        let proposed_at = proposed_at.date().and_time(to_minute(proposed_at.time()));
        let now = self.now();
        if proposed_at < now {
            return Err(EngineError::PastDate(proposed_at.date()));
        }

        let event = Event::AlternativeProposed { id, provider_id, proposed_at, responded_at: now };
        self.persist_and_apply(&mut guard, event).await?;
        Self::record_transition(Action::ProposeAlternative);
        guard.booking(id).cloned().ok_or(EngineError::NotFound(id))
    }

    /// Requesting client takes the proposed time.
    pub async fn accept_alternative(&self, actor: &Actor, id: Ulid) -> Result<Booking, EngineError> {
        let (provider_id, mut guard) = self.resolve_entity_write(&id).await?;
        let booking = guard.booking(id).cloned().ok_or(EngineError::NotFound(id))?;
        check_transition(actor, &booking, Action::AcceptAlternative)?;
        let at = booking.proposed_at.ok_or(EngineError::InvalidTransition {
            id,
            from: booking.status,
            action: Action::AcceptAlternative.as_str(),
        })?;
        let window_id = self.claim_slot(&guard, &booking, at)?;

        let event = Event::AlternativeAccepted { id, provider_id, confirmed_at: at, window_id };
        self.persist_and_apply(&mut guard, event).await?;
        Self::record_transition(Action::AcceptAlternative);
        tracing::info!("booking {id} confirmed for proposed time {at}");
        guard.booking(id).cloned().ok_or(EngineError::NotFound(id))
    }

    pub async fn decline_booking(
        &self,
        actor: &Actor,
        id: Ulid,
        notes: Option<String>,
    ) -> Result<Booking, EngineError> {
        validate_note(&notes)?;
        let (provider_id, mut guard) = self.resolve_entity_write(&id).await?;
        let booking = guard.booking(id).cloned().ok_or(EngineError::NotFound(id))?;
        check_transition(actor, &booking, Action::Decline)?;

        let event = Event::BookingDeclined { id, provider_id, responded_at: self.now(), notes };
        self.persist_and_apply(&mut guard, event).await?;
        Self::record_transition(Action::Decline);
        guard.booking(id).cloned().ok_or(EngineError::NotFound(id))
    }

    /// Client withdraws. A confirmed booking hands its window back.
    pub async fn cancel_booking(&self, actor: &Actor, id: Ulid) -> Result<Booking, EngineError> {
        let (provider_id, mut guard) = self.resolve_entity_write(&id).await?;
        let booking = guard.booking(id).cloned().ok_or(EngineError::NotFound(id))?;
        check_transition(actor, &booking, Action::Cancel)?;
        let released_window = match booking.status {
            BookingStatus::Confirmed => booking.occupied_window,
            _ => None,
        };

        let event = Event::BookingCancelled { id, provider_id, released_window };
        self.persist_and_apply(&mut guard, event).await?;
        Self::record_transition(Action::Cancel);
        tracing::info!("booking {id} cancelled");
        guard.booking(id).cloned().ok_or(EngineError::NotFound(id))
    }

    /// Provider marks the appointment done: not before it starts, and no
    /// later than a day after. The rating is stored as given.
    pub async fn complete_booking(
        &self,
        actor: &Actor,
        id: Ulid,
        notes: Option<String>,
        rating: Option<u8>,
    ) -> Result<Booking, EngineError> {
        validate_note(&notes)?;
        let (provider_id, mut guard) = self.resolve_entity_write(&id).await?;
        let booking = guard.booking(id).cloned().ok_or(EngineError::NotFound(id))?;
        check_transition(actor, &booking, Action::Complete)?;
        let appointment = booking.confirmed_at.ok_or(EngineError::InvalidTransition {
            id,
            from: booking.status,
            action: Action::Complete.as_str(),
        })?;
        let now = self.now();
        if now < appointment {
            return Err(EngineError::TooEarly { appointment });
        }
        let deadline = appointment + Duration::hours(COMPLETION_GRACE_HOURS);
        if now > deadline {
            return Err(EngineError::CompletionWindowExpired { deadline });
        }

        let event = Event::BookingCompleted {
            id,
            provider_id,
            completed_at: now,
            completed_by: actor.id,
            notes,
            rating,
        };
        self.persist_and_apply(&mut guard, event).await?;
        Self::record_transition(Action::Complete);
        tracing::info!("booking {id} completed by {}", actor.id);
        guard.booking(id).cloned().ok_or(EngineError::NotFound(id))
    }

    /// Scheduler-driven expiry of a PENDING request the provider never
    /// answered.
    pub async fn time_out_booking(&self, actor: &Actor, id: Ulid) -> Result<Booking, EngineError> {
        let (provider_id, mut guard) = self.resolve_entity_write(&id).await?;
        let booking = guard.booking(id).cloned().ok_or(EngineError::NotFound(id))?;
        check_transition(actor, &booking, Action::Timeout)?;

        let event = Event::BookingTimedOut { id, provider_id };
        self.persist_and_apply(&mut guard, event).await?;
        Self::record_transition(Action::Timeout);
        guard.booking(id).cloned().ok_or(EngineError::NotFound(id))
    }

    /// PENDING bookings created at or before `cutoff`.
    pub fn collect_stale_pending(&self, cutoff: NaiveDateTime) -> Vec<Ulid> {
        let mut stale = Vec::new();
        for entry in self.state.iter() {
            let ps = entry.value().clone();
            // Busy providers are picked up on the next sweep.
            if let Ok(guard) = ps.try_read() {
                stale.extend(
                    guard
                        .bookings
                        .iter()
                        .filter(|b| b.status == BookingStatus::Pending && b.created_at <= cutoff)
                        .map(|b| b.id),
                );
            }
        }
        stale
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [BookingStatus; 7] = [
        BookingStatus::Pending,
        BookingStatus::AlternativeProposed,
        BookingStatus::Confirmed,
        BookingStatus::Declined,
        BookingStatus::TimedOut,
        BookingStatus::Completed,
        BookingStatus::Cancelled,
    ];

    const ACTIONS: [Action; 7] = [
        Action::Confirm,
        Action::ProposeAlternative,
        Action::AcceptAlternative,
        Action::Decline,
        Action::Cancel,
        Action::Complete,
        Action::Timeout,
    ];

    #[test]
    fn terminal_states_have_no_exits() {
        for from in ALL.iter().filter(|s| s.is_terminal()) {
            for action in ACTIONS {
                assert_eq!(next_status(*from, action), None, "{from} --{action:?}");
            }
        }
    }

    #[test]
    fn confirmed_is_reachable_from_pending_two_ways_only() {
        let mut into_confirmed: Vec<(BookingStatus, Action)> = Vec::new();
        for from in ALL {
            for action in ACTIONS {
                if next_status(from, action) == Some(BookingStatus::Confirmed) {
                    into_confirmed.push((from, action));
                }
            }
        }
        assert_eq!(
            into_confirmed,
            vec![
                (BookingStatus::Pending, Action::Confirm),
                (BookingStatus::AlternativeProposed, Action::AcceptAlternative),
            ]
        );
        assert_eq!(
            next_status(BookingStatus::Pending, Action::ProposeAlternative),
            Some(BookingStatus::AlternativeProposed)
        );
    }

    #[test]
    fn cancel_allowed_only_from_live_states() {
        for from in ALL {
            let allowed = next_status(from, Action::Cancel).is_some();
            assert_eq!(allowed, from.is_active(), "cancel from {from}");
        }
    }

    #[test]
    fn action_names_parse_back() {
        for action in ACTIONS {
            assert_eq!(Action::parse(action.as_str()), Some(action));
        }
        assert_eq!(Action::parse("CONFIRM"), Some(Action::Confirm));
        assert_eq!(Action::parse("reschedule"), None);
    }

    #[test]
    fn party_is_checked_before_status() {
        let provider = Ulid::new();
        let client = Ulid::new();
        let now = chrono::NaiveDate::from_ymd_opt(2024, 6, 10)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap();
        let booking = Booking {
            id: Ulid::new(),
            client_id: client,
            provider_id: provider,
            offering_id: Ulid::new(),
            design_id: None,
            requested_at: now,
            proposed_at: None,
            confirmed_at: None,
            status: BookingStatus::Declined,
            responded_at: None,
            completed_at: None,
            completed_by: None,
            price: 0,
            client_notes: None,
            provider_notes: None,
            rating: None,
            created_at: now,
            occupied_window: None,
        };
        assert!(matches!(
            check_transition(&Actor::client(client), &booking, Action::Confirm),
            Err(EngineError::Forbidden(_))
        ));
        assert!(matches!(
            check_transition(&Actor::provider(provider), &booking, Action::Confirm),
            Err(EngineError::InvalidTransition { .. })
        ));
        assert!(matches!(
            check_transition(&Actor::provider(provider), &booking, Action::Timeout),
            Err(EngineError::Forbidden(_))
        ));
    }
}
