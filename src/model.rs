use std::fmt;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Booking prices are integer minor units (cents).
pub type Price = u64;

/// Half-open same-day range `[start, end)` at minute granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl TimeRange {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        debug_assert!(start < end, "TimeRange start must be before end");
        Self { start, end }
    }

    pub fn contains(&self, t: NaiveTime) -> bool {
        self.start <= t && t < self.end
    }
}

/// Truncate a time to whole minutes.
pub fn to_minute(t: NaiveTime) -> NaiveTime {
    use chrono::Timelike;
    t.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(t)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WindowState {
    Available,
    BlockedManual,
    Occupied,
}

impl WindowState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WindowState::Available => "available",
            WindowState::BlockedManual => "blocked_manual",
            WindowState::Occupied => "occupied",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "available" => Some(WindowState::Available),
            "blocked_manual" | "blocked" => Some(WindowState::BlockedManual),
            "occupied" => Some(WindowState::Occupied),
            _ => None,
        }
    }
}

/// A provider-declared bookable unit. Windows are independent of each other;
/// gaps between them are simply not bookable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityWindow {
    pub id: Ulid,
    pub provider_id: Ulid,
    pub date: NaiveDate,
    pub range: TimeRange,
    pub state: WindowState,
    pub note: Option<String>,
}

impl AvailabilityWindow {
    pub fn covers(&self, at: NaiveDateTime) -> bool {
        self.date == at.date() && self.range.contains(at.time())
    }
}

/// Catalog-owned service definition. The core only reads it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceOffering {
    pub id: Ulid,
    pub provider_id: Ulid,
    pub duration_minutes: u32,
    pub price: Price,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookingStatus {
    Pending,
    AlternativeProposed,
    Confirmed,
    Declined,
    TimedOut,
    Completed,
    Cancelled,
}

impl BookingStatus {
    /// Active bookings still contend for a provider's time.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            BookingStatus::Pending | BookingStatus::AlternativeProposed | BookingStatus::Confirmed
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BookingStatus::Declined
                | BookingStatus::TimedOut
                | BookingStatus::Completed
                | BookingStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::AlternativeProposed => "alternative_proposed",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Declined => "declined",
            BookingStatus::TimedOut => "timeout",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub client_id: Ulid,
    pub provider_id: Ulid,
    pub offering_id: Ulid,
    /// Opaque catalog design reference.
    pub design_id: Option<Ulid>,
    pub requested_at: NaiveDateTime,
    pub proposed_at: Option<NaiveDateTime>,
    pub confirmed_at: Option<NaiveDateTime>,
    pub status: BookingStatus,
    pub responded_at: Option<NaiveDateTime>,
    pub completed_at: Option<NaiveDateTime>,
    pub completed_by: Option<Ulid>,
    pub price: Price,
    pub client_notes: Option<String>,
    pub provider_notes: Option<String>,
    pub rating: Option<u8>,
    pub created_at: NaiveDateTime,
    /// Window flipped to `Occupied` when this booking was confirmed.
    pub occupied_window: Option<Ulid>,
}

// ── Actors ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Client,
    Provider,
    System,
}

/// Authenticated caller, as supplied by the identity layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Actor {
    pub id: Ulid,
    pub role: Role,
}

impl Actor {
    pub fn client(id: Ulid) -> Self {
        Self { id, role: Role::Client }
    }

    pub fn provider(id: Ulid) -> Self {
        Self { id, role: Role::Provider }
    }

    pub fn system() -> Self {
        Self { id: Ulid::nil(), role: Role::System }
    }

    pub fn is_provider(&self, provider_id: Ulid) -> bool {
        self.role == Role::Provider && self.id == provider_id
    }

    pub fn is_client(&self, client_id: Ulid) -> bool {
        self.role == Role::Client && self.id == client_id
    }
}

/// Everything the engine holds for one provider: its declared windows and
/// every booking addressed to it. This is the unit of locking.
#[derive(Debug, Clone)]
pub struct ProviderState {
    pub id: Ulid,
    /// Sorted by `(date, range.start)`.
    pub windows: Vec<AvailabilityWindow>,
    pub bookings: Vec<Booking>,
}

impl ProviderState {
    pub fn new(id: Ulid) -> Self {
        Self {
            id,
            windows: Vec::new(),
            bookings: Vec::new(),
        }
    }

    /// Insert window maintaining sort order by (date, start).
    pub fn insert_window(&mut self, window: AvailabilityWindow) {
        let key = (window.date, window.range.start);
        let pos = self
            .windows
            .binary_search_by_key(&key, |w| (w.date, w.range.start))
            .unwrap_or_else(|e| e);
        self.windows.insert(pos, window);
    }

    pub fn remove_window(&mut self, id: Ulid) -> Option<AvailabilityWindow> {
        let pos = self.windows.iter().position(|w| w.id == id)?;
        Some(self.windows.remove(pos))
    }

    pub fn window(&self, id: Ulid) -> Option<&AvailabilityWindow> {
        self.windows.iter().find(|w| w.id == id)
    }

    pub fn window_mut(&mut self, id: Ulid) -> Option<&mut AvailabilityWindow> {
        self.windows.iter_mut().find(|w| w.id == id)
    }

    /// Windows on dates within `[from, to]`, in (date, start) order.
    pub fn windows_between(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> impl Iterator<Item = &AvailabilityWindow> {
        let lo = self.windows.partition_point(|w| w.date < from);
        let hi = self.windows.partition_point(|w| w.date <= to);
        self.windows[lo..hi.max(lo)].iter()
    }

    pub fn has_identical_window(&self, date: NaiveDate, range: TimeRange, except: Option<Ulid>) -> bool {
        self.windows_between(date, date)
            .any(|w| w.range == range && Some(w.id) != except)
    }

    /// The declared window a booking at `at` lands on: an exact start match
    /// wins, otherwise the first window covering the instant.
    pub fn matching_window(&self, at: NaiveDateTime) -> Option<&AvailabilityWindow> {
        let day = at.date();
        self.windows_between(day, day)
            .find(|w| w.range.start == at.time())
            .or_else(|| self.windows_between(day, day).find(|w| w.covers(at)))
    }

    pub fn booking(&self, id: Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    pub fn booking_mut(&mut self, id: Ulid) -> Option<&mut Booking> {
        self.bookings.iter_mut().find(|b| b.id == id)
    }
}

/// The event types, flat with no nesting. This is the WAL record format and
/// also what lifecycle subscribers receive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    WindowDeclared {
        id: Ulid,
        provider_id: Ulid,
        date: NaiveDate,
        range: TimeRange,
        state: WindowState,
        note: Option<String>,
    },
    WindowUpdated {
        id: Ulid,
        provider_id: Ulid,
        range: TimeRange,
        state: WindowState,
        note: Option<String>,
    },
    WindowRemoved {
        id: Ulid,
        provider_id: Ulid,
    },
    BookingRequested {
        id: Ulid,
        client_id: Ulid,
        provider_id: Ulid,
        offering_id: Ulid,
        design_id: Option<Ulid>,
        requested_at: NaiveDateTime,
        price: Price,
        notes: Option<String>,
        created_at: NaiveDateTime,
    },
    BookingConfirmed {
        id: Ulid,
        provider_id: Ulid,
        confirmed_at: NaiveDateTime,
        responded_at: NaiveDateTime,
        window_id: Option<Ulid>,
    },
    AlternativeProposed {
        id: Ulid,
        provider_id: Ulid,
        proposed_at: NaiveDateTime,
        responded_at: NaiveDateTime,
    },
    AlternativeAccepted {
        id: Ulid,
        provider_id: Ulid,
        confirmed_at: NaiveDateTime,
        window_id: Option<Ulid>,
    },
    BookingDeclined {
        id: Ulid,
        provider_id: Ulid,
        responded_at: NaiveDateTime,
        notes: Option<String>,
    },
    BookingCancelled {
        id: Ulid,
        provider_id: Ulid,
        released_window: Option<Ulid>,
    },
    BookingCompleted {
        id: Ulid,
        provider_id: Ulid,
        completed_at: NaiveDateTime,
        completed_by: Ulid,
        notes: Option<String>,
        rating: Option<u8>,
    },
    BookingTimedOut {
        id: Ulid,
        provider_id: Ulid,
    },
}

impl Event {
    pub fn provider_id(&self) -> Ulid {
        match self {
            Event::WindowDeclared { provider_id, .. }
            | Event::WindowUpdated { provider_id, .. }
            | Event::WindowRemoved { provider_id, .. }
            | Event::BookingRequested { provider_id, .. }
            | Event::BookingConfirmed { provider_id, .. }
            | Event::AlternativeProposed { provider_id, .. }
            | Event::AlternativeAccepted { provider_id, .. }
            | Event::BookingDeclined { provider_id, .. }
            | Event::BookingCancelled { provider_id, .. }
            | Event::BookingCompleted { provider_id, .. }
            | Event::BookingTimedOut { provider_id, .. } => *provider_id,
        }
    }

    /// Short name used in logs and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            Event::WindowDeclared { .. } => "window_declared",
            Event::WindowUpdated { .. } => "window_updated",
            Event::WindowRemoved { .. } => "window_removed",
            Event::BookingRequested { .. } => "booking_requested",
            Event::BookingConfirmed { .. } => "booking_confirmed",
            Event::AlternativeProposed { .. } => "alternative_proposed",
            Event::AlternativeAccepted { .. } => "alternative_accepted",
            Event::BookingDeclined { .. } => "booking_declined",
            Event::BookingCancelled { .. } => "booking_cancelled",
            Event::BookingCompleted { .. } => "booking_completed",
            Event::BookingTimedOut { .. } => "booking_timed_out",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, day).unwrap()
    }

    fn window(date: NaiveDate, start: NaiveTime, end: NaiveTime) -> AvailabilityWindow {
        AvailabilityWindow {
            id: Ulid::new(),
            provider_id: Ulid::nil(),
            date,
            range: TimeRange::new(start, end),
            state: WindowState::Available,
            note: None,
        }
    }

    #[test]
    fn range_is_half_open() {
        let r = TimeRange::new(t(9, 0), t(10, 0));
        assert!(r.contains(t(9, 0)));
        assert!(r.contains(t(9, 59)));
        assert!(!r.contains(t(10, 0)));
    }

    #[test]
    fn to_minute_drops_seconds() {
        let raw = NaiveTime::from_hms_opt(9, 30, 42).unwrap();
        assert_eq!(to_minute(raw), t(9, 30));
    }

    #[test]
    fn windows_kept_in_date_then_start_order() {
        let mut ps = ProviderState::new(Ulid::new());
        ps.insert_window(window(d(11), t(9, 0), t(10, 0)));
        ps.insert_window(window(d(10), t(14, 0), t(15, 0)));
        ps.insert_window(window(d(10), t(9, 0), t(10, 0)));
        let order: Vec<_> = ps.windows.iter().map(|w| (w.date, w.range.start)).collect();
        assert_eq!(
            order,
            vec![(d(10), t(9, 0)), (d(10), t(14, 0)), (d(11), t(9, 0))]
        );
    }

    #[test]
    fn windows_between_is_inclusive() {
        let mut ps = ProviderState::new(Ulid::new());
        for day in 9..=12 {
            ps.insert_window(window(d(day), t(9, 0), t(10, 0)));
        }
        let hits: Vec<_> = ps.windows_between(d(10), d(11)).map(|w| w.date).collect();
        assert_eq!(hits, vec![d(10), d(11)]);
        assert_eq!(ps.windows_between(d(13), d(20)).count(), 0);
    }

    #[test]
    fn matching_window_prefers_exact_start() {
        let mut ps = ProviderState::new(Ulid::new());
        let wide = window(d(10), t(9, 0), t(11, 0));
        let exact = window(d(10), t(10, 0), t(11, 0));
        let exact_id = exact.id;
        let wide_id = wide.id;
        ps.insert_window(wide);
        ps.insert_window(exact);

        let at_ten = d(10).and_time(t(10, 0));
        assert_eq!(ps.matching_window(at_ten).map(|w| w.id), Some(exact_id));

        let at_nine_thirty = d(10).and_time(t(9, 30));
        assert_eq!(ps.matching_window(at_nine_thirty).map(|w| w.id), Some(wide_id));

        let elsewhere = d(11).and_time(t(10, 0));
        assert!(ps.matching_window(elsewhere).is_none());
    }

    #[test]
    fn identical_window_detection_is_exact_match_only() {
        let mut ps = ProviderState::new(Ulid::new());
        let w = window(d(10), t(9, 0), t(10, 0));
        let id = w.id;
        ps.insert_window(w);
        assert!(ps.has_identical_window(d(10), TimeRange::new(t(9, 0), t(10, 0)), None));
        assert!(!ps.has_identical_window(d(10), TimeRange::new(t(9, 30), t(10, 30)), None));
        assert!(!ps.has_identical_window(d(10), TimeRange::new(t(9, 0), t(10, 0)), Some(id)));
    }

    #[test]
    fn status_classes() {
        assert!(BookingStatus::Pending.is_active());
        assert!(BookingStatus::AlternativeProposed.is_active());
        assert!(BookingStatus::Confirmed.is_active());
        for s in [
            BookingStatus::Declined,
            BookingStatus::TimedOut,
            BookingStatus::Completed,
            BookingStatus::Cancelled,
        ] {
            assert!(s.is_terminal());
            assert!(!s.is_active());
        }
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::WindowDeclared {
            id: Ulid::new(),
            provider_id: Ulid::new(),
            date: d(10),
            range: TimeRange::new(t(9, 0), t(10, 0)),
            state: WindowState::Available,
            note: Some("front chair".into()),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
