use chrono::{Duration, NaiveDate, NaiveTime};

use crate::catalog::OfferingCatalog;
use crate::limits::MAX_SERVICE_MINUTES;
use crate::model::*;

// ── Occupancy Resolver ────────────────────────────────────────────
//
// Windows are fixed inventory units; a booking blocks them through
// hour-quantized marks rather than a continuous interval. A booking
// occupies its start time plus one mark per additional started hour of
// service, each at `start + N hours` with the minute unchanged. Marks wrap
// around midnight and are compared against windows of the booking's own
// date.

const DEFAULT_SERVICE_MINUTES: u32 = 60;

/// Statuses whose confirmed time still renders windows unavailable.
pub(crate) fn occupies(status: BookingStatus) -> bool {
    matches!(status, BookingStatus::Confirmed | BookingStatus::Completed)
}

/// Minute-aligned marks a booking starting at `start` occupies.
/// A missing or zero duration counts as one hour.
pub fn occupied_marks(start: NaiveTime, duration_minutes: Option<u32>) -> Vec<NaiveTime> {
    let minutes = match duration_minutes {
        Some(0) | None => DEFAULT_SERVICE_MINUTES,
        Some(m) => m.min(MAX_SERVICE_MINUTES),
    };
    let start = to_minute(start);
    let hours = minutes.div_ceil(60).max(1);
    (0..hours)
        .map(|n| start.overflowing_add_signed(Duration::hours(n as i64)).0)
        .collect()
}

/// Marks for a booking at its confirmed time, using the catalog's duration.
pub fn booking_marks(booking: &Booking, catalog: &dyn OfferingCatalog) -> Vec<NaiveTime> {
    let Some(at) = booking.confirmed_at else {
        return Vec::new();
    };
    let duration = catalog
        .offering(&booking.offering_id)
        .map(|o| o.duration_minutes);
    occupied_marks(at.time(), duration)
}

/// Keep only windows that contain none of the marks.
pub fn exclude_marked<'a>(
    windows: impl IntoIterator<Item = &'a AvailabilityWindow>,
    marks: &[NaiveTime],
) -> Vec<AvailabilityWindow> {
    windows
        .into_iter()
        .filter(|w| !marks.iter().any(|m| w.range.contains(*m)))
        .cloned()
        .collect()
}

/// Bookable windows for one provider on one date: declared `Available`
/// windows minus everything an occupying booking's marks land in.
pub fn free_windows(
    provider: &ProviderState,
    date: NaiveDate,
    catalog: &dyn OfferingCatalog,
) -> Vec<AvailabilityWindow> {
    let marks: Vec<NaiveTime> = provider
        .bookings
        .iter()
        .filter(|b| occupies(b.status))
        .filter(|b| b.confirmed_at.is_some_and(|at| at.date() == date))
        .flat_map(|b| booking_marks(b, catalog))
        .collect();

    let declared = provider
        .windows_between(date, date)
        .filter(|w| w.state == WindowState::Available);
    exclude_marked(declared, &marks)
}
