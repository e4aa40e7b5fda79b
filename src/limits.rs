pub const MAX_PROVIDERS: usize = 100_000;
pub const MAX_WINDOWS_PER_PROVIDER: usize = 20_000;
pub const MAX_BOOKINGS_PER_PROVIDER: usize = 100_000;
pub const MAX_NOTE_LEN: usize = 2_000;
/// Widest date range accepted by availability and listing queries.
pub const MAX_QUERY_DAYS: i64 = 92;
/// Longest offering duration the occupancy resolver will expand.
pub const MAX_SERVICE_MINUTES: u32 = 24 * 60;
