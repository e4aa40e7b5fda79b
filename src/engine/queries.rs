use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::occupancy::free_windows;
use super::{Engine, EngineError, SharedProviderState};

fn check_span(from: NaiveDate, to: NaiveDate) -> Result<(), EngineError> {
    if (to - from).num_days() > MAX_QUERY_DAYS {
        return Err(EngineError::LimitExceeded("date range too wide"));
    }
    Ok(())
}

fn can_see(actor: &Actor, booking: &Booking) -> bool {
    actor.role == Role::System
        || actor.is_provider(booking.provider_id)
        || actor.is_client(booking.client_id)
}

impl Engine {
    /// Declared windows on `[from, to]`, ascending by (date, start). A
    /// point-in-time copy.
    pub async fn list_windows(
        &self,
        provider_id: Ulid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<AvailabilityWindow>, EngineError> {
        check_span(from, to)?;
        let ps = match self.get_provider(&provider_id) {
            Some(ps) => ps,
            None => return Ok(vec![]),
        };
        let guard = ps.read().await;
        Ok(guard.windows_between(from, to).cloned().collect())
    }

    /// Bookable windows per date on `[from, to]`. Dates before today have
    /// nothing bookable and are skipped.
    pub async fn compute_availability(
        &self,
        provider_id: Ulid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<AvailabilityWindow>, EngineError> {
        check_span(from, to)?;
        let ps = match self.get_provider(&provider_id) {
            Some(ps) => ps,
            None => return Ok(vec![]),
        };
        let guard = ps.read().await;

        let today = self.now().date();
        let mut free = Vec::new();
        for date in from.max(today).iter_days().take_while(|d| *d <= to) {
            free.extend(free_windows(&guard, date, self.catalog()));
        }
        Ok(free)
    }

    pub async fn get_booking(&self, actor: &Actor, id: Ulid) -> Result<Booking, EngineError> {
        let provider_id = self
            .get_provider_for_entity(&id)
            .ok_or(EngineError::NotFound(id))?;
        let ps = self
            .get_provider(&provider_id)
            .ok_or(EngineError::NotFound(provider_id))?;
        let guard = ps.read().await;
        let booking = guard.booking(id).ok_or(EngineError::NotFound(id))?;
        if !can_see(actor, booking) {
            return Err(EngineError::Forbidden("not a party to this booking"));
        }
        Ok(booking.clone())
    }

    /// All bookings addressed to a provider, by requested time.
    pub async fn bookings_for_provider(
        &self,
        actor: &Actor,
        provider_id: Ulid,
    ) -> Result<Vec<Booking>, EngineError> {
        if !(actor.role == Role::System || actor.is_provider(provider_id)) {
            return Err(EngineError::Forbidden("only the provider may list its bookings"));
        }
        let ps = match self.get_provider(&provider_id) {
            Some(ps) => ps,
            None => return Ok(vec![]),
        };
        let guard = ps.read().await;
        let mut bookings = guard.bookings.clone();
        bookings.sort_by_key(|b| (b.requested_at, b.id));
        Ok(bookings)
    }

    /// All bookings a client has made, across providers, by requested time.
    pub async fn bookings_for_client(
        &self,
        actor: &Actor,
        client_id: Ulid,
    ) -> Result<Vec<Booking>, EngineError> {
        if !(actor.role == Role::System || actor.is_client(client_id)) {
            return Err(EngineError::Forbidden("only the client may list its bookings"));
        }
        let providers: Vec<SharedProviderState> =
            self.state.iter().map(|e| e.value().clone()).collect();
        let mut bookings = Vec::new();
        for ps in providers {
            let guard = ps.read().await;
            bookings.extend(
                guard
                    .bookings
                    .iter()
                    .filter(|b| b.client_id == client_id)
                    .cloned(),
            );
        }
        bookings.sort_by_key(|b| (b.requested_at, b.id));
        Ok(bookings)
    }
}
