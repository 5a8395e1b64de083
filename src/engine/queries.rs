use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::availability::{check_availability, free_windows, room_view};
use super::conflict::{normalize_phone, validate_stay};
use super::{Availability, Engine, EngineError};

impl Engine {
    /// A partner's rooms, in id order.
    pub async fn list_rooms(&self, partner_id: Ulid) -> Vec<Room> {
        let mut rooms = Vec::new();
        for rs in self.partner_room_states(partner_id) {
            rooms.push(rs.read().await.room.clone());
        }
        rooms.sort_by_key(|r| r.id);
        rooms
    }

    /// Every booking across a partner's rooms, terminal ones included,
    /// ordered by check-in.
    pub async fn list_bookings(&self, partner_id: Ulid) -> Vec<Booking> {
        let mut bookings = Vec::new();
        for rs in self.partner_room_states(partner_id) {
            bookings.extend(rs.read().await.bookings.iter().cloned());
        }
        bookings.sort_by_key(|b| (b.check_in, b.id));
        bookings
    }

    /// A guest's bookings across all partners. Numbers are compared in
    /// normalized form, so `+1 555-0100` finds `+15550100`.
    pub async fn guest_bookings(&self, phone: &str) -> Result<Vec<Booking>, EngineError> {
        let wanted = normalize_phone(phone)
            .ok_or_else(|| EngineError::validation("guest_phone", "not a phone number"))?;
        let rooms: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut found = Vec::new();
        for rs in rooms {
            let guard = rs.read().await;
            found.extend(
                guard
                    .bookings
                    .iter()
                    .filter(|b| normalize_phone(&b.guest_phone).as_deref() == Some(wanted.as_str()))
                    .cloned(),
            );
        }
        found.sort_by_key(|b| (b.check_in, b.id));
        Ok(found)
    }

    pub async fn get_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        let room_id = self.get_room_for_booking(&id).ok_or(EngineError::NotFound(id))?;
        let rs = self.get_room(&room_id).ok_or(EngineError::NotFound(id))?;
        let guard = rs.read().await;
        guard.booking(id).cloned().ok_or(EngineError::NotFound(id))
    }

    /// The room as guests see it on `day`.
    pub async fn room_view(&self, room_id: Ulid, day: Day) -> Result<RoomView, EngineError> {
        let rs = self.get_room(&room_id).ok_or(EngineError::NotFound(room_id))?;
        let guard = rs.read().await;
        Ok(room_view(&guard.room, &guard.bookings, day))
    }

    /// Bookable sub-ranges of `[from, to)`.
    pub async fn room_free_windows(
        &self,
        room_id: Ulid,
        from: Day,
        to: Day,
    ) -> Result<Vec<Stay>, EngineError> {
        if to <= from {
            return Err(EngineError::validation("to", "must be after from"));
        }
        if to.signed_duration_since(from).num_days() > MAX_QUERY_WINDOW_DAYS {
            return Err(EngineError::LimitExceeded("query window too wide".into()));
        }
        let rs = self.get_room(&room_id).ok_or(EngineError::NotFound(room_id))?;
        let guard = rs.read().await;
        Ok(free_windows(&guard.bookings, from, to))
    }

    /// Dry-run conflict check, no lock held beyond the read.
    pub async fn check(
        &self,
        room_id: Ulid,
        stay: &Stay,
        exclude: Option<Ulid>,
    ) -> Result<Availability, EngineError> {
        validate_stay(stay)?;
        let rs = self.get_room(&room_id).ok_or(EngineError::NotFound(room_id))?;
        let guard = rs.read().await;
        Ok(check_availability(room_id, stay, guard.overlapping(stay), exclude))
    }

    fn partner_room_states(&self, partner_id: Ulid) -> Vec<super::SharedRoomState> {
        let ids = self
            .partner_rooms
            .get(&partner_id)
            .map(|rooms| rooms.clone())
            .unwrap_or_default();
        ids.iter().filter_map(|id| self.get_room(id)).collect()
    }
}
