use chrono::Utc;
use tokio::sync::oneshot;
use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability::{BOOKINGS_CREATED_TOTAL, ROOMS_ACTIVE, TRANSITIONS_TOTAL};

use super::conflict::{check_no_conflict, validate_booking_fields, validate_room_details};
use super::lifecycle::{transition, valid_initial};
use super::{Engine, EngineError, JournalCommand};

/// Who entered a booking. Guests may only book listed rooms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    Partner,
    Guest,
}

impl Source {
    fn as_str(self) -> &'static str {
        match self {
            Source::Partner => "partner",
            Source::Guest => "guest",
        }
    }
}

impl Engine {
    pub async fn create_room(&self, new: NewRoom) -> Result<Room, EngineError> {
        validate_room_details(&new.details)?;
        let owned = self
            .partner_rooms
            .get(&new.partner_id)
            .map_or(0, |rooms| rooms.len());
        if owned >= MAX_ROOMS_PER_PARTNER {
            return Err(EngineError::LimitExceeded("too many rooms".into()));
        }

        let room = Room::new(Ulid::new(), new.partner_id, new.details, new.status);
        let event = Event::RoomCreated { room: room.clone() };
        {
            let _set = self.room_set.read().await;
            self.journal_append(&event).await?;
            self.insert_room(RoomState::new(room.clone()));
        }
        self.notify.send(&event);
        metrics::gauge!(ROOMS_ACTIVE).set(self.state.len() as f64);
        info!(room = %room.id, partner = %room.partner_id, "room created");
        Ok(room)
    }

    /// Full attribute replace. Status is left alone; it has its own endpoint.
    pub async fn update_room(&self, id: Ulid, details: RoomDetails) -> Result<Room, EngineError> {
        validate_room_details(&details)?;
        let mut guard = self.room_write(id).await?;
        let event = Event::RoomUpdated {
            id,
            partner_id: guard.room.partner_id,
            details,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(guard.room.clone())
    }

    /// Any status to any status: this is operator intent, not derived state.
    pub async fn set_room_status(&self, id: Ulid, status: RoomStatus) -> Result<Room, EngineError> {
        let mut guard = self.room_write(id).await?;
        let event = Event::RoomStatusSet {
            id,
            partner_id: guard.room.partner_id,
            status,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        info!(room = %id, %status, "room status set");
        Ok(guard.room.clone())
    }

    /// Refuses while the room still has Pending or Confirmed bookings.
    pub async fn delete_room(&self, id: Ulid) -> Result<(), EngineError> {
        let guard = self.room_write(id).await?;
        let active = guard.active().count();
        if active > 0 {
            return Err(EngineError::HasActiveBookings { room_id: id, active });
        }

        let event = Event::RoomDeleted {
            id,
            partner_id: guard.room.partner_id,
        };
        self.journal_append(&event).await?;
        self.forget_room(&guard);
        drop(guard);
        self.notify.send(&event);
        metrics::gauge!(ROOMS_ACTIVE).set(self.state.len() as f64);
        info!(room = %id, "room deleted");
        Ok(())
    }

    /// Partner manual entry.
    pub async fn create_booking(&self, new: NewBooking) -> Result<Booking, EngineError> {
        if !valid_initial(new.status) {
            return Err(EngineError::validation(
                "status",
                format!("a new booking cannot start as {}", new.status),
            ));
        }
        let stay = new.stay();
        validate_booking_fields(&new.guest_name, &new.guest_phone, &stay, new.total_price)?;
        let booking = self
            .insert_booking(
                new.room_id,
                new.guest_name,
                new.guest_phone,
                stay,
                new.total_price,
                new.status,
                Source::Partner,
            )
            .await?;
        Ok(booking)
    }

    /// Guest self-service. Starts Pending unless auto-confirm is on, and is
    /// refused for rooms the partner has taken off the listing.
    pub async fn request_booking(&self, req: GuestRequest) -> Result<Booking, EngineError> {
        let stay = Stay {
            check_in: req.check_in,
            check_out: req.check_out,
        };
        validate_booking_fields(&req.guest_name, &req.guest_phone, &stay, req.total_price)?;
        let status = if self.guest_auto_confirm {
            BookingStatus::Confirmed
        } else {
            BookingStatus::Pending
        };
        let booking = self
            .insert_booking(
                req.room_id,
                req.guest_name,
                req.guest_phone,
                stay,
                req.total_price,
                status,
                Source::Guest,
            )
            .await?;
        Ok(booking)
    }

    /// Conflict check and insert under the room's write lock, so the check
    /// sees a snapshot no other edit of this room can interleave with.
    async fn insert_booking(
        &self,
        room_id: Ulid,
        guest_name: String,
        guest_phone: String,
        stay: Stay,
        total_price: f64,
        status: BookingStatus,
        source: Source,
    ) -> Result<Booking, EngineError> {
        let mut guard = self.room_write(room_id).await?;
        let listing = guard.room.status;
        if source == Source::Guest && listing.suppresses_listing() {
            return Err(EngineError::validation(
                "room_id",
                format!("room is not taking requests ({listing})"),
            ));
        }
        if guard.bookings.len() >= MAX_BOOKINGS_PER_ROOM {
            return Err(EngineError::LimitExceeded("too many bookings on room".into()));
        }
        check_no_conflict(&guard, &stay, None)?;

        let booking = Booking {
            id: Ulid::new(),
            room_id,
            partner_id: guard.room.partner_id,
            guest_name: guest_name.trim().to_string(),
            guest_phone: guest_phone.trim().to_string(),
            check_in: stay.check_in,
            check_out: stay.check_out,
            total_price,
            status,
            created_at: Utc::now(),
        };
        let event = Event::BookingCreated {
            booking: booking.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(BOOKINGS_CREATED_TOTAL, "source" => source.as_str()).increment(1);
        info!(booking = %booking.id, room = %room_id, %stay, %status, "booking created");
        Ok(booking)
    }

    /// Edit guest details, dates or price of an active booking. New dates are
    /// checked against the room's other active bookings.
    pub async fn update_booking(
        &self,
        id: Ulid,
        update: BookingUpdate,
    ) -> Result<Booking, EngineError> {
        let stay = update.stay();
        validate_booking_fields(&update.guest_name, &update.guest_phone, &stay, update.total_price)?;
        let mut guard = self.resolve_booking_write(&id).await?;
        let current = guard.booking(id).ok_or(EngineError::NotFound(id))?;
        if current.status.is_terminal() {
            return Err(EngineError::validation(
                "status",
                format!("a {} booking cannot be edited", current.status),
            ));
        }
        check_no_conflict(&guard, &stay, Some(id))?;

        let event = Event::BookingUpdated {
            id,
            room_id: guard.room.id,
            partner_id: guard.room.partner_id,
            changes: BookingUpdate {
                guest_name: update.guest_name.trim().to_string(),
                guest_phone: update.guest_phone.trim().to_string(),
                ..update
            },
        };
        self.persist_and_apply(&mut guard, &event).await?;
        info!(booking = %id, %stay, "booking updated");
        guard.booking(id).cloned().ok_or(EngineError::NotFound(id))
    }

    /// Drive the lifecycle. Room occupancy follows automatically because it
    /// is derived from bookings; the room's status register is untouched.
    pub async fn set_booking_status(
        &self,
        id: Ulid,
        to: BookingStatus,
    ) -> Result<Booking, EngineError> {
        let mut guard = self.resolve_booking_write(&id).await?;
        let from = guard.booking(id).ok_or(EngineError::NotFound(id))?.status;
        transition(from, to)?;

        let event = Event::BookingStatusSet {
            id,
            room_id: guard.room.id,
            partner_id: guard.room.partner_id,
            status: to,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(TRANSITIONS_TOTAL, "to" => to.as_str()).increment(1);
        info!(booking = %id, %from, %to, "booking status changed");
        guard.booking(id).cloned().ok_or(EngineError::NotFound(id))
    }

    /// Rewrite the journal with only the events needed to recreate current state.
    ///
    /// Every room stays read-locked and room creation is paused until the
    /// rewrite lands, so no append can slip in between snapshot and rename.
    pub async fn compact_journal(&self) -> Result<(), EngineError> {
        let _set = self.room_set.write().await;
        let room_ids: Vec<Ulid> = self.state.iter().map(|e| *e.key()).collect();
        let mut guards = Vec::with_capacity(room_ids.len());
        for id in room_ids {
            let Some(rs) = self.get_room(&id) else { continue };
            let guard = rs.read_owned().await;
            if self.state.contains_key(&id) {
                guards.push(guard);
            }
        }

        let mut events = Vec::new();
        for guard in &guards {
            events.push(Event::RoomCreated {
                room: guard.room.clone(),
            });
            events.extend(guard.bookings.iter().map(|b| Event::BookingCreated {
                booking: b.clone(),
            }));
        }
        let rooms = guards.len();

        let (tx, rx) = oneshot::channel();
        self.journal_tx
            .send(JournalCommand::Rewrite { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("journal writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("journal writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        info!(rooms, "journal compacted");
        Ok(())
    }

    pub async fn journal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .journal_tx
            .send(JournalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
