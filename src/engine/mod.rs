mod availability;
mod conflict;
mod error;
mod lifecycle;
mod mutations;
mod queries;

pub use availability::{
    check_availability, free_windows, merge_overlapping, occupancy, room_view, subtract_stays,
    Availability,
};
pub use conflict::normalize_phone;
pub(crate) use conflict::{today, validate_booking_fields, validate_stay};
pub use error::{EngineError, ErrorBody, ErrorDetail};
pub use lifecycle::{can_transition, next_statuses, transition, valid_initial};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, OwnedRwLockWriteGuard, RwLock};
use ulid::Ulid;

use crate::feed::NotifyHub;
use crate::model::*;
use crate::observability::{JOURNAL_FLUSH_BATCH_SIZE, JOURNAL_FLUSH_DURATION_SECONDS};
use crate::wal::Journal;

pub type SharedRoomState = Arc<RwLock<RoomState>>;

// ── Group-commit journal channel ─────────────────────────

pub(super) enum JournalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Rewrite {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Background task that owns the journal. Appends that are already queued
/// when the first one arrives are committed together with a single fsync.
/// A non-append command ends the batch and runs right after it.
async fn journal_writer_loop(mut journal: Journal, mut rx: mpsc::Receiver<JournalCommand>) {
    let mut deferred: Option<JournalCommand> = None;
    loop {
        let cmd = match deferred.take() {
            Some(cmd) => cmd,
            None => match rx.recv().await {
                Some(cmd) => cmd,
                None => break,
            },
        };
        match cmd {
            JournalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                while let Ok(next) = rx.try_recv() {
                    match next {
                        JournalCommand::Append { event, response } => batch.push((event, response)),
                        other => {
                            deferred = Some(other);
                            break;
                        }
                    }
                }
                commit_batch(&mut journal, batch);
            }
            JournalCommand::Rewrite { events, response } => {
                let _ = response.send(journal.rewrite(&events));
            }
            JournalCommand::AppendsSinceCompact { response } => {
                let _ = response.send(journal.appends_since_compact());
            }
        }
    }
}

fn commit_batch(journal: &mut Journal, batch: Vec<PendingAppend>) {
    metrics::histogram!(JOURNAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = Instant::now();
    let result = journal.append_batch(batch.iter().map(|(event, _)| event));
    metrics::histogram!(JOURNAL_FLUSH_DURATION_SECONDS).record(flush_start.elapsed().as_secs_f64());
    for (_, tx) in batch {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

/// Authoritative room and booking state, one lock per room.
pub struct Engine {
    pub state: DashMap<Ulid, SharedRoomState>,
    pub(super) journal_tx: mpsc::Sender<JournalCommand>,
    pub notify: Arc<NotifyHub>,
    /// Reverse lookup: booking id → room id
    pub(super) booking_to_room: DashMap<Ulid, Ulid>,
    /// Partner → owned rooms.
    pub(super) partner_rooms: DashMap<Ulid, Vec<Ulid>>,
    /// Guest requests start Confirmed instead of Pending.
    pub(super) guest_auto_confirm: bool,
    /// Shared by room creation, exclusive during compaction.
    pub(super) room_set: RwLock<()>,
}

/// Apply an event to a room (no locking; caller holds the lock).
fn apply_to_room(rs: &mut RoomState, event: &Event, booking_index: &DashMap<Ulid, Ulid>) {
    match event {
        Event::RoomUpdated { details, .. } => rs.room.replace_details(details.clone()),
        Event::RoomStatusSet { status, .. } => rs.room.status = *status,
        Event::BookingCreated { booking } => {
            booking_index.insert(booking.id, booking.room_id);
            rs.insert_booking(booking.clone());
        }
        Event::BookingUpdated { id, changes, .. } => {
            // Re-insert so the list stays sorted by the new check-in.
            if let Some(mut booking) = rs.remove_booking(*id) {
                booking.apply_update(changes);
                rs.insert_booking(booking);
            }
        }
        Event::BookingStatusSet { id, status, .. } => {
            if let Some(booking) = rs.booking_mut(*id) {
                booking.status = *status;
            }
        }
        // Created/Deleted are handled at the DashMap level, not here
        Event::RoomCreated { .. } | Event::RoomDeleted { .. } => {}
    }
}

impl Engine {
    pub fn new(journal_path: PathBuf, notify: Arc<NotifyHub>) -> io::Result<Self> {
        let (journal, events) = Journal::recover(&journal_path)?;
        let (journal_tx, journal_rx) = mpsc::channel(4096);
        tokio::spawn(journal_writer_loop(journal, journal_rx));

        let engine = Self {
            state: DashMap::new(),
            journal_tx,
            notify,
            booking_to_room: DashMap::new(),
            partner_rooms: DashMap::new(),
            guest_auto_confirm: false,
            room_set: RwLock::new(()),
        };

        // Replay: we are the sole owner of every Arc, so try_write always
        // succeeds. Never block here; this may run inside an async context.
        for event in &events {
            match event {
                Event::RoomCreated { room } => engine.insert_room(RoomState::new(room.clone())),
                Event::RoomDeleted { id, .. } => {
                    if let Some(rs) = engine.get_room(id) {
                        let guard = rs.try_read().expect("replay: uncontended read");
                        engine.forget_room(&guard);
                    }
                }
                other => {
                    if let Some(entry) = engine.state.get(&other.room_id()) {
                        let rs = entry.clone();
                        let mut guard = rs.try_write().expect("replay: uncontended write");
                        apply_to_room(&mut guard, other, &engine.booking_to_room);
                    }
                }
            }
        }
        metrics::gauge!(crate::observability::ROOMS_ACTIVE).set(engine.state.len() as f64);

        Ok(engine)
    }

    pub fn with_guest_auto_confirm(mut self, enabled: bool) -> Self {
        self.guest_auto_confirm = enabled;
        self
    }

    pub(super) fn insert_room(&self, rs: RoomState) {
        let (id, partner_id) = (rs.room.id, rs.room.partner_id);
        self.state.insert(id, Arc::new(RwLock::new(rs)));
        self.partner_rooms.entry(partner_id).or_default().push(id);
    }

    /// Drop a room and every index entry pointing at it. The caller holds
    /// the room's lock, so waiters see the room as gone once they get it.
    pub(super) fn forget_room(&self, rs: &RoomState) {
        let id = rs.room.id;
        self.state.remove(&id);
        for booking in &rs.bookings {
            self.booking_to_room.remove(&booking.id);
        }
        if let Some(mut rooms) = self.partner_rooms.get_mut(&rs.room.partner_id) {
            rooms.retain(|r| *r != id);
        }
    }

    /// Write event to the journal via the background group-commit writer.
    async fn journal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.journal_tx
            .send(JournalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("journal writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("journal writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_room(&self, id: &Ulid) -> Option<SharedRoomState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    pub fn get_room_for_booking(&self, booking_id: &Ulid) -> Option<Ulid> {
        self.booking_to_room.get(booking_id).map(|e| *e.value())
    }

    /// Journal + apply + notify in one call.
    pub(super) async fn persist_and_apply(
        &self,
        rs: &mut RoomState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.journal_append(event).await?;
        apply_to_room(rs, event, &self.booking_to_room);
        self.notify.send(event);
        Ok(())
    }

    /// Write-lock a room, failing if it was deleted while we waited.
    pub(super) async fn room_write(
        &self,
        room_id: Ulid,
    ) -> Result<OwnedRwLockWriteGuard<RoomState>, EngineError> {
        let rs = self.get_room(&room_id).ok_or(EngineError::NotFound(room_id))?;
        let guard = rs.write_owned().await;
        if !self.state.contains_key(&room_id) {
            return Err(EngineError::NotFound(room_id));
        }
        Ok(guard)
    }

    /// Lookup booking → room, then write-lock the room.
    pub(super) async fn resolve_booking_write(
        &self,
        booking_id: &Ulid,
    ) -> Result<OwnedRwLockWriteGuard<RoomState>, EngineError> {
        let room_id = self
            .get_room_for_booking(booking_id)
            .ok_or(EngineError::NotFound(*booking_id))?;
        let guard = self.room_write(room_id).await?;
        if guard.booking(*booking_id).is_none() {
            return Err(EngineError::NotFound(*booking_id));
        }
        Ok(guard)
    }
}
