//! Client-side view of one partner's rooms and bookings, kept fresh by a
//! [`ChangeFeed`] and mutated optimistically.
//!
//! Every fetch and every local mutation takes a generation number. A fetched
//! snapshot only lands if nothing newer has been applied and no local
//! mutation is in flight, so a poll that raced a mutation can never undo it.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::client::Backend;
use crate::config::SyncConfig;
use crate::engine::{
    check_availability, room_view, transition, valid_initial, validate_booking_fields,
    validate_stay, Availability, EngineError,
};
use crate::feed::{ChangeFeed, IntervalFeed};
use crate::model::*;
use crate::observability::{
    SYNC_ROLLBACKS_TOTAL, SYNC_SNAPSHOTS_APPLIED_TOTAL, SYNC_SNAPSHOTS_DISCARDED_TOTAL,
};

/// One consistent read of a partner's state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub rooms: Vec<Room>,
    pub bookings: Vec<Booking>,
}

#[derive(Default)]
struct Inner {
    next_generation: u64,
    applied: u64,
    in_flight: usize,
    rooms: BTreeMap<Ulid, Room>,
    bookings: BTreeMap<Ulid, Booking>,
}

impl Inner {
    fn take_generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }

    /// Mark everything issued so far as superseded.
    fn supersede(&mut self) {
        let generation = self.take_generation();
        self.applied = self.applied.max(generation);
    }

    fn settle(&mut self) {
        self.in_flight = self.in_flight.saturating_sub(1);
        self.supersede();
    }
}

/// Value before and after a staged change.
enum Staged {
    Booking { prior: Booking, staged: Booking },
    Room { prior: Room, staged: Room },
}

/// A staged local change waiting for the backend's verdict. Until it is
/// committed or rolled back, fetched snapshots are held off. Dropping it
/// unsettled (a cancelled request) rolls it back.
#[must_use]
pub struct Pending<'a> {
    store: &'a SyncStore,
    staged: Option<Staged>,
}

impl Pending<'_> {
    /// Settle with the backend's copy of the booking.
    pub fn commit_booking(mut self, confirmed: Booking) {
        self.staged = None;
        self.store.settle_with(|inner| {
            inner.bookings.insert(confirmed.id, confirmed);
        });
    }

    pub fn commit_room(mut self, confirmed: Room) {
        self.staged = None;
        self.store.settle_with(|inner| {
            inner.rooms.insert(confirmed.id, confirmed);
        });
    }

    /// Undo the change. Callers refetch afterwards.
    pub fn rollback(mut self) {
        if let Some(staged) = self.staged.take() {
            self.store.undo(staged);
        }
    }
}

impl Drop for Pending<'_> {
    fn drop(&mut self) {
        if let Some(staged) = self.staged.take() {
            debug!("staged change abandoned before settling");
            self.store.undo(staged);
        }
    }
}

/// Generation-tagged rooms and bookings for one partner.
pub struct SyncStore {
    inner: Mutex<Inner>,
    version: watch::Sender<u64>,
}

impl Default for SyncStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            version: watch::channel(0).0,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn bump_version(&self) {
        self.version.send_modify(|v| *v += 1);
    }

    /// Ticks whenever visible contents change.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }

    pub fn version(&self) -> u64 {
        *self.version.borrow()
    }

    /// Generation for a fetch that is about to start.
    pub fn begin_fetch(&self) -> u64 {
        self.lock().take_generation()
    }

    /// Replace contents with `snapshot` unless it is stale. Returns whether it
    /// was applied.
    pub fn apply_snapshot(&self, generation: u64, snapshot: Snapshot) -> bool {
        {
            let mut inner = self.lock();
            if generation <= inner.applied || inner.in_flight > 0 {
                let (applied, in_flight) = (inner.applied, inner.in_flight);
                drop(inner);
                metrics::counter!(SYNC_SNAPSHOTS_DISCARDED_TOTAL).increment(1);
                debug!(generation, applied, in_flight, "discarding stale snapshot");
                return false;
            }
            inner.applied = generation;
            inner.rooms = snapshot.rooms.into_iter().map(|r| (r.id, r)).collect();
            inner.bookings = snapshot.bookings.into_iter().map(|b| (b.id, b)).collect();
        }
        metrics::counter!(SYNC_SNAPSHOTS_APPLIED_TOTAL).increment(1);
        self.bump_version();
        true
    }

    pub fn rooms(&self) -> Vec<Room> {
        self.lock().rooms.values().cloned().collect()
    }

    pub fn room(&self, id: Ulid) -> Option<Room> {
        self.lock().rooms.get(&id).cloned()
    }

    /// All bookings, ordered by check-in.
    pub fn bookings(&self) -> Vec<Booking> {
        let mut bookings: Vec<Booking> = self.lock().bookings.values().cloned().collect();
        bookings.sort_by_key(|b| (b.check_in, b.id));
        bookings
    }

    pub fn booking(&self, id: Ulid) -> Option<Booking> {
        self.lock().bookings.get(&id).cloned()
    }

    pub fn room_bookings(&self, room_id: Ulid) -> Vec<Booking> {
        self.lock()
            .bookings
            .values()
            .filter(|b| b.room_id == room_id)
            .cloned()
            .collect()
    }

    /// Record an authoritative booking returned by the backend.
    pub fn upsert_booking(&self, booking: Booking) {
        {
            let mut inner = self.lock();
            inner.supersede();
            inner.bookings.insert(booking.id, booking);
        }
        self.bump_version();
    }

    pub fn upsert_room(&self, room: Room) {
        {
            let mut inner = self.lock();
            inner.supersede();
            inner.rooms.insert(room.id, room);
        }
        self.bump_version();
    }

    /// Drop a room and its bookings.
    pub fn remove_room(&self, id: Ulid) {
        {
            let mut inner = self.lock();
            inner.supersede();
            inner.rooms.remove(&id);
            inner.bookings.retain(|_, b| b.room_id != id);
        }
        self.bump_version();
    }

    /// Show `status` locally before the backend has answered. `None` if the
    /// booking is not in the store.
    pub fn stage_booking_status(&self, id: Ulid, status: BookingStatus) -> Option<Pending<'_>> {
        let staged = {
            let mut inner = self.lock();
            let booking = inner.bookings.get_mut(&id)?;
            let prior = booking.clone();
            booking.status = status;
            let staged = booking.clone();
            inner.in_flight += 1;
            inner.supersede();
            Staged::Booking { prior, staged }
        };
        self.bump_version();
        Some(Pending {
            store: self,
            staged: Some(staged),
        })
    }

    pub fn stage_room_status(&self, id: Ulid, status: RoomStatus) -> Option<Pending<'_>> {
        let staged = {
            let mut inner = self.lock();
            let room = inner.rooms.get_mut(&id)?;
            let prior = room.clone();
            room.status = status;
            let staged = room.clone();
            inner.in_flight += 1;
            inner.supersede();
            Staged::Room { prior, staged }
        };
        self.bump_version();
        Some(Pending {
            store: self,
            staged: Some(staged),
        })
    }

    fn settle_with(&self, apply: impl FnOnce(&mut Inner)) {
        {
            let mut inner = self.lock();
            apply(&mut inner);
            inner.settle();
        }
        self.bump_version();
    }

    /// Restore the prior value, unless something newer has replaced the
    /// staged one since.
    fn undo(&self, staged: Staged) {
        self.settle_with(|inner| match staged {
            Staged::Booking { prior, staged } => {
                if inner.bookings.get(&prior.id) == Some(&staged) {
                    inner.bookings.insert(prior.id, prior);
                }
            }
            Staged::Room { prior, staged } => {
                if inner.rooms.get(&prior.id) == Some(&staged) {
                    inner.rooms.insert(prior.id, prior);
                }
            }
        });
        metrics::counter!(SYNC_ROLLBACKS_TOTAL).increment(1);
    }
}

/// Fetch rooms and bookings and apply them unless a newer state won meanwhile.
pub async fn fetch_and_apply(
    backend: &dyn Backend,
    partner_id: Ulid,
    store: &SyncStore,
) -> Result<bool, EngineError> {
    let generation = store.begin_fetch();
    let (rooms, bookings) = tokio::try_join!(
        backend.list_rooms(partner_id),
        backend.list_bookings(partner_id)
    )?;
    Ok(store.apply_snapshot(generation, Snapshot { rooms, bookings }))
}

/// Running sync loop. Stopping (or dropping) it cancels any fetch in flight.
pub struct SyncHandle {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl SyncHandle {
    /// Cancel and wait for the loop to exit. Nothing is applied afterwards.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.task.as_ref().is_none_or(|t| t.is_finished())
    }
}

impl Drop for SyncHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Refetch every time `feed` fires until stopped or the feed ends.
pub fn spawn_sync(
    backend: Arc<dyn Backend>,
    partner_id: Ulid,
    store: Arc<SyncStore>,
    mut feed: Box<dyn ChangeFeed>,
) -> SyncHandle {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    let task = tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                more = feed.changed() => {
                    if !more {
                        debug!(partner = %partner_id, "change feed closed");
                        break;
                    }
                }
            }
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                result = fetch_and_apply(backend.as_ref(), partner_id, &store) => match result {
                    Ok(applied) => debug!(partner = %partner_id, applied, "sync tick"),
                    Err(e) => warn!(partner = %partner_id, error = %e, "sync fetch failed"),
                },
            }
        }
    });
    SyncHandle {
        cancel,
        task: Some(task),
    }
}

/// Inputs of an in-progress booking form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Draft {
    pub room_id: Ulid,
    /// `None` until both dates are filled in.
    pub stay: Option<Stay>,
    /// The booking being edited, if any.
    pub exclude: Option<Ulid>,
}

fn evaluate(store: &SyncStore, draft: &Draft) -> Availability {
    let Some(stay) = draft.stay else {
        return Availability::default();
    };
    if validate_stay(&stay).is_err() {
        return Availability::default();
    }
    check_availability(draft.room_id, &stay, &store.room_bookings(draft.room_id), draft.exclude)
}

/// Partner dashboard: a synced store plus mutations that validate locally,
/// apply optimistically and reconcile with the backend.
#[derive(Clone)]
pub struct Dashboard {
    backend: Arc<dyn Backend>,
    partner_id: Ulid,
    store: Arc<SyncStore>,
}

impl Dashboard {
    pub fn new(backend: Arc<dyn Backend>, partner_id: Ulid) -> Self {
        Self {
            backend,
            partner_id,
            store: Arc::new(SyncStore::new()),
        }
    }

    pub fn partner_id(&self) -> Ulid {
        self.partner_id
    }

    pub fn store(&self) -> &Arc<SyncStore> {
        &self.store
    }

    pub async fn refresh(&self) -> Result<bool, EngineError> {
        fetch_and_apply(self.backend.as_ref(), self.partner_id, &self.store).await
    }

    pub fn start(&self, feed: Box<dyn ChangeFeed>) -> SyncHandle {
        info!(partner = %self.partner_id, "dashboard sync started");
        spawn_sync(self.backend.clone(), self.partner_id, self.store.clone(), feed)
    }

    /// Start with the pull feed at the configured interval.
    pub fn start_polling(&self, config: &SyncConfig) -> SyncHandle {
        self.start(Box::new(IntervalFeed::new(config.poll_interval)))
    }

    /// Refetch after a failed write so the store matches the backend again.
    async fn resync(&self, cause: &EngineError) {
        warn!(partner = %self.partner_id, error = %cause, "backend write failed, refetching");
        if let Err(e) = self.refresh().await {
            warn!(partner = %self.partner_id, error = %e, "refetch failed");
        }
    }

    /// Check a stay against the synced bookings, without contacting the backend.
    pub fn check_availability(
        &self,
        room_id: Ulid,
        stay: &Stay,
        exclude: Option<Ulid>,
    ) -> Result<Availability, EngineError> {
        validate_stay(stay)?;
        Ok(check_availability(room_id, stay, &self.store.room_bookings(room_id), exclude))
    }

    /// Availability that follows both the form and the synced bookings. The
    /// watcher task ends when `drafts` closes or every receiver is dropped.
    pub fn watch_availability(
        &self,
        mut drafts: watch::Receiver<Draft>,
    ) -> watch::Receiver<Availability> {
        let store = self.store.clone();
        let mut versions = store.subscribe();
        let draft = *drafts.borrow_and_update();
        let (tx, rx) = watch::channel(evaluate(&store, &draft));
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = drafts.changed() => if changed.is_err() { break },
                    changed = versions.changed() => if changed.is_err() { break },
                    _ = tx.closed() => break,
                }
                let draft = *drafts.borrow_and_update();
                let next = evaluate(&store, &draft);
                tx.send_if_modified(|current| {
                    if *current == next {
                        return false;
                    }
                    *current = next;
                    true
                });
            }
        });
        rx
    }

    /// Local conflict check; a hit never reaches the backend.
    fn ensure_free(&self, room_id: Ulid, stay: &Stay, exclude: Option<Ulid>) -> Result<(), EngineError> {
        let availability = self.check_availability(room_id, stay, exclude)?;
        if availability.conflict() {
            return Err(EngineError::Conflict {
                stay: *stay,
                conflicts: availability.conflicts,
            });
        }
        Ok(())
    }

    pub async fn create_room(&self, details: RoomDetails, status: RoomStatus) -> Result<Room, EngineError> {
        let new = NewRoom {
            partner_id: self.partner_id,
            details,
            status,
        };
        match self.backend.create_room(new).await {
            Ok(room) => {
                self.store.upsert_room(room.clone());
                Ok(room)
            }
            Err(e) => {
                if !e.is_local() {
                    self.resync(&e).await;
                }
                Err(e)
            }
        }
    }

    pub async fn update_room(&self, id: Ulid, details: RoomDetails) -> Result<Room, EngineError> {
        match self.backend.update_room(id, details).await {
            Ok(room) => {
                self.store.upsert_room(room.clone());
                Ok(room)
            }
            Err(e) => {
                self.resync(&e).await;
                Err(e)
            }
        }
    }

    /// Refused locally while the synced store shows active bookings.
    pub async fn delete_room(&self, id: Ulid) -> Result<(), EngineError> {
        let active = self
            .store
            .room_bookings(id)
            .iter()
            .filter(|b| b.is_active())
            .count();
        if active > 0 {
            return Err(EngineError::HasActiveBookings { room_id: id, active });
        }
        match self.backend.delete_room(id).await {
            Ok(()) => {
                self.store.remove_room(id);
                Ok(())
            }
            Err(e) => {
                self.resync(&e).await;
                Err(e)
            }
        }
    }

    pub async fn set_room_status(&self, id: Ulid, status: RoomStatus) -> Result<Room, EngineError> {
        let pending = self.store.stage_room_status(id, status);
        match self.backend.set_room_status(id, status).await {
            Ok(room) => {
                match pending {
                    Some(p) => p.commit_room(room.clone()),
                    None => self.store.upsert_room(room.clone()),
                }
                Ok(room)
            }
            Err(e) => {
                if let Some(p) = pending {
                    p.rollback();
                }
                self.resync(&e).await;
                Err(e)
            }
        }
    }

    pub async fn create_booking(&self, new: NewBooking) -> Result<Booking, EngineError> {
        if !valid_initial(new.status) {
            return Err(EngineError::validation(
                "status",
                format!("a new booking cannot start as {}", new.status),
            ));
        }
        let stay = new.stay();
        validate_booking_fields(&new.guest_name, &new.guest_phone, &stay, new.total_price)?;
        self.ensure_free(new.room_id, &stay, None)?;

        match self.backend.create_booking(new).await {
            Ok(booking) => {
                self.store.upsert_booking(booking.clone());
                Ok(booking)
            }
            Err(e) => {
                self.resync(&e).await;
                Err(e)
            }
        }
    }

    pub async fn update_booking(&self, id: Ulid, update: BookingUpdate) -> Result<Booking, EngineError> {
        let stay = update.stay();
        validate_booking_fields(&update.guest_name, &update.guest_phone, &stay, update.total_price)?;
        if let Some(current) = self.store.booking(id) {
            if current.status.is_terminal() {
                return Err(EngineError::validation(
                    "status",
                    format!("a {} booking cannot be edited", current.status),
                ));
            }
            self.ensure_free(current.room_id, &stay, Some(id))?;
        }

        match self.backend.update_booking(id, update).await {
            Ok(booking) => {
                self.store.upsert_booking(booking.clone());
                Ok(booking)
            }
            Err(e) => {
                self.resync(&e).await;
                Err(e)
            }
        }
    }

    /// Optimistic: the store shows `to` at once and is rolled back if the
    /// backend refuses. Illegal moves are caught before any request.
    pub async fn set_booking_status(&self, id: Ulid, to: BookingStatus) -> Result<Booking, EngineError> {
        if let Some(current) = self.store.booking(id) {
            transition(current.status, to)?;
        }
        let pending = self.store.stage_booking_status(id, to);
        match self.backend.set_booking_status(id, to).await {
            Ok(booking) => {
                match pending {
                    Some(p) => p.commit_booking(booking.clone()),
                    None => self.store.upsert_booking(booking.clone()),
                }
                Ok(booking)
            }
            Err(e) => {
                if let Some(p) = pending {
                    p.rollback();
                }
                self.resync(&e).await;
                Err(e)
            }
        }
    }

    /// Every synced room as guests see it on `day`.
    pub fn room_views(&self, day: Day) -> Vec<RoomView> {
        let bookings = self.store.bookings();
        self.store
            .rooms()
            .iter()
            .map(|room| room_view(room, &bookings, day))
            .collect()
    }
}
