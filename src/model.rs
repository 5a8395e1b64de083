use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Calendar day, the only date type. Time of day never matters for conflicts.
pub type Day = NaiveDate;

/// Half-open overlap test on `[start, end)` ranges. An absent end is unbounded.
pub fn overlaps(start_a: Day, end_a: Option<Day>, start_b: Day, end_b: Option<Day>) -> bool {
    end_b.is_none_or(|end_b| start_a < end_b) && end_a.is_none_or(|end_a| end_a > start_b)
}

/// A stay `[check_in, check_out)`. No `check_out` means month-to-month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Stay {
    pub check_in: Day,
    #[serde(default)]
    pub check_out: Option<Day>,
}

impl Stay {
    pub fn new(check_in: Day, check_out: Day) -> Self {
        debug_assert!(check_in < check_out, "check_in must be before check_out");
        Self {
            check_in,
            check_out: Some(check_out),
        }
    }

    pub fn open_ended(check_in: Day) -> Self {
        Self {
            check_in,
            check_out: None,
        }
    }

    pub fn overlaps(&self, other: &Stay) -> bool {
        overlaps(self.check_in, self.check_out, other.check_in, other.check_out)
    }

    pub fn contains_day(&self, day: Day) -> bool {
        self.check_in <= day && self.check_out.is_none_or(|end| day < end)
    }

    /// Number of nights, `None` for open-ended stays.
    pub fn nights(&self) -> Option<i64> {
        self.check_out
            .map(|end| end.signed_duration_since(self.check_in).num_days())
    }

    /// Exclusive end, with open-ended stays mapped to the last representable day.
    pub(crate) fn end_or_max(&self) -> Day {
        self.check_out.unwrap_or(NaiveDate::MAX)
    }
}

impl fmt::Display for Stay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.check_out {
            Some(end) => write!(f, "{}..{}", self.check_in, end),
            None => write!(f, "{}..", self.check_in),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyType {
    Boarding,
    Hostel,
    Apartment,
    House,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomType {
    Individual,
    Shared,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenderRestriction {
    #[default]
    Any,
    Male,
    Female,
}

/// Operator-set room status. Never written by booking transitions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomStatus {
    #[default]
    Available,
    Occupied,
    Maintenance,
    Hidden,
}

impl RoomStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RoomStatus::Available => "available",
            RoomStatus::Occupied => "occupied",
            RoomStatus::Maintenance => "maintenance",
            RoomStatus::Hidden => "hidden",
        }
    }

    /// Maintenance and Hidden take the room off the guest-facing listing.
    pub fn suppresses_listing(self) -> bool {
        matches!(self, RoomStatus::Maintenance | RoomStatus::Hidden)
    }
}

impl fmt::Display for RoomStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Completed,
    Cancelled,
}

impl BookingStatus {
    pub const ALL: [BookingStatus; 4] = [
        BookingStatus::Pending,
        BookingStatus::Confirmed,
        BookingStatus::Completed,
        BookingStatus::Cancelled,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
        }
    }

    /// Active bookings count toward occupancy and conflicts.
    pub fn is_active(self) -> bool {
        matches!(self, BookingStatus::Pending | BookingStatus::Confirmed)
    }

    pub fn is_terminal(self) -> bool {
        !self.is_active()
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Partner-editable room attributes. PUT replaces all of them at once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomDetails {
    pub title: String,
    pub price_per_month: f64,
    pub location_name: String,
    pub property_type: PropertyType,
    pub room_type: RoomType,
    #[serde(default)]
    pub gender_restriction: GenderRestriction,
    #[serde(default)]
    pub amenities: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Room {
    pub id: Ulid,
    pub partner_id: Ulid,
    pub title: String,
    pub price_per_month: f64,
    pub location_name: String,
    pub property_type: PropertyType,
    pub room_type: RoomType,
    pub gender_restriction: GenderRestriction,
    pub amenities: BTreeSet<String>,
    pub status: RoomStatus,
}

impl Room {
    pub fn new(id: Ulid, partner_id: Ulid, details: RoomDetails, status: RoomStatus) -> Self {
        Self {
            id,
            partner_id,
            title: details.title,
            price_per_month: details.price_per_month,
            location_name: details.location_name,
            property_type: details.property_type,
            room_type: details.room_type,
            gender_restriction: details.gender_restriction,
            amenities: details.amenities,
            status,
        }
    }

    pub fn details(&self) -> RoomDetails {
        RoomDetails {
            title: self.title.clone(),
            price_per_month: self.price_per_month,
            location_name: self.location_name.clone(),
            property_type: self.property_type,
            room_type: self.room_type,
            gender_restriction: self.gender_restriction,
            amenities: self.amenities.clone(),
        }
    }

    pub fn replace_details(&mut self, details: RoomDetails) {
        self.title = details.title;
        self.price_per_month = details.price_per_month;
        self.location_name = details.location_name;
        self.property_type = details.property_type;
        self.room_type = details.room_type;
        self.gender_restriction = details.gender_restriction;
        self.amenities = details.amenities;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub room_id: Ulid,
    pub partner_id: Ulid,
    pub guest_name: String,
    pub guest_phone: String,
    pub check_in: Day,
    #[serde(default)]
    pub check_out: Option<Day>,
    pub total_price: f64,
    pub status: BookingStatus,
    pub created_at: DateTime<Utc>,
}

impl Booking {
    pub fn stay(&self) -> Stay {
        Stay {
            check_in: self.check_in,
            check_out: self.check_out,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    pub fn apply_update(&mut self, update: &BookingUpdate) {
        self.guest_name = update.guest_name.clone();
        self.guest_phone = update.guest_phone.clone();
        self.check_in = update.check_in;
        self.check_out = update.check_out;
        self.total_price = update.total_price;
    }
}

// ── Request bodies ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRoom {
    pub partner_id: Ulid,
    #[serde(flatten)]
    pub details: RoomDetails,
    #[serde(default)]
    pub status: RoomStatus,
}

/// Partner manual entry. `status` must be Pending or Confirmed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewBooking {
    pub room_id: Ulid,
    pub guest_name: String,
    pub guest_phone: String,
    pub check_in: Day,
    #[serde(default)]
    pub check_out: Option<Day>,
    pub total_price: f64,
    pub status: BookingStatus,
}

impl NewBooking {
    pub fn stay(&self) -> Stay {
        Stay {
            check_in: self.check_in,
            check_out: self.check_out,
        }
    }
}

/// Guest self-service request. The initial status is server policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuestRequest {
    pub room_id: Ulid,
    pub guest_name: String,
    pub guest_phone: String,
    pub check_in: Day,
    #[serde(default)]
    pub check_out: Option<Day>,
    pub total_price: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookingUpdate {
    pub guest_name: String,
    pub guest_phone: String,
    pub check_in: Day,
    #[serde(default)]
    pub check_out: Option<Day>,
    pub total_price: f64,
}

impl BookingUpdate {
    pub fn stay(&self) -> Stay {
        Stay {
            check_in: self.check_in,
            check_out: self.check_out,
        }
    }
}

impl From<&Booking> for BookingUpdate {
    fn from(b: &Booking) -> Self {
        Self {
            guest_name: b.guest_name.clone(),
            guest_phone: b.guest_phone.clone(),
            check_in: b.check_in,
            check_out: b.check_out,
            total_price: b.total_price,
        }
    }
}

/// `{"status": ...}` body shared by both status endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusBody<S> {
    pub status: S,
}

// ── Room state ───────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct RoomState {
    pub room: Room,
    /// Every booking ever made for the room, sorted by `check_in`.
    pub bookings: Vec<Booking>,
}

impl RoomState {
    pub fn new(room: Room) -> Self {
        Self {
            room,
            bookings: Vec::new(),
        }
    }

    /// Insert booking maintaining sort order by check_in.
    pub fn insert_booking(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .partition_point(|b| b.check_in <= booking.check_in);
        self.bookings.insert(pos, booking);
    }

    pub fn remove_booking(&mut self, id: Ulid) -> Option<Booking> {
        let pos = self.bookings.iter().position(|b| b.id == id)?;
        Some(self.bookings.remove(pos))
    }

    pub fn booking(&self, id: Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    pub fn booking_mut(&mut self, id: Ulid) -> Option<&mut Booking> {
        self.bookings.iter_mut().find(|b| b.id == id)
    }

    pub fn active(&self) -> impl Iterator<Item = &Booking> {
        self.bookings.iter().filter(|b| b.is_active())
    }

    /// Active bookings whose stay overlaps `stay`.
    /// Bookings checking in on or after the stay's end are skipped by binary search.
    pub fn overlapping(&self, stay: &Stay) -> impl Iterator<Item = &Booking> {
        let right_bound = match stay.check_out {
            Some(end) => self.bookings.partition_point(|b| b.check_in < end),
            None => self.bookings.len(),
        };
        let stay = *stay;
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.is_active() && b.stay().overlaps(&stay))
    }
}

// ── Events ───────────────────────────────────────────────────────

/// Flat change records. Journal format and change-feed payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    RoomCreated {
        room: Room,
    },
    RoomUpdated {
        id: Ulid,
        partner_id: Ulid,
        details: RoomDetails,
    },
    RoomStatusSet {
        id: Ulid,
        partner_id: Ulid,
        status: RoomStatus,
    },
    RoomDeleted {
        id: Ulid,
        partner_id: Ulid,
    },
    BookingCreated {
        booking: Booking,
    },
    BookingUpdated {
        id: Ulid,
        room_id: Ulid,
        partner_id: Ulid,
        changes: BookingUpdate,
    },
    BookingStatusSet {
        id: Ulid,
        room_id: Ulid,
        partner_id: Ulid,
        status: BookingStatus,
    },
}

impl Event {
    pub fn partner_id(&self) -> Ulid {
        match self {
            Event::RoomCreated { room } => room.partner_id,
            Event::BookingCreated { booking } => booking.partner_id,
            Event::RoomUpdated { partner_id, .. }
            | Event::RoomStatusSet { partner_id, .. }
            | Event::RoomDeleted { partner_id, .. }
            | Event::BookingUpdated { partner_id, .. }
            | Event::BookingStatusSet { partner_id, .. } => *partner_id,
        }
    }

    pub fn room_id(&self) -> Ulid {
        match self {
            Event::RoomCreated { room } => room.id,
            Event::BookingCreated { booking } => booking.room_id,
            Event::RoomUpdated { id, .. }
            | Event::RoomStatusSet { id, .. }
            | Event::RoomDeleted { id, .. } => *id,
            Event::BookingUpdated { room_id, .. } | Event::BookingStatusSet { room_id, .. } => {
                *room_id
            }
        }
    }
}

// ── Derived views ────────────────────────────────────────────────

/// Occupancy of a room on a given day, derived from its active bookings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Occupancy {
    Vacant,
    /// Only pending requests cover the day.
    Requested,
    Occupied,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomView {
    pub room: Room,
    pub occupancy: Occupancy,
    pub effective_status: RoomStatus,
    pub listed: bool,
}
