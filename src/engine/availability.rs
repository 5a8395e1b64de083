use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::model::*;

/// Result of checking a proposed stay against a room's bookings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Availability {
    /// Every blocking reservation, ordered by check-in.
    pub conflicts: Vec<Booking>,
}

impl Availability {
    pub fn conflict(&self) -> bool {
        !self.conflicts.is_empty()
    }
}

// ── Availability Checker ──────────────────────────────────────────

/// Pure conflict scan. Keeps bookings of `room_id` that are still active,
/// skips `exclude` (the booking being edited) and collects all that overlap.
///
/// Range validation (e.g. zero-length stays) is the caller's job.
pub fn check_availability<'a>(
    room_id: Ulid,
    stay: &Stay,
    bookings: impl IntoIterator<Item = &'a Booking>,
    exclude: Option<Ulid>,
) -> Availability {
    let mut conflicts: Vec<Booking> = bookings
        .into_iter()
        .filter(|b| b.room_id == room_id)
        .filter(|b| b.is_active())
        .filter(|b| Some(b.id) != exclude)
        .filter(|b| b.stay().overlaps(stay))
        .cloned()
        .collect();
    conflicts.sort_by_key(|b| (b.check_in, b.id));
    Availability { conflicts }
}

// ── Occupancy derivation ─────────────────────────────────────────

/// What the room's bookings say about `day`.
pub fn occupancy<'a>(bookings: impl IntoIterator<Item = &'a Booking>, day: Day) -> Occupancy {
    let mut occupancy = Occupancy::Vacant;
    for b in bookings {
        if !b.stay().contains_day(day) {
            continue;
        }
        match b.status {
            BookingStatus::Confirmed => return Occupancy::Occupied,
            BookingStatus::Pending => occupancy = Occupancy::Requested,
            BookingStatus::Completed | BookingStatus::Cancelled => {}
        }
    }
    occupancy
}

/// Reconcile the operator register with derived occupancy.
///
/// Maintenance and Hidden always win and unlist the room. Otherwise any
/// active booking covering `day` shows the room as Occupied; a manual
/// Occupied with no booking is kept as the operator set it.
pub fn room_view<'a>(
    room: &Room,
    bookings: impl IntoIterator<Item = &'a Booking>,
    day: Day,
) -> RoomView {
    let room_bookings = bookings.into_iter().filter(|b| b.room_id == room.id);
    let occupancy = occupancy(room_bookings, day);
    let effective_status = match (room.status, occupancy) {
        (status, _) if status.suppresses_listing() => status,
        (_, Occupancy::Occupied | Occupancy::Requested) => RoomStatus::Occupied,
        (status, Occupancy::Vacant) => status,
    };
    RoomView {
        room: room.clone(),
        occupancy,
        effective_status,
        listed: !room.status.suppresses_listing(),
    }
}

// ── Free windows ─────────────────────────────────────────────────

/// Sub-ranges of `[from, to)` not covered by any active booking.
pub fn free_windows<'a>(
    bookings: impl IntoIterator<Item = &'a Booking>,
    from: Day,
    to: Day,
) -> Vec<Stay> {
    if from >= to {
        return Vec::new();
    }
    let window = Stay::new(from, to);
    let mut taken: Vec<Stay> = bookings
        .into_iter()
        .filter(|b| b.is_active() && b.stay().overlaps(&window))
        .map(|b| {
            let start = b.check_in.max(from);
            let end = b.stay().end_or_max().min(to);
            Stay::new(start, end)
        })
        .collect();
    taken.sort_by_key(|s| s.check_in);
    let taken = merge_overlapping(&taken);
    subtract_stays(&[window], &taken)
}

/// Merge sorted, bounded stays that overlap or touch.
pub fn merge_overlapping(sorted: &[Stay]) -> Vec<Stay> {
    let mut merged: Vec<Stay> = Vec::new();
    for &stay in sorted {
        if let Some(last) = merged.last_mut()
            && stay.check_in <= last.end_or_max()
        {
            last.check_out = Some(last.end_or_max().max(stay.end_or_max()));
            continue;
        }
        merged.push(stay);
    }
    merged
}

/// Remove sorted, disjoint `to_remove` ranges from sorted, disjoint `base` ranges.
pub fn subtract_stays(base: &[Stay], to_remove: &[Stay]) -> Vec<Stay> {
    let mut result = Vec::new();
    let mut ri = 0;

    for b in base {
        let mut current_start = b.check_in;
        let current_end = b.end_or_max();

        while ri < to_remove.len() && to_remove[ri].end_or_max() <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].check_in < current_end {
            let r = &to_remove[j];
            if r.check_in > current_start {
                result.push(Stay::new(current_start, r.check_in));
            }
            current_start = current_start.max(r.end_or_max());
            j += 1;
        }

        if current_start < current_end {
            result.push(Stay::new(current_start, current_end));
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn d(s: &str) -> Day {
        s.parse().unwrap()
    }

    fn stay(a: &str, b: &str) -> Stay {
        Stay::new(d(a), d(b))
    }

    fn booking(room_id: Ulid, a: &str, b: Option<&str>, status: BookingStatus) -> Booking {
        Booking {
            id: Ulid::new(),
            room_id,
            partner_id: Ulid::nil(),
            guest_name: "Guest".into(),
            guest_phone: "5550100".into(),
            check_in: d(a),
            check_out: b.map(d),
            total_price: 0.0,
            status,
            created_at: Utc::now(),
        }
    }

    // ── check_availability ───────────────────────────────

    #[test]
    fn overlapping_request_reports_existing_booking() {
        let r1 = Ulid::new();
        let existing = booking(r1, "2024-06-01", Some("2024-06-10"), BookingStatus::Confirmed);
        let bookings = vec![existing.clone()];
        let result = check_availability(r1, &stay("2024-06-05", "2024-06-15"), &bookings, None);
        assert!(result.conflict());
        assert_eq!(result.conflicts, vec![existing]);
    }

    #[test]
    fn adjacent_request_on_either_edge_is_clear() {
        let r1 = Ulid::new();
        let bookings = vec![booking(r1, "2024-06-10", Some("2024-06-20"), BookingStatus::Pending)];
        assert!(!check_availability(r1, &stay("2024-06-20", "2024-06-25"), &bookings, None).conflict());
        assert!(!check_availability(r1, &stay("2024-06-01", "2024-06-10"), &bookings, None).conflict());
    }

    #[test]
    fn containment_both_ways_conflicts() {
        let r1 = Ulid::new();
        let bookings = vec![booking(r1, "2024-06-10", Some("2024-06-20"), BookingStatus::Confirmed)];
        // proposed range fully contains the booking
        assert!(check_availability(r1, &stay("2024-06-01", "2024-06-30"), &bookings, None).conflict());
        // proposed range fully inside the booking
        assert!(check_availability(r1, &stay("2024-06-12", "2024-06-13"), &bookings, None).conflict());
    }

    #[test]
    fn terminal_bookings_and_other_rooms_ignored() {
        let r1 = Ulid::new();
        let bookings = vec![
            booking(r1, "2024-06-01", Some("2024-06-10"), BookingStatus::Cancelled),
            booking(r1, "2024-06-01", Some("2024-06-10"), BookingStatus::Completed),
            booking(Ulid::new(), "2024-06-01", Some("2024-06-10"), BookingStatus::Confirmed),
        ];
        assert!(!check_availability(r1, &stay("2024-06-05", "2024-06-15"), &bookings, None).conflict());
    }

    #[test]
    fn excluded_booking_does_not_conflict_with_itself() {
        let r1 = Ulid::new();
        let own = booking(r1, "2024-06-01", Some("2024-06-10"), BookingStatus::Confirmed);
        let bookings = vec![own.clone()];
        let moved = stay("2024-06-03", "2024-06-12");
        assert!(check_availability(r1, &moved, &bookings, None).conflict());
        assert!(!check_availability(r1, &moved, &bookings, Some(own.id)).conflict());
    }

    #[test]
    fn all_conflicts_collected_in_check_in_order() {
        let r1 = Ulid::new();
        let bookings = vec![
            booking(r1, "2024-06-20", Some("2024-06-25"), BookingStatus::Pending),
            booking(r1, "2024-06-01", Some("2024-06-05"), BookingStatus::Confirmed),
            booking(r1, "2024-06-10", Some("2024-06-12"), BookingStatus::Confirmed),
        ];
        let result = check_availability(r1, &stay("2024-06-03", "2024-06-22"), &bookings, None);
        let starts: Vec<_> = result.conflicts.iter().map(|b| b.check_in).collect();
        assert_eq!(starts, vec![d("2024-06-01"), d("2024-06-10"), d("2024-06-20")]);
    }

    #[test]
    fn open_ended_booking_blocks_everything_after() {
        let r1 = Ulid::new();
        let bookings = vec![booking(r1, "2024-06-01", None, BookingStatus::Confirmed)];
        assert!(check_availability(r1, &stay("2031-01-01", "2031-02-01"), &bookings, None).conflict());
        assert!(!check_availability(r1, &stay("2024-05-01", "2024-06-01"), &bookings, None).conflict());
        // open-ended request against a booking that ends later
        let bookings = vec![booking(r1, "2024-07-01", Some("2024-07-05"), BookingStatus::Pending)];
        assert!(check_availability(r1, &Stay::open_ended(d("2024-06-01")), &bookings, None).conflict());
    }

    #[test]
    fn checker_is_idempotent() {
        let r1 = Ulid::new();
        let bookings = vec![
            booking(r1, "2024-06-01", Some("2024-06-10"), BookingStatus::Confirmed),
            booking(r1, "2024-06-08", Some("2024-06-09"), BookingStatus::Pending),
        ];
        let before = bookings.clone();
        let q = stay("2024-06-05", "2024-06-15");
        let first = check_availability(r1, &q, &bookings, None);
        let second = check_availability(r1, &q, &bookings, None);
        assert_eq!(first, second);
        assert_eq!(bookings, before);
    }

    // ── occupancy / room_view ────────────────────────────

    #[test]
    fn occupancy_prefers_confirmed() {
        let r1 = Ulid::new();
        let bookings = vec![
            booking(r1, "2024-06-01", Some("2024-06-10"), BookingStatus::Pending),
            booking(r1, "2024-06-05", Some("2024-06-07"), BookingStatus::Confirmed),
        ];
        assert_eq!(occupancy(&bookings, d("2024-06-02")), Occupancy::Requested);
        assert_eq!(occupancy(&bookings, d("2024-06-06")), Occupancy::Occupied);
        assert_eq!(occupancy(&bookings, d("2024-06-10")), Occupancy::Vacant);
    }

    #[test]
    fn register_override_wins() {
        let mut room = crate::model::tests::sample_room();
        let bookings = vec![booking(room.id, "2024-06-01", None, BookingStatus::Confirmed)];
        let view = room_view(&room, &bookings, d("2024-06-02"));
        assert_eq!(view.effective_status, RoomStatus::Occupied);
        assert!(view.listed);

        room.status = RoomStatus::Maintenance;
        let view = room_view(&room, &bookings, d("2024-06-02"));
        assert_eq!(view.effective_status, RoomStatus::Maintenance);
        assert_eq!(view.occupancy, Occupancy::Occupied);
        assert!(!view.listed);
    }

    #[test]
    fn cancelled_booking_frees_room() {
        let room = crate::model::tests::sample_room();
        let mut bookings = vec![booking(room.id, "2024-06-01", Some("2024-06-10"), BookingStatus::Confirmed)];
        assert_eq!(room_view(&room, &bookings, d("2024-06-03")).effective_status, RoomStatus::Occupied);
        bookings[0].status = BookingStatus::Cancelled;
        let view = room_view(&room, &bookings, d("2024-06-03"));
        assert_eq!(view.effective_status, RoomStatus::Available);
        // derivation is idempotent
        assert_eq!(room_view(&room, &bookings, d("2024-06-03")), view);
    }

    #[test]
    fn manual_occupied_kept_when_vacant() {
        let mut room = crate::model::tests::sample_room();
        room.status = RoomStatus::Occupied;
        let view = room_view(&room, &[], d("2024-06-03"));
        assert_eq!(view.occupancy, Occupancy::Vacant);
        assert_eq!(view.effective_status, RoomStatus::Occupied);
    }

    // ── free windows ─────────────────────────────────────

    #[test]
    fn free_windows_between_bookings() {
        let r1 = Ulid::new();
        let bookings = vec![
            booking(r1, "2024-06-05", Some("2024-06-10"), BookingStatus::Confirmed),
            booking(r1, "2024-06-08", Some("2024-06-12"), BookingStatus::Pending),
            booking(r1, "2024-06-15", Some("2024-06-20"), BookingStatus::Cancelled),
            booking(r1, "2024-06-25", None, BookingStatus::Confirmed),
        ];
        let free = free_windows(&bookings, d("2024-06-01"), d("2024-07-01"));
        assert_eq!(
            free,
            vec![stay("2024-06-01", "2024-06-05"), stay("2024-06-12", "2024-06-25")]
        );
    }

    #[test]
    fn free_windows_empty_query() {
        assert!(free_windows(&[], d("2024-06-01"), d("2024-06-01")).is_empty());
        assert_eq!(
            free_windows(&[], d("2024-06-01"), d("2024-06-03")),
            vec![stay("2024-06-01", "2024-06-03")]
        );
    }

    #[test]
    fn merge_adjacent_stays() {
        let merged = merge_overlapping(&[stay("2024-06-01", "2024-06-05"), stay("2024-06-05", "2024-06-07")]);
        assert_eq!(merged, vec![stay("2024-06-01", "2024-06-07")]);
    }

    #[test]
    fn subtract_middle_punch() {
        let result = subtract_stays(&[stay("2024-06-01", "2024-06-30")], &[stay("2024-06-10", "2024-06-12")]);
        assert_eq!(result, vec![stay("2024-06-01", "2024-06-10"), stay("2024-06-12", "2024-06-30")]);
    }
}
