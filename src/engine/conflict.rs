use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::availability::check_availability;
use super::EngineError;

pub(crate) fn today() -> Day {
    chrono::Utc::now().date_naive()
}

pub(crate) fn validate_stay(stay: &Stay) -> Result<(), EngineError> {
    if stay.check_in < MIN_VALID_DATE || stay.check_in > MAX_VALID_DATE {
        return Err(EngineError::validation("check_in", "date out of range"));
    }
    if let Some(end) = stay.check_out {
        if end <= stay.check_in {
            return Err(EngineError::validation("check_out", "must be after check_in"));
        }
        if end > MAX_VALID_DATE {
            return Err(EngineError::validation("check_out", "date out of range"));
        }
    }
    if stay.nights().is_some_and(|n| n > MAX_STAY_DAYS) {
        return Err(EngineError::LimitExceeded("stay too long".into()));
    }
    Ok(())
}

pub(crate) fn validate_guest(name: &str, phone: &str) -> Result<(), EngineError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(EngineError::validation("guest_name", "must not be empty"));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(EngineError::validation("guest_name", "too long"));
    }
    normalize_phone(phone)
        .map(|_| ())
        .ok_or_else(|| {
            EngineError::validation(
                "guest_phone",
                format!("must contain {MIN_PHONE_DIGITS} to {MAX_PHONE_DIGITS} digits"),
            )
        })
}

/// Canonical phone form: optional `+` then digits. Spaces, dashes, dots and
/// parentheses are dropped; anything else makes the number invalid.
pub fn normalize_phone(phone: &str) -> Option<String> {
    let phone = phone.trim();
    let (plus, rest) = match phone.strip_prefix('+') {
        Some(rest) => ("+", rest),
        None => ("", phone),
    };
    let mut digits = String::with_capacity(rest.len());
    for c in rest.chars() {
        match c {
            '0'..='9' => digits.push(c),
            ' ' | '-' | '.' | '(' | ')' => {}
            _ => return None,
        }
    }
    if !(MIN_PHONE_DIGITS..=MAX_PHONE_DIGITS).contains(&digits.len()) {
        return None;
    }
    Some(format!("{plus}{digits}"))
}

pub(crate) fn validate_price(field: &str, price: f64) -> Result<(), EngineError> {
    if !price.is_finite() || price < 0.0 {
        return Err(EngineError::validation(field, "must be a non-negative amount"));
    }
    if price > MAX_PRICE {
        return Err(EngineError::LimitExceeded(format!("{field} too large")));
    }
    Ok(())
}

pub(crate) fn validate_room_details(details: &RoomDetails) -> Result<(), EngineError> {
    if details.title.trim().is_empty() {
        return Err(EngineError::validation("title", "must not be empty"));
    }
    if details.title.chars().count() > MAX_TITLE_LEN {
        return Err(EngineError::validation("title", "too long"));
    }
    if details.location_name.chars().count() > MAX_LOCATION_LEN {
        return Err(EngineError::validation("location_name", "too long"));
    }
    validate_price("price_per_month", details.price_per_month)?;
    if details.amenities.len() > MAX_AMENITIES {
        return Err(EngineError::LimitExceeded("too many amenities".into()));
    }
    if details
        .amenities
        .iter()
        .any(|a| a.trim().is_empty() || a.len() > MAX_AMENITY_LEN)
    {
        return Err(EngineError::validation("amenities", "tags must be 1 to 64 bytes"));
    }
    Ok(())
}

/// Everything that can be checked about a booking without looking at the room.
pub(crate) fn validate_booking_fields(
    guest_name: &str,
    guest_phone: &str,
    stay: &Stay,
    total_price: f64,
) -> Result<(), EngineError> {
    validate_guest(guest_name, guest_phone)?;
    validate_stay(stay)?;
    validate_price("total_price", total_price)
}

/// Fail with every active booking of the room that overlaps `stay`.
/// `exclude` skips the booking being edited.
pub(crate) fn check_no_conflict(
    rs: &RoomState,
    stay: &Stay,
    exclude: Option<Ulid>,
) -> Result<(), EngineError> {
    let availability = check_availability(rs.room.id, stay, rs.overlapping(stay), exclude);
    if availability.conflict() {
        metrics::counter!(crate::observability::CONFLICTS_TOTAL).increment(1);
        return Err(EngineError::Conflict {
            stay: *stay,
            conflicts: availability.conflicts,
        });
    }
    Ok(())
}
