use chrono::NaiveDate;

pub const MAX_ROOMS_PER_PARTNER: usize = 10_000;
pub const MAX_BOOKINGS_PER_ROOM: usize = 10_000;
pub const MAX_NAME_LEN: usize = 200;
pub const MAX_TITLE_LEN: usize = 200;
pub const MAX_LOCATION_LEN: usize = 200;
pub const MAX_AMENITIES: usize = 64;
pub const MAX_AMENITY_LEN: usize = 64;

/// Phone numbers: optional leading `+`, then this many digits.
pub const MIN_PHONE_DIGITS: usize = 7;
pub const MAX_PHONE_DIGITS: usize = 15;

/// Longest bounded stay (about ten years).
pub const MAX_STAY_DAYS: i64 = 3_660;
/// Widest window for free-window queries.
pub const MAX_QUERY_WINDOW_DAYS: i64 = 3_660;

pub const MIN_VALID_DATE: NaiveDate = match NaiveDate::from_ymd_opt(2000, 1, 1) {
    Some(d) => d,
    None => panic!("invalid MIN_VALID_DATE"),
};
pub const MAX_VALID_DATE: NaiveDate = match NaiveDate::from_ymd_opt(2200, 12, 31) {
    Some(d) => d,
    None => panic!("invalid MAX_VALID_DATE"),
};

/// Upper bound on any single price, in the local currency.
pub const MAX_PRICE: f64 = 1e12;
