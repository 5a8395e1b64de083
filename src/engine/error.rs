use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::model::{Booking, BookingStatus, Stay};

#[derive(Debug, Clone, PartialEq)]
pub enum EngineError {
    Validation {
        field: String,
        reason: String,
    },
    /// The stay overlaps every listed active booking of the room.
    Conflict {
        stay: Stay,
        conflicts: Vec<Booking>,
    },
    InvalidTransition {
        from: BookingStatus,
        to: BookingStatus,
    },
    HasActiveBookings {
        room_id: Ulid,
        active: usize,
    },
    NotFound(Ulid),
    LimitExceeded(String),
    Network(String),
    WalError(String),
}

impl EngineError {
    pub fn validation(field: &str, reason: impl Into<String>) -> Self {
        EngineError::Validation {
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    /// Short machine-readable tag, also used as the `kind` of error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Validation { .. } => "validation",
            EngineError::Conflict { .. } => "conflict",
            EngineError::InvalidTransition { .. } => "invalid_transition",
            EngineError::HasActiveBookings { .. } => "has_active_bookings",
            EngineError::NotFound(_) => "not_found",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::Network(_) => "network",
            EngineError::WalError(_) => "wal",
        }
    }

    /// Resolved locally, without contacting the backend.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            EngineError::Validation { .. }
                | EngineError::Conflict { .. }
                | EngineError::InvalidTransition { .. }
                | EngineError::HasActiveBookings { .. }
        )
    }

    pub fn to_body(&self) -> ErrorBody {
        let mut detail = ErrorDetail {
            kind: self.kind().to_string(),
            message: self.to_string(),
            ..ErrorDetail::default()
        };
        match self {
            EngineError::Validation { field, reason } => {
                detail.field = Some(field.clone());
                detail.reason = Some(reason.clone());
            }
            EngineError::Conflict { stay, conflicts } => {
                detail.stay = Some(*stay);
                detail.conflicts = conflicts.clone();
            }
            EngineError::InvalidTransition { from, to } => {
                detail.from = Some(*from);
                detail.to = Some(*to);
            }
            EngineError::HasActiveBookings { room_id, active } => {
                detail.id = Some(*room_id);
                detail.active = Some(*active);
            }
            EngineError::NotFound(id) => detail.id = Some(*id),
            EngineError::LimitExceeded(msg) => detail.reason = Some(msg.clone()),
            EngineError::Network(_) | EngineError::WalError(_) => {}
        }
        ErrorBody { error: detail }
    }

    /// Rebuild an error from a response body. Anything unrecognised (server
    /// faults included) becomes `Network`, since the caller cannot act on it.
    pub fn from_body(status: u16, body: ErrorBody) -> Self {
        let d = body.error;
        match (d.kind.as_str(), d.id) {
            ("validation", _) => EngineError::Validation {
                field: d.field.unwrap_or_default(),
                reason: d.reason.unwrap_or(d.message),
            },
            ("conflict", _) => match d.stay {
                Some(stay) => EngineError::Conflict {
                    stay,
                    conflicts: d.conflicts,
                },
                None => EngineError::Network(format!("{status}: {}", d.message)),
            },
            ("invalid_transition", _) => match (d.from, d.to) {
                (Some(from), Some(to)) => EngineError::InvalidTransition { from, to },
                _ => EngineError::Network(format!("{status}: {}", d.message)),
            },
            ("has_active_bookings", Some(room_id)) => EngineError::HasActiveBookings {
                room_id,
                active: d.active.unwrap_or(0),
            },
            ("not_found", Some(id)) => EngineError::NotFound(id),
            ("limit_exceeded", _) => EngineError::LimitExceeded(d.reason.unwrap_or(d.message)),
            _ => EngineError::Network(format!("{status}: {}", d.message)),
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Validation { field, reason } => write!(f, "invalid {field}: {reason}"),
            EngineError::Conflict { conflicts, .. } => {
                write!(f, "room is unavailable for selected dates")?;
                for (i, b) in conflicts.iter().enumerate() {
                    let sep = if i == 0 { ": " } else { ", " };
                    write!(f, "{sep}{} ({})", b.stay(), b.status)?;
                }
                Ok(())
            }
            EngineError::InvalidTransition { from, to } => {
                write!(f, "cannot move booking from {from} to {to}")
            }
            EngineError::HasActiveBookings { room_id, active } => {
                write!(f, "cannot delete room {room_id}: {active} active booking(s)")
            }
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Network(e) => write!(f, "backend unavailable: {e}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

/// JSON error envelope: `{"error": {...}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub kind: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Ulid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stay: Option<Stay>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conflicts: Vec<Booking>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<BookingStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<BookingStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn conflicting(check_in: &str, check_out: &str) -> Booking {
        Booking {
            id: Ulid::new(),
            room_id: Ulid::new(),
            partner_id: Ulid::new(),
            guest_name: "Bo".into(),
            guest_phone: "5550100".into(),
            check_in: check_in.parse().unwrap(),
            check_out: Some(check_out.parse().unwrap()),
            total_price: 10.0,
            status: BookingStatus::Confirmed,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn conflict_message_lists_every_range() {
        let err = EngineError::Conflict {
            stay: Stay::new("2024-06-05".parse().unwrap(), "2024-06-15".parse().unwrap()),
            conflicts: vec![
                conflicting("2024-06-01", "2024-06-10"),
                conflicting("2024-06-12", "2024-06-14"),
            ],
        };
        assert_eq!(
            err.to_string(),
            "room is unavailable for selected dates: 2024-06-01..2024-06-10 (confirmed), \
             2024-06-12..2024-06-14 (confirmed)"
        );
    }

    #[test]
    fn body_round_trip_keeps_variant() {
        let cases = vec![
            EngineError::validation("guest_phone", "must contain 7 to 15 digits"),
            EngineError::InvalidTransition {
                from: BookingStatus::Completed,
                to: BookingStatus::Confirmed,
            },
            EngineError::HasActiveBookings { room_id: Ulid::new(), active: 2 },
            EngineError::NotFound(Ulid::new()),
            EngineError::Conflict {
                stay: Stay::open_ended("2024-06-05".parse().unwrap()),
                conflicts: vec![conflicting("2024-06-01", "2024-06-10")],
            },
        ];
        for err in cases {
            let json = serde_json::to_string(&err.to_body()).unwrap();
            let body: ErrorBody = serde_json::from_str(&json).unwrap();
            assert_eq!(EngineError::from_body(400, body), err);
        }
    }

    #[test]
    fn server_faults_become_network_errors() {
        let body = EngineError::WalError("disk full".into()).to_body();
        let err = EngineError::from_body(500, body);
        assert!(matches!(err, EngineError::Network(ref m) if m.contains("disk full")));
        assert!(!err.is_local());
    }
}
