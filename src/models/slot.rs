use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::services::time_slots::SLOT_DURATION_MINUTES;

/// Canonical wire format for a bookable time slot, in business-local time.
pub const SLOT_FORMAT: &str = "%Y-%m-%d %H:%M";

/// A fixed-duration bookable calendar interval, identified by its start.
///
/// The canonical string form is `"YYYY-MM-DD HH:MM"` in the business
/// timezone. Parsing and formatting round-trip exactly, so the string can be
/// used as the ledger key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeSlot(NaiveDateTime);

impl TimeSlot {
    pub fn new(start: NaiveDateTime) -> Self {
        TimeSlot(start)
    }

    /// Parse a slot from its canonical string form.
    pub fn parse(value: &str) -> Result<Self, String> {
        NaiveDateTime::parse_from_str(value, SLOT_FORMAT)
            .map(TimeSlot)
            .map_err(|e| format!("invalid time slot '{}': {}", value, e))
    }

    pub fn start(&self) -> NaiveDateTime {
        self.0
    }

    pub fn end(&self) -> NaiveDateTime {
        self.0 + Duration::minutes(SLOT_DURATION_MINUTES)
    }

    /// Canonical string form, usable as a ledger key.
    pub fn canonical(&self) -> String {
        self.0.format(SLOT_FORMAT).to_string()
    }

    /// Human-readable label for API responses.
    pub fn display(&self) -> String {
        self.0.format("%A, %d %B %Y, %H:%M").to_string()
    }
}

impl std::fmt::Display for TimeSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.canonical())
    }
}

/// Computed position of an appointment relative to "now". Derived on read,
/// never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotStatus {
    Passed,
    Ongoing,
    Future,
}

impl SlotStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SlotStatus::Passed => "passed",
            SlotStatus::Ongoing => "ongoing",
            SlotStatus::Future => "future",
        }
    }
}

// An open slot as offered to the visitor
#[derive(Debug, Clone, Serialize)]
pub struct AvailableSlot {
    pub value: String,
    pub display: String,
}

// Response structure for the slot listing endpoint
#[derive(Debug, Serialize)]
pub struct SlotsResponse {
    pub current_time: String,
    pub slots: Vec<AvailableSlot>,
}
