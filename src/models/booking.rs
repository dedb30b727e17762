use serde::{Deserialize, Serialize};

use crate::models::device::DeviceInfo;
use crate::models::slot::SlotStatus;

// Booking form payload
#[derive(Debug, Deserialize, Serialize)]
pub struct BookingRequest {
    pub timeslots: Vec<String>,
    pub phone_number: String,
}

/// Terminal (or redirecting) state of one booking attempt as reported to the
/// caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingPhase {
    Confirmed,
    PaymentRequired,
    PaymentFailed,
    Ambiguous,
    Rejected,
}

impl BookingPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingPhase::Confirmed => "confirmed",
            BookingPhase::PaymentRequired => "payment_required",
            BookingPhase::PaymentFailed => "payment_failed",
            BookingPhase::Ambiguous => "ambiguous",
            BookingPhase::Rejected => "rejected",
        }
    }
}

// A slot the attempt could not book, with the user-facing reason
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotFailure {
    pub timeslot: String,
    pub reason: String,
}

// Response structure for booking submission and payment verification
#[derive(Debug, Serialize, Deserialize)]
pub struct BookingResponse {
    pub success: bool,
    pub phase: BookingPhase,
    pub message: String,
    pub booked: Vec<String>,
    pub failed: Vec<SlotFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_url: Option<String>,
}

/// Ephemeral state bridging payment initiation and the gateway callback.
/// Lives in the server-side session; consumed exactly once by the verify
/// step, except on an ambiguous transport failure where it is deliberately
/// kept for support follow-up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingBooking {
    pub timeslots: Vec<String>,
    pub phone_number: String,
    pub amount: u64,
    pub invoice_id: String,
}

// Query parameters of the gateway callback
#[derive(Debug, Deserialize)]
pub struct VerifyParams {
    pub transid: String,
    pub invoice_id: String,
}

// One-shot data behind GET /confirmation
#[derive(Debug, Serialize, Deserialize)]
pub struct ConfirmationResponse {
    pub success: bool,
    pub phone_number: Option<String>,
    pub booked_slots: Vec<String>,
    pub message: String,
}

// Phone lookup payload for POST /my-appointments
#[derive(Debug, Deserialize, Serialize)]
pub struct LookupRequest {
    pub phone_number: String,
}

// An appointment annotated for display
#[derive(Debug, Serialize, Deserialize)]
pub struct AppointmentView {
    pub timeslot: String,
    pub display: String,
    pub status: SlotStatus,
}

// Response structure for the appointments lookup endpoint
#[derive(Debug, Serialize)]
pub struct MyAppointmentsResponse {
    pub success: bool,
    pub logged_in_phone: Option<String>,
    pub form_phone_number: String,
    pub auto_login: bool,
    pub appointments: Vec<AppointmentView>,
    pub device_info: Option<DeviceInfo>,
    pub message: String,
}

// Generic envelope for logout and error replies
#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub success: bool,
    pub message: String,
}
