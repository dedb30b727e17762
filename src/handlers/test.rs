use axum::response::Json;
use serde::Serialize;

use crate::models::booking::{BookingRequest, LookupRequest};

// Health check endpoint
pub async fn health_check() -> &'static str {
    "OK"
}

// Test data structure for sample payloads
#[derive(Debug, Serialize)]
pub struct TestBookingPayloads {
    pub sample_booking_request: BookingRequest,
    pub sample_lookup_request: LookupRequest,
    pub api_endpoints: Vec<String>,
}

// Test endpoint that returns sample request payloads
pub async fn test_payloads() -> Json<TestBookingPayloads> {
    let sample_booking = BookingRequest {
        timeslots: vec![
            "2026-01-05 10:00".to_string(),
            "2026-01-05 10:45".to_string(),
        ],
        phone_number: "5551234567".to_string(),
    };

    let sample_lookup = LookupRequest {
        phone_number: "5551234567".to_string(),
    };

    let endpoints = vec![
        "GET / - List open time slots".to_string(),
        "POST /book - Submit a booking".to_string(),
        "GET /payment/verify?transid=&invoice_id= - Gateway callback".to_string(),
        "GET /confirmation - One-time booking confirmation".to_string(),
        "GET|POST /my-appointments - Look up appointments".to_string(),
        "GET /logout - Clear the session identity".to_string(),
    ];

    Json(TestBookingPayloads {
        sample_booking_request: sample_booking,
        sample_lookup_request: sample_lookup,
        api_endpoints: endpoints,
    })
}
