use axum_test::{TestServer, TestServerConfig};
use chrono::{Datelike, Duration, FixedOffset, Utc};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use tempfile::tempdir;

use crate::client::{MockPaymentGateway, PaymentError, VerifyOutcome};
use crate::handlers::api::AppState;
use crate::models::booking::{BookingPhase, BookingResponse, ConfirmationResponse};
use crate::routes::create_router;
use crate::services::database::DatabaseService;
use crate::services::sessions::SessionStore;
use crate::services::time_slots::REST_DAYS;

/// API handler tests
#[cfg(test)]
mod api_tests {
    use super::*;

    // Helper function to set up a test server with mock dependencies
    fn setup_test_server(
        payment_enabled: bool,
        gateway: MockPaymentGateway,
    ) -> (TestServer, Arc<DatabaseService>, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db_service = Arc::new(DatabaseService::new(dir.path().to_str().unwrap()));

        let app_state = Arc::new(AppState {
            gateway: Arc::new(gateway),
            database: Arc::clone(&db_service),
            sessions: Arc::new(SessionStore::new()),
            payment_enabled,
            unit_price: 500_000,
            public_base_url: "http://localhost:3000".to_string(),
            tz_offset: FixedOffset::east_opt(0).unwrap(),
        });

        // Always use development mode in tests
        let router = create_router(app_state, false);

        let config = TestServerConfig::builder()
            .save_cookies()
            .mock_transport()
            .build();
        let server = TestServer::new_with_config(router, config).unwrap();

        (server, db_service, dir)
    }

    // First two grid slots of the next open day, always in the future
    fn next_bookable_slots() -> (String, String) {
        let mut day = Utc::now().date_naive() + Duration::days(1);
        while REST_DAYS.contains(&day.weekday()) {
            day += Duration::days(1);
        }
        (
            format!("{} 10:00", day.format("%Y-%m-%d")),
            format!("{} 10:45", day.format("%Y-%m-%d")),
        )
    }

    #[tokio::test]
    async fn test_health_check() {
        let (server, _db, _dir) = setup_test_server(false, MockPaymentGateway::new());
        let response = server.get("/health").await;
        response.assert_status_ok();
        assert_eq!(response.text(), "OK");
    }

    #[tokio::test]
    async fn test_slot_listing() {
        let (server, _db, _dir) = setup_test_server(false, MockPaymentGateway::new());

        let response = server.get("/").await;
        response.assert_status_ok();

        let body: Value = response.json();
        let slots = body["slots"].as_array().unwrap();
        assert!(!slots.is_empty());
        // Every offered slot carries a canonical value and a display label
        for slot in slots {
            assert!(slot["value"].as_str().unwrap().len() == 16);
            assert!(!slot["display"].as_str().unwrap().is_empty());
        }
    }

    #[tokio::test]
    async fn test_direct_booking_and_one_shot_confirmation() {
        let (server, db, _dir) = setup_test_server(false, MockPaymentGateway::new());
        let (slot1, _) = next_bookable_slots();

        let response = server
            .post("/book")
            .json(&json!({ "timeslots": [slot1.clone()], "phone_number": "5551234567" }))
            .await;
        response.assert_status_ok();

        let body: BookingResponse = response.json();
        assert!(body.success);
        assert_eq!(body.phase, BookingPhase::Confirmed);
        assert_eq!(body.booked, vec![slot1.clone()]);

        // Ledger row exists and the device got bound
        assert!(db.list_booked().unwrap().contains(&slot1));
        assert!(db.find_device_for_phone("5551234567").unwrap().is_some());

        // Confirmation is shown once, then consumed
        let first: ConfirmationResponse = server.get("/confirmation").await.json();
        assert!(first.success);
        assert_eq!(first.booked_slots.len(), 1);
        assert_eq!(first.phone_number.as_deref(), Some("5551234567"));

        let second: ConfirmationResponse = server.get("/confirmation").await.json();
        assert!(!second.success);
    }

    #[tokio::test]
    async fn test_booking_validation_failures() {
        let (server, db, _dir) = setup_test_server(false, MockPaymentGateway::new());
        let (slot1, _) = next_bookable_slots();

        // No slots selected
        let body: BookingResponse = server
            .post("/book")
            .json(&json!({ "timeslots": [], "phone_number": "5551234567" }))
            .await
            .json();
        assert_eq!(body.phase, BookingPhase::Rejected);

        // Invalid phone
        let body: BookingResponse = server
            .post("/book")
            .json(&json!({ "timeslots": [slot1], "phone_number": "12ab" }))
            .await
            .json();
        assert_eq!(body.phase, BookingPhase::Rejected);

        // Off-grid slot
        let body: BookingResponse = server
            .post("/book")
            .json(&json!({ "timeslots": ["2026-01-03 10:17"], "phone_number": "5551234567" }))
            .await
            .json();
        assert_eq!(body.phase, BookingPhase::Rejected);

        assert!(db.list_booked().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_direct_booking_partial_conflict() {
        let (server, db, _dir) = setup_test_server(false, MockPaymentGateway::new());
        let (slot1, slot2) = next_bookable_slots();

        db.insert_appointment(&slot1, "5550000001", None, None)
            .unwrap();

        let body: BookingResponse = server
            .post("/book")
            .json(&json!({ "timeslots": [slot1.clone(), slot2.clone()], "phone_number": "5551234567" }))
            .await
            .json();

        // The free slot books, the taken one is reported per-slot
        assert!(body.success);
        assert_eq!(body.phase, BookingPhase::Confirmed);
        assert_eq!(body.booked, vec![slot2]);
        assert_eq!(body.failed.len(), 1);
        assert_eq!(body.failed[0].timeslot, slot1);
    }

    #[tokio::test]
    async fn test_payment_flow_confirms_after_capture() {
        let captured_invoice: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
        let capture = Arc::clone(&captured_invoice);

        let mut gateway = MockPaymentGateway::new();
        gateway
            .expect_create_transaction()
            .returning(move |_, invoice_id, _, _| {
                *capture.lock().unwrap() = Some(invoice_id.to_string());
                Ok("https://gateway.example/pay/token123".to_string())
            });
        gateway.expect_verify_transaction().returning(|_, _| {
            Ok(VerifyOutcome {
                success: true,
                code: 1,
                message: "captured".to_string(),
            })
        });

        let (server, db, _dir) = setup_test_server(true, gateway);
        let (slot1, slot2) = next_bookable_slots();

        let body: BookingResponse = server
            .post("/book")
            .json(&json!({ "timeslots": [slot1, slot2], "phone_number": "5551234567" }))
            .await
            .json();
        assert_eq!(body.phase, BookingPhase::PaymentRequired);
        assert_eq!(
            body.redirect_url.as_deref(),
            Some("https://gateway.example/pay/token123")
        );
        // Nothing committed before the gateway confirms
        assert!(db.list_booked().unwrap().is_empty());

        let invoice = captured_invoice.lock().unwrap().clone().unwrap();
        let body: BookingResponse = server
            .get(&format!(
                "/payment/verify?transid=tx-77&invoice_id={}",
                invoice
            ))
            .await
            .json();

        assert!(body.success);
        assert_eq!(body.phase, BookingPhase::Confirmed);
        assert_eq!(body.booked.len(), 2);

        let records = db.list_for_phone("5551234567").unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].invoice_id.as_deref(), Some(invoice.as_str()));
        assert_eq!(records[0].payment_trans_id.as_deref(), Some("tx-77"));

        // The session is now logged in for the lookup view
        let lookup: Value = server.get("/my-appointments").await.json();
        assert_eq!(lookup["logged_in_phone"], "5551234567");
        assert_eq!(lookup["appointments"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_payment_decline_books_nothing_and_consumes_pending() {
        let mut gateway = MockPaymentGateway::new();
        let captured_invoice: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
        let capture = Arc::clone(&captured_invoice);
        gateway
            .expect_create_transaction()
            .returning(move |_, invoice_id, _, _| {
                *capture.lock().unwrap() = Some(invoice_id.to_string());
                Ok("https://gateway.example/pay/token123".to_string())
            });
        gateway.expect_verify_transaction().returning(|_, _| {
            Ok(VerifyOutcome {
                success: false,
                code: 11,
                message: "declined".to_string(),
            })
        });

        let (server, db, _dir) = setup_test_server(true, gateway);
        let (slot1, _) = next_bookable_slots();

        server
            .post("/book")
            .json(&json!({ "timeslots": [slot1], "phone_number": "5551234567" }))
            .await;
        let invoice = captured_invoice.lock().unwrap().clone().unwrap();

        let url = format!("/payment/verify?transid=tx-1&invoice_id={}", invoice);
        let body: BookingResponse = server.get(&url).await.json();
        assert_eq!(body.phase, BookingPhase::PaymentFailed);
        assert!(db.list_booked().unwrap().is_empty());

        // Pending was consumed: a second callback finds no booking to settle
        let body: BookingResponse = server.get(&url).await.json();
        assert_eq!(body.phase, BookingPhase::Rejected);
    }

    #[tokio::test]
    async fn test_payment_verify_transport_failure_keeps_pending() {
        let mut gateway = MockPaymentGateway::new();
        let captured_invoice: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
        let capture = Arc::clone(&captured_invoice);
        gateway
            .expect_create_transaction()
            .returning(move |_, invoice_id, _, _| {
                *capture.lock().unwrap() = Some(invoice_id.to_string());
                Ok("https://gateway.example/pay/token123".to_string())
            });
        gateway
            .expect_verify_transaction()
            .returning(|_, _| Err(PaymentError::Transport("connection reset".to_string())));

        let (server, db, _dir) = setup_test_server(true, gateway);
        let (slot1, _) = next_bookable_slots();

        server
            .post("/book")
            .json(&json!({ "timeslots": [slot1], "phone_number": "5551234567" }))
            .await;
        let invoice = captured_invoice.lock().unwrap().clone().unwrap();

        let url = format!("/payment/verify?transid=tx-1&invoice_id={}", invoice);
        let body: BookingResponse = server.get(&url).await.json();
        assert_eq!(body.phase, BookingPhase::Ambiguous);
        assert!(body.message.contains(&invoice));
        assert!(db.list_booked().unwrap().is_empty());

        // The pending booking survives for support follow-up
        let body: BookingResponse = server.get(&url).await.json();
        assert_eq!(body.phase, BookingPhase::Ambiguous);
    }

    #[tokio::test]
    async fn test_payment_verify_without_pending_is_rejected() {
        let (server, _db, _dir) = setup_test_server(true, MockPaymentGateway::new());

        let body: BookingResponse = server
            .get("/payment/verify?transid=tx-1&invoice_id=123456789012")
            .await
            .json();
        assert!(!body.success);
        assert_eq!(body.phase, BookingPhase::Rejected);
        assert!(body.message.contains("expired"));
    }

    #[tokio::test]
    async fn test_lookup_login_logout_and_auto_login() {
        let (server, db, _dir) = setup_test_server(false, MockPaymentGateway::new());
        let (slot1, _) = next_bookable_slots();

        db.insert_appointment("2020-06-01 10:00", "5551234567", None, None)
            .unwrap();
        db.insert_appointment(&slot1, "5551234567", None, None)
            .unwrap();

        // Explicit phone lookup acts as a login and binds the device
        let body: Value = server
            .post("/my-appointments")
            .json(&json!({ "phone_number": "5551234567" }))
            .await
            .json();
        assert_eq!(body["success"], true);
        assert_eq!(body["logged_in_phone"], "5551234567");

        let appointments = body["appointments"].as_array().unwrap();
        assert_eq!(appointments.len(), 2);
        assert_eq!(appointments[0]["status"], "passed");
        assert_eq!(appointments[1]["status"], "future");
        assert!(body["device_info"].is_object());

        // Logout clears the session identity only
        let logout: Value = server.get("/logout").await.json();
        assert_eq!(logout["success"], true);

        // The device cookie survives, so the next visit auto-logs-in
        let body: Value = server.get("/my-appointments").await.json();
        assert_eq!(body["auto_login"], true);
        assert_eq!(body["logged_in_phone"], "5551234567");
    }

    #[tokio::test]
    async fn test_lookup_with_invalid_phone() {
        let (server, _db, _dir) = setup_test_server(false, MockPaymentGateway::new());

        let body: Value = server
            .post("/my-appointments")
            .json(&json!({ "phone_number": "12ab" }))
            .await
            .json();
        assert_eq!(body["success"], false);
        assert_eq!(body["form_phone_number"], "12ab");
        assert!(body["logged_in_phone"].is_null());
    }

    #[tokio::test]
    async fn test_anonymous_lookup_prompts_for_phone() {
        let (server, _db, _dir) = setup_test_server(false, MockPaymentGateway::new());

        let body: Value = server.get("/my-appointments").await.json();
        assert_eq!(body["auto_login"], false);
        assert!(body["logged_in_phone"].is_null());
        assert!(body["appointments"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sample_payload_route_available_in_development() {
        let (server, _db, _dir) = setup_test_server(false, MockPaymentGateway::new());

        let response = server.get("/test/payloads").await;
        response.assert_status_ok();
        let body: Value = response.json();
        assert!(body["api_endpoints"].as_array().unwrap().len() >= 6);
    }
}
