use axum::{
    extract::{Json as ExtractJson, Query, State},
    http::{header, HeaderMap, HeaderName, StatusCode},
    response::{AppendHeaders, IntoResponse, Json, Response},
};
use chrono::{FixedOffset, NaiveDateTime};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::client::PaymentGateway;
use crate::models::booking::{
    AppointmentView, BookingPhase, BookingRequest, BookingResponse, ConfirmationResponse,
    LookupRequest, MessageResponse, MyAppointmentsResponse, VerifyParams,
};
use crate::models::device::DeviceInfo;
use crate::models::slot::{SlotsResponse, TimeSlot, SLOT_FORMAT};
use crate::services::booking::{
    book_direct, finalize_payment, initiate_payment, validate_phone, validate_submission,
};
use crate::services::database::{DatabaseService, StorageError};
use crate::services::sessions::SessionStore;
use crate::services::time_slots::{business_now, generate_time_slots, slot_status};

/// Device token cookie: one year, HTTP-only, same-site. Survives logout by
/// design; "forget this device" is a separate, unimplemented action.
pub const DEVICE_COOKIE_NAME: &str = "app_device_id";
const DEVICE_COOKIE_MAX_AGE_SECS: u64 = 365 * 24 * 60 * 60;

/// Session token cookie correlating the two requests of a payment flow.
pub const SESSION_COOKIE_NAME: &str = "booking_session";

// AppState struct containing shared resources
pub struct AppState {
    pub gateway: Arc<dyn PaymentGateway>,
    pub database: Arc<DatabaseService>,
    pub sessions: Arc<SessionStore>,
    pub payment_enabled: bool,
    pub unit_price: u64,
    pub public_base_url: String,
    pub tz_offset: FixedOffset,
}

impl AppState {
    fn now(&self) -> NaiveDateTime {
        business_now(self.tz_offset)
    }
}

// --- Cookie helpers ---

fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    let raw = headers.get(header::COOKIE)?.to_str().ok()?;
    raw.split(';')
        .filter_map(|pair| {
            let mut parts = pair.trim().splitn(2, '=');
            Some((parts.next()?, parts.next()?))
        })
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_string())
}

fn device_cookie(device_id: &str) -> (HeaderName, String) {
    (
        header::SET_COOKIE,
        format!(
            "{}={}; Max-Age={}; Path=/; HttpOnly; SameSite=Lax",
            DEVICE_COOKIE_NAME, device_id, DEVICE_COOKIE_MAX_AGE_SECS
        ),
    )
}

fn session_cookie(token: &str) -> (HeaderName, String) {
    (
        header::SET_COOKIE,
        format!(
            "{}={}; Path=/; HttpOnly; SameSite=Lax",
            SESSION_COOKIE_NAME, token
        ),
    )
}

fn client_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn user_agent(headers: &HeaderMap) -> String {
    headers
        .get(header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("Unknown")
        .to_string()
}

// Resolve the request's session, minting one when the cookie is missing or
// stale
fn ensure_session(state: &AppState, headers: &HeaderMap) -> String {
    if let Some(token) = cookie_value(headers, SESSION_COOKIE_NAME) {
        if state.sessions.get(&token).is_some() {
            return token;
        }
    }
    state.sessions.create()
}

// --- Handlers ---

// Slot listing endpoint
pub async fn list_slots(
    State(state): State<Arc<AppState>>,
) -> Result<Json<SlotsResponse>, StatusCode> {
    let now = state.now();

    match state.database.list_booked() {
        Ok(booked) => {
            let slots = generate_time_slots(now, &booked);
            info!("Listing {} open slots", slots.len());
            Ok(Json(SlotsResponse {
                current_time: now.format(SLOT_FORMAT).to_string(),
                slots,
            }))
        }
        Err(err) => {
            error!("Failed to load booked slots: {}", err);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

// Booking submission endpoint
pub async fn book_appointments(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    ExtractJson(request): ExtractJson<BookingRequest>,
) -> Response {
    let now = state.now();
    let token = ensure_session(&state, &headers);
    let mut cookies = vec![session_cookie(&token)];

    info!(
        "Received booking submission for {} slot(s)",
        request.timeslots.len()
    );

    let booking = match validate_submission(&request.timeslots, &request.phone_number, now) {
        Ok(booking) => booking,
        Err(message) => {
            warn!("Rejected booking submission: {}", message);
            let body = BookingResponse {
                success: false,
                phase: BookingPhase::Rejected,
                message,
                booked: Vec::new(),
                failed: Vec::new(),
                redirect_url: None,
            };
            return (AppendHeaders(cookies), Json(body)).into_response();
        }
    };

    if state.payment_enabled {
        let callback_url = format!("{}/payment/verify", state.public_base_url);
        match initiate_payment(
            state.database.as_ref(),
            state.gateway.as_ref(),
            state.unit_price,
            &callback_url,
            &booking,
        )
        .await
        {
            Ok((pending, redirect_url)) => {
                state.sessions.put_pending(&token, pending);
                let body = BookingResponse {
                    success: true,
                    phase: BookingPhase::PaymentRequired,
                    message: "Follow the redirect URL to complete the payment.".to_string(),
                    booked: Vec::new(),
                    failed: Vec::new(),
                    redirect_url: Some(redirect_url),
                };
                (AppendHeaders(cookies), Json(body)).into_response()
            }
            Err(body) => (AppendHeaders(cookies), Json(body)).into_response(),
        }
    } else {
        match book_direct(state.database.as_ref(), &booking) {
            Ok(body) => {
                if !body.booked.is_empty() {
                    let device_id = cookie_value(&headers, DEVICE_COOKIE_NAME)
                        .unwrap_or_else(|| Uuid::new_v4().to_string());
                    if let Err(err) = state.database.upsert_device_binding(
                        &booking.phone_number,
                        &device_id,
                        &user_agent(&headers),
                        None,
                    ) {
                        error!("Failed to update device binding after booking: {}", err);
                    }
                    state.sessions.login(&token, &booking.phone_number);
                    state
                        .sessions
                        .set_last_booked(&token, body.booked.clone(), &booking.phone_number);
                    cookies.push(device_cookie(&device_id));
                }
                (AppendHeaders(cookies), Json(body)).into_response()
            }
            Err(err) => {
                error!(
                    "Ledger failure while booking for {}: {}",
                    booking.phone_number, err
                );
                let body = BookingResponse {
                    success: false,
                    phase: BookingPhase::Rejected,
                    message: "A system error occurred. Please try again.".to_string(),
                    booked: Vec::new(),
                    failed: Vec::new(),
                    redirect_url: None,
                };
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    AppendHeaders(cookies),
                    Json(body),
                )
                    .into_response()
            }
        }
    }
}

// Gateway callback endpoint
pub async fn verify_payment(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<VerifyParams>,
) -> Response {
    info!(
        "Received payment verification callback for invoice {}",
        params.invoice_id
    );

    let Some(token) = cookie_value(&headers, SESSION_COOKIE_NAME) else {
        warn!("Verify callback without a session cookie");
        return Json(expired_session_response()).into_response();
    };

    let Some(pending) = state.sessions.pending(&token) else {
        warn!(
            "Verify callback for invoice {} without a pending booking",
            params.invoice_id
        );
        return Json(expired_session_response()).into_response();
    };

    let finalization = finalize_payment(
        state.database.as_ref(),
        state.gateway.as_ref(),
        &pending,
        &params.transid,
        &params.invoice_id,
    )
    .await;

    if finalization.clear_pending {
        state.sessions.clear_pending(&token);
    }

    let mut cookies = vec![session_cookie(&token)];
    if finalization.response.phase == BookingPhase::Confirmed {
        let device_id = cookie_value(&headers, DEVICE_COOKIE_NAME)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        if let Err(err) = state.database.upsert_device_binding(
            &pending.phone_number,
            &device_id,
            &user_agent(&headers),
            client_ip(&headers).as_deref(),
        ) {
            error!("Failed to update device binding after payment: {}", err);
        }
        state.sessions.login(&token, &pending.phone_number);
        state.sessions.set_last_booked(
            &token,
            finalization.response.booked.clone(),
            &pending.phone_number,
        );
        cookies.push(device_cookie(&device_id));
    }

    (AppendHeaders(cookies), Json(finalization.response)).into_response()
}

fn expired_session_response() -> BookingResponse {
    BookingResponse {
        success: false,
        phase: BookingPhase::Rejected,
        message: "Your booking session has expired. Please start over.".to_string(),
        booked: Vec::new(),
        failed: Vec::new(),
        redirect_url: None,
    }
}

// One-time confirmation endpoint; the data is consumed on first read
pub async fn booking_confirmation(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Json<ConfirmationResponse> {
    let taken = cookie_value(&headers, SESSION_COOKIE_NAME)
        .and_then(|token| state.sessions.take_last_booked(&token));

    match taken {
        Some((slots, phone_number)) => {
            let booked_slots = slots
                .iter()
                .map(|value| {
                    TimeSlot::parse(value)
                        .map(|slot| slot.display())
                        .unwrap_or_else(|_| value.clone())
                })
                .collect();
            Json(ConfirmationResponse {
                success: true,
                phone_number,
                booked_slots,
                message: "Your booking is confirmed.".to_string(),
            })
        }
        None => Json(ConfirmationResponse {
            success: false,
            phone_number: None,
            booked_slots: Vec::new(),
            message: "No confirmation to show, or it was already displayed.".to_string(),
        }),
    }
}

// Appointment lookup: GET resolves the identity from the session or the
// device cookie (auto-login)
pub async fn my_appointments(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Response {
    let token = ensure_session(&state, &headers);
    let cookies = vec![session_cookie(&token)];

    let mut auto_login = false;
    let mut phone = state
        .sessions
        .get(&token)
        .and_then(|data| data.logged_in_phone);

    if phone.is_none() {
        if let Some(device_id) = cookie_value(&headers, DEVICE_COOKIE_NAME) {
            match state.database.find_phone_by_device(&device_id) {
                Ok(Some(bound_phone)) => {
                    info!("Auto-login via device {} for {}", device_id, bound_phone);
                    auto_login = true;
                    state.sessions.login(&token, &bound_phone);
                    if let Err(err) = state
                        .database
                        .touch_device_activity(&device_id, client_ip(&headers).as_deref())
                    {
                        error!("Failed to touch device activity: {}", err);
                    }
                    phone = Some(bound_phone);
                }
                Ok(None) => {}
                Err(err) => error!("Device lookup failed: {}", err),
            }
        }
    }

    let message = match (&phone, auto_login) {
        (Some(_), true) => "Your appointments were loaded via device recognition.".to_string(),
        (Some(p), false) => format!("Appointments for {}.", p),
        (None, _) => "Enter your phone number to view your appointments.".to_string(),
    };

    let form_phone_number = phone.clone().unwrap_or_default();
    let body =
        build_appointments_response(&state, phone, auto_login, form_phone_number, true, message);
    (AppendHeaders(cookies), Json(body)).into_response()
}

// Appointment lookup: POST with an explicit phone number acts as a login
pub async fn lookup_appointments(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    ExtractJson(request): ExtractJson<LookupRequest>,
) -> Response {
    let token = ensure_session(&state, &headers);
    let mut cookies = vec![session_cookie(&token)];
    let submitted = request.phone_number.trim().to_string();

    if let Err(message) = validate_phone(&submitted) {
        warn!("Rejected appointment lookup: {}", message);
        let phone = state
            .sessions
            .get(&token)
            .and_then(|data| data.logged_in_phone);
        let body = build_appointments_response(&state, phone, false, submitted, false, message);
        return (AppendHeaders(cookies), Json(body)).into_response();
    }

    state.sessions.login(&token, &submitted);

    let device_id =
        cookie_value(&headers, DEVICE_COOKIE_NAME).unwrap_or_else(|| Uuid::new_v4().to_string());
    if let Err(err) = state.database.upsert_device_binding(
        &submitted,
        &device_id,
        &user_agent(&headers),
        client_ip(&headers).as_deref(),
    ) {
        error!("Failed to update device binding on login: {}", err);
    }
    cookies.push(device_cookie(&device_id));

    let message = format!("Appointments for {}.", submitted);
    let body = build_appointments_response(
        &state,
        Some(submitted.clone()),
        false,
        submitted,
        true,
        message,
    );
    (AppendHeaders(cookies), Json(body)).into_response()
}

// Logout endpoint; clears the session identity but keeps the device cookie
// and its binding
pub async fn logout(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Json<MessageResponse> {
    if let Some(token) = cookie_value(&headers, SESSION_COOKIE_NAME) {
        state.sessions.logout(&token);
    }
    Json(MessageResponse {
        success: true,
        message: "You have been signed out of appointment tracking. Enter your phone number to view your appointments again.".to_string(),
    })
}

// Assemble the lookup view for a (possibly anonymous) identity
fn build_appointments_response(
    state: &AppState,
    phone: Option<String>,
    auto_login: bool,
    form_phone_number: String,
    success: bool,
    message: String,
) -> MyAppointmentsResponse {
    let (appointments, device_info) = match &phone {
        Some(p) => match load_appointments(state, p) {
            Ok(view) => view,
            Err(err) => {
                error!("Failed to load appointments for {}: {}", p, err);
                (Vec::new(), None)
            }
        },
        None => (Vec::new(), None),
    };

    MyAppointmentsResponse {
        success,
        logged_in_phone: phone,
        form_phone_number,
        auto_login,
        appointments,
        device_info,
        message,
    }
}

fn load_appointments(
    state: &AppState,
    phone_number: &str,
) -> Result<(Vec<AppointmentView>, Option<DeviceInfo>), StorageError> {
    let now = state.now();
    let records = state.database.list_for_phone(phone_number)?;

    let appointments = records
        .into_iter()
        .filter_map(|record| match TimeSlot::parse(&record.timeslot) {
            Ok(slot) => Some(AppointmentView {
                timeslot: record.timeslot,
                display: slot.display(),
                status: slot_status(&slot, now),
            }),
            Err(err) => {
                warn!("Skipping unparseable ledger row: {}", err);
                None
            }
        })
        .collect();

    let device_info = state.database.find_device_for_phone(phone_number)?;
    Ok((appointments, device_info))
}
