use chrono::NaiveDateTime;
use rand::Rng;
use tracing::{error, info, warn};

use crate::client::{PaymentError, PaymentGateway};
use crate::models::booking::{BookingPhase, BookingResponse, PendingBooking, SlotFailure};
use crate::models::slot::TimeSlot;
use crate::services::database::{DatabaseService, StorageError};
use crate::services::time_slots::validate_slot;

/// A submission that passed validation and is ready for the ledger or the
/// payment gateway.
#[derive(Debug)]
pub struct ValidatedBooking {
    pub slots: Vec<TimeSlot>,
    pub phone_number: String,
}

impl ValidatedBooking {
    pub fn canonical_slots(&self) -> Vec<String> {
        self.slots.iter().map(TimeSlot::canonical).collect()
    }
}

/// Outcome of the verify step, including whether the session's pending
/// booking should be consumed. It is kept only on the ambiguous path.
#[derive(Debug)]
pub struct VerifyFinalization {
    pub response: BookingResponse,
    pub clear_pending: bool,
}

pub fn validate_phone(phone_number: &str) -> Result<(), String> {
    if phone_number.is_empty() {
        return Err("A mobile phone number is required.".to_string());
    }
    if !phone_number.chars().all(|c| c.is_ascii_digit())
        || !(7..=15).contains(&phone_number.len())
    {
        return Err("Invalid phone number format. Enter 7 to 15 digits.".to_string());
    }
    Ok(())
}

/// Validate raw form input into a `ValidatedBooking`. Any failure rejects
/// the whole attempt with a user-facing message.
pub fn validate_submission(
    timeslots: &[String],
    phone_number: &str,
    now: NaiveDateTime,
) -> Result<ValidatedBooking, String> {
    if timeslots.is_empty() {
        return Err("Select at least one time slot.".to_string());
    }
    let phone_number = phone_number.trim();
    validate_phone(phone_number)?;

    let mut slots = Vec::with_capacity(timeslots.len());
    for value in timeslots {
        slots.push(validate_slot(value, now)?);
    }

    Ok(ValidatedBooking {
        slots,
        phone_number: phone_number.to_string(),
    })
}

/// Client-generated numeric invoice id correlating the create and verify
/// legs of a payment.
pub fn generate_invoice_id() -> String {
    rand::thread_rng()
        .gen_range(100_000_000_000u64..=999_999_999_999u64)
        .to_string()
}

fn rejected(message: String) -> BookingResponse {
    BookingResponse {
        success: false,
        phase: BookingPhase::Rejected,
        message,
        booked: Vec::new(),
        failed: Vec::new(),
        redirect_url: None,
    }
}

/// Book the selected slots directly, without payment.
///
/// Slots taken in the meantime fail individually; the rest are committed as
/// one batch and reported slot-by-slot.
pub fn book_direct(
    database: &DatabaseService,
    booking: &ValidatedBooking,
) -> Result<BookingResponse, StorageError> {
    let canonical = booking.canonical_slots();
    let outcome = database.insert_appointments(&canonical, &booking.phone_number, None, None)?;

    let failed: Vec<SlotFailure> = outcome
        .conflicts
        .iter()
        .map(|timeslot| SlotFailure {
            timeslot: timeslot.clone(),
            reason: "already booked".to_string(),
        })
        .collect();

    if outcome.booked.is_empty() {
        return Ok(BookingResponse {
            success: false,
            phase: BookingPhase::Rejected,
            message: "None of the selected slots could be booked; they were already taken."
                .to_string(),
            booked: Vec::new(),
            failed,
            redirect_url: None,
        });
    }

    let mut message = format!(
        "Your appointment(s) for {} were booked successfully.",
        outcome.booked.join(", ")
    );
    if !failed.is_empty() {
        message.push_str(&format!(
            " However {} slot(s) could not be booked because they were already taken.",
            failed.len()
        ));
    }

    Ok(BookingResponse {
        success: true,
        phase: BookingPhase::Confirmed,
        message,
        booked: outcome.booked,
        failed,
        redirect_url: None,
    })
}

/// Start the payment leg of a booking.
///
/// Payment mode books all-or-nothing: if any selected slot is already taken
/// the whole attempt is rejected before any money is involved. On success
/// the caller must stash the returned `PendingBooking` in the session and
/// redirect the visitor to the returned URL.
pub async fn initiate_payment(
    database: &DatabaseService,
    gateway: &dyn PaymentGateway,
    unit_price: u64,
    callback_url: &str,
    booking: &ValidatedBooking,
) -> Result<(PendingBooking, String), BookingResponse> {
    let booked = database.list_booked().map_err(|e| {
        error!("Failed to load booked slots for conflict pre-check: {}", e);
        rejected("A system error occurred. Please try again.".to_string())
    })?;

    let canonical = booking.canonical_slots();
    let conflicts: Vec<SlotFailure> = canonical
        .iter()
        .filter(|slot| booked.contains(*slot))
        .map(|slot| SlotFailure {
            timeslot: slot.clone(),
            reason: "already booked".to_string(),
        })
        .collect();
    if !conflicts.is_empty() {
        warn!(
            "Aborting paid booking for {}: {} selected slot(s) already taken",
            booking.phone_number,
            conflicts.len()
        );
        return Err(BookingResponse {
            success: false,
            phase: BookingPhase::Rejected,
            message: "Some selected slots were already taken. Please pick different slots."
                .to_string(),
            booked: Vec::new(),
            failed: conflicts,
            redirect_url: None,
        });
    }

    let amount = unit_price * canonical.len() as u64;
    let invoice_id = generate_invoice_id();

    info!(
        "Initiating payment of {} for invoice {} ({} slot(s), phone {})",
        amount,
        invoice_id,
        canonical.len(),
        booking.phone_number
    );

    match gateway
        .create_transaction(amount, &invoice_id, &booking.phone_number, callback_url)
        .await
    {
        Ok(redirect_url) => {
            let pending = PendingBooking {
                timeslots: canonical,
                phone_number: booking.phone_number.clone(),
                amount,
                invoice_id,
            };
            Ok((pending, redirect_url))
        }
        Err(err) => {
            error!(
                "Payment initiation failed for invoice {} (phone {}): {}",
                invoice_id, booking.phone_number, err
            );
            Err(rejected(
                "The payment could not be initiated. You have not been charged.".to_string(),
            ))
        }
    }
}

/// Settle a pending booking after the gateway callback.
///
/// Verify success re-checks conflicts against the current booked set and
/// commits only the still-free slots; a decline books nothing; a transport
/// or parse failure leaves the payment state ambiguous and keeps the
/// pending booking around for support follow-up.
pub async fn finalize_payment(
    database: &DatabaseService,
    gateway: &dyn PaymentGateway,
    pending: &PendingBooking,
    transaction_id: &str,
    invoice_id: &str,
) -> VerifyFinalization {
    if invoice_id != pending.invoice_id {
        warn!(
            "Verify callback invoice {} does not match pending invoice {}",
            invoice_id, pending.invoice_id
        );
        return VerifyFinalization {
            response: rejected(
                "This payment reference does not match your pending booking.".to_string(),
            ),
            clear_pending: true,
        };
    }

    match gateway
        .verify_transaction(pending.amount, transaction_id)
        .await
    {
        Ok(outcome) if outcome.success => {
            settle_captured_payment(database, pending, transaction_id)
        }
        Ok(outcome) => {
            info!(
                "Gateway declined transaction {} for invoice {} (code {}: {})",
                transaction_id, pending.invoice_id, outcome.code, outcome.message
            );
            VerifyFinalization {
                response: BookingResponse {
                    success: false,
                    phase: BookingPhase::PaymentFailed,
                    message: format!(
                        "The payment was not completed (code {}). You have not been charged and no appointment was booked.",
                        outcome.code
                    ),
                    booked: Vec::new(),
                    failed: Vec::new(),
                    redirect_url: None,
                },
                clear_pending: true,
            }
        }
        Err(err) => {
            // Funds may or may not have been captured. The pending booking
            // is kept so support can reconcile against the invoice id.
            error!(
                "Payment verification left ambiguous for invoice {} (transaction {}, phone {}): {}",
                pending.invoice_id, transaction_id, pending.phone_number, err
            );
            if let PaymentError::GatewayRejected(detail) = &err {
                warn!("Unexpected gateway rejection during verify: {}", detail);
            }
            VerifyFinalization {
                response: BookingResponse {
                    success: false,
                    phase: BookingPhase::Ambiguous,
                    message: format!(
                        "We could not confirm your payment. Please contact support and mention invoice {}.",
                        pending.invoice_id
                    ),
                    booked: Vec::new(),
                    failed: Vec::new(),
                    redirect_url: None,
                },
                clear_pending: false,
            }
        }
    }
}

// Ledger writes for a payment the gateway confirmed as captured
fn settle_captured_payment(
    database: &DatabaseService,
    pending: &PendingBooking,
    transaction_id: &str,
) -> VerifyFinalization {
    match database.insert_appointments(
        &pending.timeslots,
        &pending.phone_number,
        Some(&pending.invoice_id),
        Some(transaction_id),
    ) {
        Ok(outcome) => {
            let failed: Vec<SlotFailure> = outcome
                .conflicts
                .iter()
                .map(|timeslot| SlotFailure {
                    timeslot: timeslot.clone(),
                    reason: "taken during payment".to_string(),
                })
                .collect();

            if outcome.booked.is_empty() {
                // Funds captured, nothing booked. Refunds are a manual
                // process driven by the logged invoice and transaction ids.
                error!(
                    "Payment captured for invoice {} (transaction {}) but every slot was taken; manual reconciliation required",
                    pending.invoice_id, transaction_id
                );
                return VerifyFinalization {
                    response: BookingResponse {
                        success: false,
                        phase: BookingPhase::Rejected,
                        message: format!(
                            "Your payment went through but the selected slots were taken in the meantime. Please contact support and mention invoice {}.",
                            pending.invoice_id
                        ),
                        booked: Vec::new(),
                        failed,
                        redirect_url: None,
                    },
                    clear_pending: true,
                };
            }

            let mut message = format!(
                "Payment confirmed. Your appointment(s) for {} were booked.",
                outcome.booked.join(", ")
            );
            if !failed.is_empty() {
                message.push_str(&format!(
                    " {} slot(s) were taken during payment and could not be booked; contact support for a partial refund.",
                    failed.len()
                ));
            }

            VerifyFinalization {
                response: BookingResponse {
                    success: true,
                    phase: BookingPhase::Confirmed,
                    message,
                    booked: outcome.booked,
                    failed,
                    redirect_url: None,
                },
                clear_pending: true,
            }
        }
        Err(err) => {
            error!(
                "Ledger write failed after captured payment (invoice {}, transaction {}, phone {}): {}",
                pending.invoice_id, transaction_id, pending.phone_number, err
            );
            VerifyFinalization {
                response: rejected(format!(
                    "A system error occurred while recording your booking. Please contact support and mention invoice {}.",
                    pending.invoice_id
                )),
                clear_pending: true,
            }
        }
    }
}
