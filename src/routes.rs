use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tracing::info;

use crate::handlers::api::{
    book_appointments, booking_confirmation, list_slots, logout, lookup_appointments,
    my_appointments, verify_payment, AppState,
};
use crate::handlers::test::{health_check, test_payloads};

pub fn create_router(app_state: Arc<AppState>, is_production: bool) -> Router {
    let mut router = Router::new();

    // Health check is always available
    let health_route = Router::new().route("/health", get(health_check));
    router = router.merge(health_route);

    // Visitor-facing booking routes
    let booking_routes = Router::new()
        .route("/", get(list_slots))
        .route("/book", post(book_appointments))
        .route("/payment/verify", get(verify_payment))
        .route("/confirmation", get(booking_confirmation))
        .route("/my-appointments", get(my_appointments).post(lookup_appointments))
        .route("/logout", get(logout));
    router = router.merge(booking_routes);

    // Only expose sample payload routes outside production
    if !is_production {
        let test_routes = Router::new().route("/test/payloads", get(test_payloads));
        router = router.merge(test_routes);
        info!("Sample payload routes enabled - server running in development mode");
    } else {
        info!("Running in production mode - only booking and health endpoints exposed");
    }

    router.with_state(app_state)
}
