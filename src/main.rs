use std::env;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{error_handling::HandleErrorLayer, http::StatusCode};
use chrono::FixedOffset;
use tower::{BoxError, ServiceBuilder};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, Level};

use appointment_booking_service::{
    create_router,
    services::{database::create_database_service, sessions::create_session_store},
    AppState, GatewayClient, PaymentGateway,
};

// Error handler
async fn handle_error(error: BoxError) -> (StatusCode, String) {
    if error.is::<tokio::time::error::Elapsed>() {
        (
            StatusCode::REQUEST_TIMEOUT,
            "Request took too long".to_string(),
        )
    } else {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Unhandled internal error: {}", error),
        )
    }
}

#[tokio::main]
async fn main() {
    // Initialize tracing for logging
    tracing_subscriber::fmt()
        .with_max_level(Level::DEBUG)
        .init();

    // Payment handling is optional; without it bookings confirm directly
    let payment_enabled = env::var("PAYMENT_ENABLED")
        .map(|val| val.to_lowercase() == "true")
        .unwrap_or(false);

    let gateway: Arc<dyn PaymentGateway> = Arc::new(GatewayClient::new());

    // Base URL this service is reachable at, used for the gateway callback
    let public_base_url =
        env::var("PUBLIC_BASE_URL").expect("PUBLIC_BASE_URL must be set in environment");

    // Price per 45-minute slot, in minor currency units
    let unit_price = env::var("SLOT_UNIT_PRICE")
        .ok()
        .and_then(|val| val.parse::<u64>().ok())
        .unwrap_or(500_000);

    // Business timezone as a fixed offset from UTC, default +03:30
    let tz_offset_minutes = env::var("BUSINESS_TZ_OFFSET_MINUTES")
        .ok()
        .and_then(|val| val.parse::<i32>().ok())
        .unwrap_or(210);
    let tz_offset = FixedOffset::east_opt(tz_offset_minutes * 60)
        .expect("BUSINESS_TZ_OFFSET_MINUTES out of range");

    if payment_enabled {
        info!(
            "Payment mode enabled: bookings are held until the gateway confirms capture ({} units per slot)",
            unit_price
        );
    } else {
        info!("Payment mode disabled: bookings confirm immediately");
    }

    // Initialize the persistent stores and the session store
    let database = create_database_service();
    info!("Database service initialized");

    let sessions = create_session_store();

    // Check if running in production mode
    let is_production = env::var("ENVIRONMENT")
        .map(|val| val.to_lowercase() == "production")
        .unwrap_or(false);

    if is_production {
        info!("Running in PRODUCTION mode - restricting available endpoints");
    } else {
        info!("Running in DEVELOPMENT mode - all endpoints will be available");
    }

    // Create shared application state
    let app_state = Arc::new(AppState {
        gateway,
        database,
        sessions,
        payment_enabled,
        unit_price,
        public_base_url,
        tz_offset,
    });

    // Create router with appropriate routes based on environment
    let app = create_router(app_state, is_production).layer(
        ServiceBuilder::new()
            .layer(HandleErrorLayer::new(handle_error))
            .load_shed()
            .concurrency_limit(64)
            .timeout(Duration::from_secs(10))
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::new().allow_origin(Any)),
    );

    // Bind to port 3000
    let addr = SocketAddr::from(([0, 0, 0, 0], 3000));
    info!("Server listening on {}", addr);

    // Start server
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    // Set up signal handler for graceful shutdown
    let shutdown = async {
        let ctrl_c = async {
            tokio::signal::ctrl_c()
                .await
                .expect("Failed to install Ctrl+C handler");
        };

        #[cfg(unix)]
        let terminate = async {
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("Failed to install SIGTERM handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("Received interrupt signal, starting graceful shutdown");
            },
            _ = terminate => {
                info!("Received terminate signal, starting graceful shutdown");
            },
        }
    };

    // Start server with graceful shutdown
    info!("Server is ready to accept connections");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .expect("Failed to start server");

    info!("Server has been gracefully shut down");
}
