// TEMP diagnostic - delete
use appointment_booking_service::handlers::api::AppState;
use appointment_booking_service::routes::create_router;
use appointment_booking_service::services::database::DatabaseService;
use appointment_booking_service::services::sessions::SessionStore;
use appointment_booking_service::client::GatewayClient;
use std::sync::Arc;
use chrono::FixedOffset;
use axum_test::{TestServer, TestServerConfig};

#[tokio::test]
async fn diag() {
    let dir = tempfile::tempdir().unwrap();
    let db = Arc::new(DatabaseService::new(dir.path().to_str().unwrap()));
    let st = Arc::new(AppState {
        gateway: Arc::new(GatewayClient::new()),
        database: Arc::clone(&db),
        sessions: Arc::new(SessionStore::new()),
        payment_enabled: true,
        unit_price: 500_000,
        public_base_url: "http://localhost:3000".to_string(),
        tz_offset: FixedOffset::east_opt(0).unwrap(),
    });
    let router = create_router(st, false);
    let config = TestServerConfig::builder().save_cookies().mock_transport().build();
    let server = TestServer::new_with_config(router.clone(), config).unwrap();
    eprintln!("--- mock_transport ---");
    for p in ["/confirmation", "/confirmation?x=1"] {
        let resp = server.get(p).await;
        eprintln!("PATH={} STATUS={:?} LEN={}", p, resp.status_code(), resp.text().len());
    }
    {
        let uri: axum::http::Uri = "/foo?x=1".parse().unwrap();
        eprintln!("URI path()=[{}] query()=[{:?}]", uri.path(), uri.query());
        let mut u = url::Url::parse("http://localhost/").unwrap();
        u.set_path("/foo?x=1");
        eprintln!("set_path result=[{}] path=[{}] query=[{:?}]", u, u.path(), u.query());
    }
    eprintln!("--- minimal axum router ---");
    use axum::{routing::get, Router};
    let minimal: Router = Router::new().route("/foo", get(|| async { "hi" }));
    let cfg3 = TestServerConfig::builder().mock_transport().build();
    let s3 = TestServer::new_with_config(minimal, cfg3).unwrap();
    for p in ["/foo", "/foo?x=1"] {
        let resp = s3.get(p).await;
        eprintln!("PATH={} STATUS={:?} LEN={}", p, resp.status_code(), resp.text().len());
    }
    let resp = s3.get("/foo").add_query_param("x", "1").await;
    eprintln!("add_query_param STATUS={:?} LEN={}", resp.status_code(), resp.text().len());
}
