mod db;
mod routes;
mod services;
mod session_refresh;
mod state;

use std::sync::Arc;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let port: u16 = std::env::var("PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()
        .expect("invalid PORT");

    let pool = db::connect_from_env().await.expect("database init failed");

    let auth = services::auth::AuthGateway::from_env().expect("auth provider config missing");

    let state = state::AppState::new(pool, Arc::new(auth));

    let app = routes::app(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .expect("failed to bind");

    tracing::info!(%port, "quantticker listening");
    axum::serve(listener, app).await.expect("server failed");
}
