use std::sync::Arc;

use axum::{
    Router,
    routing::get,
};

use appointment_cell::router::appointment_routes;
use appointment_cell::services::booking::AppointmentBookingService;
use shared_config::AppConfig;

pub fn create_router(config: Arc<AppConfig>, appointments: Arc<AppointmentBookingService>) -> Router {
    Router::new()
        .route("/", get(|| async { "Practice scheduling API is running!" }))
        .nest("/appointments", appointment_routes(config, appointments))
}
