// libs/appointment-cell/src/router.rs
use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
    middleware,
};

use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers::{self, AppointmentState};
use crate::services::booking::AppointmentBookingService;

pub fn appointment_routes(config: Arc<AppConfig>, service: Arc<AppointmentBookingService>) -> Router {
    let state = AppointmentState::new(service, config.conflict_policy);

    // All appointment operations require an authenticated, organization-bound user
    let protected_routes = Router::new()
        .route("/", post(handlers::create_appointment))
        .route("/today", get(handlers::list_today_appointments))
        .route("/range", get(handlers::list_appointments_in_range))
        .route("/calendar", get(handlers::get_calendar))
        .route("/without-report", get(handlers::list_completed_without_report))
        .route("/patients/{patient_id}", get(handlers::get_patient_appointments))
        .route(
            "/{appointment_id}",
            get(handlers::get_appointment)
                .put(handlers::update_appointment)
                .delete(handlers::delete_appointment),
        )

        // Utility endpoints
        .route("/conflicts/check", get(handlers::check_appointment_conflicts))

        .layer(middleware::from_fn_with_state(config, auth_middleware));

    Router::new()
        .merge(protected_routes)
        .with_state(state)
}
