// libs/appointment-cell/src/router.rs
use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use shared_config::AppConfig;
use shared_database::DocumentStore;
use shared_utils::extractor::auth_middleware;

use crate::handlers;
use crate::services::notification::notification_gateway_from_config;
use crate::services::reminders::ReminderService;
use crate::services::scheduling::AppointmentSchedulingService;

#[derive(Clone)]
pub struct AppointmentState {
    pub service: Arc<AppointmentSchedulingService>,
    pub reminders: Arc<ReminderService>,
    pub config: Arc<AppConfig>,
}

impl AppointmentState {
    pub fn new(store: DocumentStore, config: Arc<AppConfig>) -> Self {
        let service = AppointmentSchedulingService::from_config(store.clone(), &config);
        let reminders = ReminderService::new(store.clone(), notification_gateway_from_config(store, &config));

        Self::from_parts(Arc::new(service), Arc::new(reminders), config)
    }

    pub fn from_parts(
        service: Arc<AppointmentSchedulingService>,
        reminders: Arc<ReminderService>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            service,
            reminders,
            config,
        }
    }
}

pub fn appointment_routes(state: AppointmentState) -> Router {
    // All appointment operations require authentication
    let protected_routes = Router::new()
        .route("/", post(handlers::create_appointment).get(handlers::list_appointments))
        .route(
            "/{appointment_id}",
            get(handlers::get_appointment)
                .put(handlers::update_appointment)
                .delete(handlers::delete_appointment),
        )
        .route("/timeslot/{slot_id}", get(handlers::get_time_slot))
        .route("/reminders/run", post(handlers::run_reminders)) // Admin only
        .layer(middleware::from_fn_with_state(state.config.clone(), auth_middleware));

    Router::new().merge(protected_routes).with_state(state)
}
