// libs/appointment-cell/src/services/calendar.rs
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};
use uuid::Uuid;

use shared_config::AppConfig;

use crate::models::{Appointment, VisitType};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarEventRequest {
    pub appointment_id: Uuid,
    pub doctor_id: Uuid,
    pub patient_id: Uuid,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub title: String,
    pub create_meeting_link: bool,
}

impl CalendarEventRequest {
    pub fn for_appointment(appointment: &Appointment) -> Self {
        Self {
            appointment_id: appointment.id,
            doctor_id: appointment.doctor_id,
            patient_id: appointment.patient_id,
            date: appointment.date,
            start_time: appointment.start_time,
            end_time: appointment.end_time,
            title: format!("Appointment ({})", appointment.visit_type),
            create_meeting_link: appointment.visit_type == VisitType::Telehealth,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CalendarEvent {
    pub event_id: String,
    #[serde(default)]
    pub meeting_link: Option<String>,
}

/// Calendar integration used after an appointment commits. Failures are
/// reported to the caller as warnings and never undo a booking.
#[async_trait]
pub trait CalendarGateway: Send + Sync {
    /// Returns `None` when no calendar is connected.
    async fn create_event(&self, request: &CalendarEventRequest) -> Result<Option<CalendarEvent>>;

    async fn cancel_event(&self, event_id: &str) -> Result<()>;
}

pub struct HttpCalendarGateway {
    client: Client,
    base_url: String,
    api_token: String,
}

impl HttpCalendarGateway {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.calendar_service_url.trim_end_matches('/').to_string(),
            api_token: config.calendar_api_token.clone(),
        }
    }
}

#[async_trait]
impl CalendarGateway for HttpCalendarGateway {
    async fn create_event(&self, request: &CalendarEventRequest) -> Result<Option<CalendarEvent>> {
        let url = format!("{}/events", self.base_url);
        debug!("Creating calendar event for appointment {} at {}", request.appointment_id, url);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_token))
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("Calendar event creation failed: {} - {}", status, body);
            return Err(anyhow!("Calendar service returned HTTP {}: {}", status, body));
        }

        let event: CalendarEvent = response.json().await?;
        info!("Created calendar event {} for appointment {}", event.event_id, request.appointment_id);
        Ok(Some(event))
    }

    async fn cancel_event(&self, event_id: &str) -> Result<()> {
        let url = format!("{}/events/{}", self.base_url, event_id);
        debug!("Cancelling calendar event {}", event_id);

        let response = self
            .client
            .delete(&url)
            .header("Authorization", format!("Bearer {}", self.api_token))
            .send()
            .await?;

        let status = response.status();
        // Already gone counts as cancelled.
        if !status.is_success() && status != reqwest::StatusCode::NOT_FOUND {
            let body = response.text().await.unwrap_or_default();
            error!("Calendar event cancellation failed: {} - {}", status, body);
            return Err(anyhow!("Calendar service returned HTTP {}: {}", status, body));
        }

        info!("Cancelled calendar event {}", event_id);
        Ok(())
    }
}

/// Used when no calendar service is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledCalendarGateway;

#[async_trait]
impl CalendarGateway for DisabledCalendarGateway {
    async fn create_event(&self, request: &CalendarEventRequest) -> Result<Option<CalendarEvent>> {
        debug!("Calendar not configured, skipping event for appointment {}", request.appointment_id);
        Ok(None)
    }

    async fn cancel_event(&self, _event_id: &str) -> Result<()> {
        Ok(())
    }
}

pub fn calendar_gateway_from_config(config: &AppConfig) -> Arc<dyn CalendarGateway> {
    if config.is_calendar_configured() {
        Arc::new(HttpCalendarGateway::new(config))
    } else {
        Arc::new(DisabledCalendarGateway)
    }
}
