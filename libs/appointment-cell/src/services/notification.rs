// libs/appointment-cell/src/services/notification.rs
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, info, warn};

use shared_config::AppConfig;
use shared_database::DocumentStore;

use crate::models::{collections, Notification};

#[async_trait]
pub trait NotificationGateway: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<()>;
}

/// Stores every notification in the `notifications` collection and, when a
/// webhook is configured, forwards it for delivery.
pub struct StoredNotificationGateway {
    store: DocumentStore,
    client: Client,
    webhook_url: Option<String>,
}

impl StoredNotificationGateway {
    pub fn new(store: DocumentStore, config: &AppConfig) -> Self {
        let webhook_url = config
            .is_notification_webhook_configured()
            .then(|| config.notification_webhook_url.clone());

        Self {
            store,
            client: Client::new(),
            webhook_url,
        }
    }
}

#[async_trait]
impl NotificationGateway for StoredNotificationGateway {
    async fn notify(&self, notification: &Notification) -> Result<()> {
        self.store
            .insert_one(collections::NOTIFICATIONS, serde_json::to_value(notification)?)
            .await?;
        debug!(
            "Stored {:?} notification {} for user {}",
            notification.kind, notification.id, notification.recipient_user_id
        );

        let Some(url) = &self.webhook_url else {
            return Ok(());
        };

        let response = self.client.post(url).json(notification).send().await?;
        let status = response.status();
        if !status.is_success() {
            warn!("Notification webhook rejected {}: {}", notification.id, status);
            return Err(anyhow!("Notification webhook returned HTTP {}", status));
        }

        info!("Delivered notification {} to webhook", notification.id);
        Ok(())
    }
}

pub fn notification_gateway_from_config(
    store: DocumentStore,
    config: &AppConfig,
) -> Arc<dyn NotificationGateway> {
    Arc::new(StoredNotificationGateway::new(store, config))
}
