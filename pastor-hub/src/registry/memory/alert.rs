use std::sync::Arc;

use async_trait::async_trait;
use pastor_core::{Alert, AlertId};
use tokio::sync::RwLock;

use super::newest_first;
use crate::registry::{AlertRegistry, RegistryError, filter::AlertFilter};

#[derive(Clone, Default)]
pub struct InMemoryAlertRegistry {
    alerts: Arc<RwLock<Vec<Alert>>>,
}

impl InMemoryAlertRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AlertRegistry for InMemoryAlertRegistry {
    async fn insert_alert(&self, alert: Alert) -> Result<(), RegistryError> {
        let mut alerts = self.alerts.write().await;
        alerts.push(alert);
        Ok(())
    }

    async fn list_alerts(&self, filter: AlertFilter) -> Result<Vec<Alert>, RegistryError> {
        let alerts = self.alerts.read().await;
        let mut matching: Vec<Alert> = alerts.iter().filter(|a| filter.matches(a)).cloned().collect();
        matching.sort_by_key(|a| a.created_at);
        Ok(newest_first(matching, filter.limit))
    }

    async fn mark_alert_sent(&self, id: AlertId) -> Result<Option<Alert>, RegistryError> {
        let mut alerts = self.alerts.write().await;
        let Some(alert) = alerts.iter_mut().find(|a| a.id == id) else {
            return Ok(None);
        };

        alert.sent = true;
        Ok(Some(alert.clone()))
    }
}
