//! Operator notification channel for kill-switch events.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use arena_core::domain::battle::{AbortReason, BattleId};
use arena_core::domain::persona::PersonaId;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct KillSwitchAlert {
    pub battle_id: BattleId,
    pub persona_id: PersonaId,
    pub reason: AbortReason,
    pub battle_cost: Decimal,
    pub occurred_at: DateTime<Utc>,
}

impl KillSwitchAlert {
    pub fn text(&self) -> String {
        match &self.reason {
            AbortReason::PerBattleCeiling { spent, ceiling } => format!(
                ":rotating_light: Battle {} against persona {} aborted: spent ${spent} of a ${ceiling} per-battle ceiling.",
                self.battle_id, self.persona_id
            ),
            AbortReason::DailyCapExceeded => format!(
                ":octagonal_sign: Battle {} against persona {} aborted: daily budget cap reached after ${}.",
                self.battle_id, self.persona_id, self.battle_cost
            ),
            other => format!(
                "Battle {} against persona {} aborted ({}).",
                self.battle_id,
                self.persona_id,
                other.as_str()
            ),
        }
    }
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification transport failed: {0}")]
    Transport(String),
    #[error("notification endpoint returned HTTP {0}")]
    Status(u16),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, alert: &KillSwitchAlert) -> Result<(), NotifyError>;
}

/// Writes alerts to the structured log only.
#[derive(Clone, Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, alert: &KillSwitchAlert) -> Result<(), NotifyError> {
        warn!(
            event_name = "notify.kill_switch",
            battle_id = %alert.battle_id,
            persona_id = %alert.persona_id,
            reason = alert.reason.as_str(),
            battle_cost = %alert.battle_cost,
            "{}",
            alert.text()
        );
        Ok(())
    }
}

/// POSTs `{"text": ..., "alert": {...}}` to an incoming-webhook URL.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|error| NotifyError::Transport(error.to_string()))?;
        Ok(Self { client, url: url.into() })
    }
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    text: String,
    alert: &'a KillSwitchAlert,
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, alert: &KillSwitchAlert) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(&self.url)
            .json(&WebhookPayload { text: alert.text(), alert })
            .send()
            .await
            .map_err(|error| NotifyError::Transport(error.to_string()))?;

        if !response.status().is_success() {
            return Err(NotifyError::Status(response.status().as_u16()));
        }
        Ok(())
    }
}

/// Delivers the alert on a background task. Failures are logged and never
/// reach the caller.
pub fn dispatch(notifier: Arc<dyn Notifier>, alert: KillSwitchAlert) -> JoinHandle<()> {
    tokio::spawn(async move {
        match notifier.notify(&alert).await {
            Ok(()) => info!(
                event_name = "notify.delivered",
                battle_id = %alert.battle_id,
                reason = alert.reason.as_str(),
                "kill-switch alert delivered"
            ),
            Err(error) => warn!(
                event_name = "notify.failed",
                battle_id = %alert.battle_id,
                reason = alert.reason.as_str(),
                error = %error,
                "kill-switch alert could not be delivered"
            ),
        }
    })
}

#[cfg(test)]
pub(crate) mod testing {
    use async_trait::async_trait;
    use tokio::sync::Mutex;

    use super::{KillSwitchAlert, Notifier, NotifyError};

    #[derive(Default)]
    pub struct RecordingNotifier {
        pub alerts: Mutex<Vec<KillSwitchAlert>>,
        pub fail: bool,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, alert: &KillSwitchAlert) -> Result<(), NotifyError> {
            self.alerts.lock().await.push(alert.clone());
            if self.fail {
                return Err(NotifyError::Status(500));
            }
            Ok(())
        }
    }
}
