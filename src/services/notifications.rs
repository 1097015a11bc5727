use crate::{
    config::{AlertConfig, SmsConfig},
    errors::ServiceError,
};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

/// Outbound customer SMS. Delivery is best-effort: callers log failures and
/// never roll back order state because a message did not go out.
#[async_trait]
pub trait SmsSender: Send + Sync {
    async fn send(&self, phone: &str, message: &str) -> Result<(), ServiceError>;
}

/// HTTP SMS provider client.
pub struct HttpSmsSender {
    http: reqwest::Client,
    config: SmsConfig,
}

impl HttpSmsSender {
    pub fn new(config: SmsConfig) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .expect("reqwest client"),
            config,
        }
    }
}

#[async_trait]
impl SmsSender for HttpSmsSender {
    #[instrument(skip(self, message))]
    async fn send(&self, phone: &str, message: &str) -> Result<(), ServiceError> {
        let response = self
            .http
            .post(&self.config.api_url)
            .bearer_auth(&self.config.api_key)
            .json(&json!({
                "to": phone,
                "from": self.config.sender,
                "text": message,
            }))
            .send()
            .await
            .map_err(|e| ServiceError::ExternalServiceError(format!("sms send failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ServiceError::ExternalServiceError(format!(
                "sms provider returned HTTP {}",
                status
            )));
        }
        info!(%phone, "sms dispatched");
        Ok(())
    }
}

/// No-op sender used when the SMS provider is not configured.
pub struct DisabledSmsSender;

#[async_trait]
impl SmsSender for DisabledSmsSender {
    async fn send(&self, phone: &str, message: &str) -> Result<(), ServiceError> {
        info!(%phone, message, "sms disabled; message not sent");
        Ok(())
    }
}

pub fn sms_sender_from_config(config: &SmsConfig) -> Arc<dyn SmsSender> {
    if config.enabled {
        Arc::new(HttpSmsSender::new(config.clone()))
    } else {
        Arc::new(DisabledSmsSender)
    }
}

/// Operator-facing alert channel for conditions that need a human.
#[async_trait]
pub trait Alerter: Send + Sync {
    async fn alert(&self, text: &str) -> Result<(), ServiceError>;
}

/// Posts alerts into the staff Telegram chat.
pub struct TelegramAlerter {
    http: reqwest::Client,
    config: AlertConfig,
}

impl TelegramAlerter {
    pub fn new(config: AlertConfig) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .expect("reqwest client"),
            config,
        }
    }
}

#[async_trait]
impl Alerter for TelegramAlerter {
    #[instrument(skip(self, text))]
    async fn alert(&self, text: &str) -> Result<(), ServiceError> {
        let url = format!(
            "{}/bot{}/sendMessage",
            self.config.api_base.trim_end_matches('/'),
            self.config.bot_token
        );
        let response = self
            .http
            .post(&url)
            .json(&json!({
                "chat_id": self.config.chat_id,
                "text": text,
            }))
            .send()
            .await
            .map_err(|e| {
                ServiceError::ExternalServiceError(format!("operator alert failed: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ServiceError::ExternalServiceError(format!(
                "telegram API returned HTTP {}",
                status
            )));
        }
        Ok(())
    }
}

/// Logs alerts instead of delivering them.
pub struct DisabledAlerter;

#[async_trait]
impl Alerter for DisabledAlerter {
    async fn alert(&self, text: &str) -> Result<(), ServiceError> {
        warn!(text, "operator alerts disabled; alert only logged");
        Ok(())
    }
}

pub fn alerter_from_config(config: &AlertConfig) -> Arc<dyn Alerter> {
    if config.enabled {
        Arc::new(TelegramAlerter::new(config.clone()))
    } else {
        Arc::new(DisabledAlerter)
    }
}
