//! Push transports.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use super::error::MonitorError;
use super::traits::PushGateway;
use crate::config::PushConfig;
use crate::models::PushDestination;

/// Posts JSON messages to an HTTP push gateway (FCM-style relay).
pub struct HttpPushGateway {
    endpoint: String,
    api_key: Option<String>,
    timeout: Duration,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct PushRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    topic: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    token: Option<&'a str>,
    title: &'a str,
    body: &'a str,
    data: &'a Value,
}

impl HttpPushGateway {
    pub fn from_config(config: &PushConfig) -> Result<Self, MonitorError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| MonitorError::Push(format!("cannot build HTTP client: {e}")))?;

        Ok(Self {
            endpoint: config.endpoint.clone(),
            api_key: config.resolve_api_key(),
            timeout: Duration::from_millis(config.timeout_ms),
            client,
        })
    }
}

#[async_trait]
impl PushGateway for HttpPushGateway {
    async fn send_to_destination(
        &self,
        destination: &PushDestination,
        title: &str,
        body: &str,
        data: &Value,
    ) -> Result<(), MonitorError> {
        let (topic, token) = match destination {
            PushDestination::Topic(t) => (Some(t.as_str()), None),
            PushDestination::Token(t) => (None, Some(t.as_str())),
        };
        let payload = PushRequest {
            topic,
            token,
            title,
            body,
            data,
        };

        let mut request = self
            .client
            .post(&self.endpoint)
            .timeout(self.timeout)
            .json(&payload);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                MonitorError::Push(format!("timed out after {}ms", self.timeout.as_millis()))
            } else {
                MonitorError::Push(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(MonitorError::Push(format!("gateway returned status {}", status.as_u16())));
        }
        Ok(())
    }
}

/// Used when no push gateway is configured. Every send is logged and
/// reported as failed, so records stay undelivered for the in-app center.
pub struct LogOnlyPushGateway;

#[async_trait]
impl PushGateway for LogOnlyPushGateway {
    fn is_configured(&self) -> bool {
        false
    }

    async fn send_to_destination(
        &self,
        destination: &PushDestination,
        title: &str,
        _body: &str,
        _data: &Value,
    ) -> Result<(), MonitorError> {
        tracing::debug!(
            destination_kind = destination.kind_str(),
            title,
            "No push gateway configured, notification not pushed"
        );
        Err(MonitorError::Push("no push gateway configured".into()))
    }
}

pub fn build_push_gateway(config: Option<&PushConfig>) -> Result<Arc<dyn PushGateway>, MonitorError> {
    match config {
        Some(c) => Ok(Arc::new(HttpPushGateway::from_config(c)?)),
        None => Ok(Arc::new(LogOnlyPushGateway)),
    }
}
