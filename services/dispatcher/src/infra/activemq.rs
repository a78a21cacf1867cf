use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use tracing::debug;

use crate::broker::{JmsClient, JmsMessage};
use crate::error::PublishError;

const BROKER: &str = "activemq";

/// Query parameter the REST message servlet maps to `JMSCorrelationID`.
const CORRELATION_PARAM: &str = "JMSCorrelationID";

/// JMS transport over the ActiveMQ REST message API
/// (`POST {base}/api/message/{destination}?type=queue`). Extra query
/// parameters become string properties of the message.
#[derive(Clone)]
pub struct ActiveMqRestClient {
    http: Client,
    base_url: String,
    user: String,
    password: String,
}

impl ActiveMqRestClient {
    pub fn new(
        base_url: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("build activemq http client")?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            user: user.into(),
            password: password.into(),
        })
    }

    pub fn message_url(&self, message: &JmsMessage) -> Result<Url, PublishError> {
        let mut params = vec![("type", "queue")];
        if let Some(correlation_id) = &message.correlation_id {
            params.push((CORRELATION_PARAM, correlation_id.as_str()));
        }
        params.extend(
            message
                .properties
                .iter()
                .map(|(k, v)| (k.as_str(), v.as_str())),
        );
        let endpoint = format!("{}/api/message/{}", self.base_url, message.destination);
        Url::parse_with_params(&endpoint, params)
            .map_err(|err| PublishError::rejected(BROKER, format!("invalid url {endpoint}: {err}")))
    }
}

#[async_trait]
impl JmsClient for ActiveMqRestClient {
    async fn send(&self, message: JmsMessage) -> Result<(), PublishError> {
        let url = self.message_url(&message)?;
        let response = self
            .http
            .post(url)
            .basic_auth(&self.user, Some(&self.password))
            .header(reqwest::header::CONTENT_TYPE, "text/plain")
            .body(message.body)
            .send()
            .await
            .map_err(|err| PublishError::unavailable(BROKER, err))?;

        let status = response.status();
        if status.is_success() {
            debug!(destination = %message.destination, "activemq accepted message");
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(classify(status, &body))
    }
}

fn classify(status: StatusCode, body: &str) -> PublishError {
    let cause = format!("HTTP {status}: {}", body.trim());
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        PublishError::unavailable(BROKER, cause)
    } else {
        PublishError::rejected(BROKER, cause)
    }
}
