use log::debug;
use reqwest::Client;
use std::time::Duration;

use crate::bounce::{AdapterError, BounceAdapter};
use crate::models::BounceEvent;

/// Pulls opt-out events from an HTTP endpoint returning a JSON array of
/// `{"email", "timestamp", "reason"}` objects.
///
/// Relays in front of provider webhooks (SES notifications, Mailgun events and
/// the like) can expose this shape without a provider-specific adapter.
#[derive(Debug, Clone)]
pub struct HttpFeedAdapter {
    name: String,
    url: String,
    bearer_token: Option<String>,
    http: Client,
}

impl HttpFeedAdapter {
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        bearer_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, AdapterError> {
        let name = name.into();
        let url = url.into();
        if url.trim().is_empty() {
            return Err(AdapterError::Config(format!("feed '{}' has no URL", name)));
        }

        let http = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            name,
            url,
            bearer_token,
            http,
        })
    }

    fn parse_events(body: &str) -> Result<Vec<BounceEvent>, AdapterError> {
        serde_json::from_str(body).map_err(|err| AdapterError::Decode(err.to_string()))
    }
}

#[rocket::async_trait]
impl BounceAdapter for HttpFeedAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_opt_outs(&self) -> Result<Vec<BounceEvent>, AdapterError> {
        debug!("bounce feed {}: fetching {}", self.name, self.url);

        let mut request = self.http.get(&self.url);
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(AdapterError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body = response.text().await?;
        Self::parse_events(&body)
    }
}
