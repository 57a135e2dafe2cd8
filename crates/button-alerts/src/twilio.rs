//! Twilio REST messenger

use std::time::Duration;

use async_trait::async_trait;
use lifecycle::{DeliveryStatus, Messenger, MessagingError};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::TwilioCredentials;

/// Message resource fields returned by the Messages endpoint
#[derive(Debug, Deserialize)]
struct MessageResource {
    sid: String,
    status: String,
}

/// Error body returned on non-2xx responses
#[derive(Debug, Deserialize)]
struct ErrorResource {
    #[serde(default)]
    code: Option<u32>,
    message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct SendForm<'a> {
    from: &'a str,
    to: &'a str,
    body: &'a str,
}

/// Sends SMS through the Twilio Messages API
#[derive(Clone)]
pub struct TwilioMessenger {
    credentials: TwilioCredentials,
    http: reqwest::Client,
}

impl TwilioMessenger {
    pub fn new(credentials: TwilioCredentials) -> Result<Self, reqwest::Error> {
        Ok(Self {
            credentials,
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()?,
        })
    }

    fn messages_url(&self) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.credentials.api_url.trim_end_matches('/'),
            self.credentials.account_sid
        )
    }
}

#[async_trait]
impl Messenger for TwilioMessenger {
    async fn send_message(
        &self,
        from: &str,
        to: &str,
        body: &str,
    ) -> Result<DeliveryStatus, MessagingError> {
        let response = self
            .http
            .post(self.messages_url())
            .basic_auth(
                &self.credentials.account_sid,
                Some(&self.credentials.auth_token),
            )
            .form(&SendForm { from, to, body })
            .send()
            .await
            .map_err(|e| MessagingError::Unavailable(format!("HTTP request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            let detail = match serde_json::from_str::<ErrorResource>(&text) {
                Ok(error) => match error.code {
                    Some(code) => format!("{} (code {})", error.message, code),
                    None => error.message,
                },
                Err(_) => text,
            };
            return Err(MessagingError::Rejected(format!("{}: {}", status, detail)));
        }

        let message: MessageResource = response
            .json()
            .await
            .map_err(|e| MessagingError::Rejected(format!("Failed to parse response: {}", e)))?;

        info!(sid = %message.sid, to, status = %message.status, "SMS accepted");
        debug!(body, "SMS body");
        Ok(DeliveryStatus::new(message.status))
    }
}
