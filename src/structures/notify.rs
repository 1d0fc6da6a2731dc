use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info};
use reqwest::Client;

use super::errors::OffwatchError;

#[async_trait(?Send)]
pub trait Notifier {
    async fn send(&self, message: &str) -> Result<(), OffwatchError>;
}

#[derive(Debug, Clone)]
pub struct TwilioOptions {
    pub account_sid: String,
    pub auth_token: String,
    pub from_number: String,
    pub to_number: String,
}

/// SMS through the Twilio Messages API.
pub struct TwilioNotifier {
    client: Client,
    options: TwilioOptions,
    base_url: String,
}

impl TwilioNotifier {
    pub fn new(client: Client, options: TwilioOptions) -> Self {
        TwilioNotifier {
            client,
            options,
            base_url: "https://api.twilio.com".to_string(),
        }
    }

    fn messages_url(&self) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.base_url.trim_end_matches('/'),
            self.options.account_sid
        )
    }
}

#[async_trait(?Send)]
impl Notifier for TwilioNotifier {
    async fn send(&self, message: &str) -> Result<(), OffwatchError> {
        debug!("sending sms to {}, msg: {}", self.options.to_number, message);
        let form = [
            ("To", self.options.to_number.as_str()),
            ("From", self.options.from_number.as_str()),
            ("Body", message),
        ];

        let response = self
            .client
            .post(self.messages_url())
            .basic_auth(&self.options.account_sid, Some(&self.options.auth_token))
            .timeout(Duration::from_secs(10))
            .form(&form)
            .send()
            .await
            .map_err(|e| OffwatchError::Notify(format!("request to twilio failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OffwatchError::Notify(format!("twilio returned {status}: {body}")));
        }

        info!("sms sent to {}", self.options.to_number);
        Ok(())
    }
}

/// Logs messages instead of delivering them.
pub struct LogNotifier;

#[async_trait(?Send)]
impl Notifier for LogNotifier {
    async fn send(&self, message: &str) -> Result<(), OffwatchError> {
        info!("dry run, not sending:\n{}", message);
        Ok(())
    }
}
