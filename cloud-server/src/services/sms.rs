//! SMS alerts through the Twilio Messages API

use super::{provider_message, ChannelError, ThreatAlert};
use crate::config::Config;

pub const MAX_SMS_CHARS: usize = 1600;

pub fn format_message(alert: &ThreatAlert) -> String {
    let message = format!(
        "{}\n\nType: {}\nSource: {}\nTarget: {}\nTime: {}\n\n{}",
        alert.headline(),
        alert.threat_type,
        alert.source,
        alert.target,
        alert.display_time(),
        alert.description
    );
    truncate(message)
}

fn truncate(message: String) -> String {
    if message.chars().count() <= MAX_SMS_CHARS {
        return message;
    }
    let mut cut: String = message.chars().take(MAX_SMS_CHARS - 3).collect();
    cut.push_str("...");
    cut
}

pub async fn send(
    http: &reqwest::Client,
    config: &Config,
    alert: &ThreatAlert,
    to: &str,
) -> Result<serde_json::Value, ChannelError> {
    let (Some(sid), Some(token), Some(from)) = (
        config.twilio_account_sid.as_deref(),
        config.twilio_auth_token.as_deref(),
        config.twilio_phone_number.as_deref(),
    ) else {
        return Err(ChannelError::NotConfigured("Twilio credentials are not fully configured"));
    };

    let url = format!("https://api.twilio.com/2010-04-01/Accounts/{}/Messages.json", sid);
    let body = format_message(alert);

    let response = http
        .post(&url)
        .basic_auth(sid, Some(token))
        .form(&[("To", to), ("From", from), ("Body", body.as_str())])
        .send()
        .await?;

    let status = response.status();
    let result: serde_json::Value = response.json().await.unwrap_or(serde_json::Value::Null);

    if !status.is_success() {
        tracing::error!("SMS alert rejected ({}): {}", status, result);
        return Err(ChannelError::Rejected(provider_message(&result, "Failed to send SMS")));
    }

    tracing::info!("SMS alert sent: {}", result.get("sid").and_then(|s| s.as_str()).unwrap_or("-"));
    Ok(result)
}
