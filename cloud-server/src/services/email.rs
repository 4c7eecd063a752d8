//! Email alerts through the Resend API

use super::{provider_message, ChannelError, ThreatAlert};
use crate::config::Config;

const RESEND_URL: &str = "https://api.resend.com/emails";

pub fn subject(alert: &ThreatAlert) -> String {
    format!(
        "{} [{}] {} Detected",
        alert.emoji(),
        alert.severity.to_uppercase(),
        alert.threat_type
    )
}

pub fn render_html(alert: &ThreatAlert) -> String {
    let color = alert.color();
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
  <style>
    body {{ font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; margin: 0; padding: 20px; background: #111; }}
    .container {{ max-width: 600px; margin: 0 auto; background: #1a1a2e; border-radius: 12px; overflow: hidden; border: 1px solid #333; }}
    .header {{ background: {color}; padding: 20px; text-align: center; }}
    .header h1 {{ color: white; margin: 0; font-size: 24px; }}
    .content {{ padding: 24px; color: #e5e5e5; }}
    .row {{ display: flex; justify-content: space-between; padding: 8px 0; border-bottom: 1px solid #333; }}
    .label {{ color: #888; }}
    .description {{ background: #1e1e30; padding: 16px; border-radius: 8px; border-left: 4px solid {color}; margin-top: 16px; }}
    .footer {{ text-align: center; padding: 16px; color: #666; font-size: 12px; }}
  </style>
</head>
<body>
  <div class="container">
    <div class="header"><h1>{headline}</h1></div>
    <div class="content">
      <div class="row"><span class="label">Threat Type</span><span>{threat_type}</span></div>
      <div class="row"><span class="label">Source</span><span>{source}</span></div>
      <div class="row"><span class="label">Target</span><span>{target}</span></div>
      <div class="row"><span class="label">Detected At</span><span>{time}</span></div>
      <div class="description"><strong>Description:</strong><br/>{description}</div>
    </div>
    <div class="footer">Sentinel Security Dashboard - Automated Alert</div>
  </div>
</body>
</html>"#,
        color = color,
        headline = escape(&alert.headline()),
        threat_type = escape(&alert.threat_type),
        source = escape(&alert.source),
        target = escape(&alert.target),
        time = escape(&alert.display_time()),
        description = escape(&alert.description),
    )
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

pub async fn send(
    http: &reqwest::Client,
    config: &Config,
    alert: &ThreatAlert,
    to: &str,
) -> Result<serde_json::Value, ChannelError> {
    let api_key = config
        .resend_api_key
        .as_deref()
        .ok_or(ChannelError::NotConfigured("RESEND_API_KEY is not configured"))?;

    let response = http
        .post(RESEND_URL)
        .bearer_auth(api_key)
        .json(&serde_json::json!({
            "from": config.alert_from_address,
            "to": [to],
            "subject": subject(alert),
            "html": render_html(alert),
        }))
        .send()
        .await?;

    let status = response.status();
    let body: serde_json::Value = response.json().await.unwrap_or(serde_json::Value::Null);

    if !status.is_success() {
        tracing::error!("Email alert rejected ({}): {}", status, body);
        return Err(ChannelError::Rejected(provider_message(&body, "Failed to send email")));
    }

    tracing::info!("Email alert sent to {}", to);
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::sample_alert;

    #[test]
    fn test_subject_line() {
        assert_eq!(
            subject(&sample_alert("critical")),
            "🚨 [CRITICAL] Data Exfiltration Detected"
        );
    }

    #[test]
    fn test_html_uses_severity_color_and_escapes() {
        let mut alert = sample_alert("high");
        alert.description = "<script>alert(1)</script>".to_string();
        let html = render_html(&alert);
        assert!(html.contains("background: #ea580c"));
        assert!(html.contains("&lt;script&gt;"));
        assert!(!html.contains("<script>"));
    }

    #[tokio::test]
    async fn test_missing_key_reported() {
        let err = send(&reqwest::Client::new(), &Config::for_tests(), &sample_alert("high"), "soc@example.com")
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "RESEND_API_KEY is not configured");
    }
}
