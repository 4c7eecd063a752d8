//! Classification through an OpenAI-compatible chat-completions gateway
//!
//! The model is forced to answer through the `report_threat_analysis` tool,
//! so the verdict arrives as structured JSON arguments rather than prose.

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::Config;
use crate::models::SEVERITIES;
use crate::{AppError, AppResult};

pub const TOOL_NAME: &str = "report_threat_analysis";

/// Threat categories the tool may report
pub const THREAT_TYPES: [&str; 6] = ["malware", "intrusion", "ddos", "phishing", "ransomware", "botnet"];

const SYSTEM_PROMPT: &str = "You are SENTINEL, a security analyst reviewing HTTP requests observed \
from inside a web application. Each entry is one resource fetch the page performed, with the \
locally computed risk score (0-100) and the reasons behind it.

Look for:
- Data exfiltration: large uploads or responses to hosts the page has no business talking to
- Tracking and fingerprinting beacons disguised as ordinary assets
- Injected or third-party scripts from untrusted origins (possible supply-chain compromise)
- Phishing or lookalike domains
- Command-and-control style polling: many small requests to one external host
- Botnet or DDoS participation: bursts of requests at machine cadence

Ordinary CDN, font and first-party API traffic is normal. Only report a threat when the pattern \
is specific; state the hosts and URLs that support the verdict as indicators.";

/// One observed request, as sent by a monitoring session
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PacketSummary {
    pub id: String,
    pub timestamp: String,
    pub url: String,
    pub domain: String,
    pub protocol: String,
    pub method: String,
    pub initiator_type: String,
    pub duration: f64,
    pub transfer_size: u64,
    pub status: String,
    pub risk_score: u8,
    pub risk_reasons: Vec<String>,
}

/// Verdict returned through the forced tool call
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreatAnalysis {
    pub is_threat: bool,
    #[serde(default)]
    pub threat_type: Option<String>,
    #[serde(default)]
    pub severity: Option<String>,
    pub confidence: f64,
    pub description: String,
    pub recommendation: String,
    pub indicators: Vec<String>,
}

impl ThreatAnalysis {
    /// Both categorical fields must be null or one of the tool's enum values
    fn has_known_labels(&self) -> bool {
        let known = |value: &Option<String>, allowed: &[&str]| {
            value.as_deref().map_or(true, |v| allowed.contains(&v))
        };
        known(&self.threat_type, &THREAT_TYPES) && known(&self.severity, &SEVERITIES)
    }
}

/// A string enum that also admits null
fn nullable_enum(values: &[&str]) -> Value {
    let mut allowed: Vec<Value> = values.iter().map(|v| json!(v)).collect();
    allowed.push(Value::Null);
    Value::Array(allowed)
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    tool_calls: Vec<ToolCall>,
}

#[derive(Debug, Deserialize)]
struct ToolCall {
    function: FunctionCall,
}

#[derive(Debug, Deserialize)]
struct FunctionCall {
    name: String,
    arguments: String,
}

fn tool_definition() -> Value {
    json!({
        "type": "function",
        "function": {
            "name": TOOL_NAME,
            "description": "Report the results of the request-batch threat analysis",
            "parameters": {
                "type": "object",
                "properties": {
                    "isThreat": {
                        "type": "boolean",
                        "description": "Whether a threat was detected"
                    },
                    "threatType": {
                        "type": "string",
                        "enum": nullable_enum(&THREAT_TYPES),
                        "description": "The type of threat detected, or null if no threat"
                    },
                    "severity": {
                        "type": "string",
                        "enum": nullable_enum(&SEVERITIES),
                        "description": "The severity level of the threat, or null if no threat"
                    },
                    "confidence": {
                        "type": "number",
                        "description": "Confidence score from 0 to 1"
                    },
                    "description": {
                        "type": "string",
                        "description": "Detailed description of the findings"
                    },
                    "recommendation": {
                        "type": "string",
                        "description": "Recommended action to take"
                    },
                    "indicators": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "Specific indicators of compromise found"
                    }
                },
                "required": ["isThreat", "confidence", "description", "recommendation", "indicators"],
                "additionalProperties": false
            }
        }
    })
}

pub fn user_prompt(packets: &[PacketSummary]) -> String {
    let mut lines = Vec::with_capacity(packets.len());
    for p in packets {
        let mut line = format!(
            "- {} {} [{}] {} {}B {:.0}ms risk={}",
            p.method, p.url, p.initiator_type, p.status, p.transfer_size, p.duration, p.risk_score
        );
        if !p.risk_reasons.is_empty() {
            line.push_str(&format!(" ({})", p.risk_reasons.join("; ")));
        }
        lines.push(line);
    }

    format!(
        "Analyze this batch of {} observed requests for security threats:\n\n{}\n\n\
         If this looks like normal application traffic, report no threat. Otherwise classify \
         the threat type and severity.",
        packets.len(),
        lines.join("\n")
    )
}

pub fn request_body(model: &str, packets: &[PacketSummary]) -> Value {
    json!({
        "model": model,
        "messages": [
            { "role": "system", "content": SYSTEM_PROMPT },
            { "role": "user", "content": user_prompt(packets) }
        ],
        "tools": [tool_definition()],
        "tool_choice": { "type": "function", "function": { "name": TOOL_NAME } }
    })
}

/// Pull the verdict out of a completion; anything unexpected is a format error
pub fn extract_analysis(completion: Value) -> AppResult<ThreatAnalysis> {
    let invalid = || AppError::FunctionFailed("Invalid AI response format".to_string());

    let completion: ChatCompletion = serde_json::from_value(completion).map_err(|_| invalid())?;
    let call = completion
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.tool_calls.into_iter().next())
        .ok_or_else(invalid)?;

    if call.function.name != TOOL_NAME {
        return Err(invalid());
    }

    let analysis: ThreatAnalysis = serde_json::from_str(&call.function.arguments).map_err(|_| invalid())?;
    if !analysis.has_known_labels() {
        tracing::warn!(
            "AI verdict outside tool enums: threatType={:?} severity={:?}",
            analysis.threat_type,
            analysis.severity
        );
        return Err(invalid());
    }
    Ok(analysis)
}

pub async fn analyze(
    http: &reqwest::Client,
    config: &Config,
    packets: &[PacketSummary],
) -> AppResult<ThreatAnalysis> {
    let api_key = config
        .ai_gateway_key
        .as_deref()
        .ok_or_else(|| AppError::FunctionFailed("AI_GATEWAY_KEY is not configured".to_string()))?;

    let response = http
        .post(&config.ai_gateway_url)
        .bearer_auth(api_key)
        .json(&request_body(&config.ai_model, packets))
        .send()
        .await
        .map_err(|e| AppError::FunctionFailed(format!("AI Gateway unreachable: {}", e)))?;

    match response.status() {
        StatusCode::TOO_MANY_REQUESTS => return Err(AppError::RateLimited),
        StatusCode::PAYMENT_REQUIRED => return Err(AppError::PaymentRequired),
        status if !status.is_success() => {
            let text = response.text().await.unwrap_or_default();
            tracing::error!("AI Gateway error: {} {}", status, text);
            return Err(AppError::FunctionFailed(format!("AI Gateway error: {}", status.as_u16())));
        }
        _ => {}
    }

    let completion: Value = response
        .json()
        .await
        .map_err(|_| AppError::FunctionFailed("Invalid AI response format".to_string()))?;
    tracing::debug!("AI response: {}", completion);

    extract_analysis(completion)
}
