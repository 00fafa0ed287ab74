//! AI advisory gate
//!
//! Optional secondary reviewer for payment requests. Renders a structured
//! decision prompt, calls the Groq chat-completions API, and parses a strict
//! `{allowed, reason}` object from the reply.
//!
//! The gate can only tighten a decision: it is consulted after the
//! deterministic rules already allowed the amount, and any transport or
//! parse failure makes the caller fall back to those rules. Unparseable
//! replies are not scanned for approval keywords; they count as failures.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::agent::Decision;
use crate::config::PolicyConfig;
use crate::payments::Invoice;

const GROQ_API_URL: &str = "https://api.groq.com/openai/v1";
const REQUEST_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Error)]
pub enum AdvisorError {
    #[error("advisory request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("advisory service returned {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("no decision object in advisory reply")]
    Unparseable,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// The two-field decision object the model is instructed to reply with.
#[derive(Debug, Deserialize)]
struct AdvisoryVerdict {
    allowed: bool,
    #[serde(default)]
    reason: Option<String>,
}

/// Client for the Groq completion service.
pub struct GroqAdvisor {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl GroqAdvisor {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
                .build()
                .expect("Failed to create HTTP client"),
            base_url: GROQ_API_URL.to_string(),
            api_key,
            model,
        }
    }

    /// Point the advisor at a different endpoint. Used by tests.
    #[allow(dead_code)]
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    /// Ask the model whether a payment should go through.
    ///
    /// Single attempt, bounded timeout, no retry. Errors are the caller's
    /// cue to fall back to deterministic rules.
    pub async fn review(
        &self,
        invoice: &Invoice,
        amount: f64,
        daily_spent: f64,
        policy: &PolicyConfig,
    ) -> Result<Decision, AdvisorError> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: "You are a payment security agent. Always respond with valid JSON only."
                        .to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: decision_prompt(invoice, amount, daily_spent, policy),
                },
            ],
            temperature: 0.3,
            max_tokens: 200,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AdvisorError::Status { status, body });
        }

        let reply: ChatResponse = response.json().await?;
        let content = reply
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .unwrap_or_default();

        let verdict = parse_verdict(content).ok_or(AdvisorError::Unparseable)?;
        tracing::info!(
            allowed = verdict.allowed,
            reason = verdict.reason.as_deref().unwrap_or("AI evaluation"),
            "advisory verdict"
        );

        Ok(Decision {
            allowed: verdict.allowed,
            reason: Some(
                verdict
                    .reason
                    .unwrap_or_else(|| "AI evaluation".to_string()),
            ),
        })
    }
}

fn decision_prompt(
    invoice: &Invoice,
    amount: f64,
    daily_spent: f64,
    policy: &PolicyConfig,
) -> String {
    format!(
        "You are an AI payment agent for a blockchain gaming platform. \
Evaluate whether to approve this payment request.\n\n\
Payment Details:\n\
- Amount: {amount} {currency}\n\
- Invoice ID: {id}\n\
- Description: {description}\n\
- Recipient: {recipient}\n\
- Network: {network}\n\
- Daily spending so far: {daily_spent:.4} {currency}\n\
- Daily limit: {daily_limit} {currency}\n\
- Max per transaction: {max_per_tx} {currency}\n\n\
Rules:\n\
1. Amount must be reasonable for gaming (typically 0.01-0.05 {currency})\n\
2. Daily spending should not exceed limits\n\
3. Only approve legitimate gaming payments\n\
4. Reject suspicious or unusually large amounts\n\n\
Respond with ONLY a JSON object in this exact format:\n\
{{\n  \"allowed\": true or false,\n  \"reason\": \"brief explanation\"\n}}",
        amount = amount,
        currency = invoice.currency,
        id = invoice.id,
        description = invoice.description,
        recipient = if invoice.pay_to.is_empty() {
            "Unknown"
        } else {
            &invoice.pay_to
        },
        network = invoice.network,
        daily_spent = daily_spent,
        daily_limit = policy.daily_spending_limit,
        max_per_tx = policy.max_payment_per_tx,
    )
}

/// Locate and parse the first balanced `{...}` substring of the reply.
fn parse_verdict(text: &str) -> Option<AdvisoryVerdict> {
    let candidate = extract_json_object(text)?;
    serde_json::from_str(candidate).ok()
}

fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_balanced_object_from_prose() {
        let reply = "Sure, here is my decision: {\"allowed\": true, \"reason\": \"small fee\"} hope that helps";
        let verdict = parse_verdict(reply).unwrap();
        assert!(verdict.allowed);
        assert_eq!(verdict.reason.as_deref(), Some("small fee"));
    }

    #[test]
    fn handles_braces_inside_strings() {
        let reply = r#"{"allowed": false, "reason": "looks like {nested} trouble"}"#;
        let verdict = parse_verdict(reply).unwrap();
        assert!(!verdict.allowed);
    }

    #[test]
    fn unparseable_reply_is_not_a_verdict() {
        assert!(parse_verdict("I would approve this payment").is_none());
        assert!(parse_verdict("{truncated").is_none());
        assert!(parse_verdict("").is_none());
    }

    #[test]
    fn keyword_laden_prose_is_still_rejected() {
        // "approve" in free text must not count as an allow.
        assert!(parse_verdict("APPROVED! allowed, definitely allowed").is_none());
    }

    #[test]
    fn prompt_carries_limits_and_spend() {
        let invoice = Invoice {
            id: "inv-1".to_string(),
            address: "0xabc".to_string(),
            amount: "40000".to_string(),
            currency: "USDC".to_string(),
            network: "monad-testnet".to_string(),
            description: "Gasless Arcade Premium Play".to_string(),
            timestamp: chrono::Utc::now(),
            expires_at: chrono::Utc::now(),
            pay_to: "0x2222222222222222222222222222222222222222".to_string(),
        };
        let policy = PolicyConfig {
            max_payment_per_tx: 0.05,
            daily_spending_limit: 0.50,
            auto_pay_enabled: true,
        };
        let prompt = decision_prompt(&invoice, 0.04, 0.12, &policy);
        assert!(prompt.contains("Amount: 0.04 USDC"));
        assert!(prompt.contains("Daily spending so far: 0.1200"));
        assert!(prompt.contains("Daily limit: 0.5"));
        assert!(prompt.contains("Max per transaction: 0.05"));
        assert!(prompt.contains("inv-1"));
    }
}
