//! Environment-driven configuration
//!
//! Everything the agent needs is read once at startup. A missing or
//! malformed signing key is a fatal error: the process must never come up
//! in a state where it would sign with invalid material.

use alloy_primitives::Address;
use serde::Serialize;
use thiserror::Error;

/// Default per-transaction ceiling in display units (USDC).
const DEFAULT_MAX_PAYMENT_PER_TX: f64 = 0.05;
/// Default rolling daily ceiling in display units (USDC).
const DEFAULT_DAILY_SPENDING_LIMIT: f64 = 0.50;
/// Default authorization validity window in seconds.
const DEFAULT_AUTH_TIMEOUT_SECS: u64 = 300;
/// Default invoice fee in USDC base units (6 decimals).
const DEFAULT_FEE_AMOUNT: &str = "10000000";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("AGENT_PRIVATE_KEY (or REWARD_WALLET_PRIVATE_KEY) not set")]
    MissingSigningKey,
    #[error(
        "AGENT_PRIVATE_KEY is a placeholder. Set a real 32-byte hex key in the environment"
    )]
    PlaceholderSigningKey,
    #[error("invalid AGENT_PRIVATE_KEY format: expected 64 hex chars (0x prefix optional)")]
    MalformedSigningKey,
    #[error("invalid {name}: {value}")]
    InvalidValue { name: &'static str, value: String },
}

/// How the AI advisory gate participates in payment decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AdvisoryMode {
    /// Deterministic rules only.
    Disabled,
    /// AI verdict is authoritative once deterministic checks pass.
    AdvisoryOnly,
    /// Both the deterministic rules and the AI must allow.
    Hybrid,
}

impl AdvisoryMode {
    fn from_env(raw: &str) -> Result<Self, ConfigError> {
        match raw.to_lowercase().as_str() {
            "" | "off" | "disabled" => Ok(AdvisoryMode::Disabled),
            "advisory" => Ok(AdvisoryMode::AdvisoryOnly),
            "hybrid" => Ok(AdvisoryMode::Hybrid),
            other => Err(ConfigError::InvalidValue {
                name: "AI_DECISION_MODE",
                value: other.to_string(),
            }),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self, AdvisoryMode::Disabled)
    }
}

/// Per-process policy limits, set once at startup and never mutated.
#[derive(Debug, Clone, Serialize)]
pub struct PolicyConfig {
    pub max_payment_per_tx: f64,
    pub daily_spending_limit: f64,
    pub auto_pay_enabled: bool,
}

/// Full agent configuration resolved from the environment.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Validated 64-char hex signing key, without 0x prefix.
    pub signing_key: String,
    pub rpc_url: String,
    pub policy: PolicyConfig,
    pub advisory_mode: AdvisoryMode,
    pub groq_api_key: Option<String>,
    pub groq_model: String,
    /// Verifying contract bound into the signed authorization domain.
    pub usdc_address: Address,
    pub chain_id: u64,
    /// Offset applied to `validBefore` when signing authorizations.
    pub auth_timeout_secs: u64,
    /// Invoice fee in token base units.
    pub fee_amount: String,
    pub fee_currency: String,
    pub pay_to: String,
    pub network: String,
    pub port: u16,
}

impl AgentConfig {
    /// Resolve configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let raw_key = std::env::var("AGENT_PRIVATE_KEY")
            .or_else(|_| std::env::var("REWARD_WALLET_PRIVATE_KEY"))
            .map_err(|_| ConfigError::MissingSigningKey)?;
        let signing_key = validate_signing_key(&raw_key)?;

        let rpc_url = std::env::var("MONAD_TESTNET_RPC")
            .or_else(|_| std::env::var("MONAD_RPC"))
            .unwrap_or_else(|_| "https://testnet-rpc.monad.xyz".to_string());

        let policy = PolicyConfig {
            max_payment_per_tx: parse_env_f64("MAX_PAYMENT_PER_TX", DEFAULT_MAX_PAYMENT_PER_TX)?,
            daily_spending_limit: parse_env_f64(
                "DAILY_SPENDING_LIMIT",
                DEFAULT_DAILY_SPENDING_LIMIT,
            )?,
            auto_pay_enabled: std::env::var("AUTO_PAY_ENABLED")
                .map(|v| v != "false")
                .unwrap_or(true),
        };

        let mut advisory_mode =
            AdvisoryMode::from_env(&std::env::var("AI_DECISION_MODE").unwrap_or_default())?;
        let groq_api_key = std::env::var("GROQ_API_KEY").ok().filter(|k| !k.is_empty());
        if advisory_mode.is_enabled() && groq_api_key.is_none() {
            tracing::warn!("GROQ_API_KEY not set, AI advisory gate disabled");
            advisory_mode = AdvisoryMode::Disabled;
        }

        let usdc_address = std::env::var("USDC_ADDRESS")
            .unwrap_or_else(|_| "0x0000000000000000000000000000000000000000".to_string())
            .parse::<Address>()
            .map_err(|e| ConfigError::InvalidValue {
                name: "USDC_ADDRESS",
                value: e.to_string(),
            })?;

        Ok(Self {
            signing_key,
            rpc_url,
            policy,
            advisory_mode,
            groq_api_key,
            groq_model: std::env::var("GROQ_MODEL")
                .unwrap_or_else(|_| "llama-3.1-70b-versatile".to_string()),
            usdc_address,
            chain_id: parse_env_u64("CHAIN_ID", 10143)?,
            auth_timeout_secs: parse_env_u64("GAME_MAX_TIMEOUT", DEFAULT_AUTH_TIMEOUT_SECS)?,
            fee_amount: std::env::var("GAME_FEE_AMOUNT")
                .unwrap_or_else(|_| DEFAULT_FEE_AMOUNT.to_string()),
            fee_currency: std::env::var("GAME_FEE_CURRENCY")
                .unwrap_or_else(|_| "USDC".to_string()),
            pay_to: std::env::var("GAME_PAYTO").unwrap_or_default(),
            network: std::env::var("GAME_NETWORK")
                .unwrap_or_else(|_| "monad-testnet".to_string()),
            port: parse_env_u64("PORT", 5001)? as u16,
        })
    }
}

/// Reject missing, placeholder, or non-32-byte-hex key material.
pub fn validate_signing_key(raw: &str) -> Result<String, ConfigError> {
    if raw.is_empty() {
        return Err(ConfigError::MissingSigningKey);
    }
    if raw.contains("your_private_key_here") || raw.len() < 64 {
        return Err(ConfigError::PlaceholderSigningKey);
    }
    let clean = raw.strip_prefix("0x").unwrap_or(raw);
    if clean.len() != 64 || !clean.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ConfigError::MalformedSigningKey);
    }
    Ok(clean.to_string())
}

#[cfg(test)]
impl AgentConfig {
    /// Isolated configuration for unit tests. Never reads the environment.
    pub fn for_tests() -> Self {
        Self {
            signing_key: "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318"
                .to_string(),
            rpc_url: "http://localhost:8545".to_string(),
            policy: PolicyConfig {
                max_payment_per_tx: 0.05,
                daily_spending_limit: 0.50,
                auto_pay_enabled: true,
            },
            advisory_mode: AdvisoryMode::Disabled,
            groq_api_key: None,
            groq_model: "llama-3.1-70b-versatile".to_string(),
            usdc_address: Address::ZERO,
            chain_id: 10143,
            auth_timeout_secs: 300,
            fee_amount: "10000000".to_string(),
            fee_currency: "USDC".to_string(),
            pay_to: "0x2222222222222222222222222222222222222222".to_string(),
            network: "monad-testnet".to_string(),
            port: 5001,
        }
    }
}

fn parse_env_f64(name: &'static str, default: f64) -> Result<f64, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse::<f64>()
            .map_err(|_| ConfigError::InvalidValue { name, value: raw }),
        Err(_) => Ok(default),
    }
}

fn parse_env_u64(name: &'static str, default: u64) -> Result<u64, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse::<u64>()
            .map_err(|_| ConfigError::InvalidValue { name, value: raw }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GOOD_KEY: &str = "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";

    #[test]
    fn accepts_valid_key_with_and_without_prefix() {
        assert_eq!(validate_signing_key(GOOD_KEY).unwrap(), GOOD_KEY);
        let prefixed = format!("0x{GOOD_KEY}");
        assert_eq!(validate_signing_key(&prefixed).unwrap(), GOOD_KEY);
    }

    #[test]
    fn rejects_missing_key() {
        assert!(matches!(
            validate_signing_key(""),
            Err(ConfigError::MissingSigningKey)
        ));
    }

    #[test]
    fn rejects_placeholder_key() {
        assert!(matches!(
            validate_signing_key("your_private_key_here_your_private_key_here_your_private_key_here"),
            Err(ConfigError::PlaceholderSigningKey)
        ));
        assert!(matches!(
            validate_signing_key("abc123"),
            Err(ConfigError::PlaceholderSigningKey)
        ));
    }

    #[test]
    fn rejects_non_hex_key() {
        let bad = "zz".repeat(32);
        assert!(matches!(
            validate_signing_key(&bad),
            Err(ConfigError::MalformedSigningKey)
        ));
    }

    #[test]
    fn advisory_mode_parsing() {
        assert_eq!(AdvisoryMode::from_env("").unwrap(), AdvisoryMode::Disabled);
        assert_eq!(AdvisoryMode::from_env("off").unwrap(), AdvisoryMode::Disabled);
        assert_eq!(
            AdvisoryMode::from_env("advisory").unwrap(),
            AdvisoryMode::AdvisoryOnly
        );
        assert_eq!(AdvisoryMode::from_env("Hybrid").unwrap(), AdvisoryMode::Hybrid);
        assert!(AdvisoryMode::from_env("monad").is_err());
    }
}
