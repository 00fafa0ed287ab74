//! Auto-pay agent
//!
//! The payment-authorization core: deterministic policy evaluation against
//! per-transaction and rolling daily ceilings, the optional AI advisory
//! combination rules, and the `can_pay` / `process_payment` entry points
//! that sequence policy, signing, and spend accounting.
//!
//! Amounts flow through two scales. Invoices carry token base units
//! (6-decimal USDC) as integer strings; policy limits and the spend ledger
//! operate in display units. Conversion happens here, never in the signer.

use alloy_primitives::Address;
use chrono::{DateTime, Local};
use serde::Serialize;

use crate::advisor::GroqAdvisor;
use crate::config::{AdvisoryMode, AgentConfig, PolicyConfig};
use crate::payments::Invoice;
use crate::signer::{AuthorizationSigner, SignerError};

/// USDC base units per display unit.
const BASE_UNITS_PER_TOKEN: f64 = 1e6;

/// Outcome of a policy check. Denials are values, not errors.
#[derive(Debug, Clone, Serialize)]
pub struct Decision {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Decision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
        }
    }
}

/// Result of an agent-initiated payment attempt.
#[derive(Debug, Clone, Serialize)]
pub struct PaymentOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PaymentOutcome {
    fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            signature: None,
            reference: None,
            error: Some(error.into()),
        }
    }
}

/// Agent status snapshot for the HTTP surface.
#[derive(Debug, Clone, Serialize)]
pub struct AgentStatus {
    pub address: String,
    pub advisory_mode: AdvisoryMode,
    pub rules: PolicyConfig,
    pub daily_spending: f64,
}

/// Rolling daily spend for one agent identity.
///
/// The reset is lazy: it happens on the first policy check after local
/// midnight, never on a timer. `daily_spent` only ever decreases via reset.
pub struct SpendLedger {
    daily_spent: f64,
    last_reset: DateTime<Local>,
}

impl SpendLedger {
    pub fn new(now: DateTime<Local>) -> Self {
        Self {
            daily_spent: 0.0,
            last_reset: now,
        }
    }

    /// True iff the last reset happened before local midnight of `now`'s day.
    pub fn should_reset(&self, now: DateTime<Local>) -> bool {
        let midnight = now
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .expect("midnight is a valid time");
        self.last_reset.naive_local() < midnight
    }

    pub fn reset(&mut self, now: DateTime<Local>) {
        self.daily_spent = 0.0;
        self.last_reset = now;
    }

    /// Callers must have validated the amount against the limits already.
    pub fn debit(&mut self, amount: f64) {
        self.daily_spent += amount;
    }

    pub fn spent(&self) -> f64 {
        self.daily_spent
    }
}

/// The autonomous payment agent.
///
/// One instance per agent identity. Callers must serialize access (the HTTP
/// layer holds it behind a write lock) because `can_pay` plus the debit in
/// `process_payment` is a check-then-write sequence.
pub struct AutoPayAgent {
    signer: AuthorizationSigner,
    policy: PolicyConfig,
    advisory_mode: AdvisoryMode,
    advisor: Option<GroqAdvisor>,
    ledger: SpendLedger,
}

impl AutoPayAgent {
    pub fn new(config: &AgentConfig) -> Result<Self, SignerError> {
        let signer = AuthorizationSigner::new(
            &config.signing_key,
            config.chain_id,
            config.usdc_address,
            config.auth_timeout_secs,
        )?;

        let advisor = match (&config.groq_api_key, config.advisory_mode.is_enabled()) {
            (Some(key), true) => Some(GroqAdvisor::new(key.clone(), config.groq_model.clone())),
            _ => None,
        };

        Ok(Self {
            signer,
            policy: config.policy.clone(),
            advisory_mode: config.advisory_mode,
            advisor,
            ledger: SpendLedger::new(Local::now()),
        })
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }

    /// The limit checks alone, with no reset and no kill switch. Reused as
    /// the fallback when the advisory gate fails.
    fn check_rules(&self, amount: f64) -> Decision {
        if amount > self.policy.max_payment_per_tx {
            return Decision::deny(format!(
                "Amount exceeds max payment per tx ({})",
                self.policy.max_payment_per_tx
            ));
        }
        if self.ledger.spent() + amount > self.policy.daily_spending_limit {
            return Decision::deny("Daily spending limit would be exceeded");
        }
        Decision::allow()
    }

    /// Deterministic policy gate: lazy daily reset, kill switch, then limits.
    pub fn evaluate(&mut self, amount: f64) -> Decision {
        let now = Local::now();
        if self.ledger.should_reset(now) {
            self.ledger.reset(now);
        }
        if !self.policy.auto_pay_enabled {
            return Decision::deny("Auto-pay disabled");
        }
        self.check_rules(amount)
    }

    /// Full decision for a display-unit amount, advisory gate included.
    ///
    /// The advisory verdict can only tighten: it is never consulted after a
    /// deterministic deny, and any advisory failure falls back to the
    /// deterministic rules.
    pub async fn can_pay(&mut self, amount: f64, invoice: Option<&Invoice>) -> Decision {
        let deterministic = self.evaluate(amount);
        if !deterministic.allowed {
            return deterministic;
        }

        if let (Some(invoice), Some(advisor)) = (invoice, &self.advisor) {
            match advisor
                .review(invoice, amount, self.ledger.spent(), &self.policy)
                .await
            {
                Ok(verdict) => match self.advisory_mode {
                    AdvisoryMode::AdvisoryOnly => return verdict,
                    AdvisoryMode::Hybrid => {
                        if !verdict.allowed {
                            return verdict;
                        }
                    }
                    AdvisoryMode::Disabled => {}
                },
                Err(e) => {
                    tracing::warn!(error = %e, "advisory gate failed, using deterministic rules");
                    return self.check_rules(amount);
                }
            }
        }

        Decision::allow()
    }

    /// Authorize payment of an invoice and debit the spend ledger.
    ///
    /// Denials and per-attempt failures come back as structured outcomes;
    /// nothing is mutated unless the signature was produced.
    pub async fn process_payment(&mut self, invoice: &Invoice) -> PaymentOutcome {
        // An expired invoice is not payable: no signing, no debit.
        if invoice.expires_at < chrono::Utc::now() {
            tracing::warn!(invoice = %invoice.id, "invoice expired");
            return PaymentOutcome::failure("Invoice expired");
        }

        let base_units: u64 = match invoice.amount.parse() {
            Ok(v) => v,
            Err(_) => {
                return PaymentOutcome::failure(format!(
                    "Invalid invoice amount: {}",
                    invoice.amount
                ));
            }
        };
        let display_amount = base_units as f64 / BASE_UNITS_PER_TOKEN;

        tracing::info!(
            amount = display_amount,
            currency = %invoice.currency,
            description = %invoice.description,
            "processing payment"
        );

        let decision = self.can_pay(display_amount, Some(invoice)).await;
        if !decision.allowed {
            let reason = decision.reason.unwrap_or_else(|| "Payment denied".to_string());
            tracing::warn!(reason = %reason, "payment denied");
            return PaymentOutcome::failure(reason);
        }

        let signature = match self.signer.authorize(&invoice.pay_to, &invoice.amount) {
            Ok(sig) => sig,
            Err(e) => {
                tracing::error!(error = %e, "authorization signing failed");
                return PaymentOutcome::failure(e.to_string());
            }
        };

        self.ledger.debit(display_amount);

        // Correlation id only, not an on-chain transaction hash.
        let reference = format!("0x{:x}", chrono::Utc::now().timestamp_millis());
        tracing::info!(reference = %reference, "payment authorized");

        PaymentOutcome {
            success: true,
            signature: Some(signature),
            reference: Some(reference),
            error: None,
        }
    }

    pub fn status(&self) -> AgentStatus {
        AgentStatus {
            address: self.signer.address().to_string(),
            advisory_mode: self.advisory_mode,
            rules: self.policy.clone(),
            daily_spending: self.ledger.spent(),
        }
    }
}
