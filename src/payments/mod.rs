//! Invoice and payment ledger
//!
//! Issues invoices for the premium-play fee, verifies client-submitted
//! payment tokens, and records completed payments. State is volatile and
//! in-memory; durability is an external concern.
//!
//! Payment records are keyed by lowercased requester address: an address
//! that has paid once stays paid for the lifetime of the process. This is a
//! deliberate choice (pay once per address), with invoice expiry enforced at
//! verification time so a stale invoice cannot be redeemed.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::config::AgentConfig;

/// Invoice lifetime from creation.
const INVOICE_EXPIRY_MINUTES: i64 = 5;

/// An amount owed by a requester before premium play is granted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invoice {
    pub id: String,
    pub address: String,
    /// Fee in token base units (6-decimal USDC).
    pub amount: String,
    pub currency: String,
    pub network: String,
    pub description: String,
    pub timestamp: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Recipient of the agent-initiated payment for this invoice.
    #[serde(default)]
    pub pay_to: String,
}

/// A completed-payment fact. At most one stored per address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub address: String,
    pub amount: String,
    pub reference: String,
    pub timestamp: DateTime<Utc>,
}

/// x402-style payment requirements advertised to clients.
#[derive(Debug, Clone, Serialize)]
pub struct PaymentRequirements {
    pub scheme: &'static str,
    pub network: String,
    pub pay_to: String,
    pub asset: String,
    pub max_amount_required: String,
    pub max_timeout_seconds: u64,
}

/// In-memory invoice and payment state.
pub struct PaymentService {
    invoices: HashMap<String, Invoice>,
    payments: HashMap<String, PaymentRecord>,
    fee_amount: String,
    fee_currency: String,
    pay_to: String,
    asset: String,
    network: String,
    max_timeout_seconds: u64,
}

impl PaymentService {
    pub fn new(config: &AgentConfig) -> Self {
        Self {
            invoices: HashMap::new(),
            payments: HashMap::new(),
            fee_amount: config.fee_amount.clone(),
            fee_currency: config.fee_currency.clone(),
            pay_to: config.pay_to.clone(),
            asset: config.usdc_address.to_string(),
            network: config.network.clone(),
            max_timeout_seconds: config.auth_timeout_secs,
        }
    }

    /// Requirements snapshot for the 402 response.
    pub fn requirements(&self) -> PaymentRequirements {
        PaymentRequirements {
            scheme: "exact",
            network: self.network.clone(),
            pay_to: self.pay_to.clone(),
            asset: self.asset.clone(),
            max_amount_required: self.fee_amount.clone(),
            max_timeout_seconds: self.max_timeout_seconds,
        }
    }

    /// Issue a new invoice for `address`. Duplicate unexpired invoices for
    /// the same requester are permitted.
    pub fn generate_invoice(&mut self, address: &str) -> Invoice {
        let now = Utc::now();
        let invoice = Invoice {
            id: Uuid::new_v4().to_string(),
            address: address.to_lowercase(),
            amount: self.fee_amount.clone(),
            currency: self.fee_currency.clone(),
            network: self.network.clone(),
            description: "Gasless Arcade Premium Play".to_string(),
            timestamp: now,
            expires_at: now + Duration::minutes(INVOICE_EXPIRY_MINUTES),
            pay_to: self.pay_to.clone(),
        };
        self.invoices.insert(invoice.id.clone(), invoice.clone());
        invoice
    }

    /// Verify a client-presented payment token.
    ///
    /// Idempotent: an address with a stored record is paid, no re-decoding.
    /// Otherwise the token is base64-decoded and accepted if it carries any
    /// content; cryptographic verification against the token contract is an
    /// extension point for callers needing settlement assurance.
    pub fn verify_payment(&mut self, address: &str, payment_header: Option<&str>) -> bool {
        let key = address.to_lowercase();
        if self.payments.contains_key(&key) {
            return true;
        }

        // A requester whose newest invoice has lapsed must request a fresh one.
        if let Some(invoice) = self.newest_invoice(&key) {
            if invoice.expires_at < Utc::now() {
                tracing::warn!(address = %key, invoice = %invoice.id, "invoice expired");
                return false;
            }
        }

        let Some(header) = payment_header else {
            return false;
        };

        match BASE64.decode(header) {
            Ok(decoded) if !decoded.is_empty() => {
                let reference = header.chars().take(66).collect::<String>();
                let record = PaymentRecord {
                    address: key.clone(),
                    amount: self.fee_amount.clone(),
                    reference,
                    timestamp: Utc::now(),
                };
                self.payments.insert(key.clone(), record);
                tracing::info!(address = %key, "payment verified");
                true
            }
            Ok(_) => {
                tracing::warn!(address = %key, "empty payment header");
                false
            }
            Err(e) => {
                tracing::warn!(address = %key, error = %e, "invalid payment header");
                false
            }
        }
    }

    /// Store a completed payment unconditionally, overwriting any prior
    /// record for the address.
    pub fn record_payment(&mut self, address: &str, reference: &str) {
        let key = address.to_lowercase();
        let record = PaymentRecord {
            address: key.clone(),
            amount: self.fee_amount.clone(),
            reference: reference.to_string(),
            timestamp: Utc::now(),
        };
        self.payments.insert(key, record);
    }

    /// Zero or one record per address.
    pub fn payment_history(&self, address: &str) -> Vec<PaymentRecord> {
        self.payments
            .get(&address.to_lowercase())
            .cloned()
            .into_iter()
            .collect()
    }

    pub fn get_invoice(&self, id: &str) -> Option<&Invoice> {
        self.invoices.get(id)
    }

    fn newest_invoice(&self, key: &str) -> Option<&Invoice> {
        self.invoices
            .values()
            .filter(|inv| inv.address == key)
            .max_by_key(|inv| inv.timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAYER: &str = "0xAbCd000000000000000000000000000000000001";

    fn service() -> PaymentService {
        PaymentService::new(&AgentConfig::for_tests())
    }

    #[test]
    fn invoice_fields_come_from_configuration() {
        let mut svc = service();
        let invoice = svc.generate_invoice(PLAYER);
        assert_eq!(invoice.address, PLAYER.to_lowercase());
        assert_eq!(invoice.amount, "10000000");
        assert_eq!(invoice.currency, "USDC");
        assert_eq!(
            invoice.expires_at - invoice.timestamp,
            Duration::minutes(INVOICE_EXPIRY_MINUTES)
        );
        assert!(svc.get_invoice(&invoice.id).is_some());
    }

    #[test]
    fn verify_without_token_or_record_fails() {
        let mut svc = service();
        svc.generate_invoice(PLAYER);
        assert!(!svc.verify_payment(PLAYER, None));
        assert!(svc.payment_history(PLAYER).is_empty());
    }

    #[test]
    fn verify_with_decodable_token_records_payment() {
        let mut svc = service();
        svc.generate_invoice(PLAYER);
        let token = BASE64.encode(b"signed-authorization-bytes");
        assert!(svc.verify_payment(PLAYER, Some(&token)));

        let history = svc.payment_history(PLAYER);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].amount, "10000000");
    }

    #[test]
    fn verify_is_idempotent_once_recorded() {
        let mut svc = service();
        svc.record_payment(PLAYER, "ref-1");
        // No token needed, no re-decoding.
        assert!(svc.verify_payment(PLAYER, None));
        assert!(svc.verify_payment(PLAYER, Some("!!!not-base64!!!")));
    }

    #[test]
    fn verify_rejects_undecodable_or_empty_tokens() {
        let mut svc = service();
        assert!(!svc.verify_payment(PLAYER, Some("!!!not-base64!!!")));
        assert!(!svc.verify_payment(PLAYER, Some("")));
        assert!(svc.payment_history(PLAYER).is_empty());
    }

    #[test]
    fn expired_invoice_cannot_be_redeemed() {
        let mut svc = service();
        let invoice = svc.generate_invoice(PLAYER);
        // Backdate the stored invoice past its expiry.
        if let Some(stored) = svc.invoices.get_mut(&invoice.id) {
            stored.timestamp = Utc::now() - Duration::minutes(20);
            stored.expires_at = Utc::now() - Duration::minutes(15);
        }
        let token = BASE64.encode(b"signed-authorization-bytes");
        assert!(!svc.verify_payment(PLAYER, Some(&token)));
    }

    #[test]
    fn record_payment_overwrites_prior_record() {
        let mut svc = service();
        svc.record_payment(PLAYER, "ref-1");
        svc.record_payment(PLAYER, "ref-2");
        let history = svc.payment_history(PLAYER);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].reference, "ref-2");
    }
}
