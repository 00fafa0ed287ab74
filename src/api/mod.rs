//! API handlers and state management

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::agent::{AgentStatus, AutoPayAgent, PaymentOutcome};
use crate::config::AgentConfig;
use crate::payments::{Invoice, PaymentRecord, PaymentRequirements, PaymentService};
use crate::signer::SignerError;

// ============================================================================
// State
// ============================================================================

/// Shared service state. All payment mutation happens behind the write
/// lock, which serializes the check-then-debit sequence in the agent.
pub struct AppState {
    pub agent: AutoPayAgent,
    pub payments: PaymentService,
}

impl AppState {
    pub fn new(config: &AgentConfig) -> Result<Self, SignerError> {
        Ok(Self {
            agent: AutoPayAgent::new(config)?,
            payments: PaymentService::new(config),
        })
    }
}

pub type SharedState = Arc<RwLock<AppState>>;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct InvoiceRequest {
    pub address: String,
}

#[derive(Debug, Deserialize)]
pub struct VerifyPaymentRequest {
    pub address: String,
    pub payment_header: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct VerifyPaymentResponse {
    pub paid: bool,
}

#[derive(Debug, Deserialize)]
pub struct AgentPayRequest {
    pub invoice_id: String,
}

// ============================================================================
// Handlers
// ============================================================================

pub async fn health_check() -> &'static str {
    "OK"
}

pub async fn payment_requirements(
    State(state): State<SharedState>,
) -> Json<PaymentRequirements> {
    let state = state.read().await;
    Json(state.payments.requirements())
}

pub async fn create_invoice(
    State(state): State<SharedState>,
    Json(request): Json<InvoiceRequest>,
) -> Result<Json<Invoice>, (StatusCode, String)> {
    if request.address.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "Address required".to_string()));
    }
    let mut state = state.write().await;
    Ok(Json(state.payments.generate_invoice(&request.address)))
}

pub async fn verify_payment(
    State(state): State<SharedState>,
    Json(request): Json<VerifyPaymentRequest>,
) -> Result<Json<VerifyPaymentResponse>, (StatusCode, String)> {
    if request.address.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "Address required".to_string()));
    }
    let mut state = state.write().await;
    let paid = state
        .payments
        .verify_payment(&request.address, request.payment_header.as_deref());
    Ok(Json(VerifyPaymentResponse { paid }))
}

pub async fn payment_history(
    State(state): State<SharedState>,
    Path(address): Path<String>,
) -> Json<Vec<PaymentRecord>> {
    let state = state.read().await;
    Json(state.payments.payment_history(&address))
}

pub async fn agent_pay(
    State(state): State<SharedState>,
    Json(request): Json<AgentPayRequest>,
) -> Result<Json<PaymentOutcome>, (StatusCode, String)> {
    let mut state = state.write().await;

    let invoice = state
        .payments
        .get_invoice(&request.invoice_id)
        .cloned()
        .ok_or((StatusCode::NOT_FOUND, "Invoice not found".to_string()))?;

    let outcome = state.agent.process_payment(&invoice).await;
    if outcome.success {
        if let Some(reference) = &outcome.reference {
            state.payments.record_payment(&invoice.address, reference);
        }
    }

    Ok(Json(outcome))
}

pub async fn agent_status(State(state): State<SharedState>) -> Json<AgentStatus> {
    let state = state.read().await;
    Json(state.agent.status())
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

    const PLAYER: &str = "0xAbCd000000000000000000000000000000000001";

    fn shared_state() -> SharedState {
        Arc::new(RwLock::new(
            AppState::new(&AgentConfig::for_tests()).unwrap(),
        ))
    }

    #[tokio::test]
    async fn invoice_then_verify_flow() {
        let state = shared_state();

        let Json(invoice) = create_invoice(
            State(state.clone()),
            Json(InvoiceRequest {
                address: PLAYER.to_string(),
            }),
        )
        .await
        .unwrap();
        assert_eq!(invoice.address, PLAYER.to_lowercase());

        // No token, no record: not paid.
        let Json(response) = verify_payment(
            State(state.clone()),
            Json(VerifyPaymentRequest {
                address: PLAYER.to_string(),
                payment_header: None,
            }),
        )
        .await
        .unwrap();
        assert!(!response.paid);

        // Decodable token: paid, and a record appears.
        let token = BASE64.encode(b"client-signed-authorization");
        let Json(response) = verify_payment(
            State(state.clone()),
            Json(VerifyPaymentRequest {
                address: PLAYER.to_string(),
                payment_header: Some(token),
            }),
        )
        .await
        .unwrap();
        assert!(response.paid);

        let Json(history) =
            payment_history(State(state.clone()), Path(PLAYER.to_string())).await;
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn agent_pay_unknown_invoice_is_404() {
        let state = shared_state();
        let result = agent_pay(
            State(state),
            Json(AgentPayRequest {
                invoice_id: "missing".to_string(),
            }),
        )
        .await;
        assert_eq!(result.err().unwrap().0, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn agent_pay_denial_records_nothing() {
        let state = shared_state();
        // The full 10 USDC fee is over the 0.05 per-tx ceiling.
        let Json(invoice) = create_invoice(
            State(state.clone()),
            Json(InvoiceRequest {
                address: PLAYER.to_string(),
            }),
        )
        .await
        .unwrap();

        let Json(outcome) = agent_pay(
            State(state.clone()),
            Json(AgentPayRequest {
                invoice_id: invoice.id,
            }),
        )
        .await
        .unwrap();
        assert!(!outcome.success);
        assert!(outcome.error.is_some());

        let Json(history) = payment_history(State(state), Path(PLAYER.to_string())).await;
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn status_snapshot_exposes_policy_and_spend() {
        let state = shared_state();
        let Json(status) = agent_status(State(state)).await;
        assert!(status.address.starts_with("0x"));
        assert_eq!(status.rules.max_payment_per_tx, 0.05);
        assert_eq!(status.rules.daily_spending_limit, 0.50);
        assert_eq!(status.daily_spending, 0.0);
    }

    #[tokio::test]
    async fn empty_address_is_rejected() {
        let state = shared_state();
        let result = create_invoice(
            State(state.clone()),
            Json(InvoiceRequest {
                address: String::new(),
            }),
        )
        .await;
        assert_eq!(result.err().unwrap().0, StatusCode::BAD_REQUEST);
    }
}
