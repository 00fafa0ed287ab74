//! Authorization signer
//!
//! Builds and signs EIP-3009 `TransferWithAuthorization` payloads on behalf
//! of the agent wallet. The signed payload is an off-chain instruction:
//! "transfer `value` from the agent to `to`, valid until `validBefore`,
//! tagged with a one-time `nonce`". The raw 65-byte signature is base64
//! encoded for transport in payment headers.

use alloy_primitives::{Address, B256, U256};
use alloy_signer::SignerSync;
use alloy_signer_local::PrivateKeySigner;
use alloy_sol_types::{sol, Eip712Domain};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::Utc;
use std::borrow::Cow;
use thiserror::Error;

sol! {
    /// ERC-3009 transfer authorization message.
    ///
    /// Field order matters: it must match the USDC contract's type hash.
    /// Reference: <https://eips.ethereum.org/EIPS/eip-3009>
    #[derive(Debug)]
    struct TransferWithAuthorization {
        address from;
        address to;
        uint256 value;
        uint256 validAfter;
        uint256 validBefore;
        bytes32 nonce;
    }
}

#[derive(Debug, Error)]
pub enum SignerError {
    #[error("invalid signing key: {0}")]
    InvalidKey(String),
    #[error("invalid recipient address: {0}")]
    InvalidRecipient(String),
    #[error("invalid base-unit amount: {0}")]
    InvalidAmount(String),
    #[error("signing failed: {0}")]
    Signing(#[from] alloy_signer::Error),
}

/// Signs transfer authorizations with the agent's key.
///
/// Owns the private key material exclusively; callers only ever see the
/// public address and encoded signatures.
pub struct AuthorizationSigner {
    signer: PrivateKeySigner,
    domain: Eip712Domain,
    validity_window_secs: u64,
}

impl AuthorizationSigner {
    /// `signing_key` must be a validated 64-char hex string (no 0x prefix).
    pub fn new(
        signing_key: &str,
        chain_id: u64,
        verifying_contract: Address,
        validity_window_secs: u64,
    ) -> Result<Self, SignerError> {
        let signer = signing_key
            .parse::<PrivateKeySigner>()
            .map_err(|e| SignerError::InvalidKey(e.to_string()))?;

        let domain = Eip712Domain::new(
            Some(Cow::Borrowed("USD Coin")),
            Some(Cow::Borrowed("2")),
            Some(U256::from(chain_id)),
            Some(verifying_contract),
            None,
        );

        Ok(Self {
            signer,
            domain,
            validity_window_secs,
        })
    }

    /// The agent's public address.
    pub fn address(&self) -> Address {
        self.signer.address()
    }

    /// Construct the typed payload for a transfer of `value` base units.
    ///
    /// `validAfter` is always 0, `validBefore` is `now` plus the configured
    /// window, and the nonce is drawn fresh from the OS CSPRNG per call.
    fn build_authorization(
        &self,
        to: Address,
        value: U256,
        now_secs: u64,
    ) -> TransferWithAuthorization {
        TransferWithAuthorization {
            from: self.signer.address(),
            to,
            value,
            validAfter: U256::ZERO,
            validBefore: U256::from(now_secs + self.validity_window_secs),
            nonce: B256::from(rand::random::<[u8; 32]>()),
        }
    }

    /// Sign a transfer authorization and return the base64-encoded signature.
    ///
    /// `amount_base_units` is a decimal base-unit integer string; no decimal
    /// scaling happens here.
    pub fn authorize(&self, to: &str, amount_base_units: &str) -> Result<String, SignerError> {
        if to.is_empty() {
            return Err(SignerError::InvalidRecipient("empty recipient".to_string()));
        }
        let to = to
            .parse::<Address>()
            .map_err(|e| SignerError::InvalidRecipient(e.to_string()))?;
        let value = amount_base_units
            .parse::<U256>()
            .map_err(|e| SignerError::InvalidAmount(e.to_string()))?;

        let auth = self.build_authorization(to, value, Utc::now().timestamp() as u64);
        let signature = self.signer.sign_typed_data_sync(&auth, &self.domain)?;

        Ok(BASE64.encode(signature.as_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    const TEST_KEY: &str = "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";
    const RECIPIENT: &str = "0x2222222222222222222222222222222222222222";

    fn test_signer() -> AuthorizationSigner {
        AuthorizationSigner::new(TEST_KEY, 10143, Address::ZERO, 300).unwrap()
    }

    #[test]
    fn nonces_are_unique_across_authorizations() {
        let signer = test_signer();
        let to = RECIPIENT.parse::<Address>().unwrap();
        let mut seen = HashSet::new();
        for _ in 0..256 {
            let auth = signer.build_authorization(to, U256::from(40000u64), 1_700_000_000);
            assert!(seen.insert(auth.nonce), "nonce collision");
        }
    }

    #[test]
    fn validity_window_matches_configuration() {
        let signer = test_signer();
        let to = RECIPIENT.parse::<Address>().unwrap();
        let auth = signer.build_authorization(to, U256::from(1u64), 1_700_000_000);
        assert_eq!(auth.validAfter, U256::ZERO);
        assert_eq!(auth.validBefore - auth.validAfter, U256::from(1_700_000_300u64));
        assert_eq!(auth.from, signer.address());
    }

    #[test]
    fn authorize_produces_transportable_signature() {
        let signer = test_signer();
        let encoded = signer.authorize(RECIPIENT, "40000").unwrap();
        let raw = BASE64.decode(encoded).unwrap();
        assert_eq!(raw.len(), 65);
    }

    #[test]
    fn authorize_rejects_bad_inputs() {
        let signer = test_signer();
        assert!(matches!(
            signer.authorize("", "40000"),
            Err(SignerError::InvalidRecipient(_))
        ));
        assert!(matches!(
            signer.authorize("not-an-address", "40000"),
            Err(SignerError::InvalidRecipient(_))
        ));
        assert!(matches!(
            signer.authorize(RECIPIENT, "not-a-number"),
            Err(SignerError::InvalidAmount(_))
        ));
    }
}
