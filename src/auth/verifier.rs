//! `TokenVerifier` trait and the reference HMAC implementation.

// Layer 1: Standard library imports
use std::time::Duration;

// Layer 2: Third-party crate imports
use async_trait::async_trait;
use base64::Engine;
use bytes::Bytes;
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;

// Layer 3: Internal module imports
use crate::auth::token::{RoomTokenClaims, SignedClaimsBody, StageTarget, TokenFailureReason};
use crate::util::ids::AccountId;

type HmacSha256 = Hmac<Sha256>;

/// Verifies an opaque room-token blob and yields the claims it carries.
///
/// "Pure function from bytes → result" per §6: implementations must be
/// stateless and deterministic given their key material. The core treats
/// the issuer as an external collaborator; this trait is the seam.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &[u8]) -> Result<RoomTokenClaims, TokenFailureReason>;
}

/// Reference verifier: `base64(json_claims) "." base64(hmac_sha256(json_claims))`.
///
/// Not meant to be the production issuer's actual format; it exists so the
/// crate is independently testable and so integrators have a worked
/// example of the `TokenVerifier` seam.
pub struct HmacTokenVerifier {
    key: Vec<u8>,
}

impl HmacTokenVerifier {
    pub fn new(key: impl Into<Vec<u8>>) -> Self {
        Self { key: key.into() }
    }

    /// Build a token for `claims`, signed with this verifier's key. Used by
    /// tests and by any bootstrap harness that wants a working issuer
    /// without standing up the real token service.
    #[allow(clippy::expect_used)]
    pub fn issue(&self, body: &SignedClaimsBody) -> Result<String, serde_json::Error> {
        let json = serde_json::to_vec(body)?;
        let json_b64 = base64::engine::general_purpose::STANDARD.encode(&json);
        // Hmac accepts a key of any length, so this never actually fails.
        let mut mac = HmacSha256::new_from_slice(&self.key).expect("HMAC accepts any key length");
        mac.update(json_b64.as_bytes());
        let sig = mac.finalize().into_bytes();
        let sig_b64 = base64::engine::general_purpose::STANDARD.encode(sig);
        Ok(format!("{json_b64}.{sig_b64}"))
    }

    /// Issue a token for `account_id` valid for `ttl`, without requiring a
    /// caller to build the crate-private claims wire-shape itself. The
    /// public surface a bootstrap binary (or a black-box test harness with
    /// no access to `auth::token::SignedClaimsBody`) actually has for
    /// standing up a working issuer.
    pub fn issue_token(
        &self,
        account_id: AccountId,
        stage_target: StageTarget,
        stage_type: impl Into<String>,
        user_info: Bytes,
        ttl: Duration,
    ) -> Result<String, serde_json::Error> {
        let now = Utc::now();
        let body = SignedClaimsBody {
            account_id: account_id.get(),
            stage_id: match stage_target {
                StageTarget::Existing(id) => Some(id),
                StageTarget::CreateNew => None,
            },
            stage_type: stage_type.into(),
            user_info: user_info.to_vec(),
            not_before: now - chrono::Duration::seconds(5),
            not_after: now + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::seconds(60)),
        };
        self.issue(&body)
    }
}

#[async_trait]
impl TokenVerifier for HmacTokenVerifier {
    async fn verify(&self, token: &[u8]) -> Result<RoomTokenClaims, TokenFailureReason> {
        let token_str = std::str::from_utf8(token).map_err(|_| TokenFailureReason::Malformed)?;
        let (json_b64, sig_b64) = token_str
            .split_once('.')
            .ok_or(TokenFailureReason::Malformed)?;

        let mut mac =
            HmacSha256::new_from_slice(&self.key).map_err(|_| TokenFailureReason::Signature)?;
        mac.update(json_b64.as_bytes());
        let expected_sig = mac.finalize().into_bytes();

        let given_sig = base64::engine::general_purpose::STANDARD
            .decode(sig_b64)
            .map_err(|_| TokenFailureReason::Malformed)?;
        if given_sig.as_slice() != expected_sig.as_slice() {
            return Err(TokenFailureReason::Signature);
        }

        let json = base64::engine::general_purpose::STANDARD
            .decode(json_b64)
            .map_err(|_| TokenFailureReason::Malformed)?;
        let body: SignedClaimsBody =
            serde_json::from_slice(&json).map_err(|_| TokenFailureReason::Malformed)?;

        let now = Utc::now();
        if now < body.not_before {
            return Err(TokenFailureReason::NotYetValid);
        }
        if now > body.not_after {
            return Err(TokenFailureReason::Expired);
        }

        Ok(RoomTokenClaims {
            account_id: AccountId::from_raw(body.account_id),
            stage_target: match body.stage_id {
                Some(id) => StageTarget::Existing(id),
                None => StageTarget::CreateNew,
            },
            stage_type: body.stage_type,
            user_info: body.user_info.into(),
            expires_at: body.not_after,
        })
    }
}
