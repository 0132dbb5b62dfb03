//! The authenticated envelope around every frame.
//!
//! Frames are length-prefixed on the wire (the transport's codec handles
//! the prefix); the payload is a self-describing JSON envelope. When a
//! cluster secret is configured, the sender signs
//! `HMAC-SHA256(secret, canonical(message) || nonce)` and receivers reject
//! mismatches before any further processing. Unsigned frames are rejected
//! when a secret is configured; signed frames are accepted when none is
//! configured, so a cluster can be upgraded to authentication one node at
//! a time.

// Layer 1: Standard library imports
// (none)

// Layer 2: Third-party crate imports
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;
use uuid::Uuid;

// Layer 3: Internal module imports
use super::message::ClusterMessage;

type HmacSha256 = Hmac<Sha256>;

/// Current wire-protocol version; mismatches close the connection.
pub const PROTOCOL_VERSION: u16 = 1;

/// Wire-protocol errors.
#[derive(Debug, Error)]
pub enum ProtoError {
    /// The peer speaks a different protocol version.
    #[error("protocol version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: u16, actual: u16 },

    /// HMAC verification failed, or a required signature was missing.
    #[error("message authentication failed")]
    AuthenticationFailed,

    /// The frame could not be interpreted.
    #[error("invalid frame: {reason}")]
    InvalidFrame { reason: String },

    /// JSON encoding or decoding failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// One frame: version, nonce, optional signature, message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Protocol version of the sender.
    pub version: u16,

    /// Per-envelope nonce mixed into the signature input.
    pub nonce: String,

    /// Hex-encoded HMAC-SHA256, present when the sender has a secret.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<String>,

    /// The message itself.
    pub message: ClusterMessage,
}

impl Envelope {
    /// Wrap and (when a secret is given) sign a message.
    pub fn seal(message: ClusterMessage, secret: Option<&str>) -> Result<Self, ProtoError> {
        let nonce = Uuid::new_v4().simple().to_string();
        let auth = match secret {
            Some(secret) => Some(signature(secret, &message, &nonce)?),
            None => None,
        };
        Ok(Self {
            version: PROTOCOL_VERSION,
            nonce,
            auth,
            message,
        })
    }

    /// Check version and authentication against the local secret.
    pub fn verify(&self, secret: Option<&str>) -> Result<(), ProtoError> {
        if self.version != PROTOCOL_VERSION {
            return Err(ProtoError::VersionMismatch {
                expected: PROTOCOL_VERSION,
                actual: self.version,
            });
        }
        let Some(secret) = secret else {
            // No local secret: tolerate both signed and unsigned frames.
            return Ok(());
        };
        let Some(auth) = &self.auth else {
            return Err(ProtoError::AuthenticationFailed);
        };
        let tag = hex::decode(auth).map_err(|_| ProtoError::AuthenticationFailed)?;
        let mac = mac_for(secret, &self.message, &self.nonce)?;
        mac.verify_slice(&tag)
            .map_err(|_| ProtoError::AuthenticationFailed)
    }

    /// Serialize to the byte form that goes inside a frame.
    pub fn encode(&self) -> Result<Vec<u8>, ProtoError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse a frame payload.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtoError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Unwrap the message.
    pub fn into_message(self) -> ClusterMessage {
        self.message
    }
}

fn mac_for(
    secret: &str,
    message: &ClusterMessage,
    nonce: &str,
) -> Result<HmacSha256, ProtoError> {
    let canonical = serde_json::to_vec(message)?;
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| ProtoError::InvalidFrame {
            reason: "unusable secret".to_string(),
        })?;
    mac.update(&canonical);
    mac.update(nonce.as_bytes());
    Ok(mac)
}

fn signature(secret: &str, message: &ClusterMessage, nonce: &str) -> Result<String, ProtoError> {
    let mac = mac_for(secret, message, nonce)?;
    Ok(hex::encode(mac.finalize().into_bytes()))
}
