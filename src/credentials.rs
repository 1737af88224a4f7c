use std::fmt;
use std::fs;
use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::Utc;
use ed25519_dalek::pkcs8::{ALGORITHM_OID, DecodePrivateKey, PrivateKeyInfo};
use ed25519_dalek::{Signer, SigningKey, VerifyingKey};

use crate::error::FixError;
use crate::message::{format_utc_timestamp, message_types, FIELD_SEPARATOR};

const PRIVATE_KEY_TAG: &str = "PRIVATE KEY";

/// Logon is always the first message of a freshly reset session
const LOGON_SEQ_NUM: &str = "1";

/// Ed25519 key used to sign logon requests.
///
/// Loaded once and never mutated; the key material is zeroed on drop.
pub struct Credential {
    signing_key: SigningKey,
}

impl Credential {
    /// Load a PEM-encoded PKCS#8 private key from disk
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, FixError> {
        let data = fs::read(path)?;
        Self::from_pem(&data)
    }

    /// Parse a PEM-encoded PKCS#8 private key
    pub fn from_pem(data: &[u8]) -> Result<Self, FixError> {
        let block = pem::parse(data).map_err(|e| FixError::InvalidKeyFormat(e.to_string()))?;
        if block.tag() != PRIVATE_KEY_TAG {
            return Err(FixError::InvalidKeyFormat(format!(
                "expected a {:?} block, found {:?}",
                PRIVATE_KEY_TAG,
                block.tag()
            )));
        }

        let info = PrivateKeyInfo::try_from(block.contents())
            .map_err(|e| FixError::InvalidKeyFormat(e.to_string()))?;
        if info.algorithm.oid != ALGORITHM_OID {
            return Err(FixError::UnsupportedKeyType(format!(
                "expected Ed25519 ({}), found {}",
                ALGORITHM_OID, info.algorithm.oid
            )));
        }

        let signing_key = SigningKey::from_pkcs8_der(block.contents())
            .map_err(|e| FixError::InvalidKeyFormat(e.to_string()))?;

        Ok(Self { signing_key })
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Sign the logon payload and return it base64 encoded.
    ///
    /// The payload is MsgType, SenderCompID, TargetCompID, MsgSeqNum and
    /// SendingTime joined by SOH. Ed25519 signatures are deterministic, so
    /// identical inputs always give the same output.
    pub fn sign_logon(&self, sender_comp_id: &str, target_comp_id: &str, sending_time: &str) -> String {
        let separator = char::from(FIELD_SEPARATOR).to_string();
        let payload = [
            message_types::LOGON,
            sender_comp_id,
            target_comp_id,
            LOGON_SEQ_NUM,
            sending_time,
        ]
        .join(&separator);

        let signature = self.signing_key.sign(payload.as_bytes());
        STANDARD.encode(signature.to_bytes())
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("verifying_key", &STANDARD.encode(self.verifying_key().to_bytes()))
            .finish()
    }
}

/// Current UTC time in `YYYYMMDD-HH:MM:SS.mmm`
pub fn sending_time_now() -> String {
    format_utc_timestamp(&Utc::now())
}
