//! SCRAM-SHA-256 client (RFC 5802, RFC 7677) without channel binding.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::{Digest, Sha256};
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// GS2 header `n,,` base64-encoded, as echoed in the client-final message.
const CHANNEL_BINDING: &str = "c=biws";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScramError {
    #[error("server message is not valid UTF-8")]
    InvalidServerMessage,
    #[error("server message lacks the {0} attribute")]
    MissingAttribute(char),
    #[error("invalid {0} in server message")]
    InvalidAttribute(&'static str),
    #[error("server nonce does not extend the client nonce")]
    NonceMismatch,
    #[error("server signature verification failed")]
    SignatureMismatch,
    #[error("server reported: {0}")]
    ServerError(String),
    #[error("SCRAM exchange is not in the expected state")]
    InvalidState,
}

enum State {
    Initial,
    AwaitingFinal {
        salted_password: [u8; 32],
        auth_message: String,
    },
    Done,
}

pub struct ScramClient {
    client_first_bare: String,
    client_nonce: String,
    password: String,
    state: State,
}

impl ScramClient {
    pub fn new(username: &str, password: &str) -> Self {
        let nonce_bytes: [u8; 18] = rand::thread_rng().gen();
        Self::with_nonce(username, password, &BASE64.encode(nonce_bytes))
    }

    /// Fixed-nonce constructor for reproducible exchanges.
    pub fn with_nonce(username: &str, password: &str, nonce: &str) -> Self {
        Self {
            client_first_bare: format!("n={},r={}", escape_username(username), nonce),
            client_nonce: nonce.to_string(),
            password: password.to_string(),
            state: State::Initial,
        }
    }

    /// `n,,n=<user>,r=<client-nonce>`
    pub fn client_first_message(&self) -> Vec<u8> {
        format!("n,,{}", self.client_first_bare).into_bytes()
    }

    /// Consume `r=..,s=..,i=..` and produce the client-final message with proof.
    pub fn process_server_first(&mut self, server_msg: &[u8]) -> Result<Vec<u8>, ScramError> {
        if !matches!(self.state, State::Initial) {
            return Err(ScramError::InvalidState);
        }
        let server_first =
            std::str::from_utf8(server_msg).map_err(|_| ScramError::InvalidServerMessage)?;

        let nonce = attribute(server_first, 'r')?;
        let salt = BASE64
            .decode(attribute(server_first, 's')?)
            .map_err(|_| ScramError::InvalidAttribute("salt"))?;
        let iterations = attribute(server_first, 'i')?
            .parse::<u32>()
            .ok()
            .filter(|&i| i > 0)
            .ok_or(ScramError::InvalidAttribute("iteration count"))?;

        if !nonce.starts_with(&self.client_nonce) || nonce.len() == self.client_nonce.len() {
            return Err(ScramError::NonceMismatch);
        }

        let salted_password = hi(self.password.as_bytes(), &salt, iterations)?;
        let client_key = hmac_sha256(&salted_password, b"Client Key")?;
        let stored_key: [u8; 32] = Sha256::digest(client_key).into();

        let without_proof = format!("{},r={}", CHANNEL_BINDING, nonce);
        let auth_message = format!(
            "{},{},{}",
            self.client_first_bare, server_first, without_proof
        );

        let client_signature = hmac_sha256(&stored_key, auth_message.as_bytes())?;
        let mut proof = client_key;
        for (p, s) in proof.iter_mut().zip(client_signature.iter()) {
            *p ^= s;
        }

        self.state = State::AwaitingFinal {
            salted_password,
            auth_message,
        };
        Ok(format!("{},p={}", without_proof, BASE64.encode(proof)).into_bytes())
    }

    /// Check the `v=<signature>` the server sends last.
    pub fn verify_server_final(&mut self, server_msg: &[u8]) -> Result<(), ScramError> {
        let State::AwaitingFinal {
            salted_password,
            auth_message,
        } = &self.state
        else {
            return Err(ScramError::InvalidState);
        };
        let server_final =
            std::str::from_utf8(server_msg).map_err(|_| ScramError::InvalidServerMessage)?;

        if let Ok(reason) = attribute(server_final, 'e') {
            return Err(ScramError::ServerError(reason.to_string()));
        }
        let signature = BASE64
            .decode(attribute(server_final, 'v')?)
            .map_err(|_| ScramError::InvalidAttribute("server signature"))?;

        let server_key = hmac_sha256(salted_password, b"Server Key")?;
        let expected = hmac_sha256(&server_key, auth_message.as_bytes())?;
        if signature != expected {
            return Err(ScramError::SignatureMismatch);
        }
        self.state = State::Done;
        Ok(())
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Value of the `<name>=` attribute in a comma-separated SCRAM message.
fn attribute(msg: &str, name: char) -> Result<&str, ScramError> {
    msg.split(',')
        .find_map(|part| {
            let mut chars = part.chars();
            (chars.next() == Some(name) && chars.next() == Some('=')).then(|| &part[2..])
        })
        .ok_or(ScramError::MissingAttribute(name))
}

/// `=` and `,` are reserved in the username field.
fn escape_username(name: &str) -> String {
    name.replace('=', "=3D").replace(',', "=2C")
}

/// Hi(): PBKDF2 with HMAC-SHA-256.
fn hi(password: &[u8], salt: &[u8], iterations: u32) -> Result<[u8; 32], ScramError> {
    let mut output = [0u8; 32];
    pbkdf2::pbkdf2::<HmacSha256>(password, salt, iterations, &mut output)
        .map_err(|_| ScramError::InvalidAttribute("iteration count"))?;
    Ok(output)
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<[u8; 32], ScramError> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| ScramError::InvalidState)?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().into())
}
