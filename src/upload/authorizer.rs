//! Credential selection and the `Authorization` header.
//!
//! Exactly one credential mode is applied per request. Basic auth wins when a
//! username or password is configured, even if a token is also present.

use crate::config::Configuration;
use crate::credentials::{token_from_pull_secret_file, validate_token};
use crate::error::UploadError;
use base64::Engine;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use std::fmt;
use std::io::ErrorKind;

#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    Basic { username: String, password: String },
    /// Raw token as configured; validated when applied
    Bearer(String),
    None,
}

impl Credentials {
    /// Pick the credential mode from a configuration snapshot.
    ///
    /// An empty inline token falls back to the mounted pull secret. A missing
    /// pull secret file means no credentials; a malformed one is an error.
    pub fn from_config(config: &Configuration) -> Result<Self, UploadError> {
        if !config.username.is_empty() || !config.password.is_empty() {
            return Ok(Credentials::Basic {
                username: config.username.clone(),
                password: config.password.clone(),
            });
        }
        if !config.token.is_empty() {
            return Ok(Credentials::Bearer(config.token.clone()));
        }
        if let Some(path) = &config.pull_secret_path {
            return match token_from_pull_secret_file(path) {
                Ok(token) => Ok(Credentials::Bearer(token)),
                Err(UploadError::Io(e)) if e.kind() == ErrorKind::NotFound => Ok(Credentials::None),
                Err(e) => Err(e),
            };
        }
        Ok(Credentials::None)
    }

    /// Set the `Authorization` header. Headers are left untouched on error.
    pub fn authorize(&self, headers: &mut HeaderMap) -> Result<(), UploadError> {
        let value = match self {
            Credentials::Basic { username, password } => {
                let encoded = base64::engine::general_purpose::STANDARD
                    .encode(format!("{}:{}", username, password));
                header_value(format!("Basic {}", encoded))?
            }
            Credentials::Bearer(raw) => {
                let token = validate_token(raw)?;
                header_value(format!("Bearer {}", token))?
            }
            Credentials::None => return Ok(()),
        };
        headers.insert(AUTHORIZATION, value);
        Ok(())
    }
}

fn header_value(value: String) -> Result<HeaderValue, UploadError> {
    let mut value = HeaderValue::from_str(&value).map_err(|_| {
        UploadError::InvalidCredential("credential contains characters not allowed in a header".to_string())
    })?;
    value.set_sensitive(true);
    Ok(value)
}

// never print secrets
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .finish_non_exhaustive(),
            Credentials::Bearer(_) => f.write_str("Bearer(..)"),
            Credentials::None => f.write_str("None"),
        }
    }
}
