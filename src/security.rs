use subtle::ConstantTimeEq;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("trigger secret is not configured on the server")]
    SecretNotConfigured,
    #[error("missing bearer credential")]
    MissingCredential,
    #[error("invalid bearer credential")]
    InvalidCredential,
}

/// Constant-time string comparison to prevent timing attacks
pub fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// Check an `Authorization: Bearer <secret>` header value against the
/// configured trigger secret.
pub fn authorize_bearer(header: Option<&str>, secret: Option<&str>) -> Result<(), AuthError> {
    let secret = secret.ok_or(AuthError::SecretNotConfigured)?;
    let header = header.ok_or(AuthError::MissingCredential)?;

    let (scheme, token) = header
        .trim()
        .split_once(' ')
        .ok_or(AuthError::MissingCredential)?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AuthError::MissingCredential);
    }

    if constant_time_compare(token.trim(), secret) {
        Ok(())
    } else {
        Err(AuthError::InvalidCredential)
    }
}
