//! Credential generation for new stores
//!
//! Credentials are generated once, when a create request is accepted, and
//! persisted with the store record. Retried provisioning attempts reuse them
//! so that an already-deployed release and the setup job agree on passwords.

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Default length of generated passwords
pub const PASSWORD_LENGTH: usize = 24;

/// Default administrator login
pub const DEFAULT_ADMIN_USER: &str = "admin";

/// Character sets for secret generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SecretCharset {
    /// a-zA-Z0-9
    #[default]
    Alphanumeric,
    /// a-zA-Z0-9-_
    UrlSafe,
}

impl SecretCharset {
    pub const fn chars(&self) -> &'static [u8] {
        match self {
            Self::Alphanumeric => b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789",
            Self::UrlSafe => b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_",
        }
    }
}

/// Generate a random secret of `length` characters from `charset`
pub fn generate_secret(length: usize, charset: SecretCharset) -> String {
    let chars = charset.chars();
    let mut rng = rand::rng();
    (0..length)
        .map(|_| chars[rng.random_range(0..chars.len())] as char)
        .collect()
}

/// Credentials handed to the release and the setup job
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreCredentials {
    pub admin_user: String,
    pub admin_password: String,
    pub admin_email: String,
    pub db_password: String,
}

impl StoreCredentials {
    /// Generate a fresh set of credentials
    pub fn generate(admin_email: &str) -> Self {
        Self::generate_for(DEFAULT_ADMIN_USER, admin_email)
    }

    /// Generate a fresh set of credentials for a specific admin login
    pub fn generate_for(admin_user: &str, admin_email: &str) -> Self {
        Self {
            admin_user: admin_user.to_string(),
            admin_password: generate_secret(PASSWORD_LENGTH, SecretCharset::UrlSafe),
            admin_email: admin_email.to_string(),
            db_password: generate_secret(PASSWORD_LENGTH, SecretCharset::Alphanumeric),
        }
    }
}

// Passwords never end up in logs
impl std::fmt::Debug for StoreCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreCredentials")
            .field("admin_user", &self.admin_user)
            .field("admin_password", &"<redacted>")
            .field("admin_email", &self.admin_email)
            .field("db_password", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_secret_length_and_charset() {
        let secret = generate_secret(32, SecretCharset::Alphanumeric);
        assert_eq!(secret.len(), 32);
        assert!(secret.chars().all(|c| c.is_ascii_alphanumeric()));

        let urlsafe = generate_secret(64, SecretCharset::UrlSafe);
        assert!(urlsafe.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_generated_credentials_differ() {
        let a = StoreCredentials::generate("admin@example.com");
        let b = StoreCredentials::generate("admin@example.com");
        assert_eq!(a.admin_user, DEFAULT_ADMIN_USER);
        assert_eq!(a.admin_password.len(), PASSWORD_LENGTH);
        assert_ne!(a.admin_password, b.admin_password);
        assert_ne!(a.db_password, b.db_password);
    }

    #[test]
    fn test_debug_redacts_passwords() {
        let creds = StoreCredentials::generate("admin@example.com");
        let debug = format!("{:?}", creds);
        assert!(!debug.contains(&creds.admin_password));
        assert!(!debug.contains(&creds.db_password));
        assert!(debug.contains("admin@example.com"));
    }
}
