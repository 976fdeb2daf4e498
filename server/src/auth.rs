//! Credential and token lifecycle for administrator accounts.
//!
//! Accounts live in a static in-memory table seeded at startup. Passwords
//! are stored and compared in plaintext, which is a known weakness of this
//! design; nothing here persists across restarts. Each account holds at
//! most one valid token at a time and issuing a new one silently replaces
//! the previous.

use log::info;
use rand::Rng;
use std::time::{Duration, Instant};

/// Tokens are valid for one hour from issuance.
const TOKEN_TTL: Duration = Duration::from_secs(3600);

#[derive(Debug)]
struct Account {
    username: String,
    password: String,
    token: Option<String>,
    token_expiry: Option<Instant>,
}

/// In-memory account table with token issue/validate/revoke operations.
pub struct AuthService {
    accounts: Vec<Account>,
}

impl AuthService {
    pub fn new(credentials: &[(&str, &str)]) -> Self {
        let accounts = credentials
            .iter()
            .map(|(username, password)| Account {
                username: (*username).to_string(),
                password: (*password).to_string(),
                token: None,
                token_expiry: None,
            })
            .collect();
        Self { accounts }
    }

    /// Seeds the built-in test accounts.
    pub fn with_default_accounts() -> Self {
        let service = Self::new(&[("admin", "admin123"), ("admin2", "pass456")]);
        info!("Auth service initialized with {} accounts", service.accounts.len());
        service
    }

    /// Checks username and password against the table. On a match, mints a
    /// fresh token valid for one hour, replacing any previously issued one.
    /// Failed attempts leave the stored token untouched.
    pub fn authenticate(&mut self, username: &str, password: &str) -> Option<String> {
        self.authenticate_at(username, password, Instant::now())
    }

    pub fn authenticate_at(
        &mut self,
        username: &str,
        password: &str,
        now: Instant,
    ) -> Option<String> {
        let account = self
            .accounts
            .iter_mut()
            .find(|a| a.username == username && a.password == password)?;

        let token = mint_token();
        account.token = Some(token.clone());
        account.token_expiry = Some(now + TOKEN_TTL);
        Some(token)
    }

    /// True only if the stored token matches byte-for-byte and the current
    /// time is strictly before expiry. Mismatch and expiry look identical
    /// to the caller.
    pub fn validate(&self, username: &str, token: &str) -> bool {
        self.validate_at(username, token, Instant::now())
    }

    pub fn validate_at(&self, username: &str, token: &str, now: Instant) -> bool {
        self.accounts
            .iter()
            .find(|a| a.username == username)
            .map(|a| {
                a.token.as_deref() == Some(token)
                    && a.token_expiry.map(|expiry| now < expiry).unwrap_or(false)
            })
            .unwrap_or(false)
    }

    /// Clears the stored token and expiry so subsequent validation fails.
    pub fn revoke(&mut self, username: &str) {
        if let Some(account) = self.accounts.iter_mut().find(|a| a.username == username) {
            account.token = None;
            account.token_expiry = None;
        }
    }
}

/// 128 random bits, hex-encoded. Opaque to clients.
fn mint_token() -> String {
    let mut rng = rand::thread_rng();
    format!("TOKEN_{:016x}{:016x}", rng.gen::<u64>(), rng.gen::<u64>())
}
