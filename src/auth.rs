use std::collections::HashMap;
use std::fmt;

use url::Url;

use crate::config::AuthConfig;

/// An opaque API credential.
///
/// Wraps the raw secret so it never leaks through `Debug` output or log
/// formatting; callers reach the raw value only via [`Token::as_str`].
#[derive(Clone, PartialEq, Eq)]
pub struct Token(String);

impl Token {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Token {
    fn from(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

impl From<String> for Token {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Token(***)")
    }
}

/// Read-only access to stored credentials.
///
/// Feed readers resolve credentials through this trait while fetches run in
/// parallel, so implementations must be safe for concurrent reads. Bearer
/// tokens are keyed by service name ("GitHub", "GitLab"); basic-auth
/// passwords are keyed by the user component embedded in the feed URL.
pub trait SecretStore: Send + Sync {
    /// Password for the user embedded in `url`, if one is stored.
    fn password_for(&self, url: &str) -> Option<String>;

    /// Bearer token stored for a service.
    fn token_for(&self, service: &str) -> Option<Token>;
}

/// In-memory secret store fed from the config file and the environment.
///
/// Environment variables win over config values so tokens can stay out of
/// files that get committed:
/// - `BUILDWATCH_GITHUB_TOKEN`, `BUILDWATCH_GITLAB_TOKEN`
/// - `BUILDWATCH_PASSWORD_<USER>` for CCTray basic auth
#[derive(Default)]
pub struct MemorySecretStore {
    tokens: HashMap<String, Token>,
    passwords: HashMap<String, String>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(auth: &AuthConfig) -> Self {
        let mut store = Self::new();

        if let Some(token) = &auth.github_token {
            store.set_token("GitHub", Token::from(token.as_str()));
        }
        if let Some(token) = &auth.gitlab_token {
            store.set_token("GitLab", Token::from(token.as_str()));
        }
        for (user, password) in &auth.passwords {
            store.set_password(user, password);
        }

        if let Ok(token) = std::env::var("BUILDWATCH_GITHUB_TOKEN") {
            store.set_token("GitHub", Token::from(token));
        }
        if let Ok(token) = std::env::var("BUILDWATCH_GITLAB_TOKEN") {
            store.set_token("GitLab", Token::from(token));
        }
        for (key, value) in std::env::vars() {
            if let Some(user) = key.strip_prefix("BUILDWATCH_PASSWORD_") {
                store.set_password(&user.to_lowercase(), &value);
            }
        }

        store
    }

    pub fn set_token(&mut self, service: &str, token: Token) {
        self.tokens.insert(service.to_string(), token);
    }

    pub fn set_password(&mut self, user: &str, password: &str) {
        self.passwords.insert(user.to_string(), password.to_string());
    }
}

impl SecretStore for MemorySecretStore {
    fn password_for(&self, url: &str) -> Option<String> {
        let parsed = Url::parse(url).ok()?;
        let user = parsed.username();
        if user.is_empty() {
            return None;
        }
        self.passwords.get(user).cloned()
    }

    fn token_for(&self, service: &str) -> Option<Token> {
        self.tokens.get(service).cloned()
    }
}
