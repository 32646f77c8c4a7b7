//! Bearer token source for control-plane calls

use crate::error::Result;
use async_trait::async_trait;
use parking_lot::RwLock;

#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Current token, if any.
    fn token(&self) -> Option<String>;

    /// Obtain a fresh token after the server reported expiry.
    async fn refresh(&self) -> Result<Option<String>>;
}

/// Fixed token; `refresh` returns the same value
#[derive(Debug, Default)]
pub struct StaticToken {
    token: RwLock<Option<String>>,
}

impl StaticToken {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: RwLock::new(token),
        }
    }

    pub fn set(&self, token: Option<String>) {
        *self.token.write() = token;
    }
}

#[async_trait]
impl TokenProvider for StaticToken {
    fn token(&self) -> Option<String> {
        self.token.read().clone()
    }

    async fn refresh(&self) -> Result<Option<String>> {
        log::warn!("Access token expired, but only a static token is configured");
        Ok(self.token())
    }
}
