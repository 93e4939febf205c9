#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Mutex;

use amazon_ppc::auth::{AuthError, Secret, Token, TokenStore};
use chrono::{DateTime, Utc};

#[derive(Default)]
pub struct InMemoryTokenStore {
    tokens: Mutex<HashMap<String, Token>>,
}

impl InMemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, client_id: &str, token: Token) {
        self.tokens
            .lock()
            .expect("store lock poisoned")
            .insert(client_id.to_string(), token);
    }

    pub fn get(&self, client_id: &str) -> Option<Token> {
        self.tokens
            .lock()
            .expect("store lock poisoned")
            .get(client_id)
            .cloned()
    }
}

impl TokenStore for InMemoryTokenStore {
    fn load(&self, client_id: &str) -> Result<Option<Token>, AuthError> {
        Ok(self.get(client_id))
    }

    fn save(&self, client_id: &str, token: &Token) -> Result<(), AuthError> {
        self.tokens
            .lock()
            .expect("store lock poisoned")
            .insert(client_id.to_string(), token.clone());
        Ok(())
    }

    fn clear(&self, client_id: &str) -> Result<(), AuthError> {
        self.tokens
            .lock()
            .expect("store lock poisoned")
            .remove(client_id);
        Ok(())
    }
}

pub fn token(access_token: &str, refresh_token: &str, expires_at: DateTime<Utc>) -> Token {
    Token {
        access_token: Secret::new(access_token),
        refresh_token: Some(Secret::new(refresh_token)),
        token_type: Some("bearer".to_string()),
        expires_at: Some(expires_at),
        last_refresh: Some(Utc::now()),
    }
}
