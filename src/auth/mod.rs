//! OAuth credentials, token persistence and the access-token lifecycle.

pub mod credential;
pub mod error;
pub mod manager;
pub mod oauth;
pub mod store;
pub mod token;

pub use credential::{ClientCredentials, CredentialStore, TokenGrant};
pub use error::AuthError;
pub use manager::TokenManager;
pub use oauth::{LwaClient, CAMPAIGN_MANAGEMENT_SCOPE};
pub use store::{FileTokenStore, TokenStore, TokenStoreConfig};
pub use token::{AccessToken, Secret, Token};
