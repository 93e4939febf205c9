//! Convenience re-exports.

pub use crate::api::{
    Action, IdempotencyKey, ItemError, ItemOutcome, OperationRequest, OperationResult,
    QueryFilter, ResourceType, Scope,
};
pub use crate::auth::{AccessToken, AuthError};
pub use crate::batch::{BulkOptions, QueryOptions};
pub use crate::client::{AdsClient, ResourceClient};
pub use crate::config::{PpcConfig, Region};
pub use crate::error::{ErrorCategory, PpcError, Result};
