//! Resource model shared by the gateway, the batch reconciler and callers.

pub mod request;
pub mod resource;
pub mod result;
pub mod scope;

pub use request::{ApiCall, IdempotencyKey, OperationRequest, Payload, QueryFilter};
pub use resource::{endpoint_path, Action, ResourceType};
pub use result::{IncompleteBatch, ItemError, ItemOutcome, OperationResult};
pub use scope::Scope;
