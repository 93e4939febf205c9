//! Request payloads: logical operations and the physical calls they expand into.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::resource::{Action, ResourceType};
use crate::error::PpcError;

/// Caller-supplied key that makes a create safe to resubmit.
///
/// Sub-batches derive their own key from it (`"{key}-{batch}"`) so each
/// physical call is replayed under a stable, distinct key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Generate a random key.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Key for the `index`-th sub-batch.
    pub fn for_batch(&self, index: usize) -> String {
        format!("{}-{index}", self.0)
    }
}

/// Filter criteria for a query; serialized as the query request body.
///
/// An empty filter matches everything in the client's scope.
///
/// # Example
/// ```
/// use amazon_ppc::api::{QueryFilter, ResourceType};
///
/// let filter = QueryFilter::new()
///     .ids(ResourceType::Campaign, ["111", "222"])
///     .states(["ENABLED"]);
/// assert!(!filter.is_empty());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryFilter(Map<String, Value>);

impl QueryFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an arbitrary filter field.
    pub fn with(mut self, field: impl Into<String>, value: Value) -> Self {
        self.0.insert(field.into(), value);
        self
    }

    /// Restrict to the given entity ids.
    pub fn ids<I, S>(self, resource: ResourceType, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let include: Vec<Value> = ids.into_iter().map(|id| Value::String(id.into())).collect();
        self.with(resource.id_filter_field(), serde_json::json!({ "include": include }))
    }

    /// Restrict to entities in one of the given states.
    pub fn states<I, S>(self, states: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let include: Vec<Value> = states.into_iter().map(|s| Value::String(s.into())).collect();
        self.with("stateFilter", serde_json::json!({ "include": include }))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
}

/// Body of a logical operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Ordered entities (or ids, for deletes) to mutate.
    Items(Vec<Value>),
    /// Query criteria.
    Filter(QueryFilter),
}

/// A logical operation as issued by a caller.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationRequest {
    pub resource: ResourceType,
    pub action: Action,
    pub payload: Payload,
    pub idempotency_key: Option<IdempotencyKey>,
}

impl OperationRequest {
    pub fn mutation(resource: ResourceType, action: Action, items: Vec<Value>) -> Self {
        Self {
            resource,
            action,
            payload: Payload::Items(items),
            idempotency_key: None,
        }
    }

    pub fn query(resource: ResourceType, filter: QueryFilter) -> Self {
        Self {
            resource,
            action: Action::Query,
            payload: Payload::Filter(filter),
            idempotency_key: None,
        }
    }

    pub fn with_idempotency_key(mut self, key: IdempotencyKey) -> Self {
        self.idempotency_key = Some(key);
        self
    }

    /// Check that the payload kind matches the action.
    pub fn validate(&self) -> Result<(), PpcError> {
        match (&self.payload, self.action) {
            (Payload::Filter(_), Action::Query) => Ok(()),
            (Payload::Items(_), action) if action.is_mutation() => Ok(()),
            (Payload::Filter(_), action) => Err(PpcError::InvalidArgument(format!(
                "{action} on {} requires items, got a query filter",
                self.resource
            ))),
            (Payload::Items(_), _) => Err(PpcError::InvalidArgument(format!(
                "query on {} requires a filter, got items",
                self.resource
            ))),
        }
    }
}

/// One physical HTTP call against a resource endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiCall {
    pub resource: ResourceType,
    pub action: Action,
    pub body: Value,
    /// Number of items carried, for correlating multi-status indices.
    pub item_count: usize,
    pub idempotency_key: Option<String>,
}

impl ApiCall {
    /// Build a mutation call carrying `items` in order.
    pub fn mutation(
        resource: ResourceType,
        action: Action,
        items: &[Value],
        idempotency_key: Option<String>,
    ) -> Result<Self, PpcError> {
        if !action.is_mutation() {
            return Err(PpcError::InvalidArgument(format!(
                "{action} is not a mutation"
            )));
        }
        let mut body = Map::new();
        if action == Action::Delete {
            let ids = items
                .iter()
                .enumerate()
                .map(|(index, item)| delete_id(resource, index, item))
                .collect::<Result<Vec<_>, _>>()?;
            body.insert(resource.id_list_field(), Value::Array(ids));
        } else {
            body.insert(resource.collection().to_string(), Value::Array(items.to_vec()));
        }
        Ok(Self {
            resource,
            action,
            body: Value::Object(body),
            item_count: items.len(),
            idempotency_key,
        })
    }

    /// Build one page of a query.
    pub fn query(
        resource: ResourceType,
        filter: &QueryFilter,
        max_results: Option<u32>,
        next_token: Option<&str>,
    ) -> Self {
        let mut body = filter.as_map().clone();
        if let Some(max) = max_results {
            body.insert("maxResults".to_string(), Value::from(max));
        }
        if let Some(token) = next_token {
            body.insert("nextToken".to_string(), Value::String(token.to_string()));
        }
        Self {
            resource,
            action: Action::Query,
            body: Value::Object(body),
            item_count: 0,
            idempotency_key: None,
        }
    }

    /// Whether a retry cannot duplicate side effects.
    pub fn is_replay_safe(&self) -> bool {
        self.action.is_idempotent() || self.idempotency_key.is_some()
    }
}

fn delete_id(resource: ResourceType, index: usize, item: &Value) -> Result<Value, PpcError> {
    let id = match item {
        Value::String(_) => Some(item.clone()),
        Value::Number(n) => Some(Value::String(n.to_string())),
        Value::Object(map) => map.get(resource.id_field()).map(|v| match v {
            Value::Number(n) => Value::String(n.to_string()),
            other => other.clone(),
        }),
        _ => None,
    };
    id.ok_or_else(|| PpcError::Validation {
        resource: Some(resource),
        action: Some(Action::Delete),
        status: None,
        message: format!("item has no {}", resource.id_field()),
        item_index: Some(index),
    })
}
