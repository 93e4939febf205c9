//! Operation results and multi-status response parsing.

use std::ops::Range;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::resource::{Action, ResourceType};
use crate::error::{ErrorCategory, PpcError};

/// Error code given to items a multi-status response did not mention.
pub const MISSING_STATUS_CODE: &str = "MISSING_STATUS";

/// Per-item error reported inside a successful call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemError {
    /// Position in the caller's original item sequence.
    pub index: usize,
    pub code: String,
    pub message: String,
}

/// Outcome of one logical item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum ItemOutcome {
    Success(Value),
    Failed(ItemError),
    /// The sub-batch carrying this item never completed.
    NotCompleted,
}

impl ItemOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::Success(value) => Some(value),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&ItemError> {
        match self {
            Self::Failed(err) => Some(err),
            _ => None,
        }
    }
}

/// A sub-batch that produced no per-item outcomes.
#[derive(Debug, Clone, PartialEq)]
pub struct IncompleteBatch {
    pub batch: usize,
    /// Item positions covered by the sub-batch.
    pub range: Range<usize>,
    pub category: ErrorCategory,
    pub reason: String,
}

/// Unified result of a logical operation.
///
/// For bulk mutations `items` has exactly one entry per input item, in input
/// order.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationResult {
    pub resource: ResourceType,
    pub action: Action,
    pub items: Vec<ItemOutcome>,
    pub incomplete: Vec<IncompleteBatch>,
}

impl OperationResult {
    pub fn new(resource: ResourceType, action: Action) -> Self {
        Self {
            resource,
            action,
            items: Vec::new(),
            incomplete: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Every sub-batch finished (items may still have failed individually).
    pub fn is_complete(&self) -> bool {
        self.incomplete.is_empty()
    }

    /// Some items failed while their calls succeeded.
    pub fn has_partial_failure(&self) -> bool {
        self.items.iter().any(|item| matches!(item, ItemOutcome::Failed(_)))
    }

    pub fn successes(&self) -> impl Iterator<Item = &Value> {
        self.items.iter().filter_map(ItemOutcome::value)
    }

    pub fn failures(&self) -> impl Iterator<Item = &ItemError> {
        self.items.iter().filter_map(ItemOutcome::error)
    }

    pub fn success_count(&self) -> usize {
        self.successes().count()
    }
}

#[derive(Debug, Deserialize)]
struct MultiStatusBody {
    #[serde(default)]
    success: Vec<Value>,
    #[serde(default)]
    error: Vec<ErrorEntry>,
}

#[derive(Debug, Deserialize)]
struct ErrorEntry {
    index: usize,
    #[serde(default)]
    errors: Vec<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Parse a multi-status mutation body into `count` ordered outcomes.
///
/// Indices in the body are relative to the call; `offset` shifts them to the
/// caller's original sequence. Items missing from the body are reported as
/// failed with [`MISSING_STATUS_CODE`].
pub fn parse_multi_status(
    resource: ResourceType,
    body: &Value,
    count: usize,
    offset: usize,
) -> Result<Vec<ItemOutcome>, PpcError> {
    let payload = body
        .get(resource.collection())
        .filter(|nested| nested.is_object())
        .unwrap_or(body);
    let parsed: MultiStatusBody = serde_json::from_value(payload.clone())?;

    let mut slots: Vec<Option<ItemOutcome>> = vec![None; count];

    for entry in parsed.success {
        let index = entry
            .get("index")
            .and_then(Value::as_u64)
            .ok_or_else(|| PpcError::InvalidResponse("success entry without index".to_string()))?
            as usize;
        let slot = slot_at(&mut slots, index)?;
        let value = entry
            .get(resource.singular_key())
            .cloned()
            .unwrap_or_else(|| strip_index(entry));
        *slot = Some(ItemOutcome::Success(value));
    }

    for entry in parsed.error {
        let slot = slot_at(&mut slots, entry.index)?;
        let first = entry.errors.into_iter().next();
        let (code, message) = match first {
            Some(detail) => (
                detail.code.unwrap_or_else(|| "UNKNOWN".to_string()),
                detail.message.unwrap_or_default(),
            ),
            None => ("UNKNOWN".to_string(), String::new()),
        };
        *slot = Some(ItemOutcome::Failed(ItemError {
            index: entry.index + offset,
            code,
            message,
        }));
    }

    Ok(slots
        .into_iter()
        .enumerate()
        .map(|(index, slot)| {
            slot.unwrap_or_else(|| {
                tracing::warn!(resource = %resource, index = index + offset, "Item missing from multi-status response");
                ItemOutcome::Failed(ItemError {
                    index: index + offset,
                    code: MISSING_STATUS_CODE.to_string(),
                    message: "no status returned for item".to_string(),
                })
            })
        })
        .collect())
}

/// One page of query results plus the continuation token, if any.
pub fn parse_query_page(
    resource: ResourceType,
    body: &Value,
) -> Result<(Vec<Value>, Option<String>), PpcError> {
    let items = match body.get(resource.collection()) {
        Some(Value::Array(items)) => items.clone(),
        Some(Value::Null) | None => Vec::new(),
        Some(_) => {
            return Err(PpcError::InvalidResponse(format!(
                "{} in query response is not an array",
                resource.collection()
            )))
        }
    };
    let next_token = body
        .get("nextToken")
        .and_then(Value::as_str)
        .filter(|token| !token.is_empty())
        .map(str::to_string);
    Ok((items, next_token))
}

fn slot_at(slots: &mut [Option<ItemOutcome>], index: usize) -> Result<&mut Option<ItemOutcome>, PpcError> {
    let len = slots.len();
    slots.get_mut(index).ok_or_else(|| {
        PpcError::InvalidResponse(format!("multi-status index {index} out of range for {len} items"))
    })
}

fn strip_index(entry: Value) -> Value {
    match entry {
        Value::Object(mut map) => {
            map.remove("index");
            Value::Object(map)
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn multi_status_orders_outcomes_by_index() {
        let body = json!({
            "success": [
                {"index": 2, "campaign": {"campaignId": "c2"}},
                {"index": 0, "campaign": {"campaignId": "c0"}}
            ],
            "error": [
                {"index": 1, "errors": [{"code": "INVALID_ARGUMENT", "message": "bad budget"}]}
            ]
        });
        let outcomes = parse_multi_status(ResourceType::Campaign, &body, 3, 100).unwrap();
        assert_eq!(
            outcomes,
            vec![
                ItemOutcome::Success(json!({"campaignId": "c0"})),
                ItemOutcome::Failed(ItemError {
                    index: 101,
                    code: "INVALID_ARGUMENT".to_string(),
                    message: "bad budget".to_string(),
                }),
                ItemOutcome::Success(json!({"campaignId": "c2"})),
            ]
        );
    }

    #[test]
    fn multi_status_accepts_body_nested_under_collection() {
        let body = json!({"adGroups": {"success": [{"index": 0, "adGroupId": "g1"}]}});
        let outcomes = parse_multi_status(ResourceType::AdGroup, &body, 1, 0).unwrap();
        assert_eq!(outcomes, vec![ItemOutcome::Success(json!({"adGroupId": "g1"}))]);
    }

    #[test]
    fn missing_items_are_reported_as_failed() {
        let body = json!({"success": [{"index": 0, "ad": {}}]});
        let outcomes = parse_multi_status(ResourceType::Ad, &body, 2, 0).unwrap();
        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[1].error().unwrap().code, MISSING_STATUS_CODE);
    }

    #[test]
    fn out_of_range_index_is_invalid_response() {
        let body = json!({"success": [{"index": 5}]});
        let err = parse_multi_status(ResourceType::Ad, &body, 2, 0).unwrap_err();
        assert!(matches!(err, PpcError::InvalidResponse(_)));
    }

    #[test]
    fn query_page_reads_items_and_token() {
        let body = json!({"targets": [{"targetId": "t1"}], "nextToken": "n1"});
        let (items, token) = parse_query_page(ResourceType::Target, &body).unwrap();
        assert_eq!(items, vec![json!({"targetId": "t1"})]);
        assert_eq!(token.as_deref(), Some("n1"));

        let (items, token) = parse_query_page(ResourceType::Target, &json!({"nextToken": ""})).unwrap();
        assert!(items.is_empty());
        assert!(token.is_none());
    }

    #[test]
    fn result_summaries_count_outcomes() {
        let mut result = OperationResult::new(ResourceType::Campaign, Action::Update);
        result.items = vec![
            ItemOutcome::Success(json!({})),
            ItemOutcome::Failed(ItemError {
                index: 1,
                code: "X".to_string(),
                message: String::new(),
            }),
        ];
        assert_eq!(result.success_count(), 1);
        assert_eq!(result.failures().count(), 1);
        assert!(result.has_partial_failure());
        assert!(result.is_complete());
    }
}
