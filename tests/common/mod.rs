//! Shared test helpers: configs pointed at a mock server and multi-status responders.

#![allow(dead_code)]

use amazon_ppc::api::{ResourceType, Scope};
use amazon_ppc::config::{PpcConfig, RateLimitSettings, RetrySettings};
use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

pub const TOKEN_PATH: &str = "/auth/o2/token";
pub const PROFILE_ID: &str = "1234567890";

/// Config whose API and token endpoints point at `server`, with fast retries.
pub fn config_for(server: &MockServer) -> PpcConfig {
    let mut config = PpcConfig::new(
        "amzn1.application-oa2-client.test",
        "client-secret",
        "Atzr|refresh-token",
        Scope::Profile(PROFILE_ID.to_string()),
    );
    config.endpoints.api_base_url = Some(server.uri());
    config.endpoints.token_url = Some(format!("{}{}", server.uri(), TOKEN_PATH));
    config.tuning.retry = RetrySettings {
        max_attempts: 3,
        initial_backoff_ms: 10,
        max_backoff_ms: 50,
        multiplier: 2.0,
        max_elapsed_ms: 5_000,
        jitter: 0.0,
    };
    config.tuning.rate_limit = RateLimitSettings {
        capacity: 100,
        refill_per_second: 100.0,
    };
    config
}

/// Mount a token endpoint answering with `access_token`.
pub async fn mount_token(server: &MockServer, access_token: &str, expires_in: i64) {
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(token_response(access_token, expires_in))
        .mount(server)
        .await;
}

pub fn token_response(access_token: &str, expires_in: i64) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "access_token": access_token,
        "refresh_token": "Atzr|refresh-token",
        "token_type": "bearer",
        "expires_in": expires_in
    }))
}

pub fn campaign(name: &str) -> Value {
    json!({ "name": name, "state": "ENABLED", "budget": { "budget": 10.0 } })
}

pub fn campaigns(count: usize) -> Vec<Value> {
    (0..count).map(|i| campaign(&format!("campaign-{i}"))).collect()
}

/// Answers a mutation with 207, echoing each item back as a success with an
/// id assigned. Items whose `name` starts with `bad` are rejected instead.
pub struct MultiStatusEcho {
    pub resource: ResourceType,
}

impl MultiStatusEcho {
    pub fn new(resource: ResourceType) -> Self {
        Self { resource }
    }
}

impl Respond for MultiStatusEcho {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: Value = match serde_json::from_slice(&request.body) {
            Ok(body) => body,
            Err(_) => return ResponseTemplate::new(400),
        };
        let id_field = self.resource.id_field();
        let items = body
            .get(self.resource.collection())
            .or_else(|| body.get(self.resource.id_list_field()))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut success = Vec::new();
        let mut error = Vec::new();
        for (index, item) in items.into_iter().enumerate() {
            let rejected = item
                .get("name")
                .and_then(Value::as_str)
                .is_some_and(|name| name.starts_with("bad"));
            if rejected {
                error.push(json!({
                    "index": index,
                    "errors": [{ "code": "INVALID_ARGUMENT", "message": "name rejected" }]
                }));
                continue;
            }
            let entity = match item {
                Value::Object(mut map) => {
                    map.entry(id_field.to_string())
                        .or_insert_with(|| Value::String(format!("id-{index}")));
                    Value::Object(map)
                }
                id => json!({ id_field: id }),
            };
            success.push(json!({ "index": index, self.resource.singular_key(): entity }));
        }
        ResponseTemplate::new(207).set_body_json(json!({ "success": success, "error": error }))
    }
}

/// Number of items carried by a mutation request.
pub fn item_count(request: &Request, resource: ResourceType) -> usize {
    serde_json::from_slice::<Value>(&request.body)
        .ok()
        .and_then(|body| {
            body.get(resource.collection())
                .or_else(|| body.get(resource.id_list_field()))
                .and_then(Value::as_array)
                .map(Vec::len)
        })
        .unwrap_or(0)
}
