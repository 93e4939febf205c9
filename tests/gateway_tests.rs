mod common;

use std::sync::Arc;
use std::time::Duration;

use amazon_ppc::api::{Action, ApiCall, QueryFilter, ResourceType, Scope};
use amazon_ppc::auth::{AuthError, ClientCredentials, CredentialStore, LwaClient, Secret, TokenManager};
use amazon_ppc::config::{RateLimitSettings, Region};
use amazon_ppc::error::{ErrorCategory, PpcError};
use amazon_ppc::gateway::{partition_key, DispatchOptions, RequestGateway};
use amazon_ppc::util::retry::RetryPolicy;
use pretty_assertions::assert_eq;
use serde_json::json;
use tokio::time::Instant;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{campaign, token_response, PROFILE_ID, TOKEN_PATH};

const CLIENT_ID: &str = "amzn1.application-oa2-client.gateway";

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_backoff: Duration::from_millis(10),
        max_backoff: Duration::from_millis(50),
        multiplier: 2.0,
        max_elapsed: Duration::from_secs(5),
        jitter: 0.0,
    }
}

fn gateway_with(server: &MockServer, scope: Scope, limits: RateLimitSettings) -> RequestGateway {
    let credentials = Arc::new(CredentialStore::new(
        ClientCredentials {
            client_id: CLIENT_ID.to_string(),
            client_secret: Secret::new("secret"),
            redirect_uri: None,
        },
        Some(Secret::new("Atzr|refresh")),
    ));
    let lwa = LwaClient::new(reqwest::Client::new(), Region::NorthAmerica)
        .with_token_url(format!("{}{}", server.uri(), TOKEN_PATH))
        .with_retry_policy(fast_retry());
    let tokens = TokenManager::new(credentials, lwa);
    RequestGateway::new(reqwest::Client::new(), server.uri(), scope, tokens)
        .with_rate_limits(limits)
        .with_retry_policy(fast_retry())
}

fn gateway(server: &MockServer) -> RequestGateway {
    gateway_with(
        server,
        Scope::Profile(PROFILE_ID.to_string()),
        RateLimitSettings {
            capacity: 50,
            refill_per_second: 50.0,
        },
    )
}

async fn mount_token(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(token_response("Atza|token", 3600))
        .mount(server)
        .await;
}

fn create_call(key: Option<&str>) -> ApiCall {
    ApiCall::mutation(
        ResourceType::Campaign,
        Action::Create,
        &[campaign("spring")],
        key.map(str::to_string),
    )
    .unwrap()
}

fn multi_status_ok() -> ResponseTemplate {
    ResponseTemplate::new(207).set_body_json(json!({
        "success": [{ "index": 0, "campaign": { "campaignId": "c-1", "name": "spring" } }],
        "error": []
    }))
}

#[tokio::test]
async fn dispatch_attaches_auth_client_and_profile_headers() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    Mock::given(method("POST"))
        .and(path("/adsApi/v1/query/campaigns"))
        .and(header("Authorization", "Bearer Atza|token"))
        .and(header("Amazon-Advertising-API-ClientId", CLIENT_ID))
        .and(header("Amazon-Advertising-API-Scope", PROFILE_ID))
        .and(body_json(json!({
            "stateFilter": { "include": ["ENABLED"] },
            "maxResults": 10
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "campaigns": [{ "campaignId": "c-1" }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = gateway(&server);
    let call = ApiCall::query(
        ResourceType::Campaign,
        &QueryFilter::new().states(["ENABLED"]),
        Some(10),
        None,
    );
    let response = gateway.dispatch(&call, &DispatchOptions::default()).await.unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(response.body["campaigns"][0]["campaignId"], "c-1");
}

#[tokio::test]
async fn dsp_scope_uses_the_account_header() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    Mock::given(method("POST"))
        .and(path("/adsApi/v1/query/adGroups"))
        .and(header("Amazon-Ads-AccountId", "adv-42"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "adGroups": [] })))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = gateway_with(
        &server,
        Scope::DspAdvertiser("adv-42".to_string()),
        RateLimitSettings::default(),
    );
    let call = ApiCall::query(ResourceType::AdGroup, &QueryFilter::new(), None, None);
    gateway.dispatch(&call, &DispatchOptions::default()).await.unwrap();
}

#[tokio::test]
async fn unauthorized_answer_refreshes_once_and_resends() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(token_response("Atza|first", 3600))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(token_response("Atza|second", 3600))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/adsApi/v1/update/campaigns"))
        .and(header("Authorization", "Bearer Atza|first"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/adsApi/v1/update/campaigns"))
        .and(header("Authorization", "Bearer Atza|second"))
        .respond_with(multi_status_ok())
        .expect(1)
        .mount(&server)
        .await;

    let gateway = gateway(&server);
    let call = ApiCall::mutation(
        ResourceType::Campaign,
        Action::Update,
        &[json!({ "campaignId": "c-1", "name": "spring" })],
        None,
    )
    .unwrap();
    let response = gateway.dispatch(&call, &DispatchOptions::default()).await.unwrap();
    assert_eq!(response.status, 207);
}

#[tokio::test]
async fn repeated_unauthorized_becomes_access_denied() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(token_response("Atza|token", 3600))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/adsApi/v1/query/campaigns"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "code": "UNAUTHORIZED",
            "message": "Not authorized to access scope"
        })))
        .expect(2)
        .mount(&server)
        .await;

    let gateway = gateway(&server);
    let call = ApiCall::query(ResourceType::Campaign, &QueryFilter::new(), None, None);
    let err = gateway
        .dispatch(&call, &DispatchOptions::default())
        .await
        .unwrap_err();
    match err {
        PpcError::Auth(AuthError::AccessDenied(message)) => {
            assert!(message.contains("Not authorized"), "{message}");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn throttled_call_is_retried_and_bucket_adopts_provider_rate() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    Mock::given(method("POST"))
        .and(path("/adsApi/v1/query/campaigns"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("Retry-After", "0")
                .insert_header("x-amzn-RateLimit-Limit", "20"),
        )
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/adsApi/v1/query/campaigns"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "campaigns": [] })))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = gateway(&server);
    let call = ApiCall::query(ResourceType::Campaign, &QueryFilter::new(), None, None);
    gateway.dispatch(&call, &DispatchOptions::default()).await.unwrap();

    let scope = Scope::Profile(PROFILE_ID.to_string());
    let bucket = gateway
        .rate_limiter()
        .bucket(&partition_key(ResourceType::Campaign, &scope));
    assert_eq!(bucket.refill_rate(), 20.0);
}

#[tokio::test]
async fn server_errors_exhaust_into_transport_error() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    Mock::given(method("POST"))
        .and(path("/adsApi/v1/query/portfolios"))
        .respond_with(ResponseTemplate::new(503).insert_header("x-amzn-RequestId", "req-503"))
        .expect(3)
        .mount(&server)
        .await;

    let gateway = gateway(&server);
    let call = ApiCall::query(ResourceType::Portfolio, &QueryFilter::new(), None, None);
    let err = gateway
        .dispatch(&call, &DispatchOptions::default())
        .await
        .unwrap_err();
    match &err {
        PpcError::Transport {
            status, details, ..
        } => {
            assert_eq!(*status, Some(503));
            assert_eq!(
                details.as_ref().and_then(|d| d.request_id.as_deref()),
                Some("req-503")
            );
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(err.category(), ErrorCategory::Server);
}

#[tokio::test]
async fn client_errors_are_validation_and_not_retried() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    Mock::given(method("POST"))
        .and(path("/adsApi/v1/create/campaigns"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "code": "INVALID_ARGUMENT",
            "message": "budget must be positive"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = gateway(&server);
    let err = gateway
        .dispatch(&create_call(Some("run-1")), &DispatchOptions::default())
        .await
        .unwrap_err();
    match err {
        PpcError::Validation {
            resource,
            action,
            status,
            message,
            ..
        } => {
            assert_eq!(resource, Some(ResourceType::Campaign));
            assert_eq!(action, Some(Action::Create));
            assert_eq!(status, Some(400));
            assert_eq!(message, "budget must be positive");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn create_without_idempotency_key_is_not_replayed() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    Mock::given(method("POST"))
        .and(path("/adsApi/v1/create/campaigns"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = gateway(&server);
    let err = gateway
        .dispatch(&create_call(None), &DispatchOptions::default())
        .await
        .unwrap_err();
    match err {
        PpcError::UnsafeRetry {
            resource,
            action,
            cause,
        } => {
            assert_eq!(resource, ResourceType::Campaign);
            assert_eq!(action, Action::Create);
            assert!(matches!(*cause, PpcError::Transport { status: Some(500), .. }));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn create_with_idempotency_key_is_replayed_with_the_same_key() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    Mock::given(method("POST"))
        .and(path("/adsApi/v1/create/campaigns"))
        .and(header("Idempotency-Key", "run-7"))
        .respond_with(ResponseTemplate::new(502))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/adsApi/v1/create/campaigns"))
        .and(header("Idempotency-Key", "run-7"))
        .respond_with(multi_status_ok())
        .expect(1)
        .mount(&server)
        .await;

    let gateway = gateway(&server);
    let response = gateway
        .dispatch(&create_call(Some("run-7")), &DispatchOptions::default())
        .await
        .unwrap();
    assert_eq!(response.body["success"][0]["campaign"]["campaignId"], "c-1");
}

#[tokio::test]
async fn exhausted_budget_with_zero_timeout_fails_without_sending() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    Mock::given(method("POST"))
        .and(path("/adsApi/v1/query/ads"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ads": [] })))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = gateway_with(
        &server,
        Scope::Profile(PROFILE_ID.to_string()),
        RateLimitSettings {
            capacity: 1,
            refill_per_second: 0.01,
        },
    );
    let call = ApiCall::query(ResourceType::Ad, &QueryFilter::new(), None, None);
    gateway.dispatch(&call, &DispatchOptions::default()).await.unwrap();

    let started = Instant::now();
    let err = gateway
        .dispatch(
            &call,
            &DispatchOptions {
                deadline: Some(Instant::now()),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, PpcError::RateLimitTimeout { .. }), "{err:?}");
    assert!(started.elapsed() < Duration::from_millis(100));
}

#[tokio::test]
async fn deadline_mid_call_aborts_and_refunds_the_permit() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    Mock::given(method("POST"))
        .and(path("/adsApi/v1/query/targets"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "targets": [] }))
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&server)
        .await;

    let gateway = gateway_with(
        &server,
        Scope::Profile(PROFILE_ID.to_string()),
        RateLimitSettings {
            capacity: 1,
            refill_per_second: 0.01,
        },
    );
    // Fetch the token first so the deadline only covers the resource call.
    gateway.tokens().ensure_valid_token().await.unwrap();

    let call = ApiCall::query(ResourceType::Target, &QueryFilter::new(), None, None);
    let err = gateway
        .dispatch(&call, &DispatchOptions::with_timeout(Duration::from_millis(50)))
        .await
        .unwrap_err();
    assert!(matches!(err, PpcError::Timeout(_)), "{err:?}");

    let scope = Scope::Profile(PROFILE_ID.to_string());
    let bucket = gateway
        .rate_limiter()
        .bucket(&partition_key(ResourceType::Target, &scope));
    assert!(bucket.available() >= 1.0);
}
