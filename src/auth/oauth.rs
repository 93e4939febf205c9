//! Login with Amazon (LWA) OAuth2 client.

use chrono::Duration;
use reqwest::StatusCode;
use serde::Deserialize;

use super::credential::{ClientCredentials, TokenGrant};
use super::error::AuthError;
use super::token::Secret;
use crate::config::Region;
use crate::util::retry::RetryPolicy;

/// OAuth scope granting campaign management access.
pub const CAMPAIGN_MANAGEMENT_SCOPE: &str = "advertising::campaign_management";

/// Token exchange against the LWA authorization server.
///
/// # Example
/// ```no_run
/// use amazon_ppc::auth::LwaClient;
/// use amazon_ppc::config::Region;
///
/// let lwa = LwaClient::new(reqwest::Client::new(), Region::NorthAmerica);
/// ```
#[derive(Debug, Clone)]
pub struct LwaClient {
    client: reqwest::Client,
    token_url: String,
    authorize_url: String,
    retry: RetryPolicy,
}

impl LwaClient {
    pub fn new(client: reqwest::Client, region: Region) -> Self {
        Self {
            client,
            token_url: region.token_url().to_string(),
            authorize_url: region.authorize_url().to_string(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_token_url(mut self, url: impl Into<String>) -> Self {
        self.token_url = url.into();
        self
    }

    pub fn with_authorize_url(mut self, url: impl Into<String>) -> Self {
        self.authorize_url = url.into();
        self
    }

    /// Policy bounding retries of transport failures during an exchange.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// URL the user visits to grant consent (authorization-code flow).
    pub fn authorization_url(
        &self,
        client: &ClientCredentials,
        scope: &str,
        state: &str,
    ) -> Result<String, AuthError> {
        let redirect_uri = client
            .redirect_uri
            .as_deref()
            .ok_or_else(|| AuthError::InvalidClient("no redirect URI configured".to_string()))?;
        let url = reqwest::Url::parse_with_params(
            &self.authorize_url,
            &[
                ("client_id", client.client_id.as_str()),
                ("scope", scope),
                ("response_type", "code"),
                ("redirect_uri", redirect_uri),
                ("state", state),
            ],
        )
        .map_err(|err| AuthError::InvalidResponse(format!("invalid authorize URL: {err}")))?;
        Ok(url.to_string())
    }

    /// Exchange an authorization code for tokens.
    pub async fn exchange_code(
        &self,
        client: &ClientCredentials,
        code: &str,
    ) -> Result<TokenGrant, AuthError> {
        let redirect_uri = client
            .redirect_uri
            .as_deref()
            .ok_or_else(|| AuthError::InvalidClient("no redirect URI configured".to_string()))?;
        let form = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("client_id", client.client_id.as_str()),
            ("client_secret", client.client_secret.expose()),
        ];
        self.exchange(&form).await
    }

    /// Exchange a refresh token for a new access token.
    ///
    /// Transport failures and 5xx answers are retried under the configured
    /// policy; once it gives up the error becomes [`AuthError::Unreachable`].
    pub async fn refresh(
        &self,
        client: &ClientCredentials,
        refresh_token: &Secret,
    ) -> Result<TokenGrant, AuthError> {
        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token.expose()),
            ("client_id", client.client_id.as_str()),
            ("client_secret", client.client_secret.expose()),
        ];
        self.exchange(&form).await
    }

    async fn exchange(&self, form: &[(&str, &str)]) -> Result<TokenGrant, AuthError> {
        let mut attempts = 0u32;
        let result = self
            .retry
            .execute(|| {
                attempts += 1;
                self.exchange_once(form)
            })
            .await;
        result.map_err(|err| {
            if err.category().is_transient() {
                AuthError::Unreachable {
                    attempts,
                    message: err.to_string(),
                }
            } else {
                err
            }
        })
    }

    async fn exchange_once(&self, form: &[(&str, &str)]) -> Result<TokenGrant, AuthError> {
        let resp = self
            .client
            .post(&self.token_url)
            .header("Accept", "application/json")
            .form(form)
            .send()
            .await?;
        let status = resp.status();
        if status.is_success() {
            let payload: LwaTokenResponse = resp.json().await?;
            return Ok(TokenGrant {
                access_token: Secret::new(payload.access_token),
                refresh_token: payload.refresh_token.map(Secret::new),
                token_type: payload.token_type,
                expires_in: Duration::seconds(payload.expires_in.unwrap_or(3600)),
            });
        }
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(AuthError::Server {
                status: status.as_u16(),
            });
        }
        let body = resp.text().await.unwrap_or_default();
        Err(map_error_body(status, &body))
    }
}

#[derive(Debug, Deserialize)]
struct LwaTokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    token_type: Option<String>,
    expires_in: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct LwaErrorResponse {
    error: Option<String>,
    error_description: Option<String>,
}

fn map_error_body(status: StatusCode, body: &str) -> AuthError {
    let parsed: Option<LwaErrorResponse> = serde_json::from_str(body).ok();
    let (code, description) = match parsed {
        Some(err) => (err.error, err.error_description),
        None => (None, None),
    };
    let detail = description
        .clone()
        .or_else(|| code.clone())
        .unwrap_or_else(|| format!("status {status}"));
    match code.as_deref() {
        Some("invalid_grant") => AuthError::Revoked(detail),
        Some("invalid_client") | Some("unauthorized_client") => AuthError::InvalidClient(detail),
        _ => AuthError::InvalidResponse(format!("Token exchange failed with status {status}: {detail}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credentials(redirect_uri: Option<&str>) -> ClientCredentials {
        ClientCredentials {
            client_id: "amzn1.application-oa2-client.abc".to_string(),
            client_secret: Secret::new("secret"),
            redirect_uri: redirect_uri.map(str::to_string),
        }
    }

    #[test]
    fn authorization_url_carries_consent_parameters() {
        let lwa = LwaClient::new(reqwest::Client::new(), Region::NorthAmerica);
        let url = lwa
            .authorization_url(
                &credentials(Some("https://example.com/cb")),
                CAMPAIGN_MANAGEMENT_SCOPE,
                "xyz",
            )
            .unwrap();
        assert!(url.starts_with("https://www.amazon.com/ap/oa?"));
        assert!(url.contains("response_type=code"));
        assert!(url.contains("state=xyz"));
        assert!(url.contains("redirect_uri=https%3A%2F%2Fexample.com%2Fcb"));
        assert!(url.contains("scope=advertising%3A%3Acampaign_management"));
    }

    #[test]
    fn authorization_url_requires_redirect_uri() {
        let lwa = LwaClient::new(reqwest::Client::new(), Region::Europe);
        let err = lwa
            .authorization_url(&credentials(None), CAMPAIGN_MANAGEMENT_SCOPE, "s")
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidClient(_)));
    }

    #[test]
    fn invalid_grant_maps_to_revoked() {
        let err = map_error_body(
            StatusCode::BAD_REQUEST,
            r#"{"error":"invalid_grant","error_description":"The request has an invalid grant parameter"}"#,
        );
        assert_eq!(
            err,
            AuthError::Revoked("The request has an invalid grant parameter".to_string())
        );
    }

    #[test]
    fn unknown_error_body_maps_to_invalid_response() {
        let err = map_error_body(StatusCode::BAD_REQUEST, "not json");
        assert!(matches!(err, AuthError::InvalidResponse(msg) if msg.contains("400")));
        let err = map_error_body(StatusCode::UNAUTHORIZED, r#"{"error":"invalid_client"}"#);
        assert_eq!(err, AuthError::InvalidClient("invalid_client".to_string()));
    }
}
