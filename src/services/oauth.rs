use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub const DRIVE_SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/drive.file",
    "https://www.googleapis.com/auth/drive.readonly",
];

/// Provider endpoints and client registration for the authorization-code flow.
#[derive(Debug, Clone)]
pub struct OAuthSettings {
    pub client_id: String,
    pub client_secret: String,
    pub authorize_url: String,
    pub token_url: String,
    pub revoke_url: String,
    pub redirect_uri: String,
}

/// Access/refresh token pair held by an authenticated storage handle.
#[derive(Debug, Clone)]
pub struct TokenSet {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl TokenSet {
    /// True when the access token is expired or will be within `skew`.
    pub fn expires_within(&self, skew: Duration) -> bool {
        self.expires_at
            .is_some_and(|expires_at| Utc::now() + skew >= expires_at)
    }

    fn from_response(response: TokenResponse, previous_refresh: Option<String>) -> Self {
        Self {
            access_token: response.access_token,
            refresh_token: response.refresh_token.or(previous_refresh),
            expires_at: response
                .expires_in
                .map(|secs| Utc::now() + Duration::seconds(secs)),
        }
    }
}

/// State kept between redirecting to the consent page and the callback.
#[derive(Debug, Clone)]
pub struct PendingAuthorization {
    pub state: String,
    pub code_verifier: String,
}

#[derive(Serialize)]
struct CodeExchangeRequest<'a> {
    grant_type: &'static str,
    code: &'a str,
    redirect_uri: &'a str,
    client_id: &'a str,
    client_secret: &'a str,
    code_verifier: &'a str,
}

#[derive(Serialize)]
struct RefreshRequest<'a> {
    grant_type: &'static str,
    refresh_token: &'a str,
    client_id: &'a str,
    client_secret: &'a str,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

#[derive(Deserialize)]
struct TokenErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// OAuth 2.0 authorization-code client with PKCE.
pub struct OAuthClient {
    http: Client,
    settings: OAuthSettings,
}

impl OAuthClient {
    pub fn new(settings: OAuthSettings) -> Self {
        Self {
            http: Client::new(),
            settings,
        }
    }

    /// Build the consent-page URL and the state needed to complete the flow.
    pub fn begin(&self) -> Result<(String, PendingAuthorization), OAuthError> {
        let pending = PendingAuthorization {
            state: uuid::Uuid::new_v4().simple().to_string(),
            code_verifier: generate_code_verifier(),
        };
        let challenge = code_challenge(&pending.code_verifier);
        let scope = DRIVE_SCOPES.join(" ");

        let url = Url::parse_with_params(
            &self.settings.authorize_url,
            &[
                ("response_type", "code"),
                ("client_id", self.settings.client_id.as_str()),
                ("redirect_uri", self.settings.redirect_uri.as_str()),
                ("scope", scope.as_str()),
                ("state", pending.state.as_str()),
                ("code_challenge", challenge.as_str()),
                ("code_challenge_method", "S256"),
                ("access_type", "offline"),
                ("prompt", "consent"),
            ],
        )
        .map_err(|e| OAuthError::Config(format!("invalid authorize URL: {e}")))?;

        Ok((url.into(), pending))
    }

    pub async fn exchange_code(
        &self,
        code: &str,
        pending: &PendingAuthorization,
    ) -> Result<TokenSet, OAuthError> {
        let request = CodeExchangeRequest {
            grant_type: "authorization_code",
            code,
            redirect_uri: &self.settings.redirect_uri,
            client_id: &self.settings.client_id,
            client_secret: &self.settings.client_secret,
            code_verifier: &pending.code_verifier,
        };

        let response = self.post_token(&request).await?;
        tracing::info!("OAuth authorization code exchanged");
        Ok(TokenSet::from_response(response, None))
    }

    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenSet, OAuthError> {
        let request = RefreshRequest {
            grant_type: "refresh_token",
            refresh_token,
            client_id: &self.settings.client_id,
            client_secret: &self.settings.client_secret,
        };

        let response = self.post_token(&request).await?;
        tracing::debug!("OAuth access token refreshed");
        Ok(TokenSet::from_response(response, Some(refresh_token.to_string())))
    }

    pub async fn revoke(&self, token: &str) -> Result<(), OAuthError> {
        let response = self
            .http
            .post(&self.settings.revoke_url)
            .form(&[("token", token)])
            .send()
            .await?;

        let status = response.status();
        // An already-invalid token is as good as revoked.
        if status.is_success() || status.as_u16() == 400 {
            Ok(())
        } else {
            Err(OAuthError::Provider {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            })
        }
    }

    async fn post_token<T: Serialize>(&self, form: &T) -> Result<TokenResponse, OAuthError> {
        let response = self
            .http
            .post(&self.settings.token_url)
            .form(form)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response.json::<TokenResponse>().await?);
        }

        let body = response.text().await.unwrap_or_default();
        Err(classify_token_error(status.as_u16(), &body))
    }
}

fn classify_token_error(status: u16, body: &str) -> OAuthError {
    match serde_json::from_str::<TokenErrorResponse>(body) {
        Ok(err) if err.error == "invalid_grant" => OAuthError::InvalidGrant,
        Ok(err) => OAuthError::Provider {
            status,
            message: err.error_description.unwrap_or(err.error),
        },
        Err(_) => OAuthError::Provider {
            status,
            message: body.to_string(),
        },
    }
}

fn generate_code_verifier() -> String {
    // Two v4 UUIDs give 64 characters from the unreserved set.
    format!(
        "{}{}",
        uuid::Uuid::new_v4().simple(),
        uuid::Uuid::new_v4().simple()
    )
}

fn code_challenge(verifier: &str) -> String {
    let hash = Sha256::digest(verifier.as_bytes());
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(hash)
}

#[derive(Debug, thiserror::Error)]
pub enum OAuthError {
    #[error("Authorization grant is invalid or expired")]
    InvalidGrant,

    #[error("OAuth provider returned {status}: {message}")]
    Provider { status: u16, message: String },

    #[error("OAuth request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("OAuth configuration error: {0}")]
    Config(String),
}
