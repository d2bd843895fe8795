use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Redirect;
use serde::Deserialize;
use std::sync::Arc;

use crate::app_state::{AppState, Authenticator};
use crate::routes::ApiError;
use crate::services::drive::DriveClient;
use crate::services::oauth::OAuthError;

#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

/// GET /auth/login — start the Authenticate command.
pub async fn login(State(state): State<AppState>) -> Result<Redirect, ApiError> {
    match state.authenticator.as_ref() {
        Authenticator::OAuth(oauth) => {
            let (url, pending) = oauth
                .begin()
                .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
            *state.pending_auth.lock().await = Some(pending);
            tracing::info!("Redirecting to OAuth consent page");
            Ok(Redirect::to(&url))
        }
        Authenticator::Preconfigured(storage) => {
            state.open_session(Arc::clone(storage)).await;
            Ok(Redirect::to("/"))
        }
    }
}

/// GET /auth/callback — finish the OAuth flow and open a session.
pub async fn callback(
    State(state): State<AppState>,
    Query(params): Query<CallbackParams>,
) -> Result<Redirect, ApiError> {
    let Authenticator::OAuth(oauth) = state.authenticator.as_ref() else {
        return Err(ApiError::new(
            StatusCode::NOT_FOUND,
            "OAuth is not used by the configured storage backend",
        ));
    };

    if let Some(error) = params.error {
        tracing::warn!(error = %error, "OAuth consent denied");
        return Err(ApiError::new(StatusCode::UNAUTHORIZED, format!("Login failed: {error}")));
    }

    let pending = state
        .pending_auth
        .lock()
        .await
        .take()
        .ok_or_else(|| ApiError::bad_request("No login in progress"))?;

    if params.state.as_deref() != Some(pending.state.as_str()) {
        tracing::warn!("OAuth state mismatch");
        return Err(ApiError::bad_request("Login state mismatch; please try again"));
    }

    let code = params
        .code
        .ok_or_else(|| ApiError::bad_request("Missing authorization code"))?;

    let token = oauth.exchange_code(&code, &pending).await.map_err(|e| {
        let status = match e {
            OAuthError::InvalidGrant => StatusCode::UNAUTHORIZED,
            _ => StatusCode::BAD_GATEWAY,
        };
        ApiError::new(status, format!("Login failed: {e}"))
    })?;

    let drive = DriveClient::new(Arc::clone(oauth), token).map_err(|e| {
        tracing::error!(error = %e, "Could not build Drive client");
        ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "Login failed: could not reach storage")
    })?;
    state.open_session(Arc::new(drive)).await;
    Ok(Redirect::to("/"))
}

/// POST /auth/logout — end the session and revoke its credentials.
pub async fn logout(State(state): State<AppState>) -> StatusCode {
    let session = state.session.lock().await.take();
    if let Some(session) = session {
        if let Err(e) = session.close().await {
            tracing::warn!(error = %e, "Credential revocation failed during logout");
        }
    }
    StatusCode::NO_CONTENT
}
