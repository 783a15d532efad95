use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use spend_onboarding_common::IdentityClaims;

use super::SessionHandle;
use crate::auth::LOGIN_PATH;
use crate::error::WorkflowError;
use crate::session::PendingAuthorization;
use crate::AppState;

/// Parameters of the authorization response, if this is one.
#[derive(Debug, Default, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

impl CallbackQuery {
    /// Reject provider errors and return the code and state.
    pub(crate) fn into_code(self) -> Result<(String, String), WorkflowError> {
        if let Some(error) = self.error {
            let message = self.error_description.unwrap_or(error);
            return Err(WorkflowError::unauthorized(message));
        }

        match (self.code, self.state) {
            (Some(code), Some(state)) => Ok((code, state)),
            _ => Err(WorkflowError::bad_request("Missing authorization code")),
        }
    }
}

/// GET /login - start the login flow, or finish it on the way back
async fn login(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<CallbackQuery>,
) -> Result<Response, WorkflowError> {
    let mut handle = SessionHandle::load(&state, &headers).await;

    if query.code.is_none() && query.error.is_none() {
        let pending = PendingAuthorization::generate();
        let url = state
            .providers
            .primary
            .authorize_url(&pending.state, &pending.nonce, &[])?;
        handle.session.pending_login = Some(pending);

        let cookies = handle.commit(&state).await;
        return Ok((cookies, Redirect::to(&url)).into_response());
    }

    let pending = handle
        .session
        .pending_login
        .take()
        .ok_or_else(|| WorkflowError::unauthorized("Login was not started"))?;
    let (code, returned_state) = query.into_code()?;
    if returned_state != pending.state {
        return Err(WorkflowError::unauthorized("State mismatch"));
    }

    let id_token = state.providers.primary.exchange_code(&code).await?;
    let claims: IdentityClaims = state
        .providers
        .primary
        .validate_id_token(&id_token, Some(&pending.nonce))
        .await?;

    let draft = state.machine.login(&claims).await?;
    handle.session.draft = Some(draft);
    handle.session.pending_verification = None;

    let cookies = handle.commit(&state).await;
    Ok((cookies, Redirect::to("/")).into_response())
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(LOGIN_PATH, get(login))
        .with_state(state)
}
