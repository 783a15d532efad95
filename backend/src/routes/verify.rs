use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::{Form, Router};
use serde::Deserialize;

use super::login::CallbackQuery;
use super::SessionHandle;
use crate::auth::{
    OidcProvider, VerificationClaims, GOOGLE_CALLBACK_PATH, MICROSOFT_CALLBACK_PATH,
};
use crate::error::WorkflowError;
use crate::session::{PendingAuthorization, PendingVerification, VerificationProvider};
use crate::AppState;

#[derive(Debug, Deserialize)]
struct VerifyQuery {
    #[serde(rename = "emailAddress", default)]
    email_address: Option<String>,
}

/// Google One Tap post-back.
#[derive(Debug, Deserialize)]
struct OneTapForm {
    credential: String,
}

fn provider_client(state: &AppState, provider: VerificationProvider) -> &OidcProvider {
    match provider {
        VerificationProvider::Google => &state.providers.google,
        VerificationProvider::Microsoft => &state.providers.microsoft,
    }
}

/// GET /verify-email - send the browser to the provider owning the address
async fn verify_email(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<VerifyQuery>,
) -> Result<Response, WorkflowError> {
    let mut handle = SessionHandle::load(&state, &headers).await;
    let email_address = query.email_address.unwrap_or_default();

    let provider = state
        .machine
        .begin_verification(&handle.session, &email_address)?;

    let pending = PendingAuthorization::generate();
    let hints = state.machine.verification_hints(provider, &email_address);
    let extra: Vec<(&str, &str)> = hints.iter().map(|(k, v)| (*k, v.as_str())).collect();
    let url = provider_client(&state, provider).authorize_url(
        &pending.state,
        &pending.nonce,
        &extra,
    )?;

    handle.session.pending_verification = Some(PendingVerification {
        provider,
        authorization: pending,
    });

    let cookies = handle.commit(&state).await;
    Ok((cookies, Redirect::to(&url)).into_response())
}

async fn complete_code_flow(
    state: Arc<AppState>,
    headers: HeaderMap,
    provider: VerificationProvider,
    query: CallbackQuery,
) -> Result<Response, WorkflowError> {
    let mut handle = SessionHandle::load(&state, &headers).await;
    handle.session.draft()?;

    let pending = handle
        .session
        .pending_verification
        .take()
        .filter(|pending| pending.provider == provider)
        .ok_or_else(|| WorkflowError::unauthorized("Verification was not started"))?;
    let (code, returned_state) = query.into_code()?;
    if returned_state != pending.authorization.state {
        return Err(WorkflowError::unauthorized("State mismatch"));
    }

    let client = provider_client(&state, provider);
    let id_token = client.exchange_code(&code).await?;
    let claims: VerificationClaims = client
        .validate_id_token(&id_token, Some(&pending.authorization.nonce))
        .await?;

    // A completed code flow proves control of the mailbox.
    state
        .machine
        .complete_verification(&mut handle.session, provider, claims, true)?;

    let cookies = handle.commit(&state).await;
    Ok((cookies, Redirect::to("/")).into_response())
}

/// GET /verify-email/google/complete
async fn google_complete(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<CallbackQuery>,
) -> Result<Response, WorkflowError> {
    complete_code_flow(state, headers, VerificationProvider::Google, query).await
}

/// GET /verify-email/microsoft/complete
async fn microsoft_complete(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<CallbackQuery>,
) -> Result<Response, WorkflowError> {
    complete_code_flow(state, headers, VerificationProvider::Microsoft, query).await
}

/// POST /verify-email/google/complete - Google One Tap credential
async fn google_one_tap(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Form(form): Form<OneTapForm>,
) -> Result<Response, WorkflowError> {
    let mut handle = SessionHandle::load(&state, &headers).await;
    handle.session.draft()?;

    let claims: VerificationClaims = state
        .providers
        .google
        .validate_id_token(&form.credential, None)
        .await?;
    let verified = claims.email_verified.unwrap_or(false);

    state.machine.complete_verification(
        &mut handle.session,
        VerificationProvider::Google,
        claims,
        verified,
    )?;

    let cookies = handle.commit(&state).await;
    Ok((cookies, Redirect::to("/")).into_response())
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/verify-email", get(verify_email))
        .route(GOOGLE_CALLBACK_PATH, get(google_complete).post(google_one_tap))
        .route(MICROSOFT_CALLBACK_PATH, get(microsoft_complete))
        .with_state(state)
}
