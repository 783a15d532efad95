use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use serde::Serialize;
use spend_onboarding_common::DraftUpdate;

use super::SessionHandle;
use crate::auth::{GOOGLE_CALLBACK_PATH, LOGIN_PATH};
use crate::error::WorkflowError;
use crate::session::View;
use crate::submission::SubmissionForm;
use crate::AppState;

/// Browser-side settings the form needs to start Google One Tap and address
/// autocomplete.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ClientSettings {
    self_id: Option<i64>,
    google_client_id: String,
    google_one_tap_login_uri: String,
    google_maps_api_key: String,
}

/// Page model returned to the browser.
#[derive(Serialize)]
struct PageResponse {
    #[serde(flatten)]
    view: View,
    program: String,
    physical_card_enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    client: Option<ClientSettings>,
}

impl PageResponse {
    fn new(state: &AppState, view: View) -> Self {
        let client = match &view {
            View::Form { draft, .. } => Some(ClientSettings {
                self_id: draft.member_id,
                google_client_id: state.config.google.client_id.clone(),
                google_one_tap_login_uri: state.config.server.url_for(GOOGLE_CALLBACK_PATH),
                google_maps_api_key: state.config.address_validation.frontend_api_key.clone(),
            }),
            _ => None,
        };

        Self {
            view,
            program: state.config.program.name.clone(),
            physical_card_enabled: state.config.features.enable_physical_card,
            client,
        }
    }
}

/// GET / - current view for the session
async fn index(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Response, WorkflowError> {
    let mut handle = SessionHandle::load(&state, &headers).await;

    let view = state.machine.view(&mut handle.session).await?;
    if view == View::SignIn {
        return Ok(Redirect::to(LOGIN_PATH).into_response());
    }

    let cookies = handle.commit(&state).await;
    Ok((cookies, Json(PageResponse::new(&state, view))).into_response())
}

/// POST / - submit the request for fulfillment
async fn submit(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Form(form): Form<SubmissionForm>,
) -> Result<Response, WorkflowError> {
    let mut handle = SessionHandle::load(&state, &headers).await;

    let draft = state.pipeline.submit(&mut handle.session, form).await?;

    let cookies = handle.commit(&state).await;
    let view = View::Requested { draft };
    Ok((cookies, Json(PageResponse::new(&state, view))).into_response())
}

/// POST /save - store the editable fields of the draft
async fn save(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(update): Json<DraftUpdate>,
) -> Result<Response, WorkflowError> {
    let mut handle = SessionHandle::load(&state, &headers).await;

    let draft = state.machine.save_draft(&mut handle.session, update)?;

    let cookies = handle.commit(&state).await;
    Ok((cookies, Json(draft)).into_response())
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index).post(submit))
        .route("/save", post(save))
        .route("/api/save", post(save))
        .with_state(state)
}
