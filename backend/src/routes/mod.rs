pub mod form;
pub mod health;
pub mod login;
pub mod verify;

use std::sync::Arc;

use axum::http::{header, HeaderMap, HeaderValue};
use axum::{middleware, Router};

use crate::session::Session;
use crate::AppState;

/// Name of the cookie carrying the session id.
pub const SESSION_COOKIE: &str = "onboarding_session";

/// Full HTTP surface of the service.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(health::router())
        .merge(form::router(state.clone()))
        .merge(login::router(state.clone()))
        .merge(verify::router(state))
        .layer(middleware::from_fn(crate::logging::request_logger))
}

/// Working copy of the caller's session.
///
/// Changes only reach the store through [`SessionHandle::commit`], so a
/// handler that bails out with an error leaves the stored session untouched.
/// Commit replaces the whole session; with concurrent requests on the same
/// session the last one to commit wins.
pub(crate) struct SessionHandle {
    id: Option<String>,
    pub session: Session,
}

impl SessionHandle {
    pub async fn load(state: &AppState, headers: &HeaderMap) -> Self {
        if let Some(id) = session_id(headers) {
            if let Some(session) = state.sessions.load(&id).await {
                return Self {
                    id: Some(id),
                    session,
                };
            }
        }

        Self {
            id: None,
            session: Session::default(),
        }
    }

    /// Persist the session. Returns the `Set-Cookie` header for a new one.
    ///
    /// A session left with nothing in it is dropped from the store.
    pub async fn commit(self, state: &AppState) -> HeaderMap {
        let mut headers = HeaderMap::new();

        match self.id {
            Some(id) if self.session == Session::default() => state.sessions.remove(&id).await,
            Some(id) => state.sessions.save(&id, self.session).await,
            None => {
                let id = state.sessions.create(self.session).await;
                match session_cookie(&id, &state.config.server) {
                    Ok(value) => {
                        headers.insert(header::SET_COOKIE, value);
                    }
                    Err(e) => tracing::error!("Failed to build session cookie: {}", e),
                }
            }
        }

        headers
    }
}

/// Session id from the request's `Cookie` headers.
pub(crate) fn session_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, id)| id.trim().to_string())
        .filter(|id| !id.is_empty())
}

fn session_cookie(
    id: &str,
    server: &crate::config::ServerConfig,
) -> Result<HeaderValue, header::InvalidHeaderValue> {
    let mut cookie = format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        SESSION_COOKIE, id, server.session_ttl_secs
    );
    if server.session_cookie_secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;

    #[test]
    fn test_session_id_from_cookie_header() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; onboarding_session=abc-123; other=1"),
        );
        assert_eq!(session_id(&headers).as_deref(), Some("abc-123"));
    }

    #[test]
    fn test_session_id_missing() {
        let mut headers = HeaderMap::new();
        assert_eq!(session_id(&headers), None);

        headers.insert(header::COOKIE, HeaderValue::from_static("onboarding_session="));
        assert_eq!(session_id(&headers), None);
    }

    #[test]
    fn test_session_cookie_attributes() {
        let mut server = ServerConfig::default();
        let cookie = session_cookie("abc", &server).unwrap();
        assert_eq!(
            cookie.to_str().unwrap(),
            "onboarding_session=abc; Path=/; HttpOnly; SameSite=Lax; Max-Age=28800"
        );

        server.session_cookie_secure = true;
        let cookie = session_cookie("abc", &server).unwrap();
        assert!(cookie.to_str().unwrap().ends_with("; Secure"));
    }
}
