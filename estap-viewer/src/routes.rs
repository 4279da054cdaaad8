//! HTTP handlers

use axum::Json;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use serde::Deserialize;
use snafu::{ResultExt, Snafu};
use tracing::error;

use crate::AppState;
use crate::db::{self, TableRow};
use crate::render::{Dashboard, RenderError};

#[derive(Debug, Snafu)]
pub enum ViewerError {
    #[snafu(display("database error: {source}"))]
    Database { source: sqlx::Error },

    #[snafu(display("{source}"))]
    Template { source: RenderError },
}

impl IntoResponse for ViewerError {
    fn into_response(self) -> Response {
        error!("{self}");
        (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()).into_response()
    }
}

/// `?system=...` toggles the system schemas
#[derive(Debug, Default, Deserialize)]
pub struct SystemQuery {
    system: Option<String>,
}

impl SystemQuery {
    pub fn include_system(&self) -> bool {
        self.system.as_deref().is_some_and(|raw| {
            matches!(
                raw.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        })
    }
}

pub async fn index(
    State(state): State<AppState>,
    Query(query): Query<SystemQuery>,
) -> Result<Html<String>, ViewerError> {
    let served = state.count_request();
    let include_system = query.include_system();

    let tables = db::list_tables(&state.pool, include_system)
        .await
        .context(DatabaseSnafu)?;
    let server_version = db::server_version(&state.pool)
        .await
        .context(DatabaseSnafu)?;

    let view = Dashboard {
        server_version,
        tables,
        include_system,
        requests_served: served,
        ..Dashboard::for_settings(&state.settings)
    };
    let html = state.renderer.dashboard(&view).context(TemplateSnafu)?;
    Ok(Html(html))
}

pub async fn api_tables(
    State(state): State<AppState>,
    Query(query): Query<SystemQuery>,
) -> Result<Json<Vec<TableRow>>, ViewerError> {
    state.count_request();
    let tables = db::list_tables(&state.pool, query.include_system())
        .await
        .context(DatabaseSnafu)?;
    Ok(Json(tables))
}

/// Liveness only; never touches the database
pub async fn healthz(State(state): State<AppState>) -> &'static str {
    state.count_request();
    "ok"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ViewerConfig, router};
    use axum::body::Body;
    use axum::http::Request;
    use clap::Parser;
    use std::sync::atomic::Ordering;
    use tower::ServiceExt;

    /// State whose database is unreachable: connection refused right away
    fn unreachable_state() -> AppState {
        let config = ViewerConfig::try_parse_from([
            "estap-viewer",
            "--pg-host",
            "127.0.0.1",
            "--pg-port",
            "1",
            "--pg-user",
            "bank",
            "--pg-database",
            "ledger",
            "--acquire-timeout-secs",
            "1",
        ])
        .unwrap();
        AppState::new(&config).unwrap()
    }

    async fn get(state: AppState, uri: &str) -> (StatusCode, String) {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let response = router(state).oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        (status, String::from_utf8_lossy(&body).into_owned())
    }

    #[test]
    fn test_system_flag() {
        let flag = |raw: &str| {
            SystemQuery {
                system: Some(raw.to_string()),
            }
            .include_system()
        };
        assert!(flag("1") && flag("true") && flag("YES") && flag("on"));
        assert!(!flag("0") && !flag("no") && !flag(""));
        assert!(!SystemQuery::default().include_system());
    }

    #[tokio::test]
    async fn test_healthz_without_database() {
        let state = unreachable_state();
        let (status, body) = get(state.clone(), "/healthz").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ok");
        assert_eq!(state.requests.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_database_errors_are_500() {
        let (status, body) = get(unreachable_state(), "/api/tables?system=1").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body.starts_with("database error:"));

        let (status, _) = get(unreachable_state(), "/").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_unknown_route() {
        let (status, _) = get(unreachable_state(), "/nope").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
