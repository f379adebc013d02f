//! Placeholder page handlers behind the request gate.

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::middleware::Identity;

/// Dashboard view for the signed-in user.
#[derive(Debug, Serialize)]
pub struct DashboardView {
    /// Identity-provider user id
    pub user_id: String,
    /// Requested dashboard section, empty for the overview
    pub section: String,
}

/// Landing page.
pub async fn home() -> &'static str {
    "Outlay: track where the money goes."
}

/// Sign-in page.
pub async fn sign_in() -> &'static str {
    "Sign in to Outlay"
}

/// Sign-up page.
pub async fn sign_up() -> &'static str {
    "Create your Outlay account"
}

/// Dashboard overview; signed-in users reach it by visiting `/`.
pub async fn dashboard(identity: Option<Extension<Identity>>) -> Response {
    render_dashboard(identity, String::new())
}

/// A dashboard section such as `/dashboard/reports`.
pub async fn dashboard_section(
    Path(section): Path<String>,
    identity: Option<Extension<Identity>>,
) -> Response {
    render_dashboard(identity, section)
}

fn render_dashboard(identity: Option<Extension<Identity>>, section: String) -> Response {
    match identity {
        Some(Extension(identity)) => {
            (StatusCode::OK, Json(DashboardView { user_id: identity.user_id, section }))
                .into_response()
        },
        None => StatusCode::UNAUTHORIZED.into_response(),
    }
}
