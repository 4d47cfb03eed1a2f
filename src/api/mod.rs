mod admin;
pub mod auth;
pub mod error;
mod guard;
mod issues;
pub mod query;
mod uploads;
mod validation;

use axum::{
    http::{header, HeaderValue, Method},
    routing::{delete, get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};
use tracing::warn;

use crate::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    let auth_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/verify-email", get(auth::verify_email))
        .route("/login", post(auth::login))
        .route("/logout", get(auth::logout))
        .route("/password/forgot", post(auth::forgot_password))
        .route("/password/reset/:token", post(auth::reset_password))
        .route("/password/change", put(auth::change_password))
        .route("/myprofile", get(auth::my_profile))
        .route("/update-profile", put(auth::update_profile));

    let issue_routes = Router::new()
        .route("/", get(issues::list_issues))
        .route("/new", post(issues::new_issue))
        .route("/my-reports", get(issues::my_reports))
        .route("/user/stats", get(issues::user_stats))
        .route("/:id", delete(issues::delete_issue))
        .route("/admin", get(issues::admin_list_issues))
        .route("/admin/:id", get(issues::admin_get_issue))
        .route("/admin/:id", put(issues::admin_update_issue));

    let admin_routes = Router::new()
        .route("/stats", get(admin::stats))
        .route("/users", get(admin::list_users))
        .route("/users/:id", get(admin::get_user))
        .route("/users/:id", put(admin::update_user))
        .route("/users/:id", delete(admin::delete_user))
        .route("/users/:id/promote", put(admin::promote_user));

    // Cookies only flow with an exact allowed origin
    let frontend_origin = state
        .config
        .frontend
        .url
        .parse::<HeaderValue>()
        .unwrap_or_else(|_| {
            warn!(
                url = %state.config.frontend.url,
                "Invalid frontend URL in config, falling back to http://localhost:3000"
            );
            HeaderValue::from_static("http://localhost:3000")
        });
    let cors = CorsLayer::new()
        .allow_origin(frontend_origin)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(true);

    Router::new()
        .route("/", get(health_check))
        .nest("/api/v1/auth", auth_routes)
        .nest("/api/v1/issue", issue_routes)
        .nest("/api/v1/admin", admin_routes)
        .nest_service(
            "/uploads",
            ServeDir::new(&state.config.server.uploads_dir),
        )
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "CivicWatch API is running"
}
