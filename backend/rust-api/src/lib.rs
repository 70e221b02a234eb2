use axum::{
    http::{header, Method},
    middleware,
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub mod config;
pub mod extractors;
pub mod handlers;
pub mod metrics;
pub mod middlewares;
pub mod models;
pub mod repositories;
pub mod services;
pub mod utils;

pub use config::Config;
pub use services::AppState;

pub fn create_router(app_state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_origin(tower_http::cors::Any);

    Router::new()
        .route("/health", get(handlers::health_check))
        .route(
            "/metrics",
            get(handlers::metrics_handler).layer(middleware::from_fn_with_state(
                app_state.clone(),
                handlers::metrics_auth_middleware,
            )),
        )
        .nest("/api/v1/quiz", quiz_routes(app_state.clone()))
        .nest("/api/v1/imports", import_routes(app_state.clone()))
        .nest("/referrals", referral_routes(app_state.clone()))
        .nest(
            "/admin",
            admin_routes().route_layer(middleware::from_fn_with_state(
                app_state.clone(),
                middlewares::auth::auth_middleware,
            )),
        )
        .with_state(app_state)
        .layer(middleware::from_fn(
            middlewares::metrics::metrics_middleware,
        ))
        .layer(middleware::from_fn(
            middlewares::trace::trace_context_middleware,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

fn quiz_routes(app_state: Arc<AppState>) -> Router<Arc<AppState>> {
    let public_routes = Router::new()
        .route("/points", post(handlers::quiz::score_answer))
        .route("/grades", get(handlers::quiz::list_grades))
        .route("/grades/{points}", get(handlers::quiz::grade_for_points))
        .route("/badges", get(handlers::quiz::list_badges));

    let protected_routes = Router::new()
        .route("/sessions", post(handlers::quiz::start_session))
        .route(
            "/sessions/{id}/answers",
            post(handlers::quiz::submit_answer),
        )
        .route(
            "/sessions/{id}/complete",
            post(handlers::quiz::complete_session),
        )
        .route("/progress", get(handlers::quiz::get_progress))
        .route_layer(middleware::from_fn_with_state(
            app_state,
            middlewares::auth::auth_middleware,
        ));

    public_routes.merge(protected_routes)
}

fn referral_routes(app_state: Arc<AppState>) -> Router<Arc<AppState>> {
    let public_routes =
        Router::new().route("/code/{code}", get(handlers::referrals::lookup_code));

    let protected_routes = Router::new()
        .route("/create", post(handlers::referrals::create_referral))
        .route(
            "/register-signup",
            post(handlers::referrals::register_signup),
        )
        .route(
            "/process-payment",
            post(handlers::referrals::process_payment),
        )
        .route("/stats", get(handlers::referrals::get_stats))
        .route_layer(middleware::from_fn_with_state(
            app_state,
            middlewares::auth::auth_middleware,
        ));

    public_routes.merge(protected_routes)
}

fn import_routes(app_state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/whatsapp", post(handlers::imports::import_whatsapp))
        .route_layer(middleware::from_fn_with_state(
            app_state,
            middlewares::auth::auth_middleware,
        ))
}

fn admin_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/reconciliation",
            get(handlers::admin::list_reconciliation_jobs),
        )
        .route(
            "/quiz/{user_id}/weekly-rank",
            put(handlers::admin::record_weekly_rank),
        )
        .route_layer(middleware::from_fn(
            middlewares::auth::admin_guard_middleware,
        ))
}
