use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use std::sync::Arc;
use validator::Validate;

use super::error::ApiError;
use crate::extractors::AppJson;
use crate::middlewares::auth::JwtClaims;
use crate::models::referral::{
    CreateReferralRequest, CreateReferralResponse, ProcessPaymentRequest,
    ProcessPaymentResponse, ReferralCodeResponse, ReferralStatsResponse, RegisterSignupRequest,
    RegisterSignupResponse,
};
use crate::services::referral_service::ReferralService;
use crate::services::AppState;

fn referral_service(state: &AppState) -> ReferralService {
    ReferralService::new(state.repos.clone(), state.config.referral.clone())
}

/// POST /referrals/create - 201 for a new code, 200 with the existing one
pub async fn create_referral(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    AppJson(req): AppJson<CreateReferralRequest>,
) -> Result<impl IntoResponse, ApiError> {
    req.validate()?;

    let (referral, created) = referral_service(&state)
        .create_referral(&claims.sub, &req.family_name)
        .await?;
    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };

    Ok((status, Json(CreateReferralResponse { referral })))
}

/// POST /referrals/register-signup
pub async fn register_signup(
    State(state): State<Arc<AppState>>,
    AppJson(req): AppJson<RegisterSignupRequest>,
) -> Result<Json<RegisterSignupResponse>, ApiError> {
    req.validate()?;

    let result = referral_service(&state)
        .register_referral_signup(&req.referral_code, &req.new_family_id, &req.new_family_name)
        .await?;
    Ok(Json(result))
}

/// POST /referrals/process-payment - rewards the caller's first payment
pub async fn process_payment(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    AppJson(req): AppJson<ProcessPaymentRequest>,
) -> Result<Json<ProcessPaymentResponse>, ApiError> {
    req.validate()?;

    let result = referral_service(&state)
        .process_first_payment(&claims.sub, req.payment_amount, req.plan.as_deref())
        .await?;
    Ok(Json(result))
}

/// GET /referrals/stats
pub async fn get_stats(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
) -> Result<Json<ReferralStatsResponse>, ApiError> {
    Ok(Json(referral_service(&state).referral_stats(&claims.sub).await?))
}

/// GET /referrals/code/{code} - public landing page lookup
pub async fn lookup_code(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
) -> Result<Json<ReferralCodeResponse>, ApiError> {
    Ok(Json(referral_service(&state).lookup_code(&code).await?))
}
