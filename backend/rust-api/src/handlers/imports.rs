use axum::{Extension, Json};
use validator::Validate;

use super::error::ApiError;
use crate::extractors::AppJson;
use crate::middlewares::auth::JwtClaims;
use crate::models::import::{WhatsAppImportRequest, WhatsAppImportResponse};
use crate::services::whatsapp_import::parse_whatsapp_text;

/// POST /api/v1/imports/whatsapp
pub async fn import_whatsapp(
    Extension(claims): Extension<JwtClaims>,
    AppJson(req): AppJson<WhatsAppImportRequest>,
) -> Result<Json<WhatsAppImportResponse>, ApiError> {
    req.validate()?;

    let contacts = parse_whatsapp_text(&req.text);
    tracing::info!(
        "User {} imported {} contacts from WhatsApp text",
        claims.sub,
        contacts.len()
    );

    Ok(Json(WhatsAppImportResponse { contacts }))
}
