use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct WhatsAppImportRequest {
    #[validate(length(min = 1, max = 2_000_000, message = "text must not be empty"))]
    pub text: String,
}

/// A family member candidate found in a WhatsApp export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParsedContact {
    pub name: String,
    pub phone: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct WhatsAppImportResponse {
    pub contacts: Vec<ParsedContact>,
}
