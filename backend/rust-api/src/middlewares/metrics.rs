use axum::{extract::Request, middleware::Next, response::Response};
use std::time::Instant;

use crate::metrics::{HTTP_REQUESTS_TOTAL, HTTP_REQUEST_DURATION_SECONDS};

/// Path segments whose next segment is always a route parameter.
const PARAMETER_PARENTS: [(&str, &str); 4] = [
    ("sessions", "{id}"),
    ("grades", "{points}"),
    ("code", "{code}"),
    ("quiz", "{user_id}"),
];

pub async fn metrics_middleware(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().to_string();
    let path = normalize_path(req.uri().path());

    let response = next.run(req).await;

    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    HTTP_REQUESTS_TOTAL
        .with_label_values(&[&method, &path, &status])
        .inc();

    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[&method, &path])
        .observe(duration);

    response
}

/// Replaces route parameters with placeholders to bound label cardinality.
fn normalize_path(path: &str) -> String {
    let segments: Vec<&str> = path.split('/').collect();
    let admin = segments.get(1) == Some(&"admin");
    let mut normalized = Vec::with_capacity(segments.len());

    for (i, segment) in segments.iter().enumerate() {
        let parent = i.checked_sub(1).map(|p| segments[p]);
        let placeholder = PARAMETER_PARENTS
            .iter()
            .find(|(name, _)| Some(*name) == parent && (*name != "quiz" || admin))
            .map(|(_, placeholder)| *placeholder);

        match placeholder {
            Some(placeholder) if !segment.is_empty() => normalized.push(placeholder),
            _ if is_uuid_like(segment) || is_numeric_id(segment) => normalized.push("{id}"),
            _ => normalized.push(*segment),
        }
    }

    normalized.join("/")
}

fn is_uuid_like(s: &str) -> bool {
    // 8-4-4-4-12 hex characters
    if s.len() != 36 {
        return false;
    }
    s.chars().all(|c| c.is_ascii_hexdigit() || c == '-')
}

fn is_numeric_id(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path() {
        assert_eq!(
            normalize_path("/api/v1/quiz/sessions/550e8400-e29b-41d4-a716-446655440000/answers"),
            "/api/v1/quiz/sessions/{id}/answers"
        );
        assert_eq!(
            normalize_path("/api/v1/quiz/grades/1500"),
            "/api/v1/quiz/grades/{points}"
        );
        assert_eq!(
            normalize_path("/referrals/code/ABCD1234"),
            "/referrals/code/{code}"
        );
        assert_eq!(
            normalize_path("/admin/quiz/user-42/weekly-rank"),
            "/admin/quiz/{user_id}/weekly-rank"
        );
        assert_eq!(normalize_path("/api/v1/quiz/progress"), "/api/v1/quiz/progress");
        assert_eq!(normalize_path("/health"), "/health");
        assert_eq!(normalize_path("/metrics"), "/metrics");
    }

    #[test]
    fn test_is_uuid_like() {
        assert!(is_uuid_like("550e8400-e29b-41d4-a716-446655440000"));
        assert!(!is_uuid_like("not-a-uuid"));
        assert!(!is_uuid_like("12345"));
    }

    #[test]
    fn test_is_numeric_id() {
        assert!(is_numeric_id("123"));
        assert!(!is_numeric_id("abc"));
        assert!(!is_numeric_id(""));
    }
}
