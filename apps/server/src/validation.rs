use crate::error::ServerError;

/// Validate and normalize a display name.
///
/// Trims whitespace, rejects empty strings, strings longer than 64
/// characters, and strings containing control characters. Not part of the
/// `ChatService` contract — ambient edge-layer hygiene before the value
/// ever reaches a backend.
pub fn validate_display_name(name: &str) -> Result<String, ServerError> {
    let trimmed = name.trim().to_string();
    if trimmed.is_empty() {
        return Err(ServerError::validation("displayName is required"));
    }
    if trimmed.chars().count() > 64 {
        return Err(ServerError::validation(
            "displayName must be 64 characters or fewer",
        ));
    }
    if trimmed.chars().any(|c| c.is_control()) {
        return Err(ServerError::validation(
            "displayName must not contain control characters",
        ));
    }
    Ok(trimmed)
}

/// Validate the `limit` query parameter of `getMessages`: must be in
/// `1..=100`, clamped nowhere — a value outside the range is rejected
/// outright rather than silently clamped, per the edge's validation
/// contract for paging.
pub fn validate_message_limit(limit: u32) -> Result<u32, ServerError> {
    if !(1..=100).contains(&limit) {
        return Err(ServerError::validation("limit must be between 1 and 100"));
    }
    Ok(limit)
}
