//! Shared constants for structured API errors.

pub const ERROR_TYPE_API: &str = "api_error";
pub const ERROR_TYPE_TIMEOUT: &str = "timeout_error";
pub const ERROR_TYPE_INVALID_REQUEST: &str = "invalid_request_error";
pub const ERROR_TYPE_STREAM: &str = "stream_error";

/// Longest upstream error message forwarded to clients.
pub const MAX_ERROR_MESSAGE_LEN: usize = 500;

/// Truncate an upstream message to [`MAX_ERROR_MESSAGE_LEN`] characters.
pub fn truncate_message(message: &str) -> String {
    let mut chars = message.chars();
    let truncated: String = chars.by_ref().take(MAX_ERROR_MESSAGE_LEN).collect();
    if chars.next().is_some() {
        format!("{}...", truncated)
    } else {
        truncated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_short_message_unchanged() {
        assert_eq!(truncate_message("bad request"), "bad request");
    }

    #[test]
    fn test_truncate_long_message() {
        let long = "x".repeat(MAX_ERROR_MESSAGE_LEN + 20);
        let truncated = truncate_message(&long);
        assert_eq!(truncated.len(), MAX_ERROR_MESSAGE_LEN + 3);
        assert!(truncated.ends_with("..."));
    }
}
