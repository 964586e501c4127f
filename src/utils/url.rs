//! Endpoint URL joining.

/// Strips trailing slashes so an endpoint can be appended without doubling them.
///
/// ```
/// use mcphost::utils::url::normalize_base_url;
///
/// assert_eq!(normalize_base_url("http://localhost:11434/v1//"), "http://localhost:11434/v1");
/// ```
pub fn normalize_base_url(base_url: &str) -> String {
    base_url.trim_end_matches('/').to_string()
}

/// Joins a base URL and an endpoint path with exactly one slash between them.
///
/// ```
/// use mcphost::utils::url::construct_api_url;
///
/// assert_eq!(
///     construct_api_url("https://api.deepseek.com/", "/chat/completions"),
///     "https://api.deepseek.com/chat/completions"
/// );
/// ```
pub fn construct_api_url(base_url: &str, endpoint: &str) -> String {
    format!(
        "{}/{}",
        normalize_base_url(base_url),
        endpoint.trim_start_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_slashes_are_removed() {
        assert_eq!(
            normalize_base_url("https://api.openai.com/v1"),
            "https://api.openai.com/v1"
        );
        assert_eq!(
            normalize_base_url("https://api.openai.com/v1///"),
            "https://api.openai.com/v1"
        );
        assert_eq!(normalize_base_url("http://localhost/"), "http://localhost");
    }

    #[test]
    fn endpoint_join_never_doubles_slashes() {
        for base in ["http://localhost:11434/v1", "http://localhost:11434/v1/"] {
            for endpoint in ["chat/completions", "/chat/completions"] {
                assert_eq!(
                    construct_api_url(base, endpoint),
                    "http://localhost:11434/v1/chat/completions"
                );
            }
        }
    }
}
