/// Number of leading token characters shown in diagnostics
const TOKEN_PREVIEW_CHARS: usize = 20;

/// Truncate a string to a maximum length, adding ellipsis if needed
pub fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else if max_len <= 3 {
        s.chars().take(max_len).collect()
    } else {
        let truncated: String = s.chars().take(max_len - 3).collect();
        format!("{}...", truncated)
    }
}

/// Show only the start of a bearer token, for status output and logs
pub fn mask_token(token: Option<&str>) -> String {
    match token {
        None => "null".to_string(),
        Some("") => "(empty)".to_string(),
        Some(t) if t.chars().count() <= TOKEN_PREVIEW_CHARS => {
            format!("{}...", t.chars().take(t.chars().count() / 2).collect::<String>())
        }
        Some(t) => format!("{}...", t.chars().take(TOKEN_PREVIEW_CHARS).collect::<String>()),
    }
}
