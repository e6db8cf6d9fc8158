/// Truncates a string without cutting a UTF-8 character in half.
///
/// ```
/// use sfauth::utils::string_utils::truncate_safe;
///
/// assert_eq!(truncate_safe("Olá, mundo!", 3), "Ol");
/// ```
pub fn truncate_safe(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }

    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }

    &s[..end]
}

/// Shortens a secret for log output: first and last four characters.
///
/// Short values are fully hidden.
pub fn mask_token(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    if chars.len() <= 12 {
        return "****".to_string();
    }

    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}...{}", head, tail)
}
