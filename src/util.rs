//! Small helpers shared by the passes.

/// Can `s` be written as an unquoted identifier, ignoring case and reserved
/// words? PostgreSQL allows `$` after the first character.
pub fn is_simple_ident(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_identifiers() {
        assert!(is_simple_ident("g_counter"));
        assert!(is_simple_ident("v$total"));
        assert!(!is_simple_ident("$1"));
        assert!(!is_simple_ident("1st"));
        assert!(!is_simple_ident("last name"));
        assert!(!is_simple_ident(""));
    }
}
