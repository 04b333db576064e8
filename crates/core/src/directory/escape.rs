//! Escaping of untrusted values for search filters and DNs.

/// Escape `\`, `(`, `)`, `*` and NUL as `\5c`, `\28`, `\29`, `\2a`, `\00`
/// (RFC 4515). Every other character passes through unchanged.
///
/// Must be applied exactly once to each untrusted value placed in a filter
/// string or in a constructed distinguished name.
pub fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '\\' => out.push_str(r"\5c"),
            '(' => out.push_str(r"\28"),
            ')' => out.push_str(r"\29"),
            '*' => out.push_str(r"\2a"),
            '\0' => out.push_str(r"\00"),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escapes_each_special_character() {
        assert_eq!(escape(r"\"), r"\5c");
        assert_eq!(escape("("), r"\28");
        assert_eq!(escape(")"), r"\29");
        assert_eq!(escape("*"), r"\2a");
        assert_eq!(escape("\0"), r"\00");
    }

    #[test]
    fn test_plain_text_untouched() {
        assert_eq!(escape("alice.smith-2"), "alice.smith-2");
        assert_eq!(escape("Zoë Ångström"), "Zoë Ångström");
        assert_eq!(escape(""), "");
    }

    #[test]
    fn test_single_pass() {
        // The backslash introduced for `*` must not be escaped again.
        assert_eq!(escape(r"a*b\c"), r"a\2ab\5cc");
        assert_eq!(escape("*)(uid=*"), r"\2a\29\28uid=\2a");
    }

    #[test]
    fn test_output_has_no_raw_specials() {
        let inputs = ["*", "(admin)", "x\0y", r"back\slash", "()*\\\0"];
        for input in inputs {
            let escaped = escape(input);
            assert!(!escaped.contains(['(', ')', '*', '\0']), "{escaped}");
            // Every remaining backslash starts a two-digit hex escape.
            for (i, _) in escaped.match_indices('\\') {
                let hex = &escaped[i + 1..i + 3];
                assert!(hex.chars().all(|c| c.is_ascii_hexdigit()), "{escaped}");
            }
        }
    }

    #[test]
    fn test_not_idempotent() {
        let once = escape("a*b");
        let twice = escape(&once);
        assert_ne!(once, twice);
        assert_eq!(twice, r"a\5c2ab");
    }
}
