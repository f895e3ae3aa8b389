//! Sanitizing upstream response bodies before they reach logs or tool errors
//!
//! Upstream error bodies can be whole HTML pages or echo request data back, so they are
//! flattened to one line and cut short.

/// Maximum number of bytes kept from an upstream body.
pub const TRUNCATE_LIMIT: usize = 256;

/// MSRV-compatible replacement for `str::floor_char_boundary` (stable since 1.91.0).
fn floor_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Collapse whitespace runs (including newlines) into single spaces.
fn single_line(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Flatten `s` to one line and keep at most [`TRUNCATE_LIMIT`] bytes of it.
pub fn truncate_for_log(s: &str) -> String {
    let flat = single_line(s);
    if flat.len() <= TRUNCATE_LIMIT {
        flat
    } else {
        format!(
            "{}... [truncated, total {} bytes]",
            &flat[..floor_char_boundary(&flat, TRUNCATE_LIMIT)],
            flat.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_body_is_kept() {
        assert_eq!(truncate_for_log("invalid vat number"), "invalid vat number");
    }

    #[test]
    fn newlines_are_flattened() {
        assert_eq!(
            truncate_for_log("<html>\n  <body>oops</body>\n</html>"),
            "<html> <body>oops</body> </html>"
        );
    }

    #[test]
    fn long_body_is_cut() {
        let s = "x".repeat(TRUNCATE_LIMIT + 44);
        let result = truncate_for_log(&s);
        assert!(result.ends_with("... [truncated, total 300 bytes]"));
        assert!(result.starts_with(&"x".repeat(TRUNCATE_LIMIT)));
    }

    #[test]
    fn multibyte_boundary_is_respected() {
        let s = "ő".repeat(200);
        let result = truncate_for_log(&s);
        assert!(result.contains("... [truncated"));
    }
}
