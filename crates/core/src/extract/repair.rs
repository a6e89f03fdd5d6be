//! # JSON Repair
//!
//! Repairs the two defects generators produce most often: trailing commas
//! and raw control characters / stray backslashes inside string literals.
//!
//! The string repair is a three-state scanner over an immutable input that
//! writes a fresh output buffer:
//!
//! ```text
//!            '"'                     '\\' + valid escape
//!  Outside ───────▶ InString ─────────────────────────▶ AfterEscape
//!     ▲                │  ▲                                  │
//!     └────── '"' ─────┘  └──────── next char copied ────────┘
//! ```

use regex::Regex;
use std::sync::OnceLock;

fn trailing_comma_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r",(\s*[}\]])").expect("static regex"))
}

/// Pass A: delete a comma that sits directly before a closing `}` or `]`
pub fn strip_trailing_commas(text: &str) -> String {
    trailing_comma_re().replace_all(text, "$1").into_owned()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    Outside,
    InString,
    AfterEscape,
}

/// Escape characters accepted after a backslash, besides `u`
const SIMPLE_ESCAPES: [char; 8] = ['"', '\\', '/', 'b', 'f', 'n', 'r', 't'];

/// Pass B: rewrite string literals so they strict-parse
pub fn escape_string_literals(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len() + 16);
    let mut state = ScanState::Outside;

    for (i, &c) in chars.iter().enumerate() {
        state = match state {
            ScanState::Outside => {
                out.push(c);
                if c == '"' {
                    ScanState::InString
                } else {
                    ScanState::Outside
                }
            }
            ScanState::AfterEscape => {
                out.push(c);
                ScanState::InString
            }
            ScanState::InString => match c {
                '"' => {
                    out.push('"');
                    ScanState::Outside
                }
                '\\' if is_valid_escape(&chars, i + 1) => {
                    out.push('\\');
                    ScanState::AfterEscape
                }
                '\\' => {
                    out.push_str("\\\\");
                    ScanState::InString
                }
                '\n' => push_escaped(&mut out, "\\n"),
                '\r' => push_escaped(&mut out, "\\r"),
                '\t' => push_escaped(&mut out, "\\t"),
                '\u{08}' => push_escaped(&mut out, "\\b"),
                '\u{0c}' => push_escaped(&mut out, "\\f"),
                c if (c as u32) < 0x20 => {
                    out.push_str(&format!("\\u{:04x}", c as u32));
                    ScanState::InString
                }
                c => {
                    out.push(c);
                    ScanState::InString
                }
            },
        };
    }

    out
}

fn push_escaped(out: &mut String, escaped: &str) -> ScanState {
    out.push_str(escaped);
    ScanState::InString
}

/// Whether the character at `at` completes a recognised escape sequence
fn is_valid_escape(chars: &[char], at: usize) -> bool {
    match chars.get(at) {
        Some(c) if SIMPLE_ESCAPES.contains(c) => true,
        Some('u') => {
            chars.len() > at + 4 && chars[at + 1..=at + 4].iter().all(|h| h.is_ascii_hexdigit())
        }
        _ => false,
    }
}

/// Drop every control character other than ordinary whitespace
pub fn strip_control_chars(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_control() || matches!(c, '\n' | '\r' | '\t'))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trailing_comma_object() {
        assert_eq!(strip_trailing_commas(r#"{"a": 1,}"#), r#"{"a": 1}"#);
    }

    #[test]
    fn test_trailing_comma_array_with_whitespace() {
        assert_eq!(
            strip_trailing_commas("{\"a\": [1, 2,\n  ]}"),
            "{\"a\": [1, 2\n  ]}"
        );
    }

    #[test]
    fn test_raw_newline_escaped() {
        let repaired = escape_string_literals("{\"a\": \"line one\nline two\"}");
        assert_eq!(repaired, r#"{"a": "line one\nline two"}"#);
    }

    #[test]
    fn test_newline_outside_string_untouched() {
        let input = "{\n  \"a\": 1\n}";
        assert_eq!(escape_string_literals(input), input);
    }

    #[test]
    fn test_other_control_chars_become_unicode_escapes() {
        let repaired = escape_string_literals("{\"a\": \"x\u{01}y\"}");
        assert_eq!(repaired, r#"{"a": "x\u0001y"}"#);
    }

    #[test]
    fn test_valid_escapes_preserved() {
        let input = r#"{"a": "quote \" slash \\ tab \t unicode \u00e9"}"#;
        assert_eq!(escape_string_literals(input), input);
    }

    #[test]
    fn test_invalid_escape_doubled() {
        let repaired = escape_string_literals(r#"{"path": "C:\data\x"}"#);
        assert_eq!(repaired, r#"{"path": "C:\\data\\x"}"#);
    }

    #[test]
    fn test_escaped_quote_does_not_close_string() {
        let repaired = escape_string_literals("{\"a\": \"say \\\"hi\\\"\nnow\"}");
        assert_eq!(repaired, r#"{"a": "say \"hi\"\nnow"}"#);
    }

    #[test]
    fn test_short_unicode_escape_is_doubled() {
        let repaired = escape_string_literals(r#"{"a": "\u12"}"#);
        assert_eq!(repaired, r#"{"a": "\\u12"}"#);
    }

    #[test]
    fn test_scanner_is_idempotent() {
        let once = escape_string_literals("{\"a\": \"x\ny\\q\u{02}\"}");
        assert_eq!(escape_string_literals(&once), once);
    }

    #[test]
    fn test_strip_control_chars_keeps_whitespace() {
        assert_eq!(strip_control_chars("a\u{00}b\nc\td"), "ab\nc\td");
    }
}
