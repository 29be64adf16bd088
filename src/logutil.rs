//! Log helpers for text typed by players or stored in templates.

/// Longest piece of user text copied into one log line.
const MAX_LOGGED_CHARS: usize = 200;

/// Keep user text on a single log line: control characters are shown as
/// escapes and anything past `MAX_LOGGED_CHARS` is cut off.
pub fn escape_log(text: &str) -> String {
    let mut out = String::with_capacity(text.len().min(MAX_LOGGED_CHARS) + 3);
    for (count, ch) in text.chars().enumerate() {
        if count == MAX_LOGGED_CHARS {
            out.push_str("...");
            break;
        }
        if ch.is_control() {
            out.extend(ch.escape_debug());
        } else {
            out.push(ch);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multi_line_templates_stay_on_one_line() {
        assert_eq!(escape_log("say hi\n@output done"), "say hi\\n@output done");
        assert_eq!(escape_log("a\tb\u{7}"), "a\\tb\\u{7}");
        assert_eq!(escape_log("plain \\ text"), "plain \\ text");
    }

    #[test]
    fn long_text_is_cut() {
        let long = "x".repeat(MAX_LOGGED_CHARS + 50);
        let escaped = escape_log(&long);
        assert!(escaped.ends_with("..."));
        assert_eq!(escaped.chars().count(), MAX_LOGGED_CHARS + 3);
    }
}
