//! Fenced code blocks and inline code spans.
//!
//! Both forms need a delimiter that cannot be confused with backticks that
//! are already part of the code. The delimiter length is computed from the
//! longest backtick run in the text, so these are pure functions of their
//! input.

/// Length of the longest run of consecutive backticks in `text`.
pub fn longest_backtick_run(text: &str) -> usize {
    let mut longest = 0;
    let mut current = 0;
    for c in text.chars() {
        if c == '`' {
            current += 1;
            longest = longest.max(current);
        } else {
            current = 0;
        }
    }
    longest
}

/// Opening/closing fence for a code block containing `code`.
///
/// At least three backticks, and always longer than any run inside the code.
pub fn fence_for(code: &str) -> String {
    "`".repeat((longest_backtick_run(code) + 1).max(3))
}

/// Delimiter for an inline code span containing `code`.
///
/// Starts at one backtick and grows until it is not a substring of `code`.
pub fn inline_delimiter(code: &str) -> String {
    let mut delimiter = String::from("`");
    while code.contains(&delimiter) {
        delimiter.push('`');
    }
    delimiter
}

/// Render a fenced code block from raw code text.
///
/// One trailing newline of the body is dropped so the closing fence sits
/// directly under the last line of code.
pub fn code_block(code: &str, language: Option<&str>) -> String {
    let fence = fence_for(code);
    let body = code.strip_suffix('\n').unwrap_or(code);
    format!(
        "\n\n{fence}{}\n{body}\n{fence}\n\n",
        language.unwrap_or_default()
    )
}

/// Render an inline code span.
///
/// Whitespace-only content renders as nothing.
pub fn inline_code(content: &str) -> String {
    if content.trim().is_empty() {
        return String::new();
    }
    let code = content.replace("\r\n", " ").replace(['\r', '\n'], " ");
    let delimiter = inline_delimiter(&code);
    let pad = if needs_padding(&code) { " " } else { "" };
    format!("{delimiter}{pad}{code}{pad}{delimiter}")
}

/// A padding space keeps the delimiter from fusing with backticks or
/// being stripped along with significant outer spaces.
fn needs_padding(code: &str) -> bool {
    code.starts_with('`')
        || code.ends_with('`')
        || (code.starts_with(' ') && code.ends_with(' ') && code.chars().any(|c| c != ' '))
}

/// Extract the language hint from a `class` attribute (`language-rust`).
pub fn language_from_class(class: Option<&str>) -> Option<&str> {
    class?
        .split_whitespace()
        .find_map(|token| token.strip_prefix("language-"))
        .filter(|lang| !lang.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn longest_run() {
        assert_eq!(longest_backtick_run(""), 0);
        assert_eq!(longest_backtick_run("a`b``c"), 2);
        assert_eq!(longest_backtick_run("`````"), 5);
    }

    #[test]
    fn fence_minimum_is_three() {
        assert_eq!(fence_for("fn main() {}"), "```");
        assert_eq!(fence_for("a `b` c"), "```");
    }

    #[test]
    fn fence_grows_past_embedded_fence() {
        assert_eq!(fence_for("```\nnested\n```"), "````");
        assert_eq!(fence_for("x ````` y"), "``````");
    }

    #[test]
    fn code_block_with_language() {
        let out = code_block("let x = 1;\n", Some("rust"));
        assert_eq!(out, "\n\n```rust\nlet x = 1;\n```\n\n");
    }

    #[test]
    fn code_block_trims_only_one_newline() {
        let out = code_block("a\n\n", None);
        assert_eq!(out, "\n\n```\na\n\n```\n\n");
    }

    #[test]
    fn inline_simple() {
        assert_eq!(inline_code("x + 1"), "`x + 1`");
    }

    #[test]
    fn inline_empty() {
        assert_eq!(inline_code(""), "");
        assert_eq!(inline_code("  \n "), "");
    }

    #[test]
    fn inline_newlines_become_spaces() {
        assert_eq!(inline_code("a\nb\r\nc"), "`a b c`");
    }

    #[test]
    fn inline_delimiter_grows() {
        assert_eq!(inline_code("a`b"), "``a`b``");
        assert_eq!(inline_code("a``b`c"), "```a``b`c```");
    }

    #[test]
    fn inline_padding() {
        assert_eq!(inline_code("`tick"), "`` `tick ``");
        assert_eq!(inline_code("tick`"), "`` tick` ``");
        assert_eq!(inline_code(" spaced "), "`  spaced  `");
        assert_eq!(inline_code("plain"), "`plain`");
    }

    #[test]
    fn language_hint() {
        assert_eq!(language_from_class(Some("hljs language-python")), Some("python"));
        assert_eq!(language_from_class(Some("language-")), None);
        assert_eq!(language_from_class(Some("highlight")), None);
        assert_eq!(language_from_class(None), None);
    }
}
