//! Backslash-escaping of Markdown-significant characters in text nodes.
//!
//! Text copied from a page must not turn into Markdown syntax by accident:
//! a paragraph starting with `1. ` is not a list, a literal `*` is not
//! emphasis. Code text is never escaped.

use once_cell::sync::Lazy;
use regex::Regex;

/// Ordered escape rules. `^` anchors at the start of the text node.
static ESCAPES: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        (r"\\", r"\\"),
        (r"\*", r"\*"),
        (r"^-", r"\-"),
        (r"^\+ ", r"\+ "),
        (r"^(=+)", r"\${1}"),
        (r"^(#{1,6}) ", r"\${1} "),
        (r"`", r"\`"),
        (r"^~~~", r"\~~~"),
        (r"\[", r"\["),
        (r"\]", r"\]"),
        (r"^>", r"\>"),
        (r"_", r"\_"),
        (r"^(\d+)\. ", r"${1}\. "),
    ]
    .into_iter()
    .map(|(pattern, replacement)| (Regex::new(pattern).expect("static regex"), replacement))
    .collect()
});

/// Escape `text` so it renders literally.
pub fn escape_markdown(text: &str) -> String {
    ESCAPES
        .iter()
        .fold(text.to_string(), |acc, (re, replacement)| {
            re.replace_all(&acc, *replacement).into_owned()
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_untouched() {
        assert_eq!(escape_markdown("Hello, world."), "Hello, world.");
    }

    #[test]
    fn emphasis_characters() {
        assert_eq!(escape_markdown("a*b_c"), r"a\*b\_c");
    }

    #[test]
    fn backslash_first() {
        assert_eq!(escape_markdown(r"C:\dir"), r"C:\\dir");
    }

    #[test]
    fn line_start_markers() {
        assert_eq!(escape_markdown("- not a list"), r"\- not a list");
        assert_eq!(escape_markdown("1. not a list"), r"1\. not a list");
        assert_eq!(escape_markdown("## not a heading"), r"\## not a heading");
        assert_eq!(escape_markdown("> not a quote"), r"\> not a quote");
        assert_eq!(escape_markdown("=== underline"), r"\=== underline");
    }

    #[test]
    fn mid_text_markers_untouched() {
        assert_eq!(escape_markdown("a - b"), "a - b");
        assert_eq!(escape_markdown("step 1. go"), "step 1. go");
    }

    #[test]
    fn brackets_and_backticks() {
        assert_eq!(escape_markdown("[x] `y`"), r"\[x\] \`y\`");
    }
}
