//! Post-processing: deterministic cleanup of generated Markdown.
//!
//! ## Why a separate pass?
//!
//! The converter joins rendered fragments locally: each element only sees
//! its own output and that of its neighbours. Whole-document concerns, such
//! as runs of blank lines left behind by empty containers or invisible
//! Unicode copied from the page, are cheaper to fix once at the end.
//!
//! Every rule is fence-aware: lines inside a fenced code block are code and
//! pass through untouched.
//!
//! ## Rule Order
//!
//! Line endings are normalised first so that every later rule can split on
//! `\n`. Whitespace-only lines are blanked before blank runs are collapsed,
//! otherwise a line holding a single space would separate two "blank" lines.

use once_cell::sync::Lazy;
use regex::Regex;

/// Apply all cleanup rules to converter output.
///
/// Rules (applied in order):
/// 1. Normalise line endings (CRLF → LF)
/// 2. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens)
/// 3. Blank out whitespace-only lines
/// 4. Collapse runs of blank lines down to one
/// 5. Trim leading newlines and trailing whitespace of the document
pub fn polish(input: &str) -> String {
    let s = normalise_line_endings(input);
    let s = remove_invisible_chars(&s);
    let s = blank_whitespace_lines(&s);
    let s = collapse_blank_lines(&s);
    trim_document(&s)
}

/// Clean a model completion before it is published.
///
/// Models sometimes wrap the whole answer in a ` ```markdown ` fence even
/// when asked not to; the wrapper is removed and the result polished.
pub fn clean_extracted(input: &str) -> String {
    polish(&strip_markdown_fences(input))
}

// ── Fence tracking ───────────────────────────────────────────────────────────

/// Tracks whether the current line is inside a fenced code block.
#[derive(Debug, Default)]
struct FenceTracker {
    open: Option<usize>,
}

impl FenceTracker {
    /// Feed one line. Returns true if the line is code (a fence line or a
    /// line inside a fence).
    fn observe(&mut self, line: &str) -> bool {
        let trimmed = line.trim_start();
        let run = trimmed.chars().take_while(|&c| c == '`').count();
        match self.open {
            Some(open) => {
                if run >= open && trimmed[run..].trim().is_empty() {
                    self.open = None;
                }
                true
            }
            // A backtick fence's info string cannot hold backticks; such a
            // line is an inline code span.
            None if run >= 3 && !trimmed[run..].contains('`') => {
                self.open = Some(run);
                true
            }
            None => false,
        }
    }
}

/// Apply `rule` to every line outside fenced code; `None` drops the line.
fn map_prose_lines<F>(input: &str, mut rule: F) -> String
where
    F: FnMut(&str) -> Option<String>,
{
    let mut fences = FenceTracker::default();
    let mut out: Vec<String> = Vec::new();
    for line in input.split('\n') {
        if fences.observe(line) {
            out.push(line.to_string());
        } else if let Some(kept) = rule(line) {
            out.push(kept);
        }
    }
    out.join("\n")
}

// ── Rule 0: Strip outer markdown fences ──────────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:markdown|md)?\n(.*)\n```\s*$").expect("static regex"));

fn strip_markdown_fences(input: &str) -> String {
    let trimmed = input.trim();
    match RE_OUTER_FENCES.captures(trimmed) {
        // An inner fence means the outer pair is not a wrapper.
        Some(caps) if !caps[1].contains("\n```") => caps[1].to_string(),
        _ => input.to_string(),
    }
}

// ── Rule 1: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 2: Remove invisible Unicode characters ──────────────────────────────

const INVISIBLE: [char; 6] = [
    '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
];

fn remove_invisible_chars(input: &str) -> String {
    map_prose_lines(input, |line| Some(line.replace(INVISIBLE, "")))
}

// ── Rule 3: Blank out whitespace-only lines ──────────────────────────────────

fn blank_whitespace_lines(input: &str) -> String {
    map_prose_lines(input, |line| {
        if line.trim().is_empty() {
            Some(String::new())
        } else {
            Some(line.to_string())
        }
    })
}

// ── Rule 4: Collapse excessive blank lines ───────────────────────────────────

fn collapse_blank_lines(input: &str) -> String {
    let mut previous_blank = false;
    map_prose_lines(input, |line| {
        let blank = line.is_empty();
        let keep = !(blank && previous_blank);
        previous_blank = blank;
        keep.then(|| line.to_string())
    })
}

// ── Rule 5: Trim the document ────────────────────────────────────────────────

fn trim_document(input: &str) -> String {
    input
        .trim_start_matches(['\n', '\t'])
        .trim_end()
        .to_string()
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_fences() {
        let input = "```markdown\n# Hello\nWorld\n```";
        assert_eq!(strip_markdown_fences(input), "# Hello\nWorld");
    }

    #[test]
    fn test_strip_fences_keeps_real_code_block() {
        let input = "```\nfn a() {}\n```\n\ntext\n\n```\nfn b() {}\n```";
        assert_eq!(strip_markdown_fences(input), input);
    }

    #[test]
    fn test_no_fences_passthrough() {
        let input = "# Hello\nWorld";
        assert_eq!(strip_markdown_fences(input), "# Hello\nWorld");
    }

    #[test]
    fn test_normalise_line_endings() {
        assert_eq!(normalise_line_endings("a\r\nb\rc"), "a\nb\nc");
    }

    #[test]
    fn test_collapse_blank_lines() {
        assert_eq!(collapse_blank_lines("a\n\n\n\n\n\nb"), "a\n\nb");
    }

    #[test]
    fn test_collapse_skips_code() {
        let input = "```\na\n\n\n\nb\n```";
        assert_eq!(collapse_blank_lines(input), input);
    }

    #[test]
    fn test_inline_span_at_line_start_is_not_a_fence() {
        let input = "``` ``x ``` tail\n\n\n\na\u{200B}b";
        assert_eq!(polish(input), "``` ``x ``` tail\n\nab");
    }

    #[test]
    fn test_whitespace_lines_blanked() {
        assert_eq!(blank_whitespace_lines("a\n   \nb"), "a\n\nb");
        assert_eq!(blank_whitespace_lines("```\n   \n```"), "```\n   \n```");
    }

    #[test]
    fn test_remove_invisible() {
        let input = "hello\u{200B}world\u{FEFF}foo\u{00AD}bar";
        assert_eq!(remove_invisible_chars(input), "helloworldfoobar");
    }

    #[test]
    fn test_longer_fence_not_closed_by_shorter() {
        let input = "````\n```\n\n\n\n````\n\n\n\nafter";
        assert_eq!(polish(input), "````\n```\n\n\n\n````\n\nafter");
    }

    #[test]
    fn test_polish_trims() {
        assert_eq!(polish("\n\n[t](https://ex.com/x)\n\n"), "[t](https://ex.com/x)");
        assert_eq!(polish("\n \n"), "");
    }

    #[test]
    fn test_clean_extracted() {
        let input = "```markdown\n# Title\r\n\r\n\r\n\r\nBody  \n```";
        assert_eq!(clean_extracted(input), "# Title\n\nBody");
    }
}
