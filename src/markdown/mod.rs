//! HTML → Markdown conversion.
//!
//! ## Why a hand-written walker?
//!
//! The output feeds two consumers with different needs: a language model
//! that only reads the text, and a block-based document store that splits
//! on Markdown structure. Both want the same thing: flat, predictable
//! Markdown with absolute links and no layout noise. A small rule table
//! over the parsed DOM gives that directly.
//!
//! ## Joining
//!
//! Every element renders to a string that may start or end with newlines.
//! Siblings are joined by [`join`], which keeps the larger of the two
//! newline runs (capped at one blank line) so block elements never stack
//! blank lines and inline runs never gain spurious breaks.
//!
//! The conversion is total: any input string, including malformed or empty
//! HTML, produces a string.

pub mod code;
mod escape;
pub mod postprocess;

pub use escape::escape_markdown;

use scraper::{ElementRef, Html, Node};
use url::Url;

/// Subtrees deeper than this are flattened to their text.
const MAX_DEPTH: usize = 512;

/// Elements whose content never reaches the output.
const SKIPPED: &[&str] = &[
    "script", "style", "noscript", "link", "head", "template", "meta", "iframe", "object",
    "svg", "canvas",
];

/// Elements rendered as a paragraph-separated block of their content.
const BLOCKS: &[&str] = &[
    "address",
    "article",
    "aside",
    "body",
    "center",
    "dd",
    "details",
    "dialog",
    "div",
    "dl",
    "dt",
    "fieldset",
    "figcaption",
    "figure",
    "footer",
    "form",
    "header",
    "hgroup",
    "html",
    "main",
    "menu",
    "nav",
    "section",
    "summary",
];

/// Convert an HTML document to Markdown, resolving relative links against
/// `base_url`.
///
/// # Example
/// ```rust
/// use edgequake_webclip::markdown::html_to_markdown;
///
/// let md = html_to_markdown(r#"<a href="/x">t</a>"#, "https://ex.com/");
/// assert_eq!(md, "[t](https://ex.com/x)");
/// ```
pub fn html_to_markdown(html: &str, base_url: &str) -> String {
    MarkdownConverter::new(base_url).convert(html)
}

/// Converter bound to one base URL.
#[derive(Debug, Clone)]
pub struct MarkdownConverter {
    base: Option<Url>,
}

#[derive(Debug, Clone, Copy, Default)]
struct Context {
    in_code: bool,
    depth: usize,
}

impl Context {
    fn deeper(self) -> Self {
        Self {
            depth: self.depth + 1,
            ..self
        }
    }
}

impl MarkdownConverter {
    /// An unparseable base URL is tolerated: only absolute hrefs resolve.
    pub fn new(base_url: &str) -> Self {
        Self {
            base: Url::parse(base_url).ok(),
        }
    }

    pub fn convert(&self, html: &str) -> String {
        let document = Html::parse_document(html);
        let raw = self.render_element(document.root_element(), Context::default());
        postprocess::polish(&raw)
    }

    fn resolve(&self, href: &str) -> Option<Url> {
        match &self.base {
            Some(base) => base.join(href).ok(),
            None => Url::parse(href).ok(),
        }
    }

    // ── Tree walk ────────────────────────────────────────────────────────────

    fn render_children(&self, el: ElementRef<'_>, ctx: Context) -> String {
        let mut out = String::new();
        for child in el.children() {
            match child.value() {
                Node::Text(text) => {
                    join(&mut out, &render_text(text, ctx));
                }
                Node::Element(_) => {
                    if let Some(child_el) = ElementRef::wrap(child) {
                        join(&mut out, &self.render_element(child_el, ctx.deeper()));
                    }
                }
                _ => {}
            }
        }
        out
    }

    fn render_element(&self, el: ElementRef<'_>, ctx: Context) -> String {
        let name = el.value().name();
        if SKIPPED.contains(&name) {
            return String::new();
        }
        if ctx.depth > MAX_DEPTH {
            return render_text(&el.text().collect::<String>(), ctx);
        }
        match name {
            "a" => self.render_link(el, ctx),
            "ul" | "ol" => self.render_list(el, ctx),
            "li" => self.render_list_item(el, ctx, "- "),
            "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => self.render_heading(el, ctx),
            "code" | "kbd" | "samp" | "tt" => self.render_code(el, ctx),
            "pre" => self.render_pre(el, ctx),
            "p" => block(self.render_children(el, ctx).trim()),
            "br" => "  \n".to_string(),
            "hr" => "\n\n---\n\n".to_string(),
            "em" | "i" | "cite" | "dfn" => wrap_inline(&self.render_children(el, ctx), "_"),
            "strong" | "b" => wrap_inline(&self.render_children(el, ctx), "**"),
            "del" | "s" | "strike" => wrap_inline(&self.render_children(el, ctx), "~~"),
            "img" => self.render_image(el),
            "blockquote" => self.render_blockquote(el, ctx),
            "table" => self.render_table(el, ctx),
            _ if BLOCKS.contains(&name) => block(&self.render_children(el, ctx)),
            _ => self.render_children(el, ctx),
        }
    }

    // ── Rules ────────────────────────────────────────────────────────────────

    fn render_link(&self, el: ElementRef<'_>, ctx: Context) -> String {
        let content = self.render_children(el, ctx);
        let href = el.value().attr("href").map(str::trim).unwrap_or_default();
        if href.is_empty() {
            return content;
        }
        let Some(target) = self.resolve(href) else {
            return content;
        };
        let text = collapse_whitespace(&content);
        let text = text.trim();
        if text.is_empty() {
            return String::new();
        }
        format!("[{text}]({target})")
    }

    fn render_list(&self, el: ElementRef<'_>, ctx: Context) -> String {
        let mut markers = ListMarkers::for_list(el);
        let mut content = String::new();
        for child in el.children() {
            match child.value() {
                Node::Text(text) => join(&mut content, &render_text(text, ctx)),
                Node::Element(_) => {
                    let Some(child_el) = ElementRef::wrap(child) else {
                        continue;
                    };
                    let rendered = if child_el.value().name() == "li" && ctx.depth < MAX_DEPTH {
                        let marker = markers.next_marker();
                        self.render_list_item(child_el, ctx.deeper(), &marker)
                    } else {
                        self.render_element(child_el, ctx.deeper())
                    };
                    join(&mut content, &rendered);
                }
                _ => {}
            }
        }
        if content.trim().is_empty() {
            return String::new();
        }
        let closes_item = parent_element(el).is_some_and(|parent| {
            parent.value().name() == "li"
                && parent
                    .children()
                    .filter_map(ElementRef::wrap)
                    .last()
                    .is_some_and(|last| last.id() == el.id())
        });
        if closes_item {
            format!("\n{content}")
        } else {
            format!("\n\n{content}\n\n")
        }
    }

    fn render_list_item(&self, el: ElementRef<'_>, ctx: Context, marker: &str) -> String {
        let content = self.render_children(el, ctx);
        let body = content.trim();
        if body.is_empty() {
            return String::new();
        }
        let mut out = marker.to_string();
        for (i, line) in body.split('\n').enumerate() {
            if i > 0 {
                out.push('\n');
                if !line.trim().is_empty() {
                    out.push_str("  ");
                }
            }
            out.push_str(line);
        }
        out.push('\n');
        out
    }

    fn render_heading(&self, el: ElementRef<'_>, ctx: Context) -> String {
        let level = el.value().name()[1..].parse::<usize>().unwrap_or(1);
        let content = self.render_children(el, ctx);
        let text = content
            .split('\n')
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        if text.is_empty() {
            return String::new();
        }
        format!("\n\n{} {text}\n\n", "#".repeat(level))
    }

    fn render_code(&self, el: ElementRef<'_>, ctx: Context) -> String {
        if has_ancestor(el, "pre") {
            let text: String = el.text().collect();
            if text.trim().is_empty() {
                return String::new();
            }
            return code::code_block(&text, code::language_from_class(el.value().attr("class")));
        }
        let content = self.render_children(
            el,
            Context {
                in_code: true,
                ..ctx
            },
        );
        code::inline_code(&content)
    }

    fn render_pre(&self, el: ElementRef<'_>, ctx: Context) -> String {
        let outermost_code: Vec<ElementRef<'_>> = el
            .descendants()
            .filter_map(ElementRef::wrap)
            .filter(|d| d.id() != el.id() && d.value().name() == "code")
            .filter(|d| {
                !d.ancestors()
                    .filter_map(ElementRef::wrap)
                    .take_while(|a| a.id() != el.id())
                    .any(|a| a.value().name() == "code")
            })
            .collect();

        if outermost_code.is_empty() {
            let text: String = el.text().collect();
            if text.trim().is_empty() {
                return String::new();
            }
            return code::code_block(&text, code::language_from_class(el.value().attr("class")));
        }

        let mut out = String::new();
        for code_el in outermost_code {
            join(&mut out, &self.render_code(code_el, ctx));
        }
        out
    }

    fn render_image(&self, el: ElementRef<'_>) -> String {
        let src = el.value().attr("src").map(str::trim).unwrap_or_default();
        if src.is_empty() {
            return String::new();
        }
        let Some(target) = self.resolve(src) else {
            return String::new();
        };
        if target.scheme() == "data" {
            return String::new();
        }
        let alt = collapse_whitespace(el.value().attr("alt").unwrap_or_default());
        let alt = alt.trim().replace('[', "\\[").replace(']', "\\]");
        format!("![{alt}]({target})")
    }

    fn render_blockquote(&self, el: ElementRef<'_>, ctx: Context) -> String {
        let content = self.render_children(el, ctx);
        let inner = content.trim();
        if inner.is_empty() {
            return String::new();
        }
        let quoted = inner
            .split('\n')
            .map(|line| {
                if line.is_empty() {
                    ">".to_string()
                } else {
                    format!("> {line}")
                }
            })
            .collect::<Vec<_>>()
            .join("\n");
        format!("\n\n{quoted}\n\n")
    }

    fn render_table(&self, table: ElementRef<'_>, ctx: Context) -> String {
        let rows: Vec<Vec<String>> = table_rows(table)
            .into_iter()
            .map(|row| {
                row.children()
                    .filter_map(ElementRef::wrap)
                    .filter(|cell| matches!(cell.value().name(), "td" | "th"))
                    .map(|cell| table_cell(&self.render_children(cell, ctx.deeper())))
                    .collect::<Vec<_>>()
            })
            .filter(|cells| !cells.is_empty())
            .collect();

        let width = rows.iter().map(Vec::len).max().unwrap_or(0);
        if width == 0 {
            return String::new();
        }

        let mut lines = Vec::with_capacity(rows.len() + 1);
        for (i, row) in rows.into_iter().enumerate() {
            let mut cells = row;
            cells.resize(width, String::new());
            lines.push(format!("| {} |", cells.join(" | ")));
            if i == 0 {
                lines.push(format!("| {} |", vec!["---"; width].join(" | ")));
            }
        }
        format!("\n\n{}\n\n", lines.join("\n"))
    }
}

// ── Joining ──────────────────────────────────────────────────────────────────

/// Append `piece` to `out`, merging the newline runs at the seam.
fn join(out: &mut String, piece: &str) {
    if piece.is_empty() {
        return;
    }
    if piece.chars().all(|c| c == ' ') {
        if !out.is_empty() && !out.ends_with([' ', '\n']) {
            out.push(' ');
        }
        return;
    }

    let mut piece = piece;
    if piece.trim_start_matches(' ').starts_with('\n') {
        let kept = out.trim_end_matches([' ', '\t']).len();
        out.truncate(kept);
    } else if out.is_empty() || out.ends_with([' ', '\n']) {
        piece = piece.trim_start_matches(' ');
    }

    let out_body = out.trim_end_matches('\n').len();
    let trailing = out.len() - out_body;
    let piece_body = piece.trim_start_matches('\n');
    let leading = piece.len() - piece_body.len();
    let separator = trailing.max(leading).min(2);

    out.truncate(out_body);
    if !out.is_empty() {
        out.extend(std::iter::repeat_n('\n', separator));
    }
    out.push_str(piece_body);
}

fn block(content: &str) -> String {
    if content.trim().is_empty() {
        String::new()
    } else {
        format!("\n\n{content}\n\n")
    }
}

/// Wrap inline content in `delimiter`, moving flanking whitespace outside.
fn wrap_inline(content: &str, delimiter: &str) -> String {
    let inner = content.trim();
    if inner.is_empty() {
        return if content.is_empty() {
            String::new()
        } else {
            " ".to_string()
        };
    }
    let lead = if content.starts_with(char::is_whitespace) { " " } else { "" };
    let trail = if content.ends_with(char::is_whitespace) { " " } else { "" };
    format!("{lead}{delimiter}{inner}{delimiter}{trail}")
}

// ── Text ─────────────────────────────────────────────────────────────────────

fn render_text(text: &str, ctx: Context) -> String {
    let collapsed = collapse_whitespace(text);
    if ctx.in_code {
        collapsed
    } else {
        escape_markdown(&collapsed)
    }
}

/// Collapse runs of HTML whitespace (and line breaks) to a single space.
fn collapse_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_space = false;
    for c in text.chars() {
        if matches!(c, ' ' | '\t' | '\n' | '\r' | '\x0C') {
            if !in_space {
                out.push(' ');
            }
            in_space = true;
        } else {
            out.push(c);
            in_space = false;
        }
    }
    out
}

// ── DOM helpers ──────────────────────────────────────────────────────────────

fn parent_element(el: ElementRef<'_>) -> Option<ElementRef<'_>> {
    el.parent().and_then(ElementRef::wrap)
}

fn has_ancestor(el: ElementRef<'_>, name: &str) -> bool {
    el.ancestors()
        .filter_map(ElementRef::wrap)
        .any(|a| a.value().name() == name)
}

/// Item markers of one list: `"- "` for unordered lists, `"{n}. "` for
/// ordered ones, counting from the list's `start` (default 1). Every `li`
/// takes a number, including empty ones.
struct ListMarkers {
    next: Option<i64>,
}

impl ListMarkers {
    fn for_list(list: ElementRef<'_>) -> Self {
        let next = (list.value().name() == "ol").then(|| {
            list.value()
                .attr("start")
                .and_then(|s| s.trim().parse::<i64>().ok())
                .unwrap_or(1)
        });
        Self { next }
    }

    fn next_marker(&mut self) -> String {
        match self.next.as_mut() {
            None => "- ".to_string(),
            Some(n) => {
                let marker = format!("{n}. ");
                *n = n.saturating_add(1);
                marker
            }
        }
    }
}

fn table_rows(table: ElementRef<'_>) -> Vec<ElementRef<'_>> {
    let mut rows = Vec::new();
    for child in table.children().filter_map(ElementRef::wrap) {
        match child.value().name() {
            "tr" => rows.push(child),
            "thead" | "tbody" | "tfoot" => rows.extend(
                child
                    .children()
                    .filter_map(ElementRef::wrap)
                    .filter(|r| r.value().name() == "tr"),
            ),
            _ => {}
        }
    }
    rows
}

fn table_cell(content: &str) -> String {
    content
        .split('\n')
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
        .replace('|', "\\|")
}
