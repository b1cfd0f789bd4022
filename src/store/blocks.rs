//! Markdown → document blocks.
//!
//! Block-based knowledge bases do not store Markdown; they store a list of
//! typed blocks, each holding rich-text spans of bounded length with their
//! own link and annotations. This module parses converter output with
//! `pulldown-cmark` and folds the event stream into such blocks, so escapes
//! are resolved and inline code, emphasis and links survive as styling
//! instead of literal delimiters.
//!
//! Nested list items are flattened to sibling blocks. Table rows become
//! paragraphs with ` | ` between cells.

use pulldown_cmark::{CodeBlockKind, Event, Options, Parser, Tag, TagEnd};
use serde_json::{json, Map, Value};

/// Longest text run a single rich-text object may carry.
pub const MAX_RICH_TEXT_CHARS: usize = 2000;

// ── Rich text ────────────────────────────────────────────────────────────────

/// Inline styling carried by one span.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Annotations {
    pub bold: bool,
    pub italic: bool,
    pub strikethrough: bool,
    pub code: bool,
}

impl Annotations {
    pub const CODE: Annotations = Annotations {
        bold: false,
        italic: false,
        strikethrough: false,
        code: true,
    };

    fn is_plain(&self) -> bool {
        *self == Annotations::default()
    }
}

/// A run of text sharing one link target and one set of annotations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Span {
    pub text: String,
    pub link: Option<String>,
    pub annotations: Annotations,
}

/// The inline content of a block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RichText(pub Vec<Span>);

impl RichText {
    pub fn plain(text: impl Into<String>) -> Self {
        let mut rich = RichText::default();
        rich.push(&text.into(), None, Annotations::default());
        rich
    }

    /// Append text, merging into the last span when the styling matches.
    pub fn push(&mut self, text: &str, link: Option<&str>, annotations: Annotations) {
        if text.is_empty() {
            return;
        }
        if let Some(last) = self.0.last_mut() {
            if last.link.as_deref() == link && last.annotations == annotations {
                last.text.push_str(text);
                return;
            }
        }
        self.0.push(Span {
            text: text.to_string(),
            link: link.map(str::to_string),
            annotations,
        });
    }

    pub fn append(&mut self, other: RichText) {
        for span in other.0 {
            self.push(&span.text, span.link.as_deref(), span.annotations);
        }
    }

    /// The text with all styling dropped.
    pub fn text(&self) -> String {
        self.0.iter().map(|span| span.text.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|span| span.text.is_empty())
    }

    /// Remove whitespace at both edges, dropping spans left empty.
    fn trim(&mut self) {
        while let Some(first) = self.0.first_mut() {
            let trimmed = first.text.trim_start();
            if trimmed.is_empty() {
                self.0.remove(0);
                continue;
            }
            first.text = trimmed.to_string();
            break;
        }
        while let Some(last) = self.0.last_mut() {
            let len = last.text.trim_end().len();
            if len == 0 {
                self.0.pop();
                continue;
            }
            last.text.truncate(len);
            break;
        }
    }

    /// Rich-text objects for the Notion API, each at most
    /// [`MAX_RICH_TEXT_CHARS`] long.
    pub fn to_json(&self) -> Vec<Value> {
        self.0.iter().flat_map(span_json).collect()
    }
}

impl From<&str> for RichText {
    fn from(text: &str) -> Self {
        RichText::plain(text)
    }
}

fn span_json(span: &Span) -> Vec<Value> {
    let chars: Vec<char> = span.text.chars().collect();
    chars
        .chunks(MAX_RICH_TEXT_CHARS)
        .map(|chunk| {
            let content: String = chunk.iter().collect();
            let mut text = Map::new();
            text.insert("content".into(), json!(content));
            if let Some(url) = &span.link {
                text.insert("link".into(), json!({ "url": url }));
            }
            let mut object = Map::new();
            object.insert("type".into(), json!("text"));
            object.insert("text".into(), Value::Object(text));
            if !span.annotations.is_plain() {
                let a = span.annotations;
                object.insert(
                    "annotations".into(),
                    json!({
                        "bold": a.bold,
                        "italic": a.italic,
                        "strikethrough": a.strikethrough,
                        "code": a.code,
                    }),
                );
            }
            Value::Object(object)
        })
        .collect()
}

/// Split unstyled `text` into rich-text runs of at most
/// [`MAX_RICH_TEXT_CHARS`].
pub fn rich_text(text: &str) -> Vec<Value> {
    RichText::plain(text).to_json()
}

// ── Blocks ───────────────────────────────────────────────────────────────────

/// One destination block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    Heading { level: u8, text: RichText },
    Paragraph(RichText),
    Bulleted(RichText),
    Numbered(RichText),
    Quote(RichText),
    Code { language: Option<String>, text: String },
    Image { url: String },
    Divider,
}

impl Block {
    /// JSON representation accepted by the Notion block API.
    pub fn to_json(&self) -> Value {
        let (kind, body) = match self {
            Block::Heading { level, text } => {
                let kind = match level {
                    1 => "heading_1",
                    2 => "heading_2",
                    _ => "heading_3",
                };
                (kind, json!({ "rich_text": text.to_json() }))
            }
            Block::Paragraph(text) => ("paragraph", json!({ "rich_text": text.to_json() })),
            Block::Bulleted(text) => (
                "bulleted_list_item",
                json!({ "rich_text": text.to_json() }),
            ),
            Block::Numbered(text) => (
                "numbered_list_item",
                json!({ "rich_text": text.to_json() }),
            ),
            Block::Quote(text) => ("quote", json!({ "rich_text": text.to_json() })),
            Block::Code { language, text } => (
                "code",
                json!({
                    "rich_text": rich_text(text),
                    "language": notion_language(language.as_deref()),
                }),
            ),
            Block::Image { url } => (
                "image",
                json!({ "type": "external", "external": { "url": url } }),
            ),
            Block::Divider => ("divider", json!({})),
        };
        let mut block = Map::new();
        block.insert("object".into(), json!("block"));
        block.insert("type".into(), json!(kind));
        block.insert(kind.to_string(), body);
        Value::Object(block)
    }
}

// ── Parsing ──────────────────────────────────────────────────────────────────

/// Parse converter Markdown into blocks.
pub fn markdown_to_blocks(markdown: &str) -> Vec<Block> {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);

    let mut builder = BlockBuilder::default();
    for event in Parser::new_ext(markdown, options) {
        builder.event(event);
    }
    builder.finish()
}

/// An open block container. `emitted` records whether it already produced
/// its leading block.
#[derive(Debug, Clone, Copy)]
enum Container {
    Item { ordered: bool, emitted: bool },
    Quote { emitted: bool },
}

#[derive(Default)]
struct BlockBuilder {
    blocks: Vec<Block>,
    inline: RichText,
    containers: Vec<Container>,
    /// Ordered flag of each open list.
    lists: Vec<bool>,
    heading: Option<u8>,
    code: Option<(Option<String>, String)>,
    link: Option<String>,
    bold: usize,
    italic: usize,
    strikethrough: usize,
    image: usize,
    cells: usize,
}

impl BlockBuilder {
    fn event(&mut self, event: Event<'_>) {
        match event {
            Event::Start(tag) => self.start(tag),
            Event::End(tag) => self.end(tag),
            Event::Text(text) => {
                if let Some((_, body)) = self.code.as_mut() {
                    body.push_str(&text);
                } else {
                    self.text(&text, false);
                }
            }
            Event::Code(text) => self.text(&text, true),
            Event::Html(text) | Event::InlineHtml(text) => self.text(&text, false),
            Event::SoftBreak => self.text(" ", false),
            Event::HardBreak => self.text("\n", false),
            Event::Rule => {
                self.flush();
                self.blocks.push(Block::Divider);
            }
            _ => {}
        }
    }

    fn start(&mut self, tag: Tag<'_>) {
        match tag {
            Tag::Heading { level, .. } => {
                self.flush();
                self.heading = Some(level as u8);
            }
            Tag::BlockQuote { .. } => {
                self.flush();
                self.containers.push(Container::Quote { emitted: false });
            }
            Tag::List(first) => {
                self.flush();
                self.lists.push(first.is_some());
            }
            Tag::Item => {
                self.flush();
                let ordered = self.lists.last().copied().unwrap_or(false);
                self.containers.push(Container::Item {
                    ordered,
                    emitted: false,
                });
            }
            Tag::CodeBlock(kind) => {
                self.flush();
                let language = match kind {
                    CodeBlockKind::Fenced(info) => {
                        info.split_whitespace().next().map(str::to_string)
                    }
                    CodeBlockKind::Indented => None,
                };
                self.code = Some((language, String::new()));
            }
            Tag::TableHead | Tag::TableRow => self.cells = 0,
            Tag::TableCell => {
                if self.cells > 0 {
                    self.text(" | ", false);
                }
                self.cells += 1;
            }
            Tag::Emphasis => self.italic += 1,
            Tag::Strong => self.bold += 1,
            Tag::Strikethrough => self.strikethrough += 1,
            Tag::Link { dest_url, .. } => {
                self.link = is_web_url(&dest_url).then(|| dest_url.to_string());
            }
            Tag::Image { dest_url, .. } => {
                self.image += 1;
                if is_web_url(&dest_url) {
                    self.flush();
                    self.blocks.push(Block::Image {
                        url: dest_url.to_string(),
                    });
                }
            }
            _ => {}
        }
    }

    fn end(&mut self, tag: TagEnd) {
        match tag {
            TagEnd::Paragraph | TagEnd::TableHead | TagEnd::TableRow | TagEnd::HtmlBlock => {
                self.flush()
            }
            TagEnd::Heading(_) => {
                self.flush();
                self.heading = None;
            }
            TagEnd::BlockQuote { .. } | TagEnd::Item => {
                self.flush();
                self.containers.pop();
            }
            TagEnd::List(_) => {
                self.flush();
                self.lists.pop();
            }
            TagEnd::CodeBlock => {
                if let Some((language, mut text)) = self.code.take() {
                    if text.ends_with('\n') {
                        text.pop();
                    }
                    self.blocks.push(Block::Code { language, text });
                }
            }
            TagEnd::Emphasis => self.italic = self.italic.saturating_sub(1),
            TagEnd::Strong => self.bold = self.bold.saturating_sub(1),
            TagEnd::Strikethrough => self.strikethrough = self.strikethrough.saturating_sub(1),
            TagEnd::Link => self.link = None,
            TagEnd::Image => self.image = self.image.saturating_sub(1),
            _ => {}
        }
    }

    fn text(&mut self, text: &str, code: bool) {
        // Alt text is not rendered; the image became its own block.
        if self.image > 0 {
            return;
        }
        let annotations = Annotations {
            bold: self.bold > 0,
            italic: self.italic > 0,
            strikethrough: self.strikethrough > 0,
            code,
        };
        self.inline.push(text, self.link.as_deref(), annotations);
    }

    /// Close the pending inline content into a block chosen by the
    /// innermost container.
    fn flush(&mut self) {
        let mut text = std::mem::take(&mut self.inline);
        text.trim();
        if text.is_empty() {
            return;
        }
        if let Some(level) = self.heading {
            self.blocks.push(Block::Heading { level, text });
            return;
        }
        match self.containers.last_mut() {
            Some(Container::Item { ordered, emitted }) if !*emitted => {
                *emitted = true;
                self.blocks.push(if *ordered {
                    Block::Numbered(text)
                } else {
                    Block::Bulleted(text)
                });
            }
            Some(Container::Quote { emitted }) => {
                if *emitted {
                    if let Some(Block::Quote(previous)) = self.blocks.last_mut() {
                        previous.push("\n\n", None, Annotations::default());
                        previous.append(text);
                        return;
                    }
                }
                *emitted = true;
                self.blocks.push(Block::Quote(text));
            }
            _ => self.blocks.push(Block::Paragraph(text)),
        }
    }

    fn finish(mut self) -> Vec<Block> {
        self.flush();
        if let Some((language, text)) = self.code.take() {
            self.blocks.push(Block::Code { language, text });
        }
        self.blocks
    }
}

fn is_web_url(url: &str) -> bool {
    url.starts_with("https://") || url.starts_with("http://")
}

/// Map a fence info string onto the destination's language list.
pub fn notion_language(language: Option<&str>) -> &'static str {
    let Some(lang) = language else {
        return "plain text";
    };
    match lang.to_ascii_lowercase().as_str() {
        "rust" | "rs" => "rust",
        "python" | "py" => "python",
        "javascript" | "js" | "jsx" => "javascript",
        "typescript" | "ts" | "tsx" => "typescript",
        "java" => "java",
        "go" | "golang" => "go",
        "c" => "c",
        "cpp" | "c++" | "cc" => "c++",
        "csharp" | "cs" | "c#" => "c#",
        "bash" => "bash",
        "sh" | "shell" | "zsh" | "console" => "shell",
        "json" => "json",
        "yaml" | "yml" => "yaml",
        "html" | "xml" => "html",
        "css" => "css",
        "sql" => "sql",
        "markdown" | "md" => "markdown",
        "ruby" | "rb" => "ruby",
        "php" => "php",
        "kotlin" | "kt" => "kotlin",
        "swift" => "swift",
        "scala" => "scala",
        "haskell" | "hs" => "haskell",
        "diff" => "diff",
        "docker" | "dockerfile" => "docker",
        _ => "plain text",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::markdown::html_to_markdown;

    fn plain(text: &str) -> RichText {
        RichText::from(text)
    }

    fn span(text: &str, link: Option<&str>, annotations: Annotations) -> Span {
        Span {
            text: text.into(),
            link: link.map(str::to_string),
            annotations,
        }
    }

    fn from_html(html: &str) -> Vec<Block> {
        markdown_to_blocks(&html_to_markdown(html, "https://ex.com/"))
    }

    #[test]
    fn headings_lists_paragraphs() {
        let blocks = markdown_to_blocks("# Title\n\nIntro line\nsecond line\n\n- a\n- b\n\n1. one\n2. two");
        assert_eq!(
            blocks,
            vec![
                Block::Heading { level: 1, text: plain("Title") },
                Block::Paragraph(plain("Intro line second line")),
                Block::Bulleted(plain("a")),
                Block::Bulleted(plain("b")),
                Block::Numbered(plain("one")),
                Block::Numbered(plain("two")),
            ]
        );
    }

    #[test]
    fn code_fence_kept_verbatim() {
        let blocks = markdown_to_blocks("```rust\nfn main() {\n\n    - not a list\n}\n```\nafter");
        assert_eq!(
            blocks,
            vec![
                Block::Code {
                    language: Some("rust".into()),
                    text: "fn main() {\n\n    - not a list\n}".into()
                },
                Block::Paragraph(plain("after")),
            ]
        );
    }

    #[test]
    fn code_in_list_item_unindented() {
        let blocks = markdown_to_blocks("- item\n\n  ```\n  let x = 1;\n      nested\n  ```");
        assert_eq!(
            blocks,
            vec![
                Block::Bulleted(plain("item")),
                Block::Code {
                    language: None,
                    text: "let x = 1;\n    nested".into()
                },
            ]
        );
    }

    #[test]
    fn longer_fence_contains_shorter() {
        let blocks = markdown_to_blocks("````\n```\ninner\n```\n````");
        assert_eq!(
            blocks,
            vec![Block::Code {
                language: None,
                text: "```\ninner\n```".into()
            }]
        );
    }

    #[test]
    fn unterminated_fence_still_emitted() {
        let blocks = markdown_to_blocks("```\nabc");
        assert_eq!(
            blocks,
            vec![Block::Code {
                language: None,
                text: "abc".into()
            }]
        );
    }

    #[test]
    fn inline_span_at_line_start_is_not_a_fence() {
        let blocks = markdown_to_blocks("``` ``x ``` tail\n\nnext para\n\n## Head");
        assert_eq!(
            blocks,
            vec![
                Block::Paragraph(RichText(vec![
                    span("``x", None, Annotations::CODE),
                    span(" tail", None, Annotations::default()),
                ])),
                Block::Paragraph(plain("next para")),
                Block::Heading { level: 2, text: plain("Head") },
            ]
        );
    }

    #[test]
    fn quotes_merge() {
        let blocks = markdown_to_blocks("> a\n>\n> b\n\nplain");
        assert_eq!(
            blocks,
            vec![Block::Quote(plain("a\n\nb")), Block::Paragraph(plain("plain"))]
        );
    }

    #[test]
    fn divider() {
        assert_eq!(
            markdown_to_blocks("a\n\n---\n\nb"),
            vec![
                Block::Paragraph(plain("a")),
                Block::Divider,
                Block::Paragraph(plain("b"))
            ]
        );
    }

    #[test]
    fn escaped_markers_are_unescaped_paragraphs() {
        assert_eq!(
            markdown_to_blocks(r"1\. not a list \*really\*"),
            vec![Block::Paragraph(plain("1. not a list *really*"))]
        );
    }

    #[test]
    fn nested_items_flatten() {
        let blocks = markdown_to_blocks("- a\n  1. b\n- c");
        assert_eq!(
            blocks,
            vec![
                Block::Bulleted(plain("a")),
                Block::Numbered(plain("b")),
                Block::Bulleted(plain("c")),
            ]
        );
    }

    #[test]
    fn table_rows_become_paragraphs() {
        let blocks = markdown_to_blocks("| a | b |\n| --- | --- |\n| 1 | 2 |");
        assert_eq!(
            blocks,
            vec![Block::Paragraph(plain("a | b")), Block::Paragraph(plain("1 | 2"))]
        );
    }

    #[test]
    fn rich_text_chunks_long_text() {
        let text = "x".repeat(MAX_RICH_TEXT_CHARS * 2 + 5);
        let runs = rich_text(&text);
        assert_eq!(runs.len(), 3);
        assert_eq!(
            runs[2]["text"]["content"].as_str().unwrap().len(),
            5
        );
        assert!(runs[0].get("annotations").is_none());
    }

    #[test]
    fn heading_json_clamps_level() {
        let json = Block::Heading { level: 5, text: plain("h") }.to_json();
        assert_eq!(json["type"], "heading_3");
        assert_eq!(json["heading_3"]["rich_text"][0]["text"]["content"], "h");
    }

    #[test]
    fn code_json_language() {
        let json = Block::Code {
            language: Some("py".into()),
            text: "print(1)".into(),
        }
        .to_json();
        assert_eq!(json["code"]["language"], "python");
        assert_eq!(notion_language(Some("brainfuck")), "plain text");
        assert_eq!(notion_language(None), "plain text");
    }

    // ── Converter output ─────────────────────────────────────────────────────

    #[test]
    fn converted_anchor_becomes_rich_text_link() {
        let blocks = from_html(r#"<p>see <a href="/x">the docs</a> now</p>"#);
        assert_eq!(
            blocks,
            vec![Block::Paragraph(RichText(vec![
                span("see ", None, Annotations::default()),
                span("the docs", Some("https://ex.com/x"), Annotations::default()),
                span(" now", None, Annotations::default()),
            ]))]
        );
        let json = blocks[0].to_json();
        let runs = &json["paragraph"]["rich_text"];
        assert_eq!(runs[1]["text"]["content"], "the docs");
        assert_eq!(runs[1]["text"]["link"]["url"], "https://ex.com/x");
        assert!(runs[0]["text"].get("link").is_none());
    }

    #[test]
    fn converted_emphasis_becomes_annotations() {
        let blocks = from_html("<p><strong>bold</strong> <em>it</em> <del>gone</del></p>");
        let Block::Paragraph(text) = &blocks[0] else {
            panic!("expected a paragraph, got {blocks:?}");
        };
        assert_eq!(text.text(), "bold it gone");
        let bold = &text.0[0];
        assert_eq!(bold.text, "bold");
        assert!(bold.annotations.bold && !bold.annotations.italic);
        assert!(text.0.iter().any(|s| s.text == "it" && s.annotations.italic));
        assert!(text.0.iter().any(|s| s.text == "gone" && s.annotations.strikethrough));

        let json = blocks[0].to_json();
        assert_eq!(json["paragraph"]["rich_text"][0]["annotations"]["bold"], true);
    }

    #[test]
    fn converted_escapes_are_resolved() {
        let blocks = from_html("<p>snake_case *star* [x] 1. not-a-list</p><p>- dash</p>");
        assert_eq!(
            blocks,
            vec![
                Block::Paragraph(plain("snake_case *star* [x] 1. not-a-list")),
                Block::Paragraph(plain("- dash")),
            ]
        );
    }

    #[test]
    fn converted_long_inline_delimiter_stays_inline() {
        let blocks = from_html(
            "<p><code>``x</code> tail</p><p>next para</p><h2>Head</h2><ul><li>item</li></ul>",
        );
        assert_eq!(
            blocks,
            vec![
                Block::Paragraph(RichText(vec![
                    span("``x", None, Annotations::CODE),
                    span(" tail", None, Annotations::default()),
                ])),
                Block::Paragraph(plain("next para")),
                Block::Heading { level: 2, text: plain("Head") },
                Block::Bulleted(plain("item")),
            ]
        );
        let json = blocks[0].to_json();
        assert_eq!(json["paragraph"]["rich_text"][0]["annotations"]["code"], true);
    }

    #[test]
    fn converted_image_becomes_image_block() {
        let blocks = from_html(r#"<p>before</p><img src="/i.png" alt="pic"><p>after</p>"#);
        assert_eq!(
            blocks,
            vec![
                Block::Paragraph(plain("before")),
                Block::Image { url: "https://ex.com/i.png".into() },
                Block::Paragraph(plain("after")),
            ]
        );
        assert_eq!(blocks[1].to_json()["image"]["external"]["url"], "https://ex.com/i.png");
    }
}
