//! Prompts for main-content extraction.
//!
//! Keeping the prompt text here means the extractor only deals with
//! transport (timeouts, token accounting, response parsing) and the wording
//! can be inspected and tested without a model.

/// Opening delimiter the model is asked to wrap its answer in.
pub const CONTENT_OPEN: &str = "<content>";

/// Closing delimiter the model is asked to wrap its answer in.
pub const CONTENT_CLOSE: &str = "</content>";

/// System prompt for main-content extraction.
pub const EXTRACTION_SYSTEM_PROMPT: &str = r#"You are an expert web archivist. You receive a web page that has already been converted from HTML to Markdown, including navigation menus, cookie banners, sidebars, footers and advertisements.

Your task is to extract the main content of the page.

1. KEEP
   - The title and the full body of the article, post or documentation page
   - Headings, lists, tables, code blocks, quotes and links that belong to the body
   - The original wording; do not summarise or paraphrase

2. REMOVE
   - Site navigation, breadcrumbs, menus and "skip to content" links
   - Cookie notices, newsletter prompts, share buttons, related-article lists
   - Footers, copyright lines and advertisements

3. OUTPUT FORMAT
   - Output Markdown only
   - Wrap the whole answer in <content> and </content>
   - Do not add commentary before or after the tags"#;

/// Build the user message embedding the page URL and its Markdown.
pub fn extraction_request(markdown: &str, url: &str) -> String {
    format!(
        "Here is the content from the URL converted from HTML to markdown:\n\
         <url>{url}</url>\n\n\
         <markdown>\n{markdown}\n</markdown>\n\n\
         Extract the main content from the given markdown.\n\n\
         Wrap your response in {CONTENT_OPEN} tags.\n\
         {CONTENT_OPEN}\n[Your markdown content here]\n{CONTENT_CLOSE}"
    )
}
