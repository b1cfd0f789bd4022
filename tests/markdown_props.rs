//! Property and fixture tests for the HTML → Markdown converter.

use edgequake_webclip::html_to_markdown;
use edgequake_webclip::markdown::code::{fence_for, inline_code, inline_delimiter, longest_backtick_run};
use proptest::prelude::*;

proptest! {
    #[test]
    fn fence_is_longer_than_any_backtick_run(code in "[a-z`\n ]{0,80}") {
        let fence = fence_for(&code);
        prop_assert!(fence.len() >= 3);
        prop_assert!(fence.len() > longest_backtick_run(&code));
    }

    #[test]
    fn inline_delimiter_never_occurs_in_code(code in "[a-z` ]{0,60}") {
        let delimiter = inline_delimiter(&code);
        prop_assert!(!code.contains(&delimiter));
    }

    #[test]
    fn inline_span_round_trips_its_content(code in "[a-z]{1,5}(`{1,4}[a-z]{1,5}){0,3}") {
        let span = inline_code(&code);
        let delimiter = inline_delimiter(&code);
        prop_assert!(span.starts_with(&delimiter));
        prop_assert!(span.ends_with(&delimiter));
        prop_assert!(span.contains(&code));
    }

    #[test]
    fn convert_is_total(html in "\\PC{0,400}") {
        let _ = html_to_markdown(&html, "https://ex.com/");
    }

    #[test]
    fn convert_is_total_on_tag_soup(
        parts in prop::collection::vec(
            prop::sample::select(vec![
                "<ul>", "</ul>", "<ol start=\"x\">", "<li>", "</li>", "<pre>", "</pre>",
                "<code>", "</code>", "<a href=\"//\">", "</a>", "<table>", "<tr>", "<td>",
                "<b>", "<em>", "text", "`", "\n", "<br>", "<img src=\"x\">",
                "<blockquote>", "<h2>",
            ]),
            0..60,
        )
    ) {
        let html = parts.concat();
        let md = html_to_markdown(&html, "https://ex.com/");
        prop_assert!(!md.starts_with('\n'));
        prop_assert!(!md.ends_with(char::is_whitespace));
    }

    #[test]
    fn convert_is_deterministic(html in "(<p>|</p>|<li>|[a-z ]|<a href=\"/x\">|</a>){0,40}") {
        prop_assert_eq!(
            html_to_markdown(&html, "https://ex.com/"),
            html_to_markdown(&html, "https://ex.com/")
        );
    }
}

#[test]
fn relative_link_is_resolved() {
    assert_eq!(
        html_to_markdown(r#"<a href="/x">t</a>"#, "https://ex.com/"),
        "[t](https://ex.com/x)"
    );
}

#[test]
fn ordered_list_honours_start() {
    assert_eq!(
        html_to_markdown(r#"<ol start="5"><li>a</li><li>b</li><li>c</li></ol>"#, "https://ex.com/"),
        "5. a\n6. b\n7. c"
    );
}

#[test]
fn empty_list_is_empty() {
    assert_eq!(html_to_markdown("<ul><li></li></ul>", "https://ex.com/"), "");
}

#[test]
fn fenced_block_outgrows_embedded_fence() {
    let md = html_to_markdown("<pre><code>a\n```\nb</code></pre>", "https://ex.com/");
    assert!(md.starts_with("````"), "got: {md}");
    assert!(md.ends_with("````"), "got: {md}");
    assert!(md.contains("```\nb"));
}

#[test]
fn scripts_and_styles_are_dropped() {
    let md = html_to_markdown(
        "<style>p{}</style><p>kept</p><script>alert(1)</script>",
        "https://ex.com/",
    );
    assert_eq!(md, "kept");
}

#[test]
fn empty_input_is_empty() {
    assert_eq!(html_to_markdown("", "https://ex.com/"), "");
}
