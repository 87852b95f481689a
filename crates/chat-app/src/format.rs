//! Message body formatting.
//!
//! Raw text is escaped first and code markers are recognised on the escaped
//! text afterwards, so every payload inside a [`RichText`] is markup-safe.

const FENCE: &str = "```";

/// One run of formatted content. Payloads are HTML-escaped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Text(String),
    InlineCode(String),
    CodeBlock {
        language: Option<String>,
        code: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RichText {
    segments: Vec<Segment>,
}

impl RichText {
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn code_blocks(&self) -> impl Iterator<Item = (Option<&str>, &str)> {
        self.segments.iter().filter_map(|segment| match segment {
            Segment::CodeBlock { language, code } => Some((language.as_deref(), code.as_str())),
            Segment::Text(_) | Segment::InlineCode(_) => None,
        })
    }

    pub fn to_html(&self) -> String {
        HtmlRenderer.render(self)
    }

    pub fn to_plain(&self) -> String {
        PlainRenderer.render(self)
    }

    fn push_text(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }

        if let Some(Segment::Text(previous)) = self.segments.last_mut() {
            previous.push_str(text);
        } else {
            self.segments.push(Segment::Text(text.to_string()));
        }
    }
}

/// Turns formatted content into something a display surface understands.
pub trait Render {
    fn render(&self, content: &RichText) -> String;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlRenderer;

impl Render for HtmlRenderer {
    fn render(&self, content: &RichText) -> String {
        let mut html = String::new();
        for segment in content.segments() {
            match segment {
                Segment::Text(text) => html.push_str(text),
                Segment::InlineCode(code) => {
                    html.push_str("<code>");
                    html.push_str(code);
                    html.push_str("</code>");
                }
                Segment::CodeBlock { language, code } => {
                    match language {
                        Some(language) => {
                            html.push_str("<pre><code class=\"language-");
                            html.push_str(language);
                            html.push_str("\">");
                        }
                        None => html.push_str("<pre><code>"),
                    }
                    html.push_str(code);
                    html.push_str("</code></pre>");
                }
            }
        }
        html
    }
}

/// Terminal-friendly rendering: entities decoded, code markers kept.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainRenderer;

impl Render for PlainRenderer {
    fn render(&self, content: &RichText) -> String {
        let mut plain = String::new();
        for segment in content.segments() {
            match segment {
                Segment::Text(text) => plain.push_str(&unescape_html(text)),
                Segment::InlineCode(code) => {
                    plain.push('`');
                    plain.push_str(&unescape_html(code));
                    plain.push('`');
                }
                Segment::CodeBlock { language, code } => {
                    plain.push_str(FENCE);
                    plain.push_str(language.as_deref().unwrap_or_default());
                    plain.push('\n');
                    plain.push_str(&unescape_html(code));
                    plain.push('\n');
                    plain.push_str(FENCE);
                }
            }
        }
        plain
    }
}

/// Formats a message body into plain text, inline code and fenced code blocks.
///
/// Unterminated or malformed fences are left as literal text.
pub fn format(raw: &str) -> RichText {
    let escaped = escape_html(raw);
    let mut content = RichText::default();
    let mut text_start = 0;
    let mut search_from = 0;

    while let Some(offset) = escaped[search_from..].find(FENCE) {
        let start = search_from + offset;
        match parse_fence(&escaped[start..]) {
            Some(fence) => {
                push_inline(&mut content, &escaped[text_start..start]);
                content.segments.push(Segment::CodeBlock {
                    language: fence.language.map(str::to_string),
                    code: fence.code.to_string(),
                });
                text_start = start + fence.consumed;
                search_from = text_start;
            }
            // Backticks are ASCII, so stepping one byte stays on a char boundary.
            None => search_from = start + 1,
        }
    }

    push_inline(&mut content, &escaped[text_start..]);
    content
}

struct Fence<'a> {
    language: Option<&'a str>,
    code: &'a str,
    consumed: usize,
}

fn parse_fence(source: &str) -> Option<Fence<'_>> {
    let after_open = source.strip_prefix(FENCE)?;
    let tag_len = after_open
        .bytes()
        .take_while(|byte| is_language_tag_byte(*byte))
        .count();
    let after_tag = &after_open[tag_len..];

    let newline_len = if after_tag.starts_with("\r\n") {
        2
    } else if after_tag.starts_with('\n') {
        1
    } else {
        return None;
    };

    let body_and_rest = &after_tag[newline_len..];
    let close = body_and_rest.find(FENCE)?;
    let body = &body_and_rest[..close];
    let code = body
        .strip_suffix("\r\n")
        .or_else(|| body.strip_suffix('\n'))
        .unwrap_or(body);

    Some(Fence {
        language: (tag_len > 0).then(|| &after_open[..tag_len]),
        code,
        consumed: FENCE.len() + tag_len + newline_len + close + FENCE.len(),
    })
}

fn is_language_tag_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b'_' | b'+' | b'-' | b'#' | b'.')
}

fn push_inline(content: &mut RichText, text: &str) {
    let mut literal_start = 0;
    let mut search_from = 0;

    while let Some(offset) = text[search_from..].find('`') {
        let open = search_from + offset;
        let run = backtick_run(&text[open..]);
        if run > 1 {
            // Double and longer runs are never inline delimiters.
            search_from = open + run;
            continue;
        }

        let body_start = open + 1;
        match text[body_start..].find('`') {
            Some(len) if len > 0 && backtick_run(&text[body_start + len..]) == 1 => {
                content.push_text(&text[literal_start..open]);
                content
                    .segments
                    .push(Segment::InlineCode(text[body_start..body_start + len].to_string()));
                search_from = body_start + len + 1;
                literal_start = search_from;
            }
            _ => search_from = body_start,
        }
    }

    content.push_text(&text[literal_start..]);
}

fn backtick_run(text: &str) -> usize {
    text.bytes().take_while(|byte| *byte == b'`').count()
}

/// HTML-escapes text without touching character references that are already escaped,
/// which makes the function idempotent.
pub fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());

    for (index, character) in raw.char_indices() {
        match character {
            '&' if starts_with_character_reference(&raw[index..]) => escaped.push('&'),
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(character),
        }
    }

    escaped
}

pub fn unescape_html(escaped: &str) -> String {
    let mut decoded = String::with_capacity(escaped.len());
    let mut rest = escaped;

    while let Some(start) = rest.find('&') {
        decoded.push_str(&rest[..start]);
        let candidate = &rest[start..];

        match reference_body(candidate).and_then(decode_reference) {
            Some(character) => {
                decoded.push(character);
                // `reference_body` only succeeds when a `;` terminates the reference.
                let end = candidate.find(';').map_or(1, |end| end + 1);
                rest = &candidate[end..];
            }
            None => {
                decoded.push('&');
                rest = &candidate[1..];
            }
        }
    }

    decoded.push_str(rest);
    decoded
}

const MAX_REFERENCE_LEN: usize = 10;

fn reference_body(text: &str) -> Option<&str> {
    let rest = text.strip_prefix('&')?;
    let end = rest.find(';')?;
    if end == 0 || end > MAX_REFERENCE_LEN {
        return None;
    }
    Some(&rest[..end])
}

fn starts_with_character_reference(text: &str) -> bool {
    reference_body(text).and_then(decode_reference).is_some()
}

fn decode_reference(body: &str) -> Option<char> {
    match body {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some('\u{a0}'),
        _ => {
            let numeric = body.strip_prefix('#')?;
            let code_point = match numeric.strip_prefix(['x', 'X']) {
                Some(hex) if !hex.is_empty() && hex.bytes().all(|b| b.is_ascii_hexdigit()) => {
                    u32::from_str_radix(hex, 16).ok()?
                }
                Some(_) => return None,
                None if !numeric.is_empty() && numeric.bytes().all(|b| b.is_ascii_digit()) => {
                    numeric.parse::<u32>().ok()?
                }
                None => return None,
            };
            char::from_u32(code_point)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_escaped() {
        let content = format("<script>alert('x')</script> & \"more\"");
        assert_eq!(
            content.segments(),
            &[Segment::Text(
                "&lt;script&gt;alert(&#39;x&#39;)&lt;/script&gt; &amp; &quot;more&quot;"
                    .to_string()
            )]
        );
    }

    #[test]
    fn formatting_escaped_output_again_is_a_no_op() {
        for raw in [
            "a < b && c > d",
            "already &amp; escaped &lt;tag&gt;",
            "quotes \"double\" and 'single'",
            "stray & ampersand; &#x41; &#65; &bogus;",
            "",
        ] {
            let once = format(raw);
            let twice = format(&once.to_html());
            assert_eq!(twice, once, "input: {raw:?}");
        }
    }

    #[test]
    fn fenced_block_keeps_whitespace_and_language() {
        let content = format("Intro:\n```python\ndef f(x):\n    return x < 2\n```\nOutro");
        assert_eq!(
            content.segments(),
            &[
                Segment::Text("Intro:\n".to_string()),
                Segment::CodeBlock {
                    language: Some("python".to_string()),
                    code: "def f(x):\n    return x &lt; 2".to_string(),
                },
                Segment::Text("\nOutro".to_string()),
            ]
        );
    }

    #[test]
    fn fence_without_language_tag() {
        let content = format("```\nls -la\n```");
        assert_eq!(content.code_blocks().collect::<Vec<_>>(), vec![(None, "ls -la")]);
        assert_eq!(content.to_html(), "<pre><code>ls -la</code></pre>");
    }

    #[test]
    fn unterminated_fence_stays_plain_text() {
        let content = format("abc ```python\nprint(1)");
        assert_eq!(
            content.segments(),
            &[Segment::Text("abc ```python\nprint(1)".to_string())]
        );
        assert!(content.to_html().contains("```python"));
    }

    #[test]
    fn unterminated_fence_does_not_swallow_later_inline_code() {
        let content = format("```py\nx `y`");
        assert_eq!(
            content.segments(),
            &[
                Segment::Text("```py\nx ".to_string()),
                Segment::InlineCode("y".to_string()),
            ]
        );
    }

    #[test]
    fn fence_opener_needs_newline_after_tag() {
        let content = format("``` not a fence ```");
        assert_eq!(
            content.segments(),
            &[Segment::Text("``` not a fence ```".to_string())]
        );
    }

    #[test]
    fn inline_code_is_wrapped_and_escaped() {
        let content = format("Use `Vec<u8>` or `&str`.");
        assert_eq!(
            content.to_html(),
            "Use <code>Vec&lt;u8&gt;</code> or <code>&amp;str</code>."
        );
    }

    #[test]
    fn inline_markers_inside_fences_are_literal() {
        let content = format("See `a`:\n```sh\necho `date`\n```");
        assert_eq!(
            content.segments(),
            &[
                Segment::Text("See ".to_string()),
                Segment::InlineCode("a".to_string()),
                Segment::Text(":\n".to_string()),
                Segment::CodeBlock {
                    language: Some("sh".to_string()),
                    code: "echo `date`".to_string(),
                },
            ]
        );
    }

    #[test]
    fn empty_or_doubled_backticks_are_literal() {
        assert_eq!(
            format("a `` b").segments(),
            &[Segment::Text("a `` b".to_string())]
        );
        assert_eq!(
            format("lonely ` tick").segments(),
            &[Segment::Text("lonely ` tick".to_string())]
        );
    }

    #[test]
    fn multiple_blocks_in_one_message() {
        let content = format("```rust\nfn a() {}\n```\nthen\n```c#\nvar b;\n```");
        assert_eq!(
            content.code_blocks().collect::<Vec<_>>(),
            vec![(Some("rust"), "fn a() {}"), (Some("c#"), "var b;")]
        );
    }

    #[test]
    fn plain_renderer_restores_source_characters() {
        let raw = "if a < b { `x & y` }\n```js\nconst s = \"<p>\";\n```";
        assert_eq!(format(raw).to_plain(), raw);
    }

    #[test]
    fn unescape_leaves_unknown_references_alone() {
        assert_eq!(unescape_html("&bogus; &#xZZ; & &lt;"), "&bogus; &#xZZ; & <");
    }
}
