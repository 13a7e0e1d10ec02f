use std::sync::LazyLock;

use regex::Regex;

use super::fence::Segment;

static INLINE_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"`([^`]+)`").expect("valid inline code pattern"));
static BOLD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*\*(.+?)\*\*").expect("valid bold pattern"));
static ITALIC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*(.+?)\*").expect("valid italic pattern"));

pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

pub fn segment(segment: &Segment<'_>, out: &mut String) {
    match segment {
        Segment::Text(text) => inline(text, out),
        Segment::CodeBlock { lang, code } => code_block(lang, code, false, out),
        Segment::OpenCodeBlock { lang, code } => code_block(lang, code, true, out),
    }
}

fn code_block(lang: &str, code: &str, open: bool, out: &mut String) {
    let class = if open { "code-block open" } else { "code-block" };
    let header = if lang.is_empty() { "Code" } else { lang };
    out.push_str(&format!(
        "<div class=\"{}\"><div class=\"code-header\">{}</div><pre><code class=\"language-{}\">{}</code></pre></div>",
        class,
        escape(header),
        escape(lang),
        escape(code)
    ));
}

/// Inline code spans first; bold and italic only apply outside them.
fn inline(text: &str, out: &mut String) {
    let mut last = 0;
    for caps in INLINE_CODE.captures_iter(text) {
        let (Some(whole), Some(inner)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        emphasis(&text[last..whole.start()], out);
        out.push_str("<code class=\"inline-code\">");
        out.push_str(&escape(inner.as_str()));
        out.push_str("</code>");
        last = whole.end();
    }
    emphasis(&text[last..], out);
}

fn emphasis(text: &str, out: &mut String) {
    let escaped = escape(text);
    let bolded = BOLD.replace_all(&escaped, "<strong>$1</strong>");
    let italic = ITALIC.replace_all(&bolded, "<em>$1</em>");
    out.push_str(&italic);
}
