const FENCE: &str = "```";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment<'a> {
    Text(&'a str),
    CodeBlock { lang: &'a str, code: &'a str },
    /// A fence that has opened but not yet closed. Only ever the last segment.
    OpenCodeBlock { lang: &'a str, code: &'a str },
}

enum State {
    OutsideFence,
    InsideFence,
}

/// Splits `buffer` on fence boundaries. Fence markers are consumed, so no
/// segment contains "```".
pub fn lex(buffer: &str) -> Vec<Segment<'_>> {
    let mut segments = Vec::new();
    let mut rest = buffer;
    let mut state = State::OutsideFence;

    loop {
        match state {
            State::OutsideFence => match rest.find(FENCE) {
                Some(pos) => {
                    if pos > 0 {
                        segments.push(Segment::Text(&rest[..pos]));
                    }
                    rest = &rest[pos + FENCE.len()..];
                    state = State::InsideFence;
                }
                None => {
                    if !rest.is_empty() {
                        segments.push(Segment::Text(rest));
                    }
                    break;
                }
            },
            State::InsideFence => {
                let (lang, body) = split_info(rest);
                match body.find(FENCE) {
                    Some(pos) => {
                        segments.push(Segment::CodeBlock {
                            lang,
                            code: &body[..pos],
                        });
                        rest = &body[pos + FENCE.len()..];
                        state = State::OutsideFence;
                    }
                    None => {
                        segments.push(Segment::OpenCodeBlock { lang, code: body });
                        break;
                    }
                }
            }
        }
    }

    segments
}

/// Language tag (word characters right after the fence) and the code that
/// follows it, minus one optional newline.
fn split_info(after_fence: &str) -> (&str, &str) {
    let lang_len = after_fence
        .find(|c: char| !(c.is_alphanumeric() || c == '_'))
        .unwrap_or(after_fence.len());
    let (lang, body) = after_fence.split_at(lang_len);
    let body = body
        .strip_prefix("\r\n")
        .or_else(|| body.strip_prefix('\n'))
        .unwrap_or(body);
    (lang, body)
}

/// First complete fenced block, as `(lang, code)`.
pub fn first_code_block(buffer: &str) -> Option<(&str, &str)> {
    lex(buffer).into_iter().find_map(|segment| match segment {
        Segment::CodeBlock { lang, code } => Some((lang, code)),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_one_segment() {
        assert_eq!(lex("hello *world*"), vec![Segment::Text("hello *world*")]);
        assert!(lex("").is_empty());
    }

    #[test]
    fn closed_block_with_language() {
        let segments = lex("Try this:\n```js\nconsole.log(1)\n```\nDone.");
        assert_eq!(
            segments,
            vec![
                Segment::Text("Try this:\n"),
                Segment::CodeBlock {
                    lang: "js",
                    code: "console.log(1)\n"
                },
                Segment::Text("\nDone."),
            ]
        );
    }

    #[test]
    fn unterminated_block_stays_open() {
        let segments = lex("Here:\n```python\ndef f():\n  ");
        assert_eq!(
            segments,
            vec![
                Segment::Text("Here:\n"),
                Segment::OpenCodeBlock {
                    lang: "python",
                    code: "def f():\n  "
                },
            ]
        );
    }

    #[test]
    fn bare_fence_at_end() {
        assert_eq!(
            lex("text ```"),
            vec![
                Segment::Text("text "),
                Segment::OpenCodeBlock { lang: "", code: "" }
            ]
        );
    }

    #[test]
    fn inline_language_without_newline() {
        assert_eq!(
            lex("```js let x = 1```"),
            vec![Segment::CodeBlock {
                lang: "js",
                code: " let x = 1"
            }]
        );
    }

    #[test]
    fn extending_a_buffer_keeps_completed_blocks() {
        let first = "```rs\nfn a() {}\n```\nmore ```py\nx";
        let extended = format!("{} = 1\n```", first);
        let completed = |segments: Vec<Segment<'_>>| {
            segments
                .into_iter()
                .filter(|s| matches!(s, Segment::CodeBlock { .. }))
                .count()
        };
        assert_eq!(completed(lex(first)), 1);
        assert_eq!(completed(lex(&extended)), 2);
        assert_eq!(lex(first)[0], lex(&extended)[0]);
    }

    #[test]
    fn finds_first_complete_block() {
        let text = "intro\n```javascript\nfoo()\n```\n```py\nbar\n```";
        assert_eq!(first_code_block(text), Some(("javascript", "foo()\n")));
        assert_eq!(first_code_block("```js\nopen"), None);
    }
}
