use serde::Serialize;

const SPECIAL: &[char] = &['*', '`'];

/// Inline piece of a rendered line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "text", rename_all = "snake_case")]
pub enum Span {
    Bold(String),
    Italic(String),
    Code(String),
    Text(String),
}

/// Splits one line into spans.
///
/// At each position the first of `**bold**`, `*italic*` and `` `code` ``
/// that matches wins; anything else is literal text up to the next `*` or
/// backtick. Unmatched markers come out as literal text.
pub fn parse_inline(text: &str) -> Vec<Span> {
    let mut spans = Vec::new();
    let mut rest = text;

    while !rest.is_empty() {
        if let Some((inner, consumed)) = delimited(rest, "**") {
            spans.push(Span::Bold(inner.to_string()));
            rest = &rest[consumed..];
            continue;
        }
        if let Some((inner, consumed)) = delimited(rest, "*") {
            spans.push(Span::Italic(inner.to_string()));
            rest = &rest[consumed..];
            continue;
        }
        if let Some((inner, consumed)) = delimited(rest, "`") {
            spans.push(Span::Code(inner.to_string()));
            rest = &rest[consumed..];
            continue;
        }

        // A marker that opened nothing is literal.
        let skip = if rest.starts_with(SPECIAL) { 1 } else { 0 };
        let end = rest[skip..]
            .find(SPECIAL)
            .map(|i| i + skip)
            .unwrap_or(rest.len());
        push_text(&mut spans, &rest[..end]);
        rest = &rest[end..];
    }

    spans
}

/// Matches `<delim>body<delim>` at the start of `s` with a non-empty body,
/// closing at the nearest delimiter. Returns the body and the bytes consumed.
fn delimited<'a>(s: &'a str, delim: &str) -> Option<(&'a str, usize)> {
    let body = s.strip_prefix(delim)?;
    let first = body.chars().next()?;
    let from = first.len_utf8();
    let close = body[from..].find(delim)? + from;
    Some((&body[..close], delim.len() * 2 + close))
}

fn push_text(spans: &mut Vec<Span>, text: &str) {
    if text.is_empty() {
        return;
    }
    if let Some(Span::Text(last)) = spans.last_mut() {
        last.push_str(text);
    } else {
        spans.push(Span::Text(text.to_string()));
    }
}
