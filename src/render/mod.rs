//! Line-oriented renderer for the markdown subset assistants tend to emit.
//!
//! This is a best-effort heuristic, not a markdown grammar. Each line is
//! classified in priority order: fenced code, unfenced code (detected by
//! indentation, leading keywords, assignments, or bracket punctuation),
//! numbered item, bullet item, heading, blank, paragraph.

pub mod inline;

use serde::Serialize;

pub use self::inline::{ parse_inline, Span };

const FENCE: &str = "```";
const INDENT: &str = "    ";

const CODE_KEYWORDS: [&str; 15] = [
    "def", "function", "const", "let", "var", "class", "import", "from",
    "export", "public", "private", "if", "for", "while", "return",
];

const CODE_PUNCTUATION: &[char] = &['{', '}', '[', ']', '(', ')', ';'];
const CONTINUATION_PUNCTUATION: &[char] = &['_', '$', '{', '}', '[', ']', '(', ')', ';', '=', ':'];

const BULLETS: &[char] = &['-', '*', '•'];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Block {
    Code {
        language: Option<String>,
        code: String,
    },
    NumberedItem {
        number: String,
        spans: Vec<Span>,
    },
    BulletItem {
        spans: Vec<Span>,
    },
    Heading {
        level: u8,
        spans: Vec<Span>,
    },
    Break,
    Paragraph {
        spans: Vec<Span>,
    },
}

pub fn render(text: &str) -> Vec<Block> {
    let lines: Vec<&str> = text
        .split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .collect();
    let mut blocks = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];

        if let Some(info) = line.trim().strip_prefix(FENCE) {
            let language = Some(info.trim())
                .filter(|lang| !lang.is_empty())
                .map(str::to_string);
            i += 1;
            let start = i;
            while i < lines.len() && !lines[i].trim().starts_with(FENCE) {
                i += 1;
            }
            blocks.push(Block::Code { language, code: lines[start..i].join("\n") });
            // Step over the closing fence; an unterminated fence ran to the end.
            i += 1;
            continue;
        }

        if is_code_line(line) {
            let start = i;
            i += 1;
            while i < lines.len() && is_code_continuation(lines[i]) {
                i += 1;
            }
            blocks.push(Block::Code { language: None, code: lines[start..i].join("\n") });
            continue;
        }

        blocks.push(render_line(line));
        i += 1;
    }

    blocks
}

fn render_line(line: &str) -> Block {
    if let Some((number, content)) = numbered_item(line) {
        return Block::NumberedItem {
            number: number.to_string(),
            spans: parse_inline(content),
        };
    }
    if let Some(content) = bullet_item(line) {
        return Block::BulletItem { spans: parse_inline(content) };
    }
    if let Some((level, content)) = heading(line) {
        return Block::Heading { level, spans: parse_inline(content) };
    }
    if line.trim().is_empty() {
        return Block::Break;
    }
    Block::Paragraph { spans: parse_inline(line) }
}

fn is_code_line(line: &str) -> bool {
    if line.starts_with(INDENT) || line.starts_with('\t') {
        return true;
    }
    let trimmed = line.trim();
    starts_with_keyword(trimmed) ||
        looks_like_assignment(trimmed) ||
        trimmed.starts_with(CODE_PUNCTUATION)
}

fn is_code_continuation(line: &str) -> bool {
    if line.starts_with(INDENT) || line.starts_with('\t') {
        return true;
    }
    match line.trim().chars().next() {
        None => true,
        Some(c) => c.is_ascii_alphabetic() || CONTINUATION_PUNCTUATION.contains(&c),
    }
}

fn starts_with_keyword(trimmed: &str) -> bool {
    CODE_KEYWORDS.iter().any(|kw| {
        trimmed
            .strip_prefix(kw)
            .and_then(|rest| rest.chars().next())
            .is_some_and(char::is_whitespace)
    })
}

/// `identifier =` or `identifier:` at the start of the line.
fn looks_like_assignment(trimmed: &str) -> bool {
    let mut chars = trimmed.chars().peekable();
    match chars.next() {
        Some(c) if is_ident_start(c) => {}
        _ => {
            return false;
        }
    }
    while chars.next_if(|c| is_ident_start(*c) || c.is_ascii_digit()).is_some() {}
    while chars.next_if(|c| c.is_whitespace()).is_some() {}
    matches!(chars.next(), Some('=') | Some(':'))
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == '$'
}

/// `N. text`
fn numbered_item(line: &str) -> Option<(&str, &str)> {
    let digits = line.len() - line.trim_start_matches(|c: char| c.is_ascii_digit()).len();
    if digits == 0 {
        return None;
    }
    let rest = line[digits..].strip_prefix('.')?;
    let content = after_whitespace(rest)?;
    Some((&line[..digits], content))
}

/// `- text`, `* text`, `• text`
fn bullet_item(line: &str) -> Option<&str> {
    let rest = line.strip_prefix(BULLETS)?;
    after_whitespace(rest)
}

/// `#`..`######` followed by whitespace.
fn heading(line: &str) -> Option<(u8, &str)> {
    let level = line.len() - line.trim_start_matches('#').len();
    if !(1..=6).contains(&level) {
        return None;
    }
    let content = after_whitespace(&line[level..])?;
    Some((level as u8, content))
}

/// Requires at least one leading whitespace character and skips the run.
fn after_whitespace(s: &str) -> Option<&str> {
    if !s.starts_with(char::is_whitespace) {
        return None;
    }
    Some(s.trim_start())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> Span {
        Span::Text(s.to_string())
    }

    #[test]
    fn fenced_block_holds_exact_content() {
        let blocks = render("```\nX\n```");
        assert_eq!(blocks, vec![Block::Code { language: None, code: "X".into() }]);
    }

    #[test]
    fn fenced_block_keeps_language_and_indentation() {
        let blocks = render("```rust\nfn main() {\n    run();\n}\n```\nafter");
        assert_eq!(blocks.len(), 2);
        match &blocks[0] {
            Block::Code { language, code } => {
                assert_eq!(language.as_deref(), Some("rust"));
                assert_eq!(code, "fn main() {\n    run();\n}");
            }
            _ => panic!("Expected Code"),
        }
        assert_eq!(blocks[1], Block::Paragraph { spans: vec![text("after")] });
    }

    #[test]
    fn unterminated_fence_takes_the_rest_verbatim() {
        let blocks = render("intro\n```py\nprint('**x**')\n# not a heading");
        assert_eq!(blocks.len(), 2);
        match &blocks[1] {
            Block::Code { language, code } => {
                assert_eq!(language.as_deref(), Some("py"));
                assert_eq!(code, "print('**x**')\n# not a heading");
            }
            _ => panic!("Expected Code"),
        }
    }

    #[test]
    fn keyword_lines_start_unfenced_code() {
        let blocks = render("const x = 1;\nx += 2;\n\n1. next");
        assert_eq!(blocks.len(), 2);
        match &blocks[0] {
            Block::Code { language, code } => {
                assert!(language.is_none());
                assert_eq!(code, "const x = 1;\nx += 2;\n");
            }
            _ => panic!("Expected Code"),
        }
        assert!(matches!(blocks[1], Block::NumberedItem { .. }));
    }

    #[test]
    fn indentation_and_punctuation_mark_code() {
        assert!(matches!(render("    indented")[0], Block::Code { .. }));
        assert!(matches!(render("\ttabbed")[0], Block::Code { .. }));
        assert!(matches!(render("{ \"a\": 1 }")[0], Block::Code { .. }));
        assert!(matches!(render("total = 3")[0], Block::Code { .. }));
        assert!(matches!(render("$el: value")[0], Block::Code { .. }));
    }

    #[test]
    fn prose_is_not_code() {
        assert!(matches!(render("Hello world")[0], Block::Paragraph { .. }));
        assert!(matches!(render("If you want")[0], Block::Paragraph { .. }));
        assert!(matches!(render("format the text")[0], Block::Paragraph { .. }));
    }

    #[test]
    fn numbered_items() {
        let blocks = render("12. **Step** one");
        assert_eq!(
            blocks,
            vec![Block::NumberedItem {
                number: "12".into(),
                spans: vec![Span::Bold("Step".into()), text(" one")],
            }]
        );
        assert!(matches!(render("3.no space")[0], Block::Paragraph { .. }));
    }

    #[test]
    fn bullet_items_accept_all_markers() {
        for input in ["- item", "* item", "• item"] {
            assert_eq!(render(input), vec![Block::BulletItem { spans: vec![text("item")] }]);
        }
    }

    #[test]
    fn emphasis_at_line_start_is_not_a_bullet() {
        assert_eq!(
            render("*lean* in"),
            vec![Block::Paragraph { spans: vec![Span::Italic("lean".into()), text(" in")] }]
        );
    }

    #[test]
    fn headings_up_to_six_levels() {
        assert_eq!(render("### Title"), vec![Block::Heading { level: 3, spans: vec![text("Title")] }]);
        assert!(matches!(render("###### Six")[0], Block::Heading { level: 6, .. }));
        assert!(matches!(render("####### Seven")[0], Block::Paragraph { .. }));
        assert!(matches!(render("#hashtag")[0], Block::Paragraph { .. }));
    }

    #[test]
    fn blank_lines_become_breaks() {
        let blocks = render("one\n\n- two");
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[1], Block::Break);
    }

    #[test]
    fn mixed_inline_paragraph() {
        assert_eq!(
            render("**bold** and *italic* and `code`"),
            vec![Block::Paragraph {
                spans: vec![
                    Span::Bold("bold".into()),
                    text(" and "),
                    Span::Italic("italic".into()),
                    text(" and "),
                    Span::Code("code".into()),
                ],
            }]
        );
    }

    #[test]
    fn crlf_input_is_normalized() {
        assert_eq!(render("```\r\nX\r\n```"), vec![Block::Code { language: None, code: "X".into() }]);
    }

    #[test]
    fn serializes_with_kind_tags() {
        let json = serde_json::to_value(render("# Hi")).unwrap();
        assert_eq!(
            json,
            serde_json::json!([{ "kind": "heading", "level": 1, "spans": [{ "kind": "text", "text": "Hi" }] }])
        );
    }
}
