use crate::models::{BlockKind, ContentBlock};

/// Split markdown into headings, paragraphs, code, tables and formulas,
/// in document order
pub fn split_markdown(content: &str) -> Vec<ContentBlock> {
    let mut splitter = Splitter::default();
    let mut lines = content.lines().peekable();

    while let Some(line) = lines.next() {
        let trimmed = line.trim();

        if let Some(fence) = fence_marker(trimmed) {
            splitter.flush_paragraph();
            let language = trimmed[fence.len()..].trim();
            let language = (!language.is_empty()).then(|| language.to_string());

            let mut body = Vec::new();
            for inner in lines.by_ref() {
                if inner.trim_start().starts_with(fence) {
                    break;
                }
                body.push(inner);
            }
            splitter.push(BlockKind::Code { language }, body.join("\n"));
        } else if let Some(rest) = trimmed.strip_prefix("$$") {
            splitter.flush_paragraph();

            // Single-line form: $$ x^2 $$
            if let Some(inline) = rest.strip_suffix("$$") {
                splitter.push(BlockKind::Formula, inline.trim().to_string());
                continue;
            }

            let mut body = vec![rest.trim()];
            for inner in lines.by_ref() {
                let inner = inner.trim();
                if let Some(last) = inner.strip_suffix("$$") {
                    body.push(last.trim());
                    break;
                }
                body.push(inner);
            }
            let text = body
                .into_iter()
                .filter(|l| !l.is_empty())
                .collect::<Vec<_>>()
                .join("\n");
            splitter.push(BlockKind::Formula, text);
        } else if let Some((level, title)) = heading(trimmed) {
            splitter.flush_paragraph();
            splitter.push(BlockKind::Heading { level }, title.to_string());
        } else if trimmed.starts_with('|') {
            splitter.flush_paragraph();
            let mut rows = vec![trimmed];
            while let Some(next) = lines.peek() {
                let next = next.trim();
                if !next.starts_with('|') {
                    break;
                }
                rows.push(next);
                lines.next();
            }
            splitter.push(BlockKind::Table, rows.join("\n"));
        } else if trimmed.is_empty() {
            splitter.flush_paragraph();
        } else {
            splitter.paragraph.push(trimmed);
        }
    }

    splitter.flush_paragraph();
    splitter.blocks
}

#[derive(Default)]
struct Splitter<'a> {
    blocks: Vec<ContentBlock>,
    paragraph: Vec<&'a str>,
}

impl Splitter<'_> {
    fn push(&mut self, kind: BlockKind, text: String) {
        let position = self.blocks.len();
        self.blocks.push(ContentBlock {
            kind,
            text,
            position,
        });
    }

    fn flush_paragraph(&mut self) {
        if self.paragraph.is_empty() {
            return;
        }
        let text = self.paragraph.join("\n");
        self.paragraph.clear();
        self.push(BlockKind::Paragraph, text);
    }
}

fn fence_marker(line: &str) -> Option<&'static str> {
    if line.starts_with("```") {
        Some("```")
    } else if line.starts_with("~~~") {
        Some("~~~")
    } else {
        None
    }
}

/// ATX heading: 1-6 `#` followed by a space or end of line
fn heading(line: &str) -> Option<(u8, &str)> {
    let level = line.chars().take_while(|&c| c == '#').count();
    if level == 0 || level > 6 {
        return None;
    }

    let rest = &line[level..];
    if !rest.is_empty() && !rest.starts_with(' ') {
        return None;
    }

    Some((level as u8, strip_closing_hashes(rest.trim())))
}

/// Drop an optional closing `#` run; it must follow whitespace, so `C#` stays
fn strip_closing_hashes(title: &str) -> &str {
    let stripped = title.trim_end_matches('#');
    if stripped.len() < title.len() && (stripped.is_empty() || stripped.ends_with(char::is_whitespace)) {
        stripped.trim_end()
    } else {
        title
    }
}
