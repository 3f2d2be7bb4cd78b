use pulldown_cmark::{Event, Options, Parser, Tag, TagEnd};
use regex::Regex;
use std::sync::OnceLock;

fn page_marker_regex() -> &'static Regex {
    static PAGE_MARKER: OnceLock<Regex> = OnceLock::new();
    PAGE_MARKER.get_or_init(|| Regex::new(r"--- Page \d+ ---").expect("valid page marker regex"))
}

/// Boundary marker written before the text of 1-indexed page `page`
pub fn page_marker(page: usize) -> String {
    format!("\n\n--- Page {} ---\n\n", page)
}

/// Concatenate page texts, each preceded by its page marker
pub fn mark_pages<'a>(pages: impl IntoIterator<Item = &'a str>) -> String {
    let mut text = String::new();
    for (idx, page) in pages.into_iter().enumerate() {
        text.push_str(&page_marker(idx + 1));
        text.push_str(page);
    }
    text
}

/// Split page-marked text back into pages, dropping blank segments
pub fn split_pages(text: &str) -> Vec<&str> {
    page_marker_regex()
        .split(text)
        .filter(|page| !page.trim().is_empty())
        .collect()
}

/// Group pages into consecutive chunks of `pages_per_chunk`, reading at most
/// `max_pages` pages. Pages inside a chunk are joined with a newline.
pub fn group_pages(pages: &[&str], pages_per_chunk: usize, max_pages: usize) -> Vec<String> {
    let limit = pages.len().min(max_pages);
    pages[..limit]
        .chunks(pages_per_chunk.max(1))
        .map(|group| group.join("\n"))
        .collect()
}

/// First `max_chars` characters of `text`, never splitting a code point
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

/// Flatten Markdown into plain text.
///
/// Headings, paragraphs, list items and code blocks each end up on their own
/// block separated by a blank line; inline markup is dropped, inline code
/// keeps its backticks.
pub fn markdown_to_text(markdown: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_FOOTNOTES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TASKLISTS);

    let parser = Parser::new_ext(markdown, options);

    let mut blocks: Vec<String> = Vec::new();
    let mut current = String::new();

    let flush = |current: &mut String, blocks: &mut Vec<String>| {
        let block = current.trim();
        if !block.is_empty() {
            blocks.push(block.to_string());
        }
        current.clear();
    };

    for event in parser {
        match event {
            Event::Start(Tag::Heading { .. })
            | Event::Start(Tag::Paragraph)
            | Event::Start(Tag::CodeBlock(_))
            | Event::Start(Tag::Item) => flush(&mut current, &mut blocks),

            Event::End(TagEnd::Heading(_))
            | Event::End(TagEnd::Paragraph)
            | Event::End(TagEnd::CodeBlock)
            | Event::End(TagEnd::Item)
            | Event::End(TagEnd::TableRow)
            | Event::End(TagEnd::TableHead) => flush(&mut current, &mut blocks),

            Event::End(TagEnd::TableCell) => current.push_str(" | "),

            Event::Text(text) => current.push_str(&text),

            Event::Code(code) => {
                current.push('`');
                current.push_str(&code);
                current.push('`');
            }

            Event::SoftBreak | Event::HardBreak => current.push('\n'),

            _ => {}
        }
    }

    flush(&mut current, &mut blocks);
    blocks.join("\n\n")
}
