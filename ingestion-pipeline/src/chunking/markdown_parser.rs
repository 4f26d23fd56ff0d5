use regex::Regex;
use std::sync::OnceLock;

/// A contiguous run of markdown text under one header (or the headerless
/// preamble, at level 0).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub title: String,
    pub level: usize,
    pub content: String,
    pub start_line: usize,
    /// Ancestor titles joined by " > ", ending in this section's own title.
    pub hierarchy_path: String,
}

fn header_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^(#{1,6})\s+(.+)$").expect("valid header regex"))
}

/// Splits markdown into an ordered, flat list of sections and stamps each
/// with its hierarchy path.
///
/// A running stack of `(level, title)` pairs tracks ancestry: when a header
/// at level L appears, every stack entry with level >= L is popped before the
/// new header is pushed.
pub fn parse(text: &str) -> Vec<Section> {
    let mut sections = Vec::new();
    let mut header_stack: Vec<(usize, String)> = Vec::new();

    let mut current_title = String::new();
    let mut current_level = 0usize;
    let mut current_content: Vec<&str> = Vec::new();
    let mut current_start = 0usize;

    for (line_num, line) in text.lines().enumerate() {
        if let Some(captures) = header_pattern().captures(line) {
            if !current_content.is_empty() || !current_title.is_empty() {
                sections.push(Section {
                    hierarchy_path: build_hierarchy_path(
                        &header_stack,
                        current_level,
                        &current_title,
                    ),
                    title: std::mem::take(&mut current_title),
                    level: current_level,
                    content: current_content.join("\n").trim().to_string(),
                    start_line: current_start,
                });
            }

            let level = captures[1].len();
            let title = captures[2].trim().to_string();

            header_stack.retain(|(l, _)| *l < level);
            header_stack.push((level, title.clone()));

            current_title = title;
            current_level = level;
            current_content = Vec::new();
            current_start = line_num;
        } else {
            current_content.push(line);
        }
    }

    if !current_content.is_empty() || !current_title.is_empty() {
        sections.push(Section {
            hierarchy_path: build_hierarchy_path(&header_stack, current_level, &current_title),
            title: current_title,
            level: current_level,
            content: current_content.join("\n").trim().to_string(),
            start_line: current_start,
        });
    }

    // Text with no headers at all becomes a single level-0 section.
    if sections.is_empty() && !text.trim().is_empty() {
        sections.push(Section {
            title: String::new(),
            level: 0,
            content: text.trim().to_string(),
            start_line: 0,
            hierarchy_path: String::new(),
        });
    }

    sections
}

fn build_hierarchy_path(
    stack: &[(usize, String)],
    current_level: usize,
    current_title: &str,
) -> String {
    if stack.is_empty() && current_title.is_empty() {
        return String::new();
    }

    let mut parts: Vec<&str> = stack
        .iter()
        .filter(|(level, _)| *level < current_level)
        .map(|(_, title)| title.as_str())
        .collect();
    if !current_title.is_empty() {
        parts.push(current_title);
    }

    parts.join(" > ")
}

pub fn count_headers(text: &str) -> usize {
    text.lines()
        .filter(|line| header_pattern().is_match(line))
        .count()
}

pub fn header_levels(text: &str) -> Vec<usize> {
    let mut levels: Vec<usize> = text
        .lines()
        .filter_map(|line| header_pattern().captures(line).map(|c| c[1].len()))
        .collect();
    levels.sort_unstable();
    levels.dedup();
    levels
}

/// First non-header paragraph, truncated at a word boundary to `max_chars`.
pub fn extract_first_paragraph(text: &str, max_chars: usize) -> String {
    let mut paragraph_lines: Vec<&str> = Vec::new();
    let mut in_paragraph = false;

    for line in text.lines() {
        let line = line.trim();

        if line.is_empty() {
            if in_paragraph {
                break;
            }
            continue;
        }
        if header_pattern().is_match(line) {
            continue;
        }

        paragraph_lines.push(line);
        in_paragraph = true;
    }

    let paragraph = paragraph_lines.join(" ");
    if paragraph.chars().count() <= max_chars {
        return paragraph;
    }

    let truncated: String = paragraph.chars().take(max_chars).collect();
    let cut = truncated.rfind(' ').unwrap_or(truncated.len());
    format!("{}...", &truncated[..cut])
}

/// Splits on blank lines, dropping empty fragments.
pub fn split_paragraphs(text: &str) -> Vec<String> {
    static SPLITTER: OnceLock<Regex> = OnceLock::new();
    let splitter = SPLITTER.get_or_init(|| Regex::new(r"\n\s*\n").expect("valid split regex"));

    splitter
        .split(text)
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}
