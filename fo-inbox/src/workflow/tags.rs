//! Tag normalization, detection and insertion

use super::sanitize::split_frontmatter;
use std::collections::BTreeSet;

fn is_tag_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '-' | '/')
}

/// Normalize a suggested tag to `#tag` form
///
/// Leading hashes are collapsed and inner whitespace becomes `_`. Returns
/// `None` when nothing usable remains.
pub fn normalize_tag(raw: &str) -> Option<String> {
    let body: String = raw
        .trim()
        .trim_start_matches('#')
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .chars()
        .filter(|c| is_tag_char(*c))
        .collect();

    if body.is_empty() || body.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some(format!("#{}", body))
}

/// Inline `#tags` in the body plus frontmatter `tags:` entries, as `#tag`
pub fn extract_tags(content: &str) -> BTreeSet<String> {
    let (frontmatter, body) = split_frontmatter(content);
    let mut tags: BTreeSet<String> = inline_tags(body);
    if let Some(fm) = frontmatter {
        tags.extend(frontmatter_tags(fm).iter().filter_map(|t| normalize_tag(t)));
    }
    tags
}

fn inline_tags(body: &str) -> BTreeSet<String> {
    let mut tags = BTreeSet::new();
    let chars: Vec<char> = body.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let at_boundary = i == 0 || chars[i - 1].is_whitespace();
        if chars[i] == '#' && at_boundary {
            let start = i + 1;
            let mut end = start;
            while end < chars.len() && is_tag_char(chars[end]) {
                end += 1;
            }
            if end > start {
                let tag: String = chars[start..end].iter().collect();
                if !tag.chars().all(|c| c.is_ascii_digit()) {
                    tags.insert(format!("#{}", tag));
                }
            }
            i = end.max(i + 1);
        } else {
            i += 1;
        }
    }
    tags
}

/// Values of the frontmatter `tags` key, without `#`
///
/// Handles `tags: a`, `tags: [a, b]` and block lists.
pub fn frontmatter_tags(frontmatter: &str) -> Vec<String> {
    let mut tags = Vec::new();
    let mut in_tags = false;

    for line in frontmatter.lines() {
        let trimmed = line.trim();
        if in_tags {
            if let Some(item) = trimmed.strip_prefix('-') {
                push_tag_value(&mut tags, item);
                continue;
            }
            in_tags = false;
        }

        if let Some(value) = trimmed.strip_prefix("tags:") {
            let value = value.trim();
            if value.is_empty() {
                in_tags = true;
            } else if let Some(list) = value.strip_prefix('[').and_then(|v| v.strip_suffix(']')) {
                for item in list.split(',') {
                    push_tag_value(&mut tags, item);
                }
            } else {
                push_tag_value(&mut tags, value);
            }
        }
    }
    tags
}

fn push_tag_value(tags: &mut Vec<String>, raw: &str) {
    let value = raw.trim().trim_matches(|c| c == '"' || c == '\'').trim_start_matches('#');
    if !value.is_empty() {
        tags.push(value.to_string());
    }
}

/// Whether `tag` (`#tag` form) is already present inline or in frontmatter
pub fn has_tag(content: &str, tag: &str) -> bool {
    extract_tags(content).contains(tag)
}

/// Text to append for an inline tag
///
/// The first tag in a file without any `#` is separated by a blank line.
pub fn inline_tag_suffix(content: &str, tag: &str) -> String {
    if content.contains('#') {
        format!("\n{}", tag)
    } else {
        format!("\n\n{}", tag)
    }
}

/// Content with `tag` added to the frontmatter `tags` list
///
/// Creates the frontmatter block or the `tags` key when missing.
pub fn add_frontmatter_tag(content: &str, tag: &str) -> String {
    let value = tag.trim_start_matches('#');
    let (frontmatter, body) = split_frontmatter(content);

    let Some(fm) = frontmatter else {
        return format!("---\ntags:\n  - {}\n---\n{}", value, content);
    };

    let mut existing = frontmatter_tags(fm);
    existing.push(value.to_string());

    // Rewrite the tags key as a block list, keeping every other line
    let mut lines: Vec<String> = Vec::new();
    let mut in_tags = false;
    let mut written = false;
    for line in fm.lines() {
        let trimmed = line.trim();
        if in_tags {
            if trimmed.starts_with('-') {
                continue;
            }
            in_tags = false;
        }
        if let Some(rest) = trimmed.strip_prefix("tags:") {
            in_tags = rest.trim().is_empty();
            lines.push(tag_block(&existing));
            written = true;
            continue;
        }
        lines.push(line.to_string());
    }
    if !written {
        lines.push(tag_block(&existing));
    }

    format!("---\n{}\n---\n{}", lines.join("\n"), body)
}

fn tag_block(tags: &[String]) -> String {
    let mut block = String::from("tags:");
    for tag in tags {
        block.push_str("\n  - ");
        block.push_str(tag);
    }
    block
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_tag() {
        assert_eq!(normalize_tag("machine learning"), Some("#machine_learning".to_string()));
        assert_eq!(normalize_tag("##rust"), Some("#rust".to_string()));
        assert_eq!(normalize_tag("  "), None);
        assert_eq!(normalize_tag("2024"), None);
    }

    #[test]
    fn test_extract_inline_tags_skips_headings() {
        let tags = extract_tags("# Heading\nSome #alpha text #beta/sub and c#sharp #123");
        let tags: Vec<_> = tags.into_iter().collect();
        assert_eq!(tags, vec!["#alpha".to_string(), "#beta/sub".to_string()]);
    }

    #[test]
    fn test_frontmatter_tag_forms() {
        assert_eq!(frontmatter_tags("tags: solo"), vec!["solo"]);
        assert_eq!(frontmatter_tags("tags: [a, \"b\"]"), vec!["a", "b"]);
        assert_eq!(
            frontmatter_tags("title: x\ntags:\n  - one\n  - two\nauthor: y"),
            vec!["one", "two"]
        );
    }

    #[test]
    fn test_has_tag_is_exact() {
        let content = "---\ntags: [project]\n---\nNotes about #aim";
        assert!(has_tag(content, "#project"));
        assert!(has_tag(content, "#aim"));
        assert!(!has_tag(content, "#ai"));
    }

    #[test]
    fn test_inline_suffix_spacing() {
        assert_eq!(inline_tag_suffix("plain text", "#a"), "\n\n#a");
        assert_eq!(inline_tag_suffix("text #x", "#a"), "\n#a");
    }

    #[test]
    fn test_add_frontmatter_tag_creates_block() {
        assert_eq!(add_frontmatter_tag("Body", "#idea"), "---\ntags:\n  - idea\n---\nBody");
    }

    #[test]
    fn test_add_frontmatter_tag_extends_existing_list() {
        let content = "---\ntitle: T\ntags: [a]\nauthor: me\n---\nBody";
        assert_eq!(
            add_frontmatter_tag(content, "#b"),
            "---\ntitle: T\ntags:\n  - a\n  - b\nauthor: me\n---\nBody"
        );

        let block = "---\ntags:\n  - a\n---\nBody";
        assert_eq!(add_frontmatter_tag(block, "#c"), "---\ntags:\n  - a\n  - c\n---\nBody");
    }

    #[test]
    fn test_add_frontmatter_tag_adds_missing_key() {
        let content = "---\ntitle: T\n---\nBody";
        assert_eq!(add_frontmatter_tag(content, "#n"), "---\ntitle: T\ntags:\n  - n\n---\nBody");
    }
}
