//! Content sanitization and frontmatter helpers

/// Clean extracted content before it is written back to the vault
///
/// Body lines lose NUL, U+202E (RTL override), a leading BOM and carriage
/// returns. A frontmatter block opening on the first line is preserved, but
/// lines whose key contains a space are dropped and an unclosed block is
/// closed.
pub fn sanitize_content(content: &str) -> String {
    if content.is_empty() {
        return String::new();
    }

    let mut in_frontmatter = false;
    let mut lines: Vec<String> = Vec::new();

    for (i, line) in content.split('\n').enumerate() {
        if line.trim() == "---" {
            if i == 0 {
                in_frontmatter = true;
                lines.push("---".to_string());
                continue;
            } else if in_frontmatter {
                in_frontmatter = false;
                lines.push("---".to_string());
                continue;
            }
        }

        if in_frontmatter {
            let line = line.trim_end_matches('\r');
            if is_valid_frontmatter_line(line) {
                lines.push(line.to_string());
            }
        } else {
            let cleaned: String = line
                .strip_prefix('\u{feff}')
                .unwrap_or(line)
                .chars()
                .filter(|c| !matches!(c, '\0' | '\u{202E}' | '\r'))
                .collect();
            lines.push(cleaned);
        }
    }

    if in_frontmatter {
        lines.push("---".to_string());
    }

    lines.join("\n")
}

fn is_valid_frontmatter_line(line: &str) -> bool {
    let trimmed = line.trim_start();
    // Block list items belong to the key above them
    if trimmed == "-" || trimmed.starts_with("- ") {
        return true;
    }
    let key = line.split(':').next().unwrap_or_default();
    !key.trim().is_empty() && !key.contains(' ')
}

/// Split a leading frontmatter block from the body
///
/// Returns `(frontmatter_inner, body)`; the inner text excludes the `---`
/// fences.
pub fn split_frontmatter(content: &str) -> (Option<&str>, &str) {
    let Some(rest) = content.strip_prefix("---\n") else {
        return (None, content);
    };

    if let Some(body) = rest.strip_prefix("---\n") {
        return (Some(""), body);
    }
    if let Some(end) = rest.find("\n---\n") {
        return (Some(&rest[..end]), &rest[end + 5..]);
    }
    if let Some(inner) = rest.strip_suffix("\n---") {
        return (Some(inner), "");
    }
    (None, content)
}

/// Character count of the trimmed body, frontmatter excluded
pub fn body_length(content: &str) -> usize {
    let (_, body) = split_frontmatter(content);
    body.trim().chars().count()
}

/// First `limit` characters of `content`
pub fn truncate_chars(content: &str, limit: usize) -> &str {
    match content.char_indices().nth(limit) {
        Some((idx, _)) => &content[..idx],
        None => content,
    }
}
