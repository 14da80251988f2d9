//! YouTube link detection and transcript section formatting

/// Marker opening the appended transcript section
pub const TRANSCRIPT_HEADING: &str = "\n\n## YouTube Video: ";

const LINK_PREFIXES: [&str; 2] = ["youtu.be/", "youtube.com/watch?v="];

fn is_id_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

/// Video id of the first recognizable YouTube link
///
/// Short `youtu.be/<id>` links take precedence over `youtube.com/watch?v=<id>`.
pub fn extract_video_id(content: &str) -> Option<String> {
    LINK_PREFIXES.iter().find_map(|prefix| {
        content.match_indices(prefix).find_map(|(idx, _)| {
            let id: String = content[idx + prefix.len()..]
                .chars()
                .take_while(|c| is_id_char(*c))
                .collect();
            (!id.is_empty()).then_some(id)
        })
    })
}

/// Section appended to the container after a transcript fetch
pub fn transcript_section(title: &str, transcript: &str) -> String {
    format!("{}{}\n\n### Transcript\n\n{}", TRANSCRIPT_HEADING, title, transcript)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_link() {
        let content = "watch https://youtu.be/dQw4w9WgXcQ?t=10 later";
        assert_eq!(extract_video_id(content), Some("dQw4w9WgXcQ".to_string()));
    }

    #[test]
    fn test_watch_link() {
        let content = "see www.youtube.com/watch?v=abc_DEF-123&list=x";
        assert_eq!(extract_video_id(content), Some("abc_DEF-123".to_string()));
    }

    #[test]
    fn test_short_link_wins_over_watch_link() {
        let content = "https://youtube.com/watch?v=first then https://youtu.be/second";
        assert_eq!(extract_video_id(content), Some("second".to_string()));
    }

    #[test]
    fn test_no_link() {
        assert_eq!(extract_video_id("youtube is great"), None);
        assert_eq!(extract_video_id("https://youtu.be/"), None);
    }

    #[test]
    fn test_transcript_section_layout() {
        assert_eq!(
            transcript_section("Talk", "hello"),
            "\n\n## YouTube Video: Talk\n\n### Transcript\n\nhello"
        );
    }
}
