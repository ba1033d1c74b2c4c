//! Session title derivation.

pub const FALLBACK_TITLE: &str = "New chat";

/// Title for a new session: the query, else the attached file names.
///
/// Titles longer than `max_chars` characters are cut and suffixed with `...`.
pub fn derive_title(query: &str, file_names: &[&str], max_chars: usize) -> String {
    let query = query.trim();
    if !query.is_empty() {
        return truncate(query, max_chars, max_chars);
    }

    let joined = file_names
        .iter()
        .map(|n| n.trim())
        .filter(|n| !n.is_empty())
        .collect::<Vec<_>>()
        .join(", ");
    if joined.is_empty() {
        return FALLBACK_TITLE.to_string();
    }
    truncate(&joined, max_chars, max_chars.saturating_sub(3))
}

fn truncate(text: &str, max_chars: usize, keep: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(keep).collect();
    cut.push_str("...");
    cut
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_query_used_verbatim() {
        assert_eq!(derive_title("  hello  ", &[], 50), "hello");
    }

    #[test]
    fn long_query_cut_by_characters() {
        let query = "я".repeat(60);
        let title = derive_title(&query, &[], 50);
        assert_eq!(title, format!("{}...", "я".repeat(50)));
    }

    #[test]
    fn file_names_when_query_empty() {
        assert_eq!(derive_title("", &["a.pdf", "b.png"], 50), "a.pdf, b.png");

        let long = "x".repeat(30);
        let names = [long.as_str(), long.as_str()];
        let title = derive_title("", &names, 50);
        assert_eq!(title.chars().count(), 50);
        assert!(title.ends_with("..."));
    }

    #[test]
    fn fallback_without_query_or_files() {
        assert_eq!(derive_title(" ", &[], 50), FALLBACK_TITLE);
    }
}
