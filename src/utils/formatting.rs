/// Shortens text for log lines without splitting a character.
pub fn preview_text(text: &str) -> String {
    const MAX_CHARS: usize = 120;
    let mut chars = text.chars();
    let preview: String = chars.by_ref().take(MAX_CHARS).collect();
    if chars.next().is_some() {
        format!("{preview}...")
    } else {
        preview
    }
}

/// Truncates to at most `max_chars` characters.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

/// Replaces every whitespace-delimited occurrence of `word` in `text`.
///
/// Whitespace is preserved exactly, so the output only differs where a whole
/// token matched.
pub fn replace_whole_words(text: &str, word: &str, replacement: &str) -> String {
    if word.is_empty() {
        return text.to_string();
    }

    let mut output = String::with_capacity(text.len());
    let mut token_start: Option<usize> = None;

    for (index, ch) in text.char_indices() {
        if ch.is_whitespace() {
            if let Some(start) = token_start.take() {
                push_token(&mut output, &text[start..index], word, replacement);
            }
            output.push(ch);
        } else if token_start.is_none() {
            token_start = Some(index);
        }
    }

    if let Some(start) = token_start {
        push_token(&mut output, &text[start..], word, replacement);
    }

    output
}

fn push_token(output: &mut String, token: &str, word: &str, replacement: &str) {
    if token == word {
        output.push_str(replacement);
    } else {
        output.push_str(token);
    }
}

#[cfg(test)]
mod tests {
    use super::{preview_text, replace_whole_words, truncate_chars};

    #[test]
    fn preview_text_keeps_short_messages() {
        assert_eq!(preview_text("hello"), "hello");
    }

    #[test]
    fn preview_text_truncates_long_messages() {
        let long = "é".repeat(200);
        let preview = preview_text(&long);
        assert!(preview.ends_with("..."));
        assert_eq!(preview.chars().count(), 123);
    }

    #[test]
    fn truncate_chars_counts_characters_not_bytes() {
        assert_eq!(truncate_chars("👑👑👑", 2), "👑👑");
    }

    #[test]
    fn replace_whole_words_skips_partial_matches() {
        assert_eq!(
            replace_whole_words("Kappa KappaPride  Kappa", "Kappa", "<k>"),
            "<k> KappaPride  <k>"
        );
    }

    #[test]
    fn replace_whole_words_handles_non_word_names() {
        assert_eq!(replace_whole_words("lol D: ok", "D:", "<d>"), "lol <d> ok");
    }
}
