//! Word-level helpers applied to a single command text.
//!
//! Command texts are split on whitespace only; quotes do not group words,
//! they are simply removed from each word before wildcard handling.

/// Remove every single and double quote from `word`.
pub fn remove_quotes(word: &str) -> String {
    word.chars().filter(|&c| c != '"' && c != '\'').collect()
}

/// Split `text` into words and strip their quotes.
pub fn split_words(text: &str) -> Vec<String> {
    text.split_whitespace().map(remove_quotes).collect()
}

/// First whitespace-delimited word of `text`, quotes removed.
pub fn first_word(text: &str) -> Option<String> {
    text.split_whitespace().next().map(remove_quotes)
}

/// If `text` ends with a bare `&` preceded by whitespace, return the text
/// without the marker and the whitespace before it.
pub fn strip_background(text: &str) -> Option<&str> {
    let body = text.trim_end().strip_suffix('&')?;
    if body.ends_with(char::is_whitespace) {
        Some(body.trim_end())
    } else {
        None
    }
}
