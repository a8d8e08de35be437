//! Title normalization used as the comparison key for title-based matching.

/// Leading articles dropped from titles (English and French).
pub const LEADING_ARTICLES: &[&str] = &["the", "a", "an", "le", "la", "les", "un", "une"];

/// Canonical comparison key for a free-text title.
///
/// Lower-cases, turns every run of non-alphanumeric characters into a single
/// space, collapses whitespace, then drops leading articles as long as another
/// word follows them. `"Movie: Part 2"` becomes `"movie part 2"`, `"Le Film"`
/// becomes `"film"`.
///
/// The result is a fixed point: `normalize(&normalize(x)) == normalize(x)`.
pub fn normalize(title: &str) -> String {
    let cleaned = title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() || c.is_whitespace() { c } else { ' ' })
        .collect::<String>();

    let mut words = cleaned.split_whitespace().collect::<Vec<_>>();
    // A bare article ("The") is kept, otherwise the key would be empty.
    let leading = words
        .iter()
        .take_while(|w| LEADING_ARTICLES.contains(*w))
        .count()
        .min(words.len().saturating_sub(1));
    words.drain(..leading);
    words.join(" ")
}
