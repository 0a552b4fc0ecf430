/// A conservative URL-safe slug: lowercase ASCII alphanumerics and
/// hyphens, with runs of anything else collapsed to a single hyphen.
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut last_was_hyphen = true;

    for ch in title.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
            last_was_hyphen = false;
        } else if !last_was_hyphen {
            slug.push('-');
            last_was_hyphen = true;
        }
    }

    while slug.ends_with('-') {
        slug.pop();
    }

    if slug.is_empty() {
        "untitled".to_string()
    } else {
        slug
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugifies_punctuation_and_case() {
        assert_eq!(slugify("One Piece: Chapter 1!"), "one-piece-chapter-1");
    }

    #[test]
    fn empty_title_falls_back() {
        assert_eq!(slugify("???"), "untitled");
    }
}
