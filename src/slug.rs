//! Slug derivation.
//!
//! Slugs are part of page identity: the same title must slugify identically
//! at build time and in any downstream consumer, so this is a pure function
//! with no locale dependence.

use deunicode::deunicode;

/// Generate an ASCII-only slug from a title.
///
/// Lowercases, transliterates to ASCII, and collapses every run of
/// punctuation or whitespace into a single `-`. Never produces leading or
/// trailing separators.
pub fn slugify(title: &str) -> String {
    let ascii = deunicode(&title.to_lowercase());

    let mut slug = String::with_capacity(ascii.len());
    let mut pending_separator = false;

    for ch in ascii.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_separator && !slug.is_empty() {
                slug.push('-');
            }
            pending_separator = false;
            slug.push(ch);
        } else {
            pending_separator = true;
        }
    }

    slug
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_title() {
        assert_eq!(slugify("Hello World"), "hello-world");
    }

    #[test]
    fn test_punctuation_runs_collapse() {
        assert_eq!(slugify("What's new -- in 2012?!"), "what-s-new-in-2012");
    }

    #[test]
    fn test_no_leading_or_trailing_separator() {
        assert_eq!(slugify("  (parenthetical)  "), "parenthetical");
        assert_eq!(slugify("...dots..."), "dots");
    }

    #[test]
    fn test_transliteration() {
        assert_eq!(slugify("Ünïcödé Tîtle"), "unicode-title");
        assert_eq!(slugify("Ætna & Œuvre"), "aetna-oeuvre");
    }

    #[test]
    fn test_deterministic() {
        let title = "Sample Page With Attachments";
        assert_eq!(slugify(title), slugify(title));
        assert_eq!(slugify(title), "sample-page-with-attachments");
    }

    #[test]
    fn test_empty_and_symbol_only() {
        assert_eq!(slugify(""), "");
        assert_eq!(slugify("!!!"), "");
    }
}
