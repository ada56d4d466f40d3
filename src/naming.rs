use unicode_normalization::UnicodeNormalization;

/// Stand-in for characters that would split or escape a folder path.
/// `&` opens a modified UTF-7 escape in IMAP mailbox names.
pub const SUBSTITUTE: char = '_';

/// Used when nothing printable survives normalization.
const EMPTY_NAME: &str = "untitled";

/// Turn a feed title into a single folder segment.
///
/// NFKD-decompose, keep printable ASCII only, then replace the hierarchy
/// delimiter, `/`, `\` and `&` with [`SUBSTITUTE`]. Distinct titles can collide;
/// callers reuse the existing folder when they do.
pub fn safe_name(title: &str, delimiter: char) -> String {
    let name: String = title
        .nfkd()
        .filter(|c| (' '..='~').contains(c))
        .map(|c| {
            if c == delimiter || matches!(c, '/' | '\\' | '&') {
                SUBSTITUTE
            } else {
                c
            }
        })
        .collect();

    let name = name.trim();
    if name.is_empty() {
        EMPTY_NAME.to_string()
    } else {
        name.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_and_free_of_separators() {
        let a = safe_name("Ars Technica / News", '.');
        let b = safe_name("Ars Technica / News", '.');
        assert_eq!(a, b);
        assert_eq!(a, "Ars Technica _ News");
        assert!(!a.contains('/'));
        assert!(!a.contains('.'));
    }

    #[test]
    fn replaces_the_configured_delimiter() {
        assert_eq!(safe_name("a.b/c", '/'), "a.b_c");
        assert_eq!(safe_name("a.b/c", '.'), "a_b_c");
        assert_eq!(safe_name(r"C:\feeds", '.'), "C:_feeds");
    }

    #[test]
    fn ampersand_is_not_a_utf7_shift() {
        assert_eq!(safe_name("Ars & Tech", '.'), "Ars _ Tech");
        assert!(!safe_name("&-AMP&", '/').contains('&'));
    }

    #[test]
    fn strips_accents_and_non_ascii() {
        assert_eq!(safe_name("Café Crème", '.'), "Cafe Creme");
        assert_eq!(safe_name("ﬁle", '.'), "file");
        assert_eq!(safe_name("日本 News", '.'), "News");
    }

    #[test]
    fn empty_titles_get_a_placeholder() {
        assert_eq!(safe_name("", '.'), "untitled");
        assert_eq!(safe_name("日本", '.'), "untitled");
    }
}
