//! Shared text utilities used by parser functions and the macro bridge.

use percent_encoding::{AsciiSet, CONTROLS, NON_ALPHANUMERIC, percent_decode_str};
use std::borrow::Cow;

/// Characters percent-encoded in query-style URL encoding. PHP-style:
/// alphanumerics, `-`, `_`, and `.` pass through, spaces become `+`.
const QUERY: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_').remove(b'.');

/// Characters percent-encoded in path-style (raw) URL encoding.
const PATH: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Characters percent-encoded in wiki page-name encoding. Path separators
/// and title punctuation survive so the result remains a readable title.
const WIKI: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'%')
    .add(b'&')
    .add(b'+')
    .add(b'=')
    .add(b'?')
    .add(b'#')
    .add(b'<')
    .add(b'>')
    .add(b'[')
    .add(b']')
    .add(b'{')
    .add(b'}')
    .add(b'|')
    .add(b'"');

/// The URL encoding flavours of `urlencode`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum UrlFlavor {
    /// `+` for spaces, suitable for query strings.
    Query,
    /// `_` for spaces, suitable for wiki page names in paths.
    Wiki,
    /// Fully percent-encoded path component.
    Path,
}

impl UrlFlavor {
    /// Parses the flavour argument of `urlencode`.
    pub fn from_arg(arg: &str) -> Self {
        match arg.trim().to_ascii_uppercase().as_str() {
            "WIKI" => UrlFlavor::Wiki,
            "PATH" => UrlFlavor::Path,
            _ => UrlFlavor::Query,
        }
    }
}

/// Percent-encodes `text` according to the given flavour.
pub fn url_encode(text: &str, flavor: UrlFlavor) -> String {
    match flavor {
        UrlFlavor::Query => percent_encoding::utf8_percent_encode(text, QUERY)
            .to_string()
            .replace("%20", "+"),
        UrlFlavor::Wiki => {
            percent_encoding::utf8_percent_encode(&text.replace(' ', "_"), WIKI).to_string()
        }
        UrlFlavor::Path => percent_encoding::utf8_percent_encode(text, PATH).to_string(),
    }
}

/// Decodes a query-style URL-encoded string: `+` becomes a space, percent
/// escapes are decoded.
pub fn url_decode(text: &str) -> String {
    let plused = text.replace('+', " ");
    percent_decode_str(&plused).decode_utf8_lossy().into_owned()
}

/// Encodes section heading text into a format suitable for use as a URL
/// anchor.
pub fn anchor_encode(text: &str) -> String {
    let decoded = html_escape::decode_html_entities(text.trim());
    let mut id = String::with_capacity(decoded.len());
    let mut last_space = false;
    for c in decoded.chars() {
        if c.is_whitespace() || c == '_' {
            if !last_space {
                id.push('_');
            }
            last_space = true;
        } else {
            id.push(c);
            last_space = false;
        }
    }
    percent_encoding::utf8_percent_encode(id.trim_matches('_'), WIKI).to_string()
}

/// Decodes HTML character entities, including numeric ones.
pub fn decode_entities(text: &str) -> Cow<'_, str> {
    if memchr::memchr(b'&', text.as_bytes()).is_none() {
        return Cow::Borrowed(text);
    }
    html_escape::decode_html_entities(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_encoding_uses_plus() {
        assert_eq!(url_encode("a b&c", UrlFlavor::Query), "a+b%26c");
        assert_eq!(url_encode("x.y-z_w", UrlFlavor::Query), "x.y-z_w");
    }

    #[test]
    fn wiki_encoding_uses_underscore() {
        assert_eq!(url_encode("Main page/Sub", UrlFlavor::Wiki), "Main_page/Sub");
        assert_eq!(url_encode("a&b", UrlFlavor::Wiki), "a%26b");
    }

    #[test]
    fn path_encoding_is_full() {
        assert_eq!(url_encode("a b/c", UrlFlavor::Path), "a%20b%2Fc");
        assert_eq!(url_encode("a~b", UrlFlavor::Path), "a~b");
    }

    #[test]
    fn decode_reverses_query() {
        assert_eq!(url_decode("a+b%26c"), "a b&c");
    }

    #[test]
    fn anchors_collapse_whitespace() {
        assert_eq!(anchor_encode("  Etymology   2 "), "Etymology_2");
        assert_eq!(anchor_encode("a&amp;b"), "a%26b");
    }

    #[test]
    fn entity_decoding() {
        assert_eq!(decode_entities("a&lt;b"), "a<b");
        assert_eq!(decode_entities("a&#65;b"), "aAb");
        assert_eq!(decode_entities("plain"), "plain");
    }
}
