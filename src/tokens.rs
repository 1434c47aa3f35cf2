//! Lexical scanner for wikitext markup.
//!
//! The scanner is a single-pass longest-match state machine over the input
//! string. It produces a lazy stream of [`Token`]s and performs no I/O and
//! no recovery decisions; everything that requires context (open
//! constructs, `<nowiki>` spans, line state) lives in the tree builder.

use regex::Regex;
use std::{collections::VecDeque, sync::LazyLock};

/// Behavior switch words recognized as single tokens.
///
/// <https://www.mediawiki.org/wiki/Help:Magic_words>
static MAGIC_WORDS: phf::Set<&str> = phf::phf_set! {
    "__NOTOC__", "__FORCETOC__", "__TOC__", "__NOEDITSECTION__",
    "__NEWSECTIONLINK__", "__NONEWSECTIONLINK__", "__NOGALLERY__",
    "__HIDDENCAT__", "__EXPECTUNUSEDCATEGORY__", "__NOCONTENTCONVERT__",
    "__NOCC__", "__NOTITLECONVERT__", "__NOTC__", "__START__", "__END__",
    "__INDEX__", "__NOINDEX__", "__STATICREDIRECT__", "__NOGLOBAL__",
    "__DISAMBIG__",
};

/// A heading line. The heading delimiters may be unbalanced; the builder
/// reports the mismatch.
static HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(={2,6})[ \t]*(([^=]|=[^=])+?)[ \t]*(={2,6})[ \t]*$").unwrap());

/// An HTML comment, including the malformed whitespace-padded forms seen in
/// real page content.
static COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)^<!\s*--.*?--\s*>").unwrap());

/// An HTML-like start tag with optional attributes and self-closing slash.
static START_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?s)^<\s*([-a-zA-Z0-9]+)\s*((?:\b[-a-z0-9]+(?:=(?:"[^"]*"|'[^']*'|[^ \t\n"'`=<>]*))?\s*)*)(/\s*)?>"#,
    )
    .unwrap()
});

/// An HTML-like end tag.
static END_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^<\s*/\s*([-a-zA-Z0-9]+)\s*>").unwrap());

/// A lexical token.
///
/// Everything except [`Token::Text`] is structural. Tokens borrow from the
/// source text; fixed-form tokens can reproduce their source via
/// [`Token::literal`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Token<'a> {
    /// A run of plain text containing no structural markup.
    Text(&'a str),
    /// A single space, tab, or newline. Significant at the beginning of a
    /// line (preformatted text) and inside external links.
    Space(&'a str),
    /// The opening delimiter of a `==...==` heading line.
    SectionOpen(u8),
    /// The closing delimiter of a heading line.
    SectionClose(u8),
    /// `''`
    Italic,
    /// `'''`
    Bold,
    /// `'''''`
    BoldItalic,
    /// A run of `*#:;-` characters at the beginning of a line, or a bare
    /// colon anywhere.
    ListPrefix(&'a str),
    /// Four or more dashes at the beginning of a line.
    HLine,
    /// `[[`
    LinkOpen,
    /// `]]`
    LinkClose,
    /// `[`
    ExternalOpen,
    /// `]`
    ExternalClose,
    /// `{{`
    TemplateOpen,
    /// `}}`
    TemplateClose,
    /// `{{{`
    TemplateArgOpen,
    /// `}}}`
    TemplateArgClose,
    /// `{|`
    TableOpen,
    /// `|}`
    TableClose,
    /// `|+`
    TableCaption,
    /// `|-`
    TableRow,
    /// `!` at the beginning of a line, or `!!` anywhere.
    HeaderCell(&'a str),
    /// `||`
    DoubleBar,
    /// `|`
    Bar,
    /// An HTML comment, dropped by the builder.
    Comment(&'a str),
    /// An HTML-like start tag.
    HtmlOpen {
        /// The raw tag name, not yet case folded.
        name: &'a str,
        /// The raw attribute text between the name and the closing angle.
        attrs: &'a str,
        /// Whether the tag ended with a slash.
        self_closing: bool,
        /// The full source text of the tag.
        raw: &'a str,
    },
    /// An HTML-like end tag.
    HtmlClose {
        /// The raw tag name, not yet case folded.
        name: &'a str,
        /// The full source text of the tag.
        raw: &'a str,
    },
    /// A bare `http(s)://` URL.
    Url(&'a str),
    /// A `__WORD__` behavior switch.
    MagicWord(&'a str),
}

impl<'a> Token<'a> {
    /// Returns true for all tokens other than plain text runs.
    pub fn is_structural(&self) -> bool {
        !matches!(self, Token::Text(_))
    }

    /// The source text of the token.
    pub fn literal(&self) -> &'a str {
        match self {
            Token::Text(text)
            | Token::Space(text)
            | Token::ListPrefix(text)
            | Token::HeaderCell(text)
            | Token::Comment(text)
            | Token::Url(text)
            | Token::MagicWord(text) => text,
            Token::HtmlOpen { raw, .. } | Token::HtmlClose { raw, .. } => raw,
            Token::SectionOpen(level) | Token::SectionClose(level) => {
                &"======"[..usize::from(*level)]
            }
            Token::Italic => "''",
            Token::Bold => "'''",
            Token::BoldItalic => "'''''",
            Token::HLine => "----",
            Token::LinkOpen => "[[",
            Token::LinkClose => "]]",
            Token::ExternalOpen => "[",
            Token::ExternalClose => "]",
            Token::TemplateOpen => "{{",
            Token::TemplateClose => "}}",
            Token::TemplateArgOpen => "{{{",
            Token::TemplateArgClose => "}}}",
            Token::TableOpen => "{|",
            Token::TableClose => "|}",
            Token::TableCaption => "|+",
            Token::TableRow => "|-",
            Token::DoubleBar => "||",
            Token::Bar => "|",
        }
    }
}

/// A lazy tokenizer over a wikitext source string.
///
/// Each call to [`Tokenizer::new`] restarts from scratch; there is no
/// shared state between tokenizers.
#[derive(Debug)]
pub struct Tokenizer<'a> {
    /// The source text.
    text: &'a str,
    /// The current scan position.
    pos: usize,
    /// Whether `pos` is at the beginning of a line.
    bol: bool,
    /// Tokens already produced by a multi-token match.
    queue: VecDeque<Token<'a>>,
}

/// Creates a tokenizer for `text`.
pub fn tokenize(text: &str) -> Tokenizer<'_> {
    Tokenizer::new(text)
}

impl<'a> Tokenizer<'a> {
    /// Creates a tokenizer for `text`.
    pub fn new(text: &'a str) -> Self {
        Self {
            text,
            pos: 0,
            bol: true,
            queue: VecDeque::new(),
        }
    }

    /// Creates a tokenizer that starts mid-line, used for rescanning
    /// heading titles.
    fn new_inline(text: &'a str) -> Self {
        Self {
            bol: false,
            ..Self::new(text)
        }
    }

    /// Attempts to match a structural token starting at byte offset `at`.
    /// On success, pushes the resulting token(s) onto the queue and returns
    /// the number of source bytes consumed.
    fn try_match(&mut self, at: usize, at_bol: bool) -> Option<usize> {
        let rest = &self.text[at..];
        let bytes = rest.as_bytes();
        match bytes[0] {
            b'=' if at_bol => {
                let line_end = memchr::memchr(b'\n', bytes).unwrap_or(bytes.len());
                let caps = HEADING.captures(&rest[..line_end])?;
                let open = caps.get(1).unwrap().len().min(6) as u8;
                let close = caps.get(4).unwrap().len().min(6) as u8;
                self.queue.push_back(Token::SectionOpen(open));
                // The heading title is re-scanned with a nested tokenizer
                // so formatting inside a title is still recognized.
                let title = caps.get(2).unwrap();
                let title = &rest[title.start()..title.end()];
                self.queue.extend(Tokenizer::new_inline(title));
                self.queue.push_back(Token::SectionClose(close));
                Some(caps.get(0).unwrap().len())
            }
            b'\'' => {
                let run = run_len(bytes, b'\'');
                if run >= 5 {
                    self.queue.push_back(Token::BoldItalic);
                    Some(5)
                } else if run >= 3 {
                    self.queue.push_back(Token::Bold);
                    Some(3)
                } else if run == 2 {
                    self.queue.push_back(Token::Italic);
                    Some(2)
                } else {
                    None
                }
            }
            b'[' => {
                if bytes.get(1) == Some(&b'[') {
                    self.queue.push_back(Token::LinkOpen);
                    Some(2)
                } else {
                    self.queue.push_back(Token::ExternalOpen);
                    Some(1)
                }
            }
            b']' => {
                if bytes.get(1) == Some(&b']') {
                    self.queue.push_back(Token::LinkClose);
                    Some(2)
                } else {
                    self.queue.push_back(Token::ExternalClose);
                    Some(1)
                }
            }
            b'{' => {
                if bytes.get(1) == Some(&b'|') {
                    self.queue.push_back(Token::TableOpen);
                    return Some(2);
                }
                let run = run_len(bytes, b'{');
                self.push_brace_run(run, Token::TemplateOpen, Token::TemplateArgOpen, rest)
            }
            b'}' => {
                let run = run_len(bytes, b'}');
                self.push_brace_run(run, Token::TemplateClose, Token::TemplateArgClose, rest)
            }
            b'|' => match bytes.get(1) {
                Some(b'}') => {
                    let run = run_len(&bytes[1..], b'}');
                    if run == 1 {
                        self.queue.push_back(Token::TableClose);
                        Some(2)
                    } else {
                        // `|}}` is a bar followed by template closers, not a
                        // table end.
                        self.queue.push_back(Token::Bar);
                        let consumed = self.push_brace_run(
                            run,
                            Token::TemplateClose,
                            Token::TemplateArgClose,
                            &rest[1..],
                        )?;
                        Some(1 + consumed)
                    }
                }
                Some(b'|') => {
                    self.queue.push_back(Token::DoubleBar);
                    Some(2)
                }
                Some(b'+') => {
                    self.queue.push_back(Token::TableCaption);
                    Some(2)
                }
                Some(b'-') => {
                    self.queue.push_back(Token::TableRow);
                    Some(2)
                }
                _ => {
                    self.queue.push_back(Token::Bar);
                    Some(1)
                }
            },
            b'!' => {
                if bytes.get(1) == Some(&b'!') {
                    self.queue.push_back(Token::HeaderCell(&rest[..2]));
                    Some(2)
                } else if at_bol {
                    self.queue.push_back(Token::HeaderCell(&rest[..1]));
                    Some(1)
                } else {
                    None
                }
            }
            b'-' | b'*' | b'#' | b';' if at_bol => {
                if bytes[0] == b'-' && run_len(bytes, b'-') >= 4 {
                    self.queue.push_back(Token::HLine);
                    return Some(run_len(bytes, b'-'));
                }
                let run = class_run_len(bytes);
                self.queue.push_back(Token::ListPrefix(&rest[..run]));
                Some(run)
            }
            b':' => {
                if at_bol {
                    let run = class_run_len(bytes);
                    self.queue.push_back(Token::ListPrefix(&rest[..run]));
                    Some(run)
                } else {
                    self.queue.push_back(Token::ListPrefix(&rest[..1]));
                    Some(1)
                }
            }
            b'<' => {
                if let Some(m) = COMMENT.find(rest) {
                    self.queue.push_back(Token::Comment(&rest[..m.end()]));
                    Some(m.end())
                } else if let Some(caps) = START_TAG.captures(rest) {
                    let raw = &rest[..caps.get(0).unwrap().end()];
                    let name = caps.get(1).unwrap();
                    let attrs = caps.get(2).unwrap();
                    self.queue.push_back(Token::HtmlOpen {
                        name: &rest[name.start()..name.end()],
                        attrs: &rest[attrs.start()..attrs.end()],
                        self_closing: caps.get(3).is_some(),
                        raw,
                    });
                    Some(raw.len())
                } else if let Some(caps) = END_TAG.captures(rest) {
                    let raw = &rest[..caps.get(0).unwrap().end()];
                    let name = caps.get(1).unwrap();
                    self.queue.push_back(Token::HtmlClose {
                        name: &rest[name.start()..name.end()],
                        raw,
                    });
                    Some(raw.len())
                } else {
                    None
                }
            }
            b'h' => {
                let after_scheme = rest
                    .strip_prefix("https://")
                    .or_else(|| rest.strip_prefix("http://"))?;
                let host = after_scheme
                    .as_bytes()
                    .iter()
                    .take_while(|b| b.is_ascii_alphanumeric() || **b == b'.')
                    .count();
                let len = rest.len() - after_scheme.len() + host;
                self.queue.push_back(Token::Url(&rest[..len]));
                Some(len)
            }
            b' ' | b'\t' | b'\n' => {
                self.queue.push_back(Token::Space(&rest[..1]));
                Some(1)
            }
            b'_' => {
                let word = bytes
                    .iter()
                    .skip(2)
                    .take_while(|b| b.is_ascii_uppercase())
                    .count();
                let end = 2 + word + 2;
                if bytes.get(1) == Some(&b'_')
                    && bytes.len() >= end
                    && &rest[2 + word..end] == "__"
                    && MAGIC_WORDS.contains(&rest[..end])
                {
                    self.queue.push_back(Token::MagicWord(&rest[..end]));
                    Some(end)
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    /// Splits a run of `count` braces into open/close tokens following the
    /// same disambiguation as template and argument delimiters: four braces
    /// are two doubles, five are a double and a triple, six are two
    /// triples. Longer runs are not valid markup and scan as text.
    fn push_brace_run(
        &mut self,
        count: usize,
        double: Token<'a>,
        triple: Token<'a>,
        rest: &'a str,
    ) -> Option<usize> {
        match count {
            2 => self.queue.push_back(double),
            3 => self.queue.push_back(triple),
            4 => self.queue.extend([double.clone(), double]),
            5 => {
                // Closing runs resolve the triple first so that nested
                // `{{{arg}}}` inside `{{...}}` pairs up.
                if matches!(double, Token::TemplateClose) {
                    self.queue.extend([triple, double]);
                } else {
                    self.queue.extend([double, triple]);
                }
            }
            6 => self.queue.extend([triple.clone(), triple]),
            _ => {
                if count < 2 {
                    return None;
                }
                self.queue.push_back(Token::Text(&rest[..count]));
            }
        }
        Some(count)
    }
}

impl<'a> Iterator for Tokenizer<'a> {
    type Item = Token<'a>;

    fn next(&mut self) -> Option<Token<'a>> {
        loop {
            if let Some(token) = self.queue.pop_front() {
                return Some(token);
            }
            if self.pos >= self.text.len() {
                return None;
            }

            let start = self.pos;
            let bytes = self.text.as_bytes();
            let mut i = start;
            while i < bytes.len() {
                let at_bol = self.bol && i == start;
                if SPECIAL_STARTS[usize::from(bytes[i])]
                    && let Some(consumed) = self.try_match(i, at_bol)
                {
                    if i > start {
                        self.queue.push_front(Token::Text(&self.text[start..i]));
                    }
                    self.pos = i + consumed;
                    self.bol = self.text[i..self.pos].ends_with('\n');
                    break;
                }
                i += 1;
            }

            if i >= bytes.len() {
                self.pos = self.text.len();
                self.bol = false;
                if start < self.text.len() {
                    return Some(Token::Text(&self.text[start..]));
                }
            }
        }
    }
}

/// Bytes at which a structural token can begin.
static SPECIAL_STARTS: [bool; 256] = {
    let mut table = [false; 256];
    let mut i = 0;
    let specials = b"'[]{}|!:<h \t\n=-*#;_";
    while i < specials.len() {
        table[specials[i] as usize] = true;
        i += 1;
    }
    table
};

/// The length of the run of `byte` at the start of `bytes`.
fn run_len(bytes: &[u8], byte: u8) -> usize {
    bytes.iter().take_while(|b| **b == byte).count()
}

/// The length of the run of list prefix characters at the start of `bytes`.
fn class_run_len(bytes: &[u8]) -> usize {
    bytes
        .iter()
        .take_while(|b| matches!(**b, b'-' | b'*' | b':' | b';' | b'#'))
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all(text: &str) -> Vec<Token<'_>> {
        Tokenizer::new(text).collect()
    }

    #[test]
    fn plain_text_and_spaces() {
        assert_eq!(all("just some text"), vec![
            Token::Text("just"),
            Token::Space(" "),
            Token::Text("some"),
            Token::Space(" "),
            Token::Text("text"),
        ]);
    }

    #[test]
    fn heading_line_rescans_title() {
        assert_eq!(all("==''Foo''==\n"), vec![
            Token::SectionOpen(2),
            Token::Italic,
            Token::Text("Foo"),
            Token::Italic,
            Token::SectionClose(2),
            Token::Space("\n"),
        ]);
    }

    #[test]
    fn heading_mismatched_levels_survive() {
        assert_eq!(all("==Foo===\n"), vec![
            Token::SectionOpen(2),
            Token::Text("Foo"),
            Token::SectionClose(3),
            Token::Space("\n"),
        ]);
    }

    #[test]
    fn heading_requires_line_start() {
        assert!(
            !all("x ==Foo==\n")
                .iter()
                .any(|t| matches!(t, Token::SectionOpen(_))),
            "mid-line equals runs are not headings"
        );
    }

    #[test]
    fn brace_runs_disambiguate() {
        assert_eq!(all("{{{{"), vec![Token::TemplateOpen, Token::TemplateOpen]);
        assert_eq!(all("{{{{{"), vec![
            Token::TemplateOpen,
            Token::TemplateArgOpen
        ]);
        assert_eq!(all("}}}}}"), vec![
            Token::TemplateArgClose,
            Token::TemplateClose
        ]);
        assert_eq!(all("{{{{{{"), vec![
            Token::TemplateArgOpen,
            Token::TemplateArgOpen
        ]);
    }

    #[test]
    fn bar_before_close_braces_is_not_table_end() {
        assert_eq!(all("{{a|b}}"), vec![
            Token::TemplateOpen,
            Token::Text("a"),
            Token::Bar,
            Token::Text("b"),
            Token::TemplateClose,
        ]);
        assert_eq!(all("|}}"), vec![Token::Bar, Token::TemplateClose]);
        assert_eq!(all("|}"), vec![Token::TableClose]);
    }

    #[test]
    fn quote_runs() {
        assert_eq!(all("''i''"), vec![
            Token::Italic,
            Token::Text("i"),
            Token::Italic
        ]);
        assert_eq!(all("'''''bi'''''"), vec![
            Token::BoldItalic,
            Token::Text("bi"),
            Token::BoldItalic,
        ]);
        assert_eq!(all("''''b"), vec![Token::Bold, Token::Text("'b")]);
    }

    #[test]
    fn list_prefixes_only_at_line_start() {
        assert_eq!(all("* item\n"), vec![
            Token::ListPrefix("*"),
            Token::Space(" "),
            Token::Text("item"),
            Token::Space("\n"),
        ]);
        assert_eq!(all("a * b")[2], Token::Text("*"));
    }

    #[test]
    fn colon_is_a_token_mid_line() {
        assert_eq!(all("a:b"), vec![
            Token::Text("a"),
            Token::ListPrefix(":"),
            Token::Text("b"),
        ]);
    }

    #[test]
    fn html_tags_and_comments() {
        assert_eq!(all("<b>x</b>"), vec![
            Token::HtmlOpen {
                name: "b",
                attrs: "",
                self_closing: false,
                raw: "<b>"
            },
            Token::Text("x"),
            Token::HtmlClose {
                name: "b",
                raw: "</b>"
            },
        ]);
        assert_eq!(all("<br/>")[0], Token::HtmlOpen {
            name: "br",
            attrs: "",
            self_closing: true,
            raw: "<br/>"
        });
        assert_eq!(all("a<!-- note -->b"), vec![
            Token::Text("a"),
            Token::Comment("<!-- note -->"),
            Token::Text("b"),
        ]);
    }

    #[test]
    fn bare_urls() {
        assert_eq!(all("see https://example.org/x"), vec![
            Token::Text("see"),
            Token::Space(" "),
            Token::Url("https://example.org"),
            Token::Text("/x"),
        ]);
    }

    #[test]
    fn magic_words() {
        assert_eq!(all("__NOTOC__"), vec![Token::MagicWord("__NOTOC__")]);
        assert_eq!(all("__NOPE__"), vec![
            Token::Text("__NOPE__"),
        ]);
    }

    #[test]
    fn hline_and_short_dash_runs() {
        assert_eq!(all("----\n")[0], Token::HLine);
        assert_eq!(all("-----\n")[0], Token::HLine);
        assert_eq!(all("---x\n")[0], Token::ListPrefix("---"));
    }
}
