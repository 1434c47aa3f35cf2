//! Cookie encoding of nested wikitext constructs.
//!
//! Rather than parsing nested braces with a recursive-descent grammar, the
//! expansion engine first replaces every innermost template call,
//! argument reference, and internal link with a short opaque placeholder
//! ("cookie") that indexes a side table. Repeating the substitution to a
//! fixpoint guarantees innermost-first encoding for arbitrary nesting,
//! and content-addressed deduplication keeps repeated subexpressions to a
//! single entry.

use rand::{Rng, SeedableRng, rngs::SmallRng};
use regex::Regex;
use std::{collections::HashMap, sync::LazyLock};

/// `[[...]]` with no nested structure.
static LINK: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[\[([^\]\[{}]+)\]\]").unwrap());

/// `{{{...}}}` with no nested braces. Looped to a fixpoint on its own
/// because a single pass can mis-pair the outer braces of a doubly-nested
/// argument reference.
static ARG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\{\{\{(([^{}]|\}[^}]|\}\}[^}])*?)\}\}\}").unwrap());

/// `{{...}}` with no nested braces.
static TEMPLATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\{\{(([^{}]|\}[^}])+?)\}\}").unwrap());

/// The per-process random magic string embedded in every cookie, keeping
/// page text from colliding with placeholders.
static MAGIC: LazyLock<String> = LazyLock::new(|| {
    let mut rng = SmallRng::from_os_rng();
    (0..22)
        .map(|_| char::from(rng.sample(rand::distr::Alphanumeric)))
        .collect()
});

/// The kind of construct a cookie stands for.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum CookieKind {
    /// A template transclusion or parser function call.
    Template,
    /// A template argument reference.
    Argument,
    /// An internal link.
    Link,
}

impl CookieKind {
    /// The kind letter embedded in the cookie text.
    const fn letter(self) -> char {
        match self {
            CookieKind::Template => 'T',
            CookieKind::Argument => 'A',
            CookieKind::Link => 'L',
        }
    }

    fn from_letter(letter: &str) -> Option<Self> {
        Some(match letter {
            "T" => CookieKind::Template,
            "A" => CookieKind::Argument,
            "L" => CookieKind::Link,
            _ => return None,
        })
    }
}

/// A cookie occurrence found in encoded text.
#[derive(Clone, Debug)]
pub(crate) struct CookieRef {
    /// Byte range of the cookie in the scanned text.
    pub range: core::ops::Range<usize>,
    /// The kind of the referenced entry.
    pub kind: CookieKind,
    /// The index into the store.
    pub index: usize,
}

/// The cookie store for one expansion context.
///
/// Entries are an arena of `(kind, argument list)` records addressed by
/// index, with a reverse map for content-addressed deduplication. The
/// store is reset at the start of each top-level expansion.
#[derive(Debug)]
pub struct CookieJar {
    /// The arena of recorded constructs.
    entries: Vec<(CookieKind, Vec<String>)>,
    /// Reverse map for deduplication.
    dedup: HashMap<(CookieKind, Vec<String>), usize>,
    /// Matches any cookie belonging to this process.
    pattern: Regex,
}

impl Default for CookieJar {
    fn default() -> Self {
        Self::new()
    }
}

impl CookieJar {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            dedup: HashMap::new(),
            pattern: Regex::new(&format!("!{}([TAL])([0-9]+)!", &*MAGIC)).unwrap(),
        }
    }

    /// Clears all recorded entries.
    pub fn reset(&mut self) {
        self.entries.clear();
        self.dedup.clear();
    }

    /// Records a construct and returns its cookie text. Identical
    /// constructs share one entry.
    pub fn save(&mut self, kind: CookieKind, args: Vec<String>) -> String {
        let key = (kind, args);
        let index = match self.dedup.get(&key) {
            Some(index) => *index,
            None => {
                let index = self.entries.len();
                self.entries.push(key.clone());
                self.dedup.insert(key, index);
                index
            }
        };
        format!("!{}{}{}!", &*MAGIC, kind.letter(), index)
    }

    /// Looks up a recorded entry.
    pub fn get(&self, index: usize) -> Option<&(CookieKind, Vec<String>)> {
        self.entries.get(index)
    }

    /// Finds all cookies in `text`, in order.
    pub(crate) fn find(&self, text: &str) -> Vec<CookieRef> {
        self.pattern
            .captures_iter(text)
            .filter_map(|caps| {
                let whole = caps.get(0).unwrap();
                Some(CookieRef {
                    range: whole.range(),
                    kind: CookieKind::from_letter(caps.get(1)?.as_str())?,
                    index: caps.get(2)?.as_str().parse().ok()?,
                })
            })
            .collect()
    }

    /// Encodes all templates, template argument references, and internal
    /// links in `text`, innermost first, until no further reductions are
    /// possible.
    pub fn encode(&mut self, text: &str) -> String {
        let mut text = text.to_string();
        loop {
            let before_pass = text.clone();

            // Links first: they affect the interpretation of templates.
            text = LINK
                .replace_all(&text, |caps: &regex::Captures<'_>| {
                    self.save(CookieKind::Link, vec![caps[1].to_string()])
                })
                .into_owned();

            // Argument references, to their own fixpoint.
            loop {
                let before = text.clone();
                text = ARG
                    .replace_all(&text, |caps: &regex::Captures<'_>| {
                        let args = caps[1].split('|').map(str::to_string).collect();
                        self.save(CookieKind::Argument, args)
                    })
                    .into_owned();
                if text == before {
                    break;
                }
            }

            // Template and parser function calls.
            text = TEMPLATE
                .replace_all(&text, |caps: &regex::Captures<'_>| {
                    let args = caps[1].split('|').map(str::to_string).collect();
                    self.save(CookieKind::Template, args)
                })
                .into_owned();

            if text == before_pass {
                return text;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_template() {
        let mut jar = CookieJar::new();
        let coded = jar.encode("a{{foo|1|2}}b");
        let found = jar.find(&coded);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].kind, CookieKind::Template);
        assert_eq!(
            jar.get(found[0].index).unwrap().1,
            vec!["foo", "1", "2"]
        );
        assert!(coded.starts_with('a') && coded.ends_with('b'));
    }

    #[test]
    fn innermost_encodes_first() {
        let mut jar = CookieJar::new();
        let coded = jar.encode("{{outer|{{inner}}}}");
        let found = jar.find(&coded);
        assert_eq!(found.len(), 1, "only the outermost cookie remains in text");
        let (_, outer_args) = jar.get(found[0].index).unwrap();
        assert_eq!(outer_args[0], "outer");
        // The outer entry's second argument is the inner template's cookie.
        let inner = jar.find(&outer_args[1]);
        assert_eq!(inner.len(), 1);
        assert_eq!(jar.get(inner[0].index).unwrap().1, vec!["inner"]);
    }

    #[test]
    fn nested_argument_references_pair_correctly() {
        let mut jar = CookieJar::new();
        let coded = jar.encode("{{{a|{{{b}}}}}}");
        let found = jar.find(&coded);
        assert_eq!(found.len(), 1);
        let (kind, args) = jar.get(found[0].index).unwrap();
        assert_eq!(*kind, CookieKind::Argument);
        assert_eq!(args[0], "a");
        let inner = jar.find(&args[1]);
        assert_eq!(inner.len(), 1, "default is the inner argument reference");
        assert_eq!(jar.get(inner[0].index).unwrap().0, CookieKind::Argument);
    }

    #[test]
    fn links_encode_and_contain_templates() {
        let mut jar = CookieJar::new();
        let coded = jar.encode("[[page|{{tl}}]]");
        let found = jar.find(&coded);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].kind, CookieKind::Link);
    }

    #[test]
    fn identical_constructs_deduplicate() {
        let mut jar = CookieJar::new();
        let coded = jar.encode("{{x}} and {{x}}");
        let found = jar.find(&coded);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].index, found[1].index);
    }

    #[test]
    fn plain_text_is_untouched() {
        let mut jar = CookieJar::new();
        assert_eq!(jar.encode("no markup here"), "no markup here");
        assert_eq!(jar.encode("{unbalanced {{ braces"), "{unbalanced {{ braces");
    }

    #[test]
    fn reset_clears_entries() {
        let mut jar = CookieJar::new();
        jar.encode("{{x}}");
        jar.reset();
        assert!(jar.get(0).is_none());
    }
}
