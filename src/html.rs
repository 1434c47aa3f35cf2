//! The HTML-like element vocabulary allowed in wikitext.
//!
//! Only the tags listed here become [`Html`](crate::nodes::NodeKind::Html)
//! nodes; any other angle-bracket construct stays plain text. The content
//! categories are a reduced form of the HTML content model: they are only
//! used to decide which open tags a new tag implicitly closes.

/// The parsing rules for one allowed tag.
#[derive(Debug)]
pub struct TagSpec {
    /// Content categories and tag names this tag may nest under.
    pub parents: &'static [&'static str],
    /// Content categories this tag may contain. `"flow"` implies
    /// `"phrasing"` and `"text"`; `"*"` permits everything.
    pub content: &'static [&'static str],
    /// Whether the tag is void and must not have an end tag.
    pub no_end_tag: bool,
    /// Tags whose start implicitly closes this tag.
    pub close_next: &'static [&'static str],
}

/// Shorthand for table entries with default flags.
macro_rules! tag {
    ($parents:expr, $content:expr) => {
        TagSpec {
            parents: $parents,
            content: $content,
            no_end_tag: false,
            close_next: &[],
        }
    };
    ($parents:expr, $content:expr, no_end_tag) => {
        TagSpec {
            parents: $parents,
            content: $content,
            no_end_tag: true,
            close_next: &[],
        }
    };
    ($parents:expr, $content:expr, close_next: $close:expr) => {
        TagSpec {
            parents: $parents,
            content: $content,
            no_end_tag: false,
            close_next: $close,
        }
    };
}

/// Tags allowed in wikitext, keyed by lowercase name.
pub static ALLOWED_TAGS: phf::Map<&str, TagSpec> = phf::phf_map! {
    "abbr" => tag!(&["phrasing"], &["flow"]),
    "b" => tag!(&["phrasing"], &["flow"]),
    "bdi" => tag!(&["phrasing"], &["flow"]),
    "bdo" => tag!(&["phrasing"], &["flow"]),
    "blockquote" => tag!(&["flow"], &["flow"]),
    "br" => tag!(&["phrasing"], &[], no_end_tag),
    "caption" => tag!(&["table"], &["flow"]),
    "center" => tag!(&["flow"], &["phrasing"]),
    "cite" => tag!(&["phrasing"], &["phrasing"]),
    "code" => tag!(&["phrasing"], &["phrasing"]),
    "data" => tag!(&["phrasing"], &["phrasing"]),
    "dd" => tag!(&["dl", "div"], &["flow"], close_next: &["dd", "dt"]),
    "del" => tag!(&["phrasing"], &["phrasing"]),
    "dfn" => tag!(&["phrasing"], &["phrasing"]),
    "div" => tag!(&["flow", "dl"], &["flow"]),
    "dl" => tag!(&["flow"], &[]),
    "dt" => tag!(&["dl", "div"], &["flow"], close_next: &["dd", "dt"]),
    "em" => tag!(&["phrasing"], &["phrasing"]),
    "font" => tag!(&["phrasing"], &["phrasing"]),
    "gallery" => tag!(&["flow"], &["phrasing"]),
    "h1" => tag!(&["flow"], &["phrasing"]),
    "h2" => tag!(&["flow"], &["phrasing"]),
    "h3" => tag!(&["flow"], &["phrasing"]),
    "h4" => tag!(&["flow"], &["phrasing"]),
    "h5" => tag!(&["flow"], &["phrasing"]),
    "h6" => tag!(&["flow"], &["phrasing"]),
    "hr" => tag!(&["flow"], &[], no_end_tag),
    "i" => tag!(&["phrasing"], &["phrasing"]),
    "includeonly" => tag!(&["*"], &["*"]),
    "ins" => tag!(&["phrasing"], &["phrasing"]),
    "kbd" => tag!(&["phrasing"], &["phrasing"]),
    "li" => tag!(&["ul", "ol", "menu"], &["flow"], close_next: &["li"]),
    "math" => tag!(&["phrasing"], &["phrasing"]),
    "mark" => tag!(&["phrasing"], &["phrasing"]),
    "noinclude" => tag!(&["*"], &["*"]),
    "ol" => tag!(&["flow"], &["flow"]),
    "onlyinclude" => tag!(&["*"], &["*"]),
    "p" => tag!(&["flow"], &["phrasing"], close_next: &[
        "p", "address", "article", "aside", "blockquote", "div", "dl",
        "fieldset", "footer", "form", "h1", "h2", "h3", "h4", "h5", "h6",
        "header", "hr", "menu", "nav", "ol", "pre", "section", "table", "ul",
    ]),
    "q" => tag!(&["phrasing"], &["phrasing"]),
    "rb" => tag!(&["ruby"], &["phrasing"], close_next: &["rt", "rtc", "rp", "rb"]),
    "ref" => tag!(&["phrasing"], &["phrasing"]),
    "rp" => tag!(&["ruby"], &["text"], close_next: &["rt", "rtc", "rp", "rb"]),
    "rt" => tag!(&["ruby", "rtc"], &["phrasing"], close_next: &["rt", "rtc", "rp", "rb"]),
    "rtc" => tag!(&["ruby"], &["phrasing"], close_next: &["rt", "rtc", "rb"]),
    "ruby" => tag!(&["phrasing"], &["phrasing"]),
    "s" => tag!(&["phrasing"], &["phrasing"]),
    "samp" => tag!(&["phrasing"], &["phrasing"]),
    "small" => tag!(&["phrasing"], &["phrasing"]),
    "span" => tag!(&["phrasing"], &["phrasing"]),
    "strike" => tag!(&["phrasing"], &["phrasing"]),
    "strong" => tag!(&["phrasing"], &["phrasing"]),
    "sub" => tag!(&["phrasing"], &["phrasing"]),
    "sup" => tag!(&["phrasing"], &["phrasing"]),
    "table" => tag!(&["flow"], &[]),
    "tbody" => tag!(&["table"], &[], close_next: &["thead", "tbody", "tfoot"]),
    "td" => tag!(&["tr"], &["flow"], close_next: &["th", "td"]),
    "tfoot" => tag!(&["table"], &[], close_next: &["thead", "tbody", "tfoot"]),
    "th" => tag!(&["tr"], &["flow"], close_next: &["th", "td"]),
    "thead" => tag!(&["table"], &[], close_next: &["thead", "tbody", "tfoot"]),
    "time" => tag!(&["phrasing"], &["phrasing"]),
    "tr" => tag!(&["table", "thead", "tfoot", "tbody"], &[], close_next: &["tr"]),
    "tt" => tag!(&["phrasing"], &["phrasing"]),
    "u" => tag!(&["phrasing"], &["phrasing"]),
    "ul" => tag!(&["flow"], &["flow"]),
    "var" => tag!(&["phrasing"], &["phrasing"]),
    "wbr" => tag!(&["phrasing"], &[], no_end_tag),
};

impl TagSpec {
    /// Returns true if a tag with this spec may appear inside `parent`.
    pub fn permits_parent(&self, parent: &str) -> bool {
        let Some(parent_spec) = ALLOWED_TAGS.get(parent) else {
            return false;
        };
        let parent_any = parent_spec.content.contains(&"*");
        let parent_flow = parent_any || parent_spec.content.contains(&"flow");
        let parent_phrasing = parent_flow || parent_spec.content.contains(&"phrasing");
        self.parents.iter().any(|category| match *category {
            "flow" | "*" => parent_flow,
            "phrasing" => parent_phrasing,
            name => name == parent,
        })
    }

    /// Returns true if starting a `next` tag implicitly closes this tag.
    pub fn closed_by(&self, next: &str) -> bool {
        self.close_next.contains(&next)
    }
}

/// Returns true if `name` is an allowed tag that requires an end tag.
pub fn is_paired_tag(name: &str) -> bool {
    ALLOWED_TAGS.get(name).is_some_and(|spec| !spec.no_end_tag)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str) -> &'static TagSpec {
        ALLOWED_TAGS.get(name).unwrap()
    }

    #[test]
    fn nesting_rules() {
        assert!(spec("b").permits_parent("span"));
        assert!(spec("li").permits_parent("ul"));
        assert!(!spec("li").permits_parent("span"));
        assert!(spec("td").permits_parent("tr"));
        assert!(!spec("td").permits_parent("table"));
    }

    #[test]
    fn implicit_closing() {
        assert!(spec("li").closed_by("li"));
        assert!(spec("p").closed_by("div"));
        assert!(!spec("span").closed_by("span"));
    }

    #[test]
    fn void_tags() {
        assert!(!is_paired_tag("br"));
        assert!(!is_paired_tag("hr"));
        assert!(is_paired_tag("div"));
        assert!(!is_paired_tag("bogus"));
    }
}
