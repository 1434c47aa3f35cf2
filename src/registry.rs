//! The immutable template, module, and redirect registry.
//!
//! A registry is assembled once from dump-derived page records and then
//! shared read-only by every expansion context. Assembly performs
//! transclusion-body extraction, canonical naming, redirect aliasing, and
//! the static pre-expand analysis.

use crate::html;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::{
    collections::{HashMap, HashSet},
    sync::LazyLock,
};

/// One page captured from the dump-processing phase.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct PageRecord {
    /// The page kind tag: `"Template"`, `"Scribunto"`, or `"#redirect"`.
    pub kind: String,
    /// The page title, namespace included.
    pub title: String,
    /// The raw page text (template body, module source, or redirect
    /// target).
    pub text: String,
}

/// The source registry consulted during expansion.
#[derive(Debug, Default)]
pub struct SourceRegistry {
    /// Canonical template name to transcludable body.
    templates: HashMap<String, String>,
    /// Module title (without `Module:` prefix) to module source.
    modules: HashMap<String, String>,
    /// Full redirect table, original titles.
    redirects: HashMap<String, String>,
    /// Canonical names of templates whose bodies must be expanded before
    /// the surrounding page can be parsed into a well-formed tree.
    need_pre_expand: HashSet<String>,
}

impl SourceRegistry {
    /// Builds a registry from captured page records.
    pub fn from_pages<I>(pages: I) -> Self
    where
        I: IntoIterator<Item = PageRecord>,
    {
        let mut registry = SourceRegistry::default();

        // A few predefined templates that exist on every wiki.
        registry
            .templates
            .insert("!".into(), "&vert;".into());
        registry
            .templates
            .insert("%28%28".into(), "&lbrace;&lbrace;".into());
        registry
            .templates
            .insert("%29%29".into(), "&rbrace;&rbrace;".into());

        // Which templates include which, for pre-expand propagation.
        let mut included_by: HashMap<String, HashSet<String>> = HashMap::new();
        let mut queue: Vec<String> = Vec::new();

        for page in pages {
            let title = html_escape::decode_html_entities(&page.title).into_owned();
            let text = html_escape::decode_html_entities(&page.text).into_owned();
            match page.kind.as_str() {
                "#redirect" => {
                    registry.redirects.insert(title, text);
                }
                "Scribunto" => {
                    let name = title.strip_prefix("Module:").unwrap_or(&title);
                    registry.modules.insert(name.to_string(), text);
                }
                "Template" => {
                    // Sandboxes and user templates are not part of the
                    // live template set.
                    if title.ends_with("/testcases") || title.starts_with("User:") {
                        continue;
                    }
                    let name = canonicalize_template_name(&title);
                    let body = template_to_body(&text);
                    let analysis = analyze_template(&body);
                    for included in analysis.included_templates {
                        included_by.entry(included).or_default().insert(name.clone());
                    }
                    if analysis.pre_expand {
                        registry.need_pre_expand.insert(name.clone());
                        queue.push(name.clone());
                    }
                    registry.templates.insert(name, body);
                }
                other => {
                    log::debug!("ignoring page {title:?} with unhandled kind {other:?}");
                }
            }
        }

        // Propagate the pre-expand flag to every template that transitively
        // includes a pre-expand template.
        while let Some(name) = queue.pop() {
            let Some(including) = included_by.get(&name) else {
                continue;
            };
            for parent in including {
                if registry.need_pre_expand.insert(parent.clone()) {
                    queue.push(parent.clone());
                }
            }
        }

        // Alias redirected template names to their target bodies.
        for (from, to) in &registry.redirects {
            let (Some(from), Some(to)) = (
                from.strip_prefix("Template:"),
                to.strip_prefix("Template:"),
            ) else {
                continue;
            };
            let from = canonicalize_template_name(from);
            let to = canonicalize_template_name(to);
            if registry.templates.contains_key(&from) {
                continue;
            }
            let Some(body) = registry.templates.get(&to).cloned() else {
                log::debug!("template {from:?} redirects to missing template {to:?}");
                continue;
            };
            registry.templates.insert(from.clone(), body);
            if registry.need_pre_expand.contains(&to) {
                registry.need_pre_expand.insert(from);
            }
        }

        registry
    }

    /// Looks up a template body by canonical name.
    pub fn template(&self, name: &str) -> Option<&str> {
        self.templates.get(name).map(String::as_str)
    }

    /// Returns true if a template with the given canonical name exists.
    pub fn has_template(&self, name: &str) -> bool {
        self.templates.contains_key(name)
    }

    /// Looks up a module body by name (without `Module:` prefix).
    pub fn module(&self, name: &str) -> Option<&str> {
        self.modules.get(name).map(String::as_str)
    }

    /// Looks up the redirect target of a full page title.
    pub fn redirect_target(&self, title: &str) -> Option<&str> {
        self.redirects.get(title).map(String::as_str)
    }

    /// Returns true if the named template must be expanded before the
    /// surrounding document is parsed.
    pub fn needs_pre_expand(&self, name: &str) -> bool {
        self.need_pre_expand.contains(name)
    }

    /// The canonical names of all templates carrying the pre-expand flag.
    pub fn pre_expand_names(&self) -> &HashSet<String> {
        &self.need_pre_expand
    }
}

/// Canonicalizes a template name: underscores become spaces, whitespace
/// runs collapse, reserved punctuation is escaped, the `Template:` prefix
/// is dropped, and the first letter is uppercased.
pub fn canonicalize_template_name(name: &str) -> String {
    static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

    let name = name.replace('_', " ");
    let name = WHITESPACE.replace_all(&name, " ");
    let name = name
        .replace('(', "%28")
        .replace(')', "%29")
        .replace('&', "%26")
        .replace('+', "%2B");
    let name = name.trim();
    let name = match name.get(..9) {
        Some(prefix) if prefix.eq_ignore_ascii_case("template:") => &name[9..],
        _ => name,
    };
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Extracts the portion of a template page that is actually transcluded,
/// resolving `<noinclude>`, `<includeonly>`, and `<onlyinclude>`.
pub fn template_to_body(text: &str) -> String {
    static COMMENT: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?s)<!\s*--.*?--\s*>").unwrap());
    static NOINCLUDE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?is)<\s*noinclude\s*>.*?<\s*/\s*noinclude\s*>").unwrap());
    static NOINCLUDE_EMPTY: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?is)<\s*noinclude\s*/\s*>").unwrap());
    static ONLYINCLUDE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(
            r"(?is)<\s*onlyinclude\s*>(.*?)<\s*/\s*onlyinclude\s*>|<\s*onlyinclude\s*/\s*>",
        )
        .unwrap()
    });
    static INCLUDEONLY: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?is)<\s*(/\s*)?includeonly\s*(/\s*)?>").unwrap());

    let text = COMMENT.replace_all(text, "");
    let text = NOINCLUDE.replace_all(&text, "");
    let text = NOINCLUDE_EMPTY.replace_all(&text, "");

    // <onlyinclude> sections, when present, are the only transcluded text.
    let only: Vec<&str> = ONLYINCLUDE
        .captures_iter(&text)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
        .collect();
    let text = if only.is_empty() {
        text.to_string()
    } else {
        only.concat()
    };

    INCLUDEONLY.replace_all(&text, "").into_owned()
}

/// The result of statically analyzing a template body.
struct TemplateAnalysis {
    /// Canonical names of templates the body textually includes.
    included_templates: HashSet<String>,
    /// Whether the body's structure requires pre-expansion.
    pre_expand: bool,
}

/// Inspects a template body for structure that cannot be parsed without
/// expanding it in place: a leading list marker, unpaired table syntax,
/// stray table element tokens, or unbalanced paired HTML tags. Also
/// collects the names of directly included templates so the flag can be
/// propagated.
fn analyze_template(body: &str) -> TemplateAnalysis {
    static PAIRED_TABLE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?s)(^|\n)\{\|([^\n]|\n+[^{|]|\n+\|[^}]|\n+\{[^|])*?\n+\|\}").unwrap()
    });
    static UNPAIRED_TABLE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?s)(^|\n)(\{\||\|\})").unwrap());
    static ARG_REF: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?s)\{\{\{([^{}]|\}[^}]|\}\}[^}])*?\}\}\}").unwrap());
    static TEMPLATE_CALL: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?s)\{\{([^{}]|\}[^}])*?\}\}").unwrap());
    static TABLE_ELEMENT: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?s)(^|\n)(\|\+|\|-|\||!)").unwrap());
    static TAG: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?si)<\s*(/\s*)?([-a-zA-Z0-9]+)\b\s*[^>]*?(/\s*)?>").unwrap()
    });
    static INCLUDED_NAME: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?s)(^|[^{])(\{\{)?\{\{([^{]*?)(\||\}\})").unwrap()
    });
    static NOWIKI_EMPTY: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?si)<\s*nowiki\s*/\s*>").unwrap());

    let contains_list = body.starts_with(['#', '*', ';', ':']);

    // Remove paired tables, repeatedly for nesting.
    let mut unpaired = body.to_string();
    loop {
        let next = PAIRED_TABLE.replace_all(&unpaired, "$1").into_owned();
        if next == unpaired {
            break;
        }
        unpaired = next;
    }

    let contains_unpaired_table = UNPAIRED_TABLE.is_match(&unpaired);

    // Table element tokens only count outside template and argument
    // syntax; writing each argument on a `|`-prefixed line is common and
    // harmless.
    let mut outside = unpaired.clone();
    loop {
        let mut next = outside.clone();
        loop {
            let stripped = ARG_REF.replace_all(&next, "").into_owned();
            if stripped == next {
                break;
            }
            next = stripped;
        }
        let next = TEMPLATE_CALL.replace_all(&next, "").into_owned();
        if next == outside {
            break;
        }
        outside = next;
    }
    let contains_table_element = TABLE_ELEMENT.is_match(&outside);

    // Count unbalanced start/end tags for paired HTML tags.
    let mut tag_counts: HashMap<String, i32> = HashMap::new();
    for caps in TAG.captures_iter(&outside) {
        let name = caps.get(2).unwrap().as_str().to_ascii_lowercase();
        if !html::is_paired_tag(&name) {
            continue;
        }
        if caps.get(1).is_some() {
            *tag_counts.entry(name).or_default() -= 1;
        } else if caps.get(3).is_none() {
            *tag_counts.entry(name).or_default() += 1;
        }
    }
    let contains_unbalanced_html = tag_counts.values().any(|count| *count != 0);

    let mut included_templates = HashSet::new();
    for caps in INCLUDED_NAME.captures_iter(&unpaired) {
        let name = caps.get(3).unwrap().as_str();
        let name = NOWIKI_EMPTY.replace_all(name, "");
        let name = canonicalize_template_name(&name);
        if !name.is_empty() {
            included_templates.insert(name);
        }
    }

    TemplateAnalysis {
        included_templates,
        pre_expand: contains_list
            || contains_unpaired_table
            || contains_table_element
            || contains_unbalanced_html,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template(title: &str, text: &str) -> PageRecord {
        PageRecord {
            kind: "Template".into(),
            title: title.into(),
            text: text.into(),
        }
    }

    #[test]
    fn canonical_names() {
        assert_eq!(canonicalize_template_name("template:foo bar"), "Foo bar");
        assert_eq!(canonicalize_template_name("foo__bar"), "Foo bar");
        assert_eq!(canonicalize_template_name("  foo  "), "Foo");
        assert_eq!(canonicalize_template_name("a(b)"), "A%28b%29");
        assert_eq!(canonicalize_template_name(""), "");
    }

    #[test]
    fn body_extraction() {
        assert_eq!(
            template_to_body("a<noinclude>doc</noinclude>b"),
            "ab"
        );
        assert_eq!(
            template_to_body("ignored<onlyinclude>kept</onlyinclude>ignored"),
            "kept"
        );
        assert_eq!(
            template_to_body("a<includeonly>b</includeonly>c"),
            "abc"
        );
        assert_eq!(template_to_body("a<!-- comment -->b"), "ab");
    }

    #[test]
    fn pre_expand_detection() {
        let analysis = analyze_template("* a list item");
        assert!(analysis.pre_expand, "leading list marker");

        let analysis = analyze_template("{|\n| cell\n|}");
        assert!(!analysis.pre_expand, "paired table is fine");

        let analysis = analyze_template("{|\n| cell");
        assert!(analysis.pre_expand, "unpaired table start");

        let analysis = analyze_template("text\n|-\nmore");
        assert!(analysis.pre_expand, "stray row separator");

        let analysis = analyze_template("<div>unclosed");
        assert!(analysis.pre_expand, "unbalanced html");

        let analysis = analyze_template("<div>closed</div>");
        assert!(!analysis.pre_expand);

        let analysis = analyze_template("plain {{other|x=1}} text");
        assert!(!analysis.pre_expand, "template args on one line are fine");
    }

    #[test]
    fn template_args_on_own_lines_are_not_tables() {
        let analysis = analyze_template("{{other\n| x = 1\n| y = 2\n}}");
        assert!(!analysis.pre_expand);
    }

    #[test]
    fn included_template_names() {
        let analysis = analyze_template("a {{foo}} b {{bar|1}} c");
        assert!(analysis.included_templates.contains("Foo"));
        assert!(analysis.included_templates.contains("Bar"));
    }

    #[test]
    fn pre_expand_propagates_transitively() {
        let registry = SourceRegistry::from_pages([
            template("Template:Leaf", "* leaf list"),
            template("Template:Mid", "x {{leaf}} y"),
            template("Template:Top", "z {{mid}} w"),
            template("Template:Other", "plain"),
        ]);
        assert!(registry.needs_pre_expand("Leaf"));
        assert!(registry.needs_pre_expand("Mid"));
        assert!(registry.needs_pre_expand("Top"));
        assert!(!registry.needs_pre_expand("Other"));
    }

    #[test]
    fn redirects_alias_template_bodies() {
        let registry = SourceRegistry::from_pages([
            template("Template:Real", "body"),
            PageRecord {
                kind: "#redirect".into(),
                title: "Template:Alias".into(),
                text: "Template:Real".into(),
            },
        ]);
        assert_eq!(registry.template("Alias"), Some("body"));
        assert_eq!(registry.redirect_target("Template:Alias"), Some("Template:Real"));
    }

    #[test]
    fn modules_and_predefined_templates() {
        let registry = SourceRegistry::from_pages([PageRecord {
            kind: "Scribunto".into(),
            title: "Module:links".into(),
            text: "return {}".into(),
        }]);
        assert_eq!(registry.module("links"), Some("return {}"));
        assert_eq!(registry.template("!"), Some("&vert;"));
    }

    #[test]
    fn user_and_testcase_pages_are_skipped() {
        let registry = SourceRegistry::from_pages([
            template("Template:Foo/testcases", "x"),
            template("User:Someone/Template", "y"),
        ]);
        assert!(!registry.has_template("Foo/testcases"));
    }
}
