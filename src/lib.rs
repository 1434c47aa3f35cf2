//! A fault-tolerant MediaWiki markup parser and template expansion
//! engine.
//!
//! The crate has two cooperating halves:
//!
//! - **Parsing**: [`tokens`] scans raw markup into a lazy token stream
//!   and [`parser`] builds a typed [`nodes::WikiNode`] tree from it,
//!   recovering from malformed input with diagnostics instead of errors.
//! - **Expansion**: [`expand`] resolves template transclusions, argument
//!   references, and parser function calls over a cookie-encoded form of
//!   the text, recursing through the [`parser_fns`] registry and the
//!   [`lua`] macro bridge, against an immutable [`registry`] of template
//!   and module sources.
//!
//! The two compose: expand a page first, then parse the expanded text
//! into a tree for extraction via [`visit`].
//!
//! Each expansion worker owns its own [`expand::ExpansionContext`];
//! template and module bodies are shared read-only between workers.

pub mod common;
pub mod dates;
pub mod expand;
pub mod expr;
pub mod html;
pub mod lua;
pub mod nodes;
pub mod parser;
mod parser_fns;
pub mod registry;
pub mod title;
pub mod tokens;
pub mod visit;

pub use expand::{ArgKey, ExpandOptions, ExpansionContext, Frame, TemplateArgs};
pub use nodes::{KindSet, NodeChild, NodeKind, WikiNode};
pub use parser::{Diagnostic, ParseOutput, parse};
pub use registry::{PageRecord, SourceRegistry};
pub use tokens::{Token, Tokenizer, tokenize};

#[cfg(test)]
mod tests {
    //! End-to-end checks across expansion and parsing.

    use super::*;

    fn registry(templates: &[(&str, &str)]) -> SourceRegistry {
        SourceRegistry::from_pages(templates.iter().map(|(title, text)| PageRecord {
            kind: "Template".into(),
            title: format!("Template:{title}"),
            text: (*text).to_string(),
        }))
    }

    #[test]
    fn expand_then_parse() {
        let reg = registry(&[("sense", "==={{{1}}}===\n")]);
        let mut ctx = ExpansionContext::new(&reg);
        let expanded = ctx.expand("word", "==English==\n{{sense|Noun}}body\n");
        assert_eq!(expanded, "==English==\n===Noun===\nbody\n");

        let out = parse("word", &expanded);
        let level2 = out
            .root
            .find_children(KindSet::LEVEL2)
            .next()
            .expect("expanded heading parses as a section");
        assert_eq!(
            level2.find_children(KindSet::LEVEL3).count(),
            1,
            "template-produced subsection nests correctly"
        );
    }

    #[test]
    fn pre_expand_pass_then_full_parse() {
        // A template emitting a list item breaks tree structure unless it
        // is expanded before parsing; the registry flags it, and a
        // selective pass expands only flagged templates.
        let reg = registry(&[("li", "* flagged\n"), ("plain", "PLAIN")]);
        assert!(reg.needs_pre_expand("Li"));
        assert!(!reg.needs_pre_expand("Plain"));

        let mut ctx = ExpansionContext::new(&reg);
        let text = "{{li}}{{plain}}";
        let pre = ctx.expand_selected("page", text, reg.pre_expand_names());
        assert_eq!(pre, "\n* flagged\n{{plain}}");
    }

    #[test]
    fn conditional_inside_template_body() {
        let reg = registry(&[("maybe", "{{#if:{{{1|}}}|yes {{{1}}}|no arg}}")]);
        let mut ctx = ExpansionContext::new(&reg);
        assert_eq!(ctx.expand("T", "{{maybe|x}}"), "yes x");
        assert_eq!(ctx.expand("T", "{{maybe}}"), "no arg");
    }

    #[test]
    fn diagnostics_identify_the_page() {
        let out = parse("Some page", "[[unclosed");
        assert!(out.diagnostics.iter().all(|d| d.page == "Some page"));
        assert!(out.diagnostics[0].to_string().starts_with("Some page:"));
    }
}
