//! Template, parser function, and macro expansion.
//!
//! Expansion works over cookie-encoded text (see [`encode`]): the encoder
//! reduces nested constructs innermost-first into placeholders, and the
//! engine then resolves placeholders outside-in, left to right. Order is
//! strictly deterministic, which downstream extraction relies on for
//! reproducible output.

pub mod encode;

use crate::{
    dates::{DateParser, DefaultDateParser},
    lua::{self, MacroRuntime, ModulePath},
    parser::Diagnostic,
    parser_fns,
    registry::{SourceRegistry, canonicalize_template_name},
    title,
};
use encode::{CookieJar, CookieKind};
use indexmap::IndexMap;
use regex::Regex;
use std::{
    collections::HashSet,
    rc::Rc,
    sync::LazyLock,
    time::Instant,
};

/// Maximum template/macro nesting before a branch is abandoned.
const MAX_EXPANSION_DEPTH: usize = 100;

/// `name = value` argument form. Whitespace around the name and value of
/// a named argument is stripped; positional arguments keep theirs.
static NAMED_ARG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?s)^\s*([^<>="']+?)\s*=\s*(.*?)\s*$"#).unwrap());

/// Splits a raw argument into its `name = value` parts, if it has any.
/// Whitespace around both parts is excluded from the captures.
pub(crate) fn split_named(raw: &str) -> Option<(&str, &str)> {
    NAMED_ARG.captures(raw).map(|caps| {
        (
            caps.get(1).unwrap().as_str(),
            caps.get(2).unwrap().as_str(),
        )
    })
}

/// A template argument key: positional index or name.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum ArgKey {
    /// A positional argument, 1-based.
    Pos(u32),
    /// A named argument.
    Name(String),
}

impl ArgKey {
    /// Parses a key: digit strings become positional indices.
    pub fn parse(text: &str) -> ArgKey {
        match text.parse::<u32>() {
            Ok(index) => ArgKey::Pos(index),
            Err(_) => ArgKey::Name(text.to_string()),
        }
    }
}

impl core::fmt::Display for ArgKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ArgKey::Pos(index) => write!(f, "{index}"),
            ArgKey::Name(name) => f.write_str(name),
        }
    }
}

/// An ordered template argument table with expanded values.
pub type TemplateArgs = IndexMap<ArgKey, String>;

/// A template call frame. Frames chain to their caller, mirroring the
/// transclusion nesting, and are what macro code sees as `frame`.
#[derive(Debug)]
pub struct Frame {
    /// The namespaced title of the template or module this frame runs.
    pub title: String,
    /// The argument table, values already expanded in the caller's frame.
    pub args: TemplateArgs,
    /// The calling frame.
    pub parent: Option<Rc<Frame>>,
}

/// A hook intercepting template expansion, e.g. to capture a template's
/// arguments without performing the default expansion. Returning `None`
/// falls through to normal expansion.
pub type TemplateHook<'a> = dyn FnMut(&str, &TemplateArgs) -> Option<String> + 'a;

/// Options for a single expansion call.
#[derive(Default)]
pub struct ExpandOptions<'o> {
    /// Canonical names of the templates to expand; `None` expands every
    /// known template. Known templates outside the set are re-emitted
    /// unexpanded, which is how selective pre-expansion passes work.
    pub templates_to_expand: Option<&'o HashSet<String>>,
    /// The full unprocessed page text, made available to macro code that
    /// asks for the current page's content.
    pub full_page: Option<&'o str>,
}

/// Per-worker expansion state.
///
/// A context borrows an immutable [`SourceRegistry`] and owns everything
/// that is per-expansion or per-worker: the cookie store, collaborator
/// hooks, and the lazily-created macro runtime (which persists across
/// calls so modules are not recompiled, and must not be shared between
/// workers).
pub struct ExpansionContext<'a> {
    /// The shared template/module/redirect registry.
    pub(crate) registry: &'a SourceRegistry,
    /// The cookie store, reset at the start of each top-level call.
    pub(crate) jar: CookieJar,
    /// The title of the page currently being expanded.
    pub(crate) title: String,
    /// The unprocessed text of the current page, if provided.
    pub(crate) full_page: Option<String>,
    /// Optional template interception hook.
    pub(crate) template_hook: Option<Box<TemplateHook<'a>>>,
    /// The macro runtime, created on first `#invoke`.
    pub(crate) runtime: Option<Box<dyn MacroRuntime>>,
    /// Creates the macro runtime when first needed.
    runtime_factory: Option<Box<dyn Fn() -> Box<dyn MacroRuntime> + 'a>>,
    /// Page existence collaborator for `#ifexist`.
    pub(crate) page_exists: Box<dyn Fn(&str) -> bool + 'a>,
    /// Date parsing collaborator for `#dateformat`.
    pub(crate) date_parser: Box<dyn DateParser + 'a>,
    /// Search path for built-in macro modules.
    pub(crate) module_paths: Vec<ModulePath>,
    /// Optional soft deadline for the current page.
    pub(crate) deadline: Option<Instant>,
    /// Expansion anomalies collected since the last take.
    pub(crate) diagnostics: Vec<Diagnostic>,
}

impl<'a> ExpansionContext<'a> {
    /// Creates a context over the given registry with default
    /// collaborators: no macro runtime, no page exists, default date
    /// parser.
    pub fn new(registry: &'a SourceRegistry) -> Self {
        Self {
            registry,
            jar: CookieJar::new(),
            title: String::new(),
            full_page: None,
            template_hook: None,
            runtime: None,
            runtime_factory: None,
            page_exists: Box::new(|_| false),
            date_parser: Box::new(DefaultDateParser),
            module_paths: Vec::new(),
            deadline: None,
            diagnostics: Vec::new(),
        }
    }

    /// Sets the page existence collaborator used by `#ifexist`.
    pub fn set_page_checker(&mut self, checker: impl Fn(&str) -> bool + 'a) {
        self.page_exists = Box::new(checker);
    }

    /// Sets the date parsing collaborator used by `#dateformat`.
    pub fn set_date_parser(&mut self, parser: impl DateParser + 'a) {
        self.date_parser = Box::new(parser);
    }

    /// Sets the factory that creates the macro runtime on first use.
    pub fn set_runtime_factory(
        &mut self,
        factory: impl Fn() -> Box<dyn MacroRuntime> + 'a,
    ) {
        self.runtime_factory = Some(Box::new(factory));
    }

    /// Sets the search path for built-in macro modules.
    pub fn set_module_search_paths(&mut self, paths: Vec<ModulePath>) {
        self.module_paths = paths;
    }

    /// Sets the template interception hook.
    pub fn set_template_hook(&mut self, hook: impl FnMut(&str, &TemplateArgs) -> Option<String> + 'a) {
        self.template_hook = Some(Box::new(hook));
    }

    /// Sets a wall-clock deadline applying to subsequent expansion calls.
    /// Constructs reached after the deadline are left unexpanded.
    pub fn set_deadline(&mut self, deadline: Option<Instant>) {
        self.deadline = deadline;
    }

    /// Takes the diagnostics collected so far.
    pub fn take_diagnostics(&mut self) -> Vec<Diagnostic> {
        core::mem::take(&mut self.diagnostics)
    }

    /// Creates the macro runtime if a factory is configured and it does
    /// not exist yet. Returns whether a runtime is available.
    pub(crate) fn ensure_runtime(&mut self) -> bool {
        if self.runtime.is_none()
            && let Some(factory) = &self.runtime_factory
        {
            self.runtime = Some(factory());
        }
        self.runtime.is_some()
    }

    /// Expands all known templates, parser functions, and macros in
    /// `text` from the page `title`.
    pub fn expand(&mut self, title: &str, text: &str) -> String {
        self.expand_with(title, text, ExpandOptions::default())
    }

    /// Expands only the templates named in `only`. Used for pre-expand
    /// passes over templates whose structure breaks page parsing.
    pub fn expand_selected(
        &mut self,
        title: &str,
        text: &str,
        only: &HashSet<String>,
    ) -> String {
        self.expand_with(title, text, ExpandOptions {
            templates_to_expand: Some(only),
            ..Default::default()
        })
    }

    /// Expands `text` with full control over options.
    pub fn expand_with(&mut self, title: &str, text: &str, opts: ExpandOptions<'_>) -> String {
        self.title = title.to_string();
        self.full_page = opts.full_page.map(str::to_string);
        self.jar.reset();

        let coded = self.jar.encode(text);
        let scope = match opts.templates_to_expand {
            Some(set) => Scope::Only(set),
            None => Scope::All,
        };
        let mut expander = Expander {
            ctx: self,
            stack: vec![title.to_string()],
            deadline_reported: false,
        };
        expander.expand(&coded, None, scope, false)
    }
}

/// Which templates the current pass expands.
#[derive(Clone, Copy)]
pub(crate) enum Scope<'s> {
    /// Expand every known template.
    All,
    /// Expand only the named templates; re-emit the rest unexpanded.
    Only(&'s HashSet<String>),
}

impl Scope<'_> {
    fn allows(self, name: &str) -> bool {
        match self {
            Scope::All => true,
            Scope::Only(set) => set.contains(name),
        }
    }
}

/// The engine state for one top-level expansion call.
pub(crate) struct Expander<'e, 'a> {
    /// The owning context.
    pub(crate) ctx: &'e mut ExpansionContext<'a>,
    /// The call stack of template/function names, for diagnostics and the
    /// recursion ceiling.
    pub(crate) stack: Vec<String>,
    /// Whether the deadline diagnostic has been emitted already.
    deadline_reported: bool,
}

impl Expander<'_, '_> {
    /// Records an expansion diagnostic.
    pub(crate) fn diag(&mut self, message: String) {
        let diag = Diagnostic {
            page: self.ctx.title.clone(),
            line: 0,
            message,
        };
        log::warn!("{diag}");
        self.ctx.diagnostics.push(diag);
    }

    /// Expands one argument on behalf of a parser function, in the frame
    /// of the caller.
    pub(crate) fn expand_arg(&mut self, text: &str, parent: Option<&Rc<Frame>>) -> String {
        self.expand(text, parent, Scope::All, false)
    }

    /// Resolves all cookies in `coded`, outside-in and left to right.
    pub(crate) fn expand(
        &mut self,
        coded: &str,
        parent: Option<&Rc<Frame>>,
        scope: Scope<'_>,
        quiet: bool,
    ) -> String {
        let refs = self.ctx.jar.find(coded);
        let mut out = String::with_capacity(coded.len());
        let mut pos = 0;

        for cookie in refs {
            out.push_str(&coded[pos..cookie.range.start]);
            pos = cookie.range.end;

            let Some((kind, args)) = self.ctx.jar.get(cookie.index).cloned() else {
                self.diag(format!("unknown cookie index {}", cookie.index));
                out.push_str(&coded[cookie.range.clone()]);
                continue;
            };
            debug_assert_eq!(kind, cookie.kind);

            // The deadline is a soft budget: once it passes, remaining
            // constructs are emitted unexpanded rather than resolved.
            if let Some(deadline) = self.ctx.deadline
                && Instant::now() >= deadline
            {
                if !self.deadline_reported {
                    self.deadline_reported = true;
                    self.diag(format!(
                        "expansion deadline exceeded at {:?}; remaining constructs left unexpanded",
                        self.stack
                    ));
                }
                out.push_str(&self.decode_source(kind, &args));
                continue;
            }

            match kind {
                CookieKind::Template => {
                    self.expand_template_cookie(&mut out, &args, parent, scope, quiet);
                }
                CookieKind::Argument => {
                    // An argument reference outside any template body is
                    // re-emitted literally; binding happens only during
                    // body substitution.
                    let parts: Vec<String> = args
                        .iter()
                        .map(|arg| self.expand(arg, parent, scope, quiet))
                        .collect();
                    out.push_str(&format!("{{{{{{{}}}}}}}", parts.join("|")));
                }
                CookieKind::Link => {
                    self.stack.push("[[link]]".into());
                    let content = self.expand(&args[0], parent, scope, quiet);
                    self.stack.pop();
                    out.push_str(&format!("[[{content}]]"));
                }
            }
        }

        out.push_str(&coded[pos..]);
        out
    }

    /// Expands one template/parser-function cookie into `out`.
    fn expand_template_cookie(
        &mut self,
        out: &mut String,
        args: &[String],
        parent: Option<&Rc<Frame>>,
        scope: Scope<'_>,
        quiet: bool,
    ) {
        if self.stack.len() >= MAX_EXPANSION_DEPTH {
            self.diag(format!(
                "too deep expansion of templates via {:?}",
                self.stack
            ));
            let unexpanded = self.unexpanded_template(args, parent, scope, quiet);
            out.push_str(&unexpanded);
            return;
        }

        // The name subexpression can itself contain macros.
        self.stack.push("TEMPLATE_NAME".into());
        let tname = self.expand(&args[0], parent, scope, quiet);
        self.stack.pop();

        let mut tname = tname.trim();
        for prefix in ["safesubst:", "subst:"] {
            if let Some(head) = tname.get(..prefix.len())
                && head.eq_ignore_ascii_case(prefix)
            {
                tname = &tname[prefix.len()..];
                break;
            }
        }

        // A colon in the name may make this a parser function call.
        if let Some(colon) = tname.find(':')
            && colon > 0
        {
            let fn_name = parser_fns::canonicalize_name(&tname[..colon]);
            if parser_fns::is_parser_function(&fn_name) || fn_name.starts_with('#') {
                let mut fn_args = vec![tname[colon + 1..].trim_start().to_string()];
                fn_args.extend(args[1..].iter().cloned());
                let result = self.call_parser_fn(&fn_name, &fn_args, parent);
                out.push_str(&result);
                return;
            }
        }

        // Magic-word style: the entire name matches a registered function
        // that takes no leading argument.
        let fn_name = parser_fns::canonicalize_name(tname);
        if parser_fns::is_parser_function(&fn_name) || fn_name.starts_with('#') {
            let result = self.call_parser_fn(&fn_name, &args[1..].to_vec(), parent);
            out.push_str(&result);
            return;
        }

        // Otherwise this is a template transclusion.
        let name = canonicalize_template_name(tname);
        let name = name
            .strip_prefix("Template:")
            .map(str::to_string)
            .unwrap_or(name);

        let registry = self.ctx.registry;
        if !registry.has_template(&name) {
            if !quiet {
                self.diag(format!(
                    "undefined template {tname:?} at {:?}",
                    self.stack
                ));
            }
            let unexpanded = self.unexpanded_template(args, parent, scope, quiet);
            out.push_str(&unexpanded);
            return;
        }

        if !scope.allows(&name) {
            let unexpanded = self.unexpanded_template(args, parent, scope, quiet);
            out.push_str(&unexpanded);
            return;
        }

        self.stack.push(name.clone());

        // Build the argument table. Arguments are expanded in the
        // caller's frame so that macro invocations inside an argument see
        // the correct parent chain.
        let mut table = TemplateArgs::new();
        let mut next_index: u32 = 1;
        for raw in &args[1..] {
            let (key, raw_value) = match NAMED_ARG.captures(raw) {
                Some(caps) => {
                    let raw_key = caps.get(1).unwrap().as_str();
                    let raw_value = caps.get(2).unwrap().as_str();
                    let key = if raw_key.chars().all(|c| c.is_ascii_digit()) {
                        let mut index = raw_key.parse::<u32>().unwrap_or(1000);
                        if !(1..=1000).contains(&index) {
                            self.diag(format!("invalid argument number {index}"));
                            index = 1000;
                        }
                        if next_index <= index {
                            next_index = index + 1;
                        }
                        ArgKey::Pos(index)
                    } else {
                        self.stack.push("ARGNAME".into());
                        let expanded = self.expand(raw_key, parent, Scope::All, quiet);
                        self.stack.pop();
                        ArgKey::parse(expanded.trim())
                    };
                    (key, raw_value)
                }
                None => {
                    let key = ArgKey::Pos(next_index);
                    next_index += 1;
                    (key, raw.as_str())
                }
            };

            self.stack.push(format!("ARGVAL-{key}"));
            let value = self.expand(raw_value, parent, Scope::All, quiet);
            self.stack.pop();
            table.insert(key, value);
        }

        // The hook may replace expansion entirely (e.g. argument capture).
        let hooked = match self.ctx.template_hook.as_mut() {
            Some(hook) => hook(&name, &table),
            None => None,
        };

        let result = match hooked {
            Some(text) => text,
            None => {
                let body = registry.template(&name).unwrap_or_default();
                // A leading list marker must start its own line once the
                // body lands in the caller's text.
                let body = if body.starts_with(['#', '*', ';', ':']) {
                    format!("\n{body}")
                } else {
                    body.to_string()
                };

                let encoded = self.ctx.jar.encode(&body);
                let substituted = self.substitute_args(&encoded, &table, parent, quiet);

                let new_title = if title::has_namespace_prefix(tname) {
                    tname.to_string()
                } else {
                    format!("Template:{tname}")
                };
                let frame = Rc::new(Frame {
                    title: new_title,
                    args: table,
                    parent: parent.cloned(),
                });
                self.expand(&substituted, Some(&frame), scope, quiet)
            }
        };

        self.stack.pop();
        out.push_str(&result);
    }

    /// Rewrites argument cookies in a template body to their bound
    /// values. This traversal does not expand nested templates; it only
    /// propagates itself into their argument lists so unresolved
    /// references can be passed through to deeper calls.
    pub(crate) fn substitute_args(
        &mut self,
        coded: &str,
        argmap: &TemplateArgs,
        parent: Option<&Rc<Frame>>,
        quiet: bool,
    ) -> String {
        let refs = self.ctx.jar.find(coded);
        let mut out = String::with_capacity(coded.len());
        let mut pos = 0;

        for cookie in refs {
            out.push_str(&coded[pos..cookie.range.start]);
            pos = cookie.range.end;

            let Some((kind, args)) = self.ctx.jar.get(cookie.index).cloned() else {
                out.push_str(&coded[cookie.range.clone()]);
                continue;
            };

            match kind {
                CookieKind::Template => {
                    let new_args: Vec<String> = args
                        .iter()
                        .map(|arg| self.substitute_args(arg, argmap, parent, quiet))
                        .collect();
                    let cookie = self.ctx.jar.save(CookieKind::Template, new_args);
                    out.push_str(&cookie);
                }
                CookieKind::Argument => {
                    if args.len() > 2 {
                        self.diag(format!(
                            "too many parts ({}) in argument reference {args:?}",
                            args.len()
                        ));
                    }
                    self.stack.push("ARG-NAME".into());
                    let substituted = self.substitute_args(&args[0], argmap, parent, quiet);
                    let name = self.expand(&substituted, parent, Scope::All, quiet);
                    self.stack.pop();
                    let key = ArgKey::parse(name.trim());

                    if let Some(value) = argmap.get(&key) {
                        out.push_str(value);
                    } else if args.len() >= 2 {
                        self.stack.push("ARG-DEFVAL".into());
                        let default = self.substitute_args(&args[1], argmap, parent, quiet);
                        self.stack.pop();
                        out.push_str(&default);
                    } else {
                        // Unbound and no default: pass the reference
                        // through literally.
                        out.push_str(&format!("{{{{{{{key}}}}}}}"));
                    }
                }
                CookieKind::Link => {
                    let content = self.substitute_args(&args[0], argmap, parent, quiet);
                    out.push_str(&format!("[[{content}]]"));
                }
            }
        }

        out.push_str(&coded[pos..]);
        out
    }

    /// Dispatches a parser function call, tracking it on the call stack.
    pub(crate) fn call_parser_fn(
        &mut self,
        name: &str,
        args: &[String],
        parent: Option<&Rc<Frame>>,
    ) -> String {
        self.stack.push(name.to_string());
        let result = if name == "#invoke" {
            lua::invoke(self, args, parent)
        } else {
            parser_fns::call(self, name, args, parent)
        };
        self.stack.pop();
        result
    }

    /// Re-emits a template call unexpanded, with its arguments expanded,
    /// as `{{name|args}}`.
    fn unexpanded_template(
        &mut self,
        args: &[String],
        parent: Option<&Rc<Frame>>,
        scope: Scope<'_>,
        quiet: bool,
    ) -> String {
        let parts: Vec<String> = args
            .iter()
            .map(|arg| self.expand(arg, parent, scope, quiet))
            .collect();
        format!("{{{{{}}}}}", parts.join("|"))
    }

    /// Textually reconstructs a construct's source from the cookie store
    /// without expanding anything.
    fn decode_source(&self, kind: CookieKind, args: &[String]) -> String {
        let decode = |text: &String| self.ctx.jar.decode(text);
        let parts: Vec<String> = args.iter().map(decode).collect();
        match kind {
            CookieKind::Template => format!("{{{{{}}}}}", parts.join("|")),
            CookieKind::Argument => format!("{{{{{{{}}}}}}}", parts.join("|")),
            CookieKind::Link => format!("[[{}]]", parts.join("|")),
        }
    }
}

impl CookieJar {
    /// Recursively restores the source text of all cookies in `text`.
    pub fn decode(&self, text: &str) -> String {
        let refs = self.find(text);
        let mut out = String::with_capacity(text.len());
        let mut pos = 0;
        for cookie in refs {
            out.push_str(&text[pos..cookie.range.start]);
            pos = cookie.range.end;
            let Some((kind, args)) = self.get(cookie.index) else {
                out.push_str(&text[cookie.range.clone()]);
                continue;
            };
            let parts: Vec<String> = args.iter().map(|arg| self.decode(arg)).collect();
            match kind {
                CookieKind::Template => {
                    out.push_str(&format!("{{{{{}}}}}", parts.join("|")));
                }
                CookieKind::Argument => {
                    out.push_str(&format!("{{{{{{{}}}}}}}", parts.join("|")));
                }
                CookieKind::Link => out.push_str(&format!("[[{}]]", parts.join("|"))),
            }
        }
        out.push_str(&text[pos..]);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::PageRecord;

    fn registry(templates: &[(&str, &str)]) -> SourceRegistry {
        SourceRegistry::from_pages(templates.iter().map(|(title, text)| PageRecord {
            kind: "Template".into(),
            title: format!("Template:{title}"),
            text: (*text).to_string(),
        }))
    }

    #[test]
    fn plain_text_passes_through() {
        let reg = registry(&[]);
        let mut ctx = ExpansionContext::new(&reg);
        assert_eq!(ctx.expand("T", "nothing to do"), "nothing to do");
    }

    #[test]
    fn unresolved_argument_reference_round_trips() {
        let reg = registry(&[]);
        let mut ctx = ExpansionContext::new(&reg);
        assert_eq!(ctx.expand("T", "a{{{foo}}}b"), "a{{{foo}}}b");
    }

    #[test]
    fn template_with_default_argument() {
        let reg = registry(&[("foo", "FOO{{{1|-noarg}}}")]);
        let mut ctx = ExpansionContext::new(&reg);
        assert_eq!(ctx.expand("T", "a{{foo}}b"), "aFOO-noargb");
        assert_eq!(ctx.expand("T", "a{{foo|11|22}}b"), "aFOO11b");
    }

    #[test]
    fn named_arguments_bind() {
        let reg = registry(&[("greet", "Hello {{{name|nobody}}}!")]);
        let mut ctx = ExpansionContext::new(&reg);
        assert_eq!(ctx.expand("T", "{{greet|name=World}}"), "Hello World!");
        assert_eq!(ctx.expand("T", "{{greet}}"), "Hello nobody!");
    }

    #[test]
    fn numbered_named_arguments() {
        let reg = registry(&[("pick", "{{{1}}}-{{{2}}}")]);
        let mut ctx = ExpansionContext::new(&reg);
        assert_eq!(ctx.expand("T", "{{pick|2=b|1=a}}"), "a-b");
    }

    #[test]
    fn nested_templates_expand() {
        let reg = registry(&[("outer", "[{{inner|{{{1}}}}}]"), ("inner", "<{{{1}}}>")]);
        let mut ctx = ExpansionContext::new(&reg);
        assert_eq!(ctx.expand("T", "{{outer|x}}"), "[<x>]");
    }

    #[test]
    fn undefined_template_reemitted() {
        let reg = registry(&[]);
        let mut ctx = ExpansionContext::new(&reg);
        assert_eq!(ctx.expand("T", "a{{nosuch|1}}b"), "a{{nosuch|1}}b");
        assert!(
            ctx.take_diagnostics()
                .iter()
                .any(|d| d.message.contains("undefined template")),
        );
    }

    #[test]
    fn selective_expansion_skips_known_templates() {
        let reg = registry(&[("a", "A"), ("b", "B")]);
        let mut ctx = ExpansionContext::new(&reg);
        let only: HashSet<String> = ["A".to_string()].into_iter().collect();
        // Canonical names are uppercased.
        assert_eq!(ctx.expand_selected("T", "{{a}}{{b}}", &only), "A{{b}}");
    }

    #[test]
    fn links_expand_their_content() {
        let reg = registry(&[("x", "X")]);
        let mut ctx = ExpansionContext::new(&reg);
        assert_eq!(ctx.expand("T", "[[target|{{x}}]]"), "[[target|X]]");
    }

    #[test]
    fn recursion_terminates_at_depth_ceiling() {
        let reg = registry(&[("loop", ">{{loop}}")]);
        let mut ctx = ExpansionContext::new(&reg);
        let out = ctx.expand("T", "{{loop}}");
        assert!(out.contains("{{loop}}"), "deepest call left unexpanded");
        assert!(out.len() < 10_000, "no runaway output");
        assert!(
            ctx.take_diagnostics()
                .iter()
                .any(|d| d.message.contains("too deep")),
        );
    }

    #[test]
    fn argument_passthrough_into_nested_calls() {
        // A template may forward its caller's unresolved reference into a
        // template it calls.
        let reg = registry(&[("mid", "{{leaf|{{{1}}}}}"), ("leaf", "({{{1}}})")]);
        let mut ctx = ExpansionContext::new(&reg);
        assert_eq!(ctx.expand("T", "{{mid|v}}"), "(v)");
    }

    #[test]
    fn template_hook_intercepts() {
        let reg = registry(&[("t", "body")]);
        let mut ctx = ExpansionContext::new(&reg);
        ctx.set_template_hook(|name, args| {
            Some(format!("[{name}:{}]", args.len()))
        });
        assert_eq!(ctx.expand("T", "{{t|1|2}}"), "[T:2]");
    }

    #[test]
    fn subst_prefixes_are_stripped() {
        let reg = registry(&[("t", "B")]);
        let mut ctx = ExpansionContext::new(&reg);
        assert_eq!(ctx.expand("T", "{{subst:t}}"), "B");
        assert_eq!(ctx.expand("T", "{{safesubst:t}}"), "B");
    }

    #[test]
    fn deadline_leaves_constructs_unexpanded() {
        let reg = registry(&[("t", "B")]);
        let mut ctx = ExpansionContext::new(&reg);
        ctx.set_deadline(Some(Instant::now() - std::time::Duration::from_secs(1)));
        assert_eq!(ctx.expand("T", "a{{t}}b"), "a{{t}}b");
        assert!(
            ctx.take_diagnostics()
                .iter()
                .any(|d| d.message.contains("deadline")),
        );
        ctx.set_deadline(None);
        assert_eq!(ctx.expand("T", "a{{t}}b"), "aBb");
    }

    #[test]
    fn cookie_round_trip_preserves_sibling_text() {
        let reg = registry(&[]);
        let mut ctx = ExpansionContext::new(&reg);
        let input = "x[[a|{{b|c}}]]y{{{d}}}z";
        let out = ctx.expand("T", input);
        assert_eq!(out, "x[[a|{{b|c}}]]y{{{d}}}z");
    }
}
