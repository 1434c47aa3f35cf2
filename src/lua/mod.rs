//! The embedded macro bridge.
//!
//! Macro modules run in a sandboxed scripting runtime reached only
//! through the narrow [`MacroRuntime`] interface; the concrete embedding
//! is swappable and out of scope here. What this module owns is the host
//! side: module resolution, the frame arena exposed to macro code, the
//! re-entry paths back into the expansion engine, and the minimal text
//! entity semantics macro string libraries need.
//!
//! A runtime instance is created lazily on the first `#invoke` and then
//! persists for the life of its [`ExpansionContext`], so module
//! compilation is paid once per worker, not once per call.
//!
//! [`ExpansionContext`]: crate::expand::ExpansionContext

use crate::{
    expand::{ArgKey, Expander, Frame, Scope, split_named},
    parser_fns,
};
use regex::Regex;
use std::{collections::HashMap, path::PathBuf, rc::Rc, sync::LazyLock};

/// A failure inside macro code or the macro runtime.
#[derive(Debug, thiserror::Error)]
pub enum MacroError {
    /// The named module could not be loaded.
    #[error("module {0:?} not found")]
    ModuleNotFound(String),
    /// The named function does not exist in the loaded module.
    #[error("no function {function:?} in module {module:?}")]
    NoSuchFunction {
        /// The module that was loaded.
        module: String,
        /// The missing function.
        function: String,
    },
    /// An uncaught error inside macro code, with whatever traceback the
    /// runtime could produce.
    #[error("macro error: {message}")]
    Script {
        /// The error message.
        message: String,
        /// A formatted traceback, if the runtime produced one.
        traceback: Option<String>,
    },
}

/// Identifies a frame in the per-invocation arena.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FrameId(usize);

/// Information about a page, as exposed to macro code.
#[derive(Clone, Debug, Default)]
pub struct PageInfo {
    /// Whether the page exists. Conservative default until wired to a
    /// real page index.
    pub exists: bool,
    /// The page ID. Conservative default, see `exists`.
    pub id: u64,
    /// The redirect target, answered from the real redirect table.
    pub redirect_to: Option<String>,
}

/// One filesystem entry of the macro module search path.
#[derive(Clone, Debug)]
pub struct ModulePath {
    /// Directory prefix to probe.
    pub prefix: PathBuf,
    /// Module names this entry must not resolve, so host-provided shims
    /// are not shadowed by a generic path entry.
    pub skip: Vec<String>,
}

/// Host services available to a macro runtime during one invocation.
///
/// Every method that re-enters the expansion engine pushes a synthetic
/// call-stack label so diagnostics can show the macro call chain.
pub trait MacroHost {
    /// The value of a frame argument, expanded in the parent frame's
    /// context. Arguments are expanded lazily, only when macro code asks
    /// for them, and cached per frame.
    fn frame_argument(&mut self, frame: FrameId, key: &ArgKey) -> Option<String>;

    /// The keys of a frame's arguments, in call order.
    fn frame_argument_names(&self, frame: FrameId) -> Vec<ArgKey>;

    /// The frame's parent frame, if any.
    fn frame_parent(&self, frame: FrameId) -> Option<FrameId>;

    /// The title associated with the frame.
    fn frame_title(&self, frame: FrameId) -> String;

    /// Creates a child frame for a sub-module call.
    fn new_child(&mut self, frame: FrameId, title: &str, args: Vec<(ArgKey, String)>) -> FrameId;

    /// Encodes and expands `text` as if it were template content.
    /// Undefined-template diagnostics are suppressed; real-world macro
    /// helpers intentionally probe dummy templates.
    fn preprocess(&mut self, frame: FrameId, text: &str) -> String;

    /// Expands the named template with named arguments.
    fn expand_template(&mut self, frame: FrameId, title: &str, args: &[(String, String)]) -> String;

    /// Dispatches a parser function with already-expanded arguments.
    fn call_parser_function(&mut self, frame: FrameId, name: &str, args: &[String]) -> String;

    /// Builds a synthetic extension tag element.
    fn extension_tag(&mut self, name: &str, content: Option<&str>, attrs: &[(String, String)])
    -> String;

    /// Resolves a macro module to its source text: page-derived modules
    /// first, then the filesystem search path. Returns `None` when
    /// nothing matches; never an error.
    fn load_module(&mut self, name: &str) -> Option<String>;

    /// Page metadata for a title.
    fn page_info(&self, title: &str) -> PageInfo;

    /// The raw content of a page. Only the page currently being expanded
    /// is available; anything else is delegated upward and answers
    /// `None`.
    fn page_content(&self, title: &str) -> Option<String>;
}

/// The sandboxed macro runtime.
///
/// Implementations own the interpreter state and call back into the host
/// for everything that touches pages, frames, or the expansion engine.
pub trait MacroRuntime {
    /// Invokes `function` in `module` with `frame` as the active frame,
    /// returning the produced wikitext.
    fn invoke(
        &mut self,
        host: &mut dyn MacroHost,
        module: &str,
        function: &str,
        frame: FrameId,
    ) -> Result<String, MacroError>;
}

/// Selectively decoded entities, per the macro text library contract.
static SELECTIVE_ENTITIES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"&(lt|gt|amp|quot|nbsp);").unwrap());

/// Decodes HTML character entities. Unless `decode_named_entities` is
/// set, only the five entities the macro text library guarantees
/// (`lt`, `gt`, `amp`, `quot`, `nbsp`) are decoded.
pub fn text_decode(text: &str, decode_named_entities: bool) -> String {
    if decode_named_entities {
        return html_escape::decode_html_entities(text).into_owned();
    }
    SELECTIVE_ENTITIES
        .replace_all(text, |caps: &regex::Captures<'_>| match &caps[1] {
            "lt" => "<",
            "gt" => ">",
            "amp" => "&",
            "quot" => "\"",
            "nbsp" => "\u{a0}",
            _ => unreachable!(),
        })
        .into_owned()
}

/// Encodes the characters in `charset` as HTML entities, named where a
/// common name exists and numeric otherwise.
pub fn text_encode(text: &str, charset: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if !charset.contains(c) {
            out.push(c);
            continue;
        }
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '\u{a0}' => out.push_str("&nbsp;"),
            c => out.push_str(&format!("&#{};", u32::from(c))),
        }
    }
    out
}

/// The default charset of [`text_encode`].
pub const DEFAULT_ENCODE_CHARSET: &str = "<>&\u{a0}\"";

/// One frame in the invocation arena.
struct FrameData {
    /// The title the frame runs under.
    title: String,
    /// Raw argument values, expanded on first access.
    args: Vec<(ArgKey, String)>,
    /// The parent frame in the arena.
    parent: Option<FrameId>,
    /// Already-expanded argument values.
    cache: HashMap<ArgKey, String>,
}

impl FrameData {
    /// Builds arena frame data from an engine frame. Values in an engine
    /// frame were already expanded when the template call was resolved.
    fn from_frame(frame: &Frame) -> Self {
        Self {
            title: frame.title.clone(),
            args: frame
                .args
                .iter()
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
            parent: None,
            cache: HashMap::new(),
        }
    }
}

/// The engine-backed [`MacroHost`] for one `#invoke`.
struct BridgeHost<'h, 'e, 'a> {
    /// The engine, for re-entry.
    ex: &'h mut Expander<'e, 'a>,
    /// The frame arena for this invocation.
    frames: Vec<FrameData>,
    /// The engine-level parent frame used for re-entrant expansion.
    parent: Option<Rc<Frame>>,
}

impl MacroHost for BridgeHost<'_, '_, '_> {
    fn frame_argument(&mut self, frame: FrameId, key: &ArgKey) -> Option<String> {
        let data = self.frames.get(frame.0)?;
        if let Some(cached) = data.cache.get(key) {
            return Some(cached.clone());
        }
        let raw = data
            .args
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())?;
        let value = self.ex.expand_arg(&raw, self.parent.as_ref());
        self.frames[frame.0].cache.insert(key.clone(), value.clone());
        Some(value)
    }

    fn frame_argument_names(&self, frame: FrameId) -> Vec<ArgKey> {
        self.frames
            .get(frame.0)
            .map(|data| data.args.iter().map(|(key, _)| key.clone()).collect())
            .unwrap_or_default()
    }

    fn frame_parent(&self, frame: FrameId) -> Option<FrameId> {
        self.frames.get(frame.0)?.parent
    }

    fn frame_title(&self, frame: FrameId) -> String {
        self.frames
            .get(frame.0)
            .map(|data| data.title.clone())
            .unwrap_or_default()
    }

    fn new_child(&mut self, frame: FrameId, title: &str, args: Vec<(ArgKey, String)>) -> FrameId {
        self.frames.push(FrameData {
            title: title.to_string(),
            args,
            parent: Some(frame),
            cache: HashMap::new(),
        });
        FrameId(self.frames.len() - 1)
    }

    fn preprocess(&mut self, _frame: FrameId, text: &str) -> String {
        let coded = self.ex.ctx.jar.encode(text);
        self.ex.stack.push("frame:preprocess()".into());
        let out = self.ex.expand(&coded, self.parent.as_ref(), Scope::All, true);
        self.ex.stack.pop();
        out
    }

    fn expand_template(
        &mut self,
        _frame: FrameId,
        title: &str,
        args: &[(String, String)],
    ) -> String {
        let mut call_args = vec![title.to_string()];
        call_args.extend(args.iter().map(|(key, value)| format!("{key}={value}")));
        let cookie = self
            .ex
            .ctx
            .jar
            .save(crate::expand::encode::CookieKind::Template, call_args);
        self.ex.stack.push("frame:expandTemplate()".into());
        let out = self.ex.expand(&cookie, self.parent.as_ref(), Scope::All, true);
        self.ex.stack.pop();
        out
    }

    fn call_parser_function(&mut self, _frame: FrameId, name: &str, args: &[String]) -> String {
        let name = parser_fns::canonicalize_name(name);
        if !parser_fns::is_parser_function(&name) {
            self.ex.diag(format!(
                "frame:callParserFunction(): undefined function {name:?} at {:?}",
                self.ex.stack
            ));
            return String::new();
        }
        // Arguments arriving from macro code are already expanded, so
        // re-expansion inside the function is a no-op.
        self.ex.call_parser_fn(&name, args, self.parent.as_ref())
    }

    fn extension_tag(
        &mut self,
        name: &str,
        content: Option<&str>,
        attrs: &[(String, String)],
    ) -> String {
        self.ex.stack.push("frame:extensionTag()".into());
        let name = name.trim().to_ascii_lowercase();
        let out = if parser_fns::allowed_tag(&name) {
            parser_fns::build_tag(&name, content, attrs)
        } else {
            self.ex
                .diag(format!("extensionTag creating non-allowed tag <{name}>"));
            let mut parts = vec![name.clone()];
            parts.push(content.unwrap_or_default().to_string());
            parts.extend(attrs.iter().map(|(k, v)| format!("{k}={v}")));
            format!("{{{{#tag:{}}}}}", parts.join("|"))
        };
        self.ex.stack.pop();
        out
    }

    fn load_module(&mut self, name: &str) -> Option<String> {
        let name = name.strip_prefix("Module:").unwrap_or(name);
        if let Some(source) = self.ex.ctx.registry.module(name) {
            return Some(source.to_string());
        }

        // Fall back to the filesystem search path.
        let mut path = name.replace(':', "/").replace(' ', "_");
        while path.contains("//") {
            path = path.replace("//", "/");
        }
        path = path.replace("..", ".");
        let path = format!("{}.lua", path.trim_start_matches('/'));

        for entry in &self.ex.ctx.module_paths {
            if entry.skip.iter().any(|skipped| skipped == name) {
                continue;
            }
            let candidate = entry.prefix.join(&path);
            if let Ok(source) = std::fs::read_to_string(&candidate) {
                return Some(source);
            }
        }
        None
    }

    fn page_info(&self, title: &str) -> PageInfo {
        PageInfo {
            exists: false,
            id: 0,
            redirect_to: self
                .ex
                .ctx
                .registry
                .redirect_target(title)
                .map(str::to_string),
        }
    }

    fn page_content(&self, title: &str) -> Option<String> {
        if title == self.ex.ctx.title {
            self.ex.ctx.full_page.clone()
        } else {
            None
        }
    }
}

/// Expands a `{{#invoke:module|function|args...}}` call.
pub(crate) fn invoke(
    ex: &mut Expander<'_, '_>,
    args: &[String],
    parent: Option<&Rc<Frame>>,
) -> String {
    if args.len() < 2 {
        ex.diag(format!("#invoke: too few arguments at {:?}", ex.stack));
        return unexpanded_invoke(ex, args, parent);
    }
    if !ex.ctx.ensure_runtime() {
        ex.diag(format!(
            "#invoke: no macro runtime configured at {:?}",
            ex.stack
        ));
        return unexpanded_invoke(ex, args, parent);
    }

    let module = ex.expand_arg(&args[0], parent).trim().to_string();
    let function = ex.expand_arg(&args[1], parent).trim().to_string();

    // Frame 0 is the calling page/template frame, when there is one; the
    // invocation's own frame chains to it.
    let mut frames = Vec::new();
    let parent_id = parent.map(|frame| {
        frames.push(FrameData::from_frame(frame));
        FrameId(0)
    });
    frames.push(FrameData {
        title: module.clone(),
        args: parse_invoke_args(&args[2..]),
        parent: parent_id,
        cache: HashMap::new(),
    });
    let frame_id = FrameId(frames.len() - 1);

    let Some(mut runtime) = ex.ctx.runtime.take() else {
        return unexpanded_invoke(ex, args, parent);
    };
    ex.stack.push(format!("Lua:{module}:{function}()"));
    let mut host = BridgeHost {
        ex,
        frames,
        parent: parent.cloned(),
    };
    let result = runtime.invoke(&mut host, &module, &function, frame_id);
    let BridgeHost { ex, .. } = host;
    ex.stack.pop();
    ex.ctx.runtime = Some(runtime);

    match result {
        Ok(text) => text,
        Err(error) => {
            // A single broken page must never abort a batch run; macro
            // failures degrade to empty output.
            let traceback = match &error {
                MacroError::Script {
                    traceback: Some(traceback),
                    ..
                } => format!("\n{traceback}"),
                _ => String::new(),
            };
            ex.diag(format!(
                "macro failure in #invoke {module}:{function} at {:?}: {error}{traceback}",
                ex.stack
            ));
            String::new()
        }
    }
}

/// Parses the raw `#invoke` arguments into frame argument bindings,
/// positional or named, leaving values unexpanded for lazy access.
fn parse_invoke_args(args: &[String]) -> Vec<(ArgKey, String)> {
    let mut bindings = Vec::new();
    let mut next_index: u32 = 1;
    for raw in args {
        match split_named(raw) {
            Some((key, value)) => {
                let key = ArgKey::parse(key);
                if let ArgKey::Pos(index) = key
                    && next_index <= index
                {
                    next_index = index + 1;
                }
                bindings.push((key, value.to_string()));
            }
            None => {
                bindings.push((ArgKey::Pos(next_index), raw.clone()));
                next_index += 1;
            }
        }
    }
    bindings
}

/// Re-emits an `#invoke` call unexpanded.
fn unexpanded_invoke(
    ex: &mut Expander<'_, '_>,
    args: &[String],
    parent: Option<&Rc<Frame>>,
) -> String {
    let parts: Vec<String> = args
        .iter()
        .map(|arg| ex.expand_arg(arg, parent))
        .collect();
    format!("{{{{#invoke:{}}}}}", parts.join("|"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        expand::ExpansionContext,
        registry::{PageRecord, SourceRegistry},
    };

    /// A runtime scripted in Rust, standing in for a real interpreter.
    struct EchoRuntime;

    impl MacroRuntime for EchoRuntime {
        fn invoke(
            &mut self,
            host: &mut dyn MacroHost,
            module: &str,
            function: &str,
            frame: FrameId,
        ) -> Result<String, MacroError> {
            match function {
                "arg1" => Ok(host
                    .frame_argument(frame, &ArgKey::Pos(1))
                    .unwrap_or_default()),
                "named" => Ok(host
                    .frame_argument(frame, &ArgKey::Name("k".into()))
                    .unwrap_or_default()),
                "title" => Ok(host.frame_title(frame)),
                "parent_title" => Ok(host
                    .frame_parent(frame)
                    .map(|parent| host.frame_title(parent))
                    .unwrap_or_default()),
                "preprocess" => {
                    let text = host
                        .frame_argument(frame, &ArgKey::Pos(1))
                        .unwrap_or_default();
                    Ok(host.preprocess(frame, &text))
                }
                "expand" => Ok(host.expand_template(
                    frame,
                    "echo",
                    &[("1".to_string(), "from-macro".to_string())],
                )),
                "pfn" => Ok(host.call_parser_function(
                    frame,
                    "#if",
                    &["x".to_string(), "yes".to_string(), "no".to_string()],
                )),
                "tag" => Ok(host.extension_tag("ref", Some("note"), &[])),
                "load" => Ok(host.load_module(module).unwrap_or_else(|| "missing".into())),
                "content" => Ok(host.page_content("Testpage").unwrap_or_default()),
                "ignore_args" => Ok("did not touch arguments".into()),
                "fail" => Err(MacroError::Script {
                    message: "boom".into(),
                    traceback: Some("stack traceback: in function 'f'".into()),
                }),
                other => Err(MacroError::NoSuchFunction {
                    module: module.to_string(),
                    function: other.to_string(),
                }),
            }
        }
    }

    fn context(registry: &SourceRegistry) -> ExpansionContext<'_> {
        let mut ctx = ExpansionContext::new(registry);
        ctx.set_runtime_factory(|| Box::new(EchoRuntime));
        ctx
    }

    fn registry_with(pages: &[(&str, &str, &str)]) -> SourceRegistry {
        SourceRegistry::from_pages(pages.iter().map(|(kind, title, text)| PageRecord {
            kind: (*kind).to_string(),
            title: (*title).to_string(),
            text: (*text).to_string(),
        }))
    }

    #[test]
    fn invoke_reads_arguments_lazily() {
        let registry = registry_with(&[]);
        let mut ctx = context(&registry);
        assert_eq!(ctx.expand("T", "{{#invoke:m|arg1|hello}}"), "hello");
        assert_eq!(ctx.expand("T", "{{#invoke:m|named|k=v}}"), "v");

        // An argument that would produce diagnostics if expanded is left
        // untouched when the macro never reads it.
        let out = ctx.expand("T", "{{#invoke:m|ignore_args|{{missing}}}}");
        assert_eq!(out, "did not touch arguments");
        assert!(
            ctx.take_diagnostics()
                .iter()
                .all(|d| !d.message.contains("undefined template")),
            "unread argument was expanded eagerly"
        );
    }

    #[test]
    fn invoke_frame_titles_and_parent() {
        let registry = registry_with(&[(
            "Template",
            "Template:Wrap",
            "{{#invoke:m|parent_title}}",
        )]);
        let mut ctx = context(&registry);
        assert_eq!(ctx.expand("T", "{{#invoke:m|title}}"), "m");
        assert_eq!(ctx.expand("T", "{{wrap}}"), "Template:wrap");
    }

    #[test]
    fn invoke_reenters_engine() {
        let registry = registry_with(&[("Template", "Template:Echo", "<{{{1}}}>")]);
        let mut ctx = context(&registry);
        assert_eq!(ctx.expand("T", "{{#invoke:m|preprocess|{{echo|p}}}}"), "<p>");
        assert_eq!(ctx.expand("T", "{{#invoke:m|expand}}"), "<from-macro>");
        assert_eq!(ctx.expand("T", "{{#invoke:m|pfn}}"), "yes");
        assert_eq!(ctx.expand("T", "{{#invoke:m|tag}}"), "<ref>note</ref>");
    }

    #[test]
    fn invoke_failure_degrades_to_empty() {
        let registry = registry_with(&[]);
        let mut ctx = context(&registry);
        assert_eq!(ctx.expand("T", "a{{#invoke:m|fail}}b"), "ab");
        let diags = ctx.take_diagnostics();
        assert!(diags.iter().any(|d| d.message.contains("boom")));
        assert!(diags.iter().any(|d| d.message.contains("traceback")));
    }

    #[test]
    fn invoke_without_runtime_reemits() {
        let registry = registry_with(&[]);
        let mut ctx = ExpansionContext::new(&registry);
        assert_eq!(
            ctx.expand("T", "{{#invoke:m|f|x}}"),
            "{{#invoke:m|f|x}}"
        );
        assert!(
            ctx.take_diagnostics()
                .iter()
                .any(|d| d.message.contains("no macro runtime"))
        );
    }

    #[test]
    fn page_derived_modules_win_over_search_path() {
        let registry = registry_with(&[("Scribunto", "Module:m", "return module source")]);
        let mut ctx = context(&registry);
        assert_eq!(ctx.expand("T", "{{#invoke:m|load}}"), "return module source");
    }

    #[test]
    fn missing_modules_resolve_to_none() {
        let registry = registry_with(&[]);
        let mut ctx = context(&registry);
        ctx.set_module_search_paths(vec![ModulePath {
            prefix: PathBuf::from("/nonexistent/path"),
            skip: vec![],
        }]);
        assert_eq!(ctx.expand("T", "{{#invoke:m|load}}"), "missing");
    }

    #[test]
    fn skip_lists_mask_path_entries() {
        let dir = std::env::temp_dir().join("wikitext-rs-module-test");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("shadow.lua"), "from file").unwrap();

        let registry = registry_with(&[]);
        let mut ctx = context(&registry);
        ctx.set_module_search_paths(vec![ModulePath {
            prefix: dir.clone(),
            skip: vec!["shadow".to_string()],
        }]);
        assert_eq!(ctx.expand("T", "{{#invoke:shadow|load}}"), "missing");

        ctx.set_module_search_paths(vec![ModulePath {
            prefix: dir,
            skip: vec![],
        }]);
        assert_eq!(ctx.expand("T", "{{#invoke:shadow|load}}"), "from file");
    }

    #[test]
    fn page_content_only_for_current_page() {
        let registry = registry_with(&[]);
        let mut ctx = context(&registry);
        let out = ctx.expand_with(
            "Testpage",
            "{{#invoke:m|content}}",
            crate::expand::ExpandOptions {
                full_page: Some("the full page text"),
                ..Default::default()
            },
        );
        assert_eq!(out, "the full page text");

        let out = ctx.expand_with("Otherpage", "{{#invoke:m|content}}", Default::default());
        assert_eq!(out, "");
    }

    #[test]
    fn selective_entity_decoding() {
        assert_eq!(text_decode("a&lt;b&amp;c", false), "a<b&c");
        assert_eq!(text_decode("x&eacute;x", false), "x&eacute;x");
        assert_eq!(text_decode("x&eacute;x", true), "xéx");
        assert_eq!(text_decode("&nbsp;", false), "\u{a0}");
    }

    #[test]
    fn selective_entity_encoding() {
        assert_eq!(
            text_encode("a<b>&c", DEFAULT_ENCODE_CHARSET),
            "a&lt;b&gt;&amp;c"
        );
        assert_eq!(text_encode("a<b", "b"), "a<&#98;");
        assert_eq!(text_encode("\"\u{a0}\"", DEFAULT_ENCODE_CHARSET), "&quot;&nbsp;&quot;");
    }
}
