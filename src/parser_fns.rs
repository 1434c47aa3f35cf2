//! Parser function implementations.
//!
//! Functions receive their arguments unexpanded together with the engine
//! handle, so conditionals only expand the branch they take. Anything not
//! implemented degrades to a named stub that logs and re-emits the call
//! unexpanded; that is the documented behavior, not an accident.

// Clippy: inline modules read better with wildcard imports.
#![allow(clippy::wildcard_imports)]

use crate::expand::{Expander, Frame};
use std::rc::Rc;

/// One parser function call site.
pub(crate) struct PfnCall<'c> {
    /// The canonical function name.
    pub name: &'c str,
    /// Raw (unexpanded) argument strings.
    pub args: &'c [String],
    /// The frame of the calling template, if any.
    pub parent: Option<&'c Rc<Frame>>,
}

/// The signature shared by all parser functions.
type ParserFunction = for<'x> fn(&mut Expander<'_, '_>, &PfnCall<'x>) -> String;

/// Returns true if `name` names a registered parser function or
/// predefined variable.
pub(crate) fn is_parser_function(name: &str) -> bool {
    PARSER_FUNCTIONS.contains_key(name)
}

/// Canonicalizes a parser function name. Names are case-insensitive
/// except where the registry carries an exact-case entry (the uppercase
/// magic variables).
pub(crate) fn canonicalize_name(name: &str) -> String {
    let name = name.replace('_', " ");
    let name = name.split_whitespace().collect::<Vec<_>>().join(" ");
    if PARSER_FUNCTIONS.contains_key(name.as_str()) {
        name
    } else {
        name.to_lowercase()
    }
}

/// Dispatches a parser function call.
pub(crate) fn call(ex: &mut Expander<'_, '_>, name: &str, args: &[String], parent: Option<&Rc<Frame>>) -> String {
    let call = PfnCall { name, args, parent };
    match PARSER_FUNCTIONS.get(name) {
        Some(function) => function(ex, &call),
        None => stubs::unimplemented(ex, &call),
    }
}

/// Expands the argument at `index`, or `None` if it was not supplied.
fn eval(ex: &mut Expander<'_, '_>, call: &PfnCall<'_>, index: usize) -> Option<String> {
    call.args
        .get(index)
        .map(|arg| ex.expand_arg(arg, call.parent))
}

/// Expands the argument at `index` and trims it; missing arguments are
/// empty.
fn eval_trim(ex: &mut Expander<'_, '_>, call: &PfnCall<'_>, index: usize) -> String {
    eval(ex, call, index)
        .map(|value| value.trim().to_string())
        .unwrap_or_default()
}

/// Re-emits a call unexpanded (arguments expanded), `{{name:args}}`.
fn reemit(ex: &mut Expander<'_, '_>, call: &PfnCall<'_>) -> String {
    let parts: Vec<String> = call
        .args
        .iter()
        .map(|arg| ex.expand_arg(arg, call.parent))
        .collect();
    if parts.is_empty() {
        format!("{{{{{}}}}}", call.name)
    } else {
        format!("{{{{{}:{}}}}}", call.name, parts.join("|"))
    }
}

mod cond {
    //! Flow control parser functions.

    use super::*;
    use crate::{common, expr};

    /// Renders an evaluator error inline, the way wikis expect.
    fn expr_error(err: &expr::ExprError) -> String {
        format!(
            r#"<strong class="error">Expression error: {}</strong>"#,
            html_escape::encode_text(&err.to_string())
        )
    }

    /// `{{#if: cond | then | else}}`: non-empty condition after trimming
    /// selects the then branch. Only the taken branch is expanded.
    pub(super) fn if_fn(ex: &mut Expander<'_, '_>, call: &PfnCall<'_>) -> String {
        let condition = eval_trim(ex, call, 0);
        let index = if condition.is_empty() { 2 } else { 1 };
        eval_trim(ex, call, index)
    }

    /// `{{#ifeq: a | b | then | else}}`: string equality after trimming.
    pub(super) fn ifeq_fn(ex: &mut Expander<'_, '_>, call: &PfnCall<'_>) -> String {
        let lhs = eval_trim(ex, call, 0);
        let rhs = eval_trim(ex, call, 1);
        let index = if lhs == rhs { 2 } else { 3 };
        eval_trim(ex, call, index)
    }

    /// `{{#ifexpr: expr | then | else}}`: truthy iff the result casts to
    /// a nonzero integer.
    pub(super) fn ifexpr_fn(ex: &mut Expander<'_, '_>, call: &PfnCall<'_>) -> String {
        let expression = eval_trim(ex, call, 0);
        match expr::evaluate(&expression) {
            Ok(value) => {
                let truthy = value.unwrap_or(0.0).trunc() != 0.0;
                let index = if truthy { 1 } else { 2 };
                eval_trim(ex, call, index)
            }
            Err(err) => expr_error(&err),
        }
    }

    /// `{{#ifexist: title | then | else}}`: existence is answered by the
    /// pluggable page checker; the default is a conservative no.
    pub(super) fn ifexist_fn(ex: &mut Expander<'_, '_>, call: &PfnCall<'_>) -> String {
        let title = eval_trim(ex, call, 0);
        let exists = (ex.ctx.page_exists)(&title);
        let index = if exists { 1 } else { 2 };
        eval_trim(ex, call, index)
    }

    /// `{{#expr: expression}}`.
    pub(super) fn expr_fn(ex: &mut Expander<'_, '_>, call: &PfnCall<'_>) -> String {
        let expression = eval_trim(ex, call, 0);
        match expr::evaluate(&expression) {
            Ok(Some(value)) => expr::format_value(value),
            Ok(None) => String::new(),
            Err(err) => expr_error(&err),
        }
    }

    /// Case comparison for `#switch`: numeric when both sides are
    /// numbers, string otherwise, entities decoded first.
    fn case_eq(lhs: &str, rhs: &str) -> bool {
        let lhs = common::decode_entities(lhs);
        let rhs = common::decode_entities(rhs);
        let lhs = lhs.trim();
        let rhs = rhs.trim();
        if let (Ok(a), Ok(b)) = (lhs.parse::<f64>(), rhs.parse::<f64>()) {
            a == b
        } else {
            lhs == rhs
        }
    }

    /// `{{#switch: subject | case=result | ... | default}}`.
    ///
    /// A bare (non-`=`) entry is a fallthrough label: when it matches the
    /// subject, the result is the value of the next `key=value` entry. A
    /// trailing bare entry with no following keyed entry is the implicit
    /// default; `#default=` sets the explicit one.
    pub(super) fn switch_fn(ex: &mut Expander<'_, '_>, call: &PfnCall<'_>) -> String {
        let subject = eval_trim(ex, call, 0);
        let mut found = false;
        let mut default: Option<String> = None;
        let mut last_was_bare = false;
        let mut last_bare = String::new();

        for raw in &call.args[1.min(call.args.len())..] {
            let entry = ex.expand_arg(raw, call.parent);
            match entry.split_once('=') {
                Some((key, value)) => {
                    let key = key.trim();
                    last_was_bare = false;
                    if key == "#default" {
                        default = Some(value.trim().to_string());
                    }
                    if found || case_eq(key, &subject) {
                        return value.trim().to_string();
                    }
                }
                None => {
                    last_was_bare = true;
                    last_bare = entry.trim().to_string();
                    if !found {
                        found = case_eq(&last_bare, &subject);
                    }
                }
            }
        }

        if let Some(default) = default {
            default
        } else if last_was_bare {
            // Trailing bare entry acts as the default, including for a
            // matched label with no keyed case after it.
            last_bare
        } else {
            String::new()
        }
    }
}

mod strings {
    //! String parser functions.

    use super::*;
    use crate::common::{self, UrlFlavor};

    /// `{{#len: text}}`: length in characters.
    pub(super) fn len_fn(ex: &mut Expander<'_, '_>, call: &PfnCall<'_>) -> String {
        eval_trim(ex, call, 0).chars().count().to_string()
    }

    /// `{{#pos: text | search | offset}}`: first occurrence at or after
    /// the character offset, or empty when absent.
    pub(super) fn pos_fn(ex: &mut Expander<'_, '_>, call: &PfnCall<'_>) -> String {
        let text = eval(ex, call, 0).unwrap_or_default();
        let needle = eval(ex, call, 1).unwrap_or_default();
        let offset: usize = eval_trim(ex, call, 2).parse().unwrap_or(0);
        if needle.is_empty() {
            return String::new();
        }
        let chars: Vec<char> = text.chars().collect();
        let byte_offset: usize = chars.iter().take(offset).map(|c| c.len_utf8()).sum();
        if byte_offset > text.len() {
            return String::new();
        }
        match text[byte_offset..].find(&needle) {
            Some(found) => {
                let char_index = text[..byte_offset + found].chars().count();
                char_index.to_string()
            }
            None => String::new(),
        }
    }

    /// `{{#rpos: text | search}}`: last occurrence, or -1 when absent.
    pub(super) fn rpos_fn(ex: &mut Expander<'_, '_>, call: &PfnCall<'_>) -> String {
        let text = eval(ex, call, 0).unwrap_or_default();
        let needle = eval(ex, call, 1).unwrap_or_default();
        if needle.is_empty() {
            return "-1".to_string();
        }
        match text.rfind(&needle) {
            Some(found) => text[..found].chars().count().to_string(),
            None => "-1".to_string(),
        }
    }

    /// `{{#sub: text | start | length}}`: character slicing with negative
    /// index wraparound.
    pub(super) fn sub_fn(ex: &mut Expander<'_, '_>, call: &PfnCall<'_>) -> String {
        let text = eval(ex, call, 0).unwrap_or_default();
        let chars: Vec<char> = text.chars().collect();
        let len = chars.len() as i64;

        let start: i64 = eval_trim(ex, call, 1).parse().unwrap_or(0);
        let begin = if start < 0 {
            (len + start).max(0)
        } else {
            start.min(len)
        };

        let length = eval_trim(ex, call, 2).parse::<i64>().ok();
        let end = match length {
            None => len,
            Some(length) if length < 0 => (len + length).max(begin),
            Some(length) => (begin + length).min(len),
        };

        chars[begin as usize..end.max(begin) as usize].iter().collect()
    }

    /// `{{#replace: text | from | to}}`: literal replacement; the search
    /// string defaults to a space.
    pub(super) fn replace_fn(ex: &mut Expander<'_, '_>, call: &PfnCall<'_>) -> String {
        let text = eval(ex, call, 0).unwrap_or_default();
        let mut from = eval(ex, call, 1).unwrap_or_default();
        if from.is_empty() {
            from = " ".to_string();
        }
        let to = eval(ex, call, 2).unwrap_or_default();
        text.replace(&from, &to)
    }

    /// `{{#explode: text | delimiter | position | limit}}`.
    pub(super) fn explode_fn(ex: &mut Expander<'_, '_>, call: &PfnCall<'_>) -> String {
        let text = eval(ex, call, 0).unwrap_or_default();
        let mut delimiter = eval(ex, call, 1).unwrap_or_default();
        if delimiter.is_empty() {
            delimiter = " ".to_string();
        }
        let position: i64 = eval_trim(ex, call, 2).parse().unwrap_or(0);
        let limit: Option<usize> = eval_trim(ex, call, 3).parse().ok();

        let mut parts: Vec<String> = text.split(&delimiter).map(str::to_string).collect();
        if let Some(limit) = limit
            && limit > 0
            && parts.len() > limit
        {
            // The remainder merges, delimiter included, into the last
            // part.
            let tail = parts.split_off(limit - 1).join(&delimiter);
            parts.push(tail);
        }

        let len = parts.len() as i64;
        let index = if position < 0 { len + position } else { position };
        if (0..len).contains(&index) {
            parts.swap_remove(index as usize)
        } else {
            String::new()
        }
    }

    /// The direction shared pad implementation fills toward.
    enum PadDirection {
        Left,
        Right,
        Center,
    }

    fn pad(text: &str, width: usize, fill: &str, direction: PadDirection) -> String {
        let fill = if fill.is_empty() { "0" } else { fill };
        let have = text.chars().count();
        if have >= width {
            return text.to_string();
        }
        let needed = width - have;
        let make_fill = |count: usize| -> String { fill.chars().cycle().take(count).collect() };
        match direction {
            PadDirection::Left => format!("{}{text}", make_fill(needed)),
            PadDirection::Right => format!("{text}{}", make_fill(needed)),
            PadDirection::Center => {
                let left = needed / 2;
                format!("{}{text}{}", make_fill(left), make_fill(needed - left))
            }
        }
    }

    /// `{{padleft: text | width | pad}}`.
    pub(super) fn padleft_fn(ex: &mut Expander<'_, '_>, call: &PfnCall<'_>) -> String {
        let text = eval_trim(ex, call, 0);
        let width: usize = eval_trim(ex, call, 1).parse().unwrap_or(0);
        let fill = eval(ex, call, 2).unwrap_or_default();
        pad(&text, width, &fill, PadDirection::Left)
    }

    /// `{{padright: text | width | pad}}`.
    pub(super) fn padright_fn(ex: &mut Expander<'_, '_>, call: &PfnCall<'_>) -> String {
        let text = eval_trim(ex, call, 0);
        let width: usize = eval_trim(ex, call, 1).parse().unwrap_or(0);
        let fill = eval(ex, call, 2).unwrap_or_default();
        pad(&text, width, &fill, PadDirection::Right)
    }

    /// `{{pad: text | width | pad | direction}}` with left/right/center.
    pub(super) fn pad_fn(ex: &mut Expander<'_, '_>, call: &PfnCall<'_>) -> String {
        let text = eval_trim(ex, call, 0);
        let width: usize = eval_trim(ex, call, 1).parse().unwrap_or(0);
        let fill = eval(ex, call, 2).unwrap_or_default();
        let direction = match eval_trim(ex, call, 3).to_ascii_lowercase().as_str() {
            "left" => PadDirection::Left,
            "center" => PadDirection::Center,
            _ => PadDirection::Right,
        };
        pad(&text, width, &fill, direction)
    }

    /// `{{uc: text}}`.
    pub(super) fn uc_fn(ex: &mut Expander<'_, '_>, call: &PfnCall<'_>) -> String {
        eval_trim(ex, call, 0).to_uppercase()
    }

    /// `{{lc: text}}`.
    pub(super) fn lc_fn(ex: &mut Expander<'_, '_>, call: &PfnCall<'_>) -> String {
        eval_trim(ex, call, 0).to_lowercase()
    }

    /// `{{ucfirst: text}}`.
    pub(super) fn ucfirst_fn(ex: &mut Expander<'_, '_>, call: &PfnCall<'_>) -> String {
        let text = eval_trim(ex, call, 0);
        let mut chars = text.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => text,
        }
    }

    /// `{{lcfirst: text}}`.
    pub(super) fn lcfirst_fn(ex: &mut Expander<'_, '_>, call: &PfnCall<'_>) -> String {
        let text = eval_trim(ex, call, 0);
        let mut chars = text.chars();
        match chars.next() {
            Some(first) => first.to_lowercase().chain(chars).collect(),
            None => text,
        }
    }

    /// `{{urlencode: text | flavor}}` with QUERY, WIKI, and PATH
    /// flavours.
    pub(super) fn urlencode_fn(ex: &mut Expander<'_, '_>, call: &PfnCall<'_>) -> String {
        let text = eval_trim(ex, call, 0);
        let flavor = UrlFlavor::from_arg(&eval_trim(ex, call, 1));
        common::url_encode(&text, flavor)
    }

    /// `{{#urldecode: text}}`.
    pub(super) fn urldecode_fn(ex: &mut Expander<'_, '_>, call: &PfnCall<'_>) -> String {
        common::url_decode(&eval_trim(ex, call, 0))
    }

    /// `{{anchorencode: text}}`.
    pub(super) fn anchorencode_fn(ex: &mut Expander<'_, '_>, call: &PfnCall<'_>) -> String {
        common::anchor_encode(&eval_trim(ex, call, 0))
    }
}

mod date {
    //! Date formatting parser functions.

    use super::*;
    use crate::dates::month_name;

    /// `{{#dateformat: date | format}}`: parses a free-form date through
    /// the date collaborator and reformats it. Year-less dates format
    /// without a year; unparseable input passes through unchanged.
    pub(super) fn dateformat_fn(ex: &mut Expander<'_, '_>, call: &PfnCall<'_>) -> String {
        let text = eval_trim(ex, call, 0);
        let format = eval_trim(ex, call, 1).to_ascii_lowercase();

        let Some(parsed) = ex.ctx.date_parser.parse(&text) else {
            ex.diag(format!("{}: unrecognized date {text:?}", call.name));
            return text;
        };

        let month = month_name(parsed.month);
        match (format.as_str(), parsed.year) {
            ("mdy", Some(year)) => format!("{month} {}, {year}", parsed.day),
            ("mdy", None) => format!("{month} {}", parsed.day),
            ("dmy", Some(year)) => format!("{} {month} {year}", parsed.day),
            ("dmy", None) => format!("{} {month}", parsed.day),
            ("ymd", Some(year)) => format!("{year} {month} {}", parsed.day),
            ("ymd", None) => format!("{month} {}", parsed.day),
            (_, Some(year)) => format!("{year}-{:02}-{:02}", parsed.month, parsed.day),
            (_, None) => format!("{:02}-{:02}", parsed.month, parsed.day),
        }
    }
}

mod tags {
    //! Synthetic element construction.

    use super::*;
    use crate::html;
    use regex::Regex;
    use std::sync::LazyLock;

    /// Tags creatable through `#tag` beyond the regular HTML set.
    const EXTENSION_TAGS: &[&str] = &["nowiki", "pre", "references", "section", "syntaxhighlight"];

    /// `name=value` attribute arguments of `#tag`.
    static TAG_ATTR: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r#"(?s)^([^=<>'"]+)=(.*)$"#).unwrap());

    /// Builds a synthetic element from already-expanded pieces. Shared by
    /// `#tag` and the macro bridge's `extensionTag`.
    pub(crate) fn build_tag(name: &str, content: Option<&str>, attrs: &[(String, String)]) -> String {
        let mut out = format!("<{name}");
        for (attr_name, attr_value) in attrs {
            out.push(' ');
            out.push_str(attr_name.trim());
            out.push_str("=\"");
            out.push_str(&html_escape::encode_double_quoted_attribute(attr_value));
            out.push('"');
        }
        match content {
            None | Some("") => {
                out.push_str(" />");
            }
            Some(content) => {
                out.push('>');
                out.push_str(&html_escape::encode_text(content));
                out.push_str(&format!("</{name}>"));
            }
        }
        out
    }

    /// Returns true if `#tag` may synthesize the named element.
    pub(crate) fn allowed_tag(name: &str) -> bool {
        html::ALLOWED_TAGS.contains_key(name) || EXTENSION_TAGS.contains(&name)
    }

    /// `{{#tag: name | content | attr=value | ...}}`.
    pub(super) fn tag_fn(ex: &mut Expander<'_, '_>, call: &PfnCall<'_>) -> String {
        let name = eval_trim(ex, call, 0).to_ascii_lowercase();
        if !allowed_tag(&name) {
            ex.diag(format!("#tag creating non-allowed tag <{name}>, omitted"));
            return reemit(ex, call);
        }

        let content = eval(ex, call, 1);
        let mut attrs = Vec::new();
        for raw in &call.args[2.min(call.args.len())..] {
            let expanded = ex.expand_arg(raw, call.parent);
            match TAG_ATTR.captures(&expanded) {
                Some(caps) => attrs.push((caps[1].to_string(), caps[2].to_string())),
                None => {
                    ex.diag(format!(
                        "#tag: invalid attribute format {expanded:?}, missing name"
                    ));
                }
            }
        }

        build_tag(&name, content.as_deref(), &attrs)
    }
}

mod titles {
    //! Page and title metafunctions.

    use super::*;
    use crate::title::{self, Namespace};

    /// The title argument of a metafunction, defaulting to the current
    /// page.
    fn title_arg(ex: &mut Expander<'_, '_>, call: &PfnCall<'_>) -> String {
        let arg = eval_trim(ex, call, 0);
        if arg.is_empty() {
            ex.ctx.title.clone()
        } else {
            arg
        }
    }

    /// `{{FULLPAGENAME}}` / `{{FULLPAGENAME:title}}`.
    pub(super) fn fullpagename_fn(ex: &mut Expander<'_, '_>, call: &PfnCall<'_>) -> String {
        title::full_page_name(&title_arg(ex, call))
    }

    /// `{{PAGENAME}}`.
    pub(super) fn pagename_fn(ex: &mut Expander<'_, '_>, call: &PfnCall<'_>) -> String {
        title::page_name(&title_arg(ex, call))
    }

    /// `{{SUBPAGENAME}}`.
    pub(super) fn subpagename_fn(ex: &mut Expander<'_, '_>, call: &PfnCall<'_>) -> String {
        title::sub_page_name(&title_arg(ex, call))
    }

    /// `{{NAMESPACE}}`.
    pub(super) fn namespace_fn(ex: &mut Expander<'_, '_>, call: &PfnCall<'_>) -> String {
        title::namespace_name(&title_arg(ex, call)).to_string()
    }

    /// Resolves the `ns:`/`nse:` argument to a namespace.
    fn resolve_namespace(arg: &str) -> Option<&'static Namespace> {
        match arg.parse::<i32>() {
            Ok(id) => Namespace::by_id(id),
            Err(_) => Namespace::by_name(arg),
        }
    }

    /// `{{ns: id-or-name}}`: the canonical namespace name.
    pub(super) fn ns_fn(ex: &mut Expander<'_, '_>, call: &PfnCall<'_>) -> String {
        let arg = eval_trim(ex, call, 0);
        match resolve_namespace(&arg) {
            Some(ns) => ns.name.to_string(),
            None => {
                ex.diag(format!("ns: unknown namespace {arg:?}"));
                reemit(ex, call)
            }
        }
    }

    /// `{{nse: id-or-name}}`: the namespace name in URL form.
    pub(super) fn nse_fn(ex: &mut Expander<'_, '_>, call: &PfnCall<'_>) -> String {
        let arg = eval_trim(ex, call, 0);
        match resolve_namespace(&arg) {
            Some(ns) => ns.name.replace(' ', "_"),
            None => {
                ex.diag(format!("nse: unknown namespace {arg:?}"));
                reemit(ex, call)
            }
        }
    }

    /// `{{#titleparts: title | count | first}}`: slices the title's
    /// segment list (split on `:` and `/`), with Python-style negative
    /// indices over segments, not characters.
    pub(super) fn titleparts_fn(ex: &mut Expander<'_, '_>, call: &PfnCall<'_>) -> String {
        let text = eval_trim(ex, call, 0);
        let count: i64 = eval_trim(ex, call, 1).parse().unwrap_or(0);
        let first: i64 = eval_trim(ex, call, 2).parse().unwrap_or(0);

        // Flat list of segments and their separators, so the original
        // delimiters are preserved on rejoin.
        let mut parts: Vec<String> = Vec::new();
        let mut current = String::new();
        for c in text.chars() {
            if c == ':' || c == '/' {
                parts.push(core::mem::take(&mut current));
                parts.push(c.to_string());
            } else {
                current.push(c);
            }
        }
        parts.push(current);
        let num_segments = (parts.len() + 1) / 2;
        let num_segments = num_segments as i64;

        let begin = if first < 0 {
            (num_segments + first).max(0)
        } else if first > 0 {
            (first - 1).min(num_segments)
        } else {
            0
        };
        let end = if count > 0 {
            (begin + count).min(num_segments)
        } else if count < 0 {
            (num_segments + count).max(begin)
        } else {
            num_segments
        };

        if begin >= end {
            return String::new();
        }
        parts[(begin as usize) * 2..=(end as usize - 1) * 2].concat()
    }
}

mod stubs {
    //! The degradation path for unimplemented functions.

    use super::*;

    /// Logs and re-emits the call unexpanded. Deliberate and documented:
    /// downstream consumers see the original syntax rather than silently
    /// losing content.
    pub(crate) fn unimplemented(ex: &mut Expander<'_, '_>, call: &PfnCall<'_>) -> String {
        ex.diag(format!("unimplemented parser function {}", call.name));
        reemit(ex, call)
    }
}

pub(crate) use tags::{allowed_tag, build_tag};

/// The parser function registry: implemented functions plus named stubs
/// for every predefined function and variable recognized in template
/// syntax.
///
/// <https://www.mediawiki.org/wiki/Help:Magic_words>
static PARSER_FUNCTIONS: phf::Map<&'static str, ParserFunction> = phf::phf_map! {
    // Conditionals and evaluation.
    "#if" => cond::if_fn,
    "#ifeq" => cond::ifeq_fn,
    "#ifexpr" => cond::ifexpr_fn,
    "#ifexist" => cond::ifexist_fn,
    "#iferror" => stubs::unimplemented,
    "#switch" => cond::switch_fn,
    "#expr" => cond::expr_fn,
    // Strings.
    "#len" => strings::len_fn,
    "#pos" => strings::pos_fn,
    "#rpos" => strings::rpos_fn,
    "#sub" => strings::sub_fn,
    "#replace" => strings::replace_fn,
    "#explode" => strings::explode_fn,
    "padleft" => strings::padleft_fn,
    "padright" => strings::padright_fn,
    "pad" => strings::pad_fn,
    "uc" => strings::uc_fn,
    "lc" => strings::lc_fn,
    "ucfirst" => strings::ucfirst_fn,
    "lcfirst" => strings::lcfirst_fn,
    "urlencode" => strings::urlencode_fn,
    "#urlencode" => strings::urlencode_fn,
    "#urldecode" => strings::urldecode_fn,
    "anchorencode" => strings::anchorencode_fn,
    // Dates.
    "#dateformat" => date::dateformat_fn,
    "#formatdate" => date::dateformat_fn,
    "formatdate" => date::dateformat_fn,
    // Tag synthesis.
    "#tag" => tags::tag_fn,
    // Titles and namespaces.
    "FULLPAGENAME" => titles::fullpagename_fn,
    "PAGENAME" => titles::pagename_fn,
    "SUBPAGENAME" => titles::subpagename_fn,
    "NAMESPACE" => titles::namespace_fn,
    "ns" => titles::ns_fn,
    "nse" => titles::nse_fn,
    "#titleparts" => titles::titleparts_fn,
    // Macro invocation is dispatched by the engine; the entry keeps the
    // name recognized in template syntax.
    "#invoke" => stubs::unimplemented,
    // Named stubs: recognized, logged, re-emitted unexpanded.
    "BASEPAGENAME" => stubs::unimplemented,
    "ROOTPAGENAME" => stubs::unimplemented,
    "ARTICLEPAGENAME" => stubs::unimplemented,
    "SUBJECTPAGENAME" => stubs::unimplemented,
    "TALKPAGENAME" => stubs::unimplemented,
    "NAMESPACENUMBER" => stubs::unimplemented,
    "ARTICLESPACE" => stubs::unimplemented,
    "SUBJECTSPACE" => stubs::unimplemented,
    "TALKSPACE" => stubs::unimplemented,
    "FULLPAGENAMEE" => stubs::unimplemented,
    "PAGENAMEE" => stubs::unimplemented,
    "BASEPAGENAMEE" => stubs::unimplemented,
    "ROOTPAGENAMEE" => stubs::unimplemented,
    "SUBPAGENAMEE" => stubs::unimplemented,
    "ARTICLEPAGENAMEE" => stubs::unimplemented,
    "SUBJECTPAGENAMEE" => stubs::unimplemented,
    "TALKPAGENAMEE" => stubs::unimplemented,
    "NAMESPACENUMBERE" => stubs::unimplemented,
    "NAMESPACEE" => stubs::unimplemented,
    "ARTICLESPACEE" => stubs::unimplemented,
    "SUBJECTSPACEE" => stubs::unimplemented,
    "TALKSPACEE" => stubs::unimplemented,
    "SHORTDESC" => stubs::unimplemented,
    "SITENAME" => stubs::unimplemented,
    "SERVER" => stubs::unimplemented,
    "SERVERNAME" => stubs::unimplemented,
    "SCRIPTPATH" => stubs::unimplemented,
    "CURRENTVERSION" => stubs::unimplemented,
    "CURRENTYEAR" => stubs::unimplemented,
    "CURRENTMONTH" => stubs::unimplemented,
    "CURRENTMONTHNAME" => stubs::unimplemented,
    "CURRENTMONTHABBREV" => stubs::unimplemented,
    "CURRENTDAY" => stubs::unimplemented,
    "CURRENTDAY2" => stubs::unimplemented,
    "CURRENTDOW" => stubs::unimplemented,
    "CURRENTDAYNAME" => stubs::unimplemented,
    "CURRENTTIME" => stubs::unimplemented,
    "CURRENTHOUR" => stubs::unimplemented,
    "CURRENTWEEK" => stubs::unimplemented,
    "CURRENTTIMESTAMP" => stubs::unimplemented,
    "LOCALYEAR" => stubs::unimplemented,
    "LOCALMONTH" => stubs::unimplemented,
    "LOCALMONTHNAME" => stubs::unimplemented,
    "LOCALMONTHABBREV" => stubs::unimplemented,
    "LOCALDAY" => stubs::unimplemented,
    "LOCALDAY2" => stubs::unimplemented,
    "LOCALDOW" => stubs::unimplemented,
    "LOCALDAYNAME" => stubs::unimplemented,
    "LOCALTIME" => stubs::unimplemented,
    "LOCALHOUR" => stubs::unimplemented,
    "LOCALWEEK" => stubs::unimplemented,
    "LOCALTIMESTAMP" => stubs::unimplemented,
    "REVISIONDAY" => stubs::unimplemented,
    "REVISIONDAY2" => stubs::unimplemented,
    "REVISIONMONTH" => stubs::unimplemented,
    "REVISIONYEAR" => stubs::unimplemented,
    "REVISIONTIMESTAMP" => stubs::unimplemented,
    "REVISIONUSER" => stubs::unimplemented,
    "NUMBEROFPAGES" => stubs::unimplemented,
    "NUMBEROFARTICLES" => stubs::unimplemented,
    "NUMBEROFFILES" => stubs::unimplemented,
    "NUMBEROFEDITS" => stubs::unimplemented,
    "NUMBEROFUSERS" => stubs::unimplemented,
    "NUMBEROFADMINS" => stubs::unimplemented,
    "NUMBEROFACTIVEUSERS" => stubs::unimplemented,
    "PAGEID" => stubs::unimplemented,
    "PAGESIZE" => stubs::unimplemented,
    "PROTECTIONLEVEL" => stubs::unimplemented,
    "PROTECTIONEXPIRY" => stubs::unimplemented,
    "PENDINGCHANGELEVEL" => stubs::unimplemented,
    "PAGESINCATEGORY" => stubs::unimplemented,
    "NUMBERINGROUP" => stubs::unimplemented,
    "formatnum" => stubs::unimplemented,
    "plural" => stubs::unimplemented,
    "#time" => stubs::unimplemented,
    "#timel" => stubs::unimplemented,
    "gender" => stubs::unimplemented,
    "localurl" => stubs::unimplemented,
    "fullurl" => stubs::unimplemented,
    "canonicalurl" => stubs::unimplemented,
    "filepath" => stubs::unimplemented,
    "#rel2abs" => stubs::unimplemented,
    "#babel" => stubs::unimplemented,
    "#categorytree" => stubs::unimplemented,
    "#coordinates" => stubs::unimplemented,
    "#language" => stubs::unimplemented,
    "#lst" => stubs::unimplemented,
    "#lsth" => stubs::unimplemented,
    "#lstx" => stubs::unimplemented,
    "#property" => stubs::unimplemented,
    "#related" => stubs::unimplemented,
    "#section" => stubs::unimplemented,
    "#section-h" => stubs::unimplemented,
    "#section-x" => stubs::unimplemented,
    "#statements" => stubs::unimplemented,
    "#target" => stubs::unimplemented,
};

#[cfg(test)]
mod tests {
    use crate::{expand::ExpansionContext, registry::SourceRegistry};

    fn expand(text: &str) -> String {
        let registry = SourceRegistry::from_pages([]);
        let mut ctx = ExpansionContext::new(&registry);
        ctx.expand("Testpage", text)
    }

    #[test]
    fn if_contract() {
        assert_eq!(expand("{{#if:|T|F}}"), "F");
        assert_eq!(expand("{{#if:x|T|F}}"), "T");
        assert_eq!(expand("{{#if: \n |T|F}}"), "F", "whitespace is empty");
        assert_eq!(expand("{{#if:x|T}}"), "T");
        assert_eq!(expand("{{#if:|T}}"), "");
    }

    #[test]
    fn ifeq_contract() {
        assert_eq!(expand("{{#ifeq: a | a |yes|no}}"), "yes");
        assert_eq!(expand("{{#ifeq:a|b|yes|no}}"), "no");
    }

    #[test]
    fn switch_fallthrough_contract() {
        assert_eq!(expand("{{#switch:c|a=one|c|d=four|b=two}}"), "four");
        assert_eq!(expand("{{#switch:e|a=one|c|d=four|b=two}}"), "");
        assert_eq!(expand("{{#switch:a|a=one|c|d=four|b=two}}"), "one");
        assert_eq!(expand("{{#switch:x|a=one|#default=dflt|b=two}}"), "dflt");
        assert_eq!(expand("{{#switch:x|a=one|fallback}}"), "fallback");
        assert_eq!(expand("{{#switch: 1 |1.0=num|other}}"), "num", "numeric case compare");
    }

    #[test]
    fn expr_contract() {
        assert_eq!(expand("{{#expr: 2^10}}"), "1024");
        assert_eq!(expand("{{#expr: 3.0+1}}"), "4");
        assert!(expand("{{#expr: 1/0}}").contains("Expression error"));
        assert_eq!(expand("{{#ifexpr: 1 > 0 |big|small}}"), "big");
        assert_eq!(expand("{{#ifexpr: 0.4 |t|f}}"), "f", "truth is integer-cast");
    }

    #[test]
    fn ifexist_uses_collaborator() {
        let registry = SourceRegistry::from_pages([]);
        let mut ctx = ExpansionContext::new(&registry);
        assert_eq!(ctx.expand("T", "{{#ifexist:Anything|y|n}}"), "n");
        ctx.set_page_checker(|title| title == "Real page");
        assert_eq!(ctx.expand("T", "{{#ifexist:Real page|y|n}}"), "y");
        assert_eq!(ctx.expand("T", "{{#ifexist:Other|y|n}}"), "n");
    }

    #[test]
    fn string_functions() {
        assert_eq!(expand("{{#len:héllo}}"), "5");
        assert_eq!(expand("{{#pos:abcabc|b}}"), "1");
        assert_eq!(expand("{{#pos:abcabc|b|2}}"), "4");
        assert_eq!(expand("{{#pos:abc|z}}"), "");
        assert_eq!(expand("{{#rpos:abcabc|b}}"), "4");
        assert_eq!(expand("{{#rpos:abc|z}}"), "-1");
        assert_eq!(expand("{{#sub:Icecream|3}}"), "cream");
        assert_eq!(expand("{{#sub:Icecream|0|3}}"), "Ice");
        assert_eq!(expand("{{#sub:Icecream|-3}}"), "eam");
        assert_eq!(expand("{{#sub:Icecream|3|-2}}"), "cre");
        assert_eq!(expand("{{#replace:a b c| |-}}"), "a-b-c");
    }

    #[test]
    fn explode_contract() {
        assert_eq!(expand("{{#explode:a-b-c-d|-|1}}"), "b");
        assert_eq!(expand("{{#explode:a-b-c-d|-|-1}}"), "d");
        assert_eq!(expand("{{#explode:a-b-c-d|-|-2}}"), "c");
        assert_eq!(expand("{{#explode:a-b-c-d|-|9}}"), "");
        // A limit merges the remainder into the last part.
        assert_eq!(expand("{{#explode:a-b-c-d|-|1|2}}"), "b-c-d");
        assert_eq!(expand("{{#explode:a-b-c-d|-|-1|2}}"), "b-c-d");
    }

    #[test]
    fn padding() {
        assert_eq!(expand("{{padleft:7|3}}"), "007");
        assert_eq!(expand("{{padleft:xyz|5|_}}"), "__xyz");
        assert_eq!(expand("{{padright:xyz|5|ab}}"), "xyzab");
        assert_eq!(expand("{{pad:x|5|-|center}}"), "--x--");
        assert_eq!(expand("{{padleft:long text|4}}"), "long text");
    }

    #[test]
    fn case_functions() {
        assert_eq!(expand("{{uc:abc}}"), "ABC");
        assert_eq!(expand("{{lc:AbC}}"), "abc");
        assert_eq!(expand("{{ucfirst:abc}}"), "Abc");
        assert_eq!(expand("{{lcfirst:ABC}}"), "aBC");
    }

    #[test]
    fn url_functions() {
        assert_eq!(expand("{{urlencode:a b}}"), "a+b");
        assert_eq!(expand("{{urlencode:a b|WIKI}}"), "a_b");
        assert_eq!(expand("{{urlencode:a b|PATH}}"), "a%20b");
        assert_eq!(expand("{{#urldecode:a+b%26c}}"), "a b&c");
        assert_eq!(expand("{{anchorencode:Etymology 2}}"), "Etymology_2");
    }

    #[test]
    fn tag_synthesis() {
        assert_eq!(expand("{{#tag:ref|note}}"), "<ref>note</ref>");
        assert_eq!(expand("{{#tag:ref}}"), "<ref />");
        assert_eq!(
            expand("{{#tag:ref|a<b|name=x}}"),
            r#"<ref name="x">a&lt;b</ref>"#
        );
        assert_eq!(
            expand("{{#tag:blink|x}}"),
            "{{#tag:blink|x}}",
            "disallowed tags pass through unexpanded"
        );
    }

    #[test]
    fn title_metafunctions() {
        let registry = SourceRegistry::from_pages([]);
        let mut ctx = ExpansionContext::new(&registry);
        assert_eq!(ctx.expand("Help:Foo/Bar", "{{FULLPAGENAME}}"), "Help:Foo/Bar");
        assert_eq!(ctx.expand("Help:Foo/Bar", "{{PAGENAME}}"), "Foo/Bar");
        assert_eq!(ctx.expand("Help:Foo/Bar", "{{SUBPAGENAME}}"), "Bar");
        assert_eq!(ctx.expand("Help:Foo/Bar", "{{NAMESPACE}}"), "Help");
        assert_eq!(ctx.expand("Plain", "{{NAMESPACE}}"), "");
        assert_eq!(ctx.expand("T", "{{PAGENAME:Template:X}}"), "X");
    }

    #[test]
    fn namespace_functions() {
        assert_eq!(expand("{{ns:10}}"), "Template");
        assert_eq!(expand("{{ns:template}}"), "Template");
        assert_eq!(expand("{{ns:image}}"), "File");
        assert_eq!(expand("{{nse:user talk}}"), "User_talk");
        assert_eq!(expand("{{ns:bogus}}"), "{{ns:bogus}}");
    }

    #[test]
    fn titleparts_contract() {
        assert_eq!(expand("{{#titleparts:Talk:Foo/Bar/Baz}}"), "Talk:Foo/Bar/Baz");
        assert_eq!(expand("{{#titleparts:Talk:Foo/Bar/Baz|1}}"), "Talk");
        assert_eq!(expand("{{#titleparts:Talk:Foo/Bar/Baz|2}}"), "Talk:Foo");
        assert_eq!(expand("{{#titleparts:Talk:Foo/Bar/Baz|1|2}}"), "Foo");
        assert_eq!(expand("{{#titleparts:Talk:Foo/Bar/Baz|0|-1}}"), "Baz");
        assert_eq!(expand("{{#titleparts:Talk:Foo/Bar/Baz|-1}}"), "Talk:Foo/Bar");
        assert_eq!(expand("{{#titleparts:Talk:Foo/Bar/Baz|0|9}}"), "");
    }

    #[test]
    fn dateformats() {
        assert_eq!(expand("{{#dateformat:25 December 2009|mdy}}"), "December 25, 2009");
        assert_eq!(expand("{{#dateformat:December 25, 2009|dmy}}"), "25 December 2009");
        assert_eq!(expand("{{#dateformat:25 December 2009|ymd}}"), "2009 December 25");
        assert_eq!(expand("{{#dateformat:25 December 2009}}"), "2009-12-25");
        assert_eq!(expand("{{#dateformat:25 December|mdy}}"), "December 25");
        assert_eq!(expand("{{#dateformat:gibberish|mdy}}"), "gibberish");
    }

    #[test]
    fn unimplemented_functions_reemit() {
        assert_eq!(expand("{{CURRENTYEAR}}"), "{{CURRENTYEAR}}");
        assert_eq!(expand("{{#time:Y-m-d}}"), "{{#time:Y-m-d}}");
    }

    #[test]
    fn lazy_branches_do_not_expand() {
        // The untaken branch contains an undefined template; taking the
        // other branch must not try to expand it and log about it.
        let registry = SourceRegistry::from_pages([]);
        let mut ctx = ExpansionContext::new(&registry);
        let out = ctx.expand("T", "{{#if:x|ok|{{missing}}}}");
        assert_eq!(out, "ok");
        assert!(
            ctx.take_diagnostics()
                .iter()
                .all(|d| !d.message.contains("undefined template")),
            "the else branch was expanded eagerly"
        );
    }
}
