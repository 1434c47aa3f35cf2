//! Stack-based tree builder for wikitext documents.
//!
//! The builder consumes the token stream and maintains a single explicit
//! stack of open nodes rooted at a [`NodeKind::Root`] node. No input is
//! fatal: mismatched and unclosed constructs are force-closed with a
//! diagnostic and parsing continues, because real page corpora contain
//! large amounts of malformed markup.

use crate::{
    html::ALLOWED_TAGS,
    nodes::{KindSet, NodeChild, NodeKind, WikiNode},
    parser_fns,
    tokens::{Token, Tokenizer},
};
use regex::Regex;
use std::sync::LazyLock;

/// A recoverable parse or expansion anomaly, attributable to a page and
/// source line.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[error("{page}:{line}: {message}")]
pub struct Diagnostic {
    /// The title of the page being processed.
    pub page: String,
    /// The source line the anomaly was detected on.
    pub line: u32,
    /// A human-readable description.
    pub message: String,
}

/// The result of parsing one page.
#[derive(Debug)]
pub struct ParseOutput {
    /// The root of the parse tree. Owns the whole tree.
    pub root: WikiNode,
    /// Anomalies encountered while parsing.
    pub diagnostics: Vec<Diagnostic>,
}

/// Parses a wikitext document into a tree.
///
/// This never fails; malformed input produces diagnostics and a
/// best-effort tree. HTML entities are not decoded here since that must
/// happen after template processing.
pub fn parse(page_title: &str, text: &str) -> ParseOutput {
    let mut builder = Builder::new(page_title);
    for token in Tokenizer::new(text) {
        builder.process(&token);
        let literal = token.literal();
        builder.line += literal.matches('\n').count() as u32;
        builder.bol = literal.ends_with('\n');
    }
    builder.finish()
}

/// Kinds that a list item never pops past, even in malformed input.
const LIST_BARRIERS: KindSet = KindSet::HTML
    .union(KindSet::TEMPLATE)
    .union(KindSet::TEMPLATE_ARG)
    .union(KindSet::PARSER_FN)
    .union(KindSet::TABLE)
    .union(KindSet::TABLE_HEADER_CELL)
    .union(KindSet::TABLE_ROW)
    .union(KindSet::TABLE_CELL);

/// Tree building state for a single document.
struct Builder {
    /// The stack of open nodes. The bottom entry is always the root.
    stack: Vec<WikiNode>,
    /// The page title, used in diagnostics.
    page: String,
    /// The current source line.
    line: u32,
    /// Whether the previous token ended a line.
    bol: bool,
    /// Whether the scanner is inside a `<nowiki>` span.
    nowiki: bool,
    /// Suppresses link trail handling immediately after `<nowiki/>`.
    suppress_special: bool,
    /// Anomalies collected so far.
    diagnostics: Vec<Diagnostic>,
}

impl Builder {
    fn new(page_title: &str) -> Self {
        let mut root = WikiNode::new(NodeKind::Root, 0);
        root.set_first_arg_text(page_title);
        Self {
            stack: vec![root],
            page: page_title.into(),
            line: 1,
            bol: true,
            nowiki: false,
            suppress_special: false,
            diagnostics: Vec::new(),
        }
    }

    fn finish(mut self) -> ParseOutput {
        while self.stack.len() > 1 {
            self.pop(true);
        }
        ParseOutput {
            root: self.stack.pop().unwrap(),
            diagnostics: self.diagnostics,
        }
    }

    fn diag(&mut self, message: String) {
        let diag = Diagnostic {
            page: self.page.clone(),
            line: self.line,
            message,
        };
        log::debug!("{diag}");
        self.diagnostics.push(diag);
    }

    fn top(&self) -> &WikiNode {
        self.stack.last().unwrap()
    }

    fn top_mut(&mut self) -> &mut WikiNode {
        self.stack.last_mut().unwrap()
    }

    /// Returns true if any open node is of one of the given kinds.
    fn have(&self, kinds: KindSet) -> bool {
        self.stack.iter().any(|node| node.kind.is(kinds))
    }

    /// Opens a new node of the given kind.
    fn push(&mut self, kind: NodeKind) -> &mut WikiNode {
        self.stack.push(WikiNode::new(kind, self.line));
        self.suppress_special = false;
        self.top_mut()
    }

    /// Closes the top node and attaches it to its parent. If
    /// `warn_unclosed` is set, nodes that expect an explicit end marker
    /// produce a diagnostic.
    fn pop(&mut self, warn_unclosed: bool) {
        debug_assert!(self.stack.len() > 1, "cannot pop the root");
        let mut node = self.stack.pop().unwrap();

        if warn_unclosed && node.kind.is(KindSet::MUST_CLOSE) {
            let message = if node.kind == NodeKind::Html {
                format!(
                    "HTML tag <{}> not properly closed, started on line {}",
                    node.first_arg_text().unwrap_or(""),
                    node.loc
                )
            } else {
                format!(
                    "format {:?} not properly closed, started on line {}",
                    node.kind, node.loc
                )
            };
            self.diag(message);
        }

        // Out-of-order closing of quote styles routinely produces empty
        // formatting nodes; discard them instead of attaching.
        if node.kind.is(KindSet::ITALIC | KindSet::BOLD | KindSet::BOLD_ITALIC)
            && node.children.is_empty()
        {
            return;
        }

        if node.kind.is(KindSet::HAVE_ARGS) {
            node.promote_children();
        }

        // A template whose name is a constant naming a known parser
        // function is really a parser function call.
        if node.kind == NodeKind::Template
            && node
                .first_arg_text()
                .is_some_and(parser_fns::is_parser_function)
        {
            node.kind = NodeKind::ParserFn;
        }

        // A link into a media namespace is a media inclusion.
        if node.kind == NodeKind::Link
            && let Some(target) = node.args.first().and_then(|arg| arg.first())
            && let Some(target) = target.as_text()
        {
            let target = target.trim_start().trim_start_matches(':');
            if ["file:", "image:", "media:"].iter().any(|ns| {
                target
                    .get(..ns.len())
                    .is_some_and(|head| head.eq_ignore_ascii_case(ns))
            }) {
                node.kind = NodeKind::Media;
            }
        }

        // Unshuffle definition list items: during parsing `definition`
        // temporarily holds the head while children collect the
        // definition.
        if node.kind == NodeKind::ListItem
            && node.first_arg_text().is_some_and(|p| p.ends_with(';'))
            && node.definition.is_some()
        {
            let head = node.definition.take().unwrap();
            node.definition = Some(core::mem::take(&mut node.children));
            node.children = head;
        }

        self.top_mut().children.push(NodeChild::Node(node));
    }

    /// Dispatches one token.
    fn process(&mut self, token: &Token<'_>) {
        // Inside <nowiki> and <pre> everything except the specific end tag
        // is literal text.
        if token.is_structural() {
            if self.nowiki {
                if !matches!(token, Token::HtmlClose { name, .. } if name.eq_ignore_ascii_case("nowiki"))
                {
                    return self.text(token.literal());
                }
            } else if self.top().kind == NodeKind::Pre
                && !matches!(token, Token::HtmlClose { name, .. } if name.eq_ignore_ascii_case("pre"))
            {
                return self.text(token.literal());
            }
        }

        match token {
            Token::Text(text) => self.text(text),
            Token::Space(text) => self.whitespace(text),
            Token::SectionOpen(level) => self.section_open(*level),
            Token::SectionClose(level) => self.section_close(*level),
            Token::Italic => self.italic(),
            Token::Bold => self.bold(),
            Token::BoldItalic => self.bold_italic(),
            Token::ListPrefix(prefix) => self.list(prefix),
            Token::HLine => {
                self.push(NodeKind::HLine);
                self.pop(true);
            }
            Token::LinkOpen => {
                self.push(NodeKind::Link);
            }
            Token::LinkClose => self.close_up_to(KindSet::LINK, "]]"),
            Token::ExternalOpen => {
                self.push(NodeKind::Url);
            }
            Token::ExternalClose => self.close_up_to(KindSet::URL, "]"),
            Token::TemplateOpen => {
                self.push(NodeKind::Template);
            }
            Token::TemplateClose => {
                self.close_up_to(KindSet::TEMPLATE | KindSet::PARSER_FN, "}}");
            }
            Token::TemplateArgOpen => {
                self.push(NodeKind::TemplateArg);
            }
            Token::TemplateArgClose => self.close_up_to(KindSet::TEMPLATE_ARG, "}}}"),
            Token::TableOpen => {
                self.push(NodeKind::Table);
            }
            Token::TableClose => self.table_end(),
            Token::TableCaption => self.table_caption(),
            Token::TableRow => self.table_row(),
            Token::HeaderCell(token) => self.table_header_cell(token),
            Token::DoubleBar => self.double_bar(),
            Token::Bar => self.bar(),
            Token::Comment(_) => {}
            Token::HtmlOpen {
                name,
                attrs,
                self_closing,
                raw,
            } => self.html_open(name, attrs, *self_closing, raw),
            Token::HtmlClose { name, raw } => self.html_close(name, raw),
            Token::Url(url) => self.url(url),
            Token::MagicWord(word) => {
                self.push(NodeKind::MagicWord).set_first_arg_text(word);
                self.pop(false);
            }
        }
    }

    /// Inserts a run of text into the tree.
    fn text(&mut self, token: &str) {
        // Some nodes close automatically at the beginning of a line.
        if self.bol && !self.nowiki {
            loop {
                match self.top().kind {
                    NodeKind::ListItem => {
                        let ends_item = self.top().children.last().is_some_and(|child| {
                            child.as_text().is_some_and(|text| {
                                !text.trim().is_empty() && text.ends_with('\n')
                            })
                        });
                        if ends_item {
                            self.pop(false);
                            continue;
                        }
                    }
                    NodeKind::Preformatted => {
                        let ends_pre = self.top().children.last().is_some_and(|child| {
                            child.as_text().is_some_and(|text| text.ends_with('\n'))
                        }) && !token.starts_with(' ')
                            && !token.trim().is_empty();
                        if ends_pre {
                            self.pop(false);
                            continue;
                        }
                    }
                    _ => {}
                }
                break;
            }
        }

        // Word characters immediately after a link become its trail.
        let mut token = token;
        if !self.suppress_special
            && let Some(NodeChild::Node(link)) = self.top_mut().children.last_mut()
            && matches!(link.kind, NodeKind::Link | NodeKind::Media)
            && link.children.is_empty()
        {
            let trail: usize = token
                .chars()
                .take_while(|c| c.is_alphanumeric() || *c == '_')
                .map(char::len_utf8)
                .sum();
            if trail > 0 {
                link.children.push(NodeChild::Text(token[..trail].into()));
                token = &token[trail..];
                if token.is_empty() {
                    return;
                }
            }
        }

        let node = self.top_mut();
        if let Some(NodeChild::Text(prev)) = node.children.last_mut() {
            prev.push_str(token);
        } else {
            node.children.push(NodeChild::Text(token.into()));
        }
    }

    /// Handles a space, tab, or newline token.
    fn whitespace(&mut self, token: &str) {
        // A space at the beginning of a line starts preformatted text.
        if self.bol && token == " " {
            if self.top().kind != NodeKind::Preformatted {
                self.push(NodeKind::Preformatted);
            }
            return self.text(token);
        }

        // A space inside an external link separates the target from the
        // display text.
        let node = self.top_mut();
        if node.kind == NodeKind::Url && node.args.is_empty() {
            node.promote_children();
            return;
        }

        self.text(token);
    }

    fn section_open(&mut self, level: u8) {
        let kind = NodeKind::from_section_level(level).unwrap_or(NodeKind::Level6);

        // A heading implicitly closes all content of equal or deeper
        // sections, along with everything else left open inside them.
        while self.top().kind.section_level().unwrap_or(99) >= level {
            self.pop(true);
        }
        self.push(kind);
    }

    fn section_close(&mut self, level: u8) {
        let kind = NodeKind::from_section_level(level).unwrap_or(NodeKind::Level6);
        while !self.top().kind.is(KindSet::SECTIONS) {
            self.pop(true);
        }
        if self.top().kind == NodeKind::Root {
            return self.diag("subtitle end marker without a matching start".into());
        }
        if self.top().kind != kind {
            self.diag("subtitle start and end markers level mismatch".into());
        }
        self.top_mut().promote_children();
    }

    fn italic(&mut self) {
        if !self.have(KindSet::ITALIC) {
            self.push(NodeKind::Italic);
            return;
        }

        // Closing out of order is legal; any bold opened in between is
        // reopened after the italic closes.
        let mut reopen_bold = false;
        loop {
            let kind = self.top().kind;
            self.pop(false);
            match kind {
                NodeKind::Italic => break,
                NodeKind::Bold | NodeKind::BoldItalic => reopen_bold = true,
                _ => {}
            }
        }
        if reopen_bold {
            self.push(NodeKind::Bold);
        }
    }

    fn bold(&mut self) {
        if !self.have(KindSet::BOLD) {
            self.push(NodeKind::Bold);
            return;
        }

        let mut reopen_italic = false;
        loop {
            let kind = self.top().kind;
            self.pop(false);
            match kind {
                NodeKind::Bold => break,
                NodeKind::Italic | NodeKind::BoldItalic => reopen_italic = true,
                _ => {}
            }
        }
        if reopen_italic {
            self.push(NodeKind::Italic);
        }
    }

    fn bold_italic(&mut self) {
        if self.have(KindSet::BOLD_ITALIC) {
            while self.top().kind != NodeKind::BoldItalic {
                self.pop(false);
            }
            self.pop(false);
        } else if !self.have(KindSet::BOLD | KindSet::ITALIC) {
            self.push(NodeKind::BoldItalic);
        } else {
            // A five-quote run against partially open styles decomposes
            // into a bold toggle followed by an italic toggle.
            self.bold();
            self.italic();
        }
    }

    /// Generic close handler: searches the stack for an open node of one
    /// of `kinds`, force-closing everything above it. With no match the
    /// token is plain text.
    fn close_up_to(&mut self, kinds: KindSet, literal: &str) {
        if !self.have(kinds) {
            return self.text(literal);
        }
        loop {
            if self.top().kind.is(kinds) {
                self.pop(false);
                break;
            }
            self.pop(true);
        }
    }

    /// Handles a bare URL in running text.
    fn url(&mut self, url: &str) {
        if self.top().kind == NodeKind::Url {
            return self.text(url);
        }
        self.push(NodeKind::Url);
        self.text(url);
        self.pop(false);
    }

    /// Handles the overloaded vertical bar.
    fn bar(&mut self) {
        let node = self.top_mut();
        if node.kind.is(KindSet::HAVE_ARGS) {
            node.promote_children();
            return;
        }
        self.table_cell("|");
    }

    /// Handles `||`, which separates arguments twice outside tables.
    fn double_bar(&mut self) {
        if self.top().kind.is(KindSet::HAVE_ARGS) {
            self.bar();
            self.bar();
            return;
        }
        self.table_cell("||");
    }

    /// Handles a colon inside a template's name position, which
    /// reclassifies the template as a parser function call.
    fn colon(&mut self) {
        let node = self.top_mut();
        let is_function_name = node.kind == NodeKind::Template
            && node.args.is_empty()
            && node.children.len() == 1
            && node.children[0]
                .as_text()
                .is_some_and(parser_fns::is_parser_function);
        if !is_function_name {
            return self.text(":");
        }
        node.kind = NodeKind::ParserFn;
        node.promote_children();
    }

    /// Handles list item prefixes and the colon token.
    fn list(&mut self, token: &str) {
        let top = self.top();
        if token == ":" && top.kind == NodeKind::Template {
            return self.colon();
        }

        // Colons inside links are just text, never list items.
        if top.kind.is(KindSet::LINK | KindSet::URL) {
            return self.text(token);
        }

        if !self.bol {
            // `; term : definition` on a single line.
            let node = self.top_mut();
            if token == ":"
                && node.kind == NodeKind::ListItem
                && node.first_arg_text().is_some_and(|p| p.ends_with(';'))
                && node.definition.is_none()
            {
                node.definition = Some(core::mem::take(&mut node.children));
                return;
            }
            return self.text(token);
        }

        // Close items at equal or deeper nesting. Prefix strings encode
        // depth directly: a longer prefix extending the open item's prefix
        // means this item nests inside it.
        loop {
            let node = self.top();
            if node.kind == NodeKind::ListItem {
                let prefix = node.first_arg_text().unwrap_or("").to_string();
                if prefix.ends_with(';')
                    && token.ends_with(':')
                    && token[..token.len() - 1] == prefix[..prefix.len() - 1]
                    && node.definition.is_none()
                {
                    // The definition of a `;` item, on its own line.
                    let node = self.top_mut();
                    node.definition = Some(core::mem::take(&mut node.children));
                    return;
                }
                if token.len() > prefix.len() && token.starts_with(prefix.as_str()) {
                    break;
                }
            }
            if node.kind.is(KindSet::SECTIONS) || node.kind.is(LIST_BARRIERS) {
                break;
            }
            self.pop(true);
        }

        self.push(NodeKind::ListItem).set_first_arg_text(token);
    }

    /// Moves a table or row's leading text child into parsed attributes.
    fn take_attrs(&mut self, kind: NodeKind) {
        let node = self.top_mut();
        if node.kind != kind || node.children.len() != 1 {
            return;
        }
        if let Some(NodeChild::Text(attrs)) = node.children.last() {
            let attrs = attrs.clone();
            node.children.pop();
            parse_attrs(node, &attrs);
        }
    }

    fn table_caption(&mut self) {
        self.take_attrs(NodeKind::Table);
        if !self.have(KindSet::TABLE) {
            return self.text("|+");
        }
        while self.top().kind != NodeKind::Table {
            self.pop(true);
        }
        self.push(NodeKind::TableCaption);
    }

    fn table_row(&mut self) {
        self.take_attrs(NodeKind::Table);
        if !self.have(KindSet::TABLE) {
            return self.text("|-");
        }
        while self.top().kind != NodeKind::Table {
            self.pop(true);
        }
        self.push(NodeKind::TableRow);
    }

    fn table_header_cell(&mut self, token: &str) {
        self.take_attrs(NodeKind::TableRow);
        self.take_attrs(NodeKind::Table);
        if !self.have(KindSet::TABLE) {
            return self.text(token);
        }
        loop {
            match self.top().kind {
                NodeKind::TableRow => {
                    self.push(NodeKind::TableHeaderCell);
                    return;
                }
                NodeKind::Table => {
                    self.push(NodeKind::TableRow);
                    self.push(NodeKind::TableHeaderCell);
                    return;
                }
                NodeKind::TableCaption => {
                    if self.bol {
                        self.pop(false);
                        self.push(NodeKind::TableRow);
                        self.push(NodeKind::TableHeaderCell);
                    } else {
                        self.text(token);
                    }
                    return;
                }
                NodeKind::TableCell => return self.text(token),
                _ => self.pop(true),
            }
        }
    }

    fn table_cell(&mut self, token: &str) {
        self.take_attrs(NodeKind::TableRow);
        self.take_attrs(NodeKind::Table);
        if !self.have(KindSet::TABLE) {
            return self.text(token);
        }

        if token == "|" && !self.bol {
            // A mid-line bar may separate cell or caption attributes from
            // content.
            let node = self.top_mut();
            if node.attrs.is_empty()
                && node.children.len() == 1
                && matches!(node.children[0], NodeChild::Text(_))
                && node.kind.is(
                    KindSet::TABLE_CAPTION | KindSet::TABLE_HEADER_CELL | KindSet::TABLE_CELL,
                )
            {
                if let Some(NodeChild::Text(attrs)) = node.children.pop() {
                    parse_attrs(node, &attrs);
                }
                return;
            }
            return self.text(token);
        }

        loop {
            match self.top().kind {
                NodeKind::TableRow => break,
                NodeKind::Table => {
                    self.push(NodeKind::TableRow);
                    break;
                }
                NodeKind::TableCaption => return self.text(token),
                _ => self.pop(true),
            }
        }
        self.push(NodeKind::TableCell);
    }

    fn table_end(&mut self) {
        if !self.have(KindSet::TABLE) {
            return self.text("|}");
        }
        loop {
            if self.top().kind == NodeKind::Table {
                self.pop(false);
                break;
            }
            self.pop(true);
        }
    }

    fn html_open(&mut self, name: &str, attrs: &str, self_closing: bool, raw: &str) {
        let name = name.to_ascii_lowercase();

        // <nowiki> is not an element; it toggles literal-text mode.
        if name == "nowiki" {
            if self_closing {
                self.suppress_special = true;
            } else {
                self.nowiki = true;
            }
            return;
        }

        if name == "pre" {
            let node = self.push(NodeKind::Pre);
            parse_attrs(node, attrs);
            if self_closing {
                self.pop(false);
            }
            return;
        }

        let Some(spec) = ALLOWED_TAGS.get(&name) else {
            self.diag(format!("html tag <{name}> not allowed in wikitext"));
            return self.text(raw);
        };

        // Auto-close open tags that cannot contain this one, stopping at
        // the first non-HTML node or permitted parent.
        loop {
            let node = self.top();
            if node.kind != NodeKind::Html {
                break;
            }
            let parent = node.first_arg_text().unwrap_or_default().to_string();
            if spec.permits_parent(&parent) {
                break;
            }
            let implicit = ALLOWED_TAGS
                .get(&parent)
                .is_some_and(|parent_spec| parent_spec.closed_by(&name));
            self.pop(!implicit);
        }

        let node = self.push(NodeKind::Html);
        node.set_first_arg_text(&name);
        parse_attrs(node, attrs);

        if spec.no_end_tag || self_closing {
            self.pop(false);
        }
    }

    fn html_close(&mut self, name: &str, raw: &str) {
        let name = name.to_ascii_lowercase();

        if name == "nowiki" {
            if self.nowiki {
                self.nowiki = false;
                self.suppress_special = true;
            } else {
                self.diag("unexpected </nowiki>".into());
                self.text(raw);
            }
            return;
        }

        if name == "pre" {
            if self.top().kind == NodeKind::Pre {
                self.pop(false);
            } else {
                self.diag("unexpected </pre>".into());
                self.text(raw);
            }
            return;
        }

        if !ALLOWED_TAGS.contains_key(&name) {
            self.diag(format!("html tag </{name}> not allowed in wikitext"));
            return self.text(raw);
        }

        if !self
            .stack
            .iter()
            .any(|node| node.kind == NodeKind::Html && node.first_arg_text() == Some(&name))
        {
            return self.diag(format!("no corresponding start tag found for {raw}"));
        }

        loop {
            let node = self.top();
            if node.kind == NodeKind::Html && node.first_arg_text() == Some(&name) {
                self.pop(false);
                break;
            }
            // Tags with an implicit-close list may be ended by closing
            // their parent without a warning.
            let implicit = node.kind == NodeKind::Html
                && node
                    .first_arg_text()
                    .and_then(|tag| ALLOWED_TAGS.get(tag))
                    .is_some_and(|spec| !spec.close_next.is_empty());
            self.pop(!implicit);
        }
    }
}

/// Parses HTML attribute text into a node's attribute map.
fn parse_attrs(node: &mut WikiNode, attrs: &str) {
    static ATTR: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(
            r#"(?si)\b([^"'>/=\x00-\x1f\s]+)(=("[^"]*"|'[^']*'|[^"'<>`\s]*))?\s*"#,
        )
        .unwrap()
    });

    for caps in ATTR.captures_iter(attrs) {
        let name = caps.get(1).unwrap().as_str();
        let mut value = caps.get(3).map_or("", |m| m.as_str());
        if value.starts_with('"') || value.starts_with('\'') {
            value = &value[1..value.len() - 1];
        }
        node.attrs.insert(name.to_string(), value.to_string());
    }
}
