//! Parse tree node types for wikitext documents.

use bitflags::bitflags;
use indexmap::IndexMap;

/// Node types in the parse tree.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum NodeKind {
    /// Root of the parsed document. The page title is stored as the first
    /// argument group.
    Root,
    /// `==` section. The heading text is the first argument group; the
    /// section content is in `children`.
    Level2,
    /// `===` section.
    Level3,
    /// `====` section.
    Level4,
    /// `=====` section.
    Level5,
    /// `======` section.
    Level6,
    /// Content rendered in italics.
    Italic,
    /// Content rendered in bold.
    Bold,
    /// Content rendered in bold italics. Only produced when a single
    /// five-quote run opens both styles at once.
    BoldItalic,
    /// A horizontal rule. No arguments or children.
    HLine,
    /// A list item. The first argument group holds the raw item prefix
    /// (`*`, `#`, `:`, `;` runs); nesting is expressed by prefix length.
    /// Definition list items additionally carry a [`WikiNode::definition`].
    ListItem,
    /// Preformatted text in which markup is still interpreted. Opened by a
    /// space at the beginning of a line.
    Preformatted,
    /// `<pre>` text in which markup is not interpreted.
    Pre,
    /// An HTML-like element. The tag name is the first argument group and
    /// tag attributes are in `attrs`.
    Html,
    /// An internal `[[...]]` link. The target is the first argument group,
    /// display text groups follow. A link trail ends up in `children`.
    Link,
    /// An internal link whose target is in a media namespace
    /// (`File:`/`Image:`/`Media:`).
    Media,
    /// A `{{...}}` template transclusion. The name is the first argument
    /// group, call arguments follow.
    Template,
    /// A `{{{...}}}` template argument reference. The argument name is the
    /// first argument group, the default value the second.
    TemplateArg,
    /// A `{{name:...}}` parser function call, including no-argument magic
    /// variables such as `{{PAGENAME}}`.
    ParserFn,
    /// An external URL. The URL is the first argument group; display text
    /// follows.
    Url,
    /// A `{|...|}` table.
    Table,
    /// A `|+` table caption.
    TableCaption,
    /// A table row, explicit (`|-`) or implied by a cell.
    TableRow,
    /// A `!` table header cell.
    TableHeaderCell,
    /// A `|` table data cell.
    TableCell,
    /// A `__WORD__` behavior switch. The word is the first argument group.
    MagicWord,
}

bitflags! {
    /// A set of [`NodeKind`]s, used to select nodes during traversal.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct KindSet: u32 {
        const ROOT = 1 << 0;
        const LEVEL2 = 1 << 1;
        const LEVEL3 = 1 << 2;
        const LEVEL4 = 1 << 3;
        const LEVEL5 = 1 << 4;
        const LEVEL6 = 1 << 5;
        const ITALIC = 1 << 6;
        const BOLD = 1 << 7;
        const BOLD_ITALIC = 1 << 8;
        const HLINE = 1 << 9;
        const LIST_ITEM = 1 << 10;
        const PREFORMATTED = 1 << 11;
        const PRE = 1 << 12;
        const HTML = 1 << 13;
        const LINK = 1 << 14;
        const MEDIA = 1 << 15;
        const TEMPLATE = 1 << 16;
        const TEMPLATE_ARG = 1 << 17;
        const PARSER_FN = 1 << 18;
        const URL = 1 << 19;
        const TABLE = 1 << 20;
        const TABLE_CAPTION = 1 << 21;
        const TABLE_ROW = 1 << 22;
        const TABLE_HEADER_CELL = 1 << 23;
        const TABLE_CELL = 1 << 24;
        const MAGIC_WORD = 1 << 25;

        /// Section kinds, including the root.
        const SECTIONS = Self::ROOT.bits()
            | Self::LEVEL2.bits()
            | Self::LEVEL3.bits()
            | Self::LEVEL4.bits()
            | Self::LEVEL5.bits()
            | Self::LEVEL6.bits();
        /// Kinds whose arguments are separated by vertical bars.
        const HAVE_ARGS = Self::LINK.bits()
            | Self::MEDIA.bits()
            | Self::TEMPLATE.bits()
            | Self::TEMPLATE_ARG.bits()
            | Self::PARSER_FN.bits()
            | Self::URL.bits();
        /// Kinds that produce a diagnostic when left unclosed.
        const MUST_CLOSE = Self::ITALIC.bits()
            | Self::BOLD.bits()
            | Self::BOLD_ITALIC.bits()
            | Self::PRE.bits()
            | Self::HTML.bits()
            | Self::HAVE_ARGS.bits()
            | Self::TABLE.bits();
    }
}

impl NodeKind {
    /// Returns the singleton [`KindSet`] for this kind.
    pub const fn set(self) -> KindSet {
        KindSet::from_bits_truncate(1 << self as u32)
    }

    /// Returns true if this kind is a member of `kinds`.
    #[inline]
    pub const fn is(self, kinds: KindSet) -> bool {
        kinds.contains(self.set())
    }

    /// The outline level of a section kind. The root counts as level 1 so
    /// that `==` headings always nest below it.
    pub const fn section_level(self) -> Option<u8> {
        Some(match self {
            NodeKind::Root => 1,
            NodeKind::Level2 => 2,
            NodeKind::Level3 => 3,
            NodeKind::Level4 => 4,
            NodeKind::Level5 => 5,
            NodeKind::Level6 => 6,
            _ => return None,
        })
    }

    /// The section kind for a heading delimiter of `level` equals signs.
    pub const fn from_section_level(level: u8) -> Option<NodeKind> {
        Some(match level {
            2 => NodeKind::Level2,
            3 => NodeKind::Level3,
            4 => NodeKind::Level4,
            5 => NodeKind::Level5,
            6 => NodeKind::Level6,
            _ => return None,
        })
    }
}

/// A child slot of a parse tree node: either a run of plain text or a
/// nested node.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum NodeChild {
    /// A run of plain text.
    Text(String),
    /// A nested node.
    Node(WikiNode),
}

impl NodeChild {
    /// The text of this child, if it is a text run.
    #[inline]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            NodeChild::Text(text) => Some(text),
            NodeChild::Node(_) => None,
        }
    }

    /// The node of this child, if it is a nested node.
    #[inline]
    pub fn as_node(&self) -> Option<&WikiNode> {
        match self {
            NodeChild::Text(_) => None,
            NodeChild::Node(node) => Some(node),
        }
    }
}

/// A node in the parse tree of a wikitext document.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct WikiNode {
    /// The kind of the node.
    pub kind: NodeKind,
    /// Ordered argument groups. Multi-part constructs (template arguments,
    /// link display text, heading titles, tag names) store each part as an
    /// ordered sequence of children.
    pub args: Vec<Vec<NodeChild>>,
    /// Ordered content for constructs without positional arguments. For
    /// kinds in [`KindSet::HAVE_ARGS`] any remaining children are promoted
    /// into a new argument group when the node is closed.
    pub children: Vec<NodeChild>,
    /// HTML-style attributes parsed from tags, tables, and table cells.
    pub attrs: IndexMap<String, String>,
    /// The definition part of a `;term : definition` list item.
    pub definition: Option<Vec<NodeChild>>,
    /// The source line the node started on, for diagnostics.
    pub loc: u32,
}

impl WikiNode {
    /// Creates an empty node of the given kind.
    pub fn new(kind: NodeKind, loc: u32) -> Self {
        Self {
            kind,
            args: Vec::new(),
            children: Vec::new(),
            attrs: IndexMap::new(),
            definition: None,
            loc,
        }
    }

    /// The first argument group as plain text, if it consists of exactly
    /// one text run. This is how tag names, list item prefixes, magic
    /// words, and constant template names are stored.
    pub fn first_arg_text(&self) -> Option<&str> {
        match self.args.first().map(Vec::as_slice) {
            Some([NodeChild::Text(text)]) => Some(text),
            _ => None,
        }
    }

    /// Sets the first argument group to a single text run.
    pub(crate) fn set_first_arg_text(&mut self, text: &str) {
        self.args.insert(0, vec![NodeChild::Text(text.into())]);
    }

    /// Moves the accumulated children into a new argument group.
    pub(crate) fn promote_children(&mut self) {
        let children = core::mem::take(&mut self.children);
        self.args.push(children);
    }
}
