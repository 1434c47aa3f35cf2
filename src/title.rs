//! Namespaces and page title helpers.
//!
//! The namespace table is the standard MediaWiki set. It backs the title
//! metafunctions (`NAMESPACE`, `PAGENAME`, `ns:`) and template title
//! canonicalisation.

/// An article namespace.
#[derive(Debug, Eq)]
pub struct Namespace {
    /// The namespace ID.
    pub id: i32,
    /// The display name of the namespace. Empty for the main namespace.
    pub name: &'static str,
    /// The canonical name, where it differs from the display name.
    pub canonical: &'static str,
    /// Named aliases for the namespace.
    pub aliases: &'static [&'static str],
}

impl PartialEq for Namespace {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

/// Shorthand for namespace table rows.
macro_rules! ns {
    ($id:expr, $name:expr) => {
        ns!($id, $name, $name, &[])
    };
    ($id:expr, $name:expr, $canonical:expr) => {
        ns!($id, $name, $canonical, &[])
    };
    ($id:expr, $name:expr, $canonical:expr, $aliases:expr) => {
        Namespace {
            id: $id,
            name: $name,
            canonical: $canonical,
            aliases: $aliases,
        }
    };
}

/// The namespace table.
pub static NAMESPACES: &[Namespace] = &[
    ns!(-2, "Media"),
    ns!(-1, "Special"),
    ns!(0, "", "", &[":"]),
    ns!(1, "Talk"),
    ns!(2, "User"),
    ns!(3, "User talk"),
    ns!(4, "Project", "Project", &["WP"]),
    ns!(5, "Project talk"),
    ns!(6, "File", "File", &["Image"]),
    ns!(7, "File talk", "File talk", &["Image talk"]),
    ns!(8, "MediaWiki"),
    ns!(9, "MediaWiki talk"),
    ns!(10, "Template", "Template", &["T"]),
    ns!(11, "Template talk"),
    ns!(12, "Help"),
    ns!(13, "Help talk"),
    ns!(14, "Category", "Category", &["CAT"]),
    ns!(15, "Category talk"),
    ns!(828, "Module"),
    ns!(829, "Module talk"),
];

impl Namespace {
    /// The main namespace ID.
    pub const MAIN: i32 = 0;
    /// The template namespace ID.
    pub const TEMPLATE: i32 = 10;
    /// The module namespace ID.
    pub const MODULE: i32 = 828;

    /// Finds a namespace by ID.
    pub fn by_id(id: i32) -> Option<&'static Namespace> {
        NAMESPACES.iter().find(|ns| ns.id == id)
    }

    /// Finds a namespace by display name, canonical name, or alias.
    /// Matching is case-insensitive and treats underscores as spaces.
    pub fn by_name(name: &str) -> Option<&'static Namespace> {
        let name = name.trim().replace('_', " ");
        NAMESPACES.iter().find(|ns| {
            unicase::eq(ns.name, name.as_str())
                || unicase::eq(ns.canonical, name.as_str())
                || ns.aliases.iter().any(|alias| unicase::eq(*alias, name.as_str()))
        })
    }

    /// The ID of this namespace's talk namespace (itself for talk
    /// namespaces).
    pub const fn talk_id(&self) -> i32 {
        if self.is_talk() { self.id } else { self.id + 1 }
    }

    /// Returns true if this is a talk namespace.
    pub const fn is_talk(&self) -> bool {
        self.id > Self::MAIN && self.id % 2 == 1
    }
}

/// Splits a title into its namespace and the remaining page name. Titles
/// with no recognized namespace prefix are in the main namespace.
pub fn split_namespace(title: &str) -> (&'static Namespace, &str) {
    if let Some((prefix, rest)) = title.split_once(':')
        && let Some(ns) = Namespace::by_name(prefix)
        && ns.id != Namespace::MAIN
    {
        return (ns, rest.trim_start());
    }
    (Namespace::by_id(Namespace::MAIN).unwrap(), title)
}

/// Returns true if `title` carries any recognized namespace prefix.
pub fn has_namespace_prefix(title: &str) -> bool {
    split_namespace(title).0.id != Namespace::MAIN
}

/// The full page name, namespace included.
pub fn full_page_name(title: &str) -> String {
    let (ns, rest) = split_namespace(title);
    if ns.id == Namespace::MAIN {
        rest.trim().to_string()
    } else {
        format!("{}:{}", ns.name, rest.trim())
    }
}

/// The page name without its namespace prefix.
pub fn page_name(title: &str) -> String {
    split_namespace(title).1.trim().to_string()
}

/// The final subpage component of the page name.
pub fn sub_page_name(title: &str) -> String {
    let name = page_name(title);
    name.rsplit_once('/')
        .map_or(name.clone(), |(_, sub)| sub.to_string())
}

/// The namespace name of a title. Empty for the main namespace.
pub fn namespace_name(title: &str) -> &'static str {
    split_namespace(title).0.name
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_by_name_and_alias() {
        assert_eq!(Namespace::by_name("template").unwrap().id, 10);
        assert_eq!(Namespace::by_name("Image").unwrap().id, 6);
        assert_eq!(Namespace::by_name("user_talk").unwrap().id, 3);
        assert!(Namespace::by_name("nonsense").is_none());
    }

    #[test]
    fn split_titles() {
        assert_eq!(split_namespace("Template:Foo").0.id, 10);
        assert_eq!(split_namespace("Template:Foo").1, "Foo");
        assert_eq!(split_namespace("No namespace here").0.id, 0);
        assert_eq!(split_namespace("Weird:Title").0.id, 0);
    }

    #[test]
    fn page_name_helpers() {
        assert_eq!(full_page_name("template:foo"), "Template:foo");
        assert_eq!(page_name("Template:Foo/doc"), "Foo/doc");
        assert_eq!(sub_page_name("Template:Foo/doc"), "doc");
        assert_eq!(sub_page_name("Plain"), "Plain");
        assert_eq!(namespace_name("Help:X"), "Help");
        assert_eq!(namespace_name("X"), "");
    }

    #[test]
    fn talk_pairing() {
        let user = Namespace::by_id(2).unwrap();
        assert!(!user.is_talk());
        assert_eq!(user.talk_id(), 3);
        assert!(Namespace::by_id(3).unwrap().is_talk());
    }
}
