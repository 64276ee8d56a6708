pub mod extract;
pub mod table;

use scraper::node::Node;
use scraper::{Html, Selector};

pub use table::Table;

/// A fetched page plus any markup the site ships inside HTML comments.
///
/// baseball-reference renders most secondary tables as `<!-- <div><table ...> -->`
/// and un-comments them client side, so every lookup walks both.
pub struct Document {
    root: Html,
    embedded: Vec<Html>,
}

impl Document {
    pub fn parse(html: &str) -> Document {
        let root = Html::parse_document(html);
        let embedded = root
            .tree
            .root()
            .descendants()
            .filter_map(|node| match node.value() {
                Node::Comment(c) if holds_markup(node.value()) => Some(Html::parse_fragment(c)),
                _ => None,
            })
            .collect();
        Document { root, embedded }
    }

    /// The page itself first, then comment-embedded fragments in document order.
    pub fn fragments(&self) -> impl Iterator<Item = &Html> {
        std::iter::once(&self.root).chain(self.embedded.iter())
    }
}

/// Comments that carry markup are parsed into `embedded`, in tree order.
fn holds_markup(node: &Node) -> bool {
    matches!(node, Node::Comment(c) if c.contains('<'))
}

pub(crate) fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("static CSS selector")
}

/// Trim and fold non-breaking spaces so table cells and anchor text compare equal.
pub fn clean_text(raw: &str) -> String {
    raw.replace('\u{a0}', " ").trim().to_string()
}
