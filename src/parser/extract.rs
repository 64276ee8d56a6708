use regex::Regex;
use scraper::node::Node;
use scraper::ElementRef;

use super::{clean_text, holds_markup, selector, Document, Table};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub text: String,
    pub href: String,
}

/// Anchors whose href matches `pattern`, in document order.
pub fn find_links(doc: &Document, pattern: &Regex) -> Vec<Link> {
    all_links(doc)
        .into_iter()
        .filter(|l| pattern.is_match(&l.href))
        .collect()
}

/// First anchor whose visible text matches `pattern`.
pub fn find_link_by_text(doc: &Document, pattern: &Regex) -> Option<Link> {
    all_links(doc).into_iter().find(|l| pattern.is_match(&l.text))
}

pub fn find_table_by_id(doc: &Document, id: &str) -> Option<Table> {
    let sel = selector("table");
    doc.fragments().find_map(|html| {
        html.select(&sel)
            .find(|t| t.value().id() == Some(id))
            .map(Table::from_element)
    })
}

/// First table on the page, for layouts that give the table no stable id.
pub fn first_table(doc: &Document) -> Option<Table> {
    let sel = selector("table");
    doc.fragments()
        .find_map(|html| html.select(&sel).next().map(Table::from_element))
}

/// Text of the first text node matching `pattern`; falls back to whole
/// paragraphs for markers split across inline tags.
pub fn find_text_matching(doc: &Document, pattern: &Regex) -> Option<String> {
    let in_node = doc.fragments().find_map(|html| {
        html.tree.values().find_map(|node| match node {
            Node::Text(t) if pattern.is_match(t) => Some(clean_text(t)),
            _ => None,
        })
    });
    if in_node.is_some() {
        return in_node;
    }

    let para = selector("p");
    doc.fragments().find_map(|html| {
        html.select(&para)
            .map(|p| clean_text(&p.text().collect::<String>()))
            .find(|text| pattern.is_match(text))
    })
}

/// Anchors in true document order: a comment's anchors sit where the comment
/// does, between the page anchors around it.
fn all_links(doc: &Document) -> Vec<Link> {
    let anchor = selector("a[href]");
    let mut embedded = doc.embedded.iter();
    let mut links = Vec::new();
    for node in doc.root.tree.root().descendants() {
        if let Some(el) = ElementRef::wrap(node) {
            if el.value().name() == "a" {
                links.extend(to_link(el));
            }
        } else if holds_markup(node.value()) {
            if let Some(html) = embedded.next() {
                links.extend(html.select(&anchor).filter_map(to_link));
            }
        }
    }
    links
}

fn to_link(a: ElementRef) -> Option<Link> {
    let href = a.value().attr("href")?.trim();
    if href.is_empty() {
        return None;
    }
    Some(Link {
        text: clean_text(&a.text().collect::<String>()),
        href: href.to_string(),
    })
}
