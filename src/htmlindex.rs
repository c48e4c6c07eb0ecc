use std::collections::{BTreeMap, HashMap};

use kuchikiki::{NodeData, NodeRef};
use url::Url;

use crate::css;

pub const A_TAG: &str = "a";
pub const BODY_TAG: &str = "body";
pub const IMG_TAG: &str = "img";
pub const LINK_TAG: &str = "link";
pub const SCRIPT_TAG: &str = "script";
pub const STYLE_TAG: &str = "style";

pub const BACKGROUND_ATTRIBUTE: &str = "background";
pub const HREF_ATTRIBUTE: &str = "href";
pub const SRC_ATTRIBUTE: &str = "src";
pub const DATA_SRC_ATTRIBUTE: &str = "data-src";
pub const SRCSET_ATTRIBUTE: &str = "srcset";
pub const DATA_SRCSET_ATTRIBUTE: &str = "data-srcset";
pub const STYLE_ATTRIBUTE: &str = "style";

/// Attributes holding srcset lists rather than a single URL.
pub const SRCSET_ATTRIBUTES: &[&str] = &[SRCSET_ATTRIBUTE, DATA_SRCSET_ATTRIBUTE];

/// An HTML tag whose attributes can carry URLs.
pub struct TagConfig {
    pub attributes: &'static [&'static str],
    descend: bool,
}

static A_CONFIG: TagConfig = TagConfig {
    attributes: &[HREF_ATTRIBUTE, STYLE_ATTRIBUTE],
    descend: true,
};
static BODY_CONFIG: TagConfig = TagConfig {
    attributes: &[BACKGROUND_ATTRIBUTE, STYLE_ATTRIBUTE],
    descend: true,
};
static IMG_CONFIG: TagConfig = TagConfig {
    attributes: &[
        SRC_ATTRIBUTE,
        DATA_SRC_ATTRIBUTE,
        SRCSET_ATTRIBUTE,
        DATA_SRCSET_ATTRIBUTE,
        STYLE_ATTRIBUTE,
    ],
    descend: true,
};
static LINK_CONFIG: TagConfig = TagConfig {
    attributes: &[HREF_ATTRIBUTE, STYLE_ATTRIBUTE],
    descend: true,
};
static SCRIPT_CONFIG: TagConfig = TagConfig {
    attributes: &[SRC_ATTRIBUTE, STYLE_ATTRIBUTE],
    descend: true,
};
// the element body is CSS, not markup
static STYLE_CONFIG: TagConfig = TagConfig {
    attributes: &[],
    descend: false,
};

pub fn tag_config(tag: &str) -> Option<&'static TagConfig> {
    match tag {
        A_TAG => Some(&A_CONFIG),
        BODY_TAG => Some(&BODY_CONFIG),
        IMG_TAG => Some(&IMG_CONFIG),
        LINK_TAG => Some(&LINK_CONFIG),
        SCRIPT_TAG => Some(&SCRIPT_CONFIG),
        STYLE_TAG => Some(&STYLE_CONFIG),
        _ => None,
    }
}

/// Per-page index of URL references: tag name → absolute URL → the nodes
/// carrying that reference. CSS references from `style` attributes and
/// `<style>` bodies are recorded under the `style` tag so they are never
/// mistaken for hyperlinks.
#[derive(Default)]
pub struct Index {
    data: HashMap<String, BTreeMap<String, Vec<NodeRef>>>,
}

impl Index {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index every recognized element below `node`, resolving each
    /// reference against `base`.
    pub fn index(&mut self, base: &Url, node: &NodeRef) {
        for child in node.children() {
            let NodeData::Element(element) = child.data() else {
                continue;
            };
            let tag = element.name.local.to_string();
            let Some(config) = tag_config(&tag) else {
                self.index(base, &child);
                continue;
            };

            let mut references = Vec::new();
            let mut style_references = Vec::new();
            {
                let attributes = element.attributes.borrow();
                for &attribute in config.attributes {
                    let Some(value) = attributes.get(attribute) else {
                        continue;
                    };
                    let value = value.trim();
                    if value.is_empty() {
                        continue;
                    }
                    if attribute == STYLE_ATTRIBUTE {
                        style_references
                            .extend(css::extract_urls(base, value).iter().map(Url::to_string));
                    } else if SRCSET_ATTRIBUTES.contains(&attribute) {
                        for candidate in split_srcset(value) {
                            if let Ok(resolved) = base.join(candidate) {
                                references.push(resolved.to_string());
                            }
                        }
                    } else if let Ok(resolved) = base.join(value) {
                        references.push(resolved.to_string());
                    }
                }
            }
            if tag == STYLE_TAG {
                let css_text = text_content(&child);
                if !css_text.is_empty() {
                    style_references
                        .extend(css::extract_urls(base, &css_text).iter().map(Url::to_string));
                }
            }

            for reference in references {
                self.data
                    .entry(tag.clone())
                    .or_default()
                    .entry(reference)
                    .or_default()
                    .push(child.clone());
            }
            for reference in style_references {
                self.data
                    .entry(STYLE_TAG.to_string())
                    .or_default()
                    .entry(reference)
                    .or_default()
                    .push(child.clone());
            }

            if config.descend {
                self.index(base, &child);
            }
        }
    }

    /// All resolved URLs recorded for `tag`, in sorted order.
    pub fn urls(&self, tag: &str) -> Vec<Url> {
        match self.data.get(tag) {
            Some(map) => map.keys().filter_map(|key| Url::parse(key).ok()).collect(),
            None => Vec::new(),
        }
    }

    /// The URL → nodes map for `tag`.
    pub fn nodes(&self, tag: &str) -> Option<&BTreeMap<String, Vec<NodeRef>>> {
        self.data.get(tag)
    }

    /// Every recorded tag with its URL → nodes map.
    pub fn tags(&self) -> impl Iterator<Item = (&str, &BTreeMap<String, Vec<NodeRef>>)> {
        self.data.iter().map(|(tag, map)| (tag.as_str(), map))
    }
}

fn split_srcset(value: &str) -> impl Iterator<Item = &str> {
    value.split(',').filter_map(|candidate| {
        let candidate = candidate.trim();
        if candidate.is_empty() {
            return None;
        }
        // drop the width or density descriptor after the URL
        candidate.split(char::is_whitespace).next()
    })
}

/// Concatenated text of the node's direct text children.
pub fn text_content(node: &NodeRef) -> String {
    let mut out = String::new();
    for child in node.children() {
        if let NodeData::Text(text) = child.data() {
            out.push_str(&text.borrow());
        }
    }
    out
}
