use std::collections::HashSet;
use std::rc::Rc;

use kuchikiki::{NodeData, NodeRef};
use tracing::{debug, warn};
use url::Url;

use crate::css;
use crate::htmlindex::{self, Index, A_TAG, SRCSET_ATTRIBUTES, STYLE_ATTRIBUTE, STYLE_TAG};
use crate::urls;

/// Attribute values the rewriter must never touch.
const IGNORED_PREFIXES: &[&str] = &["#", "/#", "data:", "mailto:"];

/// Rewrite every indexed reference of the document to its local-relative
/// form. Returns the re-serialized document when anything changed.
pub fn rewrite_document(
    document: &NodeRef,
    index: &Index,
    base: &Url,
    main_host: &str,
) -> Option<Vec<u8>> {
    let relative_to_root = urls::relative_to_root(base);
    let mut seen = HashSet::new();
    let mut changed = false;

    for (_, nodes_by_url) in index.tags() {
        for nodes in nodes_by_url.values() {
            for node in nodes {
                if !seen.insert(Rc::as_ptr(&node.0) as usize) {
                    continue;
                }
                changed |= rewrite_node(node, base, main_host, &relative_to_root);
            }
        }
    }
    if !changed {
        return None;
    }

    let mut out = Vec::new();
    if let Err(err) = document.serialize(&mut out) {
        warn!(%base, %err, "serializing the rewritten document failed");
        return None;
    }
    Some(out)
}

fn rewrite_node(node: &NodeRef, base: &Url, main_host: &str, relative_to_root: &str) -> bool {
    let NodeData::Element(element) = node.data() else {
        return false;
    };
    let tag = element.name.local.to_string();
    let mut changed = false;

    if let Some(config) = htmlindex::tag_config(&tag) {
        let mut attributes = element.attributes.borrow_mut();
        for &attribute in config.attributes {
            let Some(value) = attributes.get(attribute).map(str::to_string) else {
                continue;
            };
            let trimmed = value.trim();
            if trimmed.is_empty()
                || IGNORED_PREFIXES
                    .iter()
                    .any(|prefix| trimmed.starts_with(prefix))
            {
                continue;
            }

            let resolved = if attribute == STYLE_ATTRIBUTE {
                let mut discovered = Vec::new();
                css::rewrite(base, main_host, trimmed, &mut discovered)
            } else if SRCSET_ATTRIBUTES.contains(&attribute) {
                Some(urls::resolve_srcset(
                    base,
                    trimmed,
                    main_host,
                    tag == A_TAG,
                    relative_to_root,
                ))
            } else {
                urls::resolve_reference(base, trimmed, main_host, tag == A_TAG, relative_to_root)
            };
            let Some(resolved) = resolved else {
                continue;
            };
            if resolved != value {
                debug!(tag = %tag, attribute, from = %value, to = %resolved, "relinked reference");
                if let Some(slot) = attributes.get_mut(attribute) {
                    *slot = resolved;
                    changed = true;
                }
            }
        }
    }

    if tag == STYLE_TAG {
        changed |= rewrite_style_element(node, base, main_host);
    }
    changed
}

/// Run the CSS pass over a `<style>` element's text.
fn rewrite_style_element(node: &NodeRef, base: &Url, main_host: &str) -> bool {
    let css_text = htmlindex::text_content(node);
    if css_text.is_empty() {
        return false;
    }
    let mut discovered = Vec::new();
    let Some(rewritten) = css::rewrite(base, main_host, &css_text, &mut discovered) else {
        return false;
    };

    let children: Vec<NodeRef> = node.children().collect();
    for child in children {
        child.detach();
    }
    node.append(NodeRef::new_text(rewritten));
    true
}
