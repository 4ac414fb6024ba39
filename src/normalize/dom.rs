use kuchikikiki::iter::NodeIterator;
use kuchikikiki::traits::TendrilSink;
use kuchikikiki::NodeRef;

/// Parse a document or fragment. Fragments are wrapped in html/head/body.
pub fn parse(html: &str) -> NodeRef {
    kuchikikiki::parse_html().one(html)
}

/// All elements matching `selector`, in document order.
pub fn select_all(root: &NodeRef, selector: &str) -> Vec<NodeRef> {
    root.select(selector)
        .into_iter()
        .flatten()
        .map(|el| el.as_node().clone())
        .collect()
}

fn body(doc: &NodeRef) -> Option<NodeRef> {
    doc.select_first("body").ok().map(|b| b.as_node().clone())
}

/// Serialize the children of `<body>`, dropping the synthetic document wrapper.
pub fn body_html(doc: &NodeRef) -> String {
    match body(doc) {
        Some(body) => body.children().map(|c| c.to_string()).collect(),
        None => String::new(),
    }
}

pub fn tag_name(node: &NodeRef) -> Option<String> {
    node.as_element().map(|el| el.name.local.to_string())
}

pub fn attr(node: &NodeRef, name: &str) -> Option<String> {
    let el = node.as_element()?;
    let attrs = el.attributes.borrow();
    attrs.get(name).map(str::to_string)
}

pub fn set_attr(node: &NodeRef, name: &str, value: String) {
    if let Some(el) = node.as_element() {
        el.attributes.borrow_mut().insert(name, value);
    }
}

/// Text of every descendant text node, trimmed and joined with single spaces.
pub fn visible_text(node: &NodeRef) -> String {
    let text = node
        .descendants()
        .text_nodes()
        .map(|t| t.borrow().clone())
        .collect::<Vec<_>>()
        .join(" ");
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Replace all children of `node` with a single text node.
pub fn set_text(node: &NodeRef, text: &str) {
    for child in node.children().collect::<Vec<_>>() {
        child.detach();
    }
    node.append(NodeRef::new_text(text));
}

/// False once `node` or one of its ancestors has been detached from `root`.
pub fn is_attached(node: &NodeRef, root: &NodeRef) -> bool {
    node.ancestors().any(|a| a == *root)
}

/// Swap `node` for an element named `tag`, keeping attributes and children.
pub fn rename(node: &NodeRef, tag: &str) -> Option<NodeRef> {
    let fresh = fresh_element(tag)?;
    if let (Some(old), Some(new)) = (node.as_element(), fresh.as_element()) {
        new.attributes.borrow_mut().map = old.attributes.borrow().map.clone();
    }
    for child in node.children().collect::<Vec<_>>() {
        fresh.append(child);
    }
    node.insert_before(fresh.clone());
    node.detach();
    Some(fresh)
}

fn fresh_element(tag: &str) -> Option<NodeRef> {
    let doc = parse(&format!("<{tag}></{tag}>"));
    let node = doc.select_first(tag).ok()?.as_node().clone();
    node.detach();
    Some(node)
}

pub fn escape_html(input: &str, quote: bool) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' if quote => out.push_str("&quot;"),
            '\'' if quote => out.push_str("&#x27;"),
            _ => out.push(ch),
        }
    }
    out
}
