//! A small element tree for the OLX dialect.
//!
//! Generators build [`Element`] values and serialise them with
//! [`Element::to_xml`], which escapes every attribute value and text node.
//! [`parse_document`] is the reverse: a single pass over `quick-xml` events
//! that tolerates unclosed or mismatched tags and undecodable entities, keeping
//! whatever structure it could recover.

use std::borrow::Cow;

use quick_xml::Reader;
use quick_xml::escape::{escape, unescape};
use quick_xml::events::{BytesStart, Event};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XmlNode {
    Element(Element),
    Text(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Element {
    pub name: String,
    /// Attributes in document order.
    pub attributes: Vec<(String, String)>,
    pub children: Vec<XmlNode>,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((key.into(), value.into()));
        self
    }

    /// Adds the attribute only when `value` is non-empty.
    pub fn attr_opt(self, key: impl Into<String>, value: &str) -> Self {
        if value.is_empty() {
            self
        } else {
            self.attr(key, value)
        }
    }

    pub fn child(mut self, child: Element) -> Self {
        self.children.push(XmlNode::Element(child));
        self
    }

    pub fn children(mut self, children: impl IntoIterator<Item = Element>) -> Self {
        self.children
            .extend(children.into_iter().map(XmlNode::Element));
        self
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.children.push(XmlNode::Text(text.into()));
        self
    }

    pub fn get_attr(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }

    /// Direct child elements.
    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|node| match node {
            XmlNode::Element(element) => Some(element),
            XmlNode::Text(_) => None,
        })
    }

    /// First direct child element called `name`.
    pub fn first_child(&self, name: &str) -> Option<&Element> {
        self.elements().find(|element| element.name == name)
    }

    /// First element called `name` in document order, searching below `self`.
    pub fn find(&self, name: &str) -> Option<&Element> {
        for element in self.elements() {
            if element.name == name {
                return Some(element);
            }
            if let Some(found) = element.find(name) {
                return Some(found);
            }
        }
        None
    }

    /// Every element called `name` below `self`, in document order. Matches
    /// are not searched for nested matches.
    pub fn find_all(&self, name: &str) -> Vec<&Element> {
        let mut found = Vec::new();
        self.collect_named(name, &mut found);
        found
    }

    fn collect_named<'a>(&'a self, name: &str, found: &mut Vec<&'a Element>) {
        for element in self.elements() {
            if element.name == name {
                found.push(element);
            } else {
                element.collect_named(name, found);
            }
        }
    }

    /// Concatenated text of all descendants, tags stripped.
    pub fn text_content(&self) -> String {
        self.text_excluding(&[])
    }

    /// Like [`text_content`](Self::text_content) but skips subtrees rooted at
    /// elements named in `skip`.
    pub fn text_excluding(&self, skip: &[&str]) -> String {
        let mut out = String::new();
        self.write_text(skip, &mut out);
        out
    }

    fn write_text(&self, skip: &[&str], out: &mut String) {
        for node in &self.children {
            match node {
                XmlNode::Text(text) => out.push_str(text),
                XmlNode::Element(element) if !skip.contains(&element.name.as_str()) => {
                    element.write_text(skip, out)
                }
                XmlNode::Element(_) => {}
            }
        }
    }

    /// Serialises the element. Element-only content is indented two spaces
    /// per level; mixed content stays on one line.
    pub fn to_xml(&self) -> String {
        let mut out = String::new();
        self.write_xml(0, &mut out);
        out.push('\n');
        out
    }

    fn write_xml(&self, depth: usize, out: &mut String) {
        out.push('<');
        out.push_str(&self.name);
        for (key, value) in &self.attributes {
            out.push(' ');
            out.push_str(key);
            out.push_str("=\"");
            out.push_str(&escape(value.as_str()));
            out.push('"');
        }
        if self.children.is_empty() {
            out.push_str("/>");
            return;
        }
        out.push('>');

        let mixed = self
            .children
            .iter()
            .any(|node| matches!(node, XmlNode::Text(_)));
        for node in &self.children {
            match node {
                XmlNode::Text(text) => out.push_str(&escape(text.as_str())),
                XmlNode::Element(element) if mixed => element.write_xml(depth + 1, out),
                XmlNode::Element(element) => {
                    out.push('\n');
                    push_indent(depth + 1, out);
                    element.write_xml(depth + 1, out);
                }
            }
        }
        if !mixed {
            out.push('\n');
            push_indent(depth, out);
        }
        out.push_str("</");
        out.push_str(&self.name);
        out.push('>');
    }
}

fn push_indent(depth: usize, out: &mut String) {
    for _ in 0..depth {
        out.push_str("  ");
    }
}

/// Parses the first root element of `xml`.
///
/// Returns `None` only when no element could be recovered at all. End tags
/// that close an outer element also close everything opened inside it; stray
/// end tags are ignored; anything still open at the end of input is closed.
pub fn parse_document(xml: &str) -> Option<Element> {
    let mut reader = Reader::from_str(xml);
    reader.check_end_names(false);

    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(start)) => stack.push(element_from(&start)),
            Ok(Event::Empty(start)) => {
                attach(&mut stack, &mut root, element_from(&start));
            }
            Ok(Event::End(end)) => {
                let name = String::from_utf8_lossy(end.name().as_ref()).into_owned();
                if let Some(position) = stack.iter().rposition(|open| open.name == name) {
                    while stack.len() > position {
                        if let Some(closed) = stack.pop() {
                            attach(&mut stack, &mut root, closed);
                        }
                    }
                }
            }
            Ok(Event::Text(text)) => {
                let decoded = text.unescape().unwrap_or_else(|_| {
                    Cow::Owned(String::from_utf8_lossy(&text).into_owned())
                });
                push_text(&mut stack, &decoded);
            }
            Ok(Event::CData(data)) => {
                let inner = data.into_inner();
                push_text(&mut stack, &String::from_utf8_lossy(&inner));
            }
            Ok(Event::Eof) => break,
            Err(_) => break,
            Ok(_) => {}
        }
        if root.is_some() && stack.is_empty() {
            break;
        }
    }

    while let Some(closed) = stack.pop() {
        attach(&mut stack, &mut root, closed);
    }
    root
}

fn element_from(start: &BytesStart<'_>) -> Element {
    let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    let attributes = start
        .attributes()
        .flatten()
        .map(|attribute| {
            let key = String::from_utf8_lossy(attribute.key.as_ref()).into_owned();
            let value = match attribute.unescape_value() {
                Ok(value) => value.into_owned(),
                Err(_) => String::from_utf8_lossy(&attribute.value).into_owned(),
            };
            (key, value)
        })
        .collect();
    Element {
        name,
        attributes,
        children: Vec::new(),
    }
}

fn attach(stack: &mut [Element], root: &mut Option<Element>, element: Element) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(XmlNode::Element(element)),
        None => {
            if root.is_none() {
                *root = Some(element);
            }
        }
    }
}

fn push_text(stack: &mut [Element], text: &str) {
    if text.trim().is_empty() {
        return;
    }
    if let Some(parent) = stack.last_mut() {
        parent.children.push(XmlNode::Text(text.to_string()));
    }
}

/// Decodes XML/HTML entities, returning the input unchanged if it contains
/// an entity `quick-xml` does not know.
pub fn decode_entities(value: &str) -> Cow<'_, str> {
    unescape(value).unwrap_or(Cow::Borrowed(value))
}

/// Collapses runs of whitespace into single spaces and trims the ends.
pub fn collapse_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializer_escapes_attributes_and_text() {
        let element = Element::new("problem")
            .attr("display_name", "Q&A \"quoted\" <it's>")
            .child(Element::new("label").text("1 < 2 & 3 > 2"));
        let xml = element.to_xml();

        assert_eq!(
            xml,
            "<problem display_name=\"Q&amp;A &quot;quoted&quot; &lt;it&apos;s&gt;\">\n  <label>1 &lt; 2 &amp; 3 &gt; 2</label>\n</problem>\n"
        );
    }

    #[test]
    fn serialized_tree_parses_back() {
        let element = Element::new("vertical")
            .attr("display_name", "Unit & Co")
            .child(Element::new("html").attr("url_name", "intro"))
            .child(
                Element::new("choice")
                    .attr("correct", "true")
                    .text("Yes ")
                    .child(Element::new("choicehint").text("<right>")),
            );
        let parsed = parse_document(&element.to_xml()).expect("parsed");

        assert_eq!(parsed, element);
    }

    #[test]
    fn scanner_recovers_from_unclosed_and_stray_tags() {
        let parsed = parse_document("<a x='1'><b>text</c><d/></b><e>tail").expect("parsed");

        assert_eq!(parsed.name, "a");
        assert_eq!(parsed.get_attr("x"), Some("1"));
        let b = parsed.first_child("b").expect("b");
        assert_eq!(b.text_content(), "text");
        assert!(b.first_child("d").is_some());
        assert_eq!(parsed.first_child("e").expect("e").text_content(), "tail");
    }

    #[test]
    fn unknown_entities_are_kept_verbatim() {
        let parsed = parse_document("<p>caf&eacute; &amp; bar</p>").expect("parsed");
        assert_eq!(parsed.text_content(), "caf&eacute; &amp; bar");
    }

    #[test]
    fn text_excluding_skips_named_subtrees() {
        let parsed =
            parse_document("<choice correct=\"false\">Paris <choicehint>Not quite</choicehint></choice>")
                .expect("parsed");
        assert_eq!(collapse_whitespace(&parsed.text_excluding(&["choicehint"])), "Paris");
        assert_eq!(parsed.find("choicehint").expect("hint").text_content(), "Not quite");
    }

    #[test]
    fn garbage_yields_none() {
        assert!(parse_document("no markup here").is_none());
    }
}
