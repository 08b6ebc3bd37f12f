//! Minimal element tree used to persist records.
//!
//! A [`Node`] has a name, ordered attributes, ordered child elements and a
//! text value. The record codecs only talk to this type; the XML syntax lives
//! in [`Node::parse`] and [`Node::to_xml`].

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use std::fmt::Display;
use std::io::Cursor;
use std::str;

use crate::error::{AuthError, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Node {
    name: String,
    attributes: Vec<(String, String)>,
    children: Vec<Node>,
    text: String,
}

impl Node {
    pub fn new(name: impl Into<String>) -> Self {
        Node {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn attributes(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attributes.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Sets an attribute, replacing an existing one of the same name in place.
    pub fn set_attribute(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.attributes.iter_mut().find(|(k, _)| *k == name) {
            Some(slot) => slot.1 = value,
            None => self.attributes.push((name, value)),
        }
    }

    pub fn elements(&self) -> impl Iterator<Item = &Node> {
        self.children.iter()
    }

    pub fn element(&self, name: &str) -> Option<&Node> {
        self.children.iter().find(|c| c.name == name)
    }

    /// False for an empty element such as `<record id="..."/>`.
    pub fn has_content(&self) -> bool {
        !self.children.is_empty() || !self.text.is_empty()
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn set_text(&mut self, text: impl Into<String>) {
        self.text = text.into();
    }

    pub fn read_string(&self) -> String {
        self.text.clone()
    }

    pub fn read_i64(&self) -> Result<i64> {
        self.text.trim().parse().map_err(|_| self.invalid())
    }

    pub fn read_u64(&self) -> Result<u64> {
        self.text.trim().parse().map_err(|_| self.invalid())
    }

    /// Accepts the XML schema boolean lexical forms.
    pub fn read_bool(&self) -> Result<bool> {
        match self.text.trim() {
            "true" | "1" => Ok(true),
            "false" | "0" => Ok(false),
            _ => Err(self.invalid()),
        }
    }

    fn invalid(&self) -> AuthError {
        AuthError::InvalidValue {
            element: self.name.clone(),
            value: self.text.clone(),
        }
    }

    pub fn push(&mut self, child: Node) -> &mut Node {
        self.children.push(child);
        let last = self.children.len() - 1;
        &mut self.children[last]
    }

    /// Appends `<name>value</name>`.
    pub fn push_value(&mut self, name: &str, value: impl Display) {
        let mut child = Node::new(name);
        child.text = value.to_string();
        self.children.push(child);
    }

    pub fn parse(xml: &str) -> Result<Node> {
        let mut reader = Reader::from_str(xml);
        let mut stack: Vec<Node> = Vec::new();
        let mut root: Option<Node> = None;

        loop {
            match reader.read_event() {
                Ok(Event::Start(ref e)) => stack.push(Node::from_start(e)?),
                Ok(Event::Empty(ref e)) => {
                    let node = Node::from_start(e)?;
                    attach(&mut stack, &mut root, node)?;
                }
                Ok(Event::End(_)) => {
                    let mut node = stack
                        .pop()
                        .ok_or_else(|| AuthError::Xml("unbalanced end tag".into()))?;
                    // indentation between child elements is not content
                    if !node.children.is_empty() && node.text.trim().is_empty() {
                        node.text.clear();
                    }
                    attach(&mut stack, &mut root, node)?;
                }
                Ok(Event::Text(ref t)) => {
                    if let Some(top) = stack.last_mut() {
                        top.text.push_str(&t.unescape()?);
                    }
                }
                Ok(Event::CData(ref c)) => {
                    if let Some(top) = stack.last_mut() {
                        let s = str::from_utf8(c.as_ref())
                            .map_err(|_| AuthError::Xml("invalid UTF-8 in CDATA".into()))?;
                        top.text.push_str(s);
                    }
                }
                Ok(Event::Eof) => break,
                Err(e) => {
                    return Err(AuthError::Xml(format!(
                        "XML error at position {}: {}",
                        reader.buffer_position(),
                        e
                    )));
                }
                _ => {}
            }
        }

        if !stack.is_empty() {
            return Err(AuthError::Xml("unexpected end of document".into()));
        }
        root.ok_or_else(|| AuthError::Xml("document has no root element".into()))
    }

    fn from_start(e: &BytesStart) -> Result<Node> {
        let name = str::from_utf8(e.name().as_ref())
            .map_err(|_| AuthError::Xml("invalid UTF-8 in tag name".into()))?
            .to_string();
        let mut node = Node::new(name);
        for attr in e.attributes() {
            let attr = attr?;
            let key = str::from_utf8(attr.key.as_ref())
                .map_err(|_| AuthError::Xml("invalid UTF-8 in attribute name".into()))?
                .to_string();
            let value = attr.unescape_value()?.into_owned();
            node.attributes.push((key, value));
        }
        Ok(node)
    }

    pub fn to_xml(&self) -> Result<String> {
        let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);
        self.write(&mut writer)?;
        String::from_utf8(writer.into_inner().into_inner())
            .map_err(|e| AuthError::Xml(e.to_string()))
    }

    fn write<W: std::io::Write>(&self, writer: &mut Writer<W>) -> Result<()> {
        let mut start = BytesStart::new(self.name.as_str());
        for (k, v) in &self.attributes {
            start.push_attribute((k.as_str(), v.as_str()));
        }

        if !self.has_content() {
            writer
                .write_event(Event::Empty(start))
                .map_err(|e| AuthError::Xml(e.to_string()))?;
            return Ok(());
        }

        writer
            .write_event(Event::Start(start))
            .map_err(|e| AuthError::Xml(e.to_string()))?;
        if !self.text.is_empty() {
            writer
                .write_event(Event::Text(BytesText::new(&self.text)))
                .map_err(|e| AuthError::Xml(e.to_string()))?;
        }
        for child in &self.children {
            child.write(writer)?;
        }
        writer
            .write_event(Event::End(BytesEnd::new(self.name.as_str())))
            .map_err(|e| AuthError::Xml(e.to_string()))?;
        Ok(())
    }
}

fn attach(stack: &mut [Node], root: &mut Option<Node>, node: Node) -> Result<()> {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(node);
        return Ok(());
    }
    if root.is_some() {
        return Err(AuthError::Xml("more than one root element".into()));
    }
    *root = Some(node);
    Ok(())
}
