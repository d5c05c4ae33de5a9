//! Parsed configuration documents
//!
//! A [`ConfigDocument`] is an arena-backed, read-only element tree. Every
//! element and attribute remembers where it came from in the source text so
//! diagnostics can be anchored at user-visible positions.

use std::path::Path;

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use serde::{Deserialize, Serialize};

use crate::error::{DocumentError, DocumentResult};

/// Handle to an element inside one [`ConfigDocument`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ElementId(usize);

impl ElementId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Location of a node in the source text (1-based line and column)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Span {
    pub offset: usize,
    pub length: usize,
    pub line: u32,
    pub column: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub name: String,
    pub value: String,
    /// Span of the attribute name
    pub name_span: Span,
    /// Span of the attribute value, excluding quotes
    pub value_span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub name: String,
    pub attributes: Vec<Attribute>,
    pub children: Vec<ElementId>,
    pub parent: Option<ElementId>,
    text: Option<String>,
    /// Span of the element name in its start tag
    pub span: Span,
}

impl Element {
    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    pub fn attribute_value(&self, name: &str) -> Option<&str> {
        self.attribute(name).map(|a| a.value.as_str())
    }

    /// Trimmed text content, `None` when the element carries no text
    pub fn text(&self) -> Option<&str> {
        self.text
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }
}

/// An ordered element tree loaded from one configuration file
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigDocument {
    elements: Vec<Element>,
    root: ElementId,
}

impl ConfigDocument {
    /// Parse a document from XML text
    pub fn parse(content: &str) -> DocumentResult<Self> {
        DocumentParser::new(content).parse()
    }

    /// Read and parse a document from disk
    pub fn load(path: &Path) -> std::result::Result<Self, LoadError> {
        let content = std::fs::read_to_string(path).map_err(LoadError::Io)?;
        Self::parse(&content).map_err(LoadError::Document)
    }

    pub fn root(&self) -> ElementId {
        self.root
    }

    pub fn element(&self, id: ElementId) -> &Element {
        &self.elements[id.0]
    }

    pub fn children(&self, id: ElementId) -> impl Iterator<Item = ElementId> + '_ {
        self.elements[id.0].children.iter().copied()
    }

    /// Child elements of `id` with the given name
    pub fn children_named<'a>(
        &'a self,
        id: ElementId,
        name: &'a str,
    ) -> impl Iterator<Item = ElementId> + 'a {
        self.children(id)
            .filter(move |child| self.element(*child).name == name)
    }

    pub fn parent(&self, id: ElementId) -> Option<ElementId> {
        self.elements[id.0].parent
    }

    /// All elements in document order, root first
    pub fn descendants(&self) -> impl Iterator<Item = ElementId> + '_ {
        let mut stack = vec![self.root];
        std::iter::from_fn(move || {
            let next = stack.pop()?;
            stack.extend(self.elements[next.0].children.iter().rev().copied());
            Some(next)
        })
    }

    /// XPath-like locator such as `/server/featureManager[1]/feature[2]`
    pub fn locator(&self, id: ElementId) -> String {
        let mut segments = Vec::new();
        let mut current = Some(id);
        while let Some(node) = current {
            let element = self.element(node);
            let segment = match element.parent {
                Some(parent) => {
                    let position = self
                        .children_named(parent, &element.name)
                        .position(|sibling| sibling == node)
                        .unwrap_or(0);
                    format!("{}[{}]", element.name, position + 1)
                }
                None => element.name.clone(),
            };
            segments.push(segment);
            current = element.parent;
        }
        segments.reverse();
        format!("/{}", segments.join("/"))
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}

/// Error loading a document from disk
#[derive(thiserror::Error, Debug)]
pub enum LoadError {
    #[error("{0}")]
    Io(std::io::Error),
    #[error("{0}")]
    Document(DocumentError),
}

/// Maps byte offsets to line/column pairs
struct LineIndex {
    line_starts: Vec<usize>,
}

impl LineIndex {
    fn new(content: &str) -> Self {
        let mut line_starts = vec![0];
        line_starts.extend(
            content
                .bytes()
                .enumerate()
                .filter(|(_, b)| *b == b'\n')
                .map(|(i, _)| i + 1),
        );
        Self { line_starts }
    }

    fn span(&self, offset: usize, length: usize) -> Span {
        let line = match self.line_starts.binary_search(&offset) {
            Ok(line) => line,
            Err(next) => next - 1,
        };
        Span {
            offset,
            length,
            line: line as u32 + 1,
            column: (offset - self.line_starts[line]) as u32 + 1,
        }
    }
}

struct DocumentParser<'a> {
    reader: Reader<&'a [u8]>,
    lines: LineIndex,
    elements: Vec<Element>,
    stack: Vec<ElementId>,
    root: Option<ElementId>,
}

impl<'a> DocumentParser<'a> {
    fn new(content: &'a str) -> Self {
        let mut reader = Reader::from_str(content);
        reader.config_mut().trim_text_start = false;
        reader.config_mut().trim_text_end = false;
        Self {
            reader,
            lines: LineIndex::new(content),
            elements: Vec::new(),
            stack: Vec::new(),
            root: None,
        }
    }

    fn parse(mut self) -> DocumentResult<ConfigDocument> {
        loop {
            let event_start = self.reader.buffer_position() as usize;
            match self.reader.read_event() {
                Ok(Event::Start(e)) => {
                    let id = self.open_element(&e, event_start)?;
                    self.stack.push(id);
                }
                Ok(Event::Empty(e)) => {
                    self.open_element(&e, event_start)?;
                }
                Ok(Event::End(e)) => {
                    let found = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                    let id = self.stack.pop().ok_or_else(|| DocumentError::Syntax {
                        message: format!("unexpected closing tag </{}>", found),
                        position: event_start as u64,
                    })?;
                    let expected = &self.elements[id.0].name;
                    if *expected != found {
                        return Err(DocumentError::MismatchedEndTag {
                            expected: expected.clone(),
                            found,
                        });
                    }
                }
                Ok(Event::Text(e)) => {
                    let text = e.unescape().map_err(|err| DocumentError::Syntax {
                        message: format!("invalid text content: {}", err),
                        position: event_start as u64,
                    })?;
                    self.append_text(&text);
                }
                Ok(Event::CData(e)) => {
                    let text = String::from_utf8_lossy(e.as_ref()).into_owned();
                    self.append_text(&text);
                }
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(e) => {
                    return Err(DocumentError::Syntax {
                        message: e.to_string(),
                        position: self.reader.error_position(),
                    });
                }
            }
        }

        if let Some(open) = self.stack.last() {
            return Err(DocumentError::Unclosed {
                element: self.elements[open.0].name.clone(),
            });
        }
        let root = self.root.ok_or(DocumentError::Empty)?;
        Ok(ConfigDocument {
            elements: self.elements,
            root,
        })
    }

    fn open_element(&mut self, e: &BytesStart<'_>, event_start: usize) -> DocumentResult<ElementId> {
        let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
        let parent = self.stack.last().copied();
        if parent.is_none() && self.root.is_some() {
            return Err(DocumentError::MultipleRoots);
        }

        let id = ElementId(self.elements.len());
        let span = self.lines.span(event_start + 1, name.len());
        let attributes = self.attributes(e, event_start)?;
        self.elements.push(Element {
            name,
            attributes,
            children: Vec::new(),
            parent,
            text: None,
            span,
        });

        match parent {
            Some(parent) => self.elements[parent.0].children.push(id),
            None => self.root = Some(id),
        }
        Ok(id)
    }

    fn attributes(&self, e: &BytesStart<'_>, event_start: usize) -> DocumentResult<Vec<Attribute>> {
        let raw = String::from_utf8_lossy(e.as_ref()).into_owned();
        let content_start = event_start + 1;
        let mut search_from = e.name().as_ref().len();
        let mut attributes = Vec::new();

        for attr in e.attributes() {
            let attr = attr?;
            let name = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr
                .unescape_value()
                .map_err(|err| DocumentError::Syntax {
                    message: format!("invalid value for attribute '{}': {}", name, err),
                    position: event_start as u64,
                })?
                .into_owned();

            let (name_offset, value_offset) = locate_attribute(&raw, search_from, &name)
                .unwrap_or((search_from, search_from));
            search_from = value_offset;
            let raw_len = attr.value.len();
            attributes.push(Attribute {
                name_span: self.lines.span(content_start + name_offset, name.len()),
                value_span: self.lines.span(content_start + value_offset, raw_len),
                name,
                value,
            });
        }
        Ok(attributes)
    }

    fn append_text(&mut self, text: &str) {
        if let Some(current) = self.stack.last() {
            self.elements[current.0]
                .text
                .get_or_insert_with(String::new)
                .push_str(text);
        }
    }
}

/// Find `name = "` inside a raw start tag; returns offsets of the name and
/// of the first character after the opening quote.
fn locate_attribute(raw: &str, from: usize, name: &str) -> Option<(usize, usize)> {
    let bytes = raw.as_bytes();
    let mut start = from;
    while let Some(rel) = raw.get(start..)?.find(name) {
        let name_offset = start + rel;
        let preceded = name_offset == 0 || bytes[name_offset - 1].is_ascii_whitespace();
        let mut cursor = name_offset + name.len();
        while cursor < bytes.len() && bytes[cursor].is_ascii_whitespace() {
            cursor += 1;
        }
        if preceded && cursor < bytes.len() && bytes[cursor] == b'=' {
            cursor += 1;
            while cursor < bytes.len() && bytes[cursor].is_ascii_whitespace() {
                cursor += 1;
            }
            return Some((name_offset, cursor + 1));
        }
        start = name_offset + name.len();
    }
    None
}
