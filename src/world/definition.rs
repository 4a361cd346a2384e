// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! World definition documents.
//!
//! Every world comes with a __definition__ file, an XML document stored in
//! the metadata repository of its stack. The definition declares where each
//! Git working folder of the world must live, and where it must be cloned
//! from.
//!
//! # General Layout
//!
//! ```xml
//! <CK-World>
//!   <GitFolder Name="CK-Core" Url="https://github.com/org/CK-Core" />
//!   <Folder Name="Libs">
//!     <GitFolder Name="Foo" Url="https://github.com/org/Foo" />
//!   </Folder>
//! </CK-World>
//! ```
//!
//! A `Folder` only contributes a path prefix. A `GitFolder` is a leaf that
//! declares one working folder; its children are opaque to the layout.
//! Elements other than these two are kept verbatim but never looked into.
//!
//! # Immutability
//!
//! A loaded [`WorldDefinitionFile`] never changes. Its declared layout is
//! computed once at load time. Edits go through [`WorldDefinitionEditor`],
//! which produces a brand new document.

use crate::{
    layout::{DeclaredEntry, DeclaredLayout, RelativePath},
    remote::{RemoteUrl, RemoteUrlError},
    world::WorldName,
};

use quick_xml::{
    events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event},
    Reader, Writer,
};
use std::{
    collections::HashMap,
    fmt::{Display, Formatter, Result as FmtResult},
};
use tracing::error;

const FOLDER: &str = "Folder";
const GIT_FOLDER: &str = "GitFolder";
const NAME: &str = "Name";
const URL: &str = "Url";

/// Loaded world definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorldDefinitionFile {
    root: XmlElement,
    layout: Result<DeclaredLayout, LayoutErrors>,
}

impl WorldDefinitionFile {
    /// Parse definition document.
    ///
    /// Layout errors do not fail the parse: they are kept and reported by
    /// [`Self::read_layout`].
    ///
    /// # Errors
    ///
    /// - Return [`DefinitionError::Xml`] if document is not well-formed.
    /// - Return [`DefinitionError::Empty`] if document has no root element.
    /// - Return [`DefinitionError::MultipleRoots`] if document has more than
    ///   one root element.
    pub fn parse(xml: &str) -> Result<Self> {
        Ok(Self::from_root(XmlElement::parse(xml)?))
    }

    /// Parse definition document of target world.
    ///
    /// Same as [`Self::parse`], but also requires the root element to be
    /// named after the world.
    ///
    /// # Errors
    ///
    /// - Return [`DefinitionError::RootElement`] if root element does not
    ///   match the world name.
    pub fn load(world: &WorldName, xml: &str) -> Result<Self> {
        let definition = Self::parse(xml)?;
        let expected = world.definition_root_element();
        if definition.root.name != expected {
            return Err(DefinitionError::RootElement {
                expected,
                found: definition.root.name,
            });
        }

        Ok(definition)
    }

    /// Construct empty definition of target world.
    pub fn empty(world: &WorldName) -> Self {
        Self::from_root(XmlElement::new(world.definition_root_element()))
    }

    fn from_root(root: XmlElement) -> Self {
        let layout = declare_layout(&root);
        Self { root, layout }
    }

    /// Name of the root element.
    pub fn root_element_name(&self) -> &str {
        &self.root.name
    }

    /// Declared layout of the world.
    ///
    /// # Errors
    ///
    /// - Return every [`LayoutError`] found in the document at once.
    pub fn read_layout(&self) -> Result<&DeclaredLayout, &LayoutErrors> {
        self.layout.as_ref()
    }

    /// Declared layout of the world, or [`None`] if the declaration is invalid.
    ///
    /// Each error is logged.
    pub fn layout(&self) -> Option<&DeclaredLayout> {
        match &self.layout {
            Ok(layout) => Some(layout),
            Err(errors) => {
                for err in &errors.0 {
                    error!("invalid world definition <{}>: {err}", self.root.name);
                }
                None
            }
        }
    }

    /// Start editing a copy of this definition.
    pub fn edit(&self) -> WorldDefinitionEditor {
        WorldDefinitionEditor {
            root: self.root.clone(),
            changed: false,
        }
    }

    /// Serialize definition to XML.
    ///
    /// # Errors
    ///
    /// - Return [`DefinitionError::Write`] if XML writer fails.
    pub fn to_xml(&self) -> Result<String> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))?;
        self.root.write(&mut writer)?;
        let mut xml = String::from_utf8_lossy(&writer.into_inner()).into_owned();
        xml.push('\n');

        Ok(xml)
    }
}

fn declare_layout(root: &XmlElement) -> Result<DeclaredLayout, LayoutErrors> {
    let mut reader = LayoutReader::default();
    reader.walk(root, &RelativePath::root());

    if !reader.errors.is_empty() {
        return Err(LayoutErrors(reader.errors));
    }

    Ok(DeclaredLayout::from_unique(reader.entries))
}

#[derive(Default)]
struct LayoutReader {
    errors: Vec<LayoutError>,
    entries: Vec<DeclaredEntry>,
    paths: HashMap<RelativePath, usize>,
    urls: HashMap<RemoteUrl, usize>,
}

impl LayoutReader {
    // Depth first, document order.
    fn walk(&mut self, element: &XmlElement, prefix: &RelativePath) {
        for child in element.elements() {
            let is_git_folder = child.name == GIT_FOLDER;
            if !is_git_folder && child.name != FOLDER {
                continue;
            }

            let name = match child.attribute(NAME).map(str::trim) {
                Some(name) if is_valid_folder_name(name) => name,
                Some(name) => {
                    self.errors.push(LayoutError::InvalidName {
                        element: child.name.clone(),
                        name: name.to_string(),
                        parent: prefix.clone(),
                    });
                    continue;
                }
                None => {
                    self.errors.push(LayoutError::MissingName {
                        element: child.name.clone(),
                        parent: prefix.clone(),
                    });
                    continue;
                }
            };

            let path = prefix.join(name);
            if is_git_folder {
                self.declare(child, path);
            } else {
                self.walk(child, &path);
            }
        }
    }

    fn declare(&mut self, git_folder: &XmlElement, path: RelativePath) {
        let url = match git_folder.attribute(URL).map(RemoteUrl::parse) {
            Some(Ok(url)) => url,
            Some(Err(source)) => {
                self.errors.push(LayoutError::InvalidUrl { path, source });
                return;
            }
            None => {
                self.errors.push(LayoutError::MissingUrl { path });
                return;
            }
        };

        if let Some(&first) = self.paths.get(&path) {
            self.errors.push(LayoutError::DuplicatePath {
                path,
                first_url: self.entries[first].url.clone(),
            });
            return;
        }

        if let Some(&first) = self.urls.get(&url) {
            self.errors.push(LayoutError::DuplicateUrl {
                url,
                first_path: self.entries[first].path.clone(),
                path,
            });
            return;
        }

        self.paths.insert(path.clone(), self.entries.len());
        self.urls.insert(url.clone(), self.entries.len());
        self.entries.push(DeclaredEntry { path, url });
    }
}

fn is_valid_folder_name(name: &str) -> bool {
    !name.is_empty() && name != ".." && !name.contains(['/', '\\'])
}

/// Editor of world definitions.
///
/// Works on a private copy of the document. Nothing is visible until
/// [`WorldDefinitionEditor::finish`] hands out a new definition.
#[derive(Debug, Clone)]
pub struct WorldDefinitionEditor {
    root: XmlElement,
    changed: bool,
}

impl WorldDefinitionEditor {
    /// Rename root element, e.g., to turn a default world definition into a
    /// parallel one.
    pub fn rename_root(&mut self, name: impl Into<String>) {
        let name = name.into();
        if self.root.name != name {
            self.root.name = name;
            self.changed = true;
        }
    }

    /// Declare Git folder at target path.
    ///
    /// Creates missing `Folder` elements along the way. Replaces the URL of an
    /// already declared `GitFolder` at the same path.
    pub fn set_git_folder(&mut self, path: &RelativePath, url: &RemoteUrl) {
        let mut names = path.as_str().split('/').collect::<Vec<_>>();
        let leaf = match names.pop() {
            Some(leaf) => leaf,
            None => return,
        };

        let mut current = &mut self.root;
        for name in names {
            let index = match current.position_of(FOLDER, name) {
                Some(index) => index,
                None => {
                    let mut folder = XmlElement::new(FOLDER);
                    folder.set_attribute(NAME, name);
                    current.children.push(XmlNode::Element(folder));
                    self.changed = true;
                    current.children.len() - 1
                }
            };
            current = match &mut current.children[index] {
                XmlNode::Element(element) => element,
                XmlNode::Text(_) => return,
            };
        }

        match current.position_of(GIT_FOLDER, leaf) {
            Some(index) => {
                if let XmlNode::Element(element) = &mut current.children[index] {
                    if element.attribute(URL) != Some(url.as_str()) {
                        element.set_attribute(URL, url.as_str());
                        self.changed = true;
                    }
                }
            }
            None => {
                let mut git_folder = XmlElement::new(GIT_FOLDER);
                git_folder.set_attribute(NAME, leaf);
                git_folder.set_attribute(URL, url.as_str());
                current.children.push(XmlNode::Element(git_folder));
                self.changed = true;
            }
        }
    }

    /// Remove Git folder declared at target path.
    ///
    /// Returns `true` if something was removed. Empty `Folder` elements left
    /// behind are kept.
    pub fn remove_git_folder(&mut self, path: &RelativePath) -> bool {
        let mut names = path.as_str().split('/').collect::<Vec<_>>();
        let leaf = match names.pop() {
            Some(leaf) => leaf,
            None => return false,
        };

        let mut current = &mut self.root;
        for name in names {
            let index = match current.position_of(FOLDER, name) {
                Some(index) => index,
                None => return false,
            };
            current = match &mut current.children[index] {
                XmlNode::Element(element) => element,
                XmlNode::Text(_) => return false,
            };
        }

        match current.position_of(GIT_FOLDER, leaf) {
            Some(index) => {
                current.children.remove(index);
                self.changed = true;
                true
            }
            None => false,
        }
    }

    /// Check if any edit changed the document.
    pub fn is_changed(&self) -> bool {
        self.changed
    }

    /// Produce the edited definition.
    pub fn finish(self) -> WorldDefinitionFile {
        WorldDefinitionFile::from_root(self.root)
    }
}

/// Minimal XML element tree.
///
/// Comments, processing instructions and the declaration are dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
struct XmlElement {
    name: String,
    attributes: Vec<(String, String)>,
    children: Vec<XmlNode>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum XmlNode {
    Element(XmlElement),
    Text(String),
}

impl XmlElement {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    fn parse(xml: &str) -> Result<Self> {
        let mut reader = Reader::from_str(xml);
        reader.trim_text(true);

        let mut open: Vec<XmlElement> = Vec::new();
        let mut root = None;

        loop {
            let position = reader.buffer_position();
            let event = reader
                .read_event()
                .map_err(|source| DefinitionError::Xml { source, position })?;

            match event {
                Event::Start(start) => open.push(Self::from_start(&start, position)?),
                Event::Empty(start) => {
                    let element = Self::from_start(&start, position)?;
                    attach(&mut open, &mut root, element)?;
                }
                Event::End(_) => {
                    if let Some(element) = open.pop() {
                        attach(&mut open, &mut root, element)?;
                    }
                }
                Event::Text(text) => {
                    let text = text
                        .unescape()
                        .map_err(|source| DefinitionError::Xml { source, position })?;
                    if let Some(parent) = open.last_mut() {
                        parent.children.push(XmlNode::Text(text.into_owned()));
                    }
                }
                Event::CData(data) => {
                    let text = String::from_utf8_lossy(&data.into_inner()).into_owned();
                    if let Some(parent) = open.last_mut() {
                        parent.children.push(XmlNode::Text(text));
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        root.ok_or(DefinitionError::Empty)
    }

    fn from_start(start: &BytesStart<'_>, position: usize) -> Result<Self> {
        let mut element = Self::new(String::from_utf8_lossy(start.name().as_ref()).into_owned());
        for attribute in start.attributes() {
            let attribute = attribute.map_err(|source| DefinitionError::Xml {
                source: source.into(),
                position,
            })?;
            let key = String::from_utf8_lossy(attribute.key.as_ref()).into_owned();
            let value = attribute
                .unescape_value()
                .map_err(|source| DefinitionError::Xml { source, position })?
                .into_owned();
            element.attributes.push((key, value));
        }

        Ok(element)
    }

    fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }

    fn set_attribute(&mut self, key: &str, value: &str) {
        match self.attributes.iter_mut().find(|(name, _)| name == key) {
            Some((_, current)) => *current = value.to_string(),
            None => self.attributes.push((key.to_string(), value.to_string())),
        }
    }

    fn elements(&self) -> impl Iterator<Item = &XmlElement> {
        self.children.iter().filter_map(|node| match node {
            XmlNode::Element(element) => Some(element),
            XmlNode::Text(_) => None,
        })
    }

    fn position_of(&self, element_name: &str, name_attribute: &str) -> Option<usize> {
        self.children.iter().position(|node| match node {
            XmlNode::Element(element) => {
                element.name == element_name
                    && element.attribute(NAME).map(str::trim) == Some(name_attribute)
            }
            XmlNode::Text(_) => false,
        })
    }

    fn write(&self, writer: &mut Writer<Vec<u8>>) -> Result<()> {
        let mut start = BytesStart::new(self.name.as_str());
        for (key, value) in &self.attributes {
            start.push_attribute((key.as_str(), value.as_str()));
        }

        if self.children.is_empty() {
            writer.write_event(Event::Empty(start))?;
            return Ok(());
        }

        writer.write_event(Event::Start(start))?;
        for child in &self.children {
            match child {
                XmlNode::Element(element) => element.write(writer)?,
                XmlNode::Text(text) => writer.write_event(Event::Text(BytesText::new(text)))?,
            }
        }
        writer.write_event(Event::End(BytesEnd::new(self.name.as_str())))?;

        Ok(())
    }
}

fn attach(open: &mut [XmlElement], root: &mut Option<XmlElement>, element: XmlElement) -> Result<()> {
    if let Some(parent) = open.last_mut() {
        parent.children.push(XmlNode::Element(element));
        return Ok(());
    }

    if root.is_some() {
        return Err(DefinitionError::MultipleRoots);
    }

    *root = Some(element);
    Ok(())
}

/// Single layout declaration error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LayoutError {
    /// `Folder` or `GitFolder` without `Name`.
    #[error("<{element}> in {parent:?} has no Name attribute")]
    MissingName { element: String, parent: RelativePath },

    /// `Name` is not a plain folder name.
    #[error("<{element} Name={name:?}> in {parent:?} is not a valid folder name")]
    InvalidName {
        element: String,
        name: String,
        parent: RelativePath,
    },

    /// `GitFolder` without `Url`.
    #[error("<GitFolder> at {path:?} has no Url attribute")]
    MissingUrl { path: RelativePath },

    /// `Url` cannot be normalized.
    #[error("<GitFolder> at {path:?} has an invalid Url: {source}")]
    InvalidUrl {
        path: RelativePath,
        #[source]
        source: RemoteUrlError,
    },

    /// Two `GitFolder` resolve to the same path.
    #[error("path {path:?} is declared twice (first with {first_url})")]
    DuplicatePath {
        path: RelativePath,
        first_url: RemoteUrl,
    },

    /// Two `GitFolder` share the same remote.
    #[error("remote {url} is declared at {first_path:?} and again at {path:?}")]
    DuplicateUrl {
        url: RemoteUrl,
        first_path: RelativePath,
        path: RelativePath,
    },
}

/// Every layout declaration error of a definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutErrors(pub Vec<LayoutError>);

impl Display for LayoutErrors {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        write!(fmt, "{} layout error(s)", self.0.len())?;
        for err in &self.0 {
            write!(fmt, "\n  - {err}")?;
        }

        Ok(())
    }
}

/// World definition error types.
#[derive(Debug, thiserror::Error)]
pub enum DefinitionError {
    /// Document is not well-formed XML.
    #[error("malformed world definition at byte {position}")]
    Xml {
        #[source]
        source: quick_xml::Error,
        position: usize,
    },

    /// XML writer failed.
    #[error(transparent)]
    Write(#[from] quick_xml::Error),

    /// Document has no root element.
    #[error("world definition has no root element")]
    Empty,

    /// Document has more than one root element.
    #[error("world definition has more than one root element")]
    MultipleRoots,

    /// Root element is not named after the world.
    #[error("world definition root element should be <{expected}>, found <{found}>")]
    RootElement { expected: String, found: String },
}

/// Friendly result alias :3
pub type Result<T, E = DefinitionError> = std::result::Result<T, E>;
