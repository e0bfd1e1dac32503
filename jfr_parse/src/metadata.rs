//! Type definitions discovered from a chunk's embedded metadata tree.
//!
//! The metadata section is a flat string table followed by one nested element
//! tree. Every element names itself and its attributes by index into the
//! string table. Only `class` and `field` elements matter for decoding; all
//! other elements are read and dropped so the cursor stays in sync.

use crate::cursor::ByteCursor;
use crate::{ParseError, Result};
use serde::Serialize;
use std::collections::HashMap;

/// Nesting bound for the element tree. Real recordings nest four or five
/// levels deep.
const MAX_ELEMENT_DEPTH: usize = 64;

/// A field of a class type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Field {
    pub name: String,
    /// Id of the field's declared type.
    pub type_id: i64,
    /// True when the encoded value is an id into a constant pool.
    pub constant_pool: bool,
}

impl Field {
    fn from_attributes(attributes: &HashMap<String, String>) -> Self {
        Self {
            name: attributes.get("name").cloned().unwrap_or_default(),
            type_id: parse_id(attributes.get("class")),
            constant_pool: attributes.get("constantPool").map(String::as_str) == Some("true"),
        }
    }
}

/// A class type declared in the metadata tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassType {
    pub id: i64,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub super_type: Option<String>,
    pub fields: Vec<Field>,
}

impl ClassType {
    fn from_attributes(attributes: &HashMap<String, String>) -> Self {
        Self {
            id: parse_id(attributes.get("id")),
            name: attributes.get("name").cloned().unwrap_or_default(),
            super_type: attributes.get("superType").cloned(),
            fields: Vec::new(),
        }
    }

    /// Look up a field by name.
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.field(name).is_some()
    }
}

fn parse_id(value: Option<&String>) -> i64 {
    value.and_then(|v| v.parse().ok()).unwrap_or(0)
}

/// Lookup of class types by id and by name.
///
/// Types that declare a super type (events, annotations, settings) are only
/// reachable by name.
#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    classes: Vec<ClassType>,
    by_id: HashMap<i64, usize>,
    by_name: HashMap<String, usize>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a class type. Later registrations win on id or name collisions.
    pub fn register(&mut self, class: ClassType) {
        let index = self.classes.len();
        if class.super_type.is_none() {
            self.by_id.insert(class.id, index);
        }
        self.by_name.insert(class.name.clone(), index);
        self.classes.push(class);
    }

    pub fn get(&self, id: i64) -> Option<&ClassType> {
        self.by_id.get(&id).map(|&i| &self.classes[i])
    }

    pub fn get_by_name(&self, name: &str) -> Option<&ClassType> {
        self.by_name.get(name).map(|&i| &self.classes[i])
    }

    /// Id of the type registered under `name`.
    pub fn type_id(&self, name: &str) -> Option<i64> {
        self.get_by_name(name).map(|c| c.id)
    }

    /// Number of class definitions read.
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

/// A node of the metadata element tree.
#[derive(Debug)]
enum Element {
    Class(ClassType),
    Field(Field),
    Noop,
}

impl Element {
    fn create(name: &str, attributes: &HashMap<String, String>) -> Self {
        match name {
            "class" => Element::Class(ClassType::from_attributes(attributes)),
            "field" => Element::Field(Field::from_attributes(attributes)),
            _ => Element::Noop,
        }
    }

    /// Attach a fully read child. Only classes keep children, and only fields.
    fn accept_child(&mut self, child: Element, registry: &mut TypeRegistry) {
        match (self, child) {
            (Element::Class(class), Element::Field(field)) => class.fields.push(field),
            (_, child) => child.finish(registry),
        }
    }

    /// Called once an element will not be attached to a parent.
    fn finish(self, registry: &mut TypeRegistry) {
        if let Element::Class(class) = self {
            registry.register(class);
        }
    }
}

/// Read the metadata section starting at `offset` and build the type registry.
pub fn read_metadata(cursor: &mut ByteCursor<'_>, offset: usize) -> Result<TypeRegistry> {
    cursor.seek(offset)?;
    // size, type, start, duration, metadata id
    cursor.read_varint32()?;
    cursor.read_varint32()?;
    cursor.read_varint64()?;
    cursor.read_varint64()?;
    cursor.read_varint64()?;

    let count = cursor.read_len()?;
    let mut strings = Vec::with_capacity(count);
    for _ in 0..count {
        strings.push(cursor.read_string()?.unwrap_or_default());
    }

    let mut registry = TypeRegistry::new();
    let root = read_element(cursor, &strings, &mut registry, 0)?;
    root.finish(&mut registry);

    log::debug!(
        "read {} metadata strings, {} class types",
        strings.len(),
        registry.len()
    );
    Ok(registry)
}

fn read_element(
    cursor: &mut ByteCursor<'_>,
    strings: &[String],
    registry: &mut TypeRegistry,
    depth: usize,
) -> Result<Element> {
    if depth > MAX_ELEMENT_DEPTH {
        return Err(ParseError::MetadataTooDeep(MAX_ELEMENT_DEPTH));
    }

    let name = lookup(strings, cursor.read_varint32()?)?;
    let attribute_count = cursor.read_len()?;
    let mut attributes = HashMap::with_capacity(attribute_count);
    for _ in 0..attribute_count {
        let key = lookup(strings, cursor.read_varint32()?)?;
        let value = lookup(strings, cursor.read_varint32()?)?;
        attributes.insert(key.to_string(), value.to_string());
    }

    let mut element = Element::create(name, &attributes);
    let child_count = cursor.read_len()?;
    for _ in 0..child_count {
        let child = read_element(cursor, strings, registry, depth + 1)?;
        element.accept_child(child, registry);
    }
    Ok(element)
}

fn lookup(strings: &[String], index: i32) -> Result<&str> {
    usize::try_from(index)
        .ok()
        .and_then(|i| strings.get(i))
        .map(String::as_str)
        .ok_or(ParseError::InvalidStringIndex(index))
}
