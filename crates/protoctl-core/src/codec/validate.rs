use prost_reflect::{Cardinality, DynamicMessage, FieldDescriptor, MapKey, ReflectMessage, Value};
use std::fmt;

/// One step of the path from a message to one of its fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldPathElement {
    /// A field, by `.proto` name and JSON name
    Field {
        /// `.proto` field name
        name: String,
        /// JSON field name
        json_name: String,
    },
    /// An element of a repeated field
    Index(usize),
    /// An entry of a map field
    Key(String),
}

impl FieldPathElement {
    fn field(field: &FieldDescriptor) -> Self {
        Self::Field {
            name: field.name().to_string(),
            json_name: field.json_name().to_string(),
        }
    }
}

/// A single validation failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// Path from the root message to the offending field
    pub path: Vec<FieldPathElement>,
    /// What is wrong
    pub message: String,
    /// 1-based source line, when the input format has lines
    pub line: Option<usize>,
}

impl Violation {
    /// Creates a violation without a source location
    pub fn new(path: Vec<FieldPathElement>, message: impl Into<String>) -> Self {
        Self {
            path,
            message: message.into(),
            line: None,
        }
    }

    /// The path rendered as `a.b[0].c`
    pub fn field_path(&self) -> String {
        let mut out = String::new();
        for element in &self.path {
            match element {
                FieldPathElement::Field { name, .. } => {
                    if !out.is_empty() {
                        out.push('.');
                    }
                    out.push_str(name);
                }
                FieldPathElement::Index(index) => out.push_str(&format!("[{}]", index)),
                FieldPathElement::Key(key) => out.push_str(&format!("[{:?}]", key)),
            }
        }
        out
    }

    /// Attaches the line of the YAML node closest to the violation.
    ///
    /// A missing field has no node of its own, so the line of its parent is
    /// used.
    pub(crate) fn located_in_yaml(mut self, source: &str) -> Self {
        let parent = &self.path[..self.path.len().saturating_sub(1)];
        self.line = locate_yaml(source, parent);
        self
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(line) = self.line {
            write!(f, "line {}: ", line)?;
        }
        write!(f, "{}: {}", self.field_path(), self.message)
    }
}

/// Checks a decoded message against rules carried by its schema
pub trait Validator: Send + Sync {
    /// Returns every violation found; empty when the message is valid
    fn validate(&self, message: &DynamicMessage) -> Vec<Violation>;
}

/// Requires every proto2 `required` field to be set, recursively
#[derive(Debug, Clone, Copy, Default)]
pub struct RequiredFieldsValidator;

impl Validator for RequiredFieldsValidator {
    fn validate(&self, message: &DynamicMessage) -> Vec<Violation> {
        let mut violations = Vec::new();
        check_required(message, &mut Vec::new(), &mut violations);
        violations
    }
}

fn check_required(message: &DynamicMessage, path: &mut Vec<FieldPathElement>, out: &mut Vec<Violation>) {
    for field in message.descriptor().fields() {
        path.push(FieldPathElement::field(&field));
        if !message.has_field(&field) {
            if field.cardinality() == Cardinality::Required {
                out.push(Violation::new(path.clone(), "required field is not set"));
            }
        } else {
            match message.get_field(&field).as_ref() {
                Value::Message(nested) => check_required(nested, path, out),
                Value::List(values) => {
                    for (i, value) in values.iter().enumerate() {
                        if let Value::Message(nested) = value {
                            path.push(FieldPathElement::Index(i));
                            check_required(nested, path, out);
                            path.pop();
                        }
                    }
                }
                Value::Map(entries) => {
                    let mut entries: Vec<(String, &Value)> =
                        entries.iter().map(|(key, value)| (map_key(key), value)).collect();
                    entries.sort_by(|a, b| a.0.cmp(&b.0));
                    for (key, value) in entries {
                        if let Value::Message(nested) = value {
                            path.push(FieldPathElement::Key(key));
                            check_required(nested, path, out);
                            path.pop();
                        }
                    }
                }
                _ => {}
            }
        }
        path.pop();
    }
}

fn map_key(key: &MapKey) -> String {
    match key {
        MapKey::Bool(value) => value.to_string(),
        MapKey::I32(value) => value.to_string(),
        MapKey::I64(value) => value.to_string(),
        MapKey::U32(value) => value.to_string(),
        MapKey::U64(value) => value.to_string(),
        MapKey::String(value) => value.clone(),
    }
}

/// Leading spaces of a line
fn indent_of(line: &str) -> usize {
    line.len() - line.trim_start_matches(' ').len()
}

/// The column and text of the mapping key on a line, looking through any
/// `- ` list markers
fn key_of(line: &str) -> Option<(usize, &str)> {
    let mut column = indent_of(line);
    let mut rest = &line[column..];
    while let Some(item) = rest.strip_prefix("- ") {
        let trimmed = item.trim_start_matches(' ');
        column += 2 + item.len() - trimmed.len();
        rest = trimmed;
    }
    if rest.is_empty() || rest.starts_with('#') {
        return None;
    }
    let colon = rest.find(':')?;
    let key = rest[..colon].trim().trim_matches('"').trim_matches('\'');
    Some((column, key))
}

fn is_blank(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.is_empty() || trimmed.starts_with('#')
}

/// Finds the 1-based line of the node at `path` in block-style YAML.
///
/// This is a line scan, not a parser: flow collections and multi-line
/// scalars are not understood, in which case `None` is returned.
fn locate_yaml(source: &str, path: &[FieldPathElement]) -> Option<usize> {
    let lines: Vec<&str> = source.lines().collect();
    let mut start = 0;
    // column of the enclosing node; children must be indented deeper
    let mut parent: Option<usize> = None;
    let mut found = None;
    for element in path {
        match element {
            FieldPathElement::Field { name, json_name } => {
                let (line, column) = find_key(&lines, start, parent, |key| key == name || key == json_name)?;
                found = Some(line);
                parent = Some(column);
                start = line + 1;
            }
            FieldPathElement::Key(wanted) => {
                let (line, column) = find_key(&lines, start, parent, |key| key == wanted)?;
                found = Some(line);
                parent = Some(column);
                start = line + 1;
            }
            FieldPathElement::Index(index) => {
                let (line, column) = find_item(&lines, start, parent, *index)?;
                found = Some(line);
                parent = Some(column);
                // the first key of an item shares its line
                start = line;
            }
        }
    }
    found.map(|line| line + 1)
}

fn find_key(
    lines: &[&str],
    start: usize,
    parent: Option<usize>,
    matches: impl Fn(&str) -> bool,
) -> Option<(usize, usize)> {
    let mut child_column = None;
    for (i, line) in lines.iter().enumerate().skip(start) {
        if is_blank(line) {
            continue;
        }
        let Some((column, key)) = key_of(line) else {
            continue;
        };
        if let Some(parent) = parent {
            if column <= parent {
                if i > start {
                    return None;
                }
                continue;
            }
        }
        let child_column = *child_column.get_or_insert(column);
        if column == child_column && matches(key) {
            return Some((i, column));
        }
    }
    None
}

fn find_item(lines: &[&str], start: usize, parent: Option<usize>, index: usize) -> Option<(usize, usize)> {
    let mut item_column = None;
    let mut seen = 0;
    for (i, line) in lines.iter().enumerate().skip(start) {
        if is_blank(line) {
            continue;
        }
        let column = indent_of(line);
        let is_item = line[column..].starts_with("- ") || line[column..].trim_end() == "-";
        match item_column {
            None if is_item && parent.map_or(true, |parent| column >= parent) => {
                item_column = Some(column);
            }
            None => return None,
            Some(item) if column < item || (column == item && !is_item) => return None,
            Some(_) => {}
        }
        if is_item && Some(column) == item_column {
            if seen == index {
                return Some((i, column));
            }
            seen += 1;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::super::testing::config_pool;
    use super::*;
    use crate::codec::Unmarshaler;
    use crate::reference::MessageEncoding;
    use pretty_assertions::assert_eq;

    fn field(name: &str) -> FieldPathElement {
        FieldPathElement::Field {
            name: name.to_string(),
            json_name: name.to_string(),
        }
    }

    #[test]
    fn test_required_fields_recursive() {
        let descriptor = config_pool().get_message_by_name("acme.Config").unwrap();
        let message = Unmarshaler::new(MessageEncoding::Json)
            .unmarshal(&descriptor, br#"{"items":[{"id":1},{"note":"x"}]}"#)
            .unwrap();
        let paths: Vec<String> = RequiredFieldsValidator
            .validate(&message)
            .iter()
            .map(Violation::field_path)
            .collect();
        assert_eq!(paths, vec!["name".to_string(), "items[1].id".to_string()]);
    }

    #[test]
    fn test_locate_yaml() {
        let source = "\
name: x
# comment
items:
  - id: 1
  - note: a
    extra:
      deep: 1
inner:
  note: b
";
        assert_eq!(locate_yaml(source, &[field("name")]), Some(1));
        assert_eq!(locate_yaml(source, &[field("items"), FieldPathElement::Index(1)]), Some(5));
        assert_eq!(
            locate_yaml(source, &[field("items"), FieldPathElement::Index(1), field("extra"), field("deep")]),
            Some(7)
        );
        assert_eq!(locate_yaml(source, &[field("inner"), field("note")]), Some(9));
        assert_eq!(locate_yaml(source, &[field("deep")]), None);
        assert_eq!(locate_yaml(source, &[]), None);
    }

    #[test]
    fn test_display() {
        let mut violation = Violation::new(vec![field("a"), FieldPathElement::Index(0), field("b")], "bad");
        assert_eq!(violation.to_string(), "a[0].b: bad");
        violation.line = Some(3);
        assert_eq!(violation.to_string(), "line 3: a[0].b: bad");
    }
}
