//! File annotations: compile and configuration diagnostics.
//!
//! Diagnostics are collected into a [`FileAnnotationSet`] rather than failing
//! on the first problem. The controller prints them exactly once, in one of
//! several [`ErrorFormat`]s, to a selectable [`AnnotationStream`].

use crate::error::{Error, Result};
use serde::Serialize;
use std::fmt;
use std::io::Write;
use std::str::FromStr;

/// A single diagnostic attached to a file location
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct FileAnnotation {
    /// External path of the file, empty when the diagnostic is not file-bound
    #[serde(skip_serializing_if = "String::is_empty")]
    pub path: String,
    /// 1-based start line, 0 if unknown
    #[serde(skip_serializing_if = "is_zero")]
    pub start_line: u32,
    /// 1-based start column, 0 if unknown
    #[serde(skip_serializing_if = "is_zero")]
    pub start_column: u32,
    /// 1-based end line, 0 if unknown
    #[serde(skip_serializing_if = "is_zero")]
    pub end_line: u32,
    /// 1-based end column, 0 if unknown
    #[serde(skip_serializing_if = "is_zero")]
    pub end_column: u32,
    /// Short type identifier, e.g. `COMPILE`
    #[serde(rename = "type")]
    pub kind: String,
    /// Human readable message
    pub message: String,
}

fn is_zero(value: &u32) -> bool {
    *value == 0
}

impl FileAnnotation {
    /// Creates an annotation without a location
    pub fn new(path: impl Into<String>, kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            start_line: 0,
            start_column: 0,
            end_line: 0,
            end_column: 0,
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// Sets the start location
    pub fn at(mut self, line: u32, column: u32) -> Self {
        self.start_line = line;
        self.start_column = column;
        self.end_line = line;
        self.end_column = column;
        self
    }

    fn location_prefix(&self) -> String {
        let path = if self.path.is_empty() { "<input>" } else { &self.path };
        match (self.start_line, self.start_column) {
            (0, _) => path.to_string(),
            (line, 0) => format!("{}:{}", path, line),
            (line, column) => format!("{}:{}:{}", path, line, column),
        }
    }
}

impl fmt::Display for FileAnnotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.location_prefix(), self.message)
    }
}

/// A non-empty, sorted, de-duplicated set of annotations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileAnnotationSet {
    annotations: Vec<FileAnnotation>,
}

impl FileAnnotationSet {
    /// Creates a set; returns `None` if there are no annotations
    pub fn new(mut annotations: Vec<FileAnnotation>) -> Option<Self> {
        if annotations.is_empty() {
            return None;
        }
        annotations.sort();
        annotations.dedup();
        Some(Self { annotations })
    }

    /// The annotations, sorted by path and location
    pub fn annotations(&self) -> &[FileAnnotation] {
        &self.annotations
    }

    /// Converts a list of annotations into an error, or `Ok` if empty
    pub fn into_result(annotations: Vec<FileAnnotation>) -> Result<()> {
        match Self::new(annotations) {
            Some(set) => Err(Error::FileAnnotations(set)),
            None => Ok(()),
        }
    }
}

impl fmt::Display for FileAnnotationSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, annotation) in self.annotations.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", annotation)?;
        }
        Ok(())
    }
}

/// Output format for printed annotations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorFormat {
    /// `path:line:column:message`
    #[default]
    Text,
    /// One JSON object per line
    Json,
    /// Visual Studio style
    Msvs,
    /// A JUnit XML report
    Junit,
    /// GitHub Actions workflow commands
    GithubActions,
}

impl ErrorFormat {
    /// All format names, for help output
    pub const NAMES: &'static [&'static str] = &["text", "json", "msvs", "junit", "github-actions"];
}

impl FromStr for ErrorFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            "msvs" => Ok(Self::Msvs),
            "junit" => Ok(Self::Junit),
            "github-actions" => Ok(Self::GithubActions),
            other => Err(Error::malformed_input(
                other,
                format!("unknown error format, expected one of {}", Self::NAMES.join(", ")),
            )),
        }
    }
}

/// Which stream annotations are printed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AnnotationStream {
    /// Standard output
    Stdout,
    /// Standard error
    #[default]
    Stderr,
}

/// Prints a set of annotations in the given format
pub fn print_file_annotation_set(
    w: &mut dyn Write,
    set: &FileAnnotationSet,
    format: ErrorFormat,
) -> Result<()> {
    match format {
        ErrorFormat::Text => {
            for annotation in set.annotations() {
                writeln!(w, "{}", annotation)?;
            }
        }
        ErrorFormat::Json => {
            for annotation in set.annotations() {
                serde_json::to_writer(&mut *w, annotation)?;
                writeln!(w)?;
            }
        }
        ErrorFormat::Msvs => {
            for annotation in set.annotations() {
                let path = if annotation.path.is_empty() { "<input>" } else { &annotation.path };
                let location = match (annotation.start_line, annotation.start_column) {
                    (0, _) => String::new(),
                    (line, 0) => format!("({})", line),
                    (line, column) => format!("({},{})", line, column),
                };
                writeln!(
                    w,
                    "{}{} : error {} : {}",
                    path, location, annotation.kind, annotation.message
                )?;
            }
        }
        ErrorFormat::GithubActions => {
            for annotation in set.annotations() {
                let mut props = Vec::new();
                if !annotation.path.is_empty() {
                    props.push(format!("file={}", annotation.path));
                }
                if annotation.start_line > 0 {
                    props.push(format!("line={}", annotation.start_line));
                    props.push(format!("endLine={}", annotation.end_line));
                }
                if annotation.start_column > 0 {
                    props.push(format!("col={}", annotation.start_column));
                    props.push(format!("endColumn={}", annotation.end_column));
                }
                writeln!(w, "::error {}::{}", props.join(","), annotation.message)?;
            }
        }
        ErrorFormat::Junit => print_junit(w, set)?,
    }
    Ok(())
}

fn print_junit(w: &mut dyn Write, set: &FileAnnotationSet) -> Result<()> {
    let mut by_path: Vec<(&str, Vec<&FileAnnotation>)> = Vec::new();
    for annotation in set.annotations() {
        let same_path = by_path
            .last()
            .map_or(false, |(path, _)| *path == annotation.path);
        if same_path {
            if let Some((_, group)) = by_path.last_mut() {
                group.push(annotation);
            }
        } else {
            by_path.push((&annotation.path, vec![annotation]));
        }
    }
    writeln!(w, r#"<?xml version="1.0" encoding="UTF-8"?>"#)?;
    writeln!(w, "<testsuites>")?;
    for (path, group) in by_path {
        let name = path.strip_suffix(".proto").unwrap_or(path);
        writeln!(
            w,
            r#"  <testsuite name="{}" tests="{}" failures="{}" errors="0">"#,
            xml_escape(name),
            group.len(),
            group.len()
        )?;
        for annotation in group {
            writeln!(
                w,
                r#"    <testcase name="{}_{}_{}"><failure message="{}" type="{}"></failure></testcase>"#,
                xml_escape(&annotation.kind),
                annotation.start_line,
                annotation.start_column,
                xml_escape(&annotation.to_string()),
                xml_escape(&annotation.kind)
            )?;
        }
        writeln!(w, "  </testsuite>")?;
    }
    writeln!(w, "</testsuites>")?;
    Ok(())
}

fn xml_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> FileAnnotationSet {
        FileAnnotationSet::new(vec![
            FileAnnotation::new("b.proto", "COMPILE", "syntax error").at(3, 7),
            FileAnnotation::new("a.proto", "COMPILE", "unknown type \"Foo\"").at(10, 2),
            FileAnnotation::new("a.proto", "COMPILE", "unknown type \"Foo\"").at(10, 2),
        ])
        .unwrap()
    }

    fn render(format: ErrorFormat) -> String {
        let mut out = Vec::new();
        print_file_annotation_set(&mut out, &sample(), format).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_empty_set_is_none() {
        assert!(FileAnnotationSet::new(Vec::new()).is_none());
        assert!(FileAnnotationSet::into_result(Vec::new()).is_ok());
    }

    #[test]
    fn test_text_format_sorted_and_deduped() {
        assert_eq!(
            render(ErrorFormat::Text),
            "a.proto:10:2:unknown type \"Foo\"\nb.proto:3:7:syntax error\n"
        );
    }

    #[test]
    fn test_json_format() {
        let out = render(ErrorFormat::Json);
        let first: serde_json::Value = serde_json::from_str(out.lines().next().unwrap()).unwrap();
        assert_eq!(first["path"], "a.proto");
        assert_eq!(first["start_line"], 10);
        assert_eq!(first["type"], "COMPILE");
    }

    #[test]
    fn test_msvs_and_github_formats() {
        assert!(render(ErrorFormat::Msvs).starts_with("a.proto(10,2) : error COMPILE : "));
        assert!(render(ErrorFormat::GithubActions)
            .starts_with("::error file=a.proto,line=10,endLine=10,col=2,endColumn=2::"));
    }

    #[test]
    fn test_junit_escapes() {
        let out = render(ErrorFormat::Junit);
        assert!(out.contains(r#"<testsuite name="a" tests="1""#));
        assert!(out.contains("&quot;Foo&quot;"));
    }

    #[test]
    fn test_error_format_from_str() {
        assert_eq!("json".parse::<ErrorFormat>().unwrap(), ErrorFormat::Json);
        assert!("xml".parse::<ErrorFormat>().is_err());
    }
}
