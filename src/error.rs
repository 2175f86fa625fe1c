// ABOUTME: Structured errors and the positioned diagnostic reporter

use std::fmt;
use std::io::Read;

use thiserror::Error;

use crate::ast::Pos;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Syntax,
    Name,
    Type,
    Value,
    Index,
    Runtime,
    Assertion,
    Recursion,
    Import,
    /// Clean termination requested by the `exit` builtin; never rendered.
    Exit,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Syntax => "SyntaxError",
            ErrorKind::Name => "NameError",
            ErrorKind::Type => "TypeError",
            ErrorKind::Value => "ValueError",
            ErrorKind::Index => "IndexError",
            ErrorKind::Runtime => "RuntimeError",
            ErrorKind::Assertion => "AssertionError",
            ErrorKind::Recursion => "RecursionError",
            ErrorKind::Import => "ImportError",
            ErrorKind::Exit => "Exit",
        };
        write!(f, "{name}")
    }
}

/// An evaluation failure: a kind, a message, and optionally the source
/// span and module it occurred in. Fatality is a top-level policy, so
/// nothing here exits the process.
#[derive(Error, Debug, Clone)]
#[error("{}{}{}", self.display_name(), if self.message.is_empty() { "" } else { ": " }, self.message)]
pub struct NumFuError {
    pub kind: ErrorKind,
    pub message: String,
    pub pos: Option<Pos>,
    pub module: Option<String>,
    /// User-supplied name override from `error(msg, name)`.
    pub name: Option<String>,
}

impl NumFuError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        NumFuError {
            kind,
            message: message.into(),
            pos: None,
            module: None,
            name: None,
        }
    }

    pub fn at(kind: ErrorKind, message: impl Into<String>, pos: Pos) -> Self {
        NumFuError {
            kind,
            message: message.into(),
            pos: Some(pos),
            module: None,
            name: None,
        }
    }

    pub fn with_name(mut self, name: Option<String>) -> Self {
        self.name = name;
        self
    }

    /// Attach the owning module if no deeper frame already did.
    pub fn in_module(mut self, module: &str) -> Self {
        if self.module.is_none() {
            self.module = Some(module.to_string());
        }
        self
    }

    pub fn display_name(&self) -> &str {
        match &self.name {
            Some(n) => n,
            None => match self.kind {
                ErrorKind::Syntax => "SyntaxError",
                ErrorKind::Name => "NameError",
                ErrorKind::Type => "TypeError",
                ErrorKind::Value => "ValueError",
                ErrorKind::Index => "IndexError",
                ErrorKind::Runtime => "RuntimeError",
                ErrorKind::Assertion => "AssertionError",
                ErrorKind::Recursion => "RecursionError",
                ErrorKind::Import => "ImportError",
                ErrorKind::Exit => "Exit",
            },
        }
    }
}

/// 1-based line/column pair derived from a byte span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineCol {
    pub line: usize,
    pub col: usize,
    pub end_line: usize,
    pub end_col: usize,
}

impl LineCol {
    pub fn from_span(pos: &Pos, code: &str) -> LineCol {
        let (line, col) = locate(code, pos.start);
        let (end_line, end_col) = locate(code, pos.end);
        LineCol {
            line,
            col,
            end_line,
            end_col,
        }
    }

    /// Split a multi-line span into one underlined range per line.
    fn split(&self, code: &str) -> Vec<LineCol> {
        let lines: Vec<&str> = code.lines().collect();
        (self.line..=self.end_line)
            .map(|line| {
                let width = lines
                    .get(line - 1)
                    .map(|l| l.chars().count() + 1)
                    .unwrap_or(1);
                LineCol {
                    line,
                    col: if line == self.line { self.col } else { 1 },
                    end_line: line,
                    end_col: if line == self.end_line {
                        self.end_col
                    } else {
                        width
                    },
                }
            })
            .collect()
    }
}

fn locate(code: &str, offset: usize) -> (usize, usize) {
    let offset = offset.min(code.len());
    let before = &code[..offset];
    let line = before.matches('\n').count() + 1;
    let line_start = before.rfind('\n').map(|i| i + 1).unwrap_or(0);
    let col = code[line_start..offset].chars().count() + 1;
    (line, col)
}

/// Width of the excerpt window on each side of the highlighted span.
const EXCERPT: usize = 30;

/// Render a full diagnostic: location header, source excerpt with caret
/// underlining, and the error line itself.
pub fn report(err: &NumFuError, path: &str, code: &str) -> String {
    let mut out = String::new();
    match err.pos {
        Some(pos) => {
            let lc = LineCol::from_span(&pos, code);
            out.push_str(&format!("[at {}:{}:{}]\n", path, lc.line, lc.col));
            let lines: Vec<&str> = code.lines().collect();
            if lc.end_line <= lines.len() && lc.line >= 1 {
                for piece in lc.split(code) {
                    let src: Vec<char> = lines[piece.line - 1].chars().collect();
                    let col = piece.col.min(src.len() + 1);
                    let end_col = piece.end_col.clamp(col, src.len() + 1);
                    let start = col.saturating_sub(1).saturating_sub(EXCERPT);
                    let end = (col - 1 + EXCERPT).min(src.len());
                    let prefix = if start > 0 { "..." } else { "" };
                    let suffix = if end < src.len() { "..." } else { "" };
                    let shown: String = src[start..end].iter().collect();
                    let label = format!("[{}]   ", piece.line);
                    out.push_str(&format!("{label}{prefix}{shown}{suffix}\n"));
                    let pad = label.chars().count() + prefix.len() + (col - 1 - start);
                    let width = (end_col - col).max(1);
                    out.push_str(&format!("{}{}\n", " ".repeat(pad), "^".repeat(width)));
                }
            }
        }
        None => {
            out.push_str(&format!("[at {}:?:?]\n", path));
        }
    }
    out.push_str(&format!(
        "{}{}{}",
        err.display_name(),
        if err.message.is_empty() { "" } else { ": " },
        err.message
    ));
    out
}

pub fn compress_code(code: &str) -> Vec<u8> {
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use std::io::Write;
    let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
    // Writing into a Vec cannot fail.
    let _ = enc.write_all(code.as_bytes());
    enc.finish().unwrap_or_default()
}

pub fn decompress_code(bytes: &[u8]) -> String {
    let mut dec = flate2::read::ZlibDecoder::new(bytes);
    let mut out = String::new();
    if dec.read_to_string(&mut out).is_err() {
        return String::new();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = NumFuError::new(ErrorKind::Type, "bad type");
        assert_eq!(e.to_string(), "TypeError: bad type");

        let named = NumFuError::new(ErrorKind::Runtime, "boom").with_name(Some("MyError".into()));
        assert_eq!(named.to_string(), "MyError: boom");
    }

    #[test]
    fn test_locate() {
        let code = "abc\ndef\nghi";
        assert_eq!(locate(code, 0), (1, 1));
        assert_eq!(locate(code, 2), (1, 3));
        assert_eq!(locate(code, 4), (2, 1));
        assert_eq!(locate(code, 9), (3, 2));
    }

    #[test]
    fn test_report_underlines_span() {
        let code = "let x = foo + 1";
        let err = NumFuError::at(ErrorKind::Name, "'foo' is not defined", Pos::new(8, 11));
        let rendered = report(&err, "test.nfu", code);
        assert!(rendered.contains("[at test.nfu:1:9]"), "{rendered}");
        assert!(rendered.contains("foo + 1"), "{rendered}");
        assert!(rendered.contains("^^^"), "{rendered}");
        assert!(rendered.ends_with("NameError: 'foo' is not defined"), "{rendered}");
    }

    #[test]
    fn test_report_without_pos() {
        let err = NumFuError::new(ErrorKind::Import, "cycle");
        let rendered = report(&err, "m.nfu", "code");
        assert!(rendered.contains("[at m.nfu:?:?]"));
        assert!(rendered.contains("ImportError: cycle"));
    }

    #[test]
    fn test_multiline_span_splits() {
        let code = "aaa\nbbb\nccc";
        let err = NumFuError::at(ErrorKind::Syntax, "bad", Pos::new(1, 9));
        let rendered = report(&err, "m.nfu", code);
        assert!(rendered.contains("[1]"), "{rendered}");
        assert!(rendered.contains("[2]"), "{rendered}");
        assert!(rendered.contains("[3]"), "{rendered}");
    }

    #[test]
    fn test_compress_roundtrip() {
        let code = "let x = 1\nx + 2";
        let packed = compress_code(code);
        assert_eq!(decompress_code(&packed), code);
    }
}
