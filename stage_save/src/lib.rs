//! Save-file statement grammar shared by the engine's encoder and decoder.
//!
//! A save file is plain text with one assignment per line, for example
//! `scenes.cabin.items.key1.x = 120`. Every statement is valid Lua, so a save
//! can be replayed by a stock interpreter, but the engine parses files with
//! this crate instead of executing them.

mod escape;
mod statement;

use thiserror::Error;

pub use escape::{escape_string, unescape_string};
pub use statement::{encode_save, parse_save, parse_statement, PathKey, SavePath, SaveValue, Statement};

/// Lua 5.1 reserved words. These can never appear as bare path segments.
pub const RESERVED_WORDS: &[&str] = &[
    "and", "break", "do", "else", "elseif", "end", "false", "for", "function", "if", "in",
    "local", "nil", "not", "or", "repeat", "return", "then", "true", "until", "while",
];

/// Returns true when `bytes` can be written as a bare `.name` path segment.
pub fn is_identifier(bytes: &[u8]) -> bool {
    let Some((first, rest)) = bytes.split_first() else {
        return false;
    };
    if !(first.is_ascii_alphabetic() || *first == b'_') {
        return false;
    }
    if !rest.iter().all(|b| b.is_ascii_alphanumeric() || *b == b'_') {
        return false;
    }
    let text = std::str::from_utf8(bytes).unwrap_or_default();
    !RESERVED_WORDS.contains(&text)
}

/// Errors produced while parsing a single statement. Columns are 1-based.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("expected identifier at column {0}")]
    ExpectedIdentifier(usize),
    #[error("'{0}' is a reserved word")]
    ReservedWord(String),
    #[error("expected ']' at column {0}")]
    ExpectedBracket(usize),
    #[error("expected '=' at column {0}")]
    ExpectedAssignment(usize),
    #[error("expected a value at column {0}")]
    ExpectedValue(usize),
    #[error("invalid number literal '{0}'")]
    InvalidNumber(String),
    #[error("unterminated string starting at column {0}")]
    UnterminatedString(usize),
    #[error("invalid escape '\\{escape}' at column {column}")]
    InvalidEscape { escape: char, column: usize },
    #[error("decimal escape \\{0} is out of range")]
    EscapeOutOfRange(u32),
    #[error("unexpected input at column {0}")]
    TrailingInput(usize),
}

/// A parse failure located in a save file.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SaveError {
    #[error("line {line}: {source}")]
    Parse {
        line: usize,
        #[source]
        source: ParseError,
    },
}

impl SaveError {
    pub fn line(&self) -> usize {
        match self {
            SaveError::Parse { line, .. } => *line,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_exclude_keywords_and_digits() {
        assert!(is_identifier(b"key1"));
        assert!(is_identifier(b"_private"));
        assert!(!is_identifier(b"1st"));
        assert!(!is_identifier(b"end"));
        assert!(!is_identifier(b"with space"));
        assert!(!is_identifier(b""));
    }

    #[test]
    fn save_error_reports_line() {
        let err = parse_save("game.scene = \"cabin\"\nbroken line\n").unwrap_err();
        assert_eq!(err.line(), 2);
        assert!(err.to_string().starts_with("line 2:"));
    }
}
