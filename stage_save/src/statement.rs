use std::fmt;

use crate::escape::{escape_string, read_quoted};
use crate::{is_identifier, ParseError, SaveError, RESERVED_WORDS};

/// One step below a root table.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PathKey {
    Index(i64),
    Str(Vec<u8>),
}

impl PathKey {
    pub fn name(name: &str) -> Self {
        PathKey::Str(name.as_bytes().to_vec())
    }
}

impl fmt::Display for PathKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathKey::Index(index) => write!(f, "[{index}]"),
            PathKey::Str(bytes) if is_identifier(bytes) => {
                // is_identifier only admits ASCII
                write!(f, ".{}", String::from_utf8_lossy(bytes))
            }
            PathKey::Str(bytes) => write!(f, "[{}]", escape_string(bytes)),
        }
    }
}

/// Location of a value: a global root followed by nested keys.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SavePath {
    root: String,
    keys: Vec<PathKey>,
}

impl SavePath {
    pub fn new(root: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            keys: Vec::new(),
        }
    }

    pub fn child(&self, key: PathKey) -> Self {
        let mut path = self.clone();
        path.keys.push(key);
        path
    }

    pub fn push(&mut self, key: PathKey) {
        self.keys.push(key);
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn keys(&self) -> &[PathKey] {
        &self.keys
    }
}

impl fmt::Display for SavePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.root)?;
        for key in &self.keys {
            write!(f, "{key}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SaveValue {
    /// An empty table constructor; nested fields follow as their own lines.
    Table,
    Bool(bool),
    Integer(i64),
    Number(f64),
    Str(Vec<u8>),
}

impl fmt::Display for SaveValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SaveValue::Table => f.write_str("{}"),
            SaveValue::Bool(value) => write!(f, "{value}"),
            SaveValue::Integer(value) => write!(f, "{value}"),
            SaveValue::Number(value) if value.is_nan() => f.write_str("0/0"),
            SaveValue::Number(value) if value.is_infinite() => {
                if *value > 0.0 {
                    f.write_str("math.huge")
                } else {
                    f.write_str("-math.huge")
                }
            }
            SaveValue::Number(value) => write!(f, "{value:?}"),
            SaveValue::Str(bytes) => f.write_str(&escape_string(bytes)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub path: SavePath,
    pub value: SaveValue,
}

impl Statement {
    pub fn new(path: SavePath, value: SaveValue) -> Self {
        Self { path, value }
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = {}", self.path, self.value)
    }
}

/// Renders statements one per line, in the order given.
pub fn encode_save(statements: &[Statement]) -> String {
    let mut out = String::new();
    for statement in statements {
        out.push_str(&statement.to_string());
        out.push('\n');
    }
    out
}

/// Parses a whole save file. Blank lines and `--` comment lines are skipped;
/// each statement is returned with its 1-based line number.
pub fn parse_save(text: &str) -> Result<Vec<(usize, Statement)>, SaveError> {
    let mut statements = Vec::new();
    for (index, line) in text.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with("--") {
            continue;
        }
        let statement = parse_statement(line).map_err(|source| SaveError::Parse {
            line: index + 1,
            source,
        })?;
        statements.push((index + 1, statement));
    }
    Ok(statements)
}

/// Parses a single `path = value` line.
pub fn parse_statement(line: &str) -> Result<Statement, ParseError> {
    let mut cursor = Cursor::new(line.as_bytes());
    cursor.skip_whitespace();
    let root = cursor.identifier()?;
    let mut path = SavePath::new(root);
    loop {
        match cursor.peek() {
            Some(b'.') => {
                cursor.bump();
                let name = cursor.identifier()?;
                path.push(PathKey::Str(name.into_bytes()));
            }
            Some(b'[') => {
                cursor.bump();
                let key = match cursor.peek() {
                    Some(b'"') => PathKey::Str(cursor.quoted()?),
                    Some(b'-' | b'0'..=b'9') => {
                        let column = cursor.column();
                        match cursor.number()? {
                            SaveValue::Integer(index) => PathKey::Index(index),
                            _ => return Err(ParseError::ExpectedValue(column)),
                        }
                    }
                    _ => return Err(ParseError::ExpectedValue(cursor.column())),
                };
                if cursor.peek() != Some(b']') {
                    return Err(ParseError::ExpectedBracket(cursor.column()));
                }
                cursor.bump();
                path.push(key);
            }
            _ => break,
        }
    }
    cursor.skip_whitespace();
    if cursor.peek() != Some(b'=') {
        return Err(ParseError::ExpectedAssignment(cursor.column()));
    }
    cursor.bump();
    cursor.skip_whitespace();
    let value = cursor.value()?;
    cursor.skip_whitespace();
    if !cursor.at_end() {
        return Err(ParseError::TrailingInput(cursor.column()));
    }
    Ok(Statement { path, value })
}

struct Cursor<'a> {
    bytes: &'a [u8],
    index: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, index: 0 }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.index).copied()
    }

    fn bump(&mut self) {
        self.index += 1;
    }

    fn column(&self) -> usize {
        self.index + 1
    }

    fn at_end(&self) -> bool {
        self.index >= self.bytes.len()
    }

    fn rest(&self) -> &'a [u8] {
        &self.bytes[self.index.min(self.bytes.len())..]
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(b' ' | b'\t' | b'\r')) {
            self.bump();
        }
    }

    fn identifier(&mut self) -> Result<String, ParseError> {
        let start = self.index;
        match self.peek() {
            Some(b) if b.is_ascii_alphabetic() || b == b'_' => self.bump(),
            _ => return Err(ParseError::ExpectedIdentifier(self.column())),
        }
        while matches!(self.peek(), Some(b) if b.is_ascii_alphanumeric() || b == b'_') {
            self.bump();
        }
        let name = String::from_utf8_lossy(&self.bytes[start..self.index]).into_owned();
        if RESERVED_WORDS.contains(&name.as_str()) {
            return Err(ParseError::ReservedWord(name));
        }
        Ok(name)
    }

    fn quoted(&mut self) -> Result<Vec<u8>, ParseError> {
        let (value, end) = read_quoted(self.bytes, self.index)?;
        self.index = end;
        Ok(value)
    }

    fn eat(&mut self, literal: &[u8]) -> bool {
        if self.rest().starts_with(literal) {
            self.index += literal.len();
            true
        } else {
            false
        }
    }

    fn value(&mut self) -> Result<SaveValue, ParseError> {
        if self.eat(b"{}") {
            return Ok(SaveValue::Table);
        }
        if self.eat(b"true") {
            return Ok(SaveValue::Bool(true));
        }
        if self.eat(b"false") {
            return Ok(SaveValue::Bool(false));
        }
        if self.eat(b"math.huge") {
            return Ok(SaveValue::Number(f64::INFINITY));
        }
        if self.eat(b"-math.huge") {
            return Ok(SaveValue::Number(f64::NEG_INFINITY));
        }
        if self.eat(b"0/0") {
            return Ok(SaveValue::Number(f64::NAN));
        }
        match self.peek() {
            Some(b'"') => self.quoted().map(SaveValue::Str),
            Some(b'-' | b'.' | b'0'..=b'9') => self.number(),
            _ => Err(ParseError::ExpectedValue(self.column())),
        }
    }

    fn number(&mut self) -> Result<SaveValue, ParseError> {
        let start = self.index;
        while matches!(self.peek(), Some(b) if b.is_ascii_alphanumeric() || matches!(b, b'.' | b'+' | b'-')) {
            self.bump();
        }
        let token = String::from_utf8_lossy(&self.bytes[start..self.index]).into_owned();
        let invalid = || ParseError::InvalidNumber(token.clone());
        if !token
            .bytes()
            .all(|b| b.is_ascii_digit() || matches!(b, b'.' | b'e' | b'E' | b'+' | b'-'))
        {
            return Err(invalid());
        }
        if token.contains(['.', 'e', 'E']) {
            return token.parse::<f64>().map(SaveValue::Number).map_err(|_| invalid());
        }
        match token.parse::<i64>() {
            Ok(value) => Ok(SaveValue::Integer(value)),
            Err(_) => token.parse::<f64>().map(SaveValue::Number).map_err(|_| invalid()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item_path(id: &str) -> SavePath {
        SavePath::new("scenes")
            .child(PathKey::name("cabin"))
            .child(PathKey::name("items"))
            .child(PathKey::name(id))
    }

    #[test]
    fn renders_identifier_and_bracket_keys() {
        let path = item_path("key1").child(PathKey::name("x"));
        assert_eq!(path.to_string(), "scenes.cabin.items.key1.x");

        let odd = SavePath::new("game")
            .child(PathKey::name("end"))
            .child(PathKey::name("two words"))
            .child(PathKey::Index(3));
        assert_eq!(odd.to_string(), r#"game["end"]["two words"][3]"#);
    }

    #[test]
    fn bracket_keys_survive_parsing() {
        let path = SavePath::new("inventory_items")
            .child(PathKey::name("odd id"))
            .child(PathKey::Index(3))
            .child(PathKey::name("end"));
        let statement = Statement::new(path.clone(), SaveValue::Bool(true));
        let line = statement.to_string();
        assert_eq!(line, r#"inventory_items["odd id"][3]["end"] = true"#);

        let parsed = parse_statement(&line).unwrap();
        assert_eq!(parsed.path, path);
        assert_eq!(parsed, statement);

        let parsed = parse_statement("scenes.cabin.items[-2].x = 1").unwrap();
        assert_eq!(parsed.path.keys().len(), 4);
        assert_eq!(parsed.path.keys()[2], PathKey::Index(-2));
    }

    #[test]
    fn parses_table_and_scalar_statements() {
        let parsed = parse_statement("scenes.cabin.items = {}").unwrap();
        assert_eq!(parsed.value, SaveValue::Table);
        assert_eq!(parsed.path.root(), "scenes");
        assert_eq!(parsed.path.keys().len(), 2);

        let parsed = parse_statement("player.x   =  -12").unwrap();
        assert_eq!(parsed.value, SaveValue::Integer(-12));

        let parsed = parse_statement("player.scale = 0.75").unwrap();
        assert_eq!(parsed.value, SaveValue::Number(0.75));

        let parsed = parse_statement("player.visible = false").unwrap();
        assert_eq!(parsed.value, SaveValue::Bool(false));
    }

    #[test]
    fn string_values_keep_quotes_and_newlines() {
        let statement = Statement::new(
            item_path("note").child(PathKey::name("text")),
            SaveValue::Str(b"he said \"run\"\nthen left".to_vec()),
        );
        let line = statement.to_string();
        assert!(!line.contains('\n'));
        assert_eq!(parse_statement(&line).unwrap(), statement);
    }

    #[test]
    fn non_finite_numbers_use_lua_expressions() {
        assert_eq!(SaveValue::Number(f64::INFINITY).to_string(), "math.huge");
        assert_eq!(SaveValue::Number(f64::NEG_INFINITY).to_string(), "-math.huge");
        assert_eq!(SaveValue::Number(f64::NAN).to_string(), "0/0");

        let parsed = parse_statement("game.limit = -math.huge").unwrap();
        assert_eq!(parsed.value, SaveValue::Number(f64::NEG_INFINITY));
        let parsed = parse_statement("game.unknown = 0/0").unwrap();
        assert!(matches!(parsed.value, SaveValue::Number(v) if v.is_nan()));
    }

    #[test]
    fn floats_keep_a_fractional_marker() {
        assert_eq!(SaveValue::Number(2.0).to_string(), "2.0");
        let parsed = parse_statement("player.scale = 2.0").unwrap();
        assert_eq!(parsed.value, SaveValue::Number(2.0));
    }

    #[test]
    fn rejects_malformed_lines() {
        assert_eq!(
            parse_statement("= 1"),
            Err(ParseError::ExpectedIdentifier(1))
        );
        assert_eq!(
            parse_statement("game.end = 1"),
            Err(ParseError::ReservedWord("end".to_string()))
        );
        assert_eq!(
            parse_statement("game[\"a\" = 1"),
            Err(ParseError::ExpectedBracket(9))
        );
        assert_eq!(
            parse_statement("game.x 1"),
            Err(ParseError::ExpectedAssignment(8))
        );
        assert_eq!(
            parse_statement("game.x = inf"),
            Err(ParseError::ExpectedValue(10))
        );
        assert_eq!(
            parse_statement("game.x = 12abc"),
            Err(ParseError::InvalidNumber("12abc".to_string()))
        );
        assert_eq!(
            parse_statement("game.x = 1 2"),
            Err(ParseError::TrailingInput(12))
        );
    }

    #[test]
    fn save_files_skip_blank_and_comment_lines() {
        let text = "-- slot one\n\ngame.scene = \"cabin\"\r\nplayer = {}\n";
        let parsed = parse_save(text).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].0, 3);
        assert_eq!(parsed[0].1.value, SaveValue::Str(b"cabin".to_vec()));
        assert_eq!(parsed[1].0, 4);
    }

    #[test]
    fn encode_writes_one_line_per_statement() {
        let statements = vec![
            Statement::new(SavePath::new("player"), SaveValue::Table),
            Statement::new(
                SavePath::new("player").child(PathKey::name("x")),
                SaveValue::Integer(40),
            ),
        ];
        assert_eq!(encode_save(&statements), "player = {}\nplayer.x = 40\n");
    }

    #[test]
    fn integer_keys_sort_before_string_keys() {
        let mut keys = vec![PathKey::name("a"), PathKey::Index(2), PathKey::Index(1)];
        keys.sort();
        assert_eq!(keys, vec![PathKey::Index(1), PathKey::Index(2), PathKey::name("a")]);
    }
}
