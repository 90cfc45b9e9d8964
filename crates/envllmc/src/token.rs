use std::fmt;

/// Source location. Line and column are 1-based; the column counts characters
/// within the line, so a statement indented by two spaces starts at column 3.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Loc {
    pub file: String,
    pub line: u32,
    pub col: u32,
}

impl Loc {
    pub fn new(file: impl Into<String>, line: u32, col: u32) -> Self {
        Self {
            file: file.into(),
            line,
            col,
        }
    }
}

impl fmt::Display for Loc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.col)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Eof,
    Error,

    // Headers and structure keywords
    Rlmdsl,
    Dialect,
    Ext,
    Task,
    Input,
    Output,
    Cell,
    Into,
    SetFinal,
    Assert,
    Print,
    Requires,
    Capability,
    ForEach,
    In,
    Limit,
    If,
    Else,
    End,

    // Literals
    Ident,
    Str,
    Int,
    Bool,
    Null,

    // Symbols
    Colon,
    Eq,
    Newline,
}

impl TokenKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TokenKind::Eof => "EOF",
            TokenKind::Error => "ERROR",
            TokenKind::Rlmdsl => "RLMDSL",
            TokenKind::Dialect => "DIALECT",
            TokenKind::Ext => "EXT",
            TokenKind::Task => "TASK",
            TokenKind::Input => "INPUT",
            TokenKind::Output => "OUTPUT",
            TokenKind::Cell => "CELL",
            TokenKind::Into => "INTO",
            TokenKind::SetFinal => "SET_FINAL",
            TokenKind::Assert => "ASSERT",
            TokenKind::Print => "PRINT",
            TokenKind::Requires => "REQUIRES",
            TokenKind::Capability => "capability",
            TokenKind::ForEach => "FOR_EACH",
            TokenKind::In => "IN",
            TokenKind::Limit => "LIMIT",
            TokenKind::If => "IF",
            TokenKind::Else => "ELSE",
            TokenKind::End => "END",
            TokenKind::Ident => "IDENT",
            TokenKind::Str => "STRING",
            TokenKind::Int => "INT",
            TokenKind::Bool => "BOOL",
            TokenKind::Null => "NULL",
            TokenKind::Colon => ":",
            TokenKind::Eq => "=",
            TokenKind::Newline => "NEWLINE",
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub value: String,
    pub loc: Loc,
}

/// Keyword table. Barewords made entirely of digits (with an optional leading
/// `-`) classify as `Int`; everything else falls through to `Ident`.
pub fn lookup_ident(ident: &str) -> TokenKind {
    match ident {
        "RLMDSL" => TokenKind::Rlmdsl,
        "DIALECT" => TokenKind::Dialect,
        "EXT" => TokenKind::Ext,
        "TASK" => TokenKind::Task,
        "INPUT" => TokenKind::Input,
        "OUTPUT" => TokenKind::Output,
        "CELL" => TokenKind::Cell,
        "INTO" => TokenKind::Into,
        "SET_FINAL" => TokenKind::SetFinal,
        "ASSERT" => TokenKind::Assert,
        "PRINT" => TokenKind::Print,
        "REQUIRES" => TokenKind::Requires,
        "capability" => TokenKind::Capability,
        "FOR_EACH" => TokenKind::ForEach,
        "IN" => TokenKind::In,
        "LIMIT" => TokenKind::Limit,
        "IF" => TokenKind::If,
        "ELSE" => TokenKind::Else,
        "END" => TokenKind::End,
        "true" | "false" => TokenKind::Bool,
        "null" => TokenKind::Null,
        _ => {
            let digits = ident.strip_prefix('-').unwrap_or(ident);
            if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
                TokenKind::Int
            } else {
                TokenKind::Ident
            }
        }
    }
}
