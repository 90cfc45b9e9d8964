//! Single-pass scanner over UTF-8 source.
//!
//! Whitespace (space, tab, CR) is skipped; LF is its own token so the parser
//! can enforce line structure. Unknown single characters become `Error`
//! tokens instead of aborting the stream.

use crate::token::{lookup_ident, Loc, Token, TokenKind};

pub struct Lexer {
    file: String,
    chars: Vec<char>,
    pos: usize,
    line: u32,
    col: u32,
}

impl Lexer {
    pub fn new(file: impl Into<String>, input: &str) -> Self {
        Self {
            file: file.into(),
            chars: input.chars().collect(),
            pos: 0,
            line: 1,
            col: 1,
        }
    }

    fn current(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn advance(&mut self) {
        if let Some(ch) = self.current() {
            if ch == '\n' {
                self.line += 1;
                self.col = 1;
            } else {
                self.col += 1;
            }
            self.pos += 1;
        }
    }

    fn loc(&self) -> Loc {
        Loc::new(self.file.clone(), self.line, self.col)
    }

    pub fn next_token(&mut self) -> Token {
        self.skip_whitespace();
        let loc = self.loc();

        let Some(ch) = self.current() else {
            return Token {
                kind: TokenKind::Eof,
                value: String::new(),
                loc,
            };
        };

        match ch {
            '"' => {
                let value = self.read_string();
                Token {
                    kind: TokenKind::Str,
                    value,
                    loc,
                }
            }
            '=' => {
                self.advance();
                Token {
                    kind: TokenKind::Eq,
                    value: "=".to_string(),
                    loc,
                }
            }
            ':' => {
                self.advance();
                Token {
                    kind: TokenKind::Colon,
                    value: ":".to_string(),
                    loc,
                }
            }
            '\n' => {
                self.advance();
                Token {
                    kind: TokenKind::Newline,
                    value: "\n".to_string(),
                    loc,
                }
            }
            _ if is_ident_start(ch) || ch.is_numeric() || ch == '-' => {
                let value = self.read_identifier();
                Token {
                    kind: lookup_ident(&value),
                    value,
                    loc,
                }
            }
            _ => {
                self.advance();
                Token {
                    kind: TokenKind::Error,
                    value: ch.to_string(),
                    loc,
                }
            }
        }
    }

    /// Drains the remaining input into a token vector, ending with `Eof`.
    pub fn tokenize(&mut self) -> Vec<Token> {
        let mut out = Vec::new();
        loop {
            let tok = self.next_token();
            let done = tok.kind == TokenKind::Eof;
            out.push(tok);
            if done {
                return out;
            }
        }
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.current(), Some(' ') | Some('\t') | Some('\r')) {
            self.advance();
        }
    }

    fn read_string(&mut self) -> String {
        self.advance(); // opening quote
        let mut s = String::new();
        while let Some(ch) = self.current() {
            if ch == '"' {
                break;
            }
            if ch == '\\' {
                self.advance();
                match self.current() {
                    Some('n') => s.push('\n'),
                    Some('t') => s.push('\t'),
                    Some('r') => s.push('\r'),
                    Some('"') => s.push('"'),
                    Some('\\') => s.push('\\'),
                    Some(other) => {
                        // Unknown escape: keep the backslash and the character.
                        s.push('\\');
                        s.push(other);
                    }
                    None => {
                        s.push('\\');
                        return s;
                    }
                }
            } else {
                s.push(ch);
            }
            self.advance();
        }
        self.advance(); // closing quote
        s
    }

    fn read_identifier(&mut self) -> String {
        let mut s = String::new();
        if self.current() == Some('-') {
            s.push('-');
            self.advance();
        }
        while let Some(ch) = self.current() {
            if is_ident_start(ch) || ch.is_numeric() || ch == '.' || ch == '_' {
                s.push(ch);
                self.advance();
            } else {
                break;
            }
        }
        s
    }
}

fn is_ident_start(ch: char) -> bool {
    ch.is_alphabetic() || ch == '_'
}
