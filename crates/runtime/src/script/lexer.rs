//! Tokenizer for action code.
//!
//! Produces a flat token stream with explicit `Newline`, `Indent` and
//! `Dedent` tokens so the parser never looks at whitespace. Newlines inside
//! brackets are ignored, as is a backslash at the end of a line.

use crate::error::{ScriptError, ScriptResult};

#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    Ident(String),
    Kw(Kw),
    Int(i64),
    Float(f64),
    Str(String),
    /// Body of an f-string with escapes resolved; `{...}` parts are parsed
    /// later.
    FStr(String),
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Colon,
    Dot,
    Semi,
    Plus,
    Minus,
    Star,
    Slash,
    DoubleSlash,
    Percent,
    DoubleStar,
    Assign,
    PlusAssign,
    MinusAssign,
    StarAssign,
    SlashAssign,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    Newline,
    Indent,
    Dedent,
    Eof,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kw {
    If,
    Elif,
    Else,
    For,
    While,
    In,
    Not,
    And,
    Or,
    Is,
    Break,
    Continue,
    Return,
    Pass,
    Import,
    From,
    As,
    Def,
    True,
    False,
    None,
    Await,
    Assert,
}

impl Kw {
    fn from_word(word: &str) -> Option<Kw> {
        Some(match word {
            "if" => Kw::If,
            "elif" => Kw::Elif,
            "else" => Kw::Else,
            "for" => Kw::For,
            "while" => Kw::While,
            "in" => Kw::In,
            "not" => Kw::Not,
            "and" => Kw::And,
            "or" => Kw::Or,
            "is" => Kw::Is,
            "break" => Kw::Break,
            "continue" => Kw::Continue,
            "return" => Kw::Return,
            "pass" => Kw::Pass,
            "import" => Kw::Import,
            "from" => Kw::From,
            "as" => Kw::As,
            "def" => Kw::Def,
            "True" | "true" => Kw::True,
            "False" | "false" => Kw::False,
            "None" | "null" => Kw::None,
            "await" => Kw::Await,
            "assert" => Kw::Assert,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub tok: Tok,
    pub line: usize,
}

pub fn tokenize(source: &str) -> ScriptResult<Vec<Token>> {
    Lexer::new(source).run()
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    depth: usize,
    indents: Vec<usize>,
    tokens: Vec<Token>,
}

impl Lexer {
    fn new(source: &str) -> Self {
        Self {
            chars: source.replace("\r\n", "\n").chars().collect(),
            pos: 0,
            line: 1,
            depth: 0,
            indents: vec![0],
            tokens: Vec::new(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn push(&mut self, tok: Tok) {
        self.tokens.push(Token { tok, line: self.line });
    }

    fn error(&self, message: impl Into<String>) -> ScriptError {
        ScriptError::syntax(self.line, message)
    }

    fn run(mut self) -> ScriptResult<Vec<Token>> {
        let mut at_line_start = true;
        while self.pos < self.chars.len() {
            if at_line_start && self.depth == 0 {
                if self.handle_indentation()? {
                    continue;
                }
                at_line_start = false;
            }
            let Some(c) = self.peek() else { break };
            match c {
                '\n' => {
                    self.pos += 1;
                    if self.depth == 0 {
                        self.push_newline();
                        at_line_start = true;
                    }
                    self.line += 1;
                }
                ' ' | '\t' => self.pos += 1,
                '#' => self.skip_comment(),
                '\\' if self.peek_at(1) == Some('\n') => {
                    self.pos += 2;
                    self.line += 1;
                }
                '0'..='9' => self.number()?,
                '.' if self.peek_at(1).is_some_and(|d| d.is_ascii_digit()) => self.number()?,
                '"' | '\'' => {
                    let s = self.string(false)?;
                    self.push(Tok::Str(s));
                }
                c if c.is_alphabetic() || c == '_' => self.word()?,
                _ => self.operator()?,
            }
        }
        self.push_newline();
        while self.indents.len() > 1 {
            self.indents.pop();
            self.push(Tok::Dedent);
        }
        self.push(Tok::Eof);
        Ok(self.tokens)
    }

    fn push_newline(&mut self) {
        let redundant = matches!(
            self.tokens.last().map(|t| &t.tok),
            None | Some(Tok::Newline) | Some(Tok::Indent) | Some(Tok::Dedent)
        );
        if !redundant {
            self.push(Tok::Newline);
        }
    }

    /// Measure the indentation of a new logical line. Returns `true` when
    /// the line was blank or a comment and has been consumed.
    fn handle_indentation(&mut self) -> ScriptResult<bool> {
        let mut width = 0;
        while let Some(c) = self.peek() {
            match c {
                ' ' => width += 1,
                '\t' => width += 4 - width % 4,
                _ => break,
            }
            self.pos += 1;
        }
        match self.peek() {
            None => return Ok(true),
            Some('\n') => {
                self.pos += 1;
                self.line += 1;
                return Ok(true);
            }
            Some('#') => {
                self.skip_comment();
                if self.peek() == Some('\n') {
                    self.pos += 1;
                    self.line += 1;
                }
                return Ok(true);
            }
            _ => {}
        }

        let current = self.indents.last().copied().unwrap_or(0);
        if width > current {
            self.indents.push(width);
            self.push(Tok::Indent);
        } else if width < current {
            while self.indents.last().is_some_and(|&w| w > width) {
                self.indents.pop();
                self.push(Tok::Dedent);
            }
            if self.indents.last() != Some(&width) {
                return Err(self.error("unindent does not match any outer indentation level"));
            }
        }
        Ok(false)
    }

    fn skip_comment(&mut self) {
        while self.peek().is_some_and(|c| c != '\n') {
            self.pos += 1;
        }
    }

    fn number(&mut self) -> ScriptResult<()> {
        let start = self.pos;
        let mut is_float = false;
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() || c == '_' {
                self.pos += 1;
            } else if c == '.' && !is_float {
                is_float = true;
                self.pos += 1;
            } else if (c == 'e' || c == 'E')
                && self
                    .peek_at(1)
                    .is_some_and(|n| n.is_ascii_digit() || ((n == '-' || n == '+') && self.peek_at(2).is_some_and(|d| d.is_ascii_digit())))
            {
                is_float = true;
                self.pos += 2;
            } else {
                break;
            }
        }
        let text: String = self.chars[start..self.pos].iter().filter(|&&c| c != '_').collect();
        let tok = if is_float {
            Tok::Float(
                text.parse()
                    .map_err(|_| self.error(format!("invalid number literal '{text}'")))?,
            )
        } else {
            Tok::Int(
                text.parse()
                    .map_err(|_| self.error(format!("integer literal '{text}' is too large")))?,
            )
        };
        self.push(tok);
        Ok(())
    }

    fn word(&mut self) -> ScriptResult<()> {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_alphanumeric() || c == '_') {
            self.pos += 1;
        }
        let word: String = self.chars[start..self.pos].iter().collect();

        // string prefixes: f"..", r"..", rf"..", b".." is not supported
        if matches!(self.peek(), Some('"') | Some('\'')) {
            let lower = word.to_ascii_lowercase();
            match lower.as_str() {
                "f" => {
                    let s = self.string(false)?;
                    self.push(Tok::FStr(s));
                    return Ok(());
                }
                "r" => {
                    let s = self.string(true)?;
                    self.push(Tok::Str(s));
                    return Ok(());
                }
                "rf" | "fr" => {
                    let s = self.string(true)?;
                    self.push(Tok::FStr(s));
                    return Ok(());
                }
                _ => {}
            }
        }

        match Kw::from_word(&word) {
            Some(kw) => self.push(Tok::Kw(kw)),
            None => self.push(Tok::Ident(word)),
        }
        Ok(())
    }

    fn string(&mut self, raw: bool) -> ScriptResult<String> {
        let start_line = self.line;
        let quote = self.peek().ok_or_else(|| self.error("expected string"))?;
        let triple = self.peek_at(1) == Some(quote) && self.peek_at(2) == Some(quote);
        self.pos += if triple { 3 } else { 1 };

        let mut out = String::new();
        loop {
            let Some(c) = self.peek() else {
                return Err(ScriptError::syntax(start_line, "unterminated string literal"));
            };
            if c == quote {
                if !triple {
                    self.pos += 1;
                    return Ok(out);
                }
                if self.peek_at(1) == Some(quote) && self.peek_at(2) == Some(quote) {
                    self.pos += 3;
                    return Ok(out);
                }
            }
            if c == '\n' {
                if !triple {
                    return Err(ScriptError::syntax(start_line, "unterminated string literal"));
                }
                self.line += 1;
            }
            if c == '\\' && !raw {
                self.pos += 1;
                let escaped = self
                    .peek()
                    .ok_or_else(|| ScriptError::syntax(start_line, "unterminated string literal"))?;
                self.pos += 1;
                match escaped {
                    'n' => out.push('\n'),
                    't' => out.push('\t'),
                    'r' => out.push('\r'),
                    '0' => out.push('\0'),
                    '\\' => out.push('\\'),
                    '\'' => out.push('\''),
                    '"' => out.push('"'),
                    '\n' => self.line += 1,
                    'u' => {
                        let hex: String = (0..4).filter_map(|i| self.peek_at(i)).collect();
                        let ch = u32::from_str_radix(&hex, 16)
                            .ok()
                            .and_then(char::from_u32)
                            .ok_or_else(|| self.error("invalid \\u escape"))?;
                        self.pos += 4;
                        out.push(ch);
                    }
                    other => {
                        out.push('\\');
                        out.push(other);
                    }
                }
                continue;
            }
            out.push(c);
            self.pos += 1;
        }
    }

    fn operator(&mut self) -> ScriptResult<()> {
        let c = self.peek().ok_or_else(|| self.error("unexpected end of input"))?;
        let next = self.peek_at(1);
        let (tok, len) = match (c, next) {
            ('*', Some('*')) => (Tok::DoubleStar, 2),
            ('/', Some('/')) => (Tok::DoubleSlash, 2),
            ('=', Some('=')) => (Tok::EqEq, 2),
            ('!', Some('=')) => (Tok::NotEq, 2),
            ('<', Some('=')) => (Tok::Le, 2),
            ('>', Some('=')) => (Tok::Ge, 2),
            ('+', Some('=')) => (Tok::PlusAssign, 2),
            ('-', Some('=')) => (Tok::MinusAssign, 2),
            ('*', Some('=')) => (Tok::StarAssign, 2),
            ('/', Some('=')) => (Tok::SlashAssign, 2),
            ('(', _) => (Tok::LParen, 1),
            (')', _) => (Tok::RParen, 1),
            ('[', _) => (Tok::LBracket, 1),
            (']', _) => (Tok::RBracket, 1),
            ('{', _) => (Tok::LBrace, 1),
            ('}', _) => (Tok::RBrace, 1),
            (',', _) => (Tok::Comma, 1),
            (':', _) => (Tok::Colon, 1),
            ('.', _) => (Tok::Dot, 1),
            (';', _) => (Tok::Semi, 1),
            ('+', _) => (Tok::Plus, 1),
            ('-', _) => (Tok::Minus, 1),
            ('*', _) => (Tok::Star, 1),
            ('/', _) => (Tok::Slash, 1),
            ('%', _) => (Tok::Percent, 1),
            ('=', _) => (Tok::Assign, 1),
            ('<', _) => (Tok::Lt, 1),
            ('>', _) => (Tok::Gt, 1),
            (other, _) => return Err(self.error(format!("unexpected character '{other}'"))),
        };
        match tok {
            Tok::LParen | Tok::LBracket | Tok::LBrace => self.depth += 1,
            Tok::RParen | Tok::RBracket | Tok::RBrace => self.depth = self.depth.saturating_sub(1),
            _ => {}
        }
        self.pos += len;
        self.push(tok);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(source: &str) -> Vec<Tok> {
        tokenize(source).unwrap().into_iter().map(|t| t.tok).collect()
    }

    #[test]
    fn indentation_produces_blocks() {
        let tokens = toks("if x:\n    y = 1\nz = 2\n");
        assert_eq!(
            tokens,
            vec![
                Tok::Kw(Kw::If),
                Tok::Ident("x".into()),
                Tok::Colon,
                Tok::Newline,
                Tok::Indent,
                Tok::Ident("y".into()),
                Tok::Assign,
                Tok::Int(1),
                Tok::Newline,
                Tok::Dedent,
                Tok::Ident("z".into()),
                Tok::Assign,
                Tok::Int(2),
                Tok::Newline,
                Tok::Eof,
            ]
        );
    }

    #[test]
    fn brackets_span_lines() {
        let tokens = toks("x = [1,\n     2]\n");
        assert!(!tokens[..tokens.len() - 2].contains(&Tok::Newline));
        assert!(!tokens.contains(&Tok::Indent));
    }

    #[test]
    fn blank_lines_and_comments_are_skipped() {
        let tokens = toks("# setup\n\nx = 1  # one\n\n   # indented comment\ny = 2");
        let newlines = tokens.iter().filter(|t| **t == Tok::Newline).count();
        assert_eq!(newlines, 2);
        assert!(!tokens.contains(&Tok::Indent));
    }

    #[test]
    fn numbers_and_strings() {
        assert_eq!(
            toks("1_000 2.5 1e3 'a\\nb' \"\"\"multi\nline\"\"\" f\"{x}\" r'\\d'"),
            vec![
                Tok::Int(1000),
                Tok::Float(2.5),
                Tok::Float(1000.0),
                Tok::Str("a\nb".into()),
                Tok::Str("multi\nline".into()),
                Tok::FStr("{x}".into()),
                Tok::Str("\\d".into()),
                Tok::Newline,
                Tok::Eof,
            ]
        );
    }

    #[test]
    fn keywords_accept_both_spellings() {
        assert_eq!(
            toks("True null"),
            vec![Tok::Kw(Kw::True), Tok::Kw(Kw::None), Tok::Newline, Tok::Eof]
        );
    }

    #[test]
    fn bad_dedent_is_an_error() {
        let err = tokenize("if x:\n        y = 1\n    z = 2\n").unwrap_err();
        assert!(matches!(err, ScriptError::Syntax { line: 3, .. }));
    }

    #[test]
    fn unterminated_string() {
        assert!(matches!(
            tokenize("x = 'abc").unwrap_err(),
            ScriptError::Syntax { line: 1, .. }
        ));
    }
}
