use crate::diagnostic::Diagnostic;
use crate::lexeme::Lexeme;
use crate::span::{Span, Spanned};

pub(crate) struct Lexer<'src> {
    source: &'src [u8],
    file_id: u16,
    pos: usize,
    diagnostics: Vec<Diagnostic>,
    /// Open `(` and `[` count; newlines inside them are not separators.
    nesting: u32,
    /// Whether the previously emitted token was a separator (or nothing yet).
    at_line_start: bool,
}

impl<'src> Lexer<'src> {
    pub(crate) fn new(source: &'src str, file_id: u16) -> Self {
        Self {
            source: source.as_bytes(),
            file_id,
            pos: 0,
            diagnostics: Vec::new(),
            nesting: 0,
            at_line_start: true,
        }
    }

    pub(crate) fn tokenize(mut self) -> (Vec<Spanned<Lexeme>>, Vec<Diagnostic>) {
        let mut tokens = Vec::new();
        loop {
            let tok = self.next_token();
            let is_eof = tok.node == Lexeme::Eof;
            self.at_line_start = matches!(tok.node, Lexeme::Newline | Lexeme::Semicolon);
            tokens.push(tok);
            if is_eof {
                break;
            }
        }
        (tokens, self.diagnostics)
    }

    fn next_token(&mut self) -> Spanned<Lexeme> {
        loop {
            if let Some(newline) = self.skip_whitespace_and_comments() {
                return newline;
            }

            if self.pos >= self.source.len() {
                return self.make_token(Lexeme::Eof, self.pos, self.pos);
            }

            let start = self.pos;
            let ch = self.source[self.pos];

            if is_ident_start(ch) {
                return self.scan_ident_or_keyword();
            }

            if ch.is_ascii_digit() {
                return self.scan_number();
            }

            if ch == b'"' || ch == b'\'' {
                return self.scan_string(ch);
            }

            if let Some(tok) = self.scan_symbol(start) {
                return tok;
            }
            // scan_symbol returned None: error recorded, keep going
        }
    }

    /// Skips blanks and `#` comments. Returns a `Newline` token when a line
    /// break ends a statement (outside brackets, not directly after another
    /// separator).
    fn skip_whitespace_and_comments(&mut self) -> Option<Spanned<Lexeme>> {
        loop {
            while self.pos < self.source.len() && self.source[self.pos].is_ascii_whitespace() {
                if self.source[self.pos] == b'\n' && self.nesting == 0 && !self.at_line_start {
                    let start = self.pos;
                    self.pos += 1;
                    return Some(self.make_token(Lexeme::Newline, start, start + 1));
                }
                self.pos += 1;
            }

            if self.pos < self.source.len() && self.source[self.pos] == b'#' {
                while self.pos < self.source.len() && self.source[self.pos] != b'\n' {
                    self.pos += 1;
                }
                continue;
            }

            return None;
        }
    }

    fn scan_ident_or_keyword(&mut self) -> Spanned<Lexeme> {
        let start = self.pos;
        while self.pos < self.source.len() && is_ident_continue(self.source[self.pos]) {
            self.pos += 1;
        }
        let text = String::from_utf8_lossy(&self.source[start..self.pos]).into_owned();
        let token = Lexeme::from_keyword(&text).unwrap_or(Lexeme::Ident(text));
        self.make_token(token, start, self.pos)
    }

    fn scan_number(&mut self) -> Spanned<Lexeme> {
        let start = self.pos;

        if self.source[self.pos] == b'0' && matches!(self.peek(), Some(b'x') | Some(b'X')) {
            self.pos += 2;
            let digits_start = self.pos;
            while self.pos < self.source.len()
                && (self.source[self.pos].is_ascii_hexdigit() || self.source[self.pos] == b'_')
            {
                self.pos += 1;
            }
            let text: String = String::from_utf8_lossy(&self.source[digits_start..self.pos])
                .chars()
                .filter(|c| *c != '_')
                .collect();
            return match u64::from_str_radix(&text, 16) {
                Ok(n) => self.make_token(Lexeme::Integer(n), start, self.pos),
                Err(_) => self.number_error(start, "invalid hexadecimal literal"),
            };
        }

        self.skip_digits();
        let mut is_float = false;
        if self.pos < self.source.len()
            && self.source[self.pos] == b'.'
            && self.peek().is_some_and(|c| c.is_ascii_digit())
        {
            is_float = true;
            self.pos += 1;
            self.skip_digits();
        }
        if self.pos < self.source.len() && matches!(self.source[self.pos], b'e' | b'E') {
            let mut look = self.pos + 1;
            if look < self.source.len() && matches!(self.source[look], b'+' | b'-') {
                look += 1;
            }
            if look < self.source.len() && self.source[look].is_ascii_digit() {
                is_float = true;
                self.pos = look;
                self.skip_digits();
            }
        }

        let text: String = String::from_utf8_lossy(&self.source[start..self.pos])
            .chars()
            .filter(|c| *c != '_')
            .collect();
        if is_float {
            match text.parse::<f64>() {
                Ok(x) => self.make_token(Lexeme::Float(x), start, self.pos),
                Err(_) => self.number_error(start, "invalid float literal"),
            }
        } else {
            match text.parse::<u64>() {
                Ok(n) => self.make_token(Lexeme::Integer(n), start, self.pos),
                Err(_) => self.number_error(start, "integer literal is too large"),
            }
        }
    }

    fn skip_digits(&mut self) {
        while self.pos < self.source.len()
            && (self.source[self.pos].is_ascii_digit() || self.source[self.pos] == b'_')
        {
            self.pos += 1;
        }
    }

    fn number_error(&mut self, start: usize, msg: &str) -> Spanned<Lexeme> {
        self.diagnostics.push(
            Diagnostic::error(
                msg.to_string(),
                Span::new(self.file_id, start as u32, self.pos as u32),
            )
            .with_help(format!("integer literals must fit in {} bits", u64::BITS)),
        );
        self.make_token(Lexeme::Integer(0), start, self.pos)
    }

    fn scan_string(&mut self, quote: u8) -> Spanned<Lexeme> {
        let start = self.pos;
        self.pos += 1;
        let mut text = Vec::new();
        loop {
            if self.pos >= self.source.len() || self.source[self.pos] == b'\n' {
                self.diagnostics.push(Diagnostic::error(
                    "unterminated string literal".to_string(),
                    Span::new(self.file_id, start as u32, self.pos as u32),
                ));
                break;
            }
            let ch = self.source[self.pos];
            self.pos += 1;
            if ch == quote {
                break;
            }
            if ch == b'\\' && self.pos < self.source.len() {
                let escaped = self.source[self.pos];
                self.pos += 1;
                text.push(match escaped {
                    b'n' => b'\n',
                    b't' => b'\t',
                    other => other,
                });
            } else {
                text.push(ch);
            }
        }
        let text = String::from_utf8_lossy(&text).into_owned();
        self.make_token(Lexeme::Str(text), start, self.pos)
    }

    fn scan_symbol(&mut self, start: usize) -> Option<Spanned<Lexeme>> {
        let ch = self.source[self.pos];
        self.pos += 1;

        let token = match ch {
            b'(' => {
                self.nesting += 1;
                Lexeme::LParen
            }
            b')' => {
                self.nesting = self.nesting.saturating_sub(1);
                Lexeme::RParen
            }
            b'[' => {
                self.nesting += 1;
                Lexeme::LBracket
            }
            b']' => {
                self.nesting = self.nesting.saturating_sub(1);
                Lexeme::RBracket
            }
            b'{' => Lexeme::LBrace,
            b'}' => Lexeme::RBrace,
            b',' => Lexeme::Comma,
            b':' => Lexeme::Colon,
            b';' => Lexeme::Semicolon,
            b'.' => Lexeme::Dot,
            b'~' => Lexeme::Tilde,
            b'=' => self.with_eq(Lexeme::EqEq, Lexeme::Eq),
            b'!' => {
                if self.peek_is(b'=') {
                    self.pos += 1;
                    Lexeme::NotEq
                } else {
                    self.diagnostics.push(
                        Diagnostic::error(
                            "unexpected '!'".to_string(),
                            Span::new(self.file_id, start as u32, self.pos as u32),
                        )
                        .with_help("use `not x` for logical negation or `~x` for bitwise".to_string()),
                    );
                    return None;
                }
            }
            b'<' => {
                if self.peek_is(b'<') {
                    self.pos += 1;
                    Lexeme::Shl
                } else {
                    self.with_eq(Lexeme::LtEq, Lexeme::Lt)
                }
            }
            b'>' => {
                if self.peek_is(b'>') {
                    self.pos += 1;
                    Lexeme::Shr
                } else {
                    self.with_eq(Lexeme::GtEq, Lexeme::Gt)
                }
            }
            b'+' => self.with_eq(Lexeme::PlusEq, Lexeme::Plus),
            b'-' => self.with_eq(Lexeme::MinusEq, Lexeme::Minus),
            b'*' => self.with_eq(Lexeme::StarEq, Lexeme::Star),
            b'/' => {
                if self.peek_is(b'/') {
                    self.pos += 1;
                    Lexeme::SlashSlash
                } else {
                    self.with_eq(Lexeme::SlashEq, Lexeme::Slash)
                }
            }
            b'%' => self.with_eq(Lexeme::PercentEq, Lexeme::Percent),
            b'&' => self.with_eq(Lexeme::AmpEq, Lexeme::Amp),
            b'|' => self.with_eq(Lexeme::PipeEq, Lexeme::Pipe),
            b'^' => self.with_eq(Lexeme::CaretEq, Lexeme::Caret),
            _ => {
                self.diagnostics.push(Diagnostic::error(
                    format!("unexpected character '{}'", ch as char),
                    Span::new(self.file_id, start as u32, self.pos as u32),
                ));
                return None;
            }
        };

        Some(self.make_token(token, start, self.pos))
    }

    /// `op=` if the next byte is `=`, otherwise plain `op`.
    fn with_eq(&mut self, compound: Lexeme, plain: Lexeme) -> Lexeme {
        if self.peek_is(b'=') {
            self.pos += 1;
            compound
        } else {
            plain
        }
    }

    /// One byte past the cursor.
    fn peek(&self) -> Option<u8> {
        self.source.get(self.pos + 1).copied()
    }

    fn peek_is(&self, ch: u8) -> bool {
        self.source.get(self.pos).copied() == Some(ch)
    }

    fn make_token(&self, token: Lexeme, start: usize, end: usize) -> Spanned<Lexeme> {
        Spanned::new(token, Span::new(self.file_id, start as u32, end as u32))
    }
}

fn is_ident_start(ch: u8) -> bool {
    ch.is_ascii_alphabetic() || ch == b'_'
}

fn is_ident_continue(ch: u8) -> bool {
    ch.is_ascii_alphanumeric() || ch == b'_'
}
