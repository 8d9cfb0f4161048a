//! Tokenizer for formula text

/// Formula tokens
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Numeric literal
    Number(f64),
    /// Field id, `now` or function name; `[id]` for ids that are not plain names
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Caret,
    LParen,
    RParen,
    Comma,
}

/// A token and the char column (1-based) it starts at
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub column: usize,
}

/// Lexing failure with its column
#[derive(Debug, Clone, PartialEq)]
pub struct LexError {
    pub column: usize,
    pub message: String,
}

pub struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    input: &'a str,
    column: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            chars: input.char_indices().peekable(),
            input,
            column: 1,
        }
    }

    /// Tokenize the whole input
    pub fn tokenize(mut self) -> Result<Vec<Spanned>, LexError> {
        let mut tokens = Vec::new();
        while let Some(token) = self.next_token()? {
            tokens.push(token);
        }
        Ok(tokens)
    }

    fn advance(&mut self) -> Option<(usize, char)> {
        let next = self.chars.next();
        if next.is_some() {
            self.column += 1;
        }
        next
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().map(|&(_, c)| c)
    }

    fn next_token(&mut self) -> Result<Option<Spanned>, LexError> {
        while self.peek().is_some_and(char::is_whitespace) {
            self.advance();
        }

        let column = self.column;
        let Some((start, c)) = self.advance() else {
            return Ok(None);
        };

        let token = match c {
            '+' => Token::Plus,
            '-' => Token::Minus,
            '*' => Token::Star,
            '/' => Token::Slash,
            '%' => Token::Percent,
            '^' => Token::Caret,
            '(' => Token::LParen,
            ')' => Token::RParen,
            ',' => Token::Comma,
            '[' => self.bracketed(column)?,
            c if c.is_ascii_digit() || c == '.' => self.number(start, column)?,
            c if c.is_ascii_alphabetic() || c == '_' => self.ident(start),
            other => {
                return Err(LexError {
                    column,
                    message: format!("unexpected character '{other}'"),
                })
            }
        };

        Ok(Some(Spanned { token, column }))
    }

    fn number(&mut self, start: usize, column: usize) -> Result<Token, LexError> {
        let mut end = start + 1;
        let mut seen_exponent = false;

        while let Some(&(idx, c)) = self.chars.peek() {
            let accept = c.is_ascii_digit()
                || c == '.'
                || (!seen_exponent && (c == 'e' || c == 'E'))
                || ((c == '+' || c == '-')
                    && matches!(self.input[..idx].chars().last(), Some('e' | 'E')));
            if !accept {
                break;
            }
            if c == 'e' || c == 'E' {
                seen_exponent = true;
            }
            self.advance();
            end = idx + c.len_utf8();
        }

        let text = &self.input[start..end];
        text.parse::<f64>()
            .map(Token::Number)
            .map_err(|_| LexError {
                column,
                message: format!("malformed number '{text}'"),
            })
    }

    fn ident(&mut self, start: usize) -> Token {
        let mut end = start + 1;
        while let Some(&(idx, c)) = self.chars.peek() {
            if !(c.is_ascii_alphanumeric() || c == '_') {
                break;
            }
            self.advance();
            end = idx + c.len_utf8();
        }
        Token::Ident(self.input[start..end].to_string())
    }

    fn bracketed(&mut self, column: usize) -> Result<Token, LexError> {
        let mut name = String::new();
        loop {
            match self.advance() {
                Some((_, ']')) => break,
                Some((_, c)) => name.push(c),
                None => {
                    return Err(LexError {
                        column,
                        message: "unclosed '['".into(),
                    })
                }
            }
        }
        let name = name.trim();
        if name.is_empty() {
            return Err(LexError {
                column,
                message: "empty field reference '[]'".into(),
            });
        }
        Ok(Token::Ident(name.to_string()))
    }
}
