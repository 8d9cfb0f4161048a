//! Precedence-climbing parser producing the formula AST
//!
//! Grammar, loosest binding first:
//!
//! ```text
//! expr     := term (('+' | '-') term)*
//! term     := unary (('*' | '/' | '%') unary)*
//! unary    := ('-' | '+') unary | power
//! power    := primary ('^' unary)?
//! primary  := NUMBER | IDENT | IDENT '(' args ')' | '(' expr ')'
//! ```

use super::lexer::{Spanned, Token};

/// Deepest nesting of parentheses, calls and prefix operators
pub const MAX_NESTING: usize = 256;

/// Most binary operators in one formula; bounds the AST depth of long chains
pub const MAX_OPERATORS: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Plus,
}

/// Formula AST
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Variable(String),
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Call {
        name: String,
        args: Vec<Expr>,
    },
}

impl Expr {
    /// Variable names referenced anywhere in the expression, first use first
    pub fn variables(&self) -> Vec<&str> {
        let mut names = Vec::new();
        self.collect_variables(&mut names);
        names
    }

    fn collect_variables<'a>(&'a self, names: &mut Vec<&'a str>) {
        match self {
            Self::Number(_) => {}
            Self::Variable(name) => {
                if !names.contains(&name.as_str()) {
                    names.push(name);
                }
            }
            Self::Unary { expr, .. } => expr.collect_variables(names),
            Self::Binary { lhs, rhs, .. } => {
                lhs.collect_variables(names);
                rhs.collect_variables(names);
            }
            Self::Call { args, .. } => args.iter().for_each(|a| a.collect_variables(names)),
        }
    }
}

/// Parse failure with the column it was detected at
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub column: Option<usize>,
    pub message: String,
}

pub struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    depth: usize,
    operators: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Spanned>) -> Self {
        Self {
            tokens,
            pos: 0,
            depth: 0,
            operators: 0,
        }
    }

    /// Parse a complete expression; trailing tokens are an error
    pub fn parse(mut self) -> Result<Expr, ParseError> {
        if self.tokens.is_empty() {
            return Err(ParseError {
                column: None,
                message: "empty formula".into(),
            });
        }
        let expr = self.expr()?;
        match self.tokens.get(self.pos) {
            None => Ok(expr),
            Some(extra) => Err(ParseError {
                column: Some(extra.column),
                message: format!("unexpected {}", describe(&extra.token)),
            }),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|s| &s.token)
    }

    fn bump(&mut self) -> Option<Spanned> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, expected: &Token) -> Result<(), ParseError> {
        match self.bump() {
            Some(s) if &s.token == expected => Ok(()),
            Some(s) => Err(ParseError {
                column: Some(s.column),
                message: format!("expected {}, found {}", describe(expected), describe(&s.token)),
            }),
            None => Err(self.eof(&format!("expected {}", describe(expected)))),
        }
    }

    fn column(&self) -> Option<usize> {
        self.tokens.get(self.pos).map(|s| s.column)
    }

    /// Consume the binary operator at the cursor
    fn operator(&mut self) -> Result<(), ParseError> {
        self.operators += 1;
        if self.operators > MAX_OPERATORS {
            return Err(ParseError {
                column: self.column(),
                message: format!("formula has more than {MAX_OPERATORS} operators"),
            });
        }
        self.pos += 1;
        Ok(())
    }

    fn eof(&self, message: &str) -> ParseError {
        ParseError {
            column: None,
            message: format!("{message} at end of formula"),
        }
    }

    fn expr(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => return Ok(lhs),
            };
            self.operator()?;
            let rhs = self.term()?;
            lhs = binary(op, lhs, rhs);
        }
    }

    fn term(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                Some(Token::Percent) => BinaryOp::Rem,
                _ => return Ok(lhs),
            };
            self.operator()?;
            let rhs = self.unary()?;
            lhs = binary(op, lhs, rhs);
        }
    }

    /// Every recursive production passes through here, so the nesting
    /// bound also bounds the parser's stack
    fn unary(&mut self) -> Result<Expr, ParseError> {
        if self.depth >= MAX_NESTING {
            return Err(ParseError {
                column: self.column(),
                message: format!("formula nested more than {MAX_NESTING} levels deep"),
            });
        }
        self.depth += 1;
        let expr = self.prefixed();
        self.depth -= 1;
        expr
    }

    fn prefixed(&mut self) -> Result<Expr, ParseError> {
        let op = match self.peek() {
            Some(Token::Minus) => UnaryOp::Neg,
            Some(Token::Plus) => UnaryOp::Plus,
            _ => return self.power(),
        };
        self.pos += 1;
        let expr = self.unary()?;
        Ok(Expr::Unary {
            op,
            expr: Box::new(expr),
        })
    }

    fn power(&mut self) -> Result<Expr, ParseError> {
        let base = self.primary()?;
        if self.peek() == Some(&Token::Caret) {
            self.operator()?;
            // right associative: 2^3^2 == 2^(3^2)
            let exponent = self.unary()?;
            return Ok(binary(BinaryOp::Pow, base, exponent));
        }
        Ok(base)
    }

    fn primary(&mut self) -> Result<Expr, ParseError> {
        let Some(Spanned { token, column }) = self.bump() else {
            return Err(self.eof("expected a value"));
        };

        match token {
            Token::Number(n) => Ok(Expr::Number(n)),
            Token::Ident(name) => {
                if self.peek() != Some(&Token::LParen) {
                    return Ok(Expr::Variable(name));
                }
                self.pos += 1;
                let args = self.arguments()?;
                Ok(Expr::Call { name, args })
            }
            Token::LParen => {
                let inner = self.expr()?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            other => Err(ParseError {
                column: Some(column),
                message: format!("expected a value, found {}", describe(&other)),
            }),
        }
    }

    fn arguments(&mut self) -> Result<Vec<Expr>, ParseError> {
        let mut args = Vec::new();
        if self.peek() == Some(&Token::RParen) {
            self.pos += 1;
            return Ok(args);
        }
        loop {
            args.push(self.expr()?);
            match self.bump() {
                Some(Spanned {
                    token: Token::Comma,
                    ..
                }) => continue,
                Some(Spanned {
                    token: Token::RParen,
                    ..
                }) => return Ok(args),
                Some(s) => {
                    return Err(ParseError {
                        column: Some(s.column),
                        message: format!("expected ',' or ')', found {}", describe(&s.token)),
                    })
                }
                None => return Err(self.eof("unclosed argument list")),
            }
        }
    }
}

fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
    Expr::Binary {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
    }
}

fn describe(token: &Token) -> String {
    match token {
        Token::Number(n) => format!("number {n}"),
        Token::Ident(name) => format!("identifier `{name}`"),
        Token::Plus => "'+'".into(),
        Token::Minus => "'-'".into(),
        Token::Star => "'*'".into(),
        Token::Slash => "'/'".into(),
        Token::Percent => "'%'".into(),
        Token::Caret => "'^'".into(),
        Token::LParen => "'('".into(),
        Token::RParen => "')'".into(),
        Token::Comma => "','".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::super::lexer::Lexer;
    use super::*;

    fn parse(input: &str) -> Result<Expr, ParseError> {
        Parser::new(Lexer::new(input).tokenize().unwrap()).parse()
    }

    fn var(name: &str) -> Expr {
        Expr::Variable(name.into())
    }

    #[test]
    fn test_precedence() {
        let expr = parse("a + b * c").unwrap();
        assert_eq!(
            expr,
            binary(BinaryOp::Add, var("a"), binary(BinaryOp::Mul, var("b"), var("c")))
        );
    }

    #[test]
    fn test_left_associative_subtraction() {
        let expr = parse("a - b - c").unwrap();
        assert_eq!(
            expr,
            binary(BinaryOp::Sub, binary(BinaryOp::Sub, var("a"), var("b")), var("c"))
        );
    }

    #[test]
    fn test_call_with_nested_parens() {
        let expr = parse("floor((now - dob) / 31557600000)").unwrap();
        let Expr::Call { name, args } = expr else {
            panic!("expected call");
        };
        assert_eq!(name, "floor");
        assert_eq!(args.len(), 1);
    }

    #[test]
    fn test_variables_deduplicated() {
        let expr = parse("max(a, b) + a * now").unwrap();
        assert_eq!(expr.variables(), vec!["a", "b", "now"]);
    }

    #[test]
    fn test_errors() {
        assert!(parse("").is_err());
        assert!(parse("a +").is_err());
        assert!(parse("(a + b").is_err());
        assert!(parse("a b").is_err());
        assert!(parse("max(a,").is_err());
        assert_eq!(parse("a )").unwrap_err().column, Some(3));
    }

    #[test]
    fn test_deep_parentheses_are_an_error() {
        let source = format!("{}1{}", "(".repeat(10_000), ")".repeat(10_000));
        let err = parse(&source).unwrap_err();
        assert!(err.message.contains("nested"), "{}", err.message);
        assert_eq!(err.column, Some(MAX_NESTING + 1));
    }

    #[test]
    fn test_deep_prefix_and_calls_are_an_error() {
        assert!(parse(&format!("{}1", "-".repeat(10_000))).is_err());
        assert!(parse(&format!("{}1{}", "abs(".repeat(10_000), ")".repeat(10_000))).is_err());
        assert!(parse(&"2^".repeat(10_000)).is_err());
    }

    #[test]
    fn test_nesting_within_limit() {
        let depth = MAX_NESTING - 1;
        let source = format!("{}a{}", "(".repeat(depth), ")".repeat(depth));
        assert_eq!(parse(&source).unwrap(), var("a"));
    }

    #[test]
    fn test_operator_count_is_bounded() {
        let within = vec!["a"; MAX_OPERATORS + 1].join(" + ");
        assert!(parse(&within).is_ok());

        let over = vec!["a"; MAX_OPERATORS + 2].join(" + ");
        let err = parse(&over).unwrap_err();
        assert!(err.message.contains("operators"), "{}", err.message);
    }
}
