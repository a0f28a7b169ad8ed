//! Tokenizer and parser for the test engine's script language.
//!
//! The language is a tiny expression language shaped like JavaScript, just
//! large enough to drive every entry point and callback surface:
//!
//! ```text
//! program := stmt*
//! stmt    := "while" "(" expr ")" block | "throw" expr | "import" STRING
//!          | block | expr | ";"
//! expr    := term (("+" | "-") term)*
//! term    := unary (("*" | "/") unary)*
//! unary   := "-" unary | postfix
//! postfix := primary ("." IDENT | "(" args ")")*
//! primary := NUMBER | STRING | IDENT | "(" expr ")" | "new" IDENT "(" args ")"
//! ```

/// A parse failure, reported to scripts as a `SyntaxError`.
#[derive(Debug, Clone, PartialEq)]
pub struct SyntaxError(pub String);

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    Punct(char),
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
}

/// Expressions.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Str(String),
    Ident(String),
    Neg(Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Member(Box<Expr>, String),
    Call(Box<Expr>, Vec<Expr>),
    New(String, Vec<Expr>),
}

/// Statements.
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Expr(Expr),
    While(Expr, Vec<Stmt>),
    Throw(Expr),
    Import(String),
    Block(Vec<Stmt>),
}

fn tokenize(source: &str) -> Result<Vec<Token>, SyntaxError> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c.is_ascii_digit() {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            let text: String = chars[start..i].iter().collect();
            let n = text
                .parse::<f64>()
                .map_err(|_| SyntaxError(format!("invalid number literal '{}'", text)))?;
            tokens.push(Token::Number(n));
        } else if c == '"' || c == '\'' {
            i += 1;
            let mut text = String::new();
            loop {
                match chars.get(i) {
                    None => return Err(SyntaxError("unterminated string literal".to_string())),
                    Some(&q) if q == c => break,
                    Some('\\') => {
                        let escaped = chars
                            .get(i + 1)
                            .ok_or_else(|| SyntaxError("unterminated string literal".to_string()))?;
                        text.push(match escaped {
                            'n' => '\n',
                            't' => '\t',
                            other => *other,
                        });
                        i += 2;
                    }
                    Some(&other) => {
                        text.push(other);
                        i += 1;
                    }
                }
            }
            i += 1;
            tokens.push(Token::Str(text));
        } else if c.is_alphabetic() || c == '_' || c == '$' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '$')
            {
                i += 1;
            }
            tokens.push(Token::Ident(chars[start..i].iter().collect()));
        } else if "(){},;.+-*/".contains(c) {
            tokens.push(Token::Punct(c));
            i += 1;
        } else {
            return Err(SyntaxError(format!("unexpected character '{}'", c)));
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Result<Token, SyntaxError> {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or_else(|| SyntaxError("unexpected end of input".to_string()))?;
        self.pos += 1;
        Ok(token)
    }

    fn is_punct(&self, c: char) -> bool {
        matches!(self.peek(), Some(Token::Punct(p)) if *p == c)
    }

    fn is_keyword(&self, word: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(w)) if w == word)
    }

    fn expect(&mut self, c: char) -> Result<(), SyntaxError> {
        match self.next()? {
            Token::Punct(p) if p == c => Ok(()),
            other => Err(unexpected(&other)),
        }
    }

    fn ident(&mut self) -> Result<String, SyntaxError> {
        match self.next()? {
            Token::Ident(name) => Ok(name),
            other => Err(unexpected(&other)),
        }
    }

    fn program(&mut self) -> Result<Vec<Stmt>, SyntaxError> {
        let mut stmts = Vec::new();
        while self.peek().is_some() {
            if self.is_punct(';') {
                self.pos += 1;
                continue;
            }
            stmts.push(self.stmt()?);
        }
        Ok(stmts)
    }

    fn block(&mut self) -> Result<Vec<Stmt>, SyntaxError> {
        self.expect('{')?;
        let mut stmts = Vec::new();
        loop {
            if self.is_punct('}') {
                self.pos += 1;
                return Ok(stmts);
            }
            if self.is_punct(';') {
                self.pos += 1;
                continue;
            }
            if self.peek().is_none() {
                return Err(SyntaxError("expected '}'".to_string()));
            }
            stmts.push(self.stmt()?);
        }
    }

    fn stmt(&mut self) -> Result<Stmt, SyntaxError> {
        if self.is_punct('{') {
            return Ok(Stmt::Block(self.block()?));
        }
        if self.is_keyword("while") {
            self.pos += 1;
            self.expect('(')?;
            let cond = self.expr()?;
            self.expect(')')?;
            return Ok(Stmt::While(cond, self.block()?));
        }
        if self.is_keyword("throw") {
            self.pos += 1;
            return Ok(Stmt::Throw(self.expr()?));
        }
        if self.is_keyword("import") {
            self.pos += 1;
            return match self.next()? {
                Token::Str(name) => Ok(Stmt::Import(name)),
                other => Err(unexpected(&other)),
            };
        }
        Ok(Stmt::Expr(self.expr()?))
    }

    fn expr(&mut self) -> Result<Expr, SyntaxError> {
        let mut lhs = self.term()?;
        loop {
            let op = if self.is_punct('+') {
                BinOp::Add
            } else if self.is_punct('-') {
                BinOp::Sub
            } else {
                return Ok(lhs);
            };
            self.pos += 1;
            let rhs = self.term()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn term(&mut self) -> Result<Expr, SyntaxError> {
        let mut lhs = self.unary()?;
        loop {
            let op = if self.is_punct('*') {
                BinOp::Mul
            } else if self.is_punct('/') {
                BinOp::Div
            } else {
                return Ok(lhs);
            };
            self.pos += 1;
            let rhs = self.unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn unary(&mut self) -> Result<Expr, SyntaxError> {
        if self.is_punct('-') {
            self.pos += 1;
            return Ok(Expr::Neg(Box::new(self.unary()?)));
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Result<Expr, SyntaxError> {
        let mut expr = self.primary()?;
        loop {
            if self.is_punct('.') {
                self.pos += 1;
                expr = Expr::Member(Box::new(expr), self.ident()?);
            } else if self.is_punct('(') {
                let args = self.args()?;
                expr = Expr::Call(Box::new(expr), args);
            } else {
                return Ok(expr);
            }
        }
    }

    fn args(&mut self) -> Result<Vec<Expr>, SyntaxError> {
        self.expect('(')?;
        let mut args = Vec::new();
        if self.is_punct(')') {
            self.pos += 1;
            return Ok(args);
        }
        loop {
            args.push(self.expr()?);
            match self.next()? {
                Token::Punct(')') => return Ok(args),
                Token::Punct(',') => continue,
                other => return Err(unexpected(&other)),
            }
        }
    }

    fn primary(&mut self) -> Result<Expr, SyntaxError> {
        match self.next()? {
            Token::Number(n) => Ok(Expr::Number(n)),
            Token::Str(s) => Ok(Expr::Str(s)),
            Token::Ident(name) if name == "new" => {
                let class = self.ident()?;
                let args = self.args()?;
                Ok(Expr::New(class, args))
            }
            Token::Ident(name) => Ok(Expr::Ident(name)),
            Token::Punct('(') => {
                let inner = self.expr()?;
                self.expect(')')?;
                Ok(inner)
            }
            other => Err(unexpected(&other)),
        }
    }
}

fn unexpected(token: &Token) -> SyntaxError {
    let text = match token {
        Token::Number(n) => n.to_string(),
        Token::Str(s) => format!("\"{}\"", s),
        Token::Ident(name) => name.clone(),
        Token::Punct(p) => p.to_string(),
    };
    SyntaxError(format!("unexpected token '{}'", text))
}

/// Parses a whole program.
pub fn parse(source: &str) -> Result<Vec<Stmt>, SyntaxError> {
    let tokens = tokenize(source)?;
    Parser { tokens, pos: 0 }.program()
}
