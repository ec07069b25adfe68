use crate::ast::*;
use crate::lexer::Token;

const MAX_ARITY: usize = 255;

pub struct Parser {
    tokens: Vec<(Token, Span)>,
    pos: usize,
}

#[derive(Debug, thiserror::Error)]
#[error("Parse error at token {position}: {message}")]
pub struct ParseError {
    pub code: &'static str,
    pub position: usize,
    pub span: Span,
    pub message: String,
}

type Result<T> = std::result::Result<T, ParseError>;

impl Parser {
    pub fn new(tokens: Vec<(Token, Span)>) -> Self {
        Parser { tokens, pos: 0 }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn peek_span(&self) -> Span {
        self.tokens
            .get(self.pos)
            .map(|(_, s)| *s)
            .or_else(|| self.tokens.last().map(|(_, s)| Span { start: s.end, end: s.end }))
            .unwrap_or(Span::UNKNOWN)
    }

    fn advance(&mut self) -> Option<&Token> {
        let tok = self.tokens.get(self.pos).map(|(t, _)| t);
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    /// Consume the next token if it equals `expected`.
    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: &Token, context: &str) -> Result<Span> {
        match self.peek() {
            Some(tok) if tok == expected => {
                let span = self.peek_span();
                self.advance();
                Ok(span)
            }
            Some(tok) => Err(self.error(
                "SB-P001",
                format!("expected {:?} {}, got {:?}", expected, context, tok),
            )),
            None => Err(self.error("SB-P002", format!("expected {:?} {}, got EOF", expected, context))),
        }
    }

    fn expect_ident(&mut self, context: &str) -> Result<String> {
        match self.peek().cloned() {
            Some(Token::Ident(name)) => {
                self.advance();
                Ok(name)
            }
            Some(tok) => Err(self.error("SB-P003", format!("expected {}, got {:?}", context, tok))),
            None => Err(self.error("SB-P004", format!("expected {}, got EOF", context))),
        }
    }

    fn error(&self, code: &'static str, message: String) -> ParseError {
        ParseError {
            code,
            position: self.pos,
            span: self.peek_span(),
            message,
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    // ---- Top-level parsing ----

    pub fn parse_program(&mut self) -> (Program, Vec<ParseError>) {
        let mut statements = Vec::new();
        let mut errors: Vec<ParseError> = Vec::new();
        const MAX_ERRORS: usize = 20;

        while !self.at_end() {
            if errors.len() >= MAX_ERRORS {
                break;
            }
            match self.parse_declaration() {
                Ok(stmt) => statements.push(stmt),
                Err(e) => {
                    errors.push(e);
                    self.synchronize();
                }
            }
        }

        (Program { statements }, errors)
    }

    /// Skip tokens until just past a `;` or up to the next statement keyword.
    fn synchronize(&mut self) {
        while let Some(tok) = self.peek() {
            match tok {
                Token::Semicolon => {
                    self.advance();
                    return;
                }
                Token::Class
                | Token::Fun
                | Token::Var
                | Token::For
                | Token::If
                | Token::While
                | Token::Print
                | Token::Return => return,
                _ => {
                    self.advance();
                }
            }
        }
    }

    fn parse_declaration(&mut self) -> Result<Stmt> {
        match self.peek() {
            Some(Token::Var) => {
                self.advance();
                self.parse_var()
            }
            Some(Token::Fun) => {
                self.advance();
                Ok(Stmt::Function(self.parse_function()?))
            }
            Some(Token::Class) => {
                self.advance();
                self.parse_class()
            }
            _ => self.parse_statement(),
        }
    }

    /// `var name (= expr)? ;`
    fn parse_var(&mut self) -> Result<Stmt> {
        let name = self.expect_ident("variable name")?;
        let initializer = if self.eat(&Token::Assign) {
            Some(self.parse_expr()?)
        } else {
            None
        };
        self.expect(&Token::Semicolon, "after variable declaration")?;
        Ok(Stmt::Var { name, initializer })
    }

    /// `name(params) { body }`; the `fun` keyword is already consumed.
    fn parse_function(&mut self) -> Result<Function> {
        let name = self.expect_ident("function name")?;
        self.expect(&Token::LParen, "after function name")?;
        let mut params = Vec::new();
        if !self.eat(&Token::RParen) {
            loop {
                if params.len() >= MAX_ARITY {
                    return Err(self.error(
                        "SB-P005",
                        format!("cannot have more than {MAX_ARITY} parameters"),
                    ));
                }
                params.push(self.expect_ident("parameter name")?);
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
            self.expect(&Token::RParen, "after parameters")?;
        }
        self.expect(&Token::LBrace, "before function body")?;
        let body = self.parse_block_body()?;
        Ok(Function { name, params, body })
    }

    /// `class Name (< Super)? { methods }`
    fn parse_class(&mut self) -> Result<Stmt> {
        let name = self.expect_ident("class name")?;
        let superclass = if self.eat(&Token::Less) {
            Some(self.expect_ident("superclass name")?)
        } else {
            None
        };
        self.expect(&Token::LBrace, "after class name")?;
        let mut methods = Vec::new();
        while matches!(self.peek(), Some(Token::Ident(_))) {
            methods.push(self.parse_function()?);
        }
        self.expect(&Token::RBrace, "after class body")?;
        Ok(Stmt::Class { name, superclass, methods })
    }

    fn parse_statement(&mut self) -> Result<Stmt> {
        match self.peek() {
            Some(Token::Print) => {
                self.advance();
                let expr = self.parse_expr()?;
                self.expect(&Token::Semicolon, "after value")?;
                Ok(Stmt::Print(expr))
            }
            Some(Token::If) => {
                self.advance();
                self.parse_if()
            }
            Some(Token::While) => {
                self.advance();
                self.expect(&Token::LParen, "after 'while'")?;
                let condition = self.parse_expr()?;
                self.expect(&Token::RParen, "after while condition")?;
                let body = Box::new(self.parse_statement()?);
                Ok(Stmt::While { condition, body })
            }
            Some(Token::For) => {
                self.advance();
                self.parse_for()
            }
            Some(Token::LBrace) => {
                self.advance();
                Ok(Stmt::Block(self.parse_block_body()?))
            }
            Some(Token::Return) => {
                self.advance();
                let value = if self.eat(&Token::Semicolon) {
                    None
                } else {
                    let value = self.parse_expr()?;
                    self.expect(&Token::Semicolon, "after return value")?;
                    Some(value)
                };
                Ok(Stmt::Return(value))
            }
            _ => {
                let expr = self.parse_expr()?;
                self.expect(&Token::Semicolon, "after expression")?;
                Ok(Stmt::Expr(expr))
            }
        }
    }

    fn parse_if(&mut self) -> Result<Stmt> {
        self.expect(&Token::LParen, "after 'if'")?;
        let condition = self.parse_expr()?;
        self.expect(&Token::RParen, "after if condition")?;
        let then_branch = Box::new(self.parse_statement()?);
        let else_branch = if self.eat(&Token::Else) {
            Some(Box::new(self.parse_statement()?))
        } else {
            None
        };
        Ok(Stmt::If { condition, then_branch, else_branch })
    }

    /// `for (init; cond; incr) body` desugars to `{ init; while (cond) { body; incr; } }`.
    fn parse_for(&mut self) -> Result<Stmt> {
        self.expect(&Token::LParen, "after 'for'")?;

        let initializer = match self.peek() {
            Some(Token::Semicolon) => {
                self.advance();
                None
            }
            Some(Token::Var) => {
                self.advance();
                Some(self.parse_var()?)
            }
            _ => {
                let expr = self.parse_expr()?;
                self.expect(&Token::Semicolon, "after loop initializer")?;
                Some(Stmt::Expr(expr))
            }
        };

        let condition = if self.peek() == Some(&Token::Semicolon) {
            Expr::Literal(Literal::Bool(true))
        } else {
            self.parse_expr()?
        };
        self.expect(&Token::Semicolon, "after loop condition")?;

        let increment = if self.peek() == Some(&Token::RParen) {
            None
        } else {
            Some(self.parse_expr()?)
        };
        self.expect(&Token::RParen, "after for clauses")?;

        let mut body = self.parse_statement()?;
        if let Some(increment) = increment {
            body = Stmt::Block(vec![body, Stmt::Expr(increment)]);
        }
        let looped = Stmt::While { condition, body: Box::new(body) };

        Ok(match initializer {
            Some(init) => Stmt::Block(vec![init, looped]),
            None => looped,
        })
    }

    /// Statements up to the closing `}`; the opening brace is already consumed.
    fn parse_block_body(&mut self) -> Result<Vec<Stmt>> {
        let mut stmts = Vec::new();
        while !matches!(self.peek(), None | Some(Token::RBrace)) {
            stmts.push(self.parse_declaration()?);
        }
        self.expect(&Token::RBrace, "after block")?;
        Ok(stmts)
    }

    // ---- Expressions ----

    fn parse_expr(&mut self) -> Result<Expr> {
        self.parse_assignment()
    }

    fn parse_assignment(&mut self) -> Result<Expr> {
        let start = self.peek_span();
        let expr = self.parse_or()?;
        if self.peek() != Some(&Token::Assign) {
            return Ok(expr);
        }
        self.advance();
        let value = Box::new(self.parse_assignment()?);
        match expr {
            Expr::Variable(name) => Ok(Expr::Assign {
                target: AssignTarget::Variable(name),
                value,
            }),
            Expr::Index { array, index } => Ok(Expr::Assign {
                target: AssignTarget::Index { array, index },
                value,
            }),
            Expr::Get { object, name } => Ok(Expr::Set { object, name, value }),
            other => Err(ParseError {
                code: "SB-P006",
                position: self.pos,
                span: start,
                message: format!("invalid assignment target: {}", other.kind()),
            }),
        }
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut expr = self.parse_and()?;
        while self.eat(&Token::Or) {
            let right = self.parse_and()?;
            expr = Expr::Logical {
                op: LogicalOp::Or,
                left: Box::new(expr),
                right: Box::new(right),
            };
        }
        Ok(expr)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut expr = self.parse_equality()?;
        while self.eat(&Token::And) {
            let right = self.parse_equality()?;
            expr = Expr::Logical {
                op: LogicalOp::And,
                left: Box::new(expr),
                right: Box::new(right),
            };
        }
        Ok(expr)
    }

    fn parse_equality(&mut self) -> Result<Expr> {
        let mut expr = self.parse_comparison()?;
        loop {
            let op = match self.peek() {
                Some(Token::EqEq) => BinOp::Equals,
                Some(Token::BangEq) => BinOp::NotEquals,
                _ => return Ok(expr),
            };
            self.advance();
            let right = self.parse_comparison()?;
            expr = binary(op, expr, right);
        }
    }

    fn parse_comparison(&mut self) -> Result<Expr> {
        let mut expr = self.parse_term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Less) => BinOp::Less,
                Some(Token::LessEq) => BinOp::LessOrEqual,
                Some(Token::Greater) => BinOp::Greater,
                Some(Token::GreaterEq) => BinOp::GreaterOrEqual,
                _ => return Ok(expr),
            };
            self.advance();
            let right = self.parse_term()?;
            expr = binary(op, expr, right);
        }
    }

    fn parse_term(&mut self) -> Result<Expr> {
        let mut expr = self.parse_factor()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Subtract,
                _ => return Ok(expr),
            };
            self.advance();
            let right = self.parse_factor()?;
            expr = binary(op, expr, right);
        }
    }

    fn parse_factor(&mut self) -> Result<Expr> {
        let mut expr = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinOp::Multiply,
                Some(Token::Slash) => BinOp::Divide,
                _ => return Ok(expr),
            };
            self.advance();
            let right = self.parse_unary()?;
            expr = binary(op, expr, right);
        }
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        let op = match self.peek() {
            Some(Token::Minus) => UnaryOp::Negate,
            Some(Token::Bang) => UnaryOp::Not,
            _ => return self.parse_call(),
        };
        self.advance();
        let operand = Box::new(self.parse_unary()?);
        Ok(Expr::Unary { op, operand })
    }

    /// Postfix chain: calls `f(x)`, indexing `a[i]`, property access `o.name`.
    fn parse_call(&mut self) -> Result<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek() {
                Some(Token::LParen) => {
                    self.advance();
                    let args = self.parse_arguments()?;
                    expr = Expr::Call { callee: Box::new(expr), args };
                }
                Some(Token::LBracket) => {
                    self.advance();
                    let index = self.parse_expr()?;
                    self.expect(&Token::RBracket, "after array index")?;
                    expr = Expr::Index {
                        array: Box::new(expr),
                        index: Box::new(index),
                    };
                }
                Some(Token::Dot) => {
                    self.advance();
                    let name = self.expect_ident("property name after '.'")?;
                    expr = Expr::Get { object: Box::new(expr), name };
                }
                _ => return Ok(expr),
            }
        }
    }

    fn parse_arguments(&mut self) -> Result<Vec<Expr>> {
        let mut args = Vec::new();
        if self.eat(&Token::RParen) {
            return Ok(args);
        }
        loop {
            if args.len() >= MAX_ARITY {
                return Err(self.error(
                    "SB-P007",
                    format!("cannot have more than {MAX_ARITY} arguments"),
                ));
            }
            args.push(self.parse_expr()?);
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect(&Token::RParen, "after arguments")?;
        Ok(args)
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        match self.peek().cloned() {
            Some(Token::Number(n)) => {
                self.advance();
                Ok(Expr::Literal(Literal::Int(n)))
            }
            Some(Token::Str(s)) => {
                self.advance();
                Ok(Expr::Literal(Literal::Str(s)))
            }
            Some(Token::True) => {
                self.advance();
                Ok(Expr::Literal(Literal::Bool(true)))
            }
            Some(Token::False) => {
                self.advance();
                Ok(Expr::Literal(Literal::Bool(false)))
            }
            Some(Token::Nil) => {
                self.advance();
                Ok(Expr::Literal(Literal::Nil))
            }
            Some(Token::This) => {
                self.advance();
                Ok(Expr::This)
            }
            Some(Token::Super) => {
                self.advance();
                self.expect(&Token::Dot, "after 'super'")?;
                let method = self.expect_ident("superclass method name")?;
                Ok(Expr::Super { method })
            }
            Some(Token::Ident(name)) => {
                self.advance();
                Ok(Expr::Variable(name))
            }
            Some(Token::LParen) => {
                self.advance();
                let expr = self.parse_expr()?;
                self.expect(&Token::RParen, "after expression")?;
                Ok(Expr::Grouping(Box::new(expr)))
            }
            Some(Token::LBracket) => {
                self.advance();
                let mut items = Vec::new();
                if self.peek() != Some(&Token::RBracket) {
                    items.push(self.parse_expr()?);
                    while self.eat(&Token::Comma) {
                        if self.peek() == Some(&Token::RBracket) {
                            break; // trailing comma
                        }
                        items.push(self.parse_expr()?);
                    }
                }
                self.expect(&Token::RBracket, "after array elements")?;
                Ok(Expr::Array(items))
            }
            Some(tok) => Err(self.error("SB-P008", format!("expected expression, got {:?}", tok))),
            None => Err(self.error("SB-P009", "expected expression, got EOF".into())),
        }
    }
}

fn binary(op: BinOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

/// Parse from token+span pairs.
/// Returns `(program, errors)`. Statements that failed to parse are dropped;
/// check `errors.is_empty()` before compiling the program.
pub fn parse(tokens: Vec<(Token, Span)>) -> (Program, Vec<ParseError>) {
    let mut parser = Parser::new(tokens);
    parser.parse_program()
}
