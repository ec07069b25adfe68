use serde::{Deserialize, Serialize};

pub mod source_map;
pub use source_map::SourceMap;

// ---- Span infrastructure ----

/// Byte range within source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub const UNKNOWN: Span = Span { start: 0, end: 0 };

    pub fn merge(self, other: Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

impl From<std::ops::Range<usize>> for Span {
    fn from(range: std::ops::Range<usize>) -> Self {
        Span { start: range.start, end: range.end }
    }
}

// ---- Core AST types ----

/// A parsed program: the top-level statements in source order.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Program {
    pub statements: Vec<Stmt>,
}

/// `fun name(params) { body }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    pub params: Vec<String>,
    pub body: Vec<Stmt>,
}

/// Statements
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Stmt {
    /// `expr;`
    Expr(Expr),

    /// `print expr;`
    Print(Expr),

    /// `var name;` or `var name = expr;`
    Var { name: String, initializer: Option<Expr> },

    /// `{ stmts }`
    Block(Vec<Stmt>),

    /// `if (cond) then else other`
    If {
        condition: Expr,
        then_branch: Box<Stmt>,
        else_branch: Option<Box<Stmt>>,
    },

    /// `while (cond) body`; `for` loops are desugared into this.
    While { condition: Expr, body: Box<Stmt> },

    Function(Function),

    /// `return;` or `return expr;`
    Return(Option<Expr>),

    /// `class Name < Super { methods }`. Parsed, never lowered to bytecode.
    Class {
        name: String,
        superclass: Option<String>,
        methods: Vec<Function>,
    },
}

/// Expressions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Literal(Literal),

    /// Variable reference
    Variable(String),

    Unary { op: UnaryOp, operand: Box<Expr> },

    Binary {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },

    /// `and` / `or`. Both sides are always evaluated.
    Logical {
        op: LogicalOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },

    /// `(expr)`
    Grouping(Box<Expr>),

    /// `target = value`
    Assign { target: AssignTarget, value: Box<Expr> },

    /// `callee(args)`
    Call { callee: Box<Expr>, args: Vec<Expr> },

    /// `[a, b, c]`
    Array(Vec<Expr>),

    /// `array[index]`
    Index { array: Box<Expr>, index: Box<Expr> },

    /// `object.name`
    Get { object: Box<Expr>, name: String },

    /// `object.name = value`
    Set {
        object: Box<Expr>,
        name: String,
        value: Box<Expr>,
    },

    This,

    /// `super.method`
    Super { method: String },
}

/// Left-hand side of an assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AssignTarget {
    Variable(String),
    Index { array: Box<Expr>, index: Box<Expr> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Int(i64),
    Str(String),
    Bool(bool),
    Nil,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Negate,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Less,
    Greater,
    LessOrEqual,
    GreaterOrEqual,
    Equals,
    NotEquals,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogicalOp {
    And,
    Or,
}

impl Stmt {
    /// Short name of the node kind, used in compiler error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Stmt::Expr(_) => "expression statement",
            Stmt::Print(_) => "print statement",
            Stmt::Var { .. } => "var declaration",
            Stmt::Block(_) => "block",
            Stmt::If { .. } => "if statement",
            Stmt::While { .. } => "while statement",
            Stmt::Function(_) => "function declaration",
            Stmt::Return(_) => "return statement",
            Stmt::Class { .. } => "class declaration",
        }
    }
}

impl Expr {
    /// Short name of the node kind, used in compiler error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Expr::Literal(_) => "literal",
            Expr::Variable(_) => "variable",
            Expr::Unary { .. } => "unary expression",
            Expr::Binary { .. } => "binary expression",
            Expr::Logical { .. } => "logical expression",
            Expr::Grouping(_) => "grouping",
            Expr::Assign { .. } => "assignment",
            Expr::Call { .. } => "call",
            Expr::Array(_) => "array literal",
            Expr::Index { .. } => "index expression",
            Expr::Get { .. } => "property access",
            Expr::Set { .. } => "property assignment",
            Expr::This => "'this'",
            Expr::Super { .. } => "'super'",
        }
    }
}
