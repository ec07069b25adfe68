//! Instruction set and the textual wire format shared by the compiler and the VM.
//!
//! Every instruction is one line, `<OPCODE>[ <operand>]`. The operand carries no
//! type tag; the VM recovers its type with [`Operand::sniff`]: integer first,
//! then a boolean literal, and a string otherwise. Quoted strings escape
//! backslashes and line breaks so a literal never spans two lines.

use serde::{Deserialize, Serialize};

pub const FALSE_LABEL: &str = "false_label_";
pub const END_LABEL: &str = "end_label_";
pub const LOOP_START_LABEL: &str = "loop_start_";
pub const LOOP_END_LABEL: &str = "loop_end_";

/// Operand of `PUSH_CONST` for an absent value (`nil`, bare `return;`).
pub const NULL: &str = "null";

// ── Opcodes ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Opcode {
    // stack and variables
    PushConst,
    PushVar,
    StoreVar,
    AssignVar,
    Pop,
    Dup,

    // arithmetic
    Add,
    Sub,
    Mul,
    Div,
    Neg,

    // logic
    Not,
    And,
    Or,

    // comparison
    LessThan,
    GreaterThan,
    LessEqualThan,
    GreaterEqualThan,
    Equal,
    NotEqual,

    // control flow
    Label,
    Jump,
    JumpIfFalse,

    // arrays
    NewArray,
    ArrayGet,
    ArraySet,

    // functions
    Func,
    EndFunc,
    CallFunction,
    Return,

    // lexical scopes
    ScopeStart,
    ScopeEnd,

    Print,

    /// A mnemonic this VM does not know. Executing it is a logged no-op.
    Unknown(String),
}

impl Opcode {
    pub fn mnemonic(&self) -> &str {
        match self {
            Opcode::PushConst => "PUSH_CONST",
            Opcode::PushVar => "PUSH_VAR",
            Opcode::StoreVar => "STORE_VAR",
            Opcode::AssignVar => "ASSIGN_VAR",
            Opcode::Pop => "POP",
            Opcode::Dup => "DUP",
            Opcode::Add => "ADD",
            Opcode::Sub => "SUB",
            Opcode::Mul => "MUL",
            Opcode::Div => "DIV",
            Opcode::Neg => "NEG",
            Opcode::Not => "NOT",
            Opcode::And => "AND",
            Opcode::Or => "OR",
            Opcode::LessThan => "LESS_THAN",
            Opcode::GreaterThan => "GREATER_THAN",
            Opcode::LessEqualThan => "LESS_EQUAL_THAN",
            Opcode::GreaterEqualThan => "GREATER_EQUAL_THAN",
            Opcode::Equal => "EQUAL",
            Opcode::NotEqual => "NOT_EQUAL",
            Opcode::Label => "LABEL",
            Opcode::Jump => "JUMP",
            Opcode::JumpIfFalse => "JUMP_IF_FALSE",
            Opcode::NewArray => "NEW_ARRAY",
            Opcode::ArrayGet => "ARRAY_GET",
            Opcode::ArraySet => "ARRAY_SET",
            Opcode::Func => "FUNC",
            Opcode::EndFunc => "END_FUNC",
            Opcode::CallFunction => "CALL_FUNCTION",
            Opcode::Return => "RETURN",
            Opcode::ScopeStart => "SCOPE_START",
            Opcode::ScopeEnd => "SCOPE_END",
            Opcode::Print => "PRINT",
            Opcode::Unknown(name) => name,
        }
    }

    /// Decode a mnemonic. Never fails: unrecognized text becomes [`Opcode::Unknown`].
    pub fn from_mnemonic(text: &str) -> Opcode {
        match text {
            "PUSH_CONST" => Opcode::PushConst,
            "PUSH_VAR" => Opcode::PushVar,
            "STORE_VAR" => Opcode::StoreVar,
            "ASSIGN_VAR" => Opcode::AssignVar,
            "POP" => Opcode::Pop,
            "DUP" => Opcode::Dup,
            "ADD" => Opcode::Add,
            "SUB" => Opcode::Sub,
            "MUL" => Opcode::Mul,
            "DIV" => Opcode::Div,
            "NEG" => Opcode::Neg,
            "NOT" => Opcode::Not,
            "AND" => Opcode::And,
            "OR" => Opcode::Or,
            "LESS_THAN" => Opcode::LessThan,
            "GREATER_THAN" => Opcode::GreaterThan,
            "LESS_EQUAL_THAN" => Opcode::LessEqualThan,
            "GREATER_EQUAL_THAN" => Opcode::GreaterEqualThan,
            "EQUAL" => Opcode::Equal,
            "NOT_EQUAL" => Opcode::NotEqual,
            "LABEL" => Opcode::Label,
            "JUMP" => Opcode::Jump,
            "JUMP_IF_FALSE" => Opcode::JumpIfFalse,
            "NEW_ARRAY" => Opcode::NewArray,
            "ARRAY_GET" => Opcode::ArrayGet,
            "ARRAY_SET" => Opcode::ArraySet,
            "FUNC" => Opcode::Func,
            "END_FUNC" => Opcode::EndFunc,
            "CALL_FUNCTION" => Opcode::CallFunction,
            "RETURN" => Opcode::Return,
            "SCOPE_START" => Opcode::ScopeStart,
            "SCOPE_END" => Opcode::ScopeEnd,
            "PRINT" => Opcode::Print,
            other => Opcode::Unknown(other.to_string()),
        }
    }
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.mnemonic())
    }
}

// ── Instructions ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    pub opcode: Opcode,
    pub operand: Option<String>,
}

impl Instruction {
    pub fn new(opcode: Opcode) -> Self {
        Instruction { opcode, operand: None }
    }

    pub fn with_operand(opcode: Opcode, operand: impl Into<String>) -> Self {
        Instruction { opcode, operand: Some(operand.into()) }
    }

    /// Decode one wire-format line. The operand is everything after the first
    /// run of whitespace, so quoted strings keep their inner spaces.
    pub fn parse(line: &str) -> Instruction {
        let line = line.trim();
        match line.split_once(char::is_whitespace) {
            Some((op, rest)) => {
                let rest = rest.trim();
                Instruction {
                    opcode: Opcode::from_mnemonic(op),
                    operand: (!rest.is_empty()).then(|| rest.to_string()),
                }
            }
            None => Instruction::new(Opcode::from_mnemonic(line)),
        }
    }

    /// The operand text of a label-bearing instruction (`LABEL`, `JUMP`, `FUNC`, ...).
    pub fn name(&self) -> Option<&str> {
        self.operand.as_deref()
    }
}

impl std::fmt::Display for Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.operand {
            Some(operand) => write!(f, "{} {}", self.opcode, operand),
            None => write!(f, "{}", self.opcode),
        }
    }
}

/// The two instructions that end every call site: the argument count, then the call.
/// Argument values must already be on the stack, pushed left to right.
pub fn call_sequence(callee: &str, argc: usize) -> [Instruction; 2] {
    [
        Instruction::with_operand(Opcode::PushConst, argc.to_string()),
        Instruction::with_operand(Opcode::CallFunction, callee),
    ]
}

/// Render a program as a listing, one instruction per line.
pub fn to_listing(code: &[Instruction]) -> String {
    let mut out = String::new();
    for inst in code {
        out.push_str(&inst.to_string());
        out.push('\n');
    }
    out
}

/// Read a listing back. Blank lines and `#` comments are skipped.
pub fn parse_listing(text: &str) -> Vec<Instruction> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(Instruction::parse)
        .collect()
}

// ── Operands ────────────────────────────────────────────────────────

/// An operand after type sniffing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    Int(i64),
    Bool(bool),
    Str(String),
}

impl Operand {
    /// Infer the operand's type from its text: integer, then `true`/`false`,
    /// then string. A string wrapped in double quotes loses the quotes and
    /// has the escapes written by [`quote`] undone.
    pub fn sniff(text: &str) -> Operand {
        if let Ok(n) = text.parse::<i64>() {
            return Operand::Int(n);
        }
        match text {
            "true" => Operand::Bool(true),
            "false" => Operand::Bool(false),
            _ => match text.strip_prefix('"').and_then(|s| s.strip_suffix('"')) {
                Some(inner) => Operand::Str(unescape(inner)),
                None => Operand::Str(text.to_string()),
            },
        }
    }
}

/// Quote a string literal for a `PUSH_CONST` operand.
pub fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}
