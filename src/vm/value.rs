use crate::bytecode::Operand;

/// A value on the operand stack or bound in a scope.
///
/// Arrays live on the VM heap; the stack only holds their id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackValue {
    Int(i64),
    Bool(bool),
    String(String),
    ArrayRef(String),
}

impl StackValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            StackValue::Int(_) => "int",
            StackValue::Bool(_) => "bool",
            StackValue::String(_) => "string",
            StackValue::ArrayRef(_) => "array",
        }
    }
}

impl From<Operand> for StackValue {
    fn from(operand: Operand) -> Self {
        match operand {
            Operand::Int(n) => StackValue::Int(n),
            Operand::Bool(b) => StackValue::Bool(b),
            Operand::Str(s) => StackValue::String(s),
        }
    }
}
