use crate::ast::*;
use crate::bytecode::{self, Instruction, Opcode};

#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error("cannot generate bytecode for {node}")]
    Generation { node: &'static str },
    #[error("call target must be a function name, got {node}")]
    UnsupportedCallee { node: &'static str },
}

type Result<T> = std::result::Result<T, CompileError>;

/// Lowers a statement list into one flat instruction sequence.
///
/// Label names embed the instruction count at the point they are minted. A
/// compiler created with [`Compiler::starting_at`] counts from an offset, so
/// code appended to an already-loaded program never reuses a label name.
pub struct Compiler {
    code: Vec<Instruction>,
    base: usize,
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

impl Compiler {
    pub fn new() -> Self {
        Compiler::starting_at(0)
    }

    pub fn starting_at(base: usize) -> Self {
        Compiler { code: Vec::new(), base }
    }

    pub fn compile(mut self, statements: &[Stmt]) -> Result<Vec<Instruction>> {
        for stmt in statements {
            self.compile_stmt(stmt)?;
        }
        Ok(self.code)
    }

    fn emit(&mut self, opcode: Opcode) {
        self.code.push(Instruction::new(opcode));
    }

    fn emit_with(&mut self, opcode: Opcode, operand: impl Into<String>) {
        self.code.push(Instruction::with_operand(opcode, operand));
    }

    /// A fresh label name: `prefix` plus the current absolute instruction count.
    fn mint_label(&self, prefix: &str) -> String {
        format!("{}{}", prefix, self.base + self.code.len())
    }

    // ── Statements ──────────────────────────────────────────────────

    fn compile_stmt(&mut self, stmt: &Stmt) -> Result<()> {
        match stmt {
            Stmt::Expr(expr) => {
                self.compile_expr(expr)?;
                self.emit(Opcode::Pop);
            }

            Stmt::Print(expr) => {
                self.compile_expr(expr)?;
                self.emit(Opcode::Print);
            }

            Stmt::Var { name, initializer } => {
                match initializer {
                    Some(expr) => self.compile_expr(expr)?,
                    None => self.emit_with(Opcode::PushConst, bytecode::NULL),
                }
                self.emit_with(Opcode::StoreVar, name.as_str());
            }

            Stmt::Block(stmts) => {
                self.emit(Opcode::ScopeStart);
                for stmt in stmts {
                    self.compile_stmt(stmt)?;
                }
                self.emit(Opcode::ScopeEnd);
            }

            Stmt::If { condition, then_branch, else_branch } => {
                self.compile_expr(condition)?;
                let false_label = self.mint_label(bytecode::FALSE_LABEL);
                self.emit_with(Opcode::JumpIfFalse, false_label.as_str());

                self.compile_stmt(then_branch)?;

                match else_branch {
                    Some(else_branch) => {
                        let end_label = self.mint_label(bytecode::END_LABEL);
                        self.emit_with(Opcode::Jump, end_label.as_str());
                        self.emit_with(Opcode::Label, false_label);
                        self.compile_stmt(else_branch)?;
                        self.emit_with(Opcode::Label, end_label);
                    }
                    None => self.emit_with(Opcode::Label, false_label),
                }
            }

            Stmt::While { condition, body } => {
                let loop_start = self.mint_label(bytecode::LOOP_START_LABEL);
                let loop_end = self.mint_label(bytecode::LOOP_END_LABEL);

                self.emit_with(Opcode::Label, loop_start.as_str());
                self.compile_expr(condition)?;
                self.emit_with(Opcode::JumpIfFalse, loop_end.as_str());
                self.compile_stmt(body)?;
                self.emit_with(Opcode::Jump, loop_start);
                self.emit_with(Opcode::Label, loop_end);
            }

            Stmt::Function(function) => self.compile_function(function)?,

            Stmt::Return(value) => {
                match value {
                    Some(expr) => self.compile_expr(expr)?,
                    None => self.emit_with(Opcode::PushConst, bytecode::NULL),
                }
                self.emit(Opcode::Return);
            }

            Stmt::Class { .. } => {
                return Err(CompileError::Generation { node: stmt.kind() });
            }
        }
        Ok(())
    }

    /// `FUNC name`, parameter bindings, body, an implicit `return nil`, `END_FUNC name`.
    ///
    /// Arguments arrive on the callee's fresh stack in call order, so the
    /// parameters are bound last-to-first.
    fn compile_function(&mut self, function: &Function) -> Result<()> {
        self.emit_with(Opcode::Func, function.name.as_str());
        for param in function.params.iter().rev() {
            self.emit_with(Opcode::StoreVar, param.as_str());
        }
        for stmt in &function.body {
            self.compile_stmt(stmt)?;
        }
        self.emit_with(Opcode::PushConst, bytecode::NULL);
        self.emit(Opcode::Return);
        self.emit_with(Opcode::EndFunc, function.name.as_str());
        Ok(())
    }

    // ── Expressions ─────────────────────────────────────────────────

    fn compile_expr(&mut self, expr: &Expr) -> Result<()> {
        match expr {
            Expr::Literal(lit) => {
                let text = match lit {
                    Literal::Int(n) => n.to_string(),
                    Literal::Str(s) => bytecode::quote(s),
                    Literal::Bool(b) => b.to_string(),
                    Literal::Nil => bytecode::NULL.to_string(),
                };
                self.emit_with(Opcode::PushConst, text);
            }

            Expr::Variable(name) => self.emit_with(Opcode::PushVar, name.as_str()),

            Expr::Unary { op, operand } => {
                self.compile_expr(operand)?;
                self.emit(match op {
                    UnaryOp::Negate => Opcode::Neg,
                    UnaryOp::Not => Opcode::Not,
                });
            }

            Expr::Binary { op, left, right } => {
                self.compile_expr(left)?;
                self.compile_expr(right)?;
                self.emit(binop_opcode(*op));
            }

            // Both operands are always evaluated; there is no short circuit.
            Expr::Logical { op, left, right } => {
                self.compile_expr(left)?;
                self.compile_expr(right)?;
                self.emit(match op {
                    LogicalOp::And => Opcode::And,
                    LogicalOp::Or => Opcode::Or,
                });
            }

            Expr::Grouping(inner) => self.compile_expr(inner)?,

            // The assigned value stays on the stack as the expression's result.
            Expr::Assign { target, value } => {
                self.compile_expr(value)?;
                self.emit(Opcode::Dup);
                match target {
                    AssignTarget::Variable(name) => {
                        self.emit_with(Opcode::AssignVar, name.as_str());
                    }
                    AssignTarget::Index { array, index } => {
                        self.compile_expr(array)?;
                        self.compile_expr(index)?;
                        self.emit(Opcode::ArraySet);
                    }
                }
            }

            Expr::Call { callee, args } => {
                let Expr::Variable(name) = callee.as_ref() else {
                    return Err(CompileError::UnsupportedCallee { node: callee.kind() });
                };
                for arg in args {
                    self.compile_expr(arg)?;
                }
                self.code.extend(bytecode::call_sequence(name, args.len()));
            }

            Expr::Array(items) => {
                for item in items {
                    self.compile_expr(item)?;
                }
                self.emit_with(Opcode::NewArray, items.len().to_string());
            }

            Expr::Index { array, index } => {
                self.compile_expr(array)?;
                self.compile_expr(index)?;
                self.emit(Opcode::ArrayGet);
            }

            Expr::Get { .. } | Expr::Set { .. } | Expr::This | Expr::Super { .. } => {
                return Err(CompileError::Generation { node: expr.kind() });
            }
        }
        Ok(())
    }
}

fn binop_opcode(op: BinOp) -> Opcode {
    match op {
        BinOp::Add => Opcode::Add,
        BinOp::Subtract => Opcode::Sub,
        BinOp::Multiply => Opcode::Mul,
        BinOp::Divide => Opcode::Div,
        BinOp::Less => Opcode::LessThan,
        BinOp::Greater => Opcode::GreaterThan,
        BinOp::LessOrEqual => Opcode::LessEqualThan,
        BinOp::GreaterOrEqual => Opcode::GreaterEqualThan,
        BinOp::Equals => Opcode::Equal,
        BinOp::NotEquals => Opcode::NotEqual,
    }
}

/// Compile a whole program from offset zero.
pub fn compile(program: &Program) -> Result<Vec<Instruction>> {
    Compiler::new().compile(&program.statements)
}
