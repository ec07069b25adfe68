use std::collections::HashMap;
use std::io::Write;
use std::rc::Rc;

use crate::bytecode::{Instruction, Opcode, Operand};

pub mod heap;
pub mod scope;
pub mod value;

pub use heap::{GcStats, Heap};
pub use scope::Scopes;
pub use value::StackValue;

#[derive(Debug, thiserror::Error)]
pub enum VmError {
    #[error("undefined label: {label}")]
    LabelResolution { label: String },
    #[error("type error: {op} expects {expected}, got {found}")]
    Type { op: String, expected: &'static str, found: String },
    #[error("stack underflow")]
    StackUnderflow,
    #[error("index {index} out of bounds for array of length {len}")]
    Bounds { index: i64, len: usize },
    #[error("{0}")]
    Arithmetic(&'static str),
    #[error("undefined variable: {name}")]
    UndefinedVariable { name: String },
    #[error("undefined function: {name}")]
    UndefinedFunction { name: String },
    #[error("array {id} has been collected")]
    DanglingReference { id: String },
    #[error("{opcode} requires an operand")]
    MissingOperand { opcode: String },
    #[error("bad operand for {opcode}: {operand}")]
    BadOperand { opcode: String, operand: String },
    #[error("cannot close the global scope")]
    ScopeUnderflow,
    #[error("function {name} has no matching END_FUNC")]
    UnterminatedFunction { name: String },
    #[error("{name} takes {expected} argument(s) but {found} were supplied")]
    Arity { name: String, expected: usize, found: usize },
    #[error("failed to write output: {0}")]
    Output(#[from] std::io::Error),
}

pub type VmResult<T> = Result<T, VmError>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VmConfig {
    /// Reuse the current frame when a call is immediately followed by `RETURN`.
    pub tail_calls: bool,
    /// Accepted and reported; the dispatch loop does not act on it.
    pub unroll_loops: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ready,
    Running,
    Halted,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    pub instructions: u64,
    pub calls: u64,
    pub tail_calls: u64,
    pub peak_call_depth: usize,
}

/// Saved caller state for one non-tail call.
struct Frame {
    saved_stack: Vec<StackValue>,
    return_address: usize,
    scope_depth: usize,
}

/// A registered function: its first body instruction and parameter count.
#[derive(Debug, Clone, Copy)]
struct Entry {
    address: usize,
    arity: usize,
}

pub struct Vm {
    code: Rc<[Instruction]>,
    pc: usize,
    status: Status,
    stack: Vec<StackValue>,
    frames: Vec<Frame>,
    scopes: Scopes,
    heap: Heap,
    labels: HashMap<String, usize>,
    functions: HashMap<String, Entry>,
    config: VmConfig,
    stats: RunStats,
    out: Box<dyn Write>,
}

impl Vm {
    pub fn new(code: Vec<Instruction>) -> Self {
        Vm {
            code: code.into(),
            pc: 0,
            status: Status::Ready,
            stack: Vec::with_capacity(64),
            frames: Vec::new(),
            scopes: Scopes::new(),
            heap: Heap::new(),
            labels: HashMap::new(),
            functions: HashMap::new(),
            config: VmConfig::default(),
            stats: RunStats::default(),
            out: Box::new(std::io::stdout()),
        }
    }

    pub fn with_config(mut self, config: VmConfig) -> Self {
        self.config = config;
        self
    }

    /// Send `PRINT` output somewhere other than stdout.
    pub fn with_output(mut self, out: Box<dyn Write>) -> Self {
        self.out = out;
        self
    }

    pub fn config(&self) -> VmConfig {
        self.config
    }

    pub fn set_config(&mut self, config: VmConfig) {
        self.config = config;
    }

    // ── Inspection ──────────────────────────────────────────────────

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn code(&self) -> &[Instruction] {
        &self.code
    }

    /// Index of the next instruction. After a failed run, the failing one is at `pc - 1`.
    pub fn pc(&self) -> usize {
        self.pc
    }

    pub fn stack(&self) -> &[StackValue] {
        &self.stack
    }

    pub fn call_depth(&self) -> usize {
        self.frames.len()
    }

    pub fn scope_depth(&self) -> usize {
        self.scopes.depth()
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn labels(&self) -> &HashMap<String, usize> {
        &self.labels
    }

    pub fn stats(&self) -> RunStats {
        self.stats
    }

    pub fn gc_stats(&self) -> GcStats {
        self.heap.stats()
    }

    /// The instruction a failed run stopped on, with its index.
    pub fn failing_instruction(&self) -> Option<(usize, &Instruction)> {
        let at = self.pc.checked_sub(1)?;
        self.code.get(at).map(|inst| (at, inst))
    }

    /// Look up a variable as the program currently sees it.
    pub fn variable(&self, name: &str) -> Option<&StackValue> {
        self.scopes.get(name).ok()
    }

    // ── Loading and running ─────────────────────────────────────────

    /// Append more code and position the VM at its first instruction.
    ///
    /// Globals and registered functions survive. Transient state left by an
    /// aborted run (operand stack, frames, open block scopes) is discarded.
    pub fn append(&mut self, code: Vec<Instruction>) {
        self.stack.clear();
        self.frames.clear();
        self.scopes.truncate(1);
        self.pc = self.code.len();
        let mut all = self.code.to_vec();
        all.extend(code);
        self.code = all.into();
        self.status = Status::Ready;
    }

    /// Record the index of every `LABEL` marker. Safe to run any number of times.
    pub fn resolve_labels(&mut self) {
        self.labels.clear();
        for (index, inst) in self.code.iter().enumerate() {
            if inst.opcode == Opcode::Label {
                if let Some(name) = inst.name() {
                    self.labels.insert(name.to_string(), index);
                }
            }
        }
        log::debug!("resolved {} label(s)", self.labels.len());
    }

    /// Execute from the current position until the code runs out or a
    /// top-level `RETURN` halts. Any error aborts the run.
    pub fn run(&mut self) -> VmResult<()> {
        self.resolve_labels();
        if self.config.unroll_loops {
            log::debug!("loop unrolling requested; executing loops as emitted");
        }
        self.status = Status::Running;
        while self.status == Status::Running && self.pc < self.code.len() {
            if let Err(err) = self.step() {
                self.status = Status::Halted;
                return Err(err);
            }
        }
        self.status = Status::Halted;
        self.out.flush()?;
        Ok(())
    }

    fn step(&mut self) -> VmResult<()> {
        let code = Rc::clone(&self.code);
        let inst = &code[self.pc];
        log::trace!("{:>5}  {}", self.pc, inst);
        self.pc += 1;
        self.stats.instructions += 1;

        match &inst.opcode {
            Opcode::PushConst => {
                let text = operand(inst)?;
                self.stack.push(StackValue::from(Operand::sniff(text)));
            }
            Opcode::PushVar => {
                let value = self.scopes.get(operand(inst)?)?.clone();
                self.stack.push(value);
            }
            Opcode::StoreVar => {
                let value = self.pop()?;
                self.scopes.set(operand(inst)?, value);
            }
            Opcode::AssignVar => {
                let value = self.pop()?;
                self.scopes.assign(operand(inst)?, value);
            }
            Opcode::Pop => {
                self.pop()?;
            }
            Opcode::Dup => {
                let top = self.stack.last().cloned().ok_or(VmError::StackUnderflow)?;
                self.stack.push(top);
            }

            Opcode::Add => {
                let (a, b) = self.pop_pair()?;
                let result = match (a, b) {
                    (StackValue::Int(a), StackValue::Int(b)) => {
                        StackValue::Int(a.checked_add(b).ok_or(VmError::Arithmetic("integer overflow"))?)
                    }
                    (StackValue::String(a), StackValue::String(b)) => StackValue::String(a + &b),
                    (a, b) => return Err(type_error(&inst.opcode, "two ints or two strings", &[&a, &b])),
                };
                self.stack.push(result);
            }
            Opcode::Sub => self.int_arith(&inst.opcode, i64::checked_sub)?,
            Opcode::Mul => self.int_arith(&inst.opcode, i64::checked_mul)?,
            Opcode::Div => {
                let (a, b) = self.pop_ints(&inst.opcode)?;
                if b == 0 {
                    return Err(VmError::Arithmetic("division by zero"));
                }
                let quotient = a.checked_div(b).ok_or(VmError::Arithmetic("integer overflow"))?;
                self.stack.push(StackValue::Int(quotient));
            }
            Opcode::Neg => match self.pop()? {
                StackValue::Int(n) => {
                    let negated = n.checked_neg().ok_or(VmError::Arithmetic("integer overflow"))?;
                    self.stack.push(StackValue::Int(negated));
                }
                other => return Err(type_error(&inst.opcode, "an int", &[&other])),
            },

            Opcode::Not => match self.pop()? {
                StackValue::Bool(b) => self.stack.push(StackValue::Bool(!b)),
                other => return Err(type_error(&inst.opcode, "a bool", &[&other])),
            },
            Opcode::And | Opcode::Or => {
                let (a, b) = self.pop_pair()?;
                let result = match (a, b) {
                    (StackValue::Bool(a), StackValue::Bool(b)) => {
                        if inst.opcode == Opcode::And { a && b } else { a || b }
                    }
                    (a, b) => return Err(type_error(&inst.opcode, "two bools", &[&a, &b])),
                };
                self.stack.push(StackValue::Bool(result));
            }

            Opcode::LessThan => self.int_compare(&inst.opcode, |a, b| a < b)?,
            Opcode::GreaterThan => self.int_compare(&inst.opcode, |a, b| a > b)?,
            Opcode::LessEqualThan => self.int_compare(&inst.opcode, |a, b| a <= b)?,
            Opcode::GreaterEqualThan => self.int_compare(&inst.opcode, |a, b| a >= b)?,
            Opcode::Equal | Opcode::NotEqual => {
                let (a, b) = self.pop_pair()?;
                if std::mem::discriminant(&a) != std::mem::discriminant(&b) {
                    return Err(type_error(&inst.opcode, "operands of the same type", &[&a, &b]));
                }
                let equal = a == b;
                let result = if inst.opcode == Opcode::Equal { equal } else { !equal };
                self.stack.push(StackValue::Bool(result));
            }

            Opcode::Label => {}
            Opcode::Jump => {
                self.pc = self.label(operand(inst)?)?;
            }
            Opcode::JumpIfFalse => {
                let target = self.label(operand(inst)?)?;
                match self.pop()? {
                    StackValue::Bool(false) => self.pc = target,
                    StackValue::Bool(true) => {}
                    other => return Err(type_error(&inst.opcode, "a bool condition", &[&other])),
                }
            }

            Opcode::NewArray => {
                let n = count_operand(inst)?;
                if self.stack.len() < n {
                    return Err(VmError::StackUnderflow);
                }
                let elements = self.stack.split_off(self.stack.len() - n);
                let id = self.heap.allocate(elements);
                self.stack.push(StackValue::ArrayRef(id));
            }
            Opcode::ArrayGet => {
                let index = self.pop_int(&inst.opcode)?;
                let id = self.pop_array(&inst.opcode)?;
                let value = self.heap.read(&id, index)?;
                self.stack.push(value);
            }
            Opcode::ArraySet => {
                let index = self.pop_int(&inst.opcode)?;
                let id = self.pop_array(&inst.opcode)?;
                let value = self.pop()?;
                self.heap.write(&id, index, value)?;
            }

            Opcode::Func => {
                let name = operand(inst)?;
                let entry = Entry { address: self.pc, arity: self.parameter_count() };
                log::debug!("registered function {}/{} at {}", name, entry.arity, entry.address);
                self.functions.insert(name.to_string(), entry);
                self.skip_function_body(name)?;
            }
            Opcode::EndFunc => {
                let name = operand(inst)?;
                if !self.functions.contains_key(name) {
                    return Err(VmError::UndefinedFunction { name: name.to_string() });
                }
            }
            Opcode::CallFunction => self.call(operand(inst)?)?,
            Opcode::Return => self.return_from_call()?,

            Opcode::ScopeStart => self.scopes.push(),
            Opcode::ScopeEnd => {
                self.scopes.pop()?;
                self.collect_garbage();
            }

            Opcode::Print => {
                let value = self.pop()?;
                let text = self.format_value(&value)?;
                writeln!(self.out, "{}", text)?;
            }

            Opcode::Unknown(name) => {
                log::warn!("skipping unknown opcode {} at {}", name, self.pc - 1);
            }
        }
        Ok(())
    }

    // ── Calls ───────────────────────────────────────────────────────

    /// Pop the argument count, then that many arguments in call order.
    fn pop_call_arguments(&mut self) -> VmResult<Vec<StackValue>> {
        let argc = match self.pop()? {
            StackValue::Int(n) => usize::try_from(n).map_err(|_| VmError::BadOperand {
                opcode: Opcode::CallFunction.to_string(),
                operand: n.to_string(),
            })?,
            other => return Err(type_error(&Opcode::CallFunction, "an int argument count", &[&other])),
        };
        if self.stack.len() < argc {
            return Err(VmError::StackUnderflow);
        }
        Ok(self.stack.split_off(self.stack.len() - argc))
    }

    fn call(&mut self, name: &str) -> VmResult<()> {
        let entry = *self
            .functions
            .get(name)
            .ok_or_else(|| VmError::UndefinedFunction { name: name.to_string() })?;
        let args = self.pop_call_arguments()?;
        if args.len() != entry.arity {
            return Err(VmError::Arity { name: name.to_string(), expected: entry.arity, found: args.len() });
        }
        self.stats.calls += 1;

        let is_tail = self.config.tail_calls
            && self.code.get(self.pc).is_some_and(|next| next.opcode == Opcode::Return);

        if is_tail {
            // The current frame stays; only its scopes and operand stack are replaced.
            // Without a frame the call replaces everything above the global scope.
            self.stats.tail_calls += 1;
            self.stack = args;
            let depth = self.frames.last().map_or(1, |f| f.scope_depth);
            self.scopes.truncate(depth);
            self.collect_garbage();
        } else {
            let saved_stack = std::mem::replace(&mut self.stack, args);
            self.frames.push(Frame {
                saved_stack,
                return_address: self.pc,
                scope_depth: self.scopes.depth(),
            });
            self.stats.peak_call_depth = self.stats.peak_call_depth.max(self.frames.len());
        }

        self.scopes.push();
        self.pc = entry.address;
        Ok(())
    }

    fn return_from_call(&mut self) -> VmResult<()> {
        let Some(frame) = self.frames.pop() else {
            log::debug!("top-level return at {}, halting", self.pc - 1);
            self.status = Status::Halted;
            return Ok(());
        };
        let value = self.pop()?;
        self.stack = frame.saved_stack;
        self.stack.push(value);
        self.scopes.truncate(frame.scope_depth);
        self.collect_garbage();
        self.pc = frame.return_address;
        Ok(())
    }

    /// Parameters are bound by the run of `STORE_VAR`s that opens a body.
    /// A `var` declaration always pushes its value first, so it never extends the run.
    fn parameter_count(&self) -> usize {
        self.code[self.pc..]
            .iter()
            .take_while(|inst| inst.opcode == Opcode::StoreVar)
            .count()
    }

    /// Move pc past the `END_FUNC` matching a `FUNC` that was just executed.
    fn skip_function_body(&mut self, name: &str) -> VmResult<()> {
        let mut depth = 1usize;
        while let Some(inst) = self.code.get(self.pc) {
            self.pc += 1;
            match inst.opcode {
                Opcode::Func => depth += 1,
                Opcode::EndFunc => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(());
                    }
                }
                _ => {}
            }
        }
        Err(VmError::UnterminatedFunction { name: name.to_string() })
    }

    fn label(&self, name: &str) -> VmResult<usize> {
        self.labels
            .get(name)
            .copied()
            .ok_or_else(|| VmError::LabelResolution { label: name.to_string() })
    }

    // ── Garbage collection ──────────────────────────────────────────

    /// One mark-sweep cycle rooted at the live stack, every saved stack and every scope.
    pub fn collect_garbage(&mut self) -> usize {
        let saved = self.frames.iter().flat_map(|f| f.saved_stack.iter());
        let roots = self.stack.iter().chain(saved).chain(self.scopes.values());
        self.heap.collect(roots)
    }

    // ── Values ──────────────────────────────────────────────────────

    /// Render a value the way `PRINT` does.
    pub fn format_value(&self, value: &StackValue) -> VmResult<String> {
        let mut out = String::new();
        self.write_value(value, &mut Vec::new(), &mut out)?;
        Ok(out)
    }

    fn write_value(&self, value: &StackValue, open: &mut Vec<String>, out: &mut String) -> VmResult<()> {
        match value {
            StackValue::Int(n) => out.push_str(&n.to_string()),
            StackValue::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
            StackValue::String(s) => {
                out.push('"');
                out.push_str(s);
                out.push('"');
            }
            StackValue::ArrayRef(id) => {
                // an array that contains itself
                if open.contains(id) {
                    out.push_str("[...]");
                    return Ok(());
                }
                let obj = self.heap.get(id)?;
                open.push(id.clone());
                out.push('[');
                for (i, element) in obj.elements.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    self.write_value(element, open, out)?;
                }
                out.push(']');
                open.pop();
            }
        }
        Ok(())
    }

    fn pop(&mut self) -> VmResult<StackValue> {
        self.stack.pop().ok_or(VmError::StackUnderflow)
    }

    /// Pop the right operand, then the left.
    fn pop_pair(&mut self) -> VmResult<(StackValue, StackValue)> {
        let b = self.pop()?;
        let a = self.pop()?;
        Ok((a, b))
    }

    fn pop_ints(&mut self, op: &Opcode) -> VmResult<(i64, i64)> {
        match self.pop_pair()? {
            (StackValue::Int(a), StackValue::Int(b)) => Ok((a, b)),
            (a, b) => Err(type_error(op, "two ints", &[&a, &b])),
        }
    }

    fn pop_int(&mut self, op: &Opcode) -> VmResult<i64> {
        match self.pop()? {
            StackValue::Int(n) => Ok(n),
            other => Err(type_error(op, "an int index", &[&other])),
        }
    }

    fn pop_array(&mut self, op: &Opcode) -> VmResult<String> {
        match self.pop()? {
            StackValue::ArrayRef(id) => Ok(id),
            other => Err(type_error(op, "an array", &[&other])),
        }
    }

    fn int_arith(&mut self, op: &Opcode, f: fn(i64, i64) -> Option<i64>) -> VmResult<()> {
        let (a, b) = self.pop_ints(op)?;
        let result = f(a, b).ok_or(VmError::Arithmetic("integer overflow"))?;
        self.stack.push(StackValue::Int(result));
        Ok(())
    }

    fn int_compare(&mut self, op: &Opcode, f: fn(i64, i64) -> bool) -> VmResult<()> {
        let (a, b) = self.pop_ints(op)?;
        self.stack.push(StackValue::Bool(f(a, b)));
        Ok(())
    }
}

fn operand(inst: &Instruction) -> VmResult<&str> {
    inst.name().ok_or_else(|| VmError::MissingOperand { opcode: inst.opcode.to_string() })
}

fn count_operand(inst: &Instruction) -> VmResult<usize> {
    let text = operand(inst)?;
    match Operand::sniff(text) {
        Operand::Int(n) if n >= 0 => Ok(n as usize),
        _ => Err(VmError::BadOperand { opcode: inst.opcode.to_string(), operand: text.to_string() }),
    }
}

fn type_error(op: &Opcode, expected: &'static str, found: &[&StackValue]) -> VmError {
    let found = found.iter().map(|v| v.type_name()).collect::<Vec<_>>().join(" and ");
    VmError::Type { op: op.to_string(), expected, found }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Span;
    use crate::bytecode::parse_listing;
    use crate::compiler;
    use crate::lexer;
    use crate::parser;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Clone, Default)]
    struct Captured(Rc<RefCell<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl Captured {
        fn lines(&self) -> Vec<String> {
            String::from_utf8_lossy(&self.0.borrow()).lines().map(str::to_string).collect()
        }
    }

    fn compile_source(source: &str) -> Vec<Instruction> {
        let tokens = lexer::lex(source)
            .unwrap()
            .into_iter()
            .map(|(t, r)| (t, Span::from(r)))
            .collect();
        let (program, errors) = parser::parse(tokens);
        assert!(errors.is_empty(), "parse errors: {:?}", errors);
        compiler::compile(&program).unwrap()
    }

    fn vm_for(source: &str, config: VmConfig) -> (Vm, Captured) {
        let out = Captured::default();
        let vm = Vm::new(compile_source(source))
            .with_config(config)
            .with_output(Box::new(out.clone()));
        (vm, out)
    }

    fn run_lines(source: &str) -> Vec<String> {
        let (mut vm, out) = vm_for(source, VmConfig::default());
        vm.run().unwrap();
        out.lines()
    }

    fn run_err(source: &str) -> VmError {
        let (mut vm, _) = vm_for(source, VmConfig::default());
        vm.run().unwrap_err()
    }

    #[test]
    fn vm_arithmetic_precedence() {
        assert_eq!(run_lines("print 2 + 3 * 4;"), vec!["14"]);
    }

    #[test]
    fn vm_print_formats() {
        let lines = run_lines("print 7; print true; print \"hi there\"; print [1, \"a\", false];");
        assert_eq!(lines, vec!["7", "true", "\"hi there\"", "[1, \"a\", false]"]);
    }

    #[test]
    fn vm_string_concat() {
        assert_eq!(run_lines("print \"ab\" + \"cd\";"), vec!["\"abcd\""]);
    }

    #[test]
    fn vm_quoted_digits_stay_strings() {
        assert_eq!(run_lines("print \"42\" + \"1\";"), vec!["\"421\""]);
    }

    #[test]
    fn vm_comparisons_and_logic() {
        let lines = run_lines("print 1 < 2; print 2 <= 1; print 3 == 3; print 3 != 3; print !(true and false) or false;");
        assert_eq!(lines, vec!["true", "false", "true", "false", "true"]);
    }

    #[test]
    fn vm_while_loop_counts() {
        let lines = run_lines("var a = 0; while (a < 3) { print a; a = a + 1; }");
        assert_eq!(lines, vec!["0", "1", "2"]);
    }

    #[test]
    fn vm_for_loop_counts() {
        let lines = run_lines("for (var i = 0; i < 3; i = i + 1) print i * 10;");
        assert_eq!(lines, vec!["0", "10", "20"]);
    }

    #[test]
    fn vm_if_else_branches() {
        let lines = run_lines("if (1 > 2) print \"yes\"; else print \"no\"; if (true) print 1;");
        assert_eq!(lines, vec!["\"no\"", "1"]);
    }

    #[test]
    fn vm_function_call_and_return() {
        let lines = run_lines("fun add(a, b) { return a + b; } print add(1, 2); print add(10, -4);");
        assert_eq!(lines, vec!["3", "6"]);
    }

    #[test]
    fn vm_recursion() {
        let source = "fun fib(n) { if (n < 2) return n; return fib(n - 1) + fib(n - 2); } print fib(15);";
        assert_eq!(run_lines(source), vec!["610"]);
    }

    #[test]
    fn vm_function_without_return_yields_null() {
        assert_eq!(run_lines("fun f() { } print f();"), vec!["\"null\""]);
    }

    #[test]
    fn vm_block_shadowing() {
        let lines = run_lines("var a = 1; { var a = 2; print a; } print a;");
        assert_eq!(lines, vec!["2", "1"]);
    }

    #[test]
    fn vm_array_index_and_assign() {
        let lines = run_lines("var xs = [1, 2, 3]; xs[1] = 20; print xs[1]; print xs;");
        assert_eq!(lines, vec!["20", "[1, 20, 3]"]);
    }

    #[test]
    fn vm_labels_are_idempotent() {
        let code = compile_source("var a = 0; while (a < 2) { if (a == 1) print a; a = a + 1; }");
        let mut vm = Vm::new(code);
        vm.resolve_labels();
        let first = vm.labels().clone();
        vm.resolve_labels();
        assert_eq!(&first, vm.labels());
        assert!(!first.is_empty());
        for (name, &index) in &first {
            assert_eq!(vm.code()[index].opcode, Opcode::Label);
            assert_eq!(vm.code()[index].name(), Some(name.as_str()));
        }
    }

    #[test]
    fn vm_scope_depth_restored_after_block() {
        let (mut vm, _) = vm_for("{ var a = 1; { var b = [a]; } }", VmConfig::default());
        let before = vm.scope_depth();
        vm.run().unwrap();
        assert_eq!(vm.scope_depth(), before);
    }

    #[test]
    fn vm_call_return_balance() {
        let code = parse_listing(
            "FUNC id\nSTORE_VAR x\nPUSH_VAR x\nRETURN\nEND_FUNC id\n\
             PUSH_CONST 7\nPUSH_CONST 5\nPUSH_CONST 1\nCALL_FUNCTION id\n",
        );
        let mut vm = Vm::new(code);
        vm.run().unwrap();
        assert_eq!(vm.stack(), &[StackValue::Int(7), StackValue::Int(5)]);
        assert_eq!(vm.call_depth(), 0);
        assert_eq!(vm.scope_depth(), 1);
        assert_eq!(vm.stats().peak_call_depth, 1);
    }

    const COUNTDOWN: &str = "fun count(n) { if (n == 0) return 0; return count(n - 1); } print count(10000);";

    #[test]
    fn vm_tail_calls_keep_depth_constant() {
        let config = VmConfig { tail_calls: true, ..VmConfig::default() };
        let (mut vm, out) = vm_for(COUNTDOWN, config);
        vm.run().unwrap();
        assert_eq!(out.lines(), vec!["0"]);
        assert_eq!(vm.stats().peak_call_depth, 1);
        assert_eq!(vm.stats().tail_calls, 10000);
        assert_eq!(vm.call_depth(), 0);
        assert_eq!(vm.scope_depth(), 1);
    }

    #[test]
    fn vm_without_tail_calls_depth_grows() {
        let (mut vm, out) = vm_for(COUNTDOWN, VmConfig::default());
        vm.run().unwrap();
        assert_eq!(out.lines(), vec!["0"]);
        assert_eq!(vm.stats().peak_call_depth, 10001);
        assert_eq!(vm.stats().tail_calls, 0);
    }

    #[test]
    fn vm_top_level_tail_recursion_keeps_scopes_bounded() {
        let config = VmConfig { tail_calls: true, ..VmConfig::default() };
        let source = "fun c(n) { if (n == 0) return 0; return c(n - 1); } return c(1000);";
        let (mut vm, _) = vm_for(source, config);
        vm.run().unwrap();
        assert_eq!(vm.stats().tail_calls, 1001);
        assert_eq!(vm.stats().peak_call_depth, 0);
        // the global scope plus the scope of the final call
        assert_eq!(vm.scope_depth(), 2);
        assert_eq!(vm.gc_stats().collections, 1001);
    }

    #[test]
    fn vm_too_many_arguments() {
        match run_err("fun f(a) { print a; } f(1, 2);") {
            VmError::Arity { name, expected, found } => {
                assert_eq!(name, "f");
                assert_eq!(expected, 1);
                assert_eq!(found, 2);
            }
            other => panic!("expected Arity, got {:?}", other),
        }
    }

    #[test]
    fn vm_too_few_arguments() {
        let err = run_err("fun add(a, b) { return a + b; } print add(1);");
        assert_eq!(err.to_string(), "add takes 2 argument(s) but 1 were supplied");
    }

    #[test]
    fn vm_locals_do_not_count_as_parameters() {
        let lines = run_lines("fun f(a) { var b; var c = a; print c; } f(3);");
        assert_eq!(lines, vec!["3"]);
    }

    #[test]
    fn vm_failing_instruction_after_error() {
        let mut vm = Vm::new(parse_listing("PUSH_CONST 1\nPUSH_VAR nope\nPRINT"));
        assert!(vm.run().is_err());
        let (at, inst) = vm.failing_instruction().unwrap();
        assert_eq!(at, 1);
        assert_eq!(inst.to_string(), "PUSH_VAR nope");
    }

    #[test]
    fn vm_division_by_zero() {
        assert!(matches!(run_err("print 1/0;"), VmError::Arithmetic("division by zero")));
    }

    #[test]
    fn vm_overflow_is_arithmetic_error() {
        assert!(matches!(run_err("print 9223372036854775807 + 1;"), VmError::Arithmetic(_)));
    }

    #[test]
    fn vm_out_of_bounds_read() {
        assert!(matches!(run_err("var xs = [1]; print xs[3];"), VmError::Bounds { index: 3, len: 1 }));
    }

    #[test]
    fn vm_undefined_variable() {
        match run_err("print missing;") {
            VmError::UndefinedVariable { name } => assert_eq!(name, "missing"),
            other => panic!("expected UndefinedVariable, got {:?}", other),
        }
    }

    #[test]
    fn vm_undefined_function() {
        assert!(matches!(run_err("nope(1);"), VmError::UndefinedFunction { .. }));
    }

    #[test]
    fn vm_type_errors() {
        assert!(matches!(run_err("print 1 + true;"), VmError::Type { .. }));
        assert!(matches!(run_err("print 1 == \"1\";"), VmError::Type { .. }));
        assert!(matches!(run_err("if (1) print 1;"), VmError::Type { .. }));
        let err = run_err("print -true;");
        assert_eq!(err.to_string(), "type error: NEG expects an int, got bool");
    }

    #[test]
    fn vm_missing_label() {
        let mut vm = Vm::new(parse_listing("JUMP nowhere"));
        assert!(matches!(vm.run(), Err(VmError::LabelResolution { .. })));
    }

    #[test]
    fn vm_underflow() {
        let mut vm = Vm::new(parse_listing("ADD"));
        assert!(matches!(vm.run(), Err(VmError::StackUnderflow)));
    }

    #[test]
    fn vm_unknown_opcode_is_skipped() {
        let out = Captured::default();
        let mut vm = Vm::new(parse_listing("GET_PROPERTY x\nPUSH_CONST 1\nPRINT"))
            .with_output(Box::new(out.clone()));
        vm.run().unwrap();
        assert_eq!(out.lines(), vec!["1"]);
    }

    #[test]
    fn vm_top_level_return_halts() {
        let out = Captured::default();
        let mut vm = Vm::new(parse_listing("PUSH_CONST 1\nPRINT\nPUSH_CONST null\nRETURN\nPUSH_CONST 2\nPRINT"))
            .with_output(Box::new(out.clone()));
        vm.run().unwrap();
        assert_eq!(out.lines(), vec!["1"]);
        assert_eq!(vm.status(), Status::Halted);
    }

    #[test]
    fn vm_nested_function_skip() {
        let code = parse_listing(
            "FUNC outer\nFUNC inner\nPUSH_CONST 1\nRETURN\nEND_FUNC inner\n\
             PUSH_CONST 0\nCALL_FUNCTION inner\nRETURN\nEND_FUNC outer\n\
             PUSH_CONST 0\nCALL_FUNCTION outer\nPRINT\n",
        );
        let out = Captured::default();
        let mut vm = Vm::new(code).with_output(Box::new(out.clone()));
        vm.run().unwrap();
        assert_eq!(out.lines(), vec!["1"]);
    }

    #[test]
    fn vm_unterminated_function() {
        let mut vm = Vm::new(parse_listing("FUNC f\nPUSH_CONST 1"));
        assert!(matches!(vm.run(), Err(VmError::UnterminatedFunction { .. })));
    }

    #[test]
    fn vm_gc_frees_block_locals() {
        let (mut vm, _) = vm_for("var keep = [1]; { var tmp = [2, 3]; }", VmConfig::default());
        vm.run().unwrap();
        assert_eq!(vm.heap().len(), 1);
        assert_eq!(vm.gc_stats().collections, 1);
        assert_eq!(vm.gc_stats().freed, 1);
        match vm.variable("keep") {
            Some(StackValue::ArrayRef(id)) => assert!(vm.heap().contains(id)),
            other => panic!("expected array, got {:?}", other),
        }
    }

    #[test]
    fn vm_gc_keeps_arrays_held_by_callers() {
        let source = "fun make() { var t = [9]; return t; } fun f(a) { { } return a; } print f(make());";
        assert_eq!(run_lines(source), vec!["[9]"]);
    }

    #[test]
    fn vm_self_containing_array_prints() {
        assert_eq!(run_lines("var a = [0]; a[0] = a; print a;"), vec!["[[...]]"]);
    }

    #[test]
    fn vm_append_continues_with_globals() {
        let out = Captured::default();
        let mut vm = Vm::new(compile_source("var a = 1; fun double(x) { return x * 2; }"))
            .with_output(Box::new(out.clone()));
        vm.run().unwrap();

        let base = vm.code().len();
        let tokens = lexer::lex("print double(a + 1);")
            .unwrap()
            .into_iter()
            .map(|(t, r)| (t, Span::from(r)))
            .collect();
        let (program, _) = parser::parse(tokens);
        let more = compiler::Compiler::starting_at(base).compile(&program.statements).unwrap();
        vm.append(more);
        vm.run().unwrap();
        assert_eq!(out.lines(), vec!["4"]);
    }

    #[test]
    fn vm_append_recovers_after_error() {
        let out = Captured::default();
        let mut vm = Vm::new(compile_source("var a = 5; { print 1/0; }")).with_output(Box::new(out.clone()));
        assert!(vm.run().is_err());
        assert_eq!(vm.scope_depth(), 2);

        let base = vm.code().len();
        vm.append(parse_listing("PUSH_VAR a\nPRINT"));
        assert_eq!(vm.scope_depth(), 1);
        assert_eq!(vm.code().len(), base + 2);
        vm.run().unwrap();
        assert_eq!(out.lines(), vec!["5"]);
    }
}
