//! Straight-line interpreter for sealed artifacts.
//!
//! Supports constants, locals, globals, operators, jumps (forward and
//! absolute), calls into native functions and nested code artifacts,
//! container builds and unpacking. Block-region and closure instructions
//! assemble but report [`ExecutionError::Unsupported`] when reached; the
//! constant folder never emits them.

use hashbrown::HashMap;
use std::sync::Arc;

use crate::asm::{BinOp, CmpOp, Instruction, UnOp};
use crate::values::Value;

use super::code::Code;
use super::error::ExecutionError;
use super::stack::Stack;

const fn bin_symbol(op: BinOp) -> &'static str {
    match op {
        BinOp::Add => "+",
        BinOp::Sub => "-",
        BinOp::Mul => "*",
        BinOp::Div => "/",
        BinOp::Mod => "%",
        BinOp::Pow => "**",
    }
}

const fn cmp_symbol(op: CmpOp) -> &'static str {
    match op {
        CmpOp::Lt => "<",
        CmpOp::Le => "<=",
        CmpOp::Eq => "==",
        CmpOp::Ne => "!=",
        CmpOp::Gt => ">",
        CmpOp::Ge => ">=",
    }
}

fn as_float(value: &Value) -> Option<f64> {
    match value {
        Value::Int(i) => Some(*i as f64),
        Value::Float(x) => Some(*x),
        _ => None,
    }
}

fn binary(op: BinOp, lhs: Value, rhs: Value) -> Result<Value, ExecutionError> {
    let mismatch = ExecutionError::TypeMismatch {
        op: bin_symbol(op),
        lhs: lhs.type_name(),
        rhs: rhs.type_name(),
    };
    if let (Value::Int(a), Value::Int(b)) = (&lhs, &rhs) {
        let (a, b) = (*a, *b);
        return match op {
            BinOp::Add => Ok(Value::Int(a.wrapping_add(b))),
            BinOp::Sub => Ok(Value::Int(a.wrapping_sub(b))),
            BinOp::Mul => Ok(Value::Int(a.wrapping_mul(b))),
            BinOp::Div if b == 0 => Err(ExecutionError::DivisionByZero),
            BinOp::Div => Ok(Value::Int(a.wrapping_div(b))),
            BinOp::Mod if b == 0 => Err(ExecutionError::DivisionByZero),
            BinOp::Mod => Ok(Value::Int(a.wrapping_rem(b))),
            BinOp::Pow if b < 0 => Err(ExecutionError::NegativeExponent),
            BinOp::Pow => Ok(Value::Int(a.wrapping_pow(b as u32))),
        };
    }
    if let (Some(a), Some(b)) = (as_float(&lhs), as_float(&rhs)) {
        return Ok(Value::Float(match op {
            BinOp::Add => a + b,
            BinOp::Sub => a - b,
            BinOp::Mul => a * b,
            BinOp::Div => a / b,
            BinOp::Mod => a % b,
            BinOp::Pow => a.powf(b),
        }));
    }
    if let (BinOp::Add, Value::Str(a), Value::Str(b)) = (op, &lhs, &rhs) {
        let mut s = String::with_capacity(a.len() + b.len());
        s.push_str(a);
        s.push_str(b);
        return Ok(Value::str(&s));
    }
    Err(mismatch)
}

/// Runtime equality: numeric values compare across `Int`/`Float`, everything
/// else falls back to the value's own equality.
fn runtime_eq(lhs: &Value, rhs: &Value) -> bool {
    if let (Some(a), Some(b)) = (as_float(lhs), as_float(rhs)) {
        return a == b;
    }
    lhs == rhs
}

fn compare(op: CmpOp, lhs: &Value, rhs: &Value) -> Result<bool, ExecutionError> {
    use core::cmp::Ordering;
    match op {
        CmpOp::Eq => return Ok(runtime_eq(lhs, rhs)),
        CmpOp::Ne => return Ok(!runtime_eq(lhs, rhs)),
        _ => {}
    }
    let ord: Option<Ordering> = match (lhs, rhs) {
        (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
        _ => match (as_float(lhs), as_float(rhs)) {
            // NaN ordering comparisons are false, not errors.
            (Some(a), Some(b)) => a.partial_cmp(&b),
            _ => {
                return Err(ExecutionError::TypeMismatch {
                    op: cmp_symbol(op),
                    lhs: lhs.type_name(),
                    rhs: rhs.type_name(),
                });
            }
        },
    };
    Ok(match (op, ord) {
        (_, None) => false,
        (CmpOp::Lt, Some(o)) => o == Ordering::Less,
        (CmpOp::Le, Some(o)) => o != Ordering::Greater,
        (CmpOp::Gt, Some(o)) => o == Ordering::Greater,
        (CmpOp::Ge, Some(o)) => o != Ordering::Less,
        (CmpOp::Eq | CmpOp::Ne, Some(_)) => unreachable!("handled above"),
    })
}

fn unary(op: UnOp, value: Value) -> Result<Value, ExecutionError> {
    match (op, &value) {
        (UnOp::Neg, Value::Int(i)) => Ok(Value::Int(i.wrapping_neg())),
        (UnOp::Neg, Value::Float(x)) => Ok(Value::Float(-x)),
        (UnOp::Not, v) => Ok(Value::Bool(!v.is_truthy())),
        (UnOp::Neg, v) => Err(ExecutionError::TypeMismatch {
            op: "-",
            lhs: v.type_name(),
            rhs: v.type_name(),
        }),
    }
}

/// One activation of a sealed artifact.
pub struct VM<'c> {
    code: &'c Code,
    stack: Stack<Value>,
    locals: Vec<Option<Value>>,
    globals: HashMap<Arc<str>, Value>,
    ip: usize,
}

impl<'c> VM<'c> {
    pub fn new(code: &'c Code) -> Self {
        Self::with_globals(code, HashMap::new())
    }

    pub fn with_globals(code: &'c Code, globals: HashMap<Arc<str>, Value>) -> Self {
        VM {
            code,
            stack: Stack::new(code.max_stack as usize),
            locals: vec![None; code.varnames.len()],
            globals,
            ip: 0,
        }
    }

    pub fn define_global(&mut self, name: &str, value: Value) {
        self.globals.insert(Arc::from(name), value);
    }

    /// Run a zero-argument artifact to completion.
    pub fn execute(code: &Code) -> Result<Value, ExecutionError> {
        VM::new(code).call(&[])
    }

    /// Bind `args` to the leading local slots and run to the first return.
    pub fn call(&mut self, args: &[Value]) -> Result<Value, ExecutionError> {
        if args.len() as u32 != self.code.arg_count {
            return Err(ExecutionError::WrongArity {
                name: self.code.name.to_string(),
                expected: self.code.arg_count,
                got: args.len() as u32,
            });
        }
        for (slot, arg) in self.locals.iter_mut().zip(args) {
            *slot = Some(arg.clone());
        }
        self.run()
    }

    fn pop(&mut self) -> Result<Value, ExecutionError> {
        self.stack.pop().ok_or(ExecutionError::StackUnderflow)
    }

    fn local_name(&self, index: usize) -> String {
        self.code
            .varnames
            .get(index)
            .map(|n| n.to_string())
            .unwrap_or_else(|| format!("#{}", index))
    }

    fn run(&mut self) -> Result<Value, ExecutionError> {
        let mut wide: u32 = 0;
        loop {
            let instr = *self
                .code
                .instructions
                .get(self.ip)
                .ok_or(ExecutionError::OutOfBounds)?;
            self.ip += 1;

            if let Instruction::WideArg(high) = instr {
                wide = (wide | high as u32) << 8;
                continue;
            }
            let operand = |low: u8| wide | low as u32;

            match instr {
                Instruction::WideArg(_) => unreachable!("handled above"),
                Instruction::Nop => {}
                Instruction::Halt => return Err(ExecutionError::Halted),

                Instruction::LoadConst(idx) => {
                    let value = self
                        .code
                        .constants
                        .get(operand(idx) as usize)
                        .ok_or(ExecutionError::OutOfBounds)?
                        .clone();
                    self.stack.push(value);
                }
                Instruction::Pop => {
                    self.pop()?;
                }
                Instruction::Dup => {
                    let top = self.pop()?;
                    self.stack.push(top.clone());
                    self.stack.push(top);
                }
                Instruction::RotTwo => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    self.stack.push(b);
                    self.stack.push(a);
                }
                Instruction::RotThree => {
                    let c = self.pop()?;
                    let b = self.pop()?;
                    let a = self.pop()?;
                    self.stack.push(c);
                    self.stack.push(a);
                    self.stack.push(b);
                }

                Instruction::LoadLocal(idx) => {
                    let idx = operand(idx) as usize;
                    let value = self
                        .locals
                        .get(idx)
                        .cloned()
                        .flatten()
                        .ok_or_else(|| ExecutionError::UnboundLocal(self.local_name(idx)))?;
                    self.stack.push(value);
                }
                Instruction::StoreLocal(idx) => {
                    let idx = operand(idx) as usize;
                    let value = self.pop()?;
                    let slot = self
                        .locals
                        .get_mut(idx)
                        .ok_or(ExecutionError::OutOfBounds)?;
                    *slot = Some(value);
                }
                Instruction::LoadGlobal(idx) => {
                    let name = self
                        .code
                        .names
                        .get(operand(idx) as usize)
                        .ok_or(ExecutionError::OutOfBounds)?;
                    let value = self
                        .globals
                        .get(name)
                        .cloned()
                        .ok_or_else(|| ExecutionError::UndefinedGlobal(name.to_string()))?;
                    self.stack.push(value);
                }
                Instruction::StoreGlobal(idx) => {
                    let name = self
                        .code
                        .names
                        .get(operand(idx) as usize)
                        .ok_or(ExecutionError::OutOfBounds)?
                        .clone();
                    let value = self.pop()?;
                    self.globals.insert(name, value);
                }

                Instruction::BinaryOp(op) => {
                    let rhs = self.pop()?;
                    let lhs = self.pop()?;
                    self.stack.push(binary(op, lhs, rhs)?);
                }
                Instruction::UnaryOp(op) => {
                    let value = self.pop()?;
                    self.stack.push(unary(op, value)?);
                }
                Instruction::CompareOp(op) => {
                    let rhs = self.pop()?;
                    let lhs = self.pop()?;
                    self.stack.push(Value::Bool(compare(op, &lhs, &rhs)?));
                }

                Instruction::Jump(off) => {
                    self.ip += operand(off) as usize;
                }
                Instruction::JumpIfFalse(off) => {
                    let cond = self.stack.peek().ok_or(ExecutionError::StackUnderflow)?;
                    if !cond.is_truthy() {
                        self.ip += operand(off) as usize;
                    }
                }
                Instruction::JumpIfTrue(off) => {
                    let cond = self.stack.peek().ok_or(ExecutionError::StackUnderflow)?;
                    if cond.is_truthy() {
                        self.ip += operand(off) as usize;
                    }
                }
                Instruction::JumpAbsolute(target) => {
                    self.ip = operand(target) as usize;
                }

                Instruction::Return => return self.pop(),

                Instruction::CallFunction(low) => {
                    let packed = operand(low);
                    let argc = (packed & 0xFF) as usize;
                    let kwargc = (packed >> 8) as usize;
                    let result = self.call_value(argc, kwargc)?;
                    self.stack.push(result);
                }

                Instruction::BuildTuple(n) => {
                    let items = self
                        .stack
                        .pop_n(operand(n) as usize)
                        .ok_or(ExecutionError::StackUnderflow)?;
                    self.stack.push(Value::tuple(items));
                }
                Instruction::BuildList(n) => {
                    let items = self
                        .stack
                        .pop_n(operand(n) as usize)
                        .ok_or(ExecutionError::StackUnderflow)?;
                    self.stack.push(Value::list(items));
                }
                Instruction::UnpackSequence(n) => {
                    let expected = operand(n);
                    let seq = self.pop()?;
                    let items: Vec<Value> = match &seq {
                        Value::Tuple(t) => t.to_vec(),
                        Value::List(l) => l.as_ref().clone(),
                        _ => {
                            return Err(ExecutionError::TypeMismatch {
                                op: "unpack",
                                lhs: seq.type_name(),
                                rhs: "tuple",
                            });
                        }
                    };
                    if items.len() as u32 != expected {
                        return Err(ExecutionError::UnpackMismatch {
                            expected,
                            got: items.len() as u32,
                        });
                    }
                    // First element ends up on top.
                    for item in items.into_iter().rev() {
                        self.stack.push(item);
                    }
                }

                Instruction::LoadDeref(_)
                | Instruction::StoreDeref(_)
                | Instruction::LoadClosure(_)
                | Instruction::MakeClosure(_)
                | Instruction::SetupLoop(_)
                | Instruction::SetupExcept(_)
                | Instruction::SetupFinally(_)
                | Instruction::PopBlock
                | Instruction::EndFinally
                | Instruction::Break
                | Instruction::ContinueLoop(_) => {
                    return Err(ExecutionError::Unsupported(instr));
                }
            }
            wide = 0;
        }
    }

    fn call_value(&mut self, argc: usize, kwargc: usize) -> Result<Value, ExecutionError> {
        let raw_kwargs = self
            .stack
            .pop_n(kwargc * 2)
            .ok_or(ExecutionError::StackUnderflow)?;
        let mut kwargs: Vec<(Arc<str>, Value)> = Vec::with_capacity(kwargc);
        let mut iter = raw_kwargs.into_iter();
        while let (Some(name), Some(value)) = (iter.next(), iter.next()) {
            match name {
                Value::Str(s) => kwargs.push((s, value)),
                other => {
                    return Err(ExecutionError::TypeMismatch {
                        op: "keyword",
                        lhs: "str",
                        rhs: other.type_name(),
                    });
                }
            }
        }
        let args = self
            .stack
            .pop_n(argc)
            .ok_or(ExecutionError::StackUnderflow)?;
        let func = self.pop()?;
        match func {
            Value::Native(f) => (f.func)(&args, &kwargs),
            Value::Code(code) => {
                if !kwargs.is_empty() {
                    return Err(ExecutionError::UnexpectedKeywords);
                }
                // The callee sees a snapshot of the caller's globals; its
                // own global writes stay local to the activation.
                VM::with_globals(&code, self.globals.clone()).call(&args)
            }
            other => Err(ExecutionError::NotCallable(other.type_name())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm::Assembler;
    use crate::values::NativeFunction;

    fn seal(build: impl FnOnce(&mut Assembler)) -> Code {
        let mut asm = Assembler::new();
        build(&mut asm);
        asm.seal().unwrap()
    }

    #[test]
    fn test_arithmetic() {
        let code = seal(|asm| {
            asm.load_const(Value::Int(6)).unwrap();
            asm.load_const(Value::Int(7)).unwrap();
            asm.binary_op(BinOp::Mul).unwrap();
        });
        assert_eq!(VM::execute(&code).unwrap(), Value::Int(42));
    }

    #[test]
    fn test_int_float_promotion() {
        let code = seal(|asm| {
            asm.load_const(Value::Int(1)).unwrap();
            asm.load_const(Value::Float(0.5)).unwrap();
            asm.binary_op(BinOp::Add).unwrap();
        });
        assert_eq!(VM::execute(&code).unwrap(), Value::Float(1.5));
    }

    #[test]
    fn test_division_by_zero() {
        let code = seal(|asm| {
            asm.load_const(Value::Int(1)).unwrap();
            asm.load_const(Value::Int(0)).unwrap();
            asm.binary_op(BinOp::Div).unwrap();
        });
        assert!(matches!(
            VM::execute(&code),
            Err(ExecutionError::DivisionByZero)
        ));
    }

    #[test]
    fn test_conditional_jump_does_not_pop() {
        // false and "x": the chain result is the false left operand.
        let code = seal(|asm| {
            asm.load_const(Value::Bool(false)).unwrap();
            let end = asm.jump_if_false().unwrap();
            asm.pop_top().unwrap();
            asm.load_const(Value::str("x")).unwrap();
            asm.resolve(end).unwrap();
        });
        assert_eq!(VM::execute(&code).unwrap(), Value::Bool(false));
    }

    #[test]
    fn test_native_call_with_keywords() {
        let join = NativeFunction::new("join", |args, kwargs| {
            let mut out = String::new();
            for a in args {
                out.push_str(a.as_str().unwrap_or(""));
            }
            for (name, v) in kwargs {
                out.push_str(name);
                out.push_str(v.as_str().unwrap_or(""));
            }
            Ok(Value::str(&out))
        });
        let code = seal(|asm| {
            asm.load_const(Value::Native(join)).unwrap();
            asm.load_const(Value::str("a")).unwrap();
            asm.load_const(Value::str("k")).unwrap();
            asm.load_const(Value::str("b")).unwrap();
            asm.call_function(1, 1).unwrap();
        });
        assert_eq!(VM::execute(&code).unwrap(), Value::str("akb"));
    }

    #[test]
    fn test_code_call_checks_arity() {
        let callee = seal(|asm| {
            asm.add_argument("x").unwrap();
            asm.load_local("x").unwrap();
            asm.load_local("x").unwrap();
            asm.binary_op(BinOp::Add).unwrap();
        });
        let callee = Value::Code(Arc::new(callee));

        let good = seal(|asm| {
            asm.load_const(callee.clone()).unwrap();
            asm.load_const(Value::Int(21)).unwrap();
            asm.call_function(1, 0).unwrap();
        });
        assert_eq!(VM::execute(&good).unwrap(), Value::Int(42));

        let bad = seal(|asm| {
            asm.load_const(callee).unwrap();
            asm.call_function(0, 0).unwrap();
        });
        assert!(matches!(
            VM::execute(&bad),
            Err(ExecutionError::WrongArity { expected: 1, got: 0, .. })
        ));
    }

    #[test]
    fn test_unbound_local() {
        let code = seal(|asm| {
            asm.add_argument("x").unwrap();
            asm.load_local("y").unwrap();
        });
        let err = VM::new(&code).call(&[Value::Int(1)]).unwrap_err();
        assert!(matches!(err, ExecutionError::UnboundLocal(name) if name == "y"));
    }

    #[test]
    fn test_unpack_sequence() {
        let code = seal(|asm| {
            asm.load_const(Value::tuple(vec![Value::Int(1), Value::Int(2)]))
                .unwrap();
            asm.unpack_sequence(2).unwrap();
            // First element on top; subtract to prove the order: 1 - 2.
            asm.binary_op(BinOp::Sub).unwrap();
        });
        assert_eq!(VM::execute(&code).unwrap(), Value::Int(-1));
    }

    #[test]
    fn test_globals() {
        let code = seal(|asm| {
            asm.load_const(Value::Int(10)).unwrap();
            asm.store_global("n").unwrap();
            asm.load_global("n").unwrap();
        });
        assert_eq!(VM::execute(&code).unwrap(), Value::Int(10));
    }

    #[test]
    fn test_undefined_global() {
        let code = seal(|asm| {
            asm.load_global("missing").unwrap();
        });
        assert!(matches!(
            VM::execute(&code),
            Err(ExecutionError::UndefinedGlobal(name)) if name == "missing"
        ));
    }

    #[test]
    fn test_block_instructions_unsupported() {
        use crate::asm::BlockKind;
        let code = {
            let mut asm = Assembler::new();
            let frame = asm.push_block(BlockKind::TryFinally).unwrap();
            asm.load_const(Value::Int(1)).unwrap();
            asm.pop_top().unwrap();
            asm.pop_block(frame).unwrap();
            asm.end_finally().unwrap();
            asm.seal().unwrap()
        };
        assert!(matches!(
            VM::execute(&code),
            Err(ExecutionError::Unsupported(_))
        ));
    }
}
