//! The node tree and its code generation.
//!
//! Nodes come in two shapes that share one enum: expressions leave exactly
//! one value on the stack, statements leave none. The composite constructs
//! (`If`, `Suite`, loops, the protection regions) thread the assembler's
//! height tracking through their branches, so a construct whose branches
//! disagree about the stack is rejected at compile time, not discovered at
//! runtime.
//!
//! Trees are ordinary values: `Clone`, `Eq`, `Hash`. Equality is structural
//! except for [`NodeType`] handles and identity-compared constants, which
//! follow pointer identity.

use std::sync::Arc;

use crate::asm::{Assembler, AsmError, BinOp, BlockKind, CmpOp, UnOp};
use crate::values::Value;

use super::fold;

/// Code generator signature for externally-defined node types.
pub type CompileFn = fn(&[Node], &mut Assembler) -> Result<(), AsmError>;

struct NodeTypeInner {
    name: Arc<str>,
    arity: usize,
    compile: CompileFn,
}

/// Descriptor for a node kind defined outside this crate.
///
/// The closed [`Node`] enum covers the built-in constructs; anything else is
/// a `Custom` node carrying one of these. Two descriptors are equal only if
/// they are the same allocation, so independently-defined types never
/// collide, whatever their names.
#[derive(Clone)]
pub struct NodeType {
    inner: Arc<NodeTypeInner>,
}

impl NodeType {
    pub fn new(name: &str, arity: usize, compile: CompileFn) -> NodeType {
        NodeType {
            inner: Arc::new(NodeTypeInner {
                name: Arc::from(name),
                arity,
                compile,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn arity(&self) -> usize {
        self.inner.arity
    }

    /// Instantiate a node of this type.
    pub fn node(&self, args: Vec<Node>) -> Node {
        debug_assert_eq!(args.len(), self.inner.arity, "wrong arity for {}", self.name());
        Node::Custom {
            ty: self.clone(),
            args,
        }
    }
}

impl PartialEq for NodeType {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for NodeType {}

impl core::hash::Hash for NodeType {
    fn hash<H: core::hash::Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.inner) as usize).hash(state);
    }
}

impl core::fmt::Debug for NodeType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "NodeType({})", self.inner.name)
    }
}

/// One tree node. See the module docs for the expression/statement split.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Node {
    // Expressions.
    Const(Value),
    Local(Arc<str>),
    Global(Arc<str>),
    BinaryOp {
        op: BinOp,
        lhs: Box<Node>,
        rhs: Box<Node>,
    },
    UnaryOp {
        op: UnOp,
        operand: Box<Node>,
    },
    /// Short-circuit conjunction; value is the first falsy operand, or the
    /// last operand.
    And(Vec<Node>),
    /// Short-circuit disjunction; value is the first truthy operand, or the
    /// last operand.
    Or(Vec<Node>),
    /// Chained comparison: each operand is evaluated at most once, and the
    /// chain short-circuits on the first false link.
    Compare {
        first: Box<Node>,
        rest: Vec<(CmpOp, Node)>,
    },
    Call {
        func: Box<Node>,
        args: Vec<Node>,
        kwargs: Vec<(Arc<str>, Node)>,
        /// Whether an all-constant zero-argument call may be folded.
        fold_zero_arg: bool,
    },
    TupleOf(Vec<Node>),
    ListOf(Vec<Node>),
    /// Two-way branch. Works as an expression or a statement, as long as
    /// both branches leave the same number of values (a branch ending in an
    /// unconditional transfer is exempt).
    If {
        cond: Box<Node>,
        then: Box<Node>,
        orelse: Box<Node>,
    },
    /// Expression: yields the body's value, or the handler's if the body
    /// raises.
    TryExcept {
        body: Box<Node>,
        handler: Box<Node>,
    },

    // Statements.
    /// Statement: runs `cleanup` on both the normal and the unwinding path.
    TryFinally {
        body: Box<Node>,
        cleanup: Box<Node>,
    },
    While {
        cond: Box<Node>,
        body: Box<Node>,
        /// Runs when the loop exits without `break`.
        orelse: Option<Box<Node>>,
    },
    Break,
    Continue,
    Return(Option<Box<Node>>),
    Suite(Vec<Node>),
    /// Evaluate an expression for effect and drop its value.
    Discard(Box<Node>),
    Pass,

    /// Externally-defined construct; codegen is delegated to the type.
    Custom { ty: NodeType, args: Vec<Node> },
}

impl Node {
    pub fn constant(value: impl Into<Value>) -> Node {
        Node::Const(value.into())
    }

    pub fn local(name: &str) -> Node {
        Node::Local(Arc::from(name))
    }

    pub fn global(name: &str) -> Node {
        Node::Global(Arc::from(name))
    }

    /// Binary operation, pre-folded when both operands are constant.
    pub fn binary(op: BinOp, lhs: Node, rhs: Node) -> Result<Node, AsmError> {
        fold::fold_args(
            move |mut args| {
                let rhs = args.pop().unwrap_or(Node::Pass);
                let lhs = args.pop().unwrap_or(Node::Pass);
                Node::BinaryOp {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                }
            },
            vec![lhs, rhs],
        )
    }

    /// Unary operation, pre-folded when the operand is constant.
    pub fn unary(op: UnOp, operand: Node) -> Result<Node, AsmError> {
        fold::fold_args(
            move |mut args| Node::UnaryOp {
                op,
                operand: Box::new(args.pop().unwrap_or(Node::Pass)),
            },
            vec![operand],
        )
    }

    /// Conjunction with constant leading operands folded away: a statically
    /// true operand is omitted, a statically false one truncates the chain.
    pub fn and(parts: Vec<Node>) -> Node {
        Self::logical(parts, true)
    }

    /// Disjunction, dual folding of [`Node::and`].
    pub fn or(parts: Vec<Node>) -> Node {
        Self::logical(parts, false)
    }

    fn logical(parts: Vec<Node>, conjunction: bool) -> Node {
        let total = parts.len();
        if total == 0 {
            // An empty chain still has to yield one value; collapse it to
            // the identity of the operation, as `all()`/`any()` of nothing.
            return Node::Const(Value::Bool(conjunction));
        }
        let mut kept = Vec::with_capacity(total);
        for (i, part) in parts.into_iter().enumerate() {
            let last = i + 1 == total;
            if !last {
                if let Ok(v) = fold::const_value(&part) {
                    if v.is_truthy() == conjunction {
                        // This operand can never decide the chain.
                        continue;
                    }
                    // This operand always decides the chain.
                    kept.push(Node::Const(v));
                    break;
                }
            }
            kept.push(part);
        }
        if kept.len() == 1 {
            return kept.remove(0);
        }
        if conjunction {
            Node::And(kept)
        } else {
            Node::Or(kept)
        }
    }

    pub fn compare(first: Node, rest: Vec<(CmpOp, Node)>) -> Node {
        Node::Compare {
            first: Box::new(first),
            rest,
        }
    }

    /// Call node. When the callee and every argument are constant and there
    /// is at least one argument, the call is evaluated now and replaced by
    /// its result; an evaluation failure is reported immediately.
    pub fn call(
        func: Node,
        args: Vec<Node>,
        kwargs: Vec<(&str, Node)>,
    ) -> Result<Node, AsmError> {
        Self::build_call(func, args, kwargs, false)
    }

    /// Like [`Node::call`], but an all-constant call with zero arguments is
    /// folded too. Only for callees known to be pure.
    pub fn call_folding_zero_arg(
        func: Node,
        args: Vec<Node>,
        kwargs: Vec<(&str, Node)>,
    ) -> Result<Node, AsmError> {
        Self::build_call(func, args, kwargs, true)
    }

    fn build_call(
        func: Node,
        args: Vec<Node>,
        kwargs: Vec<(&str, Node)>,
        fold_zero_arg: bool,
    ) -> Result<Node, AsmError> {
        let kwargs: Vec<(Arc<str>, Node)> = kwargs
            .into_iter()
            .map(|(name, node)| (Arc::from(name), node))
            .collect();
        let node = Node::Call {
            func: Box::new(func),
            args,
            kwargs,
            fold_zero_arg,
        };
        fold::fold_call(node)
    }

    /// Tuple literal. Compiles to a pooled constant when every element is
    /// constant.
    pub fn tuple_of(items: Vec<Node>) -> Node {
        Node::TupleOf(items)
    }

    pub fn list_of(items: Vec<Node>) -> Node {
        Node::ListOf(items)
    }

    pub fn if_else(cond: Node, then: Node, orelse: Node) -> Node {
        Node::If {
            cond: Box::new(cond),
            then: Box::new(then),
            orelse: Box::new(orelse),
        }
    }

    pub fn suite(stmts: Vec<Node>) -> Node {
        Node::Suite(stmts)
    }

    pub fn discard(expr: Node) -> Node {
        Node::Discard(Box::new(expr))
    }

    pub fn ret(expr: Node) -> Node {
        Node::Return(Some(Box::new(expr)))
    }

    /// Generate code for this node into `asm`.
    pub fn compile(&self, asm: &mut Assembler) -> Result<(), AsmError> {
        match self {
            Node::Const(value) => asm.load_const(value.clone()),
            Node::Local(name) => asm.load_local(name),
            Node::Global(name) => asm.load_global(name),

            Node::BinaryOp { op, lhs, rhs } => {
                lhs.compile(asm)?;
                rhs.compile(asm)?;
                asm.binary_op(*op)
            }
            Node::UnaryOp { op, operand } => {
                operand.compile(asm)?;
                asm.unary_op(*op)
            }

            Node::And(parts) => Self::compile_logical(parts, asm, true),
            Node::Or(parts) => Self::compile_logical(parts, asm, false),
            Node::Compare { first, rest } => Self::compile_compare(first, rest, asm),

            Node::Call {
                func,
                args,
                kwargs,
                fold_zero_arg: _,
            } => {
                if args.len() > u8::MAX as usize {
                    return Err(AsmError::OperandOverflow(args.len() as u32));
                }
                if kwargs.len() > u8::MAX as usize {
                    return Err(AsmError::OperandOverflow(kwargs.len() as u32));
                }
                func.compile(asm)?;
                for arg in args {
                    arg.compile(asm)?;
                }
                for (name, value) in kwargs {
                    asm.load_const(Value::Str(name.clone()))?;
                    value.compile(asm)?;
                }
                asm.call_function(args.len() as u8, kwargs.len() as u8)
            }

            Node::TupleOf(items) => {
                if let Ok(v) = fold::const_value(self) {
                    return asm.load_const(v);
                }
                for item in items {
                    item.compile(asm)?;
                }
                asm.build_tuple(items.len() as u32)
            }
            Node::ListOf(items) => {
                // Lists are mutable, so even an all-constant literal must
                // build a fresh one per evaluation.
                for item in items {
                    item.compile(asm)?;
                }
                asm.build_list(items.len() as u32)
            }

            Node::If { cond, then, orelse } => {
                if let Ok(v) = fold::const_value(cond) {
                    // Statically decided: only the taken branch is emitted.
                    return if v.is_truthy() {
                        then.compile(asm)
                    } else {
                        orelse.compile(asm)
                    };
                }
                cond.compile(asm)?;
                let else_entry = asm.jump_if_false()?;
                asm.pop_top()?;
                then.compile(asm)?;
                // A branch ending in return/break leaves no height to merge;
                // the construct's exit height then comes from the other
                // branch alone.
                let skip_else = match asm.height() {
                    Some(_) => Some(asm.jump_forward()?),
                    None => None,
                };
                asm.resolve(else_entry)?;
                asm.pop_top()?;
                orelse.compile(asm)?;
                if let Some(skip) = skip_else {
                    asm.resolve(skip)?;
                }
                Ok(())
            }

            Node::TryExcept { body, handler } => {
                let frame = asm.push_block(BlockKind::TryExcept)?;
                body.compile(asm)?;
                let done = match asm.pop_block(frame)? {
                    Some(fwd) => fwd,
                    None => unreachable!("try/except pop always yields a forward ref"),
                };
                // Handler entry: drop the three exception-state values, then
                // produce the replacement result.
                asm.pop_top()?;
                asm.pop_top()?;
                asm.pop_top()?;
                handler.compile(asm)?;
                asm.resolve(done)
            }

            Node::TryFinally { body, cleanup } => {
                let frame = asm.push_block(BlockKind::TryFinally)?;
                body.compile(asm)?;
                asm.pop_block(frame)?;
                cleanup.compile(asm)?;
                asm.end_finally()
            }

            Node::While { cond, body, orelse } => {
                let frame = asm.push_block(BlockKind::Loop)?;
                let exit = asm.new_label();
                cond.compile(asm)?;
                asm.jump_if_false_to(exit)?;
                asm.pop_top()?;
                body.compile(asm)?;
                if asm.height().is_some() {
                    asm.continue_loop()?;
                }
                asm.define(exit)?;
                asm.pop_top()?;
                let after = match asm.pop_block(frame)? {
                    Some(fwd) => fwd,
                    None => unreachable!("loop pop always yields a forward ref"),
                };
                if let Some(orelse) = orelse {
                    orelse.compile(asm)?;
                }
                asm.resolve(after)
            }

            Node::Break => asm.break_loop(),
            Node::Continue => asm.continue_loop(),

            Node::Return(expr) => {
                match expr {
                    Some(expr) => expr.compile(asm)?,
                    None => asm.load_const(Value::None)?,
                }
                asm.return_value()
            }

            Node::Suite(stmts) => {
                for stmt in stmts {
                    stmt.compile(asm)?;
                }
                Ok(())
            }
            Node::Discard(expr) => {
                expr.compile(asm)?;
                asm.pop_top()
            }
            Node::Pass => Ok(()),

            Node::Custom { ty, args } => (ty.inner.compile)(args, asm),
        }
    }

    /// Generate code for a short-circuit chain. Each operand except the last
    /// is tested without popping; the branch target is shared, so the
    /// deciding operand is left as the chain's value.
    fn compile_logical(
        parts: &[Node],
        asm: &mut Assembler,
        conjunction: bool,
    ) -> Result<(), AsmError> {
        if parts.is_empty() {
            return asm.load_const(Value::Bool(conjunction));
        }
        let end = asm.new_label();
        for (i, part) in parts.iter().enumerate() {
            part.compile(asm)?;
            if i + 1 < parts.len() {
                if conjunction {
                    asm.jump_if_false_to(end)?;
                } else {
                    asm.jump_if_true_to(end)?;
                }
                asm.pop_top()?;
            }
        }
        asm.define(end)
    }

    /// Chained comparison in the classic duplicate-and-rotate shape: the
    /// right operand of each link doubles as the left operand of the next,
    /// and a false link exits early through a cleanup that drops the
    /// leftover operand.
    fn compile_compare(
        first: &Node,
        rest: &[(CmpOp, Node)],
        asm: &mut Assembler,
    ) -> Result<(), AsmError> {
        first.compile(asm)?;
        if rest.is_empty() {
            return Ok(());
        }
        if let [(op, operand)] = rest {
            operand.compile(asm)?;
            return asm.compare_op(*op);
        }

        let cleanup = asm.new_label();
        let end = asm.new_label();
        for (i, (op, operand)) in rest.iter().enumerate() {
            let last = i + 1 == rest.len();
            operand.compile(asm)?;
            if last {
                asm.compare_op(*op)?;
                asm.jump_to(end)?;
            } else {
                asm.dup_top()?;
                asm.rot_three()?;
                asm.compare_op(*op)?;
                asm.jump_if_false_to(cleanup)?;
                asm.pop_top()?;
            }
        }
        // Early exit: [leftover, false] on the stack; keep the false.
        asm.define(cleanup)?;
        asm.rot_two()?;
        asm.pop_top()?;
        asm.define(end)
    }

    /// Compile this expression as a complete artifact and seal it.
    pub fn into_code(self) -> Result<crate::vm::Code, AsmError> {
        let mut asm = Assembler::new();
        self.compile(&mut asm)?;
        asm.seal()
    }
}
