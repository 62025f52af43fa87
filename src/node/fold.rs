//! Constant analysis and folding.
//!
//! Folding has one generic primitive: build the candidate node, compile it
//! into a throwaway assembler, seal, and run the result on the runtime. The
//! smart constructors decide *when* that is sound; this module only does the
//! evaluation.

use crate::asm::{Assembler, AsmError, NotConstant};
use crate::values::Value;
use crate::vm::VM;

use super::node::Node;

/// Compile-time value of a node, or [`NotConstant`].
///
/// Tuples of constants are constants; lists never are, because every
/// evaluation of a list literal must yield a fresh, independently mutable
/// list.
pub fn const_value(node: &Node) -> Result<Value, NotConstant> {
    match node {
        Node::Const(value) => Ok(value.clone()),
        Node::TupleOf(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(const_value(item)?);
            }
            Ok(Value::tuple(out))
        }
        _ => Err(NotConstant),
    }
}

/// Evaluate a node right now by compiling and running it in isolation.
///
/// Used for folding, so a failure here means the same computation would fail
/// on every execution of the final artifact.
pub fn eval_node(node: &Node) -> Result<Value, AsmError> {
    let mut asm = Assembler::new();
    node.compile(&mut asm)?;
    let code = asm.seal()?;
    let value = VM::execute(&code)?;
    tracing::trace!(?value, "folded constant");
    Ok(value)
}

/// Generic construction-time folding: build the node with `ctor`; if every
/// argument was constant, evaluate it and collapse to the result.
pub fn fold_args(
    ctor: impl FnOnce(Vec<Node>) -> Node,
    args: Vec<Node>,
) -> Result<Node, AsmError> {
    let all_const = args.iter().all(|arg| const_value(arg).is_ok());
    let node = ctor(args);
    if !all_const {
        return Ok(node);
    }
    eval_node(&node).map(Node::Const)
}

/// Folding policy for calls: requires a constant callee, constant arguments,
/// and at least one argument. Zero-argument calls are assumed impure unless
/// the node opts in.
pub(super) fn fold_call(node: Node) -> Result<Node, AsmError> {
    let Node::Call {
        func,
        args,
        kwargs,
        fold_zero_arg,
    } = &node
    else {
        return Ok(node);
    };
    let has_args = !args.is_empty() || !kwargs.is_empty();
    let all_const = const_value(func).is_ok()
        && args.iter().all(|arg| const_value(arg).is_ok())
        && kwargs.iter().all(|(_, value)| const_value(value).is_ok());
    if !all_const || (!has_args && !fold_zero_arg) {
        return Ok(node);
    }
    eval_node(&node).map(Node::Const)
}
