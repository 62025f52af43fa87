//! Tests for the node compiler and constant folding.

use hashbrown::HashMap;
use std::sync::Arc;

use crate::asm::{AsmError, BinOp, CmpOp, Instruction, UnOp};
use crate::node::{Node, NodeType, const_value};
use crate::values::{NativeFunction, Value};
use crate::vm::{Code, ExecutionError, VM};

fn run(code: &Code) -> Value {
    VM::execute(code).unwrap()
}

fn run_with(code: &Code, globals: &[(&str, Value)]) -> Result<Value, ExecutionError> {
    let globals: HashMap<Arc<str>, Value> = globals
        .iter()
        .map(|(name, value)| (Arc::from(*name), value.clone()))
        .collect();
    VM::with_globals(code, globals).call(&[])
}

fn count_calls(code: &Code) -> usize {
    code.instructions
        .iter()
        .filter(|i| matches!(i, Instruction::CallFunction(_)))
        .count()
}

#[test]
fn test_constant_expression() {
    let code = Node::constant(42i64).into_code().unwrap();
    assert_eq!(
        code.instructions,
        vec![Instruction::LoadConst(0), Instruction::Return]
    );
    assert_eq!(run(&code), Value::Int(42));
}

#[test]
fn test_binary_folds_constant_operands() {
    let node = Node::binary(BinOp::Add, Node::constant(1i64), Node::constant(2i64)).unwrap();
    assert_eq!(node, Node::Const(Value::Int(3)));

    let node = Node::unary(UnOp::Neg, Node::constant(5i64)).unwrap();
    assert_eq!(node, Node::Const(Value::Int(-5)));
}

#[test]
fn test_binary_with_free_operand_stays_a_tree() {
    let node = Node::binary(BinOp::Add, Node::global("x"), Node::constant(2i64)).unwrap();
    assert!(matches!(node, Node::BinaryOp { .. }));
    let code = node.into_code().unwrap();
    assert_eq!(run_with(&code, &[("x", Value::Int(40))]).unwrap(), Value::Int(42));
}

#[test]
fn test_fold_failure_propagates() {
    let err = Node::binary(BinOp::Div, Node::constant(1i64), Node::constant(0i64)).unwrap_err();
    assert!(matches!(
        err,
        AsmError::FoldFailed(ExecutionError::DivisionByZero)
    ));
}

#[test]
fn test_and_construction_folding() {
    // A statically true leading operand decides nothing: dropped.
    let node = Node::and(vec![Node::constant(true), Node::global("x")]);
    assert_eq!(node, Node::global("x"));

    // A statically false leading operand decides everything: truncates.
    let node = Node::and(vec![
        Node::constant(false),
        Node::global("x"),
        Node::global("y"),
    ]);
    assert_eq!(node, Node::Const(Value::Bool(false)));

    // Non-leading constants are left for runtime.
    let node = Node::and(vec![Node::global("x"), Node::constant(true)]);
    assert!(matches!(&node, Node::And(parts) if parts.len() == 2));
}

#[test]
fn test_empty_logical_chain_yields_identity() {
    // No operands still has to mean one value on the stack.
    let node = Node::and(vec![]);
    assert_eq!(node, Node::Const(Value::Bool(true)));
    assert_eq!(VM::execute(&node.into_code().unwrap()).unwrap(), Value::Bool(true));

    let node = Node::or(vec![]);
    assert_eq!(node, Node::Const(Value::Bool(false)));
    assert_eq!(VM::execute(&node.into_code().unwrap()).unwrap(), Value::Bool(false));
}

#[test]
fn test_or_construction_folding() {
    let node = Node::or(vec![Node::constant(false), Node::global("x")]);
    assert_eq!(node, Node::global("x"));

    let node = Node::or(vec![Node::constant(7i64), Node::global("x")]);
    assert_eq!(node, Node::Const(Value::Int(7)));
}

#[test]
fn test_and_short_circuits_at_runtime() {
    // When the left operand is falsy the right is never evaluated, so the
    // undefined global is never touched.
    let node = Node::and(vec![Node::global("a"), Node::global("missing")]);
    let code = node.into_code().unwrap();
    assert_eq!(
        run_with(&code, &[("a", Value::Int(0))]).unwrap(),
        Value::Int(0)
    );

    // Truthy left: the chain's value is the right operand.
    let node = Node::and(vec![Node::global("a"), Node::global("b")]);
    let code = node.into_code().unwrap();
    let globals = [("a", Value::Bool(true)), ("b", Value::str("yes"))];
    assert_eq!(run_with(&code, &globals).unwrap(), Value::str("yes"));
}

#[test]
fn test_or_short_circuits_at_runtime() {
    let node = Node::or(vec![Node::global("a"), Node::global("missing")]);
    let code = node.into_code().unwrap();
    assert_eq!(
        run_with(&code, &[("a", Value::Int(3))]).unwrap(),
        Value::Int(3)
    );
}

#[test]
fn test_single_comparison_shape() {
    let node = Node::compare(Node::constant(2i64), vec![(CmpOp::Gt, Node::constant(1i64))]);
    let code = node.into_code().unwrap();
    assert_eq!(
        code.instructions,
        vec![
            Instruction::LoadConst(0),
            Instruction::LoadConst(1),
            Instruction::CompareOp(CmpOp::Gt),
            Instruction::Return,
        ]
    );
    assert_eq!(run(&code), Value::Bool(true));
}

#[test]
fn test_comparison_chain_evaluates_middle_once() {
    let mid = NativeFunction::new("mid", |_, _| Ok(Value::Int(5)));
    let call = Node::Call {
        func: Box::new(Node::Const(Value::Native(mid))),
        args: vec![],
        kwargs: vec![],
        fold_zero_arg: false,
    };
    // 1 < mid() < 10: the middle operand appears once in the stream.
    let node = Node::compare(
        Node::constant(1i64),
        vec![(CmpOp::Lt, call), (CmpOp::Lt, Node::constant(10i64))],
    );
    let code = node.into_code().unwrap();
    assert_eq!(count_calls(&code), 1);
    assert_eq!(run(&code), Value::Bool(true));
}

#[test]
fn test_comparison_chain_short_circuits() {
    // 5 < 2 < boom(): false at the first link, second never evaluated.
    let boom = NativeFunction::new("boom", |_, _| Err(ExecutionError::Native("boom".into())));
    let call = Node::Call {
        func: Box::new(Node::Const(Value::Native(boom))),
        args: vec![],
        kwargs: vec![],
        fold_zero_arg: false,
    };
    let node = Node::compare(
        Node::constant(5i64),
        vec![(CmpOp::Lt, Node::constant(2i64)), (CmpOp::Lt, call)],
    );
    let code = node.into_code().unwrap();
    assert_eq!(run(&code), Value::Bool(false));
    assert_eq!(code.max_stack, 3); // dup'd operand during a link
}

#[test]
fn test_call_with_constant_args_folds() {
    let add = NativeFunction::new("add", |args, _| {
        let mut total = 0;
        for a in args {
            total += a.as_int().unwrap_or(0);
        }
        Ok(Value::Int(total))
    });
    let node = Node::call(
        Node::Const(Value::Native(add)),
        vec![Node::constant(1i64), Node::constant(2i64)],
        vec![],
    )
    .unwrap();
    assert_eq!(node, Node::Const(Value::Int(3)));
}

#[test]
fn test_zero_arg_call_folding_is_opt_in() {
    let five = NativeFunction::new("five", |_, _| Ok(Value::Int(5)));

    let unfolded = Node::call(Node::Const(Value::Native(five.clone())), vec![], vec![]).unwrap();
    assert!(matches!(unfolded, Node::Call { .. }));

    let folded =
        Node::call_folding_zero_arg(Node::Const(Value::Native(five)), vec![], vec![]).unwrap();
    assert_eq!(folded, Node::Const(Value::Int(5)));
}

#[test]
fn test_call_codegen_with_keywords() {
    let pick = NativeFunction::new("pick", |args, kwargs| {
        assert_eq!(args.len(), 1);
        assert_eq!(kwargs.len(), 1);
        assert_eq!(&*kwargs[0].0, "k");
        Ok(kwargs[0].1.clone())
    });
    let node = Node::call(
        Node::global("pick"),
        vec![Node::constant(1i64)],
        vec![("k", Node::constant(9i64))],
    )
    .unwrap();
    let code = node.into_code().unwrap();
    // One keyword pair lands in the operand's high byte.
    assert!(
        code.instructions
            .windows(2)
            .any(|w| w == [Instruction::WideArg(1), Instruction::CallFunction(1)])
    );
    assert_eq!(
        run_with(&code, &[("pick", Value::Native(pick))]).unwrap(),
        Value::Int(9)
    );
}

#[test]
fn test_if_expression() {
    let build = || {
        Node::if_else(Node::global("c"), Node::constant(1i64), Node::constant(2i64))
            .into_code()
            .unwrap()
    };
    assert_eq!(
        run_with(&build(), &[("c", Value::Bool(true))]).unwrap(),
        Value::Int(1)
    );
    assert_eq!(
        run_with(&build(), &[("c", Value::Bool(false))]).unwrap(),
        Value::Int(2)
    );
}

#[test]
fn test_if_with_constant_condition_drops_dead_branch() {
    let node = Node::if_else(
        Node::constant(true),
        Node::constant(1i64),
        Node::global("never_defined"),
    );
    let code = node.into_code().unwrap();
    assert!(code.names.is_empty());
    assert_eq!(run(&code), Value::Int(1));
}

#[test]
fn test_if_with_returning_then_branch() {
    let node = Node::if_else(
        Node::global("c"),
        Node::ret(Node::constant(1i64)),
        Node::constant(2i64),
    );
    let code = node.into_code().unwrap();
    assert_eq!(
        run_with(&code, &[("c", Value::Bool(true))]).unwrap(),
        Value::Int(1)
    );
    assert_eq!(
        run_with(&code, &[("c", Value::Bool(false))]).unwrap(),
        Value::Int(2)
    );
}

#[test]
fn test_tuple_of_constants_becomes_pool_constant() {
    let node = Node::tuple_of(vec![Node::constant(1i64), Node::constant(2i64)]);
    let code = node.into_code().unwrap();
    assert_eq!(
        code.instructions,
        vec![Instruction::LoadConst(0), Instruction::Return]
    );
    assert_eq!(
        code.constants[0],
        Value::tuple(vec![Value::Int(1), Value::Int(2)])
    );
}

#[test]
fn test_tuple_with_free_element_builds_at_runtime() {
    let node = Node::tuple_of(vec![Node::global("x"), Node::constant(2i64)]);
    let code = node.into_code().unwrap();
    assert!(code.instructions.contains(&Instruction::BuildTuple(2)));
    assert_eq!(
        run_with(&code, &[("x", Value::Int(1))]).unwrap(),
        Value::tuple(vec![Value::Int(1), Value::Int(2)])
    );
}

#[test]
fn test_list_literal_never_folds() {
    let node = Node::list_of(vec![Node::constant(1i64)]);
    assert!(const_value(&node).is_err());
    let code = node.into_code().unwrap();
    assert!(code.instructions.contains(&Instruction::BuildList(1)));
    // Two executions yield two distinct lists (identity equality).
    assert_ne!(run(&code), run(&code));
}

#[test]
fn test_while_loop_shape() {
    let node = Node::While {
        cond: Box::new(Node::global("go")),
        body: Box::new(Node::Pass),
        orelse: None,
    };
    let mut asm = crate::asm::Assembler::new();
    node.compile(&mut asm).unwrap();
    assert_eq!(asm.instructions()[1], Instruction::SetupLoop(7));
    assert_eq!(asm.instructions()[2], Instruction::LoadGlobal(0));
    assert_eq!(asm.instructions()[4], Instruction::JumpIfFalse(2));
    assert_eq!(asm.instructions()[6], Instruction::JumpAbsolute(2));
    assert_eq!(asm.instructions()[8], Instruction::PopBlock);
    assert_eq!(asm.height(), Some(0));
}

#[test]
fn test_while_with_break_body() {
    let node = Node::While {
        cond: Box::new(Node::global("go")),
        body: Box::new(Node::Break),
        orelse: Some(Box::new(Node::Discard(Box::new(Node::constant(1i64))))),
    };
    let mut asm = crate::asm::Assembler::new();
    node.compile(&mut asm).unwrap();
    assert!(asm.instructions().contains(&Instruction::Break));
    assert_eq!(asm.height(), Some(0));
}

#[test]
fn test_break_outside_loop_rejected() {
    let err = Node::Break.into_code().unwrap_err();
    assert!(matches!(err, AsmError::NotInLoop));
}

#[test]
fn test_try_except_expression_shape() {
    let node = Node::TryExcept {
        body: Box::new(Node::constant(1i64)),
        handler: Box::new(Node::constant(2i64)),
    };
    let code = node.into_code().unwrap();
    assert_eq!(code.instructions[1], Instruction::SetupExcept(4));
    assert_eq!(code.max_stack, 3);
}

#[test]
fn test_try_finally_statement_shape() {
    let node = Node::TryFinally {
        body: Box::new(Node::discard(Node::constant(1i64))),
        cleanup: Box::new(Node::Pass),
    };
    let code = node.into_code().unwrap();
    assert!(code.instructions.contains(&Instruction::PopBlock));
    assert!(code.instructions.contains(&Instruction::EndFinally));
}

#[test]
fn test_suite_and_discard() {
    let node = Node::suite(vec![
        Node::discard(Node::constant(1i64)),
        Node::ret(Node::constant(2i64)),
    ]);
    let code = node.into_code().unwrap();
    assert_eq!(run(&code), Value::Int(2));
}

#[test]
fn test_custom_node_type() {
    let double = NodeType::new("double", 1, |args, asm| {
        args[0].compile(asm)?;
        asm.load_const(Value::Int(2))?;
        asm.binary_op(BinOp::Mul)
    });
    let node = double.node(vec![Node::constant(21i64)]);
    let code = node.into_code().unwrap();
    assert_eq!(run(&code), Value::Int(42));
}

#[test]
fn test_node_type_identity_equality() {
    let compile: crate::node::CompileFn = |_, asm| asm.load_const(Value::None);
    let a = NodeType::new("thing", 0, compile);
    let b = NodeType::new("thing", 0, compile);
    assert_ne!(a, b);
    assert_eq!(a, a.clone());
    assert_ne!(a.node(vec![]), b.node(vec![]));
}

#[test]
fn test_nodes_are_hashable_values() {
    let mut map: HashMap<Node, u32> = HashMap::new();
    map.insert(Node::constant(1i64), 1);
    map.insert(Node::global("x"), 2);
    assert_eq!(map.get(&Node::Const(Value::Int(1))), Some(&1));
    assert_eq!(map.get(&Node::global("x")), Some(&2));
}
