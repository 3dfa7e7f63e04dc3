// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Tests for the single-pass compiler.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::io;

use super::{compile, disassemble_instruction};
use crate::bytecode::{Chunk, op, read_u16};
use crate::value::{ObjKind, ObjRef};
use crate::vm::Vm;

fn quiet_vm() -> Vm {
    Vm::with_output(Box::new(io::sink()), Box::new(io::sink()))
}

fn compile_source(source: &str) -> (Vm, Option<ObjRef>) {
    let mut vm = quiet_vm();
    let function = compile(source, &mut vm);
    (vm, function)
}

fn script_chunk(source: &str) -> (Vm, ObjRef) {
    let (vm, function) = compile_source(source);
    let function = function.expect("script should compile");
    (vm, function)
}

#[test]
fn compiles_empty_source() {
    let (vm, function) = script_chunk("");
    let chunk = &vm.heap().function(function).chunk;
    // Implicit return: NIL RETURN
    assert_eq!(chunk.code, vec![op::NIL, op::RETURN]);
}

#[test]
fn compiles_print_statement() {
    let (vm, function) = script_chunk("print 1 + 2;");
    let chunk = &vm.heap().function(function).chunk;
    assert_eq!(
        chunk.code,
        vec![
            op::CONSTANT,
            0,
            op::CONSTANT,
            1,
            op::ADD,
            op::PRINT,
            op::NIL,
            op::RETURN
        ]
    );
}

#[test]
fn exponent_is_right_associative() {
    // 2 ** 3 ** 2 must emit the inner power first
    let (vm, function) = script_chunk("print 2 ** 3 ** 2;");
    let chunk = &vm.heap().function(function).chunk;
    assert_eq!(
        chunk.code,
        vec![
            op::CONSTANT,
            0,
            op::CONSTANT,
            1,
            op::CONSTANT,
            2,
            op::POWER,
            op::POWER,
            op::PRINT,
            op::NIL,
            op::RETURN
        ]
    );
}

#[test]
fn comparison_compounds_compile_to_base_op_plus_not() {
    let (vm, function) = script_chunk("print 1 <= 2;");
    let chunk = &vm.heap().function(function).chunk;
    assert_eq!(
        chunk.code,
        vec![
            op::CONSTANT,
            0,
            op::CONSTANT,
            1,
            op::GREATER,
            op::NOT,
            op::PRINT,
            op::NIL,
            op::RETURN
        ]
    );
}

#[test]
fn local_variables_use_slots() {
    let (vm, function) = script_chunk("{ var a = 1; print a; }");
    let chunk = &vm.heap().function(function).chunk;
    assert_eq!(
        chunk.code,
        vec![
            op::CONSTANT,
            0,
            op::GET_LOCAL,
            1,
            op::PRINT,
            op::POP,
            op::NIL,
            op::RETURN
        ]
    );
}

#[test]
fn globals_compile_to_name_constants() {
    let (vm, function) = script_chunk("var a = 1; print a;");
    let chunk = &vm.heap().function(function).chunk;
    assert_eq!(chunk.code[2], op::DEFINE_GLOBAL);
    assert_eq!(chunk.code[4], op::GET_GLOBAL);
    // Two name constants, one interned string behind both
    let defined = chunk.constants[chunk.code[3] as usize].as_obj().unwrap();
    let read = chunk.constants[chunk.code[5] as usize].as_obj().unwrap();
    assert_eq!(defined, read);
    assert_eq!(vm.heap().string_str(defined), "a");
}

#[test]
fn compound_assignment_desugars() {
    let (vm, function) = script_chunk("{ var a = 1; a += 2; }");
    let chunk = &vm.heap().function(function).chunk;
    assert_eq!(
        chunk.code,
        vec![
            op::CONSTANT,
            0,
            op::GET_LOCAL,
            1,
            op::CONSTANT,
            1,
            op::ADD,
            op::SET_LOCAL,
            1,
            op::POP,
            op::POP,
            op::NIL,
            op::RETURN
        ]
    );
}

#[test]
fn closure_operands_encode_capture_sites() {
    let source = "
        fun outer() {
          var a = 1;
          fun inner() { return a; }
          return inner;
        }
    ";
    let (vm, function) = script_chunk(source);
    let chunk = &vm.heap().function(function).chunk;

    // The script's only constant tree: outer at constants[1] (name at [0])
    let outer = chunk
        .constants
        .iter()
        .filter_map(|c| c.as_obj())
        .find(|&r| vm.heap().kind(r) == ObjKind::Function)
        .expect("outer function constant");
    let outer_chunk = &vm.heap().function(outer).chunk;

    // Find the CLOSURE instruction for `inner` and decode its operand triple
    let mut offset = 0;
    let mut found = false;
    while offset < outer_chunk.len() {
        let opcode = outer_chunk.code[offset];
        if opcode == op::CLOSURE {
            let inner = outer_chunk.constants[outer_chunk.code[offset + 1] as usize]
                .as_obj()
                .unwrap();
            assert_eq!(vm.heap().function(inner).upvalue_count, 1);
            // One triple: is_local = 1, index = slot 1, little-endian
            assert_eq!(outer_chunk.code[offset + 2], 1);
            assert_eq!(read_u16(&outer_chunk.code, offset + 3), 1);
            found = true;
            break;
        }
        let (_, next) = disassemble_instruction(vm.heap(), outer_chunk, offset);
        offset = next;
    }
    assert!(found, "no CLOSURE instruction in outer");
}

/// Walk a chunk and verify every jump lands inside it.
fn assert_jumps_in_bounds(vm: &Vm, chunk: &Chunk) {
    let mut offset = 0;
    while offset < chunk.len() {
        let opcode = chunk.code[offset];
        match opcode {
            op::JUMP | op::JUMP_IF_FALSE => {
                let distance = read_u16(&chunk.code, offset + 1) as usize;
                assert!(offset + 3 + distance <= chunk.len(), "forward jump escapes");
            }
            op::LOOP => {
                let distance = read_u16(&chunk.code, offset + 1) as usize;
                assert!(distance <= offset + 3, "backward jump escapes");
            }
            _ => {}
        }
        let (_, next) = disassemble_instruction(vm.heap(), chunk, offset);
        offset = next;
    }
}

#[test]
fn control_flow_jumps_stay_in_bounds() {
    let source = "
        var s = 0;
        for (var i = 0; i < 10; i = i + 1) {
          if (i % 2 == 0 and i > 2 or i == 1) { s = s + i; } else { s = s - 1; }
        }
        while (s > 0 xor false) { s = s - 1; }
    ";
    let (vm, function) = script_chunk(source);
    assert_jumps_in_bounds(&vm, &vm.heap().function(function).chunk);
}

#[test]
fn methods_and_initializers_compile() {
    let source = "
        class A {
          init(x) { this.x = x; }
          get() { return this.x; }
        }
        class B < A {
          get() { return super.get() + 1; }
        }
    ";
    let (_vm, function) = compile_source(source);
    assert!(function.is_some());
}

// --- Error cases ---------------------------------------------------------

#[test]
fn invalid_assignment_target_is_an_error() {
    let (_vm, function) = compile_source("1 + 2 = 3;");
    assert!(function.is_none());
}

#[test]
fn reading_local_in_its_own_initializer_is_an_error() {
    let (_vm, function) = compile_source("{ var a = 1; { var a = a; } }");
    assert!(function.is_none());
}

#[test]
fn redeclaration_in_same_scope_is_an_error() {
    let (_vm, function) = compile_source("{ var a = 1; var a = 2; }");
    assert!(function.is_none());
}

#[test]
fn top_level_return_is_an_error() {
    let (_vm, function) = compile_source("return 1;");
    assert!(function.is_none());
}

#[test]
fn returning_a_value_from_init_is_an_error() {
    let (_vm, function) = compile_source("class A { init() { return 1; } }");
    assert!(function.is_none());
}

#[test]
fn bare_return_in_init_compiles() {
    let (_vm, function) = compile_source("class A { init() { return; } }");
    assert!(function.is_some());
}

#[test]
fn this_outside_a_class_is_an_error() {
    let (_vm, function) = compile_source("print this;");
    assert!(function.is_none());
}

#[test]
fn super_outside_a_class_is_an_error() {
    let (_vm, function) = compile_source("print super.x;");
    assert!(function.is_none());
}

#[test]
fn super_without_superclass_is_an_error() {
    let (_vm, function) = compile_source("class A { m() { return super.m(); } }");
    assert!(function.is_none());
}

#[test]
fn class_cannot_inherit_from_itself() {
    let (_vm, function) = compile_source("class A < A {}");
    assert!(function.is_none());
}

#[test]
fn syntax_error_recovers_and_reports_once_per_statement() {
    // Both statements are bad; panic mode must synchronize between them
    let (_vm, function) = compile_source("var ; print 1 +;");
    assert!(function.is_none());
}

#[test]
fn missing_semicolon_is_an_error() {
    let (_vm, function) = compile_source("print 1");
    assert!(function.is_none());
}
