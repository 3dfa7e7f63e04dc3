// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Bytecode disassembler.
//!
//! A read-only observer of the instruction stream, used by the
//! `trace-execution` feature and by tests. Output format: byte offset,
//! source line (or `|` when unchanged), opcode name, operands.

use std::fmt::Write;

use crate::bytecode::{Chunk, op, read_u16};
use crate::heap::Heap;
use crate::value::format_value;

/// Render a whole chunk.
#[must_use]
pub fn disassemble_chunk(heap: &Heap, chunk: &Chunk, name: &str) -> String {
    let mut out = format!("== {name} ==\n");
    let mut offset = 0;
    while offset < chunk.len() {
        let (line, next) = disassemble_instruction(heap, chunk, offset);
        out.push_str(&line);
        out.push('\n');
        offset = next;
    }
    out
}

/// Render the instruction at `offset`; returns the text and the offset of
/// the next instruction.
#[must_use]
pub fn disassemble_instruction(heap: &Heap, chunk: &Chunk, offset: usize) -> (String, usize) {
    let mut text = format!("{offset:04} ");
    if offset > 0 && chunk.line_at(offset) == chunk.line_at(offset - 1) {
        text.push_str("   | ");
    } else {
        let _ = write!(text, "{:4} ", chunk.line_at(offset));
    }

    let opcode = chunk.code[offset];
    let (rest, next) = match opcode {
        op::CONSTANT => constant(heap, chunk, "OP_CONSTANT", offset, false),
        op::CONSTANT_16 => constant(heap, chunk, "OP_CONSTANT_16", offset, true),
        op::TRUE => simple("OP_TRUE", offset),
        op::FALSE => simple("OP_FALSE", offset),
        op::NIL => simple("OP_NIL", offset),
        op::POP => simple("OP_POP", offset),
        op::GET_LOCAL => byte_operand(chunk, "OP_GET_LOCAL", offset),
        op::GET_LOCAL_16 => u16_operand(chunk, "OP_GET_LOCAL_16", offset),
        op::SET_LOCAL => byte_operand(chunk, "OP_SET_LOCAL", offset),
        op::SET_LOCAL_16 => u16_operand(chunk, "OP_SET_LOCAL_16", offset),
        op::DEFINE_GLOBAL => constant(heap, chunk, "OP_DEFINE_GLOBAL", offset, false),
        op::DEFINE_GLOBAL_16 => constant(heap, chunk, "OP_DEFINE_GLOBAL_16", offset, true),
        op::GET_GLOBAL => constant(heap, chunk, "OP_GET_GLOBAL", offset, false),
        op::GET_GLOBAL_16 => constant(heap, chunk, "OP_GET_GLOBAL_16", offset, true),
        op::SET_GLOBAL => constant(heap, chunk, "OP_SET_GLOBAL", offset, false),
        op::SET_GLOBAL_16 => constant(heap, chunk, "OP_SET_GLOBAL_16", offset, true),
        op::GET_UPVALUE => byte_operand(chunk, "OP_GET_UPVALUE", offset),
        op::GET_UPVALUE_16 => u16_operand(chunk, "OP_GET_UPVALUE_16", offset),
        op::SET_UPVALUE => byte_operand(chunk, "OP_SET_UPVALUE", offset),
        op::SET_UPVALUE_16 => u16_operand(chunk, "OP_SET_UPVALUE_16", offset),
        op::CLOSE_UPVALUE => simple("OP_CLOSE_UPVALUE", offset),
        op::GET_PROPERTY => constant(heap, chunk, "OP_GET_PROPERTY", offset, false),
        op::GET_PROPERTY_16 => constant(heap, chunk, "OP_GET_PROPERTY_16", offset, true),
        op::SET_PROPERTY => constant(heap, chunk, "OP_SET_PROPERTY", offset, false),
        op::SET_PROPERTY_16 => constant(heap, chunk, "OP_SET_PROPERTY_16", offset, true),
        op::GET_SUPER => constant(heap, chunk, "OP_GET_SUPER", offset, false),
        op::GET_SUPER_16 => constant(heap, chunk, "OP_GET_SUPER_16", offset, true),
        op::NEGATE => simple("OP_NEGATE", offset),
        op::NOT => simple("OP_NOT", offset),
        op::ADD => simple("OP_ADD", offset),
        op::SUBTRACT => simple("OP_SUBTRACT", offset),
        op::MULTIPLY => simple("OP_MULTIPLY", offset),
        op::DIVIDE => simple("OP_DIVIDE", offset),
        op::MODULO => simple("OP_MODULO", offset),
        op::POWER => simple("OP_POWER", offset),
        op::EQUAL => simple("OP_EQUAL", offset),
        op::GREATER => simple("OP_GREATER", offset),
        op::LESS => simple("OP_LESS", offset),
        op::PRINT => simple("OP_PRINT", offset),
        op::JUMP => jump(chunk, "OP_JUMP", offset, true),
        op::JUMP_IF_FALSE => jump(chunk, "OP_JUMP_IF_FALSE", offset, true),
        op::LOOP => jump(chunk, "OP_LOOP", offset, false),
        op::CALL => byte_operand(chunk, "OP_CALL", offset),
        op::INVOKE => invoke(heap, chunk, "OP_INVOKE", offset, false),
        op::INVOKE_16 => invoke(heap, chunk, "OP_INVOKE_16", offset, true),
        op::INVOKE_SUPER => invoke(heap, chunk, "OP_INVOKE_SUPER", offset, false),
        op::INVOKE_SUPER_16 => invoke(heap, chunk, "OP_INVOKE_SUPER_16", offset, true),
        op::CLOSURE => closure(heap, chunk, "OP_CLOSURE", offset, false),
        op::CLOSURE_16 => closure(heap, chunk, "OP_CLOSURE_16", offset, true),
        op::CLASS => constant(heap, chunk, "OP_CLASS", offset, false),
        op::CLASS_16 => constant(heap, chunk, "OP_CLASS_16", offset, true),
        op::INHERIT => simple("OP_INHERIT", offset),
        op::METHOD => constant(heap, chunk, "OP_METHOD", offset, false),
        op::METHOD_16 => constant(heap, chunk, "OP_METHOD_16", offset, true),
        op::RETURN => simple("OP_RETURN", offset),
        unknown => (format!("OP_UNKNOWN({unknown})"), offset + 1),
    };
    text.push_str(&rest);
    (text, next)
}

fn simple(name: &str, offset: usize) -> (String, usize) {
    (name.to_owned(), offset + 1)
}

fn byte_operand(chunk: &Chunk, name: &str, offset: usize) -> (String, usize) {
    let operand = chunk.code[offset + 1];
    (format!("{name:<24} {operand:4}"), offset + 2)
}

fn u16_operand(chunk: &Chunk, name: &str, offset: usize) -> (String, usize) {
    let operand = read_u16(&chunk.code, offset + 1);
    (format!("{name:<24} {operand:4}"), offset + 3)
}

fn jump(chunk: &Chunk, name: &str, offset: usize, forward: bool) -> (String, usize) {
    let distance = read_u16(&chunk.code, offset + 1) as usize;
    let target = if forward {
        offset + 3 + distance
    } else {
        (offset + 3).saturating_sub(distance)
    };
    (format!("{name:<24} {distance:4} -> {target}"), offset + 3)
}

fn constant(
    heap: &Heap,
    chunk: &Chunk,
    name: &str,
    offset: usize,
    wide: bool,
) -> (String, usize) {
    let (idx, next) = constant_index(chunk, offset, wide);
    let value = format_value(heap, chunk.constants[idx]);
    (format!("{name:<24} {idx:4} '{value}'"), next)
}

fn invoke(heap: &Heap, chunk: &Chunk, name: &str, offset: usize, wide: bool) -> (String, usize) {
    let (idx, after_name) = constant_index(chunk, offset, wide);
    let argc = chunk.code[after_name];
    let value = format_value(heap, chunk.constants[idx]);
    (
        format!("{name:<24} {idx:4} '{value}' ({argc} args)"),
        after_name + 1,
    )
}

fn closure(heap: &Heap, chunk: &Chunk, name: &str, offset: usize, wide: bool) -> (String, usize) {
    let (idx, mut next) = constant_index(chunk, offset, wide);
    let function = chunk.constants[idx];
    let mut text = format!("{name:<24} {idx:4} {}", format_value(heap, function));

    let upvalue_count = function
        .as_obj()
        .map_or(0, |r| heap.function(r).upvalue_count);
    for _ in 0..upvalue_count {
        let is_local = chunk.code[next] != 0;
        let index = read_u16(&chunk.code, next + 1);
        let _ = write!(
            text,
            "\n{:04}      |                     {} {}",
            next,
            if is_local { "local" } else { "upvalue" },
            index
        );
        next += 3;
    }
    (text, next)
}

fn constant_index(chunk: &Chunk, offset: usize, wide: bool) -> (usize, usize) {
    if wide {
        (read_u16(&chunk.code, offset + 1) as usize, offset + 3)
    } else {
        (chunk.code[offset + 1] as usize, offset + 2)
    }
}
