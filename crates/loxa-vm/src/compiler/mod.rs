// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Single-pass Pratt compiler for Loxa.
//!
//! The parser consumes tokens and emits bytecode straight into the chunk of
//! the function being built; no syntax tree is materialized. A rule table
//! keyed by token kind drives expression parsing; a chain of per-function
//! resolver states tracks locals, scope depths and upvalue captures, one
//! entry per in-flight function, innermost last.
//!
//! The chain doubles as a set of GC roots: every allocation the compiler
//! performs hands the chain's functions to the VM so a collection triggered
//! mid-compile can see half-built constant pools.
//!
//! On the first error the parser enters panic mode, silencing further
//! reports until it can synchronize at a statement boundary.

#[cfg(test)]
mod compiler_test;

mod disassemble;
mod fn_compile;

pub use disassemble::{disassemble_chunk, disassemble_instruction};

use std::io::Write;

use crate::bytecode::{Chunk, op};
use crate::lexer::{Lexer, Token, TokenKind};
use crate::value::{FunctionObj, ObjRef, Value};
use crate::vm::Vm;

/// Precedence ladder, low to high.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Precedence {
    None,
    /// `=`
    Assignment,
    /// `xor`
    Xor,
    /// `or`
    Or,
    /// `and`
    And,
    /// `==` `!=`
    Equality,
    /// `<` `>` `<=` `>=`
    Comparison,
    /// `+` `-`
    Term,
    /// `*` `/` `%`
    Factor,
    /// `!` `-`
    Unary,
    /// `**`
    Exponent,
    /// `.` `()`
    Call,
    Primary,
}

impl Precedence {
    /// One level tighter, for left-associative infix parsing.
    fn next(self) -> Self {
        match self {
            Self::None => Self::Assignment,
            Self::Assignment => Self::Xor,
            Self::Xor => Self::Or,
            Self::Or => Self::And,
            Self::And => Self::Equality,
            Self::Equality => Self::Comparison,
            Self::Comparison => Self::Term,
            Self::Term => Self::Factor,
            Self::Factor => Self::Unary,
            Self::Unary => Self::Exponent,
            Self::Exponent => Self::Call,
            Self::Call | Self::Primary => Self::Primary,
        }
    }
}

type ParseFn<'src, 'vm> = fn(&mut Parser<'src, 'vm>, bool);

struct ParseRule<'src, 'vm> {
    prefix: Option<ParseFn<'src, 'vm>>,
    infix: Option<ParseFn<'src, 'vm>>,
    precedence: Precedence,
}

fn rule<'src, 'vm>(
    prefix: Option<ParseFn<'src, 'vm>>,
    infix: Option<ParseFn<'src, 'vm>>,
    precedence: Precedence,
) -> ParseRule<'src, 'vm> {
    ParseRule {
        prefix,
        infix,
        precedence,
    }
}

fn get_rule<'src, 'vm>(kind: TokenKind) -> ParseRule<'src, 'vm> {
    match kind {
        TokenKind::LeftParen => rule(Some(Parser::grouping), Some(Parser::call), Precedence::Call),
        TokenKind::Dot => rule(None, Some(Parser::dot), Precedence::Call),
        TokenKind::Minus => rule(Some(Parser::unary), Some(Parser::binary), Precedence::Term),
        TokenKind::Plus => rule(None, Some(Parser::binary), Precedence::Term),
        TokenKind::Slash | TokenKind::Star | TokenKind::Percent => {
            rule(None, Some(Parser::binary), Precedence::Factor)
        }
        TokenKind::StarStar => rule(None, Some(Parser::binary), Precedence::Exponent),
        TokenKind::PlusPlus | TokenKind::MinusMinus => {
            rule(Some(Parser::prefix_increment), None, Precedence::None)
        }
        TokenKind::Bang => rule(Some(Parser::unary), None, Precedence::None),
        TokenKind::BangEqual | TokenKind::EqualEqual => {
            rule(None, Some(Parser::binary), Precedence::Equality)
        }
        TokenKind::Greater
        | TokenKind::GreaterEqual
        | TokenKind::Less
        | TokenKind::LessEqual => rule(None, Some(Parser::binary), Precedence::Comparison),
        TokenKind::Identifier => rule(Some(Parser::variable), None, Precedence::None),
        TokenKind::String => rule(Some(Parser::string), None, Precedence::None),
        TokenKind::Number => rule(Some(Parser::number), None, Precedence::None),
        TokenKind::And => rule(None, Some(Parser::and_), Precedence::And),
        TokenKind::Or => rule(None, Some(Parser::or_), Precedence::Or),
        TokenKind::Xor => rule(None, Some(Parser::xor_), Precedence::Xor),
        TokenKind::True | TokenKind::False | TokenKind::Nil => {
            rule(Some(Parser::literal), None, Precedence::None)
        }
        TokenKind::Super => rule(Some(Parser::super_), None, Precedence::None),
        TokenKind::This => rule(Some(Parser::this_), None, Precedence::None),
        _ => rule(None, None, Precedence::None),
    }
}

/// What kind of function a resolver state is building.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FunctionKind {
    Script,
    Function,
    Method,
    Initializer,
}

/// A local variable slot.
struct Local<'src> {
    name: &'src str,
    /// Scope depth, or -1 while declared but not yet defined.
    depth: i32,
    /// Whether any nested function captures this slot.
    captured: bool,
}

/// One captured slot, as emitted in `CLOSURE` operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct UpvalueSpec {
    /// Slot in the enclosing function's locals or upvalues.
    pub index: u16,
    /// True when `index` is an enclosing local, false for an enclosing
    /// upvalue.
    pub is_local: bool,
}

/// Resolver state for one in-flight function.
struct FunctionState<'src> {
    function: FunctionObj,
    kind: FunctionKind,
    locals: Vec<Local<'src>>,
    upvalues: Vec<UpvalueSpec>,
    scope_depth: i32,
}

impl<'src> FunctionState<'src> {
    fn new(kind: FunctionKind, name: Option<ObjRef>) -> Self {
        // Slot 0 belongs to the callee; methods see it as `this`
        let slot_zero = Local {
            name: match kind {
                FunctionKind::Method | FunctionKind::Initializer => "this",
                FunctionKind::Script | FunctionKind::Function => "",
            },
            depth: 0,
            captured: false,
        };
        Self {
            function: FunctionObj {
                name,
                ..FunctionObj::default()
            },
            kind,
            locals: vec![slot_zero],
            upvalues: Vec::new(),
            scope_depth: 0,
        }
    }
}

/// Per-class compiler state, stacked for nested class declarations.
struct ClassState {
    has_superclass: bool,
}

/// How a resolved name is accessed.
#[derive(Debug, Clone, Copy)]
enum VarAccess {
    Local(u16),
    Upvalue(u16),
    Global(u16),
}

/// The parser/compiler.
pub(crate) struct Parser<'src, 'vm> {
    lexer: Lexer<'src>,
    current: Token<'src>,
    previous: Token<'src>,
    had_error: bool,
    panic_mode: bool,
    vm: &'vm mut Vm,
    /// In-flight functions, innermost last. Never empty.
    chain: Vec<FunctionState<'src>>,
    /// Enclosing class declarations, innermost last.
    classes: Vec<ClassState>,
}

/// Compile `source` into a top-level function object.
///
/// Diagnostics go to the VM's error sink; returns `None` when any error was
/// reported.
pub fn compile(source: &str, vm: &mut Vm) -> Option<ObjRef> {
    let mut parser = Parser::new(source, vm);
    parser.advance();
    while !parser.matches(TokenKind::Eof) {
        parser.declaration();
    }
    parser.finish()
}

impl<'src, 'vm> Parser<'src, 'vm> {
    fn new(source: &'src str, vm: &'vm mut Vm) -> Self {
        Self {
            lexer: Lexer::new(source),
            current: Token::synthetic(""),
            previous: Token::synthetic(""),
            had_error: false,
            panic_mode: false,
            vm,
            chain: vec![FunctionState::new(FunctionKind::Script, None)],
            classes: Vec::new(),
        }
    }

    fn finish(mut self) -> Option<ObjRef> {
        let (function, _) = self.end_function();
        if self.had_error { None } else { Some(function) }
    }

    // --- Token plumbing ---------------------------------------------------

    fn advance(&mut self) {
        self.previous = self.current;
        loop {
            self.current = self.lexer.scan_token();
            if self.current.kind != TokenKind::Error {
                break;
            }
            let message = self.current.lexeme;
            self.error_at_current(message);
        }
    }

    fn consume(&mut self, kind: TokenKind, message: &str) {
        if self.current.kind == kind {
            self.advance();
        } else {
            self.error_at_current(message);
        }
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    fn matches(&mut self, kind: TokenKind) -> bool {
        if !self.check(kind) {
            return false;
        }
        self.advance();
        true
    }

    // --- Error reporting --------------------------------------------------

    fn error(&mut self, message: &str) {
        self.error_at(self.previous, message);
    }

    fn error_at_current(&mut self, message: &str) {
        self.error_at(self.current, message);
    }

    fn error_at(&mut self, token: Token<'src>, message: &str) {
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;
        self.had_error = true;

        let w = self.vm.err_writer();
        let _ = write!(w, "[line {:4} column {:2} Error]", token.line, token.column);
        match token.kind {
            TokenKind::Eof => {
                let _ = write!(w, " at end");
            }
            TokenKind::Error => {}
            _ => {
                let _ = write!(w, " at '{}'", token.lexeme);
            }
        }
        let _ = writeln!(w, " : {message}");
    }

    /// Skip tokens until a statement boundary after an error.
    fn synchronize(&mut self) {
        self.panic_mode = false;
        while self.current.kind != TokenKind::Eof {
            if self.previous.kind == TokenKind::Semicolon {
                return;
            }
            match self.current.kind {
                TokenKind::Class
                | TokenKind::Fun
                | TokenKind::Var
                | TokenKind::For
                | TokenKind::If
                | TokenKind::While
                | TokenKind::Print
                | TokenKind::Return => return,
                _ => {}
            }
            self.advance();
        }
    }

    // --- Emission ---------------------------------------------------------

    fn state(&self) -> &FunctionState<'src> {
        &self.chain[self.chain.len() - 1]
    }

    fn state_mut(&mut self) -> &mut FunctionState<'src> {
        let last = self.chain.len() - 1;
        &mut self.chain[last]
    }

    fn chunk(&self) -> &Chunk {
        &self.state().function.chunk
    }

    fn chunk_mut(&mut self) -> &mut Chunk {
        &mut self.state_mut().function.chunk
    }

    fn scope_depth(&self) -> i32 {
        self.state().scope_depth
    }

    fn emit_byte(&mut self, byte: u8) {
        let (line, column) = (self.previous.line, self.previous.column);
        self.chunk_mut().write(byte, line, column);
    }

    fn emit_bytes(&mut self, a: u8, b: u8) {
        self.emit_byte(a);
        self.emit_byte(b);
    }

    fn emit_u16(&mut self, value: u16) {
        let [lo, hi] = value.to_le_bytes();
        self.emit_byte(lo);
        self.emit_byte(hi);
    }

    /// Emit the narrow form for operands that fit a byte, else the wide form
    /// with a 2-byte little-endian operand.
    fn emit_op_u16(&mut self, narrow: u8, wide: u8, operand: u16) {
        if let Ok(operand) = u8::try_from(operand) {
            self.emit_bytes(narrow, operand);
        } else {
            self.emit_byte(wide);
            self.emit_u16(operand);
        }
    }

    /// Implicit return: initializers return the instance in slot 0,
    /// everything else returns nil.
    fn emit_return(&mut self) {
        if self.state().kind == FunctionKind::Initializer {
            self.emit_bytes(op::GET_LOCAL, 0);
        } else {
            self.emit_byte(op::NIL);
        }
        self.emit_byte(op::RETURN);
    }

    /// Add a constant, anchored on the GC temp stack across the pool push.
    fn make_constant(&mut self, value: Value) -> Option<u16> {
        self.vm.push_temp(value);
        let idx = self.chunk_mut().add_constant(value);
        self.vm.pop_temp();
        if idx.is_none() {
            self.error("Too many constants in one chunk.");
        }
        idx
    }

    fn emit_constant(&mut self, value: Value) {
        if let Some(idx) = self.make_constant(value) {
            self.emit_op_u16(op::CONSTANT, op::CONSTANT_16, idx);
        }
    }

    /// Emit a jump with a placeholder offset; returns the operand offset.
    fn emit_jump(&mut self, opcode: u8) -> usize {
        self.emit_byte(opcode);
        self.emit_byte(0xff);
        self.emit_byte(0xff);
        self.chunk().len() - 2
    }

    /// Back-patch a forward jump to land after the last emitted byte.
    fn patch_jump(&mut self, operand_offset: usize) {
        let distance = self.chunk().len() - operand_offset - 2;
        let Ok(distance) = u16::try_from(distance) else {
            self.error("Too much code to jump over.");
            return;
        };
        let [lo, hi] = distance.to_le_bytes();
        let chunk = self.chunk_mut();
        chunk.code[operand_offset] = lo;
        chunk.code[operand_offset + 1] = hi;
    }

    /// Emit a backward jump to `loop_start`.
    fn emit_loop(&mut self, loop_start: usize) {
        self.emit_byte(op::LOOP);
        let distance = self.chunk().len() - loop_start + 2;
        let Ok(distance) = u16::try_from(distance) else {
            self.error("Loop body too large.");
            return;
        };
        self.emit_u16(distance);
    }

    // --- Allocation through the VM, chain as roots ------------------------

    /// Intern a string with the in-flight functions as GC roots.
    fn intern(&mut self, s: &str) -> ObjRef {
        let roots: Vec<&FunctionObj> = self.chain.iter().map(|state| &state.function).collect();
        self.vm.intern_with_roots(s, &roots)
    }

    /// Intern an identifier and add it to the constant pool.
    fn identifier_constant(&mut self, name: &str) -> u16 {
        let name = self.intern(name);
        self.make_constant(Value::obj(name)).unwrap_or(0)
    }

    // --- Expressions ------------------------------------------------------

    fn expression(&mut self) {
        self.parse_precedence(Precedence::Assignment);
    }

    fn parse_precedence(&mut self, precedence: Precedence) {
        self.advance();
        let Some(prefix) = get_rule(self.previous.kind).prefix else {
            self.error("Expect expression.");
            return;
        };
        let can_assign = precedence <= Precedence::Assignment;
        prefix(self, can_assign);

        while precedence <= get_rule(self.current.kind).precedence {
            self.advance();
            if let Some(infix) = get_rule(self.previous.kind).infix {
                infix(self, can_assign);
            }
        }

        if can_assign && self.matches_assignment_operator() {
            self.error("Invalid assignment target.");
        }
    }

    /// A dangling assignment operator after a non-assignable expression.
    fn matches_assignment_operator(&mut self) -> bool {
        matches!(
            self.current.kind,
            TokenKind::Equal
                | TokenKind::PlusEqual
                | TokenKind::MinusEqual
                | TokenKind::StarEqual
                | TokenKind::SlashEqual
                | TokenKind::PercentEqual
        ) && {
            self.advance();
            true
        }
    }

    fn grouping(&mut self, _can_assign: bool) {
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after expression.");
    }

    fn number(&mut self, _can_assign: bool) {
        let value: f64 = self.previous.lexeme.parse().unwrap_or_default();
        self.emit_constant(Value::number(value));
    }

    fn string(&mut self, _can_assign: bool) {
        let lexeme = self.previous.lexeme;
        // Strip the surrounding quotes
        let contents = &lexeme[1..lexeme.len() - 1];
        let string = self.intern(contents);
        self.emit_constant(Value::obj(string));
    }

    fn literal(&mut self, _can_assign: bool) {
        match self.previous.kind {
            TokenKind::True => self.emit_byte(op::TRUE),
            TokenKind::False => self.emit_byte(op::FALSE),
            TokenKind::Nil => self.emit_byte(op::NIL),
            _ => unreachable!("literal rule on non-literal token"),
        }
    }

    fn unary(&mut self, _can_assign: bool) {
        let op_kind = self.previous.kind;
        // Right-associative: parse the operand at unary precedence
        self.parse_precedence(Precedence::Unary);
        match op_kind {
            TokenKind::Minus => self.emit_byte(op::NEGATE),
            TokenKind::Bang => self.emit_byte(op::NOT),
            _ => unreachable!("unary rule on non-unary token"),
        }
    }

    fn binary(&mut self, _can_assign: bool) {
        let op_kind = self.previous.kind;
        let precedence = get_rule(op_kind).precedence;
        // `**` is right-associative; everything else binds left
        let rhs_precedence = if op_kind == TokenKind::StarStar {
            precedence
        } else {
            precedence.next()
        };
        self.parse_precedence(rhs_precedence);

        match op_kind {
            TokenKind::Plus => self.emit_byte(op::ADD),
            TokenKind::Minus => self.emit_byte(op::SUBTRACT),
            TokenKind::Star => self.emit_byte(op::MULTIPLY),
            TokenKind::Slash => self.emit_byte(op::DIVIDE),
            TokenKind::Percent => self.emit_byte(op::MODULO),
            TokenKind::StarStar => self.emit_byte(op::POWER),
            TokenKind::EqualEqual => self.emit_byte(op::EQUAL),
            TokenKind::BangEqual => self.emit_bytes(op::EQUAL, op::NOT),
            TokenKind::Greater => self.emit_byte(op::GREATER),
            TokenKind::GreaterEqual => self.emit_bytes(op::LESS, op::NOT),
            TokenKind::Less => self.emit_byte(op::LESS),
            TokenKind::LessEqual => self.emit_bytes(op::GREATER, op::NOT),
            _ => unreachable!("binary rule on non-binary token"),
        }
    }

    /// Short-circuit `and`: skip the right side when the left is falsy.
    fn and_(&mut self, _can_assign: bool) {
        let end_jump = self.emit_jump(op::JUMP_IF_FALSE);
        self.emit_byte(op::POP);
        self.parse_precedence(Precedence::And);
        self.patch_jump(end_jump);
    }

    /// Short-circuit `or`: keep the left side when it is truthy.
    fn or_(&mut self, _can_assign: bool) {
        let else_jump = self.emit_jump(op::JUMP_IF_FALSE);
        let end_jump = self.emit_jump(op::JUMP);
        self.patch_jump(else_jump);
        self.emit_byte(op::POP);
        self.parse_precedence(Precedence::Or);
        self.patch_jump(end_jump);
    }

    /// `xor` branches on the right side's truthiness: a truthy right side
    /// yields `not lhs`, a falsy one yields the left side unchanged.
    fn xor_(&mut self, _can_assign: bool) {
        self.parse_precedence(Precedence::Xor);
        let rhs_falsy = self.emit_jump(op::JUMP_IF_FALSE);
        self.emit_byte(op::POP);
        self.emit_byte(op::NOT);
        let end_jump = self.emit_jump(op::JUMP);
        self.patch_jump(rhs_falsy);
        self.emit_byte(op::POP);
        self.patch_jump(end_jump);
    }

    fn call(&mut self, _can_assign: bool) {
        let argc = self.argument_list();
        self.emit_bytes(op::CALL, argc);
    }

    fn dot(&mut self, can_assign: bool) {
        self.consume(TokenKind::Identifier, "Expect property name after '.'.");
        let name = self.identifier_constant(self.previous.lexeme);

        if can_assign && self.matches(TokenKind::Equal) {
            self.expression();
            self.emit_op_u16(op::SET_PROPERTY, op::SET_PROPERTY_16, name);
        } else if self.matches(TokenKind::LeftParen) {
            // Fused property access + call
            let argc = self.argument_list();
            self.emit_op_u16(op::INVOKE, op::INVOKE_16, name);
            self.emit_byte(argc);
        } else {
            self.emit_op_u16(op::GET_PROPERTY, op::GET_PROPERTY_16, name);
        }
    }

    fn argument_list(&mut self) -> u8 {
        let mut count: u16 = 0;
        if !self.check(TokenKind::RightParen) {
            loop {
                self.expression();
                if count == 255 {
                    self.error("Can't have more than 255 arguments.");
                }
                count = count.saturating_add(1);
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after arguments.");
        count.min(255) as u8
    }

    fn variable(&mut self, can_assign: bool) {
        let name = self.previous.lexeme;
        self.named_variable(name, can_assign);
    }

    /// Compile an access to `name`: read, assignment, compound assignment or
    /// postfix increment/decrement.
    fn named_variable(&mut self, name: &'src str, can_assign: bool) {
        let access = self.resolve_variable(name);

        if can_assign && self.matches(TokenKind::Equal) {
            self.expression();
            self.emit_set(access);
        } else if can_assign && self.compound_operator().is_some() {
            let opcode = match self.current.kind {
                TokenKind::PlusEqual => op::ADD,
                TokenKind::MinusEqual => op::SUBTRACT,
                TokenKind::StarEqual => op::MULTIPLY,
                TokenKind::SlashEqual => op::DIVIDE,
                TokenKind::PercentEqual => op::MODULO,
                _ => unreachable!("compound operator checked above"),
            };
            self.advance();
            self.emit_get(access);
            self.expression();
            self.emit_byte(opcode);
            self.emit_set(access);
        } else if self.matches(TokenKind::PlusPlus) {
            self.postfix_increment(access, op::ADD);
        } else if self.matches(TokenKind::MinusMinus) {
            self.postfix_increment(access, op::SUBTRACT);
        } else {
            self.emit_get(access);
        }
    }

    fn compound_operator(&self) -> Option<TokenKind> {
        matches!(
            self.current.kind,
            TokenKind::PlusEqual
                | TokenKind::MinusEqual
                | TokenKind::StarEqual
                | TokenKind::SlashEqual
                | TokenKind::PercentEqual
        )
        .then_some(self.current.kind)
    }

    /// Postfix `++`/`--`: the untouched old value is the expression result,
    /// so read the variable twice and discard the written value.
    fn postfix_increment(&mut self, access: VarAccess, opcode: u8) {
        self.emit_get(access);
        self.emit_get(access);
        self.emit_constant(Value::number(1.0));
        self.emit_byte(opcode);
        self.emit_set(access);
        self.emit_byte(op::POP);
    }

    /// Prefix `++`/`--`: increment first, the new value is the result.
    fn prefix_increment(&mut self, _can_assign: bool) {
        let opcode = match self.previous.kind {
            TokenKind::PlusPlus => op::ADD,
            TokenKind::MinusMinus => op::SUBTRACT,
            _ => unreachable!("prefix increment rule on other token"),
        };
        self.consume(TokenKind::Identifier, "Expect variable name.");
        let access = self.resolve_variable(self.previous.lexeme);
        self.emit_get(access);
        self.emit_constant(Value::number(1.0));
        self.emit_byte(opcode);
        self.emit_set(access);
    }

    fn emit_get(&mut self, access: VarAccess) {
        match access {
            VarAccess::Local(slot) => self.emit_op_u16(op::GET_LOCAL, op::GET_LOCAL_16, slot),
            VarAccess::Upvalue(idx) => self.emit_op_u16(op::GET_UPVALUE, op::GET_UPVALUE_16, idx),
            VarAccess::Global(idx) => self.emit_op_u16(op::GET_GLOBAL, op::GET_GLOBAL_16, idx),
        }
    }

    fn emit_set(&mut self, access: VarAccess) {
        match access {
            VarAccess::Local(slot) => self.emit_op_u16(op::SET_LOCAL, op::SET_LOCAL_16, slot),
            VarAccess::Upvalue(idx) => self.emit_op_u16(op::SET_UPVALUE, op::SET_UPVALUE_16, idx),
            VarAccess::Global(idx) => self.emit_op_u16(op::SET_GLOBAL, op::SET_GLOBAL_16, idx),
        }
    }

    // --- Resolver ---------------------------------------------------------

    /// Innermost locals, then upvalues up the chain, then global by name.
    fn resolve_variable(&mut self, name: &'src str) -> VarAccess {
        let top = self.chain.len() - 1;
        if let Some(slot) = self.resolve_local(top, name) {
            return VarAccess::Local(slot);
        }
        if let Some(idx) = self.resolve_upvalue(top, name) {
            return VarAccess::Upvalue(idx);
        }
        VarAccess::Global(self.identifier_constant(name))
    }

    fn resolve_local(&mut self, func: usize, name: &str) -> Option<u16> {
        let slot = self.chain[func]
            .locals
            .iter()
            .rposition(|local| local.name == name)?;
        if self.chain[func].locals[slot].depth == -1 {
            self.error("Can't read local variable in its own initializer.");
        }
        Some(slot as u16)
    }

    /// Capture `name` from an enclosing function, threading the capture
    /// through every function in between.
    fn resolve_upvalue(&mut self, func: usize, name: &str) -> Option<u16> {
        if func == 0 {
            return None;
        }
        if let Some(local) = self.resolve_local(func - 1, name) {
            self.chain[func - 1].locals[local as usize].captured = true;
            return Some(self.add_upvalue(func, local, true));
        }
        if let Some(upvalue) = self.resolve_upvalue(func - 1, name) {
            return Some(self.add_upvalue(func, upvalue, false));
        }
        None
    }

    fn add_upvalue(&mut self, func: usize, index: u16, is_local: bool) -> u16 {
        if let Some(existing) = self.chain[func]
            .upvalues
            .iter()
            .position(|u| u.index == index && u.is_local == is_local)
        {
            return existing as u16;
        }
        if self.chain[func].upvalues.len() > u16::MAX as usize {
            self.error("Too many closure variables in function.");
            return 0;
        }
        self.chain[func].upvalues.push(UpvalueSpec { index, is_local });
        (self.chain[func].upvalues.len() - 1) as u16
    }

    // --- Scopes and variable declarations ---------------------------------

    fn begin_scope(&mut self) {
        self.state_mut().scope_depth += 1;
    }

    /// Pop locals that leave scope, closing the captured ones.
    fn end_scope(&mut self) {
        self.state_mut().scope_depth -= 1;
        loop {
            let state = self.state();
            let Some(local) = state.locals.last() else {
                break;
            };
            if local.depth <= state.scope_depth {
                break;
            }
            let captured = local.captured;
            if captured {
                self.emit_byte(op::CLOSE_UPVALUE);
            } else {
                self.emit_byte(op::POP);
            }
            self.state_mut().locals.pop();
        }
    }

    /// Parse a variable name; returns its name-constant index for globals.
    fn parse_variable(&mut self, message: &str) -> u16 {
        self.consume(TokenKind::Identifier, message);
        self.declare_variable();
        if self.scope_depth() > 0 {
            return 0;
        }
        self.identifier_constant(self.previous.lexeme)
    }

    /// Reserve a local slot, initially marked "declared but not defined".
    fn declare_variable(&mut self) {
        if self.scope_depth() == 0 {
            return;
        }
        let name = self.previous.lexeme;
        let duplicate = {
            let state = self.state();
            state
                .locals
                .iter()
                .rev()
                .take_while(|l| l.depth == -1 || l.depth >= state.scope_depth)
                .any(|l| l.name == name)
        };
        if duplicate {
            self.error("Already a variable with this name in this scope.");
        }
        self.add_local(name);
    }

    fn add_local(&mut self, name: &'src str) {
        if self.state().locals.len() > u16::MAX as usize {
            self.error("Too many local variables in function.");
            return;
        }
        self.state_mut().locals.push(Local {
            name,
            depth: -1,
            captured: false,
        });
    }

    fn mark_initialized(&mut self) {
        if self.scope_depth() == 0 {
            return;
        }
        let depth = self.scope_depth();
        if let Some(local) = self.state_mut().locals.last_mut() {
            local.depth = depth;
        }
    }

    fn define_variable(&mut self, global: u16) {
        if self.scope_depth() > 0 {
            self.mark_initialized();
            return;
        }
        self.emit_op_u16(op::DEFINE_GLOBAL, op::DEFINE_GLOBAL_16, global);
    }

    // --- Declarations and statements --------------------------------------

    fn declaration(&mut self) {
        if self.matches(TokenKind::Class) {
            self.class_declaration();
        } else if self.matches(TokenKind::Fun) {
            self.fun_declaration();
        } else if self.matches(TokenKind::Var) {
            self.var_declaration();
        } else {
            self.statement();
        }
        if self.panic_mode {
            self.synchronize();
        }
    }

    fn var_declaration(&mut self) {
        let global = self.parse_variable("Expect variable name.");
        if self.matches(TokenKind::Equal) {
            self.expression();
        } else {
            self.emit_byte(op::NIL);
        }
        self.consume(
            TokenKind::Semicolon,
            "Expect ';' after variable declaration.",
        );
        self.define_variable(global);
    }

    fn statement(&mut self) {
        if self.matches(TokenKind::Print) {
            self.print_statement();
        } else if self.matches(TokenKind::For) {
            self.for_statement();
        } else if self.matches(TokenKind::If) {
            self.if_statement();
        } else if self.matches(TokenKind::Return) {
            self.return_statement();
        } else if self.matches(TokenKind::While) {
            self.while_statement();
        } else if self.matches(TokenKind::LeftBrace) {
            self.begin_scope();
            self.block();
            self.end_scope();
        } else {
            self.expression_statement();
        }
    }

    fn block(&mut self) {
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.declaration();
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after block.");
    }

    fn print_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after value.");
        self.emit_byte(op::PRINT);
    }

    fn expression_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after expression.");
        self.emit_byte(op::POP);
    }

    fn if_statement(&mut self) {
        self.consume(TokenKind::LeftParen, "Expect '(' after 'if'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after condition.");

        let then_jump = self.emit_jump(op::JUMP_IF_FALSE);
        self.emit_byte(op::POP);
        self.statement();
        let else_jump = self.emit_jump(op::JUMP);

        self.patch_jump(then_jump);
        self.emit_byte(op::POP);
        if self.matches(TokenKind::Else) {
            self.statement();
        }
        self.patch_jump(else_jump);
    }

    fn while_statement(&mut self) {
        let loop_start = self.chunk().len();
        self.consume(TokenKind::LeftParen, "Expect '(' after 'while'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after condition.");

        let exit_jump = self.emit_jump(op::JUMP_IF_FALSE);
        self.emit_byte(op::POP);
        self.statement();
        self.emit_loop(loop_start);

        self.patch_jump(exit_jump);
        self.emit_byte(op::POP);
    }

    /// `for` desugars inside its own scope; the increment clause becomes the
    /// loop's back-edge.
    fn for_statement(&mut self) {
        self.begin_scope();
        self.consume(TokenKind::LeftParen, "Expect '(' after 'for'.");
        if self.matches(TokenKind::Semicolon) {
            // No initializer
        } else if self.matches(TokenKind::Var) {
            self.var_declaration();
        } else {
            self.expression_statement();
        }

        let mut loop_start = self.chunk().len();
        let mut exit_jump = None;
        if !self.matches(TokenKind::Semicolon) {
            self.expression();
            self.consume(TokenKind::Semicolon, "Expect ';' after loop condition.");
            exit_jump = Some(self.emit_jump(op::JUMP_IF_FALSE));
            self.emit_byte(op::POP);
        }

        if !self.matches(TokenKind::RightParen) {
            let body_jump = self.emit_jump(op::JUMP);
            let increment_start = self.chunk().len();
            self.expression();
            self.emit_byte(op::POP);
            self.consume(TokenKind::RightParen, "Expect ')' after for clauses.");

            self.emit_loop(loop_start);
            loop_start = increment_start;
            self.patch_jump(body_jump);
        }

        self.statement();
        self.emit_loop(loop_start);

        if let Some(exit_jump) = exit_jump {
            self.patch_jump(exit_jump);
            self.emit_byte(op::POP);
        }
        self.end_scope();
    }

    fn return_statement(&mut self) {
        if self.state().kind == FunctionKind::Script {
            self.error("Can't return from top-level code.");
        }
        if self.matches(TokenKind::Semicolon) {
            self.emit_return();
        } else {
            if self.state().kind == FunctionKind::Initializer {
                self.error("Can't return a value from an initializer.");
            }
            self.expression();
            self.consume(TokenKind::Semicolon, "Expect ';' after return value.");
            self.emit_byte(op::RETURN);
        }
    }
}
