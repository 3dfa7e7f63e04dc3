// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Function, method and class compilation.
//!
//! Nested functions push a fresh resolver state onto the chain; finishing
//! one pops the state, allocates the finished `FunctionObj` on the heap and
//! emits `CLOSURE` with one `{is_local, index}` operand triple per captured
//! upvalue, which is exactly the layout the VM consumes.

use crate::bytecode::op;
use crate::lexer::TokenKind;
use crate::value::{FunctionObj, Obj, ObjRef, Value};

use super::{FunctionKind, FunctionState, Parser, UpvalueSpec};

impl<'src> Parser<'src, '_> {
    pub(super) fn fun_declaration(&mut self) {
        let global = self.parse_variable("Expect function name.");
        // A function may refer to itself; it is defined before its body
        self.mark_initialized();
        self.function(FunctionKind::Function);
        self.define_variable(global);
    }

    /// Compile a function body (the name was just consumed) and emit the
    /// `CLOSURE` instruction that builds it at runtime.
    pub(super) fn function(&mut self, kind: FunctionKind) {
        let name_lexeme = self.previous.lexeme;
        let name = self.intern(name_lexeme);
        self.chain.push(FunctionState::new(kind, Some(name)));
        self.begin_scope();

        self.consume(TokenKind::LeftParen, "Expect '(' after function name.");
        if !self.check(TokenKind::RightParen) {
            loop {
                if self.state().function.arity == 255 {
                    self.error_at_current("Can't have more than 255 parameters.");
                } else {
                    self.state_mut().function.arity += 1;
                }
                let param = self.parse_variable("Expect parameter name.");
                self.define_variable(param);
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after parameters.");
        self.consume(TokenKind::LeftBrace, "Expect '{' before function body.");
        self.block();

        let (function, upvalues) = self.end_function();
        if let Some(idx) = self.make_constant(Value::obj(function)) {
            self.emit_op_u16(op::CLOSURE, op::CLOSURE_16, idx);
        }
        for upvalue in upvalues {
            self.emit_byte(u8::from(upvalue.is_local));
            self.emit_u16(upvalue.index);
        }
    }

    /// Seal the innermost function: emit the implicit return, then move the
    /// finished `FunctionObj` onto the heap.
    ///
    /// A collection may only run while the function is still on the chain
    /// (and therefore rooted); the heap insertion itself never collects.
    pub(super) fn end_function(&mut self) -> (ObjRef, Vec<UpvalueSpec>) {
        self.emit_return();

        {
            let roots: Vec<&FunctionObj> = self.chain.iter().map(|s| &s.function).collect();
            self.vm.maybe_collect(&roots);
        }

        let state = match self.chain.pop() {
            Some(state) => state,
            None => unreachable!("resolver chain is never empty"),
        };
        let upvalues = state.upvalues;
        let mut function = state.function;
        function.upvalue_count = upvalues.len() as u16;

        tracing::debug!(
            arity = function.arity,
            upvalues = function.upvalue_count,
            bytes = function.chunk.len(),
            "compiled function"
        );

        let function = self.vm.alloc_raw(Obj::Function(function));
        (function, upvalues)
    }

    // --- Classes ----------------------------------------------------------

    pub(super) fn class_declaration(&mut self) {
        self.consume(TokenKind::Identifier, "Expect class name.");
        let class_name = self.previous.lexeme;
        let name_constant = self.identifier_constant(class_name);
        self.declare_variable();

        self.emit_op_u16(op::CLASS, op::CLASS_16, name_constant);
        self.define_variable(name_constant);

        self.classes.push(super::ClassState {
            has_superclass: false,
        });

        if self.matches(TokenKind::Less) {
            self.consume(TokenKind::Identifier, "Expect superclass name.");
            self.variable(false);
            if class_name == self.previous.lexeme {
                self.error("A class can't inherit from itself.");
            }

            // The superclass lives in a scope of its own as the local `super`
            self.begin_scope();
            self.add_local("super");
            self.mark_initialized();

            self.named_variable(class_name, false);
            self.emit_byte(op::INHERIT);
            let last = self.classes.len() - 1;
            self.classes[last].has_superclass = true;
        }

        self.named_variable(class_name, false);
        self.consume(TokenKind::LeftBrace, "Expect '{' before class body.");
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.method();
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after class body.");
        self.emit_byte(op::POP);

        let has_superclass = self.classes.last().is_some_and(|c| c.has_superclass);
        if has_superclass {
            self.end_scope();
        }
        self.classes.pop();
    }

    fn method(&mut self) {
        self.consume(TokenKind::Identifier, "Expect method name.");
        let constant = self.identifier_constant(self.previous.lexeme);
        let kind = if self.previous.lexeme == "init" {
            FunctionKind::Initializer
        } else {
            FunctionKind::Method
        };
        self.function(kind);
        self.emit_op_u16(op::METHOD, op::METHOD_16, constant);
    }

    /// `this` resolves as the local in slot 0 of the enclosing method.
    pub(super) fn this_(&mut self, _can_assign: bool) {
        if self.classes.is_empty() {
            self.error("Can't use 'this' outside of a class.");
            return;
        }
        self.named_variable("this", false);
    }

    /// `super.name` or `super.name(args)`; lookup starts at the superclass
    /// captured in the class declaration's `super` scope.
    pub(super) fn super_(&mut self, _can_assign: bool) {
        match self.classes.last() {
            None => self.error("Can't use 'super' outside of a class."),
            Some(class) if !class.has_superclass => {
                self.error("Can't use 'super' in a class with no superclass.");
            }
            Some(_) => {}
        }

        self.consume(TokenKind::Dot, "Expect '.' after 'super'.");
        self.consume(TokenKind::Identifier, "Expect superclass method name.");
        let name = self.identifier_constant(self.previous.lexeme);

        self.named_variable("this", false);
        if self.matches(TokenKind::LeftParen) {
            let argc = self.argument_list();
            self.named_variable("super", false);
            self.emit_op_u16(op::INVOKE_SUPER, op::INVOKE_SUPER_16, name);
            self.emit_byte(argc);
        } else {
            self.named_variable("super", false);
            self.emit_op_u16(op::GET_SUPER, op::GET_SUPER_16, name);
        }
    }
}
