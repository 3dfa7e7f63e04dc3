// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Tests for the virtual machine.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod control_flow_test;
mod integration_test;

use std::cell::RefCell;
use std::io::{self, Write};
use std::rc::Rc;

use super::{InterpretError, Vm};

/// An output sink the test keeps a handle to after the VM takes ownership.
#[derive(Clone, Default)]
pub struct SharedBuffer(Rc<RefCell<Vec<u8>>>);

impl SharedBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.borrow()).into_owned()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A VM with captured stdout/stderr.
pub struct TestVm {
    pub vm: Vm,
    out: SharedBuffer,
    err: SharedBuffer,
}

impl TestVm {
    pub fn interpret(&mut self, source: &str) -> Result<(), InterpretError> {
        self.vm.interpret(source)
    }

    pub fn stdout(&self) -> String {
        self.out.contents()
    }

    pub fn stderr(&self) -> String {
        self.err.contents()
    }
}

/// Create a VM with captured output.
pub fn setup() -> TestVm {
    let out = SharedBuffer::default();
    let err = SharedBuffer::default();
    let vm = Vm::with_output(Box::new(out.clone()), Box::new(err.clone()));
    TestVm { vm, out, err }
}

/// Interpret `source` on a fresh VM.
pub fn run(source: &str) -> (Result<(), InterpretError>, String, String) {
    let mut test = setup();
    let result = test.interpret(source);
    (result, test.stdout(), test.stderr())
}

/// Interpret `source`, expecting success; returns captured stdout.
pub fn run_ok(source: &str) -> String {
    let (result, stdout, stderr) = run(source);
    assert_eq!(result, Ok(()), "unexpected failure; stderr: {stderr}");
    stdout
}

/// Interpret `source`, expecting success; returns stdout split into lines.
pub fn run_lines(source: &str) -> Vec<String> {
    run_ok(source).lines().map(str::to_owned).collect()
}

/// Interpret `source`, expecting failure; returns the error and stderr.
pub fn run_err(source: &str) -> (InterpretError, String) {
    let (result, _, stderr) = run(source);
    let error = result.expect_err("expected an interpreter error");
    (error, stderr)
}
