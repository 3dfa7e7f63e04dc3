// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! REPL (Read-Eval-Print Loop) for Loxa.
//!
//! Reads one line per iteration, interprets it on a persistent VM (globals
//! survive across lines) and keeps going after errors. Terminates on
//! end-of-input.

use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;

use crate::vm::Vm;

/// Run the interactive loop until end-of-input.
///
/// # Errors
///
/// Returns an error when the line editor cannot be set up or the terminal
/// fails; interpreter errors are reported and the loop continues.
pub fn run(vm: &mut Vm) -> Result<(), ReadlineError> {
    let mut editor = DefaultEditor::new()?;
    loop {
        match editor.readline("> ") {
            Ok(line) => {
                if line.trim().is_empty() {
                    continue;
                }
                let _ = editor.add_history_entry(&line);
                // Diagnostics were already written; keep the session alive
                let _ = vm.interpret(&line);
            }
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => {
                println!();
                return Ok(());
            }
            Err(error) => return Err(error),
        }
    }
}
