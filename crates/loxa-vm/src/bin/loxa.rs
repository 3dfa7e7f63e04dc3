// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Loxa driver: run a script file or start the REPL.
//!
//! Exit codes follow the BSD sysexits convention: 64 usage, 65 compile
//! error, 66 unreadable input, 70 runtime error, 71 out of memory, 74 I/O
//! error while reading.

use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::process;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use loxa_vm::repl;
use loxa_vm::vm::{InterpretError, Vm};

#[derive(Parser)]
#[command(name = "loxa")]
#[command(version = loxa_vm::VERSION)]
#[command(about = "Loxa interpreter - run a script or start a REPL", long_about = None)]
struct Cli {
    /// Script file to run; starts an interactive session when omitted
    script: Option<PathBuf>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(error) if error.use_stderr() => {
            let _ = error.print();
            process::exit(64);
        }
        Err(help_or_version) => {
            let _ = help_or_version.print();
            process::exit(0);
        }
    };

    match cli.script {
        Some(path) => run_file(&path),
        None => run_prompt(),
    }
}

fn run_file(path: &PathBuf) {
    let source = match fs::read_to_string(path) {
        Ok(source) => source,
        Err(error) => {
            let display = path.display();
            match error.kind() {
                ErrorKind::NotFound | ErrorKind::PermissionDenied => {
                    eprintln!("Could not open file \"{display}\".");
                    process::exit(66);
                }
                ErrorKind::OutOfMemory => {
                    eprintln!("Not enough memory to read \"{display}\".");
                    process::exit(71);
                }
                _ => {
                    eprintln!("Could not read file \"{display}\".");
                    process::exit(74);
                }
            }
        }
    };

    let mut vm = Vm::new();
    match vm.interpret(&source) {
        Ok(()) => {}
        Err(InterpretError::Compile) => process::exit(65),
        Err(InterpretError::Runtime(_)) => process::exit(70),
    }
}

fn run_prompt() {
    let mut vm = Vm::new();
    if let Err(error) = repl::run(&mut vm) {
        eprintln!("{error}");
        process::exit(74);
    }
}
