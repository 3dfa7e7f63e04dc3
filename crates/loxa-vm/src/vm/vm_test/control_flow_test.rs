// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Control-flow tests: if/else, while, for, short-circuit operators.

use super::{run_lines, run_ok};

#[test]
fn eval_if_else() {
    assert_eq!(run_ok("if (true) print \"yes\"; else print \"no\";"), "yes\n");
    assert_eq!(run_ok("if (false) print \"yes\"; else print \"no\";"), "no\n");
    assert_eq!(run_ok("if (nil) print \"yes\"; else print \"no\";"), "no\n");
    // No else branch, falsy condition: nothing printed
    assert_eq!(run_ok("if (false) print \"never\";"), "");
}

#[test]
fn eval_while_loop() {
    assert_eq!(
        run_lines("var i = 3; while (i > 0) { print i; i = i - 1; }"),
        vec!["3", "2", "1"]
    );
    assert_eq!(run_ok("while (false) print \"never\";"), "");
}

#[test]
fn eval_for_loop() {
    assert_eq!(
        run_lines("for (var i = 0; i < 3; i = i + 1) print i;"),
        vec!["0", "1", "2"]
    );
}

#[test]
fn eval_for_without_clauses() {
    // Initializer and increment are optional; condition alone drives exit
    assert_eq!(
        run_lines("var i = 0; for (; i < 2;) { print i; i = i + 1; }"),
        vec!["0", "1"]
    );
}

#[test]
fn eval_for_scopes_its_variable() {
    let source = "
        var i = \"outer\";
        for (var i = 0; i < 1; i = i + 1) print i;
        print i;
    ";
    assert_eq!(run_lines(source), vec!["0", "outer"]);
}

#[test]
fn eval_nested_loops() {
    let source = "
        var total = 0;
        for (var i = 1; i <= 3; i = i + 1) {
          for (var j = 1; j <= 3; j = j + 1) {
            total = total + i * j;
          }
        }
        print total;
    ";
    assert_eq!(run_ok(source), "36\n");
}

#[test]
fn and_short_circuits() {
    assert_eq!(run_ok("print nil and 1;"), "nil\n");
    assert_eq!(run_ok("print false and 1;"), "false\n");
    assert_eq!(run_ok("print 1 and 2;"), "2\n");
    // The right side must not evaluate when the left is falsy
    assert_eq!(
        run_ok("var touched = false; fun touch() { touched = true; return true; } var r = false and touch(); print touched;"),
        "false\n"
    );
}

#[test]
fn or_short_circuits() {
    assert_eq!(run_ok("print nil or \"fallback\";"), "fallback\n");
    assert_eq!(run_ok("print 1 or 2;"), "1\n");
    assert_eq!(run_ok("print false or false;"), "false\n");
    assert_eq!(
        run_ok("var touched = false; fun touch() { touched = true; return true; } var r = 1 or touch(); print touched;"),
        "false\n"
    );
}

#[test]
fn condition_value_is_popped() {
    // Looping does not leak condition values onto the stack
    let source = "
        var n = 0;
        while (n < 100) { n = n + 1; }
        print n;
    ";
    assert_eq!(run_ok(source), "100\n");
}
