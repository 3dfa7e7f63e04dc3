// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! End-to-end programs with exact expected output.

use super::{run_err, run_lines, run_ok};
use crate::vm::InterpretError;

#[test]
fn closures_share_upvalues() {
    let source = "
        fun make() {
          var i = 0;
          fun inc() { i = i + 1; return i; }
          return inc;
        }
        var c = make();
        print c(); print c(); print c();
    ";
    assert_eq!(run_lines(source), vec!["1", "2", "3"]);
}

#[test]
fn inheritance_and_super() {
    let source = "
        class A { say() { print \"A\"; } }
        class B < A { say() { super.say(); print \"B\"; } }
        B().say();
    ";
    assert_eq!(run_lines(source), vec!["A", "B"]);
}

#[test]
fn initializer_returns_the_instance() {
    let source = "
        class T { init() { this.x = 42; } }
        var t = T();
        print t.x;
    ";
    assert_eq!(run_ok(source), "42\n");
}

#[test]
fn control_flow_desugaring() {
    let source = "
        var s = 0;
        for (var i = 1; i <= 5; i = i + 1) s = s + i;
        print s;
    ";
    assert_eq!(run_ok(source), "15\n");
}

#[test]
fn string_interning_enables_identity_equality() {
    assert_eq!(run_ok("print \"ab\" + \"c\" == \"abc\";"), "true\n");
}

#[test]
fn runtime_error_surfaces_a_frame_trace() {
    let (error, stderr) = run_err("print 1 + \"x\";");
    assert!(matches!(error, InterpretError::Runtime(_)));
    assert!(
        stderr.contains("operands must be two numbers or two strings."),
        "{stderr}"
    );
    assert!(stderr.contains("] in script"), "{stderr}");
}

#[test]
fn fizzbuzz_end_to_end() {
    let source = "
        for (var i = 1; i <= 15; i = i + 1) {
          if (i % 15 == 0) print \"fizzbuzz\";
          else if (i % 3 == 0) print \"fizz\";
          else if (i % 5 == 0) print \"buzz\";
          else print i;
        }
    ";
    assert_eq!(
        run_lines(source),
        vec![
            "1", "2", "fizz", "4", "buzz", "fizz", "7", "8", "fizz", "buzz", "11", "fizz", "13",
            "14", "fizzbuzz"
        ]
    );
}

#[test]
fn class_based_linked_list() {
    let source = "
        class Node {
          init(value) { this.value = value; this.next = nil; }
        }
        class List {
          init() { this.head = nil; this.length = 0; }
          push(value) {
            var node = Node(value);
            node.next = this.head;
            this.head = node;
            this.length = this.length + 1;
          }
          sum() {
            var total = 0;
            var cursor = this.head;
            while (cursor != nil) {
              total = total + cursor.value;
              cursor = cursor.next;
            }
            return total;
          }
        }
        var list = List();
        list.push(1); list.push(2); list.push(3);
        print list.length;
        print list.sum();
    ";
    assert_eq!(run_lines(source), vec!["3", "6"]);
}
