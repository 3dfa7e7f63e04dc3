// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Value printing.
//!
//! Numbers follow C's `%g`: six significant digits, fixed notation for
//! exponents in `[-4, 5]`, scientific otherwise, trailing zeros stripped.

use crate::heap::Heap;

use super::{Obj, ObjRef, Value};

/// Render a value the way `print` shows it.
#[must_use]
pub fn format_value(heap: &Heap, value: Value) -> String {
    if value.is_nil() {
        return "nil".to_owned();
    }
    if let Some(b) = value.as_bool() {
        return if b { "true" } else { "false" }.to_owned();
    }
    if let Some(n) = value.as_number() {
        return format_number(n);
    }
    match value.as_obj() {
        Some(r) => format_obj(heap, r),
        None => "nil".to_owned(),
    }
}

fn format_obj(heap: &Heap, r: ObjRef) -> String {
    match heap.get(r) {
        Obj::String(s) => s.chars.to_string(),
        Obj::Function(f) => format_function(heap, f.name),
        Obj::Native(n) => format!("<native {}>", heap.string_str(n.name)),
        Obj::Closure(c) => format_function(heap, heap.function(c.function).name),
        Obj::Upvalue(_) => "<upvalue>".to_owned(),
        Obj::Class(c) => format!("<class {}>", heap.string_str(c.name)),
        Obj::Instance(i) => {
            let class = heap.class(i.class);
            format!("<instance of {}>", heap.string_str(class.name))
        }
        Obj::BoundMethod(b) => {
            let closure = heap.closure(b.method);
            format_function(heap, heap.function(closure.function).name)
        }
    }
}

fn format_function(heap: &Heap, name: Option<ObjRef>) -> String {
    match name {
        Some(name) => format!("<fn {}>", heap.string_str(name)),
        None => "<script>".to_owned(),
    }
}

/// Render a number like C's `%g`.
#[must_use]
pub fn format_number(value: f64) -> String {
    if value.is_nan() {
        return "nan".to_owned();
    }
    if value.is_infinite() {
        return if value.is_sign_negative() { "-inf" } else { "inf" }.to_owned();
    }
    if value == 0.0 {
        return if value.is_sign_negative() { "-0" } else { "0" }.to_owned();
    }

    // Decimal exponent after rounding to six significant digits
    let sci = format!("{:.5e}", value);
    let exponent: i32 = sci
        .rsplit_once('e')
        .and_then(|(_, e)| e.parse().ok())
        .unwrap_or(0);

    if (-4..6).contains(&exponent) {
        let precision = usize::try_from(5 - exponent).unwrap_or(0);
        trim_fraction(&format!("{value:.precision$}"))
    } else {
        let mantissa = sci.rsplit_once('e').map_or(sci.as_str(), |(m, _)| m);
        let mantissa = trim_fraction(mantissa);
        let sign = if exponent < 0 { '-' } else { '+' };
        format!("{mantissa}e{sign}{:02}", exponent.abs())
    }
}

/// Strip trailing fractional zeros (and a bare trailing point).
fn trim_fraction(s: &str) -> String {
    if !s.contains('.') {
        return s.to_owned();
    }
    let trimmed = s.trim_end_matches('0').trim_end_matches('.');
    trimmed.to_owned()
}
