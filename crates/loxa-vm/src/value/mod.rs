// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Value representation for the Loxa language.
//!
//! A value is nil, a boolean, an IEEE-754 double, or a reference to a heap
//! object. Two behaviorally identical encodings are supported and selected at
//! build time:
//!
//! - the default tagged union (an ordinary Rust enum), and
//! - a NaN-boxed 64-bit encoding behind the `nanbox` feature, packing
//!   non-number values into quiet-NaN bit patterns.
//!
//! Both expose the same constructor/predicate/accessor surface, so the rest
//! of the crate never looks at the encoding.


mod object;
mod printer;

#[cfg(feature = "nanbox")]
mod nanbox;
#[cfg(not(feature = "nanbox"))]
mod tagged;

pub use object::{
    BoundMethodObj, ClassObj, ClosureObj, FunctionObj, InstanceObj, NativeFn, NativeObj, Obj,
    ObjKind, StringObj, UpvalueState, hash_str,
};
pub use printer::{format_number, format_value};

#[cfg(feature = "nanbox")]
pub use nanbox::Value;
#[cfg(not(feature = "nanbox"))]
pub use tagged::Value;

/// Handle to a heap object.
///
/// References compare by identity; because strings are interned, two string
/// values with equal bytes always hold the same handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjRef(pub(crate) u32);

impl ObjRef {
    /// The raw slot index behind this handle.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}
