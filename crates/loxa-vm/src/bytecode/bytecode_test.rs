// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Tests for the chunk format.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use super::{Chunk, MAX_CONSTANTS, read_u16};
use crate::value::Value;

#[test]
fn write_tracks_locations_per_byte() {
    let mut chunk = Chunk::new();
    chunk.write(1, 10, 2);
    chunk.write(2, 10, 2);
    chunk.write(3, 11, 0);

    assert_eq!(chunk.len(), 3);
    assert_eq!(chunk.line_at(0), 10);
    assert_eq!(chunk.column_at(0), 2);
    assert_eq!(chunk.line_at(2), 11);
    assert_eq!(chunk.column_at(2), 0);
}

#[test]
fn locations_out_of_range_are_zero() {
    let chunk = Chunk::new();
    assert_eq!(chunk.line_at(99), 0);
    assert_eq!(chunk.column_at(99), 0);
}

#[test]
fn add_constant_returns_indices_in_order() {
    let mut chunk = Chunk::new();
    assert_eq!(chunk.add_constant(Value::number(1.0)), Some(0));
    assert_eq!(chunk.add_constant(Value::number(2.0)), Some(1));
    assert_eq!(chunk.constants.len(), 2);
}

#[test]
fn constant_pool_is_capped() {
    let mut chunk = Chunk::new();
    for i in 0..MAX_CONSTANTS {
        assert_eq!(chunk.add_constant(Value::number(i as f64)), Some(i as u16));
    }
    assert_eq!(chunk.add_constant(Value::nil()), None);
    assert_eq!(chunk.constants.len(), MAX_CONSTANTS);
}

#[test]
fn read_u16_is_little_endian() {
    assert_eq!(read_u16(&[0x34, 0x12], 0), 0x1234);
    assert_eq!(read_u16(&[0, 0xff, 0x01], 1), 0x01ff);
}

#[test]
fn empty_chunk() {
    let chunk = Chunk::new();
    assert!(chunk.is_empty());
    assert_eq!(chunk.len(), 0);
}
