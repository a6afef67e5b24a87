// This file is part of devattach, an application to attach FPGA peripherals through device-tree overlays and expose them to userspace.
//
// Copyright 2025 Canonical Ltd.
//
// SPDX-License-Identifier: GPL-3.0-only
//
// devattach is free software: you can redistribute it and/or modify it under the terms of the GNU General Public License version 3, as published by the Free Software Foundation.
//
// devattach is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the implied warranties of MERCHANTABILITY, SATISFACTORY QUALITY, or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with this program.  If not, see http://www.gnu.org/licenses/.

//! ASCII payload helpers shared by the peripheral endpoints.

/// Longest decimal input an endpoint accepts; extra bytes are ignored.
pub const MAX_DECIMAL_INPUT: usize = 10;

/// Value of the leading decimal digits of `input`. Parsing stops at the first non-digit;
/// overflow wraps.
pub fn parse_decimal(input: &[u8]) -> u32 {
    input
        .iter()
        .take_while(|b| b.is_ascii_digit())
        .fold(0u32, |acc, b| {
            acc.wrapping_mul(10).wrapping_add(u32::from(b - b'0'))
        })
}

/// `value` in decimal, NUL-terminated.
pub fn format_decimal(value: u32) -> Vec<u8> {
    let mut out = value.to_string().into_bytes();
    out.push(0);
    out
}

/// The eight bits of `value`, most significant first, as `'0'`/`'1'`, NUL-terminated.
pub fn format_binary(value: u8) -> Vec<u8> {
    let mut out: Vec<u8> = (0..8)
        .rev()
        .map(|bit| if value & (1 << bit) != 0 { b'1' } else { b'0' })
        .collect();
    out.push(0);
    out
}

/// Copy `payload[*pos..]` into `buf` and advance `*pos`. Positions at or past the end of the
/// payload read nothing.
pub fn copy_at_offset(payload: &[u8], buf: &mut [u8], pos: &mut u64) -> usize {
    let Some(rest) = usize::try_from(*pos)
        .ok()
        .and_then(|start| payload.get(start..))
    else {
        return 0;
    };
    let len = rest.len().min(buf.len());
    buf[..len].copy_from_slice(&rest[..len]);
    *pos += len as u64;
    len
}
