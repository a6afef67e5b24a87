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

//! Flattened device-tree (FDT) blob codec.
//!
//! [`unflatten`] turns a `.dtb`/`.dtbo` blob into an owned [`DeviceNode`] tree.
//! [`flatten`] produces a version-17 blob from a tree; the daemon never needs it at
//! runtime but fixtures and the simulated board use it to build fragments.

use crate::devicetree::node::{DeviceNode, Property};
use crate::error::AttachError;
use nom::{
    IResult,
    bytes::complete::{tag, take, take_while},
    error::ErrorKind,
    multi::many0_count,
    number::complete::be_u32,
};
use std::collections::HashMap;

pub const FDT_MAGIC: u32 = 0xd00d_feed;
const FDT_BEGIN_NODE: u32 = 0x1;
const FDT_END_NODE: u32 = 0x2;
const FDT_PROP: u32 = 0x3;
const FDT_NOP: u32 = 0x4;
const FDT_END: u32 = 0x9;

const HEADER_LEN: usize = 40;
const MAX_DEPTH: usize = 64;

#[derive(Debug, Clone, Copy)]
struct Header {
    magic: u32,
    totalsize: u32,
    off_dt_struct: u32,
    off_dt_strings: u32,
    version: u32,
    last_comp_version: u32,
    size_dt_strings: u32,
    size_dt_struct: u32,
}

impl Header {
    fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        let (input, magic) = be_u32(input)?;
        let (input, totalsize) = be_u32(input)?;
        let (input, off_dt_struct) = be_u32(input)?;
        let (input, off_dt_strings) = be_u32(input)?;
        let (input, _off_mem_rsvmap) = be_u32(input)?;
        let (input, version) = be_u32(input)?;
        let (input, last_comp_version) = be_u32(input)?;
        let (input, _boot_cpuid_phys) = be_u32(input)?;
        let (input, size_dt_strings) = be_u32(input)?;
        let (input, size_dt_struct) = be_u32(input)?;
        Ok((
            input,
            Header {
                magic,
                totalsize,
                off_dt_struct,
                off_dt_strings,
                version,
                last_comp_version,
                size_dt_strings,
                size_dt_struct,
            },
        ))
    }
}

fn malformed(what: &str, e: nom::Err<nom::error::Error<&[u8]>>) -> AttachError {
    match e {
        nom::Err::Incomplete(_) => AttachError::Invalid(format!("{what}: truncated")),
        nom::Err::Error(e) | nom::Err::Failure(e) if e.code == ErrorKind::Eof => {
            AttachError::Invalid(format!("{what}: truncated"))
        }
        nom::Err::Error(e) | nom::Err::Failure(e) => {
            AttachError::Invalid(format!("{what}: {:?}", e.code))
        }
    }
}

fn section<'a>(blob: &'a [u8], offset: u32, size: u32, what: &str) -> Result<&'a [u8], AttachError> {
    let start = offset as usize;
    let end = start.saturating_add(size as usize);
    blob.get(start..end).ok_or_else(|| {
        AttachError::Invalid(format!(
            "{what} block {start:#x}..{end:#x} lies outside the {}-byte blob",
            blob.len()
        ))
    })
}

/// Structure block walker. Keeps the whole block around to compute 4-byte alignment.
struct StructureBlock<'a> {
    block: &'a [u8],
    strings: &'a [u8],
}

impl<'a> StructureBlock<'a> {
    fn token(input: &'a [u8]) -> IResult<&'a [u8], u32> {
        let (input, _) = many0_count(tag(&FDT_NOP.to_be_bytes()[..]))(input)?;
        be_u32(input)
    }

    fn align(&self, input: &'a [u8]) -> IResult<&'a [u8], &'a [u8]> {
        let used = self.block.len() - input.len();
        take(((used + 3) & !3) - used)(input)
    }

    fn string(&self, offset: u32) -> Result<String, AttachError> {
        let tail = self.strings.get(offset as usize..).ok_or_else(|| {
            AttachError::Invalid(format!("string offset {offset:#x} outside strings block"))
        })?;
        let (_, raw) = take_while::<_, _, nom::error::Error<&[u8]>>(|b| b != 0)(tail)
            .map_err(|e| malformed("property name", e))?;
        if raw.len() == tail.len() {
            return Err(AttachError::Invalid(format!(
                "unterminated property name at {offset:#x}"
            )));
        }
        String::from_utf8(raw.to_vec())
            .map_err(|e| AttachError::Invalid(format!("property name is not UTF-8: {e}")))
    }

    fn node_name(&self, input: &'a [u8]) -> Result<(&'a [u8], String), AttachError> {
        let (input, raw) = take_while::<_, _, nom::error::Error<&[u8]>>(|b| b != 0)(input)
            .map_err(|e| malformed("node name", e))?;
        let (input, _) = tag::<_, _, nom::error::Error<&[u8]>>(&[0u8][..])(input)
            .map_err(|e| malformed("node name", e))?;
        let (input, _) = self.align(input).map_err(|e| malformed("node name", e))?;
        let name = String::from_utf8(raw.to_vec())
            .map_err(|e| AttachError::Invalid(format!("node name is not UTF-8: {e}")))?;
        Ok((input, name))
    }

    fn property(&self, input: &'a [u8]) -> Result<(&'a [u8], Property), AttachError> {
        let (input, len) = be_u32(input).map_err(|e| malformed("property length", e))?;
        let (input, name_off) = be_u32(input).map_err(|e| malformed("property name offset", e))?;
        let (input, data) = take::<_, _, nom::error::Error<&[u8]>>(len)(input)
            .map_err(|e| malformed("property value", e))?;
        let (input, _) = self.align(input).map_err(|e| malformed("property value", e))?;
        Ok((
            input,
            Property {
                name: self.string(name_off)?,
                value: data.to_vec(),
            },
        ))
    }

    /// Parse a node whose `FDT_BEGIN_NODE` token was already consumed.
    fn node(&self, input: &'a [u8], depth: usize) -> Result<(&'a [u8], DeviceNode), AttachError> {
        if depth > MAX_DEPTH {
            return Err(AttachError::Invalid(format!(
                "nesting deeper than {MAX_DEPTH} levels"
            )));
        }
        let (mut input, name) = self.node_name(input)?;
        let mut node = DeviceNode::new(name);
        loop {
            let (rest, token) = Self::token(input).map_err(|e| malformed("structure token", e))?;
            input = match token {
                FDT_PROP => {
                    let (rest, property) = self.property(rest)?;
                    node.properties.push(property);
                    rest
                }
                FDT_BEGIN_NODE => {
                    let (rest, child) = self.node(rest, depth + 1)?;
                    node.children.push(child);
                    rest
                }
                FDT_END_NODE => return Ok((rest, node)),
                other => {
                    return Err(AttachError::Invalid(format!(
                        "unexpected token {other:#x} inside node {:?}",
                        node.name
                    )));
                }
            };
        }
    }
}

/// Parse a flattened device-tree blob into an owned tree.
///
/// # Returns: `Result<DeviceNode, AttachError>`
/// * `Ok(DeviceNode)` - The root node
/// * `Err(AttachError::Invalid)` - Bad magic, unsupported version, truncated or malformed
///   structure, or a tree with no content at all
pub fn unflatten(blob: &[u8]) -> Result<DeviceNode, AttachError> {
    let (_, header) = Header::parse(blob).map_err(|e| malformed("header", e))?;
    if header.magic != FDT_MAGIC {
        return Err(AttachError::Invalid(format!(
            "bad magic {:#010x}",
            header.magic
        )));
    }
    if header.last_comp_version > 17 || header.version < 16 {
        return Err(AttachError::Invalid(format!(
            "unsupported version {} (compatible with {})",
            header.version, header.last_comp_version
        )));
    }
    if header.totalsize as usize > blob.len() {
        return Err(AttachError::Invalid(format!(
            "header claims {} bytes but only {} were supplied",
            header.totalsize,
            blob.len()
        )));
    }
    let blob = &blob[..header.totalsize as usize];
    let struct_size = if header.version >= 17 {
        header.size_dt_struct
    } else {
        header.totalsize.saturating_sub(header.off_dt_struct)
    };
    let structure = StructureBlock {
        block: section(blob, header.off_dt_struct, struct_size, "structure")?,
        strings: section(blob, header.off_dt_strings, header.size_dt_strings, "strings")?,
    };

    let (input, token) =
        StructureBlock::token(structure.block).map_err(|e| malformed("structure token", e))?;
    if token != FDT_BEGIN_NODE {
        return Err(AttachError::Invalid(format!(
            "structure starts with token {token:#x}"
        )));
    }
    let (input, root) = structure.node(input, 0)?;
    let (_, token) = StructureBlock::token(input).map_err(|e| malformed("end token", e))?;
    if token != FDT_END {
        return Err(AttachError::Invalid(format!(
            "expected end of structure, found token {token:#x}"
        )));
    }
    if root.is_empty() {
        return Err(AttachError::Invalid("tree has no nodes or properties".into()));
    }
    Ok(root)
}

struct Flattener {
    structure: Vec<u8>,
    strings: Vec<u8>,
    offsets: HashMap<String, u32>,
}

impl Flattener {
    fn push_u32(&mut self, value: u32) {
        self.structure.extend_from_slice(&value.to_be_bytes());
    }

    fn pad(&mut self) {
        while self.structure.len() % 4 != 0 {
            self.structure.push(0);
        }
    }

    fn string_offset(&mut self, name: &str) -> u32 {
        if let Some(offset) = self.offsets.get(name) {
            return *offset;
        }
        let offset = self.strings.len() as u32;
        self.strings.extend_from_slice(name.as_bytes());
        self.strings.push(0);
        self.offsets.insert(name.to_string(), offset);
        offset
    }

    fn node(&mut self, node: &DeviceNode) {
        self.push_u32(FDT_BEGIN_NODE);
        self.structure.extend_from_slice(node.name.as_bytes());
        self.structure.push(0);
        self.pad();
        for property in &node.properties {
            let name_off = self.string_offset(&property.name);
            self.push_u32(FDT_PROP);
            self.push_u32(property.value.len() as u32);
            self.push_u32(name_off);
            self.structure.extend_from_slice(&property.value);
            self.pad();
        }
        for child in &node.children {
            self.node(child);
        }
        self.push_u32(FDT_END_NODE);
    }
}

/// Serialise a tree as a version-17 flattened blob with an empty reservation map.
pub fn flatten(root: &DeviceNode) -> Vec<u8> {
    let mut flattener = Flattener {
        structure: Vec::new(),
        strings: Vec::new(),
        offsets: HashMap::new(),
    };
    flattener.node(root);
    flattener.push_u32(FDT_END);

    let off_mem_rsvmap = HEADER_LEN as u32;
    let off_dt_struct = off_mem_rsvmap + 16;
    let off_dt_strings = off_dt_struct + flattener.structure.len() as u32;
    let totalsize = off_dt_strings + flattener.strings.len() as u32;

    let mut blob = Vec::with_capacity(totalsize as usize);
    for word in [
        FDT_MAGIC,
        totalsize,
        off_dt_struct,
        off_dt_strings,
        off_mem_rsvmap,
        17,
        16,
        0,
        flattener.strings.len() as u32,
        flattener.structure.len() as u32,
    ] {
        blob.extend_from_slice(&word.to_be_bytes());
    }
    blob.extend_from_slice(&[0u8; 16]);
    blob.extend_from_slice(&flattener.structure);
    blob.extend_from_slice(&flattener.strings);
    blob
}

#[cfg(test)]
mod tests {
    use super::*;
    use googletest::prelude::*;
    use rstest::*;

    fn overlay() -> DeviceNode {
        DeviceNode::new("").with_child(
            DeviceNode::new("fragment@0")
                .with_str("target-path", "/amba")
                .with_child(
                    DeviceNode::new("__overlay__").with_child(
                        DeviceNode::new("sw@41200000")
                            .with_str("compatible", "xlnx,my-axi-sw-1.0")
                            .with_u32s("reg", &[0x4120_0000, 0x1_0000])
                            .with_property("dma-coherent", Vec::new()),
                    ),
                ),
        )
    }

    #[gtest]
    fn flattened_tree_parses_back() {
        let tree = overlay();
        let blob = flatten(&tree);
        let magic = FDT_MAGIC.to_be_bytes();
        expect_that!(&blob[..4], eq(&magic[..]));
        assert_that!(unflatten(&blob), ok(eq(&tree)));
    }

    #[gtest]
    fn nop_tokens_are_skipped() {
        let mut blob = flatten(&DeviceNode::new("").with_str("model", "zynq"));
        // Replace the trailing FDT_END with NOP + END and fix up sizes.
        let header_struct_size = u32::from_be_bytes([blob[36], blob[37], blob[38], blob[39]]);
        let end_at = 56 + header_struct_size as usize - 4;
        blob.splice(end_at..end_at, FDT_NOP.to_be_bytes());
        let new_struct = header_struct_size + 4;
        let strings_off = u32::from_be_bytes([blob[12], blob[13], blob[14], blob[15]]) + 4;
        let total = u32::from_be_bytes([blob[4], blob[5], blob[6], blob[7]]) + 4;
        blob[36..40].copy_from_slice(&new_struct.to_be_bytes());
        blob[12..16].copy_from_slice(&strings_off.to_be_bytes());
        blob[4..8].copy_from_slice(&total.to_be_bytes());
        let root = unflatten(&blob).expect("parse failed");
        expect_that!(root.prop_str("model"), some(eq("zynq")));
    }

    #[gtest]
    #[rstest]
    #[case::too_short(vec![0xd0, 0x0d], "header: truncated")]
    #[case::bad_magic(vec![0u8; 64], "bad magic")]
    fn rejects_garbage(#[case] blob: Vec<u8>, #[case] message: &str) {
        assert_that!(
            unflatten(&blob),
            err(displays_as(contains_substring(message)))
        );
    }

    #[gtest]
    fn rejects_truncated_blob() {
        let blob = flatten(&overlay());
        assert_that!(
            unflatten(&blob[..blob.len() - 8]),
            err(displays_as(contains_substring("only")))
        );
    }

    #[gtest]
    fn rejects_empty_tree() {
        let blob = flatten(&DeviceNode::new(""));
        assert_that!(
            unflatten(&blob),
            err(displays_as(contains_substring("tree has no nodes or properties")))
        );
    }
}
