// src/inspector.rs

//! Tools for inspecting the header of an Evocode message.
//! Useful for debugging schema evolution and storage synchronization.

use std::collections::HashSet;
use std::fmt;

use serde::Serialize;

use crate::api::Evocode;
use crate::error::Result;
use crate::schema::{Contents, Schema};

/// A structural report of one message.
#[derive(Debug, Serialize)]
pub struct HeaderReport {
    /// Total size of the message.
    pub message_size: usize,
    /// Format tag name.
    pub tag: String,
    /// Block referenced by the header, if any.
    pub block: Option<u32>,
    /// Encoded length of the header.
    pub header_size: usize,
    /// Bytes following the header.
    pub body_size: usize,
    /// The schema tree of the body.
    pub schema: SchemaInfo,
}

/// One node of a schema tree.
#[derive(Debug, Serialize)]
pub struct SchemaInfo {
    /// Rendered schema, e.g. `Record#3?` or `Array<Int>`.
    pub label: String,
    /// Member ID when this node is a record or union member.
    pub member_id: Option<u32>,
    /// True when this node closes a cycle and is not expanded again.
    pub recursive: bool,
    /// Inner schemas and members.
    pub children: Vec<SchemaInfo>,
}

/// The Evocode inspector tool.
#[derive(Debug)]
pub struct EvocodeInspector;

impl EvocodeInspector {
    /// Decodes the header of `bytes` and describes it.
    ///
    /// Unknown blocks are fetched from schema storage like a normal read would.
    pub fn inspect(codec: &Evocode, bytes: &[u8]) -> Result<HeaderReport> {
        let header = codec.read_header(bytes)?;
        let mut path = HashSet::new();
        Ok(HeaderReport {
            message_size: bytes.len(),
            tag: format!("{:?}", header.tag),
            block: header.block.map(|b| b.0),
            header_size: header.len,
            body_size: bytes.len().saturating_sub(header.len),
            schema: Self::inspect_schema(&header.schema, None, &mut path),
        })
    }

    fn inspect_schema(
        schema: &Schema,
        member_id: Option<u32>,
        path: &mut HashSet<*const Contents>,
    ) -> SchemaInfo {
        let mut info = SchemaInfo {
            label: schema.to_string(),
            member_id,
            recursive: false,
            children: Vec::new(),
        };

        for inner in schema.inner() {
            info.children.push(Self::inspect_schema(inner, None, path));
        }

        if let Some(contents) = schema.contents() {
            let key = std::sync::Arc::as_ptr(contents);
            if !path.insert(key) {
                info.recursive = true;
                return info;
            }
            for member in contents.members() {
                info.children
                    .push(Self::inspect_schema(&member.schema, Some(member.id), path));
            }
            path.remove(&key);
        }
        info
    }
}

impl fmt::Display for HeaderReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== EVOCODE INSPECTOR REPORT ===")?;
        writeln!(f, "Tag:            {}", self.tag)?;
        match self.block {
            Some(block) => writeln!(f, "Block:          {block:08x}")?,
            None => writeln!(f, "Block:          -")?,
        }
        writeln!(f, "Header Size:    {}b", self.header_size)?;
        writeln!(f, "Body Size:      {}b", self.body_size)?;
        writeln!(f, "\n[SCHEMA]")?;
        self.schema.fmt_recursive(f, "", true)
    }
}

impl SchemaInfo {
    fn fmt_recursive(&self, f: &mut fmt::Formatter<'_>, prefix: &str, is_last: bool) -> fmt::Result {
        let connector = if is_last { "└── " } else { "├── " };
        let child_prefix = if is_last { "    " } else { "│   " };
        let id = self.member_id.map(|id| format!("@{id} ")).unwrap_or_default();
        let recursive = if self.recursive { " (recursive)" } else { "" };

        writeln!(f, "{prefix}{connector}{id}{}{recursive}", self.label)?;

        for (i, child) in self.children.iter().enumerate() {
            let is_last_child = i == self.children.len() - 1;
            child.fmt_recursive(f, &format!("{prefix}{child_prefix}"), is_last_child)?;
        }
        Ok(())
    }
}
