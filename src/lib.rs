//! # Evocode
//!
//! A compact binary serializer for Rust with forward- and backward-compatible schema
//! evolution. Data written by one version of a program can be read by any other version:
//! members may be added, removed, reordered or retyped, and the reader converts whatever it
//! finds into the shape it expects.
//!
//! ## Overview
//!
//! Evocode separates *what* a value looks like from the value itself. Every serializable type
//! has a [`Schema`]: a small, possibly cyclic description built from a closed set of
//! [`SchemaKind`]s. Records and unions carry their member lists in shared *contents* nodes
//! that are persisted, once, to an append-only [schema log](storage). Messages then only
//! reference a contents ID, so their headers stay a few bytes long.
//!
//! ### Key Features
//!
//! *   **Schema Evolution:** Members are identified by stable numeric IDs, never by name or
//!     position. Unknown members are skipped, missing ones take their default value.
//! *   **Native Conversions:** Any native kind converts into any other through a bridge value
//!     (`i32` to `String`, `String` to `f64`, `Decimal` to `u8`, ...).
//! *   **Compact Wire Format:** Varints for counts and discriminators, one-byte headers for
//!     bare integers, no per-member tags.
//! *   **Cached Readers:** The conversion engine builds one reader per `(source schema,
//!     target type)` and shares it between threads.
//! *   **Shared Schema Storage:** Several processes can append to one log concurrently;
//!     appends are compare-and-swap and retried on conflict.
//!
//! ## Architecture
//!
//! ### Message Layout
//!
//! ```text
//! [FormatTag] [BlockId?] [Schema?] [Body]
//! ```
//!
//! See [`format`] for the tag values. The body is the value written member by member in ID
//! order, with no framing of its own.
//!
//! ### Schema Log
//!
//! ```text
//! [Block 1] [Block 2] ... [Block N]
//! Block := [u16 0xad5d] [u8 version] [u32 BlockId] [varint count] ([varint ContentsId] [shape])*
//! ```
//!
//! The log is loaded when the façade is built. Shapes not found in it are appended as a new
//! block; a message that names a block this process has not seen yet triggers one reload.
//!
//! ## Core Concepts
//!
//! ### `Evolve`
//!
//! The [`Evolve`] trait maps a Rust type onto schemas and readers. It is implemented for
//! natives, `Option`, `Box`, `Arc`, collections and tuples. `#[derive(Evolve)]` implements it
//! for structs (records) and enums (unions or C-like integer enums).
//!
//! ### Engine
//!
//! The [`engine`] synthesizes and memoizes the readers that convert data of one schema into
//! a Rust type, including recursive types.
//!
//! ## Usage Patterns
//!
//! ```rust
//! use evocode::{Evocode, Evolve};
//!
//! #[derive(Debug, Default, PartialEq, Evolve)]
//! struct PointV1 {
//!     #[evolve(id = 1)]
//!     x: i32,
//!     #[evolve(id = 2)]
//!     y: i32,
//! }
//!
//! #[derive(Debug, Default, PartialEq, Evolve)]
//! struct PointV2 {
//!     #[evolve(id = 1)]
//!     x: i64,
//!     #[evolve(id = 3)]
//!     label: String,
//! }
//!
//! let codec = Evocode::builder()
//!     .register::<PointV1>()
//!     .register::<PointV2>()
//!     .build()?;
//!
//! let bytes = codec.serialize(&PointV1 { x: 4, y: 2 })?;
//! let newer: PointV2 = codec.deserialize(&bytes)?;
//! assert_eq!(newer, PointV2 { x: 4, label: String::new() });
//! # Ok::<(), evocode::EvocodeError>(())
//! ```
//!
//! ### Safety and Error Handling
//!
//! * **No Unsafe:** the crate is `#![deny(unsafe_code)]`.
//! * **No Panics:** No `unwrap()` or `panic!()` calls in the library (enforced by clippy lints).
//! * **Comprehensive Errors:** All failures correspond to an [`EvocodeError`] type.
//! * **Robust Storage:** Poisoned locks, torn logs and lost append races are reported or
//!   retried, never ignored.

#![deny(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]
#![warn(missing_docs)]

// Lets derived code name `evocode::` from inside this crate.
extern crate self as evocode;

// --- PUBLIC API MODULES ---
pub mod api;
pub mod codec;
pub mod decimal;
pub mod defaults;
pub mod engine;
pub mod error;
pub mod evolve;
pub mod format;
pub mod inspector;
pub mod registry;
pub mod schema;
pub mod schema_by_type;
pub mod skipper;
pub mod storage;

// --- MACRO SUPPORT MODULES ---

/// Runtime utilities used by the derived code.
#[doc(hidden)]
pub mod rt;

// --- RE-EXPORTS ---

pub use api::{Evocode, EvocodeBuilder, EvocodeOptions};
pub use decimal::{Decimal, FractionalNumber};
pub use error::{EvocodeError, Result};
pub use evolve::Evolve;
pub use inspector::EvocodeInspector;
pub use schema::{Schema, SchemaKind};
pub use storage::{FileStorage, MemoryStorage, SchemaStorage};

// Re-export the derive macro so it is accessible as `evocode::Evolve`
pub use evocode_derive::Evolve;
