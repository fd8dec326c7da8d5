//! In-memory dataset descriptions and the metadata documents rendered from them.
//!
//! A [`Dataset`] is what the format handlers build after walking a data file.
//! It can be printed as four documents:
//! - [`print_schema`]: the DAP2 structure listing (`Dataset { ... } name;`)
//! - [`print_attributes`]: the DAP2 attribute listing (`Attributes { ... }`)
//! - [`print_metadata`]: the DAP4 XML description
//! - [`print_chunk_index`]: the DAP4 description annotated with on-disk chunk locations
//!
//! The two XML documents can be read back with [`parse_metadata`]; printing the
//! parsed value again reproduces the input byte for byte.

mod error;
mod model;
mod parse;
mod print;

pub use error::{DapError, Result};
pub use model::{Attribute, Chunk, ChunkLayout, DataType, Dataset, Dimension, Variable};
pub use parse::parse_metadata;
pub use print::{escape_xml, print_attributes, print_chunk_index, print_metadata, print_schema};

/// Namespace of the DAP4 metadata document.
pub const DAP4_NAMESPACE: &str = "http://xml.opendap.org/ns/DAP/4.0#";

/// Namespace of the chunk annotations in the chunk-index document.
pub const DMRPP_NAMESPACE: &str = "http://xml.opendap.org/dap/dmrpp/1.0.0#";
