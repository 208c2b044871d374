//! pdfgraft - an in-memory PDF object graph
//!
//! This library reads PDF files into a graph of first-class object
//! handles, permits mutation, and supports importing arbitrary sub-graphs
//! from one open document into another with all indirect references
//! rewritten to the destination's numbering space.
//!
//! # Modules
//!
//! - [`document`] - the document context: lifecycle, lazy resolution,
//!   warnings, configuration, foreign-object copying
//! - [`object`] / [`handle`] - the tagged value sum and the direct /
//!   indirect handles over it
//! - [`input`] - byte-level input sources (file, memory, offset-rebased,
//!   invalidated sentinel)
//! - [`pipeline`] - chainable byte sinks for stream-data extraction
//! - [`xref`] - cross-reference table reading and reconstruction
//! - [`crypt`] - standard security handler decryption (V 1-4)
//! - [`filter`] - built-in stream filters (FlateDecode with predictors)
//!
//! # Example
//!
//! ```rust,ignore
//! use pdfgraft::Document;
//!
//! let source = Document::new();
//! source.process_file("source.pdf", None)?;
//!
//! let destination = Document::new();
//! destination.empty_pdf();
//!
//! let page = source.get_object_by_id(3, 0);
//! let imported = destination.copy_foreign_object(&page)?;
//! ```

pub mod copy;
pub mod crypt;
pub mod document;
pub mod error;
pub mod filter;
pub mod handle;
pub mod input;
pub mod lexer;
pub mod object;
mod parser;
pub mod pipeline;
mod store;
pub mod xref;

pub use copy::ForeignStreamData;
pub use crypt::{CryptFilterMethod, EncryptionParameters};
pub use document::{Document, StreamFilterFn};
pub use error::{Damage, Error, ErrorCode, Result};
pub use handle::Handle;
pub use input::{
    shared, BufferInputSource, FileInputSource, InputSource, InvalidInputSource,
    OffsetInputSource, SharedInput,
};
pub use object::{
    Array, Dict, Name, ObjGen, PdfString, StreamData, StreamDataProvider, TypeCode, Value,
};
pub use pipeline::{FlateAction, Pipeline, PipelineBox, PlBuffer, PlCount, PlDiscard, PlFlate};
pub use xref::{XrefEntry, XrefEntryType};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
