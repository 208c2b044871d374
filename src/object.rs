//! PDF object values
//!
//! The tagged value sum, interned names, byte strings, object identifiers
//! and the stream data-source variants. Handles (direct or indirect views
//! onto values) live in [`crate::handle`].

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::sync::{Arc, LazyLock};

use indexmap::IndexMap;

use crate::handle::Handle;
use crate::pipeline::Pipeline;

// ============================================================================
// Interned Name Implementation
// ============================================================================

/// Interned PDF Name with shared storage
///
/// PDF names repeat constantly (Type, Length, Pages, ...). Storage is
/// `Arc<str>` for zero-copy cloning; common names are pre-interned so
/// equality is usually a pointer comparison. The leading `/` is not stored;
/// `Display` puts it back.
#[derive(Debug, Clone, Eq)]
pub struct Name(Arc<str>);

impl Name {
    /// Create a new name; a leading `/` is accepted and normalized away
    pub fn new(s: &str) -> Self {
        let s = s.strip_prefix('/').unwrap_or(s);
        if let Some(interned) = Self::get_interned(s) {
            return interned;
        }
        Self(Arc::from(s))
    }

    /// The name without its leading slash
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check if this is a pre-interned common name (pointer comparison)
    pub fn is_interned(&self) -> bool {
        COMMON_NAMES.values().any(|arc| Arc::ptr_eq(&self.0, arc))
    }

    fn get_interned(s: &str) -> Option<Self> {
        COMMON_NAMES.get(s).map(|arc| Self(Arc::clone(arc)))
    }
}

impl PartialEq for Name {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || self.0.as_ref() == other.0.as_ref()
    }
}

impl std::hash::Hash for Name {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.as_ref().hash(state);
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.0)
    }
}

impl AsRef<str> for Name {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Name {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Name {
    fn from(s: String) -> Self {
        Self::new(&s)
    }
}

/// Common PDF names pre-interned for fast comparison
static COMMON_NAMES: LazyLock<HashMap<&'static str, Arc<str>>> = LazyLock::new(|| {
    [
        // Document structure
        "Type", "Subtype", "Length", "Filter", "DecodeParms", "Parent", "Kids", "Count",
        "Catalog", "Pages", "Page", "Resources", "Contents", "MediaBox",
        // Trailer and xref
        "Root", "Info", "Size", "Prev", "Index", "W", "XRef", "ID", "Encrypt", "XRefStm",
        // Object streams
        "ObjStm", "N", "First",
        // Filters
        "FlateDecode", "Predictor", "Columns", "Colors", "BitsPerComponent",
        // Encryption
        "V", "R", "O", "U", "P", "StmF", "StrF", "CF", "CFM", "EncryptMetadata", "Identity",
        "Standard", "AESV2", "V2",
        // Catalog hooks
        "Extensions", "ADBE", "ExtensionLevel", "Perms", "AcroForm", "SigFlags", "Version",
    ]
    .into_iter()
    .map(|name| (name, Arc::from(name)))
    .collect()
});

// ============================================================================
// Strings and identifiers
// ============================================================================

/// A PDF string: raw bytes, not necessarily UTF-8
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PdfString(Vec<u8>);

impl PdfString {
    pub fn new(data: Vec<u8>) -> Self {
        Self(data)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.0).ok()
    }
}

impl From<&str> for PdfString {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

/// Object identifier: (object number, generation number)
///
/// `(0, 0)` names the null object in every document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjGen {
    /// Object number
    pub obj: u32,
    /// Generation number
    pub generation: u16,
}

impl ObjGen {
    pub fn new(obj: u32, generation: u16) -> Self {
        Self { obj, generation }
    }

    /// Create from object number with generation 0
    pub fn from_obj(obj: u32) -> Self {
        Self { obj, generation: 0 }
    }

    /// The identifier of the null object
    pub fn null() -> Self {
        Self { obj: 0, generation: 0 }
    }

    pub fn is_null(&self) -> bool {
        self.obj == 0
    }
}

impl fmt::Display for ObjGen {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.obj, self.generation)
    }
}

// ============================================================================
// Containers
// ============================================================================

/// Dictionary: unique names mapped to handles, insertion order preserved
pub type Dict = IndexMap<Name, Handle>;

/// Array of handles
pub type Array = Vec<Handle>;

// ============================================================================
// Stream data sources
// ============================================================================

/// Supplies raw stream bytes on demand
///
/// Implementations write the stream's raw data into `pipeline` and finish
/// it, returning `false` (after a warning, unless suppressed) when the data
/// cannot be produced.
pub trait StreamDataProvider {
    fn provide_data(
        &self,
        og: ObjGen,
        pipeline: &mut dyn Pipeline,
        suppress_warnings: bool,
        will_retry: bool,
    ) -> bool;
}

/// Where a stream's raw bytes live
#[derive(Clone)]
pub enum StreamData {
    /// No data yet
    Empty,
    /// Owned buffer, shareable across documents
    Buffer(Rc<[u8]>),
    /// User-supplied provider callback
    Provider(Rc<dyn StreamDataProvider>),
    /// Still in the owning document's input source
    InFile {
        /// Offset of the first raw data byte
        offset: u64,
        /// Raw (encoded) length in bytes
        length: usize,
    },
}

impl StreamData {
    pub fn is_buffer(&self) -> bool {
        matches!(self, StreamData::Buffer(_))
    }

    pub fn is_provider(&self) -> bool {
        matches!(self, StreamData::Provider(_))
    }

    pub fn is_in_file(&self) -> bool {
        matches!(self, StreamData::InFile { .. })
    }
}

impl fmt::Debug for StreamData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamData::Empty => write!(f, "Empty"),
            StreamData::Buffer(b) => write!(f, "Buffer({} bytes)", b.len()),
            StreamData::Provider(_) => write!(f, "Provider"),
            StreamData::InFile { offset, length } => {
                write!(f, "InFile {{ offset: {offset}, length: {length} }}")
            }
        }
    }
}

/// A stream: its dictionary plus a data source
///
/// The dictionary is held as a handle so that `stream_dict()` views share
/// mutations with the stream itself.
#[derive(Debug, Clone)]
pub struct StreamValue {
    pub dict: Handle,
    pub data: StreamData,
}

// ============================================================================
// The value sum
// ============================================================================

/// Type tag of a [`Value`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCode {
    Null,
    Bool,
    Integer,
    Real,
    Name,
    String,
    Array,
    Dictionary,
    Stream,
    /// Allocated identity without a value yet
    Reserved,
    /// Known by the xref but not yet parsed
    Unresolved,
}

impl TypeCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool => "boolean",
            Self::Integer => "integer",
            Self::Real => "real",
            Self::Name => "name",
            Self::String => "string",
            Self::Array => "array",
            Self::Dictionary => "dictionary",
            Self::Stream => "stream",
            Self::Reserved => "reserved",
            Self::Unresolved => "unresolved",
        }
    }
}

/// A PDF object value
///
/// Reals keep their decimal text verbatim so round-tripping does not invent
/// digits.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Integer(i64),
    Real(String),
    Name(Name),
    String(PdfString),
    Array(Array),
    Dictionary(Dict),
    Stream(StreamValue),
    Reserved,
    Unresolved,
}

impl Value {
    pub fn type_code(&self) -> TypeCode {
        match self {
            Value::Null => TypeCode::Null,
            Value::Bool(_) => TypeCode::Bool,
            Value::Integer(_) => TypeCode::Integer,
            Value::Real(_) => TypeCode::Real,
            Value::Name(_) => TypeCode::Name,
            Value::String(_) => TypeCode::String,
            Value::Array(_) => TypeCode::Array,
            Value::Dictionary(_) => TypeCode::Dictionary,
            Value::Stream(_) => TypeCode::Stream,
            Value::Reserved => TypeCode::Reserved,
            Value::Unresolved => TypeCode::Unresolved,
        }
    }

    /// Scalar means: not a container, not a stream, not a placeholder
    pub fn is_scalar(&self) -> bool {
        matches!(
            self.type_code(),
            TypeCode::Null
                | TypeCode::Bool
                | TypeCode::Integer
                | TypeCode::Real
                | TypeCode::Name
                | TypeCode::String
        )
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric view: integers and reals both convert
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Real(r) => r.parse().ok(),
            _ => None,
        }
    }

    pub fn as_name(&self) -> Option<&Name> {
        match self {
            Value::Name(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_string(&self) -> Option<&PdfString> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Null
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_interning() {
        let n1 = Name::new("Type");
        let n2 = Name::new("/Type");
        assert!(n1.is_interned());
        assert!(n2.is_interned());
        assert_eq!(n1, n2);
        assert_eq!(n1.as_str(), "Type");
    }

    #[test]
    fn test_name_non_interned() {
        let n1 = Name::new("UncommonName12345");
        let n2 = Name::new("UncommonName12345");
        assert!(!n1.is_interned());
        assert_eq!(n1, n2);
    }

    #[test]
    fn test_name_display() {
        assert_eq!(format!("{}", Name::new("Page")), "/Page");
        assert_eq!(format!("{}", Name::new("/Page")), "/Page");
    }

    #[test]
    fn test_name_hash() {
        use std::collections::HashSet;
        let mut set = HashSet::new();
        set.insert(Name::new("A"));
        set.insert(Name::new("/A"));
        set.insert(Name::new("B"));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_pdf_string() {
        let s = PdfString::new(b"Hello".to_vec());
        assert_eq!(s.as_bytes(), b"Hello");
        assert_eq!(s.as_str(), Some("Hello"));
        assert_eq!(PdfString::new(vec![0xFF, 0xFE]).as_str(), None);
    }

    #[test]
    fn test_obj_gen() {
        let og = ObjGen::new(10, 0);
        assert_eq!(og.to_string(), "10 0");
        assert!(!og.is_null());
        assert!(ObjGen::null().is_null());
        assert_eq!(ObjGen::from_obj(7), ObjGen::new(7, 0));
    }

    #[test]
    fn test_value_type_codes() {
        assert_eq!(Value::Null.type_code(), TypeCode::Null);
        assert_eq!(Value::Integer(3).type_code(), TypeCode::Integer);
        assert_eq!(Value::Real("3.14".into()).type_code(), TypeCode::Real);
        assert_eq!(Value::Reserved.type_code(), TypeCode::Reserved);
        assert_eq!(Value::Unresolved.type_code(), TypeCode::Unresolved);
    }

    #[test]
    fn test_value_scalars() {
        assert!(Value::Null.is_scalar());
        assert!(Value::Bool(true).is_scalar());
        assert!(!Value::Array(Vec::new()).is_scalar());
        assert!(!Value::Reserved.is_scalar());
    }

    #[test]
    fn test_value_as_number() {
        assert_eq!(Value::Integer(42).as_number(), Some(42.0));
        assert_eq!(Value::Real("2.5".into()).as_number(), Some(2.5));
        assert_eq!(Value::Null.as_number(), None);
    }

    #[test]
    fn test_dict_preserves_insertion_order() {
        let mut d = Dict::new();
        d.insert(Name::new("Zebra"), Handle::new(Value::Integer(1)));
        d.insert(Name::new("Apple"), Handle::new(Value::Integer(2)));
        d.insert(Name::new("Mango"), Handle::new(Value::Integer(3)));
        let keys: Vec<&str> = d.keys().map(|k| k.as_str()).collect();
        assert_eq!(keys, vec!["Zebra", "Apple", "Mango"]);
    }
}
