//! Object handles
//!
//! A [`Handle`] is a cheap, copyable view onto a PDF value. Direct handles
//! own their value inline (shared via `Rc` so clones alias); indirect
//! handles name an `(id, gen)` identifier in a specific document and go
//! through the document's store on every access. That lookup discipline is
//! what makes `replace`/`swap` visible through every outstanding handle and
//! lets dangling references resolve to null instead of dangling pointers.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::document::{DocState, Document};
use crate::error::{Error, Result};
use crate::object::{
    Array, Dict, Name, ObjGen, PdfString, StreamData, StreamDataProvider, StreamValue, TypeCode,
    Value,
};
use crate::pipeline::{Pipeline, PlBuffer};

/// Shared storage for one value
pub(crate) type Slot = Rc<RefCell<Value>>;

#[derive(Clone)]
enum Inner {
    Direct(Slot),
    Indirect { doc: Weak<DocState>, og: ObjGen },
}

/// A handle to a PDF object, direct or indirect
#[derive(Clone)]
pub struct Handle {
    inner: Inner,
}

impl Handle {
    // ------------------------------------------------------------------
    // Construction
    // ------------------------------------------------------------------

    /// Create a direct handle owning `value`
    pub fn new(value: Value) -> Self {
        Self {
            inner: Inner::Direct(Rc::new(RefCell::new(value))),
        }
    }

    pub fn new_null() -> Self {
        Self::new(Value::Null)
    }

    pub fn new_bool(b: bool) -> Self {
        Self::new(Value::Bool(b))
    }

    pub fn new_integer(i: i64) -> Self {
        Self::new(Value::Integer(i))
    }

    /// A real number from its decimal text
    pub fn new_real(text: &str) -> Self {
        Self::new(Value::Real(text.to_string()))
    }

    pub fn new_name(name: &str) -> Self {
        Self::new(Value::Name(Name::new(name)))
    }

    pub fn new_string(data: impl Into<Vec<u8>>) -> Self {
        Self::new(Value::String(PdfString::new(data.into())))
    }

    pub fn new_array() -> Self {
        Self::new(Value::Array(Array::new()))
    }

    pub fn new_dictionary() -> Self {
        Self::new(Value::Dictionary(Dict::new()))
    }

    pub(crate) fn new_indirect(doc: Weak<DocState>, og: ObjGen) -> Self {
        Self {
            inner: Inner::Indirect { doc, og },
        }
    }

    // ------------------------------------------------------------------
    // Resolution
    // ------------------------------------------------------------------

    /// The slot behind this handle; `None` means "behaves as null"
    pub(crate) fn slot(&self) -> Option<Slot> {
        match &self.inner {
            Inner::Direct(slot) => Some(Rc::clone(slot)),
            Inner::Indirect { doc, og } => {
                let state = doc.upgrade()?;
                Document::from_state(state).resolve_slot(*og)
            }
        }
    }

    /// Read the resolved value
    pub(crate) fn with_value<R>(&self, f: impl FnOnce(&Value) -> R) -> R {
        match self.slot() {
            Some(slot) => f(&slot.borrow()),
            None => f(&Value::Null),
        }
    }

    /// Mutate the resolved value; dangling handles are an error
    fn with_value_mut<R>(&self, f: impl FnOnce(&mut Value) -> Result<R>) -> Result<R> {
        match self.slot() {
            Some(slot) => f(&mut slot.borrow_mut()),
            None => Err(Error::logic("attempted to mutate a null object")),
        }
    }

    /// Shallow clone of the resolved value (container skeletons copied,
    /// children still shared)
    pub(crate) fn value_clone(&self) -> Value {
        self.with_value(|v| v.clone())
    }

    // ------------------------------------------------------------------
    // Identity
    // ------------------------------------------------------------------

    pub fn is_indirect(&self) -> bool {
        matches!(self.inner, Inner::Indirect { .. })
    }

    /// The identifier of an indirect handle
    ///
    /// Panics when called on a direct handle.
    pub fn obj_gen(&self) -> ObjGen {
        match &self.inner {
            Inner::Indirect { og, .. } => *og,
            Inner::Direct(_) => panic!("obj_gen called on a direct handle"),
        }
    }

    /// The owning document of an indirect handle
    ///
    /// Panics when called on a direct handle or when the document is gone.
    pub fn document(&self) -> Document {
        match &self.inner {
            Inner::Indirect { doc, .. } => Document::from_state(
                doc.upgrade()
                    .expect("document of this handle has been destroyed"),
            ),
            Inner::Direct(_) => panic!("document called on a direct handle"),
        }
    }

    // ------------------------------------------------------------------
    // Type queries
    // ------------------------------------------------------------------

    /// Type tag of the resolved value
    pub fn type_code(&self) -> TypeCode {
        self.with_value(|v| v.type_code())
    }

    pub fn is_null(&self) -> bool {
        self.type_code() == TypeCode::Null
    }

    pub fn is_bool(&self) -> bool {
        self.type_code() == TypeCode::Bool
    }

    pub fn is_integer(&self) -> bool {
        self.type_code() == TypeCode::Integer
    }

    pub fn is_real(&self) -> bool {
        self.type_code() == TypeCode::Real
    }

    pub fn is_name(&self) -> bool {
        self.type_code() == TypeCode::Name
    }

    pub fn is_string(&self) -> bool {
        self.type_code() == TypeCode::String
    }

    pub fn is_array(&self) -> bool {
        self.type_code() == TypeCode::Array
    }

    pub fn is_dictionary(&self) -> bool {
        self.type_code() == TypeCode::Dictionary
    }

    pub fn is_stream(&self) -> bool {
        self.type_code() == TypeCode::Stream
    }

    pub fn is_reserved(&self) -> bool {
        self.type_code() == TypeCode::Reserved
    }

    pub fn is_scalar(&self) -> bool {
        self.with_value(|v| v.is_scalar())
    }

    /// Reserved or null: an identity not yet filled with a real value
    pub(crate) fn is_reservation(&self) -> bool {
        matches!(self.type_code(), TypeCode::Reserved | TypeCode::Null)
    }

    /// Is this a name equal to `name`?
    pub fn is_name_equal(&self, name: &str) -> bool {
        self.with_value(|v| v.as_name().is_some_and(|n| *n == Name::new(name)))
    }

    /// A dictionary whose `/Type` is `/Page`
    pub fn is_page_object(&self) -> bool {
        self.is_dictionary() && self.get_key("Type").is_name_equal("Page")
    }

    /// A dictionary whose `/Type` is `/Pages` (page tree node)
    pub fn is_pages_object(&self) -> bool {
        self.is_dictionary() && self.get_key("Type").is_name_equal("Pages")
    }

    // ------------------------------------------------------------------
    // Scalar accessors
    // ------------------------------------------------------------------

    pub fn as_bool(&self) -> Option<bool> {
        self.with_value(|v| v.as_bool())
    }

    pub fn as_int(&self) -> Option<i64> {
        self.with_value(|v| v.as_int())
    }

    pub fn as_number(&self) -> Option<f64> {
        self.with_value(|v| v.as_number())
    }

    /// The decimal text of a real
    pub fn as_real(&self) -> Option<String> {
        self.with_value(|v| match v {
            Value::Real(r) => Some(r.clone()),
            _ => None,
        })
    }

    pub fn as_name(&self) -> Option<Name> {
        self.with_value(|v| v.as_name().cloned())
    }

    pub fn as_string(&self) -> Option<PdfString> {
        self.with_value(|v| v.as_string().cloned())
    }

    // ------------------------------------------------------------------
    // Array operations
    // ------------------------------------------------------------------

    /// Number of items; 0 when this is not an array
    pub fn array_len(&self) -> usize {
        self.with_value(|v| match v {
            Value::Array(a) => a.len(),
            _ => 0,
        })
    }

    /// Item `i`, or a null handle when out of range or not an array
    pub fn array_item(&self, i: usize) -> Handle {
        self.with_value(|v| match v {
            Value::Array(a) => a.get(i).cloned().unwrap_or_else(Handle::new_null),
            _ => Handle::new_null(),
        })
    }

    /// All items, cloned out so callers can iterate without holding borrows
    pub fn array_items(&self) -> Vec<Handle> {
        self.with_value(|v| match v {
            Value::Array(a) => a.clone(),
            _ => Vec::new(),
        })
    }

    pub fn append_item(&self, item: Handle) -> Result<()> {
        self.with_value_mut(|v| match v {
            Value::Array(a) => {
                a.push(item);
                Ok(())
            }
            _ => Err(Error::logic("append_item called on non-array object")),
        })
    }

    pub fn set_array_item(&self, i: usize, item: Handle) -> Result<()> {
        self.with_value_mut(|v| match v {
            Value::Array(a) => {
                let slot = a
                    .get_mut(i)
                    .ok_or_else(|| Error::logic("set_array_item index out of range"))?;
                *slot = item;
                Ok(())
            }
            _ => Err(Error::logic("set_array_item called on non-array object")),
        })
    }

    // ------------------------------------------------------------------
    // Dictionary operations
    // ------------------------------------------------------------------

    pub fn has_key(&self, key: &str) -> bool {
        let key = Name::new(key);
        self.with_value(|v| match v {
            Value::Dictionary(d) => d.contains_key(&key),
            _ => false,
        })
    }

    /// Keys in insertion order; empty when this is not a dictionary
    pub fn keys(&self) -> Vec<Name> {
        self.with_value(|v| match v {
            Value::Dictionary(d) => d.keys().cloned().collect(),
            _ => Vec::new(),
        })
    }

    /// The value for `key`, or a null handle when absent / not a dictionary
    pub fn get_key(&self, key: &str) -> Handle {
        let key = Name::new(key);
        self.with_value(|v| match v {
            Value::Dictionary(d) => d.get(&key).cloned().unwrap_or_else(Handle::new_null),
            _ => Handle::new_null(),
        })
    }

    pub fn replace_key(&self, key: &str, value: Handle) -> Result<()> {
        let key = Name::new(key);
        self.with_value_mut(|v| match v {
            Value::Dictionary(d) => {
                d.insert(key, value);
                Ok(())
            }
            _ => Err(Error::logic("replace_key called on non-dictionary object")),
        })
    }

    pub fn remove_key(&self, key: &str) -> Result<()> {
        let key = Name::new(key);
        self.with_value_mut(|v| match v {
            Value::Dictionary(d) => {
                d.shift_remove(&key);
                Ok(())
            }
            _ => Err(Error::logic("remove_key called on non-dictionary object")),
        })
    }

    // ------------------------------------------------------------------
    // Stream operations
    // ------------------------------------------------------------------

    /// The stream's dictionary; mutations through the returned handle are
    /// shared with the stream
    pub fn stream_dict(&self) -> Result<Handle> {
        self.with_value(|v| match v {
            Value::Stream(s) => Ok(s.dict.clone()),
            _ => Err(Error::logic("stream_dict called on non-stream object")),
        })
    }

    pub(crate) fn stream_data(&self) -> Result<StreamData> {
        self.with_value(|v| match v {
            Value::Stream(s) => Ok(s.data.clone()),
            _ => Err(Error::logic("not a stream object")),
        })
    }

    /// The owned buffer behind this stream, if it has one
    pub fn stream_data_buffer(&self) -> Option<Rc<[u8]>> {
        self.with_value(|v| match v {
            Value::Stream(StreamValue {
                data: StreamData::Buffer(b),
                ..
            }) => Some(Rc::clone(b)),
            _ => None,
        })
    }

    /// Replace the stream's data with an owned buffer
    ///
    /// `/Length` is updated; `/Filter` and `/DecodeParms` are replaced by
    /// the given handles (removed when null).
    pub fn replace_stream_data(
        &self,
        data: impl Into<Vec<u8>>,
        filter: Handle,
        decode_parms: Handle,
    ) -> Result<()> {
        self.replace_stream_data_shared(Rc::from(data.into()), filter, decode_parms)
    }

    /// Like [`replace_stream_data`](Self::replace_stream_data) but sharing
    /// an existing buffer
    pub fn replace_stream_data_shared(
        &self,
        data: Rc<[u8]>,
        filter: Handle,
        decode_parms: Handle,
    ) -> Result<()> {
        let length = data.len();
        self.install_stream_data(StreamData::Buffer(data), filter, decode_parms)?;
        self.stream_dict()?
            .replace_key("Length", Handle::new_integer(length as i64))
    }

    /// Replace the stream's data with a provider callback
    pub fn replace_stream_data_provider(
        &self,
        provider: Rc<dyn StreamDataProvider>,
        filter: Handle,
        decode_parms: Handle,
    ) -> Result<()> {
        self.install_stream_data(StreamData::Provider(provider), filter, decode_parms)
    }

    fn install_stream_data(
        &self,
        data: StreamData,
        filter: Handle,
        decode_parms: Handle,
    ) -> Result<()> {
        self.with_value_mut(|v| match v {
            Value::Stream(s) => {
                s.data = data;
                Ok(())
            }
            _ => Err(Error::logic(
                "replace_stream_data called on non-stream object",
            )),
        })?;
        let dict = self.stream_dict()?;
        if filter.is_null() {
            dict.remove_key("Filter")?;
        } else {
            dict.replace_key("Filter", filter)?;
        }
        if decode_parms.is_null() {
            dict.remove_key("DecodeParms")?;
        } else {
            dict.replace_key("DecodeParms", decode_parms)?;
        }
        Ok(())
    }

    /// Write the stream's data into `pipeline` and finish it
    ///
    /// With `decode` set, registered filters named by `/Filter` are applied;
    /// an unregistered filter downgrades to piping the raw bytes with a
    /// warning. Failures warn (unless suppressed), drain the pipeline
    /// defensively, and yield `false`.
    pub fn pipe_stream_data(
        &self,
        pipeline: &mut dyn Pipeline,
        decode: bool,
        suppress_warnings: bool,
        will_retry: bool,
    ) -> bool {
        let data = match self.stream_data() {
            Ok(d) => d,
            Err(_) => return false,
        };
        let raw_ok = match data {
            StreamData::Empty => {
                let mut out = RawSink::new(pipeline, decode, self);
                out.finish()
            }
            StreamData::Buffer(b) => {
                let mut out = RawSink::new(pipeline, decode, self);
                out.write(&b) && out.finish()
            }
            StreamData::Provider(p) => {
                let og = if self.is_indirect() {
                    self.obj_gen()
                } else {
                    ObjGen::null()
                };
                let mut out = RawSink::new(pipeline, decode, self);
                p.provide_data(og, &mut out, suppress_warnings, will_retry) && out.finished
            }
            StreamData::InFile { offset, length } => {
                if !self.is_indirect() {
                    return false;
                }
                let doc = self.document();
                let dict = match self.stream_dict() {
                    Ok(d) => d,
                    Err(_) => return false,
                };
                let mut out = RawSink::new(pipeline, decode, self);
                doc.pipe_stream_data(
                    self.obj_gen(),
                    offset,
                    length,
                    &dict,
                    &mut out,
                    suppress_warnings,
                    will_retry,
                ) && out.finished
            }
        };
        raw_ok
    }

    /// The raw (undecoded) stream bytes
    pub fn raw_stream_data(&self) -> Result<Vec<u8>> {
        let mut buffer = PlBuffer::new("raw stream data");
        if !self.pipe_stream_data(&mut buffer, false, true, false) {
            return Err(Error::logic("unable to retrieve raw stream data"));
        }
        buffer.get_buffer()
    }

    // ------------------------------------------------------------------
    // Conversion
    // ------------------------------------------------------------------

    /// Deep-copy this (possibly indirect) sub-graph into a purely direct one
    ///
    /// Fails on cycles and on streams, which cannot be direct.
    pub fn make_direct(&self) -> Result<Handle> {
        let mut path = Vec::new();
        self.make_direct_inner(&mut path)
    }

    fn make_direct_inner(&self, path: &mut Vec<*const RefCell<Value>>) -> Result<Handle> {
        let slot = match self.slot() {
            Some(slot) => slot,
            None => return Ok(Handle::new_null()),
        };
        let ptr = Rc::as_ptr(&slot);
        if path.contains(&ptr) {
            return Err(Error::logic(
                "loop detected while converting object to direct object",
            ));
        }
        path.push(ptr);
        let value = slot.borrow().clone();
        let result = match value {
            Value::Stream(_) => Err(Error::logic("cannot make a stream into a direct object")),
            Value::Reserved => Err(Error::logic(
                "cannot make a reserved object into a direct object",
            )),
            Value::Unresolved => Ok(Value::Null),
            Value::Array(items) => {
                let mut out = Array::with_capacity(items.len());
                for item in &items {
                    out.push(item.make_direct_inner(path)?);
                }
                Ok(Value::Array(out))
            }
            Value::Dictionary(d) => {
                let mut out = Dict::with_capacity(d.len());
                for (k, child) in &d {
                    out.insert(k.clone(), child.make_direct_inner(path)?);
                }
                Ok(Value::Dictionary(out))
            }
            other => Ok(other),
        };
        path.pop();
        result.map(Handle::new)
    }
}

/// Adapter between raw stream bytes and the caller's pipeline
///
/// Collects raw bytes, decrypts nothing (that happens upstream), optionally
/// decodes through the owning document's filter registry at finish, then
/// forwards to the caller's pipeline. `finished` records whether the
/// caller's pipeline got its `finish`.
struct RawSink<'a> {
    next: &'a mut dyn Pipeline,
    decode: bool,
    stream: &'a Handle,
    buffered: Vec<u8>,
    finished: bool,
}

impl<'a> RawSink<'a> {
    fn new(next: &'a mut dyn Pipeline, decode: bool, stream: &'a Handle) -> Self {
        Self {
            next,
            decode,
            stream,
            buffered: Vec::new(),
            finished: false,
        }
    }

    fn write(&mut self, data: &[u8]) -> bool {
        Pipeline::write(self, data).is_ok()
    }

    fn finish(&mut self) -> bool {
        Pipeline::finish(self).is_ok()
    }
}

impl Pipeline for RawSink<'_> {
    fn identifier(&self) -> &str {
        "stream data sink"
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        if self.decode {
            self.buffered.extend_from_slice(data);
            Ok(())
        } else {
            self.next.write(data)
        }
    }

    fn finish(&mut self) -> Result<()> {
        if self.decode {
            let raw = std::mem::take(&mut self.buffered);
            let decoded = if self.stream.is_indirect() {
                self.stream.document().apply_stream_filters(self.stream, raw)
            } else {
                raw
            };
            self.next.write(&decoded)?;
        }
        self.finished = true;
        self.next.finish()
    }
}

impl PartialEq for Handle {
    fn eq(&self, other: &Self) -> bool {
        match (&self.inner, &other.inner) {
            (Inner::Direct(a), Inner::Direct(b)) => Rc::ptr_eq(a, b),
            (
                Inner::Indirect { doc: d1, og: og1 },
                Inner::Indirect { doc: d2, og: og2 },
            ) => og1 == og2 && d1.ptr_eq(d2),
            _ => false,
        }
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            Inner::Direct(slot) => match slot.try_borrow() {
                Ok(v) => write!(f, "Handle::Direct({:?})", v.type_code()),
                Err(_) => write!(f, "Handle::Direct(<borrowed>)"),
            },
            Inner::Indirect { og, .. } => write!(f, "Handle::Indirect({og} R)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direct_scalars() {
        assert!(Handle::new_null().is_null());
        assert_eq!(Handle::new_bool(true).as_bool(), Some(true));
        assert_eq!(Handle::new_integer(7).as_int(), Some(7));
        assert_eq!(Handle::new_real("2.50").as_real().as_deref(), Some("2.50"));
        assert!(Handle::new_name("/Catalog").is_name_equal("Catalog"));
        assert_eq!(
            Handle::new_string("hi").as_string().unwrap().as_bytes(),
            b"hi"
        );
    }

    #[test]
    fn test_direct_clone_aliases() {
        let arr = Handle::new_array();
        let alias = arr.clone();
        arr.append_item(Handle::new_integer(1)).unwrap();
        assert_eq!(alias.array_len(), 1);
        assert_eq!(alias.array_item(0).as_int(), Some(1));
    }

    #[test]
    fn test_array_ops() {
        let arr = Handle::new_array();
        arr.append_item(Handle::new_integer(1)).unwrap();
        arr.append_item(Handle::new_integer(2)).unwrap();
        arr.set_array_item(1, Handle::new_integer(9)).unwrap();
        assert_eq!(arr.array_item(1).as_int(), Some(9));
        assert!(arr.array_item(5).is_null());
        assert!(arr.set_array_item(5, Handle::new_null()).is_err());
        assert!(Handle::new_null().append_item(Handle::new_null()).is_err());
    }

    #[test]
    fn test_dict_ops() {
        let dict = Handle::new_dictionary();
        dict.replace_key("/B", Handle::new_integer(1)).unwrap();
        dict.replace_key("/A", Handle::new_integer(2)).unwrap();
        assert!(dict.has_key("B"));
        assert_eq!(dict.get_key("/A").as_int(), Some(2));
        assert!(dict.get_key("/Missing").is_null());
        let keys: Vec<String> = dict.keys().iter().map(|k| k.as_str().to_string()).collect();
        assert_eq!(keys, vec!["B", "A"]);
        dict.remove_key("B").unwrap();
        assert!(!dict.has_key("B"));
    }

    #[test]
    fn test_page_predicates() {
        let page = Handle::new_dictionary();
        page.replace_key("Type", Handle::new_name("Page")).unwrap();
        assert!(page.is_page_object());
        assert!(!page.is_pages_object());

        let pages = Handle::new_dictionary();
        pages.replace_key("Type", Handle::new_name("Pages")).unwrap();
        assert!(pages.is_pages_object());
        assert!(!pages.is_page_object());
    }

    #[test]
    fn test_make_direct_plain() {
        let dict = Handle::new_dictionary();
        let inner = Handle::new_array();
        inner.append_item(Handle::new_integer(4)).unwrap();
        dict.replace_key("K", inner).unwrap();
        let copy = dict.make_direct().unwrap();
        assert_eq!(copy.get_key("K").array_item(0).as_int(), Some(4));
        // the copy no longer aliases the original
        copy.get_key("K").append_item(Handle::new_integer(5)).unwrap();
        assert_eq!(dict.get_key("K").array_len(), 1);
    }

    #[test]
    fn test_make_direct_detects_direct_cycle() {
        let arr = Handle::new_array();
        arr.append_item(arr.clone()).unwrap();
        let err = arr.make_direct().unwrap_err();
        assert!(format!("{err}").contains("loop detected"));
    }

    #[test]
    #[should_panic(expected = "obj_gen called on a direct handle")]
    fn test_obj_gen_panics_on_direct() {
        Handle::new_null().obj_gen();
    }

    #[test]
    fn test_handle_equality() {
        let a = Handle::new_integer(1);
        let b = a.clone();
        let c = Handle::new_integer(1);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
