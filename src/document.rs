//! Document context
//!
//! A [`Document`] owns the object store, the xref view, the input source
//! and the encryption parameters, and carries the warning list and
//! configuration flags. It is the resolver: indirect handles come back to
//! it for every value access, and it parses unresolved objects on demand
//! under the re-entrancy guard.
//!
//! Cloning a `Document` is cheap and shares the underlying state, the way
//! a shared-pointer-held document behaves; handles keep weak references so
//! object graphs never keep a destroyed document alive.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::io::SeekFrom;
use std::path::Path;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::copy::{CopiedStreamDataProvider, ObjCopier};
use crate::crypt::{decrypt_stream_bytes, EncryptionParameters};
use crate::error::{Damage, Error, ErrorCode, Result};
use crate::handle::{Handle, Slot};
use crate::input::{
    shared, BufferInputSource, FileInputSource, InvalidInputSource,
    OffsetInputSource, SharedInput,
};
use crate::object::{ObjGen, StreamData, StreamValue, TypeCode, Value};
use crate::parser::ObjectParser;
use crate::pipeline::{Pipeline, PlBuffer};
use crate::store::ObjectStore;
use crate::xref::{flate_decode_filter, XrefEntry, XrefEntryType, XrefTable};

/// Process-wide document id counter; used to key per-peer copy state,
/// never exposed as a security identifier
static NEXT_UNIQUE_ID: AtomicU64 = AtomicU64::new(0);

/// A registered stream filter: raw bytes + `/DecodeParms` → decoded bytes
pub type StreamFilterFn = Rc<dyn Fn(&[u8], &Handle) -> Result<Vec<u8>>>;

pub(crate) struct DocState {
    pub unique_id: u64,
    pub file: RefCell<SharedInput>,
    pub input_name: RefCell<String>,
    pub pdf_version: RefCell<String>,
    pub encp: RefCell<Rc<EncryptionParameters>>,
    pub store: ObjectStore,
    pub xref: RefCell<XrefTable>,
    pub trailer: RefCell<Option<Handle>>,
    pub warnings: RefCell<Vec<Damage>>,
    pub in_parse: Cell<bool>,
    pub fixed_dangling_refs: Cell<bool>,
    pub suppress_warnings: Cell<bool>,
    pub max_warnings: Cell<usize>,
    pub attempt_recovery: Cell<bool>,
    pub immediate_copy_from: Cell<bool>,
    pub check_mode: Cell<bool>,
    pub password_is_hex_key: Cell<bool>,
    pub provided_password: RefCell<Vec<u8>>,
    pub last_object_description: RefCell<String>,
    pub object_copiers: RefCell<HashMap<u64, ObjCopier>>,
    pub copied_streams: RefCell<Option<Rc<CopiedStreamDataProvider>>>,
    pub stream_filters: RefCell<HashMap<String, StreamFilterFn>>,
}

/// A PDF document: object graph, xref view, input source, configuration
pub struct Document {
    state: Rc<DocState>,
}

impl Clone for Document {
    fn clone(&self) -> Self {
        Self {
            state: Rc::clone(&self.state),
        }
    }
}

impl PartialEq for Document {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.state, &other.state)
    }
}

impl std::fmt::Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Document")
            .field("state", &Rc::as_ptr(&self.state))
            .finish()
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

/// Scoped re-entrancy token for the resolver
///
/// Acquiring it while another acquisition is live means the parser
/// re-entered resolution, which is a bug in this crate, not in the input.
pub(crate) struct ParseGuard<'a> {
    state: &'a DocState,
}

impl<'a> ParseGuard<'a> {
    pub fn acquire(doc: &'a Document) -> Self {
        let state = doc.st();
        if state.in_parse.get() {
            panic!("re-entrant parsing detected; this is a pdfgraft bug");
        }
        state.in_parse.set(true);
        Self { state }
    }
}

impl Drop for ParseGuard<'_> {
    fn drop(&mut self) {
        self.state.in_parse.set(false);
    }
}

impl Document {
    // ------------------------------------------------------------------
    // Construction and lifecycle
    // ------------------------------------------------------------------

    pub fn new() -> Self {
        let name = "no input source";
        let state = Rc::new(DocState {
            unique_id: NEXT_UNIQUE_ID.fetch_add(1, Ordering::Relaxed),
            file: RefCell::new(shared(InvalidInputSource::new(name))),
            input_name: RefCell::new(name.to_string()),
            pdf_version: RefCell::new(String::new()),
            encp: RefCell::new(Rc::new(EncryptionParameters::default())),
            store: ObjectStore::new(),
            xref: RefCell::new(XrefTable::new()),
            trailer: RefCell::new(None),
            warnings: RefCell::new(Vec::new()),
            in_parse: Cell::new(false),
            fixed_dangling_refs: Cell::new(false),
            suppress_warnings: Cell::new(false),
            max_warnings: Cell::new(0),
            attempt_recovery: Cell::new(true),
            immediate_copy_from: Cell::new(false),
            check_mode: Cell::new(false),
            password_is_hex_key: Cell::new(false),
            provided_password: RefCell::new(Vec::new()),
            last_object_description: RefCell::new(String::new()),
            object_copiers: RefCell::new(HashMap::new()),
            copied_streams: RefCell::new(None),
            stream_filters: RefCell::new(HashMap::new()),
        });
        let doc = Self { state };
        doc.register_stream_filter("FlateDecode", Rc::new(flate_decode_filter));
        doc
    }

    pub(crate) fn from_state(state: Rc<DocState>) -> Self {
        Self { state }
    }

    pub(crate) fn st(&self) -> &DocState {
        &self.state
    }

    pub(crate) fn weak(&self) -> Weak<DocState> {
        Rc::downgrade(&self.state)
    }

    /// Process-unique id of this document
    pub fn unique_id(&self) -> u64 {
        self.state.unique_id
    }

    /// Name of the current input source
    pub fn filename(&self) -> String {
        self.state.input_name.borrow().clone()
    }

    pub(crate) fn file(&self) -> SharedInput {
        self.state.file.borrow().clone()
    }

    /// Open and parse a file
    pub fn process_file<P: AsRef<Path>>(&self, path: P, password: Option<&str>) -> Result<()> {
        let source = FileInputSource::new(path)?;
        self.process_input_source(shared(source), password)
    }

    /// Parse an in-memory buffer
    pub fn process_memory(
        &self,
        description: &str,
        data: &[u8],
        password: Option<&str>,
    ) -> Result<()> {
        self.process_input_source(
            shared(BufferInputSource::from_slice(description, data)),
            password,
        )
    }

    /// Install an input source and parse it
    pub fn process_input_source(&self, source: SharedInput, password: Option<&str>) -> Result<()> {
        let name = source.borrow().name();
        *self.state.input_name.borrow_mut() = name;
        *self.state.file.borrow_mut() = source;
        self.parse(password)
    }

    fn parse(&self, password: Option<&str>) -> Result<()> {
        if let Some(pw) = password {
            *self.state.provided_password.borrow_mut() = pw.as_bytes().to_vec();
        }
        if !self.find_header()? {
            self.warn(self.damage_at(0, "can't find PDF header"))?;
            // most writers require at least 1.2 for /FlateDecode
            *self.state.pdf_version.borrow_mut() = "1.2".to_string();
        }
        self.initialize_xref()?;
        self.initialize_encryption()?;
        if self.state.xref.borrow().size() > 0
            && !self.get_root()?.get_key("Pages").is_dictionary()
        {
            return Err(self.damaged_pdf("unable to find page tree"));
        }
        Ok(())
    }

    /// Search the first 1024 bytes for `%PDF-<major>.<minor>`
    ///
    /// A header at a non-zero offset re-bases all offsets through an
    /// offset-translating input source.
    fn find_header(&self) -> Result<bool> {
        let input = self.file();
        let mut found = None;
        {
            let mut src = input.borrow_mut();
            let mut search_at = 0u64;
            while search_at < 1024 {
                let window = (1024 - search_at) as usize;
                let at = match src.find_first(b"%PDF-", search_at, window)? {
                    Some(at) => at,
                    None => break,
                };
                src.seek(SeekFrom::Start(at + 5))?;
                let line = src.read_line(20)?;
                if let Some(version) = parse_pdf_version(&line) {
                    found = Some((at, version));
                    break;
                }
                search_at = at + 1;
            }
        }
        match found {
            Some((at, version)) => {
                *self.state.pdf_version.borrow_mut() = version;
                if at != 0 {
                    // leading garbage: explicit offsets in the file treat
                    // the header as byte 0
                    let wrapped = shared(OffsetInputSource::new(input, at));
                    *self.state.file.borrow_mut() = wrapped;
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Invalidate the input source; cached objects remain readable, any
    /// further I/O fails with a logic error
    pub fn close_input_source(&self) {
        let name = "closed input source";
        *self.state.input_name.borrow_mut() = name.to_string();
        *self.state.file.borrow_mut() = shared(InvalidInputSource::new(name));
    }

    /// Seed a minimum empty document
    pub fn empty_pdf(&self) {
        *self.state.pdf_version.borrow_mut() = "1.3".to_string();
        let name = "empty PDF";
        *self.state.input_name.borrow_mut() = name.to_string();
        *self.state.file.borrow_mut() = shared(InvalidInputSource::new(name));
        self.initialize_empty_xref();
    }

    // ------------------------------------------------------------------
    // Configuration
    // ------------------------------------------------------------------

    pub fn set_suppress_warnings(&self, value: bool) {
        self.state.suppress_warnings.set(value);
    }

    /// 0 means unlimited; otherwise exceeding the count escalates the
    /// next warning into a fatal damage error
    pub fn set_max_warnings(&self, value: usize) {
        self.state.max_warnings.set(value);
    }

    pub fn set_attempt_recovery(&self, value: bool) {
        self.state.attempt_recovery.set(value);
    }

    pub fn set_immediate_copy_from(&self, value: bool) {
        self.state.immediate_copy_from.set(value);
    }

    pub fn set_check_mode(&self, value: bool) {
        self.state.check_mode.set(value);
    }

    /// Interpret the supplied password as a hex-encoded file key
    pub fn set_password_is_hex_key(&self, value: bool) {
        self.state.password_is_hex_key.set(value);
    }

    pub fn set_ignore_xref_streams(&self, value: bool) {
        self.state.xref.borrow_mut().ignore_streams = value;
    }

    pub(crate) fn attempt_recovery(&self) -> bool {
        self.state.attempt_recovery.get()
    }

    pub(crate) fn immediate_copy_from(&self) -> bool {
        self.state.immediate_copy_from.get()
    }

    pub(crate) fn provided_password(&self) -> Vec<u8> {
        self.state.provided_password.borrow().clone()
    }

    pub(crate) fn password_is_hex_key(&self) -> bool {
        self.state.password_is_hex_key.get()
    }

    pub(crate) fn encryption_parameters(&self) -> Rc<EncryptionParameters> {
        Rc::clone(&self.state.encp.borrow())
    }

    pub(crate) fn install_encryption(&self, encp: EncryptionParameters) {
        *self.state.encp.borrow_mut() = Rc::new(encp);
    }

    /// Is this document encrypted?
    pub fn is_encrypted(&self) -> bool {
        self.state.encp.borrow().encrypted
    }

    // ------------------------------------------------------------------
    // Warnings and damage
    // ------------------------------------------------------------------

    /// Record a warning; emits through the logger unless suppressed
    pub(crate) fn warn(&self, mut damage: Damage) -> Result<()> {
        if damage.filename.is_empty() {
            damage.filename = self.filename();
        }
        {
            let warnings = self.state.warnings.borrow();
            let max = self.state.max_warnings.get();
            if max > 0 && warnings.len() >= max {
                return Err(self.damaged_pdf("too many warnings - file is too badly damaged"));
            }
        }
        if !self.state.suppress_warnings.get() {
            log::warn!("WARNING: {damage}");
        }
        self.state.warnings.borrow_mut().push(damage);
        Ok(())
    }

    /// Drain accumulated warnings, oldest first
    pub fn warnings(&self) -> Vec<Damage> {
        std::mem::take(&mut *self.state.warnings.borrow_mut())
    }

    pub fn any_warnings(&self) -> bool {
        !self.state.warnings.borrow().is_empty()
    }

    pub fn num_warnings(&self) -> usize {
        self.state.warnings.borrow().len()
    }

    /// A damage error for callers that lack more specific context
    pub fn stop_on_error(&self, message: &str) -> Error {
        self.damaged_pdf(message)
    }

    pub(crate) fn damage_at(&self, offset: u64, message: impl Into<String>) -> Damage {
        Damage::new(
            ErrorCode::DamagedPdf,
            self.filename(),
            self.last_object_description(),
            offset,
            message,
        )
    }

    pub(crate) fn damage_record(&self, message: impl Into<String>) -> Damage {
        self.damage_at(self.best_effort_offset(), message)
    }

    pub(crate) fn damaged_at(&self, offset: u64, message: impl Into<String>) -> Error {
        self.damage_at(offset, message).into()
    }

    pub(crate) fn damaged_pdf(&self, message: impl Into<String>) -> Error {
        self.damage_record(message).into()
    }

    fn best_effort_offset(&self) -> u64 {
        self.state
            .file
            .borrow()
            .try_borrow()
            .map(|src| src.last_offset())
            .unwrap_or(0)
    }

    pub(crate) fn set_last_object_description(&self, og: ObjGen) {
        *self.state.last_object_description.borrow_mut() = format!("object {og}");
    }

    pub(crate) fn last_object_description(&self) -> String {
        self.state.last_object_description.borrow().clone()
    }

    // ------------------------------------------------------------------
    // Object access and allocation
    // ------------------------------------------------------------------

    /// An indirect handle for `og`; resolution is lazy
    pub fn get_object(&self, og: ObjGen) -> Handle {
        Handle::new_indirect(self.weak(), og)
    }

    pub fn get_object_by_id(&self, id: u32, generation: u16) -> Handle {
        self.get_object(ObjGen::new(id, generation))
    }

    /// Make `oh` indirect in this document, sharing its storage
    ///
    /// Mutations through the original handle remain visible through the
    /// new identifier.
    pub fn make_indirect_object(&self, oh: Handle) -> Handle {
        let og = self.state.store.allocate();
        match oh.slot() {
            Some(slot) => self.state.store.insert_slot(og, slot),
            None => {
                self.state.store.write_value(og, Value::Null);
            }
        }
        self.get_object(og)
    }

    /// Allocate an identity with no value yet
    pub fn new_reserved(&self) -> Handle {
        let og = self.state.store.allocate();
        self.state.store.write_value(og, Value::Reserved);
        self.get_object(og)
    }

    pub fn new_indirect_null(&self) -> Handle {
        let og = self.state.store.allocate();
        self.state.store.write_value(og, Value::Null);
        self.get_object(og)
    }

    /// A fresh stream with an empty dictionary and no data
    pub fn new_stream(&self) -> Handle {
        let og = self.state.store.allocate();
        self.state.store.write_value(
            og,
            Value::Stream(StreamValue {
                dict: Handle::new_dictionary(),
                data: StreamData::Empty,
            }),
        );
        self.get_object(og)
    }

    /// A fresh stream holding `data`
    pub fn new_stream_with_data(&self, data: impl Into<Vec<u8>>) -> Result<Handle> {
        let stream = self.new_stream();
        stream.replace_stream_data(data, Handle::new_null(), Handle::new_null())?;
        Ok(stream)
    }

    /// Overwrite the value of `og` without changing its identity
    pub fn replace_object(&self, og: ObjGen, replacement: Handle) -> Result<()> {
        if og.is_null() {
            return Err(Error::logic("replace_object called with the null object id"));
        }
        self.state.store.write_value(og, replacement.value_clone());
        Ok(())
    }

    /// Fill a reservation; the slot must currently be reserved or null
    pub fn replace_reserved(&self, reserved: &Handle, replacement: Handle) -> Result<()> {
        if !reserved.is_indirect() {
            return Err(Error::logic("replace_reserved called with direct object handle"));
        }
        if !matches!(reserved.type_code(), TypeCode::Reserved | TypeCode::Null) {
            return Err(Error::logic("replace_reserved called with non-reserved object"));
        }
        self.replace_object(reserved.obj_gen(), replacement)
    }

    /// Exchange two objects' values, keeping identifiers
    pub fn swap_objects(&self, a: ObjGen, b: ObjGen) -> Result<()> {
        // resolve both so the swap exchanges real values
        self.resolve_slot(a);
        self.resolve_slot(b);
        self.state.store.swap(a, b)
    }

    /// Every identifier in the store, resolved
    pub fn all_objects(&self) -> Vec<Handle> {
        self.fix_dangling_references();
        self.state
            .store
            .all_ids()
            .into_iter()
            .map(|og| self.get_object(og))
            .collect()
    }

    /// Number of allocated objects (the next id minus one)
    pub fn object_count(&self) -> usize {
        self.fix_dangling_references();
        (self.state.store.next_id().obj - 1) as usize
    }

    /// The identifier the next allocation will produce
    pub fn next_object_id(&self) -> ObjGen {
        self.state.store.next_id()
    }

    /// Ensure every xref identifier appears in the store
    ///
    /// Idempotent; reconstruction is attempted once if the first pass
    /// reports corruption.
    pub fn fix_dangling_references(&self) {
        if self.state.fixed_dangling_refs.get() {
            return;
        }
        if !self.resolve_all_objects() {
            let _ = self.reconstruct_xref();
            // second pass degrades stubborn entries to null with warnings
            let ids = self.state.xref.borrow().entry_ids();
            for og in ids {
                self.resolve_slot(og);
            }
        }
        self.state.fixed_dangling_refs.set(true);
    }

    // ------------------------------------------------------------------
    // Resolution
    // ------------------------------------------------------------------

    /// The slot behind `og`, parsing on demand; `None` means the object
    /// does not exist (null semantics, no slot inserted)
    pub(crate) fn resolve_slot(&self, og: ObjGen) -> Option<Slot> {
        if og.is_null() {
            return None;
        }
        match self.try_resolve(og) {
            Ok(slot) => slot,
            Err(Error::Damaged(d)) => {
                // damaged objects degrade to null with a warning
                if self.warn(d).is_err() {
                    panic!("too many warnings - file is too badly damaged");
                }
                Some(self.state.store.write_value(og, Value::Null))
            }
            Err(e) => panic!("error resolving object {og}: {e}"),
        }
    }

    pub(crate) fn try_resolve(&self, og: ObjGen) -> Result<Option<Slot>> {
        if let Some(slot) = self.state.store.slot(og) {
            let unresolved = matches!(&*slot.borrow(), Value::Unresolved);
            if !unresolved {
                return Ok(Some(slot));
            }
        }
        let entry = self.state.xref.borrow().get(og);
        match entry {
            Some(XrefEntry {
                entry_type: XrefEntryType::InUse,
                offset,
                ..
            }) => Ok(Some(self.read_object_at(og, offset)?)),
            Some(XrefEntry {
                entry_type: XrefEntryType::InStream,
                stream_number,
                stream_index,
                ..
            }) => Ok(Some(self.read_object_from_stream(og, stream_number, stream_index)?)),
            None => {
                if self.state.store.contains(og) {
                    // an unresolved slot the xref no longer knows about
                    Ok(Some(self.state.store.write_value(og, Value::Null)))
                } else {
                    Ok(None)
                }
            }
        }
    }

    fn read_object_at(&self, og: ObjGen, offset: u64) -> Result<Slot> {
        self.set_last_object_description(og);
        let parsed = {
            let _guard = ParseGuard::acquire(self);
            let input = self.file();
            let mut src = input.borrow_mut();
            src.seek(SeekFrom::Start(offset))?;
            let mut parser = ObjectParser::new(self, &mut *src);
            parser.parse_indirect(og)?
        };
        let is_stream = matches!(parsed.value, Value::Stream(_));
        let slot = self.state.store.write_value(og, parsed.value);
        if is_stream {
            self.finalize_stream_length(&slot)?;
        }
        Ok(slot)
    }

    /// Resolve `/Length` after parsing is over (it may itself be an
    /// indirect object), recovering by scanning when it is unusable
    fn finalize_stream_length(&self, slot: &Slot) -> Result<()> {
        let (dict, offset) = match &*slot.borrow() {
            Value::Stream(s) => match s.data {
                StreamData::InFile { offset, .. } => (s.dict.clone(), offset),
                _ => return Ok(()),
            },
            _ => return Ok(()),
        };
        let declared = dict
            .get_key("Length")
            .as_int()
            .and_then(|l| usize::try_from(l).ok())
            .filter(|l| self.check_endstream(offset, *l).unwrap_or(false));
        let length = match declared {
            Some(l) => l,
            None => {
                self.warn(self.damage_at(
                    offset,
                    "stream dictionary's /Length is missing or incorrect; \
                     attempting to recover stream length",
                ))?;
                let recovered = {
                    let input = self.file();
                    let mut src = input.borrow_mut();
                    let mut parser = ObjectParser::new(self, &mut *src);
                    parser.recover_stream_length(offset)?
                };
                match recovered {
                    Some(l) => {
                        dict.replace_key("Length", Handle::new_integer(l as i64))?;
                        l
                    }
                    None => {
                        return Err(self.damaged_at(offset, "unable to recover stream data"))
                    }
                }
            }
        };
        if let Value::Stream(s) = &mut *slot.borrow_mut() {
            s.data = StreamData::InFile { offset, length };
        }
        Ok(())
    }

    /// Does `endstream` follow the data at the declared length?
    fn check_endstream(&self, offset: u64, length: usize) -> Result<bool> {
        let input = self.file();
        let mut src = input.borrow_mut();
        src.seek(SeekFrom::Start(offset + length as u64))?;
        let mut buf = [0u8; 16];
        let mut filled = 0;
        while filled < buf.len() {
            let n = src.read(&mut buf[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        let tail: Vec<u8> = buf[..filled]
            .iter()
            .copied()
            .skip_while(|b| b.is_ascii_whitespace())
            .collect();
        Ok(tail.starts_with(b"endstream"))
    }

    fn read_object_from_stream(
        &self,
        og: ObjGen,
        stream_number: u32,
        index: u16,
    ) -> Result<Slot> {
        let container = self.get_object(ObjGen::from_obj(stream_number));
        if !container.is_stream() {
            return Err(self.damaged_pdf(format!(
                "supposed object stream {stream_number} is not a stream"
            )));
        }
        let dict = container.stream_dict()?;
        if !dict.get_key("Type").is_name_equal("ObjStm") {
            self.warn(self.damage_record(format!(
                "supposed object stream {stream_number} has wrong type"
            )))?;
        }
        let n = dict.get_key("N").as_int().unwrap_or(0);
        let first = dict.get_key("First").as_int().unwrap_or(-1);
        if n <= 0 || first < 0 {
            return Err(self.damaged_pdf(format!(
                "object stream {stream_number} has an invalid header"
            )));
        }

        let mut buffer = PlBuffer::new("object stream data");
        if !container.pipe_stream_data(&mut buffer, true, false, false) {
            return Err(self.damaged_pdf(format!(
                "unable to read object stream {stream_number}"
            )));
        }
        let data = buffer.get_buffer()?;

        let header_end = (first as usize).min(data.len());
        let header = String::from_utf8_lossy(&data[..header_end]);
        let numbers: Vec<i64> = header
            .split_whitespace()
            .filter_map(|t| t.parse().ok())
            .collect();
        let idx = index as usize;
        if numbers.len() < (idx + 1) * 2 {
            return Err(self.damaged_pdf(format!(
                "object stream {stream_number} header is too short"
            )));
        }
        let member_num = numbers[idx * 2];
        let member_offset = numbers[idx * 2 + 1];
        if member_num != og.obj as i64 {
            return Err(self.damaged_pdf(format!(
                "object stream {stream_number}: expected object {}, found {member_num}",
                og.obj
            )));
        }
        let at = (first as usize).saturating_add(member_offset.max(0) as usize);
        if at > data.len() {
            return Err(self.damaged_pdf(format!(
                "object stream {stream_number} member offset is out of range"
            )));
        }

        self.set_last_object_description(og);
        let value = {
            let _guard = ParseGuard::acquire(self);
            let mut src = BufferInputSource::from_slice(&self.filename(), &data[at..]);
            let mut parser = ObjectParser::new(self, &mut src);
            parser.parse_value(0)?
        };
        Ok(self.state.store.write_value(og, value))
    }

    // ------------------------------------------------------------------
    // Trailer, root, version
    // ------------------------------------------------------------------

    /// The trailer dictionary (a null handle before any parse)
    pub fn trailer(&self) -> Handle {
        self.state
            .trailer
            .borrow()
            .clone()
            .unwrap_or_else(Handle::new_null)
    }

    pub(crate) fn set_trailer(&self, trailer: Handle) {
        *self.state.trailer.borrow_mut() = Some(trailer);
    }

    pub(crate) fn set_trailer_if_unset(&self, trailer: Handle) {
        let mut slot = self.state.trailer.borrow_mut();
        if slot.is_none() {
            *slot = Some(trailer);
        }
    }

    /// The document catalog
    pub fn get_root(&self) -> Result<Handle> {
        let root = self.trailer().get_key("Root");
        if !root.is_dictionary() {
            return Err(self.damaged_at(0, "unable to find /Root dictionary"));
        }
        if self.state.check_mode.get() && !root.get_key("Type").is_name_equal("Catalog") {
            self.warn(self.damage_at(0, "catalog /Type entry missing or invalid"))?;
            root.replace_key("Type", Handle::new_name("Catalog"))?;
        }
        Ok(root)
    }

    /// The detected PDF version string, e.g. `"1.7"`
    pub fn version(&self) -> String {
        self.state.pdf_version.borrow().clone()
    }

    /// `(major, minor, extension_level)`
    pub fn version_parts(&self) -> (i64, i64, i64) {
        let version = self.version();
        let mut parts = version.trim().splitn(2, '.');
        let major = parts
            .next()
            .and_then(|p| p.parse().ok())
            .unwrap_or(1);
        let minor = parts
            .next()
            .map(|p| p.chars().take_while(|c| c.is_ascii_digit()).collect::<String>())
            .and_then(|p| p.parse().ok())
            .unwrap_or(3);
        (major, minor, self.extension_level())
    }

    /// `/Extensions/ADBE/ExtensionLevel` from the catalog, or 0
    pub fn extension_level(&self) -> i64 {
        let root = match self.get_root() {
            Ok(root) => root,
            Err(_) => return 0,
        };
        let extensions = root.get_key("Extensions");
        if !extensions.is_dictionary() {
            return 0;
        }
        let adbe = extensions.get_key("ADBE");
        if !adbe.is_dictionary() {
            return 0;
        }
        adbe.get_key("ExtensionLevel").as_int().unwrap_or(0)
    }

    /// The xref map; a logic error before parsing
    pub fn xref_table(&self) -> Result<std::collections::BTreeMap<ObjGen, XrefEntry>> {
        let xref = self.state.xref.borrow();
        if !xref.initialized {
            return Err(Error::logic("xref_table called before parsing"));
        }
        Ok(xref.as_map())
    }

    /// Remove signature-related security hooks: `/Perms` in the catalog
    /// and `/AcroForm/SigFlags`
    pub fn remove_security_restrictions(&self) -> Result<()> {
        let root = self.get_root()?;
        root.remove_key("Perms")?;
        let acroform = root.get_key("AcroForm");
        if acroform.is_dictionary() && acroform.has_key("SigFlags") {
            acroform.replace_key("SigFlags", Handle::new_integer(0))?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Stream piping and filters
    // ------------------------------------------------------------------

    /// Register a stream filter for `pipe_stream_data` decoding
    pub fn register_stream_filter(&self, name: &str, filter: StreamFilterFn) {
        self.state
            .stream_filters
            .borrow_mut()
            .insert(name.to_string(), filter);
    }

    pub(crate) fn lookup_stream_filter(&self, name: &str) -> Option<StreamFilterFn> {
        self.state.stream_filters.borrow().get(name).cloned()
    }

    /// Pipe raw stream bytes from this document's input
    #[allow(clippy::too_many_arguments)]
    pub fn pipe_stream_data(
        &self,
        og: ObjGen,
        offset: u64,
        length: usize,
        stream_dict: &Handle,
        pipeline: &mut dyn Pipeline,
        suppress_warnings: bool,
        will_retry: bool,
    ) -> bool {
        let encp = self.encryption_parameters();
        let file = self.file();
        self.pipe_stream_data_inner(
            &encp,
            &file,
            og,
            offset,
            length,
            stream_dict,
            pipeline,
            suppress_warnings,
            will_retry,
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn pipe_stream_data_inner(
        &self,
        encp: &Rc<EncryptionParameters>,
        file: &SharedInput,
        og: ObjGen,
        offset: u64,
        length: usize,
        _stream_dict: &Handle,
        pipeline: &mut dyn Pipeline,
        suppress_warnings: bool,
        will_retry: bool,
    ) -> bool {
        let mut attempted_finish = false;
        let result = (|| -> Result<()> {
            let raw = {
                let mut src = file.borrow_mut();
                src.seek(SeekFrom::Start(offset))?;
                let mut buf = vec![0u8; length];
                let mut filled = 0;
                while filled < length {
                    let n = src.read(&mut buf[filled..])?;
                    if n == 0 {
                        return Err(self.damaged_at(
                            offset + filled as u64,
                            "unexpected EOF reading stream data",
                        ));
                    }
                    filled += n;
                }
                buf
            };
            let data = if encp.encrypted {
                decrypt_stream_bytes(encp, raw, og)?
            } else {
                raw
            };
            pipeline.write(&data)?;
            attempted_finish = true;
            pipeline.finish()?;
            Ok(())
        })();
        match result {
            Ok(()) => true,
            Err(e) => {
                if !suppress_warnings {
                    let _ = self.warn(self.damage_record(format!(
                        "error decoding stream data for object {og}: {e}"
                    )));
                    if will_retry {
                        let _ = self.warn(self.damage_record(
                            "stream will be re-processed without filtering to avoid data loss",
                        ));
                    }
                }
                if !attempted_finish {
                    // drain the pipeline defensively
                    let _ = pipeline.finish();
                }
                false
            }
        }
    }

    /// Decode raw bytes through the stream's `/Filter` chain, degrading
    /// to the raw bytes with a warning on unsupported filters
    pub(crate) fn apply_stream_filters(&self, stream: &Handle, raw: Vec<u8>) -> Vec<u8> {
        let dict = match stream.stream_dict() {
            Ok(dict) => dict,
            Err(_) => return raw,
        };
        let filters = self.filter_names(&dict);
        if filters.is_empty() {
            return raw;
        }
        if !filters
            .iter()
            .all(|f| self.lookup_stream_filter(f).is_some())
        {
            let _ = self.warn(
                self.damage_record("stream has unsupported filters; returning raw data"),
            );
            return raw;
        }
        match self.decode_with_filters(&dict, &raw) {
            Ok(decoded) => decoded,
            Err(e) => {
                let _ =
                    self.warn(self.damage_record(format!("error decoding stream data: {e}")));
                raw
            }
        }
    }
}

fn parse_pdf_version(line: &[u8]) -> Option<String> {
    let mut version = String::new();
    let mut rest = line;
    while let [b, tail @ ..] = rest {
        if b.is_ascii_digit() {
            version.push(*b as char);
            rest = tail;
        } else {
            break;
        }
    }
    if version.is_empty() {
        return None;
    }
    match rest {
        [b'.', tail @ ..] if tail.first().is_some_and(|b| b.is_ascii_digit()) => {
            version.push('.');
            rest = tail;
        }
        _ => return None,
    }
    while let [b, tail @ ..] = rest {
        if b.is_ascii_digit() {
            version.push(*b as char);
            rest = tail;
        } else {
            break;
        }
    }
    Some(version)
}
