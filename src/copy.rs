//! Foreign object copying
//!
//! Importing a sub-graph from another document happens in two passes: a
//! reserving traversal that allocates a local identity for every reachable
//! foreign indirect object (with loop detection, stopping at the page
//! tree), then a rewriting pass that computes each copied value with all
//! foreign references replaced by the local reservations. Because identity
//! is created before value, circular references copy in any order.
//!
//! Stream data survives the copy without requiring the source document
//! object: buffers are shared, provider-backed streams are proxied (which
//! keeps the source document alive), and file-backed streams are recorded
//! as detached back-references into the source input.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::{Rc, Weak};

use crate::crypt::EncryptionParameters;
use crate::document::{DocState, Document};
use crate::error::{Error, Result};
use crate::handle::Handle;
use crate::input::SharedInput;
use crate::object::{ObjGen, StreamData, StreamDataProvider, TypeCode};
use crate::pipeline::Pipeline;

/// Copy state kept per source document
///
/// Persisting the map across calls makes repeated copies share identity:
/// importing the same foreign sub-graph twice yields the same local ids.
#[derive(Default)]
pub(crate) struct ObjCopier {
    /// foreign identifier → local reservation (or finished copy)
    pub object_map: HashMap<ObjGen, Handle>,
    /// foreign handles queued for the rewrite pass
    pub to_copy: Vec<Handle>,
    /// identifiers on the current traversal stack
    pub visiting: HashSet<ObjGen>,
}

/// Detached record for piping a foreign stream after the copy
///
/// Captures everything needed to read, decrypt and deliver the source
/// stream's raw bytes without the source document object.
pub struct ForeignStreamData {
    pub(crate) encp: Rc<EncryptionParameters>,
    pub(crate) file: SharedInput,
    pub(crate) foreign_og: ObjGen,
    pub(crate) offset: u64,
    pub(crate) length: usize,
    pub(crate) local_dict: Handle,
}

/// Destination-scoped provider serving every imported stream
///
/// Two maps distinguish proxied source streams (the source document stays
/// alive through the stored pair) from detached [`ForeignStreamData`]
/// records.
pub(crate) struct CopiedStreamDataProvider {
    destination: Weak<DocState>,
    foreign_streams: RefCell<HashMap<ObjGen, (Document, Handle)>>,
    foreign_stream_data: RefCell<HashMap<ObjGen, Rc<ForeignStreamData>>>,
}

impl CopiedStreamDataProvider {
    pub fn new(destination: Weak<DocState>) -> Self {
        Self {
            destination,
            foreign_streams: RefCell::new(HashMap::new()),
            foreign_stream_data: RefCell::new(HashMap::new()),
        }
    }

    pub fn register_foreign_stream(&self, local_og: ObjGen, source: Document, stream: Handle) {
        self.foreign_streams
            .borrow_mut()
            .insert(local_og, (source, stream));
    }

    pub fn register_foreign_stream_data(&self, local_og: ObjGen, data: Rc<ForeignStreamData>) {
        self.foreign_stream_data.borrow_mut().insert(local_og, data);
    }
}

impl StreamDataProvider for CopiedStreamDataProvider {
    fn provide_data(
        &self,
        og: ObjGen,
        pipeline: &mut dyn Pipeline,
        suppress_warnings: bool,
        will_retry: bool,
    ) -> bool {
        let detached = self.foreign_stream_data.borrow().get(&og).cloned();
        if let Some(foreign) = detached {
            let destination = match self.destination.upgrade() {
                Some(state) => Document::from_state(state),
                None => return false,
            };
            return destination.pipe_foreign_stream_data(
                &foreign,
                pipeline,
                suppress_warnings,
                will_retry,
            );
        }
        let proxied = self.foreign_streams.borrow().get(&og).cloned();
        match proxied {
            Some((_source, stream)) => {
                stream.pipe_stream_data(pipeline, false, suppress_warnings, will_retry)
            }
            None => false,
        }
    }
}

impl Document {
    /// Deep-copy a foreign sub-graph into this document
    ///
    /// Returns a local indirect handle whose internal references have all
    /// been rewritten to this document's numbering space. Copying the same
    /// handle again returns the same local object. Page objects may be
    /// copied this way (the page tree is not updated); a `/Pages` object
    /// itself degrades to null with a warning.
    pub fn copy_foreign_object(&self, foreign: &Handle) -> Result<Handle> {
        if !foreign.is_indirect() {
            return Err(Error::logic(
                "copy_foreign_object called with direct object handle",
            ));
        }
        let other = foreign.document();
        if other == *self {
            return Err(Error::logic(
                "copy_foreign_object called with object from this document",
            ));
        }

        let other_id = other.unique_id();
        let mut copier = self
            .st()
            .object_copiers
            .borrow_mut()
            .remove(&other_id)
            .unwrap_or_default();
        let result = self.copy_foreign_inner(foreign, &mut copier);
        if result.is_err() {
            copier.visiting.clear();
            copier.to_copy.clear();
        }
        self.st()
            .object_copiers
            .borrow_mut()
            .insert(other_id, copier);
        result
    }

    fn copy_foreign_inner(&self, foreign: &Handle, copier: &mut ObjCopier) -> Result<Handle> {
        if !copier.visiting.is_empty() {
            return Err(Error::logic(
                "copy state is not empty at the beginning of copy_foreign_object",
            ));
        }

        self.reserve_objects(foreign, copier, true)?;
        if !copier.visiting.is_empty() {
            return Err(Error::logic("copy state is not empty after reserving objects"));
        }

        let queue = std::mem::take(&mut copier.to_copy);
        for to_copy in &queue {
            let copy = self.replace_foreign_indirect(to_copy, copier, true)?;
            if !to_copy.is_stream() {
                let og = to_copy.obj_gen();
                let local = copier
                    .object_map
                    .get(&og)
                    .cloned()
                    .ok_or_else(|| Error::logic("copy map lost a reservation"))?;
                self.replace_reserved(&local, copy)?;
            }
        }

        match copier.object_map.get(&foreign.obj_gen()) {
            Some(local) => Ok(local.clone()),
            None => {
                self.warn(self.damage_record(
                    "unexpected reference to /Pages object while copying foreign object; \
                     replacing with null",
                ))?;
                Ok(Handle::new_null())
            }
        }
    }

    /// Pass 1: allocate a local identity for every reachable foreign
    /// indirect object
    fn reserve_objects(&self, foreign: &Handle, copier: &mut ObjCopier, top: bool) -> Result<()> {
        let tc = foreign.type_code();
        if tc == TypeCode::Reserved {
            return Err(Error::logic("attempting to copy a foreign reserved object"));
        }
        if foreign.is_pages_object() {
            // the page tree root is never copied through this path
            return Ok(());
        }

        let mut entered = None;
        if foreign.is_indirect() {
            let og = foreign.obj_gen();
            if !copier.visiting.insert(og) {
                // loop
                return Ok(());
            }
            entered = Some(og);
            if let Some(local) = copier.object_map.get(&og) {
                // already mapped; only a top-level copy of a page object
                // whose reservation was never filled (it was seen across a
                // page boundary) re-traverses so the body gets queued
                if !(top && foreign.is_page_object() && local.is_reservation()) {
                    copier.visiting.remove(&og);
                    return Ok(());
                }
            } else {
                let local = if foreign.is_stream() {
                    self.new_stream()
                } else {
                    self.new_reserved()
                };
                copier.object_map.insert(og, local);
                if !top && foreign.is_page_object() {
                    // pages are imported as references, not bodies
                    copier.visiting.remove(&og);
                    return Ok(());
                }
            }
            copier.to_copy.push(foreign.clone());
        }

        match tc {
            TypeCode::Array => {
                for item in foreign.array_items() {
                    self.reserve_objects(&item, copier, false)?;
                }
            }
            TypeCode::Dictionary => {
                for key in foreign.keys() {
                    self.reserve_objects(&foreign.get_key(key.as_str()), copier, false)?;
                }
            }
            TypeCode::Stream => {
                self.reserve_objects(&foreign.stream_dict()?, copier, false)?;
            }
            _ => {}
        }

        if let Some(og) = entered {
            copier.visiting.remove(&og);
        }
        Ok(())
    }

    /// Pass 2: compute the local value of one queued foreign object
    fn replace_foreign_indirect(
        &self,
        foreign: &Handle,
        copier: &mut ObjCopier,
        top: bool,
    ) -> Result<Handle> {
        if !top && foreign.is_indirect() {
            // a missing mapping is a reference that escaped into a page
            // tree node the traversal refused to copy
            return Ok(match copier.object_map.get(&foreign.obj_gen()) {
                Some(local) => local.clone(),
                None => Handle::new_null(),
            });
        }
        match foreign.type_code() {
            TypeCode::Array => {
                let result = Handle::new_array();
                for item in foreign.array_items() {
                    result.append_item(self.replace_foreign_indirect(&item, copier, false)?)?;
                }
                Ok(result)
            }
            TypeCode::Dictionary => {
                let result = Handle::new_dictionary();
                for key in foreign.keys() {
                    let child =
                        self.replace_foreign_indirect(&foreign.get_key(key.as_str()), copier, false)?;
                    result.replace_key(key.as_str(), child)?;
                }
                Ok(result)
            }
            TypeCode::Stream => {
                let result = copier
                    .object_map
                    .get(&foreign.obj_gen())
                    .cloned()
                    .ok_or_else(|| Error::logic("stream reservation missing during copy"))?;
                let dict = result.stream_dict()?;
                let old_dict = foreign.stream_dict()?;
                for key in old_dict.keys() {
                    let child = self.replace_foreign_indirect(
                        &old_dict.get_key(key.as_str()),
                        copier,
                        false,
                    )?;
                    dict.replace_key(key.as_str(), child)?;
                }
                self.copy_stream_data(&result, foreign)?;
                Ok(result)
            }
            _ => foreign.make_direct(),
        }
    }

    /// Install the foreign stream's data into the local copy
    ///
    /// Policy, by priority: share an existing buffer; materialize first
    /// when the source has `immediate_copy_from` set; proxy a user
    /// provider (retaining the source document); otherwise record a
    /// detached back-reference into the source input.
    pub(crate) fn copy_stream_data(&self, result: &Handle, foreign: &Handle) -> Result<()> {
        let dict = result.stream_dict()?;
        let old_dict = foreign.stream_dict()?;
        let source = foreign.document();
        let local_og = result.obj_gen();

        let mut data = foreign.stream_data()?;
        if source.immediate_copy_from() && !data.is_buffer() && !matches!(data, StreamData::Empty)
        {
            // pull the data into the source stream first so copying the
            // same stream repeatedly does not duplicate the work
            let raw = foreign.raw_stream_data()?;
            foreign.replace_stream_data(
                raw,
                old_dict.get_key("Filter"),
                old_dict.get_key("DecodeParms"),
            )?;
            data = foreign.stream_data()?;
        }

        match data {
            StreamData::Empty => Ok(()),
            StreamData::Buffer(buffer) => result.replace_stream_data_shared(
                buffer,
                dict.get_key("Filter"),
                dict.get_key("DecodeParms"),
            ),
            StreamData::Provider(_) => {
                let provider = self.copied_stream_provider();
                provider.register_foreign_stream(local_og, source.clone(), foreign.clone());
                result.replace_stream_data_provider(
                    provider,
                    dict.get_key("Filter"),
                    dict.get_key("DecodeParms"),
                )
            }
            StreamData::InFile { offset, length } => {
                let foreign_data = Rc::new(ForeignStreamData {
                    encp: source.encryption_parameters(),
                    file: source.file(),
                    foreign_og: foreign.obj_gen(),
                    offset,
                    length,
                    local_dict: dict.clone(),
                });
                let provider = self.copied_stream_provider();
                provider.register_foreign_stream_data(local_og, foreign_data);
                result.replace_stream_data_provider(
                    provider,
                    dict.get_key("Filter"),
                    dict.get_key("DecodeParms"),
                )
            }
        }
    }

    /// Pipe a detached foreign stream: read the source input at the
    /// recorded offset, decrypt through the source's parameters, deliver
    pub fn pipe_foreign_stream_data(
        &self,
        foreign: &ForeignStreamData,
        pipeline: &mut dyn Pipeline,
        suppress_warnings: bool,
        will_retry: bool,
    ) -> bool {
        self.pipe_stream_data_inner(
            &foreign.encp,
            &foreign.file,
            foreign.foreign_og,
            foreign.offset,
            foreign.length,
            &foreign.local_dict,
            pipeline,
            suppress_warnings,
            will_retry,
        )
    }

    /// The destination-scoped provider, created on first use
    fn copied_stream_provider(&self) -> Rc<CopiedStreamDataProvider> {
        let mut slot = self.st().copied_streams.borrow_mut();
        if let Some(provider) = slot.as_ref() {
            return Rc::clone(provider);
        }
        let provider = Rc::new(CopiedStreamDataProvider::new(self.weak()));
        *slot = Some(Rc::clone(&provider));
        provider
    }
}
