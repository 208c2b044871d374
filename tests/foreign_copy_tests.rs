//! Foreign object copying tests
//!
//! Covers cycle handling, shared sub-objects, the page-tree boundary, copy
//! idempotency, and all four stream data retention cases.

mod common;

use std::rc::Rc;

use common::pdf_with_stream;
use pdfgraft::{
    Document, Handle, ObjGen, Pipeline, PlBuffer, Result, StreamDataProvider,
};

fn empty_doc() -> Document {
    let doc = Document::new();
    doc.empty_pdf();
    doc
}

fn pipe_to_vec(stream: &Handle) -> Vec<u8> {
    let mut buffer = PlBuffer::new("test sink");
    assert!(stream.pipe_stream_data(&mut buffer, false, false, false));
    buffer.get_buffer().unwrap()
}

#[test]
fn copy_rejects_direct_handles() {
    let destination = empty_doc();
    let err = destination
        .copy_foreign_object(&Handle::new_integer(1))
        .unwrap_err();
    assert!(err.is_logic());
}

#[test]
fn copy_rejects_same_document() {
    let doc = empty_doc();
    let local = doc.make_indirect_object(Handle::new_dictionary());
    let err = doc.copy_foreign_object(&local).unwrap_err();
    assert!(err.is_logic());
}

#[test]
fn copy_rejects_foreign_reserved() {
    let source = empty_doc();
    let destination = empty_doc();
    let reserved = source.new_reserved();
    let err = destination.copy_foreign_object(&reserved).unwrap_err();
    assert!(err.is_logic());
}

#[test]
fn copy_scalar_containers() {
    let source = empty_doc();
    let destination = empty_doc();

    let dict = Handle::new_dictionary();
    dict.replace_key("Int", Handle::new_integer(42)).unwrap();
    dict.replace_key("Real", Handle::new_real("2.5")).unwrap();
    dict.replace_key("Str", Handle::new_string("text")).unwrap();
    let arr = Handle::new_array();
    arr.append_item(Handle::new_name("X")).unwrap();
    arr.append_item(Handle::new_bool(true)).unwrap();
    dict.replace_key("Arr", arr).unwrap();
    let foreign = source.make_indirect_object(dict);

    let copy = destination.copy_foreign_object(&foreign).unwrap();
    assert!(copy.is_indirect());
    assert!(copy.document() == destination);
    assert_eq!(copy.get_key("Int").as_int(), Some(42));
    assert_eq!(copy.get_key("Real").as_real().as_deref(), Some("2.5"));
    assert_eq!(copy.get_key("Str").as_string().unwrap().as_bytes(), b"text");
    assert!(copy.get_key("Arr").array_item(0).is_name_equal("X"));
    assert_eq!(copy.get_key("Arr").array_item(1).as_bool(), Some(true));
}

#[test]
fn copy_cyclic_dictionaries() {
    let source = empty_doc();
    let destination = empty_doc();

    let a = source.make_indirect_object(Handle::new_dictionary());
    let b = source.make_indirect_object(Handle::new_dictionary());
    a.replace_key("Next", b.clone()).unwrap();
    b.replace_key("Prev", a.clone()).unwrap();

    let before = destination.next_object_id().obj;
    let a2 = destination.copy_foreign_object(&a).unwrap();
    let after = destination.next_object_id().obj;
    // one identifier per visited foreign object, nothing more
    assert_eq!(after - before, 2);

    let b2 = a2.get_key("Next");
    assert!(b2.document() == destination);
    assert_eq!(b2.get_key("Prev"), a2);
}

#[test]
fn copy_shares_subobjects() {
    let source = empty_doc();
    let destination = empty_doc();

    let shared_child = source.make_indirect_object(Handle::new_integer(5));
    let parent = Handle::new_dictionary();
    parent.replace_key("First", shared_child.clone()).unwrap();
    parent.replace_key("Second", shared_child.clone()).unwrap();
    let foreign = source.make_indirect_object(parent);

    let copy = destination.copy_foreign_object(&foreign).unwrap();
    assert_eq!(copy.get_key("First"), copy.get_key("Second"));
    assert_eq!(copy.get_key("First").as_int(), Some(5));
}

#[test]
fn copy_is_idempotent() {
    let source = empty_doc();
    let destination = empty_doc();

    let foreign = source.make_indirect_object(Handle::new_dictionary());
    foreign.replace_key("K", Handle::new_integer(1)).unwrap();

    let first = destination.copy_foreign_object(&foreign).unwrap();
    let second = destination.copy_foreign_object(&foreign).unwrap();
    assert_eq!(first.obj_gen(), second.obj_gen());
}

#[test]
fn copies_from_distinct_documents_do_not_collide() {
    let source_a = empty_doc();
    let source_b = empty_doc();
    let destination = empty_doc();

    let a = source_a.make_indirect_object(Handle::new_integer(1));
    let b = source_b.make_indirect_object(Handle::new_integer(2));
    // same foreign identifier in two different documents
    assert_eq!(a.obj_gen(), b.obj_gen());

    let a2 = destination.copy_foreign_object(&a).unwrap();
    let b2 = destination.copy_foreign_object(&b).unwrap();
    assert_ne!(a2.obj_gen(), b2.obj_gen());
    assert_eq!(a2.as_int(), Some(1));
    assert_eq!(b2.as_int(), Some(2));
}

#[test]
fn pages_object_copies_as_null_with_warning() {
    let source = empty_doc();
    let destination = empty_doc();
    destination.set_suppress_warnings(true);

    let pages = Handle::new_dictionary();
    pages.replace_key("Type", Handle::new_name("Pages")).unwrap();
    pages.replace_key("Count", Handle::new_integer(0)).unwrap();
    let pages = source.make_indirect_object(pages);

    let copy = destination.copy_foreign_object(&pages).unwrap();
    assert!(copy.is_null());
    assert!(destination.any_warnings());
}

#[test]
fn reference_to_page_tree_degrades_to_null() {
    let source = empty_doc();
    let destination = empty_doc();

    let pages = Handle::new_dictionary();
    pages.replace_key("Type", Handle::new_name("Pages")).unwrap();
    let pages = source.make_indirect_object(pages);

    let leaf = Handle::new_dictionary();
    leaf.replace_key("Up", pages).unwrap();
    leaf.replace_key("Payload", Handle::new_integer(7)).unwrap();
    let leaf = source.make_indirect_object(leaf);

    let copy = destination.copy_foreign_object(&leaf).unwrap();
    assert_eq!(copy.get_key("Payload").as_int(), Some(7));
    assert!(copy.get_key("Up").is_null());
}

#[test]
fn page_objects_copy_as_references_then_fill_on_top_level_copy() {
    let source = empty_doc();
    let destination = empty_doc();

    let page = Handle::new_dictionary();
    page.replace_key("Type", Handle::new_name("Page")).unwrap();
    page.replace_key("Rotate", Handle::new_integer(90)).unwrap();
    let page = source.make_indirect_object(page);

    let annot = Handle::new_dictionary();
    annot.replace_key("P", page.clone()).unwrap();
    let annot = source.make_indirect_object(annot);

    // a non-top page object is reserved but not descended into
    let annot_copy = destination.copy_foreign_object(&annot).unwrap();
    let page_ref = annot_copy.get_key("P");
    assert!(page_ref.is_indirect());
    assert!(page_ref.is_reserved());

    // a later top-level copy of that page fills the same identifier
    let page_copy = destination.copy_foreign_object(&page).unwrap();
    assert_eq!(page_copy.obj_gen(), page_ref.obj_gen());
    assert!(page_ref.is_page_object());
    assert_eq!(page_ref.get_key("Rotate").as_int(), Some(90));
}

#[test]
fn copied_graph_is_destination_owned() {
    let source = empty_doc();
    let destination = empty_doc();

    let inner = source.make_indirect_object(Handle::new_dictionary());
    inner.replace_key("V", Handle::new_integer(3)).unwrap();
    let outer = Handle::new_dictionary();
    let list = Handle::new_array();
    list.append_item(inner).unwrap();
    outer.replace_key("List", list).unwrap();
    let outer = source.make_indirect_object(outer);

    let copy = destination.copy_foreign_object(&outer).unwrap();
    let reached = copy.get_key("List").array_item(0);
    assert!(reached.is_indirect());
    assert!(reached.document() == destination);
    assert_eq!(reached.get_key("V").as_int(), Some(3));
}

// ----------------------------------------------------------------------
// Stream data retention
// ----------------------------------------------------------------------

#[test]
fn copy_stream_with_buffer_shares_data() {
    let source = empty_doc();
    let destination = empty_doc();

    let stream = source.new_stream_with_data(b"buffered data".to_vec()).unwrap();
    let copy = destination.copy_foreign_object(&stream).unwrap();

    assert!(copy.is_stream());
    let src_buf = stream.stream_data_buffer().unwrap();
    let dst_buf = copy.stream_data_buffer().unwrap();
    assert!(Rc::ptr_eq(&src_buf, &dst_buf));
    assert_eq!(pipe_to_vec(&copy), b"buffered data");
}

/// Provider that writes a fixed payload
struct FixedProvider(&'static [u8]);

impl StreamDataProvider for FixedProvider {
    fn provide_data(
        &self,
        _og: ObjGen,
        pipeline: &mut dyn Pipeline,
        _suppress_warnings: bool,
        _will_retry: bool,
    ) -> bool {
        pipeline.write(self.0).is_ok() && pipeline.finish().is_ok()
    }
}

#[test]
fn copy_stream_with_provider_stays_live() {
    let source = empty_doc();
    let destination = empty_doc();

    let stream = source.new_stream();
    stream
        .replace_stream_data_provider(
            Rc::new(FixedProvider(b"hello")),
            Handle::new_null(),
            Handle::new_null(),
        )
        .unwrap();

    let copy = destination.copy_foreign_object(&stream).unwrap();
    // release the source handle; the source document itself stays open
    drop(stream);
    assert_eq!(pipe_to_vec(&copy), b"hello");
}

#[test]
fn copy_file_backed_stream_reads_source_input() {
    let source = Document::new();
    source
        .process_memory("source.pdf", &pdf_with_stream("hello"), None)
        .unwrap();
    let destination = empty_doc();

    let contents = source.get_object_by_id(4, 0);
    assert!(contents.is_stream());
    let copy = destination.copy_foreign_object(&contents).unwrap();

    // the destination pipes straight out of the source's input, even
    // after the source document object is gone
    drop(contents);
    drop(source);
    assert_eq!(pipe_to_vec(&copy), b"hello");
}

#[test]
fn immediate_copy_from_materializes_source_data() {
    let source = Document::new();
    source
        .process_memory("source.pdf", &pdf_with_stream("payload"), None)
        .unwrap();
    source.set_immediate_copy_from(true);
    let destination = empty_doc();

    let contents = source.get_object_by_id(4, 0);
    let copy = destination.copy_foreign_object(&contents).unwrap();

    // the source stream was pulled into a buffer, so the source input is
    // no longer needed
    assert!(contents.stream_data_buffer().is_some());
    source.close_input_source();
    assert_eq!(pipe_to_vec(&copy), b"payload");
}

#[test]
fn copied_stream_dictionary_is_rewritten() {
    let source = empty_doc();
    let destination = empty_doc();

    let meta = source.make_indirect_object(Handle::new_integer(99));
    let stream = source.new_stream_with_data(b"x".to_vec()).unwrap();
    stream
        .stream_dict()
        .unwrap()
        .replace_key("Meta", meta)
        .unwrap();

    let copy = destination.copy_foreign_object(&stream).unwrap();
    let copied_meta = copy.stream_dict().unwrap().get_key("Meta");
    assert!(copied_meta.is_indirect());
    assert!(copied_meta.document() == destination);
    assert_eq!(copied_meta.as_int(), Some(99));
}

#[test]
fn copy_result_usable_through_document_api() -> Result<()> {
    // copied objects participate in normal document operations
    let source = empty_doc();
    let destination = empty_doc();

    let foreign = source.make_indirect_object(Handle::new_dictionary());
    foreign.replace_key("K", Handle::new_integer(1))?;
    let copy = destination.copy_foreign_object(&foreign)?;

    let other = destination.make_indirect_object(Handle::new_integer(7));
    destination.swap_objects(copy.obj_gen(), other.obj_gen())?;
    assert_eq!(copy.as_int(), Some(7));
    assert_eq!(other.get_key("K").as_int(), Some(1));
    Ok(())
}
