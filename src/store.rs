//! Object store - the per-document (id, gen) → slot cache
//!
//! The store is a plain cache plus an id allocator. Resolution of
//! unresolved entries is orchestrated by [`crate::document::Document`],
//! which owns the xref view, the parser and the input source; the store
//! never reaches back into them.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;

use crate::error::{Error, Result};
use crate::handle::Slot;
use crate::object::{ObjGen, Value};

pub(crate) struct ObjectStore {
    cache: RefCell<BTreeMap<ObjGen, Slot>>,
    /// Highest object number seen so far; allocation hands out max + 1
    max_id: Cell<u32>,
}

impl ObjectStore {
    pub fn new() -> Self {
        Self {
            cache: RefCell::new(BTreeMap::new()),
            max_id: Cell::new(0),
        }
    }

    /// The slot for `og`, if one exists
    pub fn slot(&self, og: ObjGen) -> Option<Slot> {
        self.cache.borrow().get(&og).cloned()
    }

    pub fn contains(&self, og: ObjGen) -> bool {
        self.cache.borrow().contains_key(&og)
    }

    /// Write `value` into the slot for `og`, creating the slot if needed
    ///
    /// Existing slots keep their cell so outstanding views stay coherent.
    pub fn write_value(&self, og: ObjGen, value: Value) -> Slot {
        self.note_id(og.obj);
        let mut cache = self.cache.borrow_mut();
        match cache.get(&og) {
            Some(slot) => {
                *slot.borrow_mut() = value;
                Rc::clone(slot)
            }
            None => {
                let slot = Rc::new(RefCell::new(value));
                cache.insert(og, Rc::clone(&slot));
                slot
            }
        }
    }

    /// Register an existing slot under `og`, sharing it
    ///
    /// Used by `make_indirect`: mutations through the original direct
    /// handle stay visible through the new identifier.
    pub fn insert_slot(&self, og: ObjGen, slot: Slot) {
        self.note_id(og.obj);
        self.cache.borrow_mut().insert(og, slot);
    }

    /// Allocate the next identifier (generation 0)
    pub fn allocate(&self) -> ObjGen {
        let id = self.max_id.get() + 1;
        self.max_id.set(id);
        ObjGen::from_obj(id)
    }

    /// The identifier the next allocation will produce
    pub fn next_id(&self) -> ObjGen {
        ObjGen::from_obj(self.max_id.get() + 1)
    }

    /// Raise the allocation floor to cover `id`
    pub fn note_id(&self, id: u32) {
        if id > self.max_id.get() {
            self.max_id.set(id);
        }
    }

    /// Exchange the values of two slots, keeping identifiers
    ///
    /// Both identifiers must name live slots. Aliased slots (two ids
    /// sharing one cell) are a no-op.
    pub fn swap(&self, a: ObjGen, b: ObjGen) -> Result<()> {
        let (slot_a, slot_b) = {
            let cache = self.cache.borrow();
            let slot_a = cache
                .get(&a)
                .cloned()
                .ok_or_else(|| Error::logic(format!("swap called on unknown object {a}")))?;
            let slot_b = cache
                .get(&b)
                .cloned()
                .ok_or_else(|| Error::logic(format!("swap called on unknown object {b}")))?;
            (slot_a, slot_b)
        };
        if Rc::ptr_eq(&slot_a, &slot_b) {
            return Ok(());
        }
        std::mem::swap(&mut *slot_a.borrow_mut(), &mut *slot_b.borrow_mut());
        Ok(())
    }

    /// Every identifier currently cached, in id order
    pub fn all_ids(&self) -> Vec<ObjGen> {
        self.cache.borrow().keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_monotonic() {
        let store = ObjectStore::new();
        assert_eq!(store.next_id(), ObjGen::from_obj(1));
        assert_eq!(store.allocate(), ObjGen::from_obj(1));
        assert_eq!(store.allocate(), ObjGen::from_obj(2));
        store.note_id(10);
        assert_eq!(store.allocate(), ObjGen::from_obj(11));
    }

    #[test]
    fn test_write_value_keeps_cell() {
        let store = ObjectStore::new();
        let og = ObjGen::from_obj(1);
        let first = store.write_value(og, Value::Integer(1));
        let second = store.write_value(og, Value::Integer(2));
        assert!(Rc::ptr_eq(&first, &second));
        assert_eq!(first.borrow().as_int(), Some(2));
    }

    #[test]
    fn test_swap_values() {
        let store = ObjectStore::new();
        let a = ObjGen::from_obj(1);
        let b = ObjGen::from_obj(2);
        store.write_value(a, Value::Integer(10));
        store.write_value(b, Value::Integer(20));
        store.swap(a, b).unwrap();
        assert_eq!(store.slot(a).unwrap().borrow().as_int(), Some(20));
        assert_eq!(store.slot(b).unwrap().borrow().as_int(), Some(10));
        // swapping twice is the identity
        store.swap(a, b).unwrap();
        assert_eq!(store.slot(a).unwrap().borrow().as_int(), Some(10));
    }

    #[test]
    fn test_swap_unknown_is_logic_error() {
        let store = ObjectStore::new();
        store.write_value(ObjGen::from_obj(1), Value::Null);
        assert!(store.swap(ObjGen::from_obj(1), ObjGen::from_obj(9)).is_err());
    }

    #[test]
    fn test_swap_aliased_slots() {
        let store = ObjectStore::new();
        let slot = store.write_value(ObjGen::from_obj(1), Value::Integer(5));
        store.insert_slot(ObjGen::from_obj(2), slot);
        store
            .swap(ObjGen::from_obj(1), ObjGen::from_obj(2))
            .unwrap();
        assert_eq!(
            store.slot(ObjGen::from_obj(1)).unwrap().borrow().as_int(),
            Some(5)
        );
    }

    #[test]
    fn test_all_ids_sorted() {
        let store = ObjectStore::new();
        store.write_value(ObjGen::from_obj(3), Value::Null);
        store.write_value(ObjGen::from_obj(1), Value::Null);
        let ids: Vec<u32> = store.all_ids().iter().map(|og| og.obj).collect();
        assert_eq!(ids, vec![1, 3]);
    }
}
