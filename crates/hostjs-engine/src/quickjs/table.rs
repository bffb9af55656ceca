//! Handle table mapping QuickJS values to `RawValue`s
//!
//! Every boxed value lives in one slot that holds a single QuickJS
//! reference, however many host units point at it. Reference-counted
//! values are interned by pointer, so the same object always maps to the
//! same `ObjectId` while the host holds it.

use rquickjs::qjs;
use rustc_hash::FxHashMap;

use crate::value::{ObjectId, RawValue};

use super::tags::*;

struct Slot {
    value: qjs::JSValue,
    /// Host units; zero marks a free slot.
    units: u32,
    generation: u32,
    /// Whether `value` carries a QuickJS reference count header.
    counted: bool,
}

#[derive(Default)]
pub(super) struct Table {
    slots: Vec<Slot>,
    free: Vec<u32>,
    by_ptr: FxHashMap<usize, u32>,
}

/// Outcome of handing a QuickJS value to the table.
pub(super) struct Adopted {
    pub raw: RawValue,
    /// Reference the caller must give back to QuickJS because the value
    /// was already interned.
    pub surplus: Option<qjs::JSValue>,
}

impl Table {
    /// Take ownership of one QuickJS reference on `value`.
    pub fn adopt(&mut self, value: qjs::JSValue) -> Adopted {
        let tag = tag_of(value);
        if let Some(raw) = scalar_of(tag, value) {
            return Adopted { raw, surplus: None };
        }
        if is_counted(tag) {
            let ptr = unsafe { qjs::JS_VALUE_GET_PTR(value) } as usize;
            if let Some(&index) = self.by_ptr.get(&ptr) {
                let slot = &mut self.slots[index as usize];
                slot.units += 1;
                return Adopted {
                    raw: RawValue::Ref(ObjectId {
                        index,
                        generation: slot.generation,
                    }),
                    surplus: Some(value),
                };
            }
            let id = self.insert(value, true);
            self.by_ptr.insert(ptr, id.index);
            return Adopted {
                raw: RawValue::Ref(id),
                surplus: None,
            };
        }
        Adopted {
            raw: RawValue::Ref(self.insert(value, false)),
            surplus: None,
        }
    }

    fn insert(&mut self, value: qjs::JSValue, counted: bool) -> ObjectId {
        match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.value = value;
                slot.units = 1;
                slot.counted = counted;
                ObjectId {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    value,
                    units: 1,
                    generation: 0,
                    counted,
                });
                ObjectId {
                    index,
                    generation: 0,
                }
            }
        }
    }

    fn slot(&self, id: ObjectId) -> Option<&Slot> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.units > 0 && slot.generation == id.generation)
    }

    /// The slot's QuickJS value, borrowed.
    pub fn get(&self, id: ObjectId) -> Option<qjs::JSValue> {
        self.slot(id).map(|slot| slot.value)
    }

    pub fn is_live(&self, id: ObjectId) -> bool {
        self.slot(id).is_some()
    }

    pub fn dup(&mut self, id: ObjectId) {
        if self.is_live(id) {
            self.slots[id.index as usize].units += 1;
        }
    }

    /// Give back one host unit. Returns the QuickJS reference to free once
    /// the last unit is gone.
    pub fn release(&mut self, id: ObjectId) -> Option<qjs::JSValue> {
        if !self.is_live(id) {
            return None;
        }
        let slot = &mut self.slots[id.index as usize];
        slot.units -= 1;
        if slot.units > 0 {
            return None;
        }
        let value = std::mem::replace(&mut slot.value, undefined());
        slot.generation = slot.generation.wrapping_add(1);
        if slot.counted {
            let ptr = unsafe { qjs::JS_VALUE_GET_PTR(value) } as usize;
            self.by_ptr.remove(&ptr);
        }
        self.free.push(id.index);
        Some(value)
    }

    /// Host units plus references held inside the runtime.
    pub fn ref_count(&self, id: ObjectId) -> u32 {
        let Some(slot) = self.slot(id) else {
            return 0;
        };
        if !slot.counted {
            return slot.units;
        }
        let header = unsafe { *(qjs::JS_VALUE_GET_PTR(slot.value) as *const std::os::raw::c_int) };
        // the table's own reference stands for all host units
        slot.units + (header.max(1) as u32 - 1)
    }

    pub fn live(&self) -> usize {
        self.slots.iter().filter(|slot| slot.units > 0).count()
    }

    /// Empty the table, returning every QuickJS reference it held.
    pub fn drain(&mut self) -> Vec<qjs::JSValue> {
        let mut values = Vec::new();
        for slot in &mut self.slots {
            if slot.units > 0 {
                slot.units = 0;
                slot.generation = slot.generation.wrapping_add(1);
                values.push(std::mem::replace(&mut slot.value, undefined()));
            }
        }
        self.by_ptr.clear();
        self.free = (0..self.slots.len() as u32).rev().collect();
        values
    }
}

/// Inline form of values that need no slot.
fn scalar_of(tag: i32, value: qjs::JSValue) -> Option<RawValue> {
    Some(match tag {
        TAG_INT => RawValue::Int(unsafe { qjs::JS_VALUE_GET_INT(value) }),
        TAG_BOOL => RawValue::Bool(unsafe { qjs::JS_VALUE_GET_INT(value) } != 0),
        TAG_NULL => RawValue::Null,
        TAG_UNDEFINED | TAG_UNINITIALIZED | TAG_EXCEPTION | TAG_CATCH_OFFSET => RawValue::Undefined,
        TAG_FLOAT64 => RawValue::number(unsafe { qjs::JS_VALUE_GET_FLOAT64(value) }),
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalars_bypass_slots() {
        let mut table = Table::default();
        let adopted = table.adopt(make(TAG_INT, 7));
        assert_eq!(adopted.raw, RawValue::Int(7));
        assert!(adopted.surplus.is_none());
        assert_eq!(table.adopt(make(TAG_BOOL, 1)).raw, RawValue::Bool(true));
        assert_eq!(table.adopt(make(TAG_NULL, 0)).raw, RawValue::Null);
        assert_eq!(table.adopt(exception()).raw, RawValue::Undefined);
        assert_eq!(table.live(), 0);
    }

    #[test]
    fn test_released_identity_is_not_reused() {
        let mut table = Table::default();
        // a non-counted boxed tag exercises slot reuse without a runtime
        let id = table.insert(make(TAG_CATCH_OFFSET, 1), false);
        table.dup(id);
        assert_eq!(table.ref_count(id), 2);
        assert!(table.release(id).is_none());
        assert!(table.release(id).is_some());
        assert!(!table.is_live(id));
        assert_eq!(table.ref_count(id), 0);

        let reused = table.insert(make(TAG_CATCH_OFFSET, 2), false);
        assert_eq!(reused.index, id.index);
        assert_ne!(reused.generation, id.generation);
        assert!(table.release(id).is_none());
        assert!(table.is_live(reused));
    }
}
