//! Heap cell layout and the slot table that owns the cells

use std::rc::Rc;

use indexmap::IndexMap;

use crate::engine::NativeCallback;
use crate::error::ErrorKind;
use crate::value::{ContextId, ObjectId, RawValue};

/// Fixed bookkeeping charged for every cell.
pub(crate) const CELL_OVERHEAD: usize = 48;
/// Charged per named property.
pub(crate) const PROPERTY_SIZE: usize = 40;
/// Charged per array element.
pub(crate) const ELEMENT_SIZE: usize = 16;

pub(crate) struct HeapCell {
    pub refs: u32,
    pub size: usize,
    pub kind: CellKind,
}

pub(crate) enum CellKind {
    Str(Rc<str>),
    Object(ObjectData),
}

impl CellKind {
    pub fn footprint(&self) -> usize {
        CELL_OVERHEAD
            + match self {
                CellKind::Str(s) => s.len(),
                CellKind::Object(object) => {
                    object.props.len() * PROPERTY_SIZE
                        + match &object.class {
                            ObjectClass::Array(elements) => elements.len() * ELEMENT_SIZE,
                            ObjectClass::Unit(unit) => unit.source.len(),
                            _ => 0,
                        }
                }
            }
    }

    pub fn as_object(&self) -> Option<&ObjectData> {
        match self {
            CellKind::Object(object) => Some(object),
            CellKind::Str(_) => None,
        }
    }

    pub fn as_object_mut(&mut self) -> Option<&mut ObjectData> {
        match self {
            CellKind::Object(object) => Some(object),
            CellKind::Str(_) => None,
        }
    }

    /// Push every value this cell holds a unit on.
    pub fn children(&self, out: &mut Vec<RawValue>) {
        let CellKind::Object(object) = self else {
            return;
        };
        if let Some(proto) = object.proto {
            out.push(RawValue::Ref(proto));
        }
        for property in object.props.values() {
            match property.slot {
                PropertySlot::Data(value) => out.push(value),
                PropertySlot::Accessor { getter, setter } => {
                    out.push(getter);
                    out.push(setter);
                }
            }
        }
        match &object.class {
            ObjectClass::Array(elements) => out.extend(elements.iter().copied()),
            ObjectClass::Function(function) => out.extend(function.data.iter().copied()),
            ObjectClass::Promise(promise) => {
                match promise.state {
                    PromiseState::Pending => {}
                    PromiseState::Fulfilled(value) | PromiseState::Rejected(value) => {
                        out.push(value)
                    }
                }
                for reaction in &promise.reactions {
                    out.extend([reaction.on_fulfilled, reaction.on_rejected, reaction.derived]);
                }
            }
            ObjectClass::Plain
            | ObjectClass::Global
            | ObjectClass::Error(_)
            | ObjectClass::Unit(_) => {}
        }
    }
}

pub(crate) struct ObjectData {
    pub class: ObjectClass,
    pub proto: Option<ObjectId>,
    pub props: IndexMap<String, Property>,
}

impl ObjectData {
    pub fn new(class: ObjectClass) -> Self {
        Self {
            class,
            proto: None,
            props: IndexMap::new(),
        }
    }
}

pub(crate) enum ObjectClass {
    Plain,
    /// Global object of a context; answers `globalThis` with itself.
    Global,
    Array(Vec<RawValue>),
    Error(ErrorKind),
    Function(FunctionData),
    Promise(PromiseData),
    Unit(CompiledUnit),
}

pub(crate) struct Property {
    pub slot: PropertySlot,
    pub enumerable: bool,
}

impl Property {
    pub fn data(value: RawValue, enumerable: bool) -> Self {
        Self {
            slot: PropertySlot::Data(value),
            enumerable,
        }
    }
}

#[derive(Clone, Copy)]
pub(crate) enum PropertySlot {
    Data(RawValue),
    Accessor { getter: RawValue, setter: RawValue },
}

pub(crate) struct FunctionData {
    pub name: String,
    pub length: u32,
    pub ctx: ContextId,
    pub callback: NativeCallback,
    pub data: Vec<RawValue>,
}

pub(crate) struct PromiseData {
    pub state: PromiseState,
    pub reactions: Vec<Reaction>,
}

#[derive(Clone, Copy)]
pub(crate) enum PromiseState {
    Pending,
    Fulfilled(RawValue),
    Rejected(RawValue),
}

/// A `then` registration waiting for settlement. Every field holds a unit.
#[derive(Clone, Copy)]
pub(crate) struct Reaction {
    pub on_fulfilled: RawValue,
    pub on_rejected: RawValue,
    pub derived: RawValue,
}

pub(crate) struct CompiledUnit {
    pub source: Rc<str>,
    pub filename: Option<String>,
}

struct Slot {
    generation: u32,
    cell: Option<HeapCell>,
}

/// Generation-tagged slot storage.
#[derive(Default)]
pub(crate) struct CellTable {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
    pub used: usize,
    pub limit: Option<usize>,
}

impl CellTable {
    pub fn would_exceed(&self, bytes: usize) -> bool {
        self.limit
            .is_some_and(|limit| self.used.saturating_add(bytes) > limit)
    }

    pub fn insert(&mut self, kind: CellKind) -> ObjectId {
        let size = kind.footprint();
        let cell = HeapCell { refs: 1, size, kind };
        self.used += size;
        self.live += 1;
        match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.cell = Some(cell);
                ObjectId {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 0,
                    cell: Some(cell),
                });
                ObjectId {
                    index,
                    generation: 0,
                }
            }
        }
    }

    pub fn get(&self, id: ObjectId) -> Option<&HeapCell> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.cell.as_ref())
    }

    pub fn get_mut(&mut self, id: ObjectId) -> Option<&mut HeapCell> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.cell.as_mut())
    }

    pub fn object(&self, value: RawValue) -> Option<&ObjectData> {
        self.get(value.object_id()?)?.kind.as_object()
    }

    pub fn object_mut(&mut self, value: RawValue) -> Option<&mut ObjectData> {
        self.get_mut(value.object_id()?)?.kind.as_object_mut()
    }

    pub fn incref(&mut self, value: RawValue) {
        if let Some(cell) = value.object_id().and_then(|id| self.get_mut(id)) {
            cell.refs += 1;
        }
    }

    /// Drop one unit. Returns the cell when that was the last one; the slot
    /// is recycled under a new generation.
    pub fn decref(&mut self, id: ObjectId) -> Option<HeapCell> {
        let slot = self
            .slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)?;
        let cell = slot.cell.as_mut()?;
        if cell.refs > 1 {
            cell.refs -= 1;
            return None;
        }
        let cell = slot.cell.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        self.live -= 1;
        self.used = self.used.saturating_sub(cell.size);
        Some(cell)
    }

    /// Account `bytes` of growth to a live cell.
    pub fn charge(&mut self, id: ObjectId, bytes: usize) {
        if let Some(cell) = self.get_mut(id) {
            cell.size += bytes;
            self.used += bytes;
        }
    }

    pub fn live(&self) -> usize {
        self.live
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain() -> CellKind {
        CellKind::Object(ObjectData::new(ObjectClass::Plain))
    }

    #[test]
    fn test_slot_reuse_bumps_generation() {
        let mut table = CellTable::default();
        let first = table.insert(plain());
        assert!(table.decref(first).is_some());

        let second = table.insert(plain());
        assert_eq!(first.index, second.index);
        assert_ne!(first.generation, second.generation);
        assert!(table.get(first).is_none());
        assert!(table.get(second).is_some());
    }

    #[test]
    fn test_decref_counts_down() {
        let mut table = CellTable::default();
        let id = table.insert(plain());
        table.incref(RawValue::Ref(id));
        assert!(table.decref(id).is_none());
        assert_eq!(table.live(), 1);
        assert!(table.decref(id).is_some());
        assert_eq!(table.live(), 0);
        assert_eq!(table.used, 0);
    }

    #[test]
    fn test_limit_accounting() {
        let mut table = CellTable {
            limit: Some(CELL_OVERHEAD + 10),
            ..Default::default()
        };
        assert!(!table.would_exceed(CELL_OVERHEAD));
        table.insert(CellKind::Str(Rc::from("abc")));
        assert!(table.would_exceed(CELL_OVERHEAD));
        assert!(!table.would_exceed(7));
    }
}
