use std::collections::HashMap;

use super::value::StackValue;
use super::VmError;

/// One array object. Its length is fixed at allocation.
#[derive(Debug, Clone)]
pub struct HeapObject {
    pub elements: Vec<StackValue>,
    marked: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcStats {
    pub collections: usize,
    pub freed: usize,
}

/// Array storage keyed by synthetic ids, reclaimed by mark-sweep.
#[derive(Default)]
pub struct Heap {
    objects: HashMap<String, HeapObject>,
    next_id: u64,
    stats: GcStats,
}

impl Heap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `elements` as a new object and return its id. Ids are never reused.
    pub fn allocate(&mut self, elements: Vec<StackValue>) -> String {
        let id = format!("array_{}", self.next_id);
        self.next_id += 1;
        self.objects.insert(id.clone(), HeapObject { elements, marked: false });
        id
    }

    pub fn get(&self, id: &str) -> Result<&HeapObject, VmError> {
        self.objects
            .get(id)
            .ok_or_else(|| VmError::DanglingReference { id: id.to_string() })
    }

    pub fn read(&self, id: &str, index: i64) -> Result<StackValue, VmError> {
        let obj = self.get(id)?;
        let slot = checked_index(index, obj.elements.len())?;
        Ok(obj.elements[slot].clone())
    }

    pub fn write(&mut self, id: &str, index: i64, value: StackValue) -> Result<(), VmError> {
        let obj = self
            .objects
            .get_mut(id)
            .ok_or_else(|| VmError::DanglingReference { id: id.to_string() })?;
        let slot = checked_index(index, obj.elements.len())?;
        obj.elements[slot] = value;
        Ok(())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.objects.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn stats(&self) -> GcStats {
        self.stats
    }

    /// Mark the object a root points at. Elements are not traversed, so an
    /// array reachable only through another array stays unmarked.
    fn mark(&mut self, value: &StackValue) {
        if let StackValue::ArrayRef(id) = value {
            if let Some(obj) = self.objects.get_mut(id) {
                obj.marked = true;
            }
        }
    }

    /// Remove unmarked objects and clear the mark on survivors.
    fn sweep(&mut self) -> usize {
        let before = self.objects.len();
        self.objects.retain(|_, obj| std::mem::replace(&mut obj.marked, false));
        before - self.objects.len()
    }

    /// Run one mark-sweep cycle over `roots`. Returns the number of objects freed.
    pub fn collect<'a>(&mut self, roots: impl IntoIterator<Item = &'a StackValue>) -> usize {
        for root in roots {
            self.mark(root);
        }
        let freed = self.sweep();
        self.stats.collections += 1;
        self.stats.freed += freed;
        log::debug!("gc: freed {} array(s), {} live", freed, self.objects.len());
        freed
    }
}

fn checked_index(index: i64, len: usize) -> Result<usize, VmError> {
    usize::try_from(index)
        .ok()
        .filter(|&i| i < len)
        .ok_or(VmError::Bounds { index, len })
}
