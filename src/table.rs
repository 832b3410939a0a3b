// src/table.rs

//! The per-epoll table of watched descriptors.

use crate::descriptor::DescriptorHandle;
use crate::watch::Watch;
use std::collections::HashMap;
use std::rc::Rc;

/// Maps descriptor handles to their watch records.
///
/// The table owns its watches and a handle appears at most once. Removal
/// only drops the table's reference; a sweep that still holds one keeps
/// the watch alive until it finishes (lazy deletion, gated by the
/// `WATCHING` flag).
#[derive(Default)]
pub(crate) struct WatchTable {
    watches: HashMap<DescriptorHandle, Rc<Watch>>,
}

impl WatchTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn get(&self, handle: DescriptorHandle) -> Option<&Rc<Watch>> {
        self.watches.get(&handle)
    }

    pub(crate) fn insert(&mut self, handle: DescriptorHandle, watch: Rc<Watch>) {
        let previous = self.watches.insert(handle, watch);
        debug_assert!(
            previous.is_none(),
            "duplicate watch inserted for descriptor {handle}"
        );
    }

    pub(crate) fn remove(&mut self, handle: DescriptorHandle) -> Option<Rc<Watch>> {
        self.watches.remove(&handle)
    }

    /// Iterate over all watches. Order is unspecified but stable while
    /// the table is not mutated.
    pub(crate) fn iter(&self) -> impl Iterator<Item = &Rc<Watch>> {
        self.watches.values()
    }

    pub(crate) fn clear(&mut self) {
        self.watches.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.watches.len()
    }
}
