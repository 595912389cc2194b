// Copyright 2025 Simo Sorce
// See LICENSE.txt file for terms

//! Object pools and handle allocation.
//!
//! A pool owns the objects of one scope: the transient objects of a
//! session, or the public or private objects of a token. Handles are
//! allocated by a [HandleAllocator] shared by all pools of a slot so
//! that a handle names at most one reachable object.

use std::collections::btree_map;
use std::collections::BTreeMap;

use crate::error::Result;
use crate::object::Object;
use crate::pkcs11::*;

use log::trace;

/// The scope a pool belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolKind {
    Session,
    Public,
    Private,
}

/// Hands out object handles, never reusing a value
#[derive(Debug)]
pub struct HandleAllocator {
    next: CK_OBJECT_HANDLE,
}

impl Default for HandleAllocator {
    fn default() -> Self {
        HandleAllocator { next: 1 }
    }
}

impl HandleAllocator {
    pub fn next(&mut self) -> Result<CK_OBJECT_HANDLE> {
        if self.next == CK_UNAVAILABLE_INFORMATION {
            return Err(CKR_HOST_MEMORY)?;
        }
        let handle = self.next;
        self.next += 1;
        Ok(handle)
    }
}

#[derive(Debug)]
pub struct ObjectPool {
    kind: PoolKind,
    objects: BTreeMap<CK_OBJECT_HANDLE, Object>,
}

impl ObjectPool {
    pub fn new(kind: PoolKind) -> ObjectPool {
        ObjectPool {
            kind: kind,
            objects: BTreeMap::new(),
        }
    }

    pub fn kind(&self) -> PoolKind {
        self.kind
    }

    /// Admits an object that already carries a handle
    ///
    /// Fails with CKR_GENERAL_ERROR if the object has no handle or the
    /// handle is already used in this pool.
    pub fn add(&mut self, obj: Object) -> Result<CK_OBJECT_HANDLE> {
        let handle = obj.get_handle();
        if handle == CK_INVALID_HANDLE {
            return Err(CKR_GENERAL_ERROR)?;
        }
        match self.objects.entry(handle) {
            btree_map::Entry::Occupied(_) => Err(CKR_GENERAL_ERROR)?,
            btree_map::Entry::Vacant(v) => {
                trace!("Adding object {} to {:?} pool", handle, self.kind);
                v.insert(obj);
                Ok(handle)
            }
        }
    }

    /// Removes an object from the pool, returning ownership to the caller
    pub fn remove(&mut self, handle: CK_OBJECT_HANDLE) -> Option<Object> {
        self.objects.remove(&handle)
    }

    pub fn get(&self, handle: CK_OBJECT_HANDLE) -> Option<&Object> {
        self.objects.get(&handle)
    }

    pub fn get_mut(&mut self, handle: CK_OBJECT_HANDLE) -> Option<&mut Object> {
        self.objects.get_mut(&handle)
    }

    pub fn contains(&self, handle: CK_OBJECT_HANDLE) -> bool {
        self.objects.contains_key(&handle)
    }

    /// Enumerates the objects in handle order
    pub fn iter(&self) -> btree_map::Values<'_, CK_OBJECT_HANDLE, Object> {
        self.objects.values()
    }

    pub fn handles(&self) -> Vec<CK_OBJECT_HANDLE> {
        self.objects.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Clears the dirty flag of every object after a successful flush
    pub fn mark_clean(&mut self) {
        for obj in self.objects.values_mut() {
            obj.set_dirty(false);
        }
    }

    /// Releases every object of the pool
    pub fn clear(&mut self) {
        self.objects.clear();
    }
}
