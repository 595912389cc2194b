// Copyright 2024 Simo Sorce
// See LICENSE.txt file for terms

//! This module defines the persistence interface (`Storage` trait) used by
//! tokens to make their objects durable, and helpers for discovering and
//! instantiating the available backends (memory, JSON file).

use std::fmt::Debug;

use crate::error::Result;
use crate::object::Object;
use crate::pkcs11::*;
use crate::pool::ObjectPool;

use once_cell::sync::Lazy;

/// Describes a storage backend that can be selected by name in the
/// slot configuration. Backends export one static `DBINFO` each.
pub trait StorageDBInfo: Debug + Send + Sync {
    /// Instantiates the backend, `conf` is the slot `dbpath` setting
    fn new(&self, conf: &Option<String>) -> Result<Box<dyn Storage>>;
    /// The name used as `dbtype` in the configuration
    fn dbtype(&self) -> &str;
}

/// The interface of persistent storage backends.
pub trait Storage: Debug + Send + Sync {
    /// Opens the storage backend and returns the persisted token objects.
    /// Returned objects carry no handle.
    fn open(&mut self) -> Result<Vec<Object>>;
    /// Durably replaces the persisted contents of one token pool (public
    /// or private) with the current contents of `pool`.
    ///
    /// A failure leaves the previously persisted contents in place and is
    /// never retried by the caller.
    fn flush(&mut self, pool: &ObjectPool) -> Result<()>;
}

pub mod format;

#[cfg(feature = "jsondb")]
pub mod json;

#[cfg(feature = "memorydb")]
pub mod memory;

/* backends compiled in, in lookup order */
static STORAGE_DBS: Lazy<Vec<&'static dyn StorageDBInfo>> = Lazy::new(|| {
    let mut v = Vec::<&'static dyn StorageDBInfo>::with_capacity(2);

    #[cfg(feature = "memorydb")]
    v.push(&memory::DBINFO);

    #[cfg(feature = "jsondb")]
    v.push(&json::DBINFO);

    v
});

/// Instantiates the backend registered as `name`, unknown names give
/// CKR_TOKEN_NOT_RECOGNIZED
pub fn new_storage(
    name: &str,
    conf: &Option<String>,
) -> Result<Box<dyn Storage>> {
    match STORAGE_DBS.iter().find(|db| db.dbtype() == name) {
        Some(db) => db.new(conf),
        None => Err(CKR_TOKEN_NOT_RECOGNIZED)?,
    }
}
