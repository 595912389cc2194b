// Copyright 2024 Simo Sorce
// See LICENSE.txt file for terms

use crate::error::Result;
use crate::object::Object;
use crate::pkcs11::*;
use crate::pool::{ObjectPool, PoolKind};
use crate::storage::format::{deserialize_object, serialize_object};
use crate::storage::{Storage, StorageDBInfo};

/// Keeps the flat serialized form of each token pool in memory.
///
/// Nothing survives the process, but every flush goes through the same
/// encoding a durable backend would use.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    public: Vec<Vec<u8>>,
    private: Vec<Vec<u8>>,
}

fn serialize_pool(pool: &ObjectPool) -> Result<Vec<Vec<u8>>> {
    let mut out = Vec::with_capacity(pool.len());
    for obj in pool.iter() {
        out.push(serialize_object(obj)?);
    }
    Ok(out)
}

impl Storage for MemoryStorage {
    fn open(&mut self) -> Result<Vec<Object>> {
        let mut objects = Vec::with_capacity(self.public.len() + self.private.len());
        for data in self.public.iter().chain(self.private.iter()) {
            objects.push(deserialize_object(data)?);
        }
        Ok(objects)
    }

    fn flush(&mut self, pool: &ObjectPool) -> Result<()> {
        match pool.kind() {
            PoolKind::Public => self.public = serialize_pool(pool)?,
            PoolKind::Private => self.private = serialize_pool(pool)?,
            PoolKind::Session => return Err(CKR_GENERAL_ERROR)?,
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct MemoryDBInfo {
    db_type: &'static str,
}

impl StorageDBInfo for MemoryDBInfo {
    fn new(&self, _conf: &Option<String>) -> Result<Box<dyn Storage>> {
        Ok(Box::new(MemoryStorage::default()))
    }

    fn dbtype(&self) -> &str {
        self.db_type
    }
}

pub static DBINFO: MemoryDBInfo = MemoryDBInfo { db_type: "memory" };
