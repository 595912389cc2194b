// Copyright 2024 Simo Sorce
// See LICENSE.txt file for terms

use crate::error::Result;
use crate::object::Object;
use crate::pkcs11::*;
use crate::pool::{ObjectPool, PoolKind};
use crate::storage::{Storage, StorageDBInfo};

use log::{debug, error};

mod objects {
    include!("json_objects.rs");
}
use objects::*;

/// Persists token objects in a JSON file, one section per token pool
#[derive(Debug)]
pub struct JsonStorage {
    filename: String,
    cache: JsonObjects,
}

impl Storage for JsonStorage {
    fn open(&mut self) -> Result<Vec<Object>> {
        self.cache = JsonObjects::load(&self.filename)?;
        debug!(
            "Loaded {} public and {} private objects from {}",
            self.cache.public.len(),
            self.cache.private.len(),
            self.filename
        );
        self.cache.objects()
    }

    fn flush(&mut self, pool: &ObjectPool) -> Result<()> {
        let section = match pool.kind() {
            PoolKind::Public => &mut self.cache.public,
            PoolKind::Private => &mut self.cache.private,
            PoolKind::Session => return Err(CKR_GENERAL_ERROR)?,
        };
        let previous = std::mem::replace(section, JsonObjects::from_pool(pool));
        if let Err(e) = self.cache.save(&self.filename) {
            error!("Failed to write {}: {}", self.filename, e);
            match pool.kind() {
                PoolKind::Public => self.cache.public = previous,
                _ => self.cache.private = previous,
            }
            return Err(e);
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct JsonDBInfo {
    db_type: &'static str,
}

impl StorageDBInfo for JsonDBInfo {
    fn new(&self, conf: &Option<String>) -> Result<Box<dyn Storage>> {
        let filename = match conf {
            Some(s) => s.clone(),
            None => return Err(CKR_TOKEN_NOT_RECOGNIZED)?,
        };
        Ok(Box::new(JsonStorage {
            filename: filename,
            cache: JsonObjects::default(),
        }))
    }

    fn dbtype(&self) -> &str {
        self.db_type
    }
}

pub static DBINFO: JsonDBInfo = JsonDBInfo { db_type: "json" };
