// Copyright 2023 Simo Sorce
// See LICENSE.txt file for terms

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::config;
use crate::error::Result;
use crate::misc::poisoned;
use crate::pkcs11::*;
use crate::session::Session;
use crate::storage;
use crate::token::Token;

use log::debug;

const DEFAULT_DBTYPE: &str = "memory";

/// A slot serializes access to its token with a read/write lock and
/// keeps the sessions opened on it, each behind its own lock.
///
/// Locks are always taken in the order session, then token.
#[derive(Debug)]
pub struct Slot {
    description: String,
    token: RwLock<Token>,
    sessions: HashMap<CK_SESSION_HANDLE, RwLock<Session>>,
}

impl Slot {
    pub fn new(config: &config::Slot) -> Result<Slot> {
        let dbtype = match config.dbtype {
            Some(ref t) => t.as_str(),
            None => DEFAULT_DBTYPE,
        };
        debug!("Opening slot {} with {} storage", config.slot, dbtype);
        let storage = storage::new_storage(dbtype, &config.dbpath)?;
        Ok(Slot {
            description: match config.description {
                Some(ref d) => d.clone(),
                None => format!("Slot {}", config.slot),
            },
            token: RwLock::new(Token::new(storage)?),
            sessions: HashMap::new(),
        })
    }

    /// Builds a slot around an already constructed token
    pub fn with_token(description: &str, token: Token) -> Slot {
        Slot {
            description: description.to_string(),
            token: RwLock::new(token),
            sessions: HashMap::new(),
        }
    }

    pub fn get_description(&self) -> &str {
        &self.description
    }

    pub fn get_token(&self) -> Result<RwLockReadGuard<'_, Token>> {
        self.token.read().map_err(poisoned)
    }

    pub fn get_token_mut(&self) -> Result<RwLockWriteGuard<'_, Token>> {
        self.token.write().map_err(poisoned)
    }

    pub fn add_session(&mut self, handle: CK_SESSION_HANDLE, session: Session) {
        self.sessions.insert(handle, RwLock::new(session));
    }

    /// Removes a session, releasing its objects and search state
    pub fn drop_session(&mut self, handle: CK_SESSION_HANDLE) -> Result<()> {
        match self.sessions.remove(&handle) {
            Some(lock) => {
                lock.into_inner().map_err(poisoned)?.close();
                Ok(())
            }
            None => Err(CKR_SESSION_HANDLE_INVALID)?,
        }
    }

    pub fn get_session(
        &self,
        handle: CK_SESSION_HANDLE,
    ) -> Result<RwLockReadGuard<'_, Session>> {
        match self.sessions.get(&handle) {
            Some(s) => s.read().map_err(poisoned),
            None => Err(CKR_SESSION_HANDLE_INVALID)?,
        }
    }

    pub fn get_session_mut(
        &self,
        handle: CK_SESSION_HANDLE,
    ) -> Result<RwLockWriteGuard<'_, Session>> {
        match self.sessions.get(&handle) {
            Some(s) => s.write().map_err(poisoned),
            None => Err(CKR_SESSION_HANDLE_INVALID)?,
        }
    }

    pub fn has_sessions(&self) -> bool {
        !self.sessions.is_empty()
    }

    pub fn has_ro_sessions(&self) -> Result<bool> {
        for lock in self.sessions.values() {
            if !lock.read().map_err(poisoned)?.is_writable() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Locks every session of the slot for writing, in handle order
    pub fn lock_sessions(&self) -> Result<Vec<RwLockWriteGuard<'_, Session>>> {
        let mut handles: Vec<&CK_SESSION_HANDLE> = self.sessions.keys().collect();
        handles.sort_unstable();
        let mut guards = Vec::with_capacity(handles.len());
        for h in handles {
            if let Some(lock) = self.sessions.get(h) {
                guards.push(lock.write().map_err(poisoned)?);
            }
        }
        Ok(guards)
    }
}
