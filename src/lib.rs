// Copyright 2023 Simo Sorce
// See LICENSE.txt file for terms

#![warn(missing_docs)]

//! This is p11core
//!
//! The object and attribute management core of a PKCS#11 token provider:
//! attribute storage, schema driven object creation, public/private/session
//! object pools, attribute reads and transactional writes, and the object
//! search protocol.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[allow(missing_docs)]
pub mod pkcs11;

#[allow(missing_docs)]
pub mod attribute;
#[allow(missing_docs)]
pub mod config;
#[allow(missing_docs)]
pub mod error;
/// Logger initialization
pub mod log;
#[allow(missing_docs)]
pub mod misc;
#[allow(missing_docs)]
pub mod object;
#[allow(missing_docs)]
pub mod pool;
#[allow(missing_docs)]
pub mod search;
#[allow(missing_docs)]
pub mod session;
#[allow(missing_docs)]
pub mod slot;
#[allow(missing_docs)]
pub mod storage;
#[allow(missing_docs)]
pub mod token;

use attribute::{AttrRequest, Attribute};
use config::Config;
use error::Result;
use misc::{poisoned, ulong_len};
use pkcs11::vendor::P11C_UNSPEC;
use pkcs11::*;
use session::Session;
use slot::Slot;
use token::Token;

struct State {
    slots: HashMap<CK_SLOT_ID, Slot>,
    sessionmap: HashMap<CK_SESSION_HANDLE, CK_SLOT_ID>,
    next_handle: CK_ULONG,
}

impl State {
    fn get_slot(&self, slot_id: CK_SLOT_ID) -> Result<&Slot> {
        match self.slots.get(&slot_id) {
            Some(s) => Ok(s),
            None => Err(CKR_SLOT_ID_INVALID)?,
        }
    }

    fn get_slot_mut(&mut self, slot_id: CK_SLOT_ID) -> Result<&mut Slot> {
        match self.slots.get_mut(&slot_id) {
            Some(s) => Ok(s),
            None => Err(CKR_SLOT_ID_INVALID)?,
        }
    }

    fn get_slots_ids(&self) -> Vec<CK_SLOT_ID> {
        let mut slotids: Vec<CK_SLOT_ID> = self.slots.keys().copied().collect();
        slotids.sort_unstable();
        slotids
    }

    fn slot_of(&self, handle: CK_SESSION_HANDLE) -> Result<CK_SLOT_ID> {
        match self.sessionmap.get(&handle) {
            Some(s) => Ok(*s),
            None => Err(CKR_SESSION_HANDLE_INVALID)?,
        }
    }

    fn get_session(
        &self,
        handle: CK_SESSION_HANDLE,
    ) -> Result<RwLockReadGuard<'_, Session>> {
        self.get_slot(self.slot_of(handle)?)?.get_session(handle)
    }

    fn get_session_mut(
        &self,
        handle: CK_SESSION_HANDLE,
    ) -> Result<RwLockWriteGuard<'_, Session>> {
        self.get_slot(self.slot_of(handle)?)?.get_session_mut(handle)
    }

    fn get_token_from_slot(
        &self,
        slot_id: CK_SLOT_ID,
    ) -> Result<RwLockReadGuard<'_, Token>> {
        self.get_slot(slot_id)?.get_token()
    }

    fn get_token_from_slot_mut(
        &self,
        slot_id: CK_SLOT_ID,
    ) -> Result<RwLockWriteGuard<'_, Token>> {
        self.get_slot(slot_id)?.get_token_mut()
    }

    fn new_session(
        &mut self,
        slot_id: CK_SLOT_ID,
        user_type: CK_USER_TYPE,
        flags: CK_FLAGS,
    ) -> Result<CK_SESSION_HANDLE> {
        let handle = self.next_handle;
        let mut session = Session::new(slot_id, handle, flags)?;
        match session.change_session_state(user_type) {
            CKR_OK => (),
            err => return Err(err)?,
        }
        self.get_slot_mut(slot_id)?.add_session(handle, session);
        self.sessionmap.insert(handle, slot_id);
        self.next_handle += 1;
        Ok(handle)
    }

    fn drop_session(&mut self, handle: CK_SESSION_HANDLE) -> Result<()> {
        let slot_id = self.slot_of(handle)?;
        self.get_slot_mut(slot_id)?.drop_session(handle)?;
        self.sessionmap.remove(&handle);
        /* closing the last session logs the token out */
        let slot = self.get_slot(slot_id)?;
        if !slot.has_sessions() {
            slot.get_token_mut()?.logout();
        }
        Ok(())
    }
}

/// The provider context.
///
/// Maps slot ids to slots and session handles to the slot they were
/// opened on. All object operations go through a session handle; the
/// state lock is held for reading while a session and then its token are
/// locked, opening and closing sessions takes it for writing.
pub struct Provider {
    state: RwLock<State>,
}

impl Default for Provider {
    fn default() -> Self {
        Self::new()
    }
}

impl Provider {
    /// Creates an empty provider with no slots
    pub fn new() -> Provider {
        Provider {
            state: RwLock::new(State {
                slots: HashMap::new(),
                sessionmap: HashMap::new(),
                next_handle: 1,
            }),
        }
    }

    /// Builds a provider with one slot per configuration entry
    pub fn from_config(config: &Config) -> Result<Provider> {
        let provider = Provider::new();
        for conf in &config.slots {
            provider.add_slot(CK_SLOT_ID::from(conf.slot), Slot::new(conf)?)?;
        }
        Ok(provider)
    }

    /// Initializes logging from the environment and builds a provider
    /// from the default configuration file
    pub fn initialize() -> Result<Provider> {
        crate::log::init();
        Self::from_config(&Config::default_config()?)
    }

    /// Registers a slot, slot ids must be unique
    pub fn add_slot(&self, slot_id: CK_SLOT_ID, slot: Slot) -> Result<()> {
        let mut wstate = self.state.write().map_err(poisoned)?;
        if wstate.slots.contains_key(&slot_id) {
            return Err(CKR_SLOT_ID_INVALID)?;
        }
        ::log::debug!("Adding slot {}: {}", slot_id, slot.get_description());
        wstate.slots.insert(slot_id, slot);
        Ok(())
    }

    /// Returns the ids of the configured slots in ascending order
    pub fn get_slot_ids(&self) -> Result<Vec<CK_SLOT_ID>> {
        Ok(self.state.read().map_err(poisoned)?.get_slots_ids())
    }

    /// Opens a session on a slot.
    ///
    /// The new session starts in the state matching the user currently
    /// logged into the token.
    pub fn open_session(
        &self,
        slot_id: CK_SLOT_ID,
        flags: CK_FLAGS,
    ) -> Result<CK_SESSION_HANDLE> {
        let mut wstate = self.state.write().map_err(poisoned)?;
        let token = wstate.get_token_from_slot(slot_id)?;
        let mut user_type = P11C_UNSPEC;
        if token.is_logged_in(CKU_SO) {
            if flags & CKF_RW_SESSION == 0 {
                return Err(CKR_SESSION_READ_WRITE_SO_EXISTS)?;
            }
            user_type = CKU_SO;
        } else if token.is_logged_in(CKU_USER) {
            user_type = CKU_USER;
        }
        drop(token);
        wstate.new_session(slot_id, user_type, flags)
    }

    /// Closes a session, releasing its objects and search
    pub fn close_session(&self, s_handle: CK_SESSION_HANDLE) -> Result<()> {
        let mut wstate = self.state.write().map_err(poisoned)?;
        wstate.drop_session(s_handle)
    }

    /// Closes every session of a slot and logs the token out
    pub fn close_all_sessions(&self, slot_id: CK_SLOT_ID) -> Result<()> {
        let mut wstate = self.state.write().map_err(poisoned)?;
        wstate.get_slot(slot_id)?;
        let handles: Vec<CK_SESSION_HANDLE> = wstate
            .sessionmap
            .iter()
            .filter(|(_, s)| **s == slot_id)
            .map(|(h, _)| *h)
            .collect();
        for handle in handles {
            wstate.drop_session(handle)?;
        }
        wstate.get_token_from_slot_mut(slot_id)?.logout();
        Ok(())
    }

    /// Returns the state of a session
    pub fn get_session_state(
        &self,
        s_handle: CK_SESSION_HANDLE,
    ) -> Result<CK_STATE> {
        let rstate = self.state.read().map_err(poisoned)?;
        let session = rstate.get_session(s_handle)?;
        Ok(session.get_state())
    }

    /// Records a successful authentication of `user_type` on the token
    /// of the session's slot and moves every session of the slot to the
    /// matching state.
    ///
    /// Verifying the credentials is the caller's business.
    pub fn login(
        &self,
        s_handle: CK_SESSION_HANDLE,
        user_type: CK_USER_TYPE,
    ) -> Result<()> {
        let rstate = self.state.read().map_err(poisoned)?;
        let slot_id = rstate.slot_of(s_handle)?;
        let slot = rstate.get_slot(slot_id)?;
        if user_type == CKU_SO && slot.has_ro_sessions()? {
            return Err(CKR_SESSION_READ_ONLY_EXISTS)?;
        }
        let mut sessions = slot.lock_sessions()?;
        let mut token = slot.get_token_mut()?;
        match token.login(user_type) {
            CKR_OK => (),
            err => return Err(err)?,
        }
        let mut result = CKR_OK;
        for session in sessions.iter_mut() {
            result = session.change_session_state(user_type);
            if result != CKR_OK {
                break;
            }
        }
        if result != CKR_OK {
            token.logout();
            for session in sessions.iter_mut() {
                session.change_session_state(P11C_UNSPEC);
            }
            return Err(result)?;
        }
        ::log::debug!("User {} logged into slot {}", user_type, slot_id);
        Ok(())
    }

    /// Logs the token out and returns every session of the slot to the
    /// public state
    pub fn logout(&self, s_handle: CK_SESSION_HANDLE) -> Result<()> {
        let rstate = self.state.read().map_err(poisoned)?;
        let slot = rstate.get_slot(rstate.slot_of(s_handle)?)?;
        let mut sessions = slot.lock_sessions()?;
        let mut token = slot.get_token_mut()?;
        match token.logout() {
            CKR_OK => (),
            err => return Err(err)?,
        }
        for session in sessions.iter_mut() {
            session.change_session_state(P11C_UNSPEC);
        }
        Ok(())
    }

    /// Creates an object from a template and returns its handle
    pub fn create_object(
        &self,
        s_handle: CK_SESSION_HANDLE,
        template: &[Attribute],
    ) -> Result<CK_OBJECT_HANDLE> {
        let rstate = self.state.read().map_err(poisoned)?;
        let mut session = rstate.get_session_mut(s_handle)?;
        let mut token = rstate.get_token_from_slot_mut(session.get_slot_id())?;
        token.create_object(&mut session, template)
    }

    /// Object copy is not supported by this provider
    pub fn copy_object(
        &self,
        s_handle: CK_SESSION_HANDLE,
        o_handle: CK_OBJECT_HANDLE,
        template: &[Attribute],
    ) -> Result<CK_OBJECT_HANDLE> {
        let rstate = self.state.read().map_err(poisoned)?;
        let mut session = rstate.get_session_mut(s_handle)?;
        let mut token = rstate.get_token_from_slot_mut(session.get_slot_id())?;
        token.copy_object(&mut session, o_handle, template)
    }

    /// Destroys an object
    pub fn destroy_object(
        &self,
        s_handle: CK_SESSION_HANDLE,
        o_handle: CK_OBJECT_HANDLE,
    ) -> Result<()> {
        let rstate = self.state.read().map_err(poisoned)?;
        let mut session = rstate.get_session_mut(s_handle)?;
        let mut token = rstate.get_token_from_slot_mut(session.get_slot_id())?;
        token.destroy_object(&mut session, o_handle)
    }

    /// Returns the storage size of an object
    pub fn get_object_size(
        &self,
        s_handle: CK_SESSION_HANDLE,
        o_handle: CK_OBJECT_HANDLE,
    ) -> Result<CK_ULONG> {
        let rstate = self.state.read().map_err(poisoned)?;
        let session = rstate.get_session(s_handle)?;
        let token = rstate.get_token_from_slot(session.get_slot_id())?;
        ulong_len(token.get_object_size(&session, o_handle)?)
    }

    /// Reads attribute values, see [Token::get_object_attrs]
    pub fn get_attribute_value(
        &self,
        s_handle: CK_SESSION_HANDLE,
        o_handle: CK_OBJECT_HANDLE,
        requests: &mut [AttrRequest],
    ) -> Result<()> {
        let rstate = self.state.read().map_err(poisoned)?;
        let session = rstate.get_session(s_handle)?;
        let token = rstate.get_token_from_slot(session.get_slot_id())?;
        token.get_object_attrs(&session, o_handle, requests)
    }

    /// Writes attribute values, see [Token::set_object_attrs]
    pub fn set_attribute_value(
        &self,
        s_handle: CK_SESSION_HANDLE,
        o_handle: CK_OBJECT_HANDLE,
        template: &[Attribute],
    ) -> Result<()> {
        let rstate = self.state.read().map_err(poisoned)?;
        let mut session = rstate.get_session_mut(s_handle)?;
        let mut token = rstate.get_token_from_slot_mut(session.get_slot_id())?;
        token.set_object_attrs(&mut session, o_handle, template)
    }

    /// Starts a search on the session
    pub fn find_objects_init(
        &self,
        s_handle: CK_SESSION_HANDLE,
        template: &[Attribute],
    ) -> Result<()> {
        let rstate = self.state.read().map_err(poisoned)?;
        let mut session = rstate.get_session_mut(s_handle)?;
        let token = rstate.get_token_from_slot(session.get_slot_id())?;
        token.find_objects_init(&mut session, template)
    }

    /// Returns up to `max` handles from the session's search
    pub fn find_objects(
        &self,
        s_handle: CK_SESSION_HANDLE,
        max: usize,
    ) -> Result<Vec<CK_OBJECT_HANDLE>> {
        let rstate = self.state.read().map_err(poisoned)?;
        let mut session = rstate.get_session_mut(s_handle)?;
        let token = rstate.get_token_from_slot(session.get_slot_id())?;
        token.find_objects(&mut session, max)
    }

    /// Ends the session's search
    pub fn find_objects_final(&self, s_handle: CK_SESSION_HANDLE) -> Result<()> {
        let rstate = self.state.read().map_err(poisoned)?;
        let mut session = rstate.get_session_mut(s_handle)?;
        let token = rstate.get_token_from_slot(session.get_slot_id())?;
        token.find_objects_final(&mut session)
    }
}

#[cfg(test)]
mod tests;
