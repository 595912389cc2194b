// Copyright 2023 Simo Sorce
// See LICENSE.txt file for terms

//! The token owns the persistent object pools of a slot and implements
//! the object operations: creation, destruction, attribute reads and
//! writes (including private re-classification), size queries and the
//! search protocol. Every operation receives the calling session
//! explicitly; the session supplies the authentication state, the
//! transient object pool and the search slot.

use crate::attribute::{AttrRequest, Attribute};
use crate::error::{Error, Result};
use crate::misc::ulong_len;
use crate::object::{OAFlags, Object, ObjectFactories};
use crate::pkcs11::vendor::P11C_UNSPEC;
use crate::pkcs11::*;
use crate::pool::{HandleAllocator, ObjectPool, PoolKind};
use crate::search::{SearchContext, SearchFilter};
use crate::session::Session;
use crate::storage::format::serialized_len;
use crate::storage::Storage;

use log::{debug, error, warn};

/// Where a handle was resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Location {
    Session,
    Public,
    Private,
}

/// Outcome of validating a write template against an object
#[derive(Debug, Default)]
struct WritePlan {
    changes: Vec<(CK_ATTRIBUTE_TYPE, Vec<u8>)>,
    make_private: bool,
}

#[derive(Debug)]
pub struct Token {
    storage: Box<dyn Storage>,
    factories: ObjectFactories,
    handles: HandleAllocator,
    public: ObjectPool,
    private: ObjectPool,
    logged: CK_USER_TYPE,
}

impl Token {
    /// Creates a token on top of a storage backend, loading the objects
    /// it already holds
    pub fn new(storage: Box<dyn Storage>) -> Result<Token> {
        let mut token = Token {
            storage: storage,
            factories: ObjectFactories::default(),
            handles: HandleAllocator::default(),
            public: ObjectPool::new(PoolKind::Public),
            private: ObjectPool::new(PoolKind::Private),
            logged: P11C_UNSPEC,
        };
        token.load()?;
        Ok(token)
    }

    fn load(&mut self) -> Result<()> {
        for mut obj in self.storage.open()? {
            if !obj.is_token() {
                warn!("Skipping stored object without CKA_TOKEN set");
                continue;
            }
            obj.set_handle(self.handles.next()?);
            if obj.is_private() {
                self.private.add(obj)?;
            } else {
                self.public.add(obj)?;
            }
        }
        debug!(
            "Token loaded with {} public and {} private objects",
            self.public.len(),
            self.private.len()
        );
        Ok(())
    }

    pub fn is_logged_in(&self, user_type: CK_USER_TYPE) -> bool {
        match user_type {
            CKU_SO | CKU_USER => self.logged == user_type,
            P11C_UNSPEC => self.logged != P11C_UNSPEC,
            _ => false,
        }
    }

    /// Records the outcome of an authentication for the token.
    ///
    /// PIN verification is done by the caller, this only tracks which
    /// user is logged in so that sessions can be moved to the right state.
    pub fn login(&mut self, user_type: CK_USER_TYPE) -> CK_RV {
        match user_type {
            CKU_SO | CKU_USER => (),
            _ => return CKR_USER_TYPE_INVALID,
        }
        if self.logged == user_type {
            return CKR_USER_ALREADY_LOGGED_IN;
        }
        if self.logged != P11C_UNSPEC {
            return CKR_USER_ANOTHER_ALREADY_LOGGED_IN;
        }
        self.logged = user_type;
        CKR_OK
    }

    pub fn logout(&mut self) -> CK_RV {
        if self.logged == P11C_UNSPEC {
            return CKR_USER_NOT_LOGGED_IN;
        }
        self.logged = P11C_UNSPEC;
        CKR_OK
    }

    fn pool(&self, loc: Location) -> Option<&ObjectPool> {
        match loc {
            Location::Session => None,
            Location::Public => Some(&self.public),
            Location::Private => Some(&self.private),
        }
    }

    /// Resolves a handle for a session: session objects first, then
    /// public token objects, then private token objects for a read-write
    /// session with the user logged in
    fn locate(&self, s: &Session, handle: CK_OBJECT_HANDLE) -> Result<Location> {
        if s.objects().contains(handle) {
            Ok(Location::Session)
        } else if self.public.contains(handle) {
            Ok(Location::Public)
        } else if s.is_rw_user() && self.private.contains(handle) {
            Ok(Location::Private)
        } else {
            Err(CKR_OBJECT_HANDLE_INVALID)?
        }
    }

    fn object<'a>(
        &'a self,
        s: &'a Session,
        handle: CK_OBJECT_HANDLE,
    ) -> Result<&'a Object> {
        let obj = match self.locate(s, handle)? {
            Location::Session => s.objects().get(handle),
            loc => self.pool(loc).and_then(|p| p.get(handle)),
        };
        match obj {
            Some(o) => Ok(o),
            None => Err(CKR_OBJECT_HANDLE_INVALID)?,
        }
    }

    fn is_visible(&self, s: &Session, handle: CK_OBJECT_HANDLE) -> bool {
        self.locate(s, handle).is_ok()
    }

    /// Flushes a token pool, mapping any storage error to
    /// CKR_FUNCTION_FAILED
    fn flush(&mut self, kind: PoolKind) -> Result<()> {
        let pool = match kind {
            PoolKind::Public => &mut self.public,
            PoolKind::Private => &mut self.private,
            PoolKind::Session => return Err(CKR_GENERAL_ERROR)?,
        };
        match self.storage.flush(pool) {
            Ok(()) => {
                pool.mark_clean();
                Ok(())
            }
            Err(e) => {
                error!("Failed to flush {:?} objects: {}", kind, e);
                Err(Error::ck_rv_from_error(CKR_FUNCTION_FAILED, e))
            }
        }
    }

    fn pool_mut(&mut self, kind: PoolKind) -> &mut ObjectPool {
        match kind {
            PoolKind::Private => &mut self.private,
            _ => &mut self.public,
        }
    }

    /// Validates a creation template and admits the new object.
    ///
    /// Token objects require a read-write session with the user logged
    /// in and are only admitted if the storage flush succeeds.
    pub fn create_object(
        &mut self,
        s: &mut Session,
        template: &[Attribute],
    ) -> Result<CK_OBJECT_HANDLE> {
        let mut obj = self.factories.create(template)?;

        if !obj.is_token() {
            obj.set_handle(self.handles.next()?);
            let handle = s.objects_mut().add(obj)?;
            debug!("Created session object {}", handle);
            return Ok(handle);
        }

        if !s.is_rw_user() {
            debug!("Token object creation refused, session is not RW user");
            return Err(CKR_SESSION_READ_ONLY)?;
        }
        let kind = if obj.is_private() {
            PoolKind::Private
        } else {
            PoolKind::Public
        };
        obj.set_handle(self.handles.next()?);
        obj.set_dirty(true);
        let handle = self.pool_mut(kind).add(obj)?;
        if let Err(e) = self.flush(kind) {
            warn!("Rolling back creation of object {}", handle);
            drop(self.pool_mut(kind).remove(handle));
            return Err(e);
        }
        debug!("Created {:?} token object {}", kind, handle);
        Ok(handle)
    }

    /// Destroys an object, token objects are removed only if the flush
    /// of their pool succeeds
    pub fn destroy_object(
        &mut self,
        s: &mut Session,
        handle: CK_OBJECT_HANDLE,
    ) -> Result<()> {
        let kind = match self.locate(s, handle)? {
            Location::Session => {
                drop(s.objects_mut().remove(handle));
                debug!("Destroyed session object {}", handle);
                return Ok(());
            }
            Location::Public => PoolKind::Public,
            Location::Private => PoolKind::Private,
        };
        if !s.is_writable() {
            return Err(CKR_SESSION_READ_ONLY)?;
        }
        let obj = match self.pool_mut(kind).remove(handle) {
            Some(o) => o,
            None => return Err(CKR_OBJECT_HANDLE_INVALID)?,
        };
        if let Err(e) = self.flush(kind) {
            warn!("Restoring object {} after failed destroy", handle);
            self.pool_mut(kind).add(obj)?;
            return Err(e);
        }
        debug!("Destroyed {:?} token object {}", kind, handle);
        Ok(())
    }

    /// Reads attribute values into the caller's request slots.
    ///
    /// Every slot gets an outcome; the returned error, if any, is the
    /// last failure encountered across the batch.
    pub fn get_object_attrs(
        &self,
        s: &Session,
        handle: CK_OBJECT_HANDLE,
        requests: &mut [AttrRequest],
    ) -> Result<()> {
        let obj = self.object(s, handle)?;
        let mut result = CKR_OK;
        for req in requests.iter_mut() {
            let attr = match obj.attributes().find(req.type_) {
                Ok(a) => a,
                Err(_) => {
                    req.len = CK_UNAVAILABLE_INFORMATION;
                    result = CKR_ATTRIBUTE_TYPE_INVALID;
                    continue;
                }
            };
            if req.type_ == CKA_VALUE && obj.is_sensitive() {
                req.len = CK_UNAVAILABLE_INFORMATION;
                result = CKR_ATTRIBUTE_SENSITIVE;
                continue;
            }
            let val = attr.get_value();
            req.len = ulong_len(val.len())?;
            match req.value {
                None => (),
                Some(ref mut buf) => {
                    if buf.len() < val.len() {
                        result = CKR_BUFFER_TOO_SMALL;
                    } else {
                        buf[..val.len()].copy_from_slice(val);
                    }
                }
            }
        }
        match result {
            CKR_OK => Ok(()),
            rv => Err(rv)?,
        }
    }

    /// Checks a write template against an object without changing it
    fn plan_write(&self, obj: &Object, template: &[Attribute]) -> Result<WritePlan> {
        let factory = self.factories.get_obj_factory(obj)?;
        let mut plan = WritePlan::default();
        for (i, tattr) in template.iter().enumerate() {
            let ck_type = tattr.get_type();
            if template[..i].iter().any(|a| a.get_type() == ck_type) {
                return Err(CKR_TEMPLATE_INCONSISTENT)?;
            }
            let current = match obj.attributes().find(ck_type) {
                Ok(a) => a,
                Err(_) => return Err(CKR_TEMPLATE_INCOMPLETE)?,
            };
            let value = tattr.get_value();
            let typed = Attribute::from_attr_slice(
                ck_type,
                current.get_attrtype(),
                value,
            );
            if typed.check_value().is_err() {
                return Err(CKR_TEMPLATE_INCONSISTENT)?;
            }
            let unchanged = current.match_attr(&typed);
            if let Some(entry) = factory.find_entry(ck_type) {
                if entry.is(OAFlags::ChangeToTrue) {
                    if !unchanged && !typed.to_bool()? {
                        return Err(CKR_TEMPLATE_INCONSISTENT)?;
                    }
                    if !unchanged && ck_type == CKA_PRIVATE {
                        plan.make_private = true;
                        continue;
                    }
                } else if entry.is(OAFlags::Unchangeable) && !unchanged {
                    return Err(CKR_TEMPLATE_INCONSISTENT)?;
                }
            }
            plan.changes.push((ck_type, value.to_vec()));
        }
        Ok(plan)
    }

    fn apply_write(obj: &mut Object, plan: &WritePlan) -> Result<()> {
        for (ck_type, value) in &plan.changes {
            obj.replace_attr(*ck_type, value)?;
        }
        if plan.make_private {
            obj.make_private()?;
        }
        obj.refresh_flags();
        Ok(())
    }

    /// Writes attribute values on an existing object.
    ///
    /// The whole template is validated before anything is changed. For
    /// token objects the change is staged on a copy and committed only
    /// once the storage flush succeeds, turning a public object private
    /// moves it to the private pool with the same handle.
    pub fn set_object_attrs(
        &mut self,
        s: &mut Session,
        handle: CK_OBJECT_HANDLE,
        template: &[Attribute],
    ) -> Result<()> {
        let loc = if s.objects().contains(handle) {
            Location::Session
        } else if s.is_rw_user() && self.public.contains(handle) {
            Location::Public
        } else if s.is_rw_user() && self.private.contains(handle) {
            Location::Private
        } else {
            return Err(CKR_OBJECT_HANDLE_INVALID)?;
        };

        if loc == Location::Session {
            let plan = match s.objects().get(handle) {
                Some(obj) => self.plan_write(obj, template)?,
                None => return Err(CKR_OBJECT_HANDLE_INVALID)?,
            };
            if let Some(obj) = s.objects_mut().get_mut(handle) {
                Self::apply_write(obj, &plan)?;
                /* session objects are never flushed */
                obj.set_dirty(false);
            }
            return Ok(());
        }

        let kind = match loc {
            Location::Private => PoolKind::Private,
            _ => PoolKind::Public,
        };
        let mut staged = match self.pool_mut(kind).get(handle) {
            Some(obj) => obj.clone(),
            None => return Err(CKR_OBJECT_HANDLE_INVALID)?,
        };
        let plan = self.plan_write(&staged, template)?;
        Self::apply_write(&mut staged, &plan)?;

        let target = if staged.is_private() {
            PoolKind::Private
        } else {
            PoolKind::Public
        };
        let original = match self.pool_mut(kind).remove(handle) {
            Some(o) => o,
            None => return Err(CKR_OBJECT_HANDLE_INVALID)?,
        };
        self.pool_mut(target).add(staged)?;

        let mut result = self.flush(target);
        if result.is_ok() && target != kind {
            debug!("Moving object {} to the private pool", handle);
            result = self.flush(kind);
        }
        if let Err(e) = result {
            warn!("Rolling back attribute change on object {}", handle);
            drop(self.pool_mut(target).remove(handle));
            self.pool_mut(kind).add(original)?;
            if target != kind {
                /* best effort, the private pool may already be durable */
                if let Err(re) = self.flush(target) {
                    error!("Failed to restore storage state: {}", re);
                }
            }
            return Err(e);
        }
        Ok(())
    }

    /// Returns the size of the flat serialization of an object
    pub fn get_object_size(
        &self,
        s: &Session,
        handle: CK_OBJECT_HANDLE,
    ) -> Result<usize> {
        Ok(serialized_len(self.object(s, handle)?))
    }

    /// Object copy is not supported
    pub fn copy_object(
        &mut self,
        _s: &mut Session,
        _handle: CK_OBJECT_HANDLE,
        _template: &[Attribute],
    ) -> Result<CK_OBJECT_HANDLE> {
        Err(CKR_FUNCTION_NOT_SUPPORTED)?
    }

    /// Snapshots the visible objects matching the template into the
    /// session search slot, replacing any previous search
    pub fn find_objects_init(
        &self,
        s: &mut Session,
        template: &[Attribute],
    ) -> Result<()> {
        let filter = SearchFilter::from_template(template)?;
        if let SearchFilter::Label(ref l) = filter {
            debug!("Searching objects with label {}", hex::encode(l));
        }
        let mut matches = Vec::new();
        let mut collect = |pool: &ObjectPool| {
            for obj in pool.iter() {
                if filter.matches(obj) {
                    matches.push(obj.get_handle());
                }
            }
        };
        collect(s.objects());
        collect(&self.public);
        if s.is_rw_user() {
            collect(&self.private);
        }
        debug!("Search initialized with {} matches", matches.len());
        s.set_search(SearchContext::new(matches));
        Ok(())
    }

    /// Returns up to `max` handles from the session search, zero once
    /// the search is exhausted or if no search was initialized
    pub fn find_objects(
        &self,
        s: &mut Session,
        max: usize,
    ) -> Result<Vec<CK_OBJECT_HANDLE>> {
        let mut search = std::mem::take(s.search_mut());
        let handles = search.next(max, |h| self.is_visible(s, h));
        *s.search_mut() = search;
        Ok(handles)
    }

    pub fn find_objects_final(&self, s: &mut Session) -> Result<()> {
        s.search_mut().finalize();
        Ok(())
    }
}
