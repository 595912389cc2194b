// Copyright 2023-2026 Simo Sorce
// See LICENSE.txt file for terms

//! This module defines the core representation of PKCS#11 objects
//! (`Object`) together with the pieces used to build them: the attribute
//! container ([store::AttributeStore]), the static schema levels and the
//! template validation ([schema]), the class specific builders
//! ([factory]) and the capabilities they attach ([capability::Capability]).

use std::fmt::Debug;

use crate::attribute::{AttrType, Attribute};
use crate::error::{Error, Result};
use crate::pkcs11::*;

pub mod capability;
pub mod factory;
pub mod schema;
pub mod store;

pub use capability::Capability;
pub use factory::{ObjectFactories, ObjectFactory};
pub use schema::{create_object, OAFlags, SchemaEntry};
pub use store::AttributeStore;

/// Helper macro that generates methods to check specific boolean
/// attributes on objects
macro_rules! create_bool_checker {
    (make $name:ident; from $id:expr; def $def:expr) => {
        #[doc = concat!("Returns the value of [", stringify!($id), "] as a boolean")]
        pub fn $name(&self) -> bool {
            match self.attributes.find($id) {
                Ok(a) => a.to_bool().unwrap_or($def),
                Err(_) => $def,
            }
        }
    };
}

/// Helper macro that generates methods to retrieve attributes
/// values of a specific type from objects
macro_rules! attr_as_type {
    (make $name:ident; with $r:ty; $atype:ident; via $conv:ident) => {
        #[doc = concat!("Returns the value of the attribute as a `", stringify!($r), "`")]
        pub fn $name(&self, t: CK_ULONG) -> Result<$r> {
            let attr = self.attributes.find(t)?;
            if attr.get_attrtype() != AttrType::$atype {
                return Err(CKR_ATTRIBUTE_TYPE_INVALID)?;
            }
            attr.$conv()
        }
    };
}

/// A PKCS#11 object.
///
/// The classification flags are derived from the attributes when the
/// object is built and kept in sync by the token when the attributes
/// are changed. Sensitive objects zeroize every attribute on drop.
#[derive(Debug, Clone)]
pub struct Object {
    /// The object handle value
    ///
    /// CK_INVALID_HANDLE until the object is admitted to a pool
    handle: CK_OBJECT_HANDLE,
    class: CK_OBJECT_CLASS,
    attributes: AttributeStore,
    is_token: bool,
    is_public: bool,
    is_sensitive: bool,
    /// Set when an in-memory change has not been flushed to storage yet
    dirty: bool,
    capability: Capability,
}

impl Drop for Object {
    fn drop(&mut self) {
        if self.is_sensitive {
            self.attributes.remove_all();
        }
    }
}

impl Object {
    /// Builds an object from a fully validated attribute store
    pub fn from_store(
        class: CK_OBJECT_CLASS,
        attributes: AttributeStore,
    ) -> Result<Object> {
        let mut obj = Object {
            handle: CK_INVALID_HANDLE,
            class: class,
            attributes: attributes,
            is_token: false,
            is_public: false,
            is_sensitive: false,
            dirty: false,
            capability: Capability::Unavailable,
        };
        obj.refresh_flags();
        Ok(obj)
    }

    /// Recomputes the classification flags from the attributes
    pub(crate) fn refresh_flags(&mut self) {
        self.is_token = self.check_token();
        self.is_public = !self.check_private();
        self.is_sensitive = self.check_sensitive();
    }

    create_bool_checker! {make check_token; from CKA_TOKEN; def false}
    create_bool_checker! {make check_private; from CKA_PRIVATE; def true}
    create_bool_checker! {make check_sensitive; from CKA_SENSITIVE; def false}

    /// Set the handle provided to applications
    pub fn set_handle(&mut self, h: CK_OBJECT_HANDLE) {
        self.handle = h
    }

    pub fn get_handle(&self) -> CK_OBJECT_HANDLE {
        self.handle
    }

    pub fn get_class(&self) -> CK_OBJECT_CLASS {
        self.class
    }

    pub fn is_token(&self) -> bool {
        self.is_token
    }

    pub fn is_public(&self) -> bool {
        self.is_public
    }

    pub fn is_private(&self) -> bool {
        !self.is_public
    }

    pub fn is_sensitive(&self) -> bool {
        self.is_sensitive
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn set_dirty(&mut self, dirty: bool) {
        self.dirty = dirty
    }

    pub fn get_capability(&self) -> Capability {
        self.capability
    }

    pub fn set_capability(&mut self, cap: Capability) {
        self.capability = cap
    }

    /// Get an attribute from the object by attribute id
    pub fn get_attr(&self, ck_type: CK_ULONG) -> Option<&Attribute> {
        self.attributes.find(ck_type).ok()
    }

    /// Gets a reference to the attribute store
    pub fn attributes(&self) -> &AttributeStore {
        &self.attributes
    }

    /// Overwrites the value of an existing attribute and marks the
    /// object dirty
    pub fn replace_attr(&mut self, ck_type: CK_ULONG, value: &[u8]) -> Result<()> {
        self.attributes.replace(ck_type, value)?;
        self.dirty = true;
        Ok(())
    }

    /// Marks the object private, updating the attribute and the flag
    pub fn make_private(&mut self) -> Result<()> {
        self.replace_attr(CKA_PRIVATE, &[CK_TRUE])?;
        self.is_public = false;
        Ok(())
    }

    attr_as_type! {make get_attr_as_bool; with bool; BoolType; via to_bool}
    attr_as_type! {make get_attr_as_ulong; with CK_ULONG; NumType; via to_ulong}

    /// Matches the label filter used by searches (exact byte equality)
    pub fn match_label(&self, label: &[u8]) -> bool {
        match self.attributes.find(CKA_LABEL) {
            Ok(a) => a.get_value() == label,
            Err(_) => false,
        }
    }

    /// Rebuilds an object from its stored attributes, used by storage
    /// backends when loading token objects
    pub fn from_stored(attrs: Vec<Attribute>) -> Result<Object> {
        let mut store = AttributeStore::new();
        let mut class = None;
        for a in attrs {
            if a.get_type() == CKA_CLASS {
                class = Some(a.to_ulong()?);
            }
            store.insert(a).map_err(|_| Error::ck_rv(CKR_GENERAL_ERROR))?;
        }
        match class {
            Some(c) => Object::from_store(c, store),
            None => Err(CKR_TEMPLATE_INCOMPLETE)?,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data_object(private: bool, sensitive: Option<bool>) -> Object {
        let mut store = AttributeStore::new();
        store.insert(Attribute::from_ulong(CKA_CLASS, CKO_DATA)).unwrap();
        store.insert(Attribute::from_bool(CKA_TOKEN, true)).unwrap();
        store.insert(Attribute::from_bool(CKA_PRIVATE, private)).unwrap();
        if let Some(s) = sensitive {
            store.insert(Attribute::from_bool(CKA_SENSITIVE, s)).unwrap();
        }
        Object::from_store(CKO_DATA, store).unwrap()
    }

    #[test]
    fn flags_follow_attributes() {
        let obj = data_object(false, None);
        assert!(obj.is_token());
        assert!(obj.is_public());
        assert!(!obj.is_sensitive());
        assert!(!obj.is_dirty());

        let obj = data_object(true, Some(true));
        assert!(obj.is_private());
        assert!(obj.is_sensitive());
    }

    #[test]
    fn make_private() {
        let mut obj = data_object(false, None);
        obj.make_private().unwrap();
        assert!(obj.is_private());
        assert!(obj.is_dirty());
        assert!(obj.get_attr_as_bool(CKA_PRIVATE).unwrap());
    }

    #[test]
    fn typed_getters() {
        let obj = data_object(false, None);
        assert_eq!(obj.get_attr_as_ulong(CKA_CLASS).unwrap(), CKO_DATA);
        let err = obj.get_attr_as_ulong(CKA_TOKEN).unwrap_err();
        assert_eq!(err.rv(), CKR_ATTRIBUTE_TYPE_INVALID);
        assert!(obj.get_attr_as_bool(CKA_LABEL).unwrap_err().attr_not_found());
    }
}
