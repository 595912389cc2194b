// Copyright 2023-2026 Simo Sorce
// See LICENSE.txt file for terms

use std::collections::HashMap;
use std::fmt::Debug;

use crate::attribute::Attribute;
use crate::error::Result;
use crate::pkcs11::*;

use super::capability::Capability;
use super::schema::{
    create_object, find_entry, template_class, OAFlags, SchemaEntry,
    KEY_LEVEL, OBJECT_LEVEL, STORAGE_LEVEL,
};
use super::Object;
use crate::attr_element;

use log::debug;
use once_cell::sync::Lazy;

/// An object subclass builder.
///
/// Each builder owns the schema level specific to its class, validates
/// creation templates against the full chain and attaches the capability
/// appropriate for the objects it creates.
pub trait ObjectFactory: Debug + Send + Sync {
    /// Returns the class of the objects built by this factory
    fn get_class(&self) -> CK_OBJECT_CLASS;

    /// Returns the chain of schema levels, from generic to specific
    fn levels(&self) -> Vec<&[SchemaEntry]>;

    /// Creates a new object from the template
    fn create(&self, template: &[Attribute]) -> Result<Object> {
        let mut obj = create_object(template, &self.levels())?;
        obj.set_capability(self.capability(&obj)?);
        Ok(obj)
    }

    /// The capability attached to newly created objects
    fn capability(&self, _obj: &Object) -> Result<Capability> {
        Ok(Capability::Unavailable)
    }

    /// Looks up the schema entry governing an attribute of this class
    fn find_entry(&self, ck_type: CK_ATTRIBUTE_TYPE) -> Option<SchemaEntry> {
        find_entry(&self.levels(), ck_type).cloned()
    }
}

static DATA_LEVEL: Lazy<Vec<SchemaEntry>> = Lazy::new(|| {
    vec![
        attr_element!(
            CKA_APPLICATION; OAFlags::Optional; Attribute::from_string;
            val String::new()),
        attr_element!(
            CKA_OBJECT_ID; OAFlags::Optional; Attribute::from_bytes;
            val Vec::new()),
        attr_element!(
            CKA_VALUE; OAFlags::Optional; Attribute::from_bytes;
            val Vec::new()),
    ]
});

/// Builder for CKO_DATA objects
#[derive(Debug, Default)]
pub struct DataFactory {}

impl ObjectFactory for DataFactory {
    fn get_class(&self) -> CK_OBJECT_CLASS {
        CKO_DATA
    }

    fn levels(&self) -> Vec<&[SchemaEntry]> {
        vec![
            OBJECT_LEVEL.as_slice(),
            STORAGE_LEVEL.as_slice(),
            DATA_LEVEL.as_slice(),
        ]
    }
}

static SECRET_KEY_LEVEL: Lazy<Vec<SchemaEntry>> = Lazy::new(|| {
    vec![
        attr_element!(
            CKA_SENSITIVE;
            OAFlags::Optional | OAFlags::Defval | OAFlags::ChangeToTrue;
            Attribute::from_bool; val false),
        attr_element!(
            CKA_ENCRYPT; OAFlags::Optional | OAFlags::Defval;
            Attribute::from_bool; val true),
        attr_element!(
            CKA_DECRYPT; OAFlags::Optional | OAFlags::Defval;
            Attribute::from_bool; val true),
        attr_element!(
            CKA_SIGN; OAFlags::Optional | OAFlags::Defval;
            Attribute::from_bool; val true),
        attr_element!(
            CKA_VERIFY; OAFlags::Optional | OAFlags::Defval;
            Attribute::from_bool; val true),
        attr_element!(
            CKA_WRAP; OAFlags::Optional | OAFlags::Defval;
            Attribute::from_bool; val false),
        attr_element!(
            CKA_UNWRAP; OAFlags::Optional | OAFlags::Defval;
            Attribute::from_bool; val false),
        attr_element!(
            CKA_EXTRACTABLE; OAFlags::Optional | OAFlags::Defval;
            Attribute::from_bool; val true),
        attr_element!(
            CKA_VALUE; OAFlags::empty(); Attribute::from_bytes;
            val Vec::new()),
    ]
});

/// Builder for CKO_SECRET_KEY objects
#[derive(Debug, Default)]
pub struct SecretKeyFactory {}

impl ObjectFactory for SecretKeyFactory {
    fn get_class(&self) -> CK_OBJECT_CLASS {
        CKO_SECRET_KEY
    }

    fn levels(&self) -> Vec<&[SchemaEntry]> {
        vec![
            OBJECT_LEVEL.as_slice(),
            STORAGE_LEVEL.as_slice(),
            KEY_LEVEL.as_slice(),
            SECRET_KEY_LEVEL.as_slice(),
        ]
    }

    fn capability(&self, obj: &Object) -> Result<Capability> {
        Ok(Capability::SymmetricCipher {
            key_type: obj.get_attr_as_ulong(CKA_KEY_TYPE)?,
        })
    }
}

static DATA_FACTORY: Lazy<Box<dyn ObjectFactory>> =
    Lazy::new(|| Box::new(DataFactory::default()));

static SECRET_KEY_FACTORY: Lazy<Box<dyn ObjectFactory>> =
    Lazy::new(|| Box::new(SecretKeyFactory::default()));

/// Registry of the object builders, keyed by object class
#[derive(Debug)]
pub struct ObjectFactories {
    factories: HashMap<CK_OBJECT_CLASS, &'static Box<dyn ObjectFactory>>,
}

impl Default for ObjectFactories {
    fn default() -> Self {
        let mut factories = ObjectFactories {
            factories: HashMap::new(),
        };
        factories.add_factory(&DATA_FACTORY);
        factories.add_factory(&SECRET_KEY_FACTORY);
        factories
    }
}

impl ObjectFactories {
    pub fn add_factory(&mut self, factory: &'static Box<dyn ObjectFactory>) {
        self.factories.insert(factory.get_class(), factory);
    }

    /// Returns the builder registered for a class
    ///
    /// Unknown classes fail with CKR_FUNCTION_FAILED
    pub fn get_factory(
        &self,
        class: CK_OBJECT_CLASS,
    ) -> Result<&'static Box<dyn ObjectFactory>> {
        match self.factories.get(&class) {
            Some(f) => Ok(*f),
            None => {
                debug!("No builder for object class {}", class);
                Err(CKR_FUNCTION_FAILED)?
            }
        }
    }

    /// Returns the builder responsible for an existing object
    pub fn get_obj_factory(
        &self,
        obj: &Object,
    ) -> Result<&'static Box<dyn ObjectFactory>> {
        self.get_factory(obj.get_class())
    }

    /// Dispatches a creation template to the builder for its class
    pub fn create(&self, template: &[Attribute]) -> Result<Object> {
        self.get_factory(template_class(template)?)?.create(template)
    }
}
