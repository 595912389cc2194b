// Copyright 2025 Simo Sorce
// See LICENSE.txt file for terms

//! Static attribute schemas and template validation.
//!
//! A schema level is a list of [SchemaEntry] values. Levels are chained
//! from the most generic (object) to the most specific (for example the
//! key level) and an object is built by walking the chain in order.

use crate::attribute::Attribute;
use crate::error::{Error, Result};
use crate::pkcs11::*;

use super::store::AttributeStore;
use super::Object;

use bitflags::bitflags;
use log::debug;
use once_cell::sync::Lazy;

bitflags! {
    /// Properties of an attribute within a schema level
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OAFlags: u32 {
        /// The attribute may be omitted from a creation template
        const Optional             = 0x00000001;

        /// The attribute carries a default inserted when omitted, otherwise
        /// an optional attribute is inserted with an empty value
        const Defval               = 0x00000004;

        /// The attribute cannot be changed once set
        const Unchangeable         = 0x00000400;

        /// The attribute can only be changed from `False` to `True`
        const ChangeToTrue         = 0x00001400;
    }
}

/// One entry of a schema level: the attribute (holding the default
/// value, if any) and its flags
#[derive(Debug, Clone)]
pub struct SchemaEntry {
    attribute: Attribute,
    flags: OAFlags,
}

impl SchemaEntry {
    pub fn new(a: Attribute, f: OAFlags) -> SchemaEntry {
        SchemaEntry {
            attribute: a,
            flags: f,
        }
    }

    pub fn get_type(&self) -> CK_ATTRIBUTE_TYPE {
        self.attribute.get_type()
    }

    /// Check if a specific flag is present on the entry
    pub fn is(&self, val: OAFlags) -> bool {
        if val.is_empty() {
            return false;
        }
        self.flags.contains(val)
    }

    /// Builds the attribute to insert when the template omits this entry
    fn default_attribute(&self) -> Attribute {
        if self.is(OAFlags::Defval) {
            self.attribute.clone()
        } else {
            Attribute::from_attr_slice(
                self.attribute.get_type(),
                self.attribute.get_attrtype(),
                &[],
            )
        }
    }

    /// Retypes a template attribute after this entry and checks that the
    /// value is well formed for it
    fn conform(&self, tattr: &Attribute) -> Result<Attribute> {
        let attr = Attribute::from_attr_slice(
            self.attribute.get_type(),
            self.attribute.get_attrtype(),
            tattr.get_value(),
        );
        match attr.check_value() {
            Ok(()) => Ok(attr),
            Err(_) => Err(CKR_TEMPLATE_INCONSISTENT)?,
        }
    }
}

/// Helper to quickly instantiate a SchemaEntry element
#[macro_export]
macro_rules! attr_element {
    ($id:expr; $flags:expr; $from_type:expr; val $defval:expr) => {
        $crate::object::schema::SchemaEntry::new(
            $from_type($id, $defval),
            $flags,
        )
    };
}
pub use attr_element;

/// Generic object level
pub static OBJECT_LEVEL: Lazy<Vec<SchemaEntry>> = Lazy::new(|| {
    vec![attr_element!(
        CKA_CLASS; OAFlags::Unchangeable; Attribute::from_ulong; val 0)]
});

/// Storage object level
pub static STORAGE_LEVEL: Lazy<Vec<SchemaEntry>> = Lazy::new(|| {
    vec![
        attr_element!(
            CKA_TOKEN; OAFlags::Unchangeable; Attribute::from_bool;
            val false),
        attr_element!(
            CKA_PRIVATE; OAFlags::ChangeToTrue; Attribute::from_bool;
            val true),
        attr_element!(
            CKA_MODIFIABLE; OAFlags::Optional | OAFlags::Defval;
            Attribute::from_bool; val true),
        attr_element!(
            CKA_LABEL; OAFlags::Optional; Attribute::from_string;
            val String::new()),
    ]
});

/// Key object level
pub static KEY_LEVEL: Lazy<Vec<SchemaEntry>> = Lazy::new(|| {
    vec![
        attr_element!(
            CKA_KEY_TYPE; OAFlags::Unchangeable; Attribute::from_ulong;
            val CK_UNAVAILABLE_INFORMATION),
        attr_element!(
            CKA_ID; OAFlags::Optional; Attribute::from_bytes; val Vec::new()),
        attr_element!(
            CKA_START_DATE; OAFlags::Optional; Attribute::from_date_bytes;
            val Vec::new()),
        attr_element!(
            CKA_END_DATE; OAFlags::Optional; Attribute::from_date_bytes;
            val Vec::new()),
        attr_element!(
            CKA_DERIVE; OAFlags::Optional | OAFlags::Defval;
            Attribute::from_bool; val false),
        attr_element!(
            CKA_LOCAL; OAFlags::Optional | OAFlags::Defval;
            Attribute::from_bool; val false),
        attr_element!(
            CKA_KEY_GEN_MECHANISM; OAFlags::Optional | OAFlags::Defval;
            Attribute::from_ulong; val CK_UNAVAILABLE_INFORMATION),
    ]
});

/// Finds the schema entry for an attribute type across a chain of levels
pub fn find_entry<'a>(
    levels: &[&'a [SchemaEntry]],
    ck_type: CK_ATTRIBUTE_TYPE,
) -> Option<&'a SchemaEntry> {
    levels
        .iter()
        .flat_map(|l| l.iter())
        .find(|e| e.get_type() == ck_type)
}

/// Returns the object class named by a creation template
pub fn template_class(template: &[Attribute]) -> Result<CK_OBJECT_CLASS> {
    match template.iter().find(|a| a.get_type() == CKA_CLASS) {
        Some(a) => match a.get_value().try_into() {
            Ok(b) => Ok(CK_ULONG::from_ne_bytes(b)),
            Err(_) => Err(CKR_TEMPLATE_INCONSISTENT)?,
        },
        None => Err(CKR_TEMPLATE_INCOMPLETE)?,
    }
}

fn populate(
    store: &mut AttributeStore,
    template: &[Attribute],
    levels: &[&[SchemaEntry]],
) -> Result<()> {
    for level in levels {
        for entry in level.iter() {
            let attr = match template
                .iter()
                .find(|a| a.get_type() == entry.get_type())
            {
                Some(tattr) => entry.conform(tattr)?,
                None => {
                    if !entry.is(OAFlags::Optional) {
                        debug!(
                            "Template is missing required attribute {}",
                            entry.attribute.name()
                        );
                        return Err(CKR_TEMPLATE_INCOMPLETE)?;
                    }
                    entry.default_attribute()
                }
            };
            /* a type listed in two levels would be a schema bug */
            store.insert(attr).map_err(|_| Error::ck_rv(CKR_GENERAL_ERROR))?;
        }
    }
    Ok(())
}

/// Validates a creation template against a chain of schema levels and
/// builds the resulting object.
///
/// Attributes present in the template are copied, optional attributes
/// missing from it get the schema default, and a missing required
/// attribute fails the whole operation with CKR_TEMPLATE_INCOMPLETE.
/// Template attributes that no level lists are ignored.
pub fn create_object(
    template: &[Attribute],
    levels: &[&[SchemaEntry]],
) -> Result<Object> {
    let class = template_class(template)?;
    for (i, a) in template.iter().enumerate() {
        if template[i + 1..]
            .iter()
            .any(|b| b.get_type() == a.get_type())
        {
            return Err(CKR_TEMPLATE_INCONSISTENT)?;
        }
    }

    let mut store = AttributeStore::new();
    if let Err(e) = populate(&mut store, template, levels) {
        store.remove_all();
        return Err(e);
    }
    Object::from_store(class, store)
}
