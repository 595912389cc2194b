// Copyright 2025 Simo Sorce
// See LICENSE.txt file for terms

//! The ordered attribute container owned by each object.
//!
//! Entries keep their insertion order, which is also the order used by
//! the flat serialization, and there is never more than one entry for a
//! given attribute type.

use crate::attribute::Attribute;
use crate::error::{Error, Result};
use crate::pkcs11::*;

#[derive(Debug, Clone, Default)]
pub struct AttributeStore {
    attrs: Vec<Attribute>,
}

impl AttributeStore {
    pub fn new() -> AttributeStore {
        AttributeStore { attrs: Vec::new() }
    }

    /// Appends a new attribute
    ///
    /// Fails with a DuplicateAttribute error if an attribute of the same
    /// type is already present.
    pub fn insert(&mut self, attr: Attribute) -> Result<()> {
        if self.contains(attr.get_type()) {
            return Err(Error::duplicate(attr.name()));
        }
        self.attrs.push(attr);
        Ok(())
    }

    pub fn contains(&self, ck_type: CK_ATTRIBUTE_TYPE) -> bool {
        self.attrs.iter().any(|a| a.get_type() == ck_type)
    }

    /// Finds an attribute by type, or fails with AttributeNotFound
    pub fn find(&self, ck_type: CK_ATTRIBUTE_TYPE) -> Result<&Attribute> {
        match self.attrs.iter().find(|a| a.get_type() == ck_type) {
            Some(a) => Ok(a),
            None => Err(Error::not_found(ck_type.to_string())),
        }
    }

    /// Replaces the value of an existing attribute.
    ///
    /// The entry keeps its position and its buffer is reused when large
    /// enough.
    pub fn replace(
        &mut self,
        ck_type: CK_ATTRIBUTE_TYPE,
        value: &[u8],
    ) -> Result<()> {
        match self.attrs.iter_mut().find(|a| a.get_type() == ck_type) {
            Some(a) => {
                a.replace_value(value);
                Ok(())
            }
            None => Err(Error::not_found(ck_type.to_string())),
        }
    }

    /// Removes and zeroizes a single attribute
    pub fn remove(&mut self, ck_type: CK_ATTRIBUTE_TYPE) -> Result<()> {
        match self.attrs.iter().position(|a| a.get_type() == ck_type) {
            Some(idx) => {
                let mut a = self.attrs.remove(idx);
                a.zeroize();
                Ok(())
            }
            None => Err(Error::not_found(ck_type.to_string())),
        }
    }

    /// Releases every attribute, zeroizing the values first
    pub fn remove_all(&mut self) {
        for a in self.attrs.iter_mut() {
            a.zeroize();
        }
        self.attrs.clear();
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Attribute> {
        self.attrs.iter()
    }

    pub fn len(&self) -> usize {
        self.attrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attrs.is_empty()
    }

    pub(crate) fn iter_mut(&mut self) -> std::slice::IterMut<'_, Attribute> {
        self.attrs.iter_mut()
    }
}

impl<'a> IntoIterator for &'a AttributeStore {
    type Item = &'a Attribute;
    type IntoIter = std::slice::Iter<'a, Attribute>;

    fn into_iter(self) -> Self::IntoIter {
        self.attrs.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn label(s: &str) -> Attribute {
        Attribute::from_string(CKA_LABEL, s.to_string())
    }

    #[test]
    fn insert_and_find() {
        let mut store = AttributeStore::new();
        store.insert(label("one")).unwrap();
        store
            .insert(Attribute::from_bool(CKA_TOKEN, false))
            .unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.find(CKA_LABEL).unwrap().get_value(), b"one");

        let err = store.insert(label("two")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DuplicateAttribute);
        assert_eq!(store.find(CKA_LABEL).unwrap().get_value(), b"one");

        let err = store.find(CKA_ID).unwrap_err();
        assert!(err.attr_not_found());
    }

    #[test]
    fn replace_in_place() {
        let mut store = AttributeStore::new();
        store.insert(label("a longer label")).unwrap();
        store.insert(Attribute::from_bool(CKA_TOKEN, false)).unwrap();
        store.replace(CKA_LABEL, b"short").unwrap();
        let order: Vec<CK_ULONG> = store.iter().map(|a| a.get_type()).collect();
        assert_eq!(order, vec![CKA_LABEL, CKA_TOKEN]);
        assert_eq!(store.find(CKA_LABEL).unwrap().get_value(), b"short");

        assert!(store.replace(CKA_ID, b"x").unwrap_err().attr_not_found());
    }

    #[test]
    fn removal() {
        let mut store = AttributeStore::new();
        store.insert(label("x")).unwrap();
        store.insert(Attribute::from_bool(CKA_TOKEN, true)).unwrap();
        store.remove(CKA_LABEL).unwrap();
        assert!(!store.contains(CKA_LABEL));
        assert!(store.remove(CKA_LABEL).unwrap_err().attr_not_found());
        store.remove_all();
        assert!(store.is_empty());
    }
}
