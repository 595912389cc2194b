// Copyright 2023 Simo Sorce
// See LICENSE.txt file for terms

//! This module provides the safe Rust representation of PKCS#11 attributes
//! ([Attribute]) and defines mappings between PKCS#11 attribute type values
//! and the kind of data they carry, as described in the [AttrType]
//! enumeration. It also defines [AttrRequest], the per-slot descriptor used
//! by attribute reads.

use std::cmp::Ordering;

use crate::error::{Error, Result};
use crate::misc::zeromem;
use crate::pkcs11::*;

/// The kind of value an attribute carries
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum AttrType {
    BoolType,
    NumType,
    StringType,
    BytesType,
    DateType,
}

impl AttrType {
    /// Looks up an attribute by its `CKA_*` name
    pub fn attr_name_to_id_type(s: &str) -> Result<(CK_ULONG, AttrType)> {
        match Attrmap::search_by_name(s) {
            Some(a) => Ok((a.id, a.atype)),
            None => Err(Error::not_found(s.to_string())),
        }
    }

    /// Looks up the value kind of an attribute id
    pub fn attr_id_to_attrtype(id: CK_ULONG) -> Result<AttrType> {
        match Attrmap::search_by_id(id) {
            Some(a) => Ok(a.atype),
            None => Err(CKR_ATTRIBUTE_TYPE_INVALID)?,
        }
    }
}

/// One row of the attribute map
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
struct Attrmap<'a> {
    id: CK_ULONG,
    name: &'a str,
    atype: AttrType,
}

impl PartialOrd for Attrmap<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Attrmap<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id.cmp(&other.id)
    }
}

impl Attrmap<'_> {
    /* ATTRMAP is sorted by id */
    fn search_by_id(id: CK_ULONG) -> Option<&'static Attrmap<'static>> {
        match ATTRMAP.binary_search_by(|a| a.id.cmp(&id)) {
            Ok(i) => Some(&ATTRMAP[i]),
            Err(_) => None,
        }
    }

    fn search_by_name(s: &str) -> Option<&'static Attrmap<'static>> {
        ATTRMAP.iter().find(|a| a.name == s)
    }
}

macro_rules! attrmap_element {
    ($id:expr; as $attrtype:ident) => {
        Attrmap {
            id: $id,
            name: stringify!($id),
            atype: AttrType::$attrtype,
        }
    };
}

/// The attributes map, lists all attributes the object core knows about.
/// Must stay sorted by id.
static ATTRMAP: [Attrmap<'_>; 33] = [
    attrmap_element!(CKA_CLASS; as NumType),
    attrmap_element!(CKA_TOKEN; as BoolType),
    attrmap_element!(CKA_PRIVATE; as BoolType),
    attrmap_element!(CKA_LABEL; as StringType),
    attrmap_element!(CKA_UNIQUE_ID; as StringType),
    attrmap_element!(CKA_APPLICATION; as StringType),
    attrmap_element!(CKA_VALUE; as BytesType),
    attrmap_element!(CKA_OBJECT_ID; as BytesType),
    attrmap_element!(CKA_CERTIFICATE_TYPE; as NumType),
    attrmap_element!(CKA_KEY_TYPE; as NumType),
    attrmap_element!(CKA_SUBJECT; as BytesType),
    attrmap_element!(CKA_ID; as BytesType),
    attrmap_element!(CKA_SENSITIVE; as BoolType),
    attrmap_element!(CKA_ENCRYPT; as BoolType),
    attrmap_element!(CKA_DECRYPT; as BoolType),
    attrmap_element!(CKA_WRAP; as BoolType),
    attrmap_element!(CKA_UNWRAP; as BoolType),
    attrmap_element!(CKA_SIGN; as BoolType),
    attrmap_element!(CKA_SIGN_RECOVER; as BoolType),
    attrmap_element!(CKA_VERIFY; as BoolType),
    attrmap_element!(CKA_VERIFY_RECOVER; as BoolType),
    attrmap_element!(CKA_DERIVE; as BoolType),
    attrmap_element!(CKA_START_DATE; as DateType),
    attrmap_element!(CKA_END_DATE; as DateType),
    attrmap_element!(CKA_VALUE_LEN; as NumType),
    attrmap_element!(CKA_EXTRACTABLE; as BoolType),
    attrmap_element!(CKA_LOCAL; as BoolType),
    attrmap_element!(CKA_NEVER_EXTRACTABLE; as BoolType),
    attrmap_element!(CKA_ALWAYS_SENSITIVE; as BoolType),
    attrmap_element!(CKA_KEY_GEN_MECHANISM; as NumType),
    attrmap_element!(CKA_MODIFIABLE; as BoolType),
    attrmap_element!(CKA_COPYABLE; as BoolType),
    attrmap_element!(CKA_DESTROYABLE; as BoolType),
];

/// An attribute: its id, its value kind and the raw value bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    ck_type: CK_ULONG,
    attrtype: AttrType,
    value: Vec<u8>,
}

impl Attribute {
    pub fn get_type(&self) -> CK_ULONG {
        self.ck_type
    }

    pub fn get_attrtype(&self) -> AttrType {
        self.attrtype
    }

    pub fn get_value(&self) -> &[u8] {
        &self.value
    }

    /// Returns the currently allocated capacity of the value buffer
    pub fn capacity(&self) -> usize {
        self.value.capacity()
    }

    /// Overwrites the value with new content.
    ///
    /// The existing buffer is reused whenever it can hold the new value,
    /// a new buffer is allocated only when the value grows past the
    /// current capacity. The old content is zeroized in both cases.
    pub fn replace_value(&mut self, val: &[u8]) {
        zeromem(self.value.as_mut_slice());
        if val.len() > self.value.capacity() {
            self.value = val.to_vec();
        } else {
            self.value.clear();
            self.value.extend_from_slice(val);
        }
    }

    /// Checks the attribute carries the same type and value of another
    pub fn match_attr(&self, other: &Attribute) -> bool {
        self.ck_type == other.ck_type && self.value == other.value
    }

    /// The `CKA_*` name, or the numeric id for attributes outside the map
    pub fn name(&self) -> String {
        match Attrmap::search_by_id(self.ck_type) {
            Some(a) => a.name.to_string(),
            None => self.ck_type.to_string(),
        }
    }

    /// Decodes a bool value, CKR_ATTRIBUTE_TYPE_INVALID for another
    /// kind and CKR_ATTRIBUTE_VALUE_INVALID for a malformed value
    pub fn to_bool(&self) -> Result<bool> {
        if self.attrtype != AttrType::BoolType {
            return Err(CKR_ATTRIBUTE_TYPE_INVALID)?;
        }
        if self.value.len() != 1 {
            return Err(CKR_ATTRIBUTE_VALUE_INVALID)?;
        }
        Ok(self.value[0] != 0)
    }

    pub fn to_ulong(&self) -> Result<CK_ULONG> {
        if self.attrtype != AttrType::NumType {
            return Err(CKR_ATTRIBUTE_TYPE_INVALID)?;
        }
        if self.value.len() != std::mem::size_of::<CK_ULONG>() {
            return Err(CKR_ATTRIBUTE_VALUE_INVALID)?;
        }
        Ok(CK_ULONG::from_ne_bytes(self.value.as_slice().try_into()?))
    }

    /// Decodes a string value, which must be valid UTF-8
    pub fn to_string(&self) -> Result<String> {
        if self.attrtype != AttrType::StringType {
            return Err(CKR_ATTRIBUTE_TYPE_INVALID)?;
        }
        match std::str::from_utf8(&self.value) {
            Ok(s) => Ok(s.to_string()),
            Err(_) => Err(CKR_ATTRIBUTE_VALUE_INVALID)?,
        }
    }

    /// Returns the value as an allocated String containing a date
    /// formatted as YYYY-MM-DD, or an empty string for the empty default
    pub fn to_date_string(&self) -> Result<String> {
        if self.attrtype != AttrType::DateType {
            return Err(CKR_ATTRIBUTE_TYPE_INVALID)?;
        }
        match self.value.len() {
            0 => Ok(String::new()),
            8 => {
                let v = &self.value;
                let chars: [char; 10] = [
                    char::from(v[0]),
                    char::from(v[1]),
                    char::from(v[2]),
                    char::from(v[3]),
                    '-',
                    char::from(v[4]),
                    char::from(v[5]),
                    '-',
                    char::from(v[6]),
                    char::from(v[7]),
                ];
                Ok(chars.iter().collect())
            }
            _ => Err(CKR_ATTRIBUTE_VALUE_INVALID)?,
        }
    }

    pub fn zeroize(&mut self) {
        zeromem(self.value.as_mut_slice());
    }

    /// Checks that the value is well formed for the attribute type
    pub fn check_value(&self) -> Result<()> {
        let ok = match self.attrtype {
            AttrType::BoolType => self.value.len() == 1,
            AttrType::NumType => {
                self.value.len() == std::mem::size_of::<CK_ULONG>()
            }
            AttrType::DateType => match self.value.len() {
                0 => true,
                8 => self.value.iter().all(|c| c.is_ascii_digit()),
                _ => false,
            },
            AttrType::StringType => std::str::from_utf8(&self.value).is_ok(),
            AttrType::BytesType => true,
        };
        if ok {
            Ok(())
        } else {
            Err(CKR_ATTRIBUTE_VALUE_INVALID)?
        }
    }

    /// Constructs an attribute from its raw encoding, the way it is
    /// received from an application template.
    ///
    /// The kind is looked up from the attribute map; unknown attribute
    /// ids return CKR_ATTRIBUTE_TYPE_INVALID and malformed values
    /// CKR_ATTRIBUTE_VALUE_INVALID.
    pub fn from_raw(id: CK_ULONG, val: &[u8]) -> Result<Attribute> {
        let attr = Attribute {
            ck_type: id,
            attrtype: AttrType::attr_id_to_attrtype(id)?,
            value: val.to_vec(),
        };
        attr.check_value()?;
        Ok(attr)
    }

    /// Builds an attribute of a known kind from a value slice, unchecked
    pub fn from_attr_slice(id: CK_ULONG, at: AttrType, val: &[u8]) -> Attribute {
        Attribute {
            ck_type: id,
            attrtype: at,
            value: val.to_vec(),
        }
    }

    /// The typed constructors below do not check that `t` is actually
    /// an attribute of that kind
    pub fn from_bool(t: CK_ULONG, val: bool) -> Attribute {
        Attribute {
            ck_type: t,
            attrtype: AttrType::BoolType,
            value: vec![if val { CK_TRUE } else { CK_FALSE }],
        }
    }

    pub fn from_ulong(t: CK_ULONG, val: CK_ULONG) -> Attribute {
        Attribute {
            ck_type: t,
            attrtype: AttrType::NumType,
            value: Vec::from(val.to_ne_bytes()),
        }
    }

    /// Fails if the value does not fit a CK_ULONG
    pub fn from_u64(t: CK_ULONG, val: u64) -> Result<Attribute> {
        Ok(Self::from_ulong(t, CK_ULONG::try_from(val)?))
    }

    pub fn from_string(t: CK_ULONG, val: String) -> Attribute {
        Attribute {
            ck_type: t,
            attrtype: AttrType::StringType,
            value: val.into_bytes(),
        }
    }

    pub fn from_bytes(t: CK_ULONG, val: Vec<u8>) -> Attribute {
        Attribute {
            ck_type: t,
            attrtype: AttrType::BytesType,
            value: val,
        }
    }

    /// Constructs an attribute as a date type from raw YYYYMMDD bytes
    pub fn from_date_bytes(t: CK_ULONG, val: Vec<u8>) -> Attribute {
        Attribute {
            ck_type: t,
            attrtype: AttrType::DateType,
            value: val,
        }
    }

    /// Parses a YYYY-MM-DD string into a date attribute
    pub fn from_date_string(t: CK_ULONG, s: &str) -> Result<Attribute> {
        if s.is_empty() {
            return Ok(Self::from_date_bytes(t, Vec::new()));
        }
        let digits: Vec<u8> =
            s.bytes().filter(|c| *c != b'-').collect::<Vec<u8>>();
        if digits.len() != 8 || !digits.iter().all(|c| c.is_ascii_digit()) {
            return Err(CKR_ATTRIBUTE_VALUE_INVALID)?;
        }
        Ok(Self::from_date_bytes(t, digits))
    }
}

/// A single slot of an attribute read request.
///
/// `value` is the destination buffer supplied by the caller, `None`
/// requests only the length. On return `len` holds the length of the
/// attribute value, or CK_UNAVAILABLE_INFORMATION when the attribute
/// can't be returned.
#[derive(Debug)]
pub struct AttrRequest<'a> {
    pub type_: CK_ATTRIBUTE_TYPE,
    pub value: Option<&'a mut [u8]>,
    pub len: CK_ULONG,
}

impl<'a> AttrRequest<'a> {
    /// A request that only asks for the value length
    pub fn length_of(type_: CK_ATTRIBUTE_TYPE) -> AttrRequest<'static> {
        AttrRequest {
            type_: type_,
            value: None,
            len: 0,
        }
    }

    /// A request that copies the value into the provided buffer
    pub fn with_buffer(
        type_: CK_ATTRIBUTE_TYPE,
        buf: &'a mut [u8],
    ) -> AttrRequest<'a> {
        AttrRequest {
            type_: type_,
            value: Some(buf),
            len: 0,
        }
    }

    /// Returns true if the slot reported the value as unavailable
    pub fn is_unavailable(&self) -> bool {
        self.len == CK_UNAVAILABLE_INFORMATION
    }

    /// Returns the portion of the buffer filled by a successful read
    pub fn filled(&self) -> Option<&[u8]> {
        if self.is_unavailable() {
            return None;
        }
        let len = usize::try_from(self.len).ok()?;
        match self.value {
            Some(ref b) if b.len() >= len => Some(&b[..len]),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_order_of_attrmap() {
        let mut copy = ATTRMAP.clone();
        copy.sort();
        assert_eq!(ATTRMAP, copy);
    }

    #[test]
    fn raw_values_are_checked() {
        assert!(Attribute::from_raw(CKA_TOKEN, &[1]).is_ok());
        let err = Attribute::from_raw(CKA_TOKEN, &[1, 0]).unwrap_err();
        assert_eq!(err.rv(), CKR_ATTRIBUTE_VALUE_INVALID);
        let err = Attribute::from_raw(0x7fff_0000, &[]).unwrap_err();
        assert_eq!(err.rv(), CKR_ATTRIBUTE_TYPE_INVALID);
        let a = Attribute::from_raw(CKA_CLASS, &CKO_DATA.to_ne_bytes()).unwrap();
        assert_eq!(a.to_ulong().unwrap(), CKO_DATA);
    }

    #[test]
    fn replace_keeps_allocation() {
        let mut a = Attribute::from_bytes(CKA_VALUE, vec![7u8; 32]);
        let cap = a.capacity();
        a.replace_value(&[1, 2, 3]);
        assert_eq!(a.get_value(), &[1, 2, 3]);
        assert_eq!(a.capacity(), cap);
        a.replace_value(&[9u8; 64]);
        assert_eq!(a.get_value().len(), 64);
        assert!(a.capacity() >= 64);
    }

    #[test]
    fn dates() {
        let a = Attribute::from_date_string(CKA_START_DATE, "2024-02-29")
            .unwrap();
        assert_eq!(a.get_value(), b"20240229");
        assert_eq!(a.to_date_string().unwrap(), "2024-02-29");
        assert!(Attribute::from_date_string(CKA_END_DATE, "2024-2-9").is_err());
    }

    #[test]
    fn strings_and_dates_must_be_well_formed() {
        let err = Attribute::from_raw(CKA_LABEL, &[0xff, 0xfe]).unwrap_err();
        assert_eq!(err.rv(), CKR_ATTRIBUTE_VALUE_INVALID);
        let err = Attribute::from_raw(CKA_START_DATE, b"abcdefgh").unwrap_err();
        assert_eq!(err.rv(), CKR_ATTRIBUTE_VALUE_INVALID);
        assert!(Attribute::from_raw(CKA_START_DATE, b"20240229").is_ok());
        assert!(Attribute::from_raw(CKA_START_DATE, b"").is_ok());
    }
}
