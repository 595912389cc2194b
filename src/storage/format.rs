// Copyright 2024 Simo Sorce
// See LICENSE.txt file for terms

//! Flat, deterministic serialization of objects.
//!
//! Layout (all integers big endian):
//!
//! | field | size |
//! |---|---|
//! | format version | 1 |
//! | flags (token, private, sensitive) | 1 |
//! | attribute count | 4 |
//! | per attribute: type | 8 |
//! | per attribute: value length | 4 |
//! | per attribute: value | length |
//!
//! Attributes are written in store order, so the encoding of a given
//! object is stable.

use crate::attribute::Attribute;
use crate::error::Result;
use crate::object::Object;
use crate::pkcs11::*;

const FORMAT_V1: u8 = 1;

const FLAG_TOKEN: u8 = 0x01;
const FLAG_PRIVATE: u8 = 0x02;
const FLAG_SENSITIVE: u8 = 0x04;

const HEADER_LEN: usize = 6;
const ATTR_HEADER_LEN: usize = 12;

fn object_flags(obj: &Object) -> u8 {
    let mut flags = 0;
    if obj.is_token() {
        flags |= FLAG_TOKEN;
    }
    if obj.is_private() {
        flags |= FLAG_PRIVATE;
    }
    if obj.is_sensitive() {
        flags |= FLAG_SENSITIVE;
    }
    flags
}

/// Returns the length of the serialized form without building it
pub fn serialized_len(obj: &Object) -> usize {
    obj.attributes()
        .iter()
        .fold(HEADER_LEN, |acc, a| acc + ATTR_HEADER_LEN + a.get_value().len())
}

pub fn serialize_object(obj: &Object) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(serialized_len(obj));
    out.push(FORMAT_V1);
    out.push(object_flags(obj));
    out.extend_from_slice(&u32::try_from(obj.attributes().len())?.to_be_bytes());
    for a in obj.attributes() {
        out.extend_from_slice(&u64::from(a.get_type()).to_be_bytes());
        let val = a.get_value();
        out.extend_from_slice(&u32::try_from(val.len())?.to_be_bytes());
        out.extend_from_slice(val);
    }
    Ok(out)
}

/// Small cursor over the input buffer, any short read is a format error
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = match self.pos.checked_add(len) {
            Some(e) if e <= self.data.len() => e,
            _ => return Err(CKR_GENERAL_ERROR)?,
        };
        let out = &self.data[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.take(4)?.try_into()?))
    }

    fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_be_bytes(self.take(8)?.try_into()?))
    }
}

pub fn deserialize_object(data: &[u8]) -> Result<Object> {
    let mut r = Reader { data: data, pos: 0 };
    if r.u8()? != FORMAT_V1 {
        return Err(CKR_GENERAL_ERROR)?;
    }
    let flags = r.u8()?;
    let count = usize::try_from(r.u32()?)?;
    let mut attrs = Vec::with_capacity(count.min(64));
    for _ in 0..count {
        let ck_type = CK_ULONG::try_from(r.u64()?)?;
        let len = usize::try_from(r.u32()?)?;
        attrs.push(Attribute::from_raw(ck_type, r.take(len)?)?);
    }
    if r.pos != data.len() {
        return Err(CKR_GENERAL_ERROR)?;
    }
    let obj = Object::from_stored(attrs)?;
    if object_flags(&obj) != flags {
        return Err(CKR_GENERAL_ERROR)?;
    }
    Ok(obj)
}
