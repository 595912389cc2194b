use crate::attribute::{AttrType, Attribute};
use crate::error::{Error, Result};
use crate::map_err;
use crate::object::Object;
use crate::pkcs11::*;
use crate::pool::ObjectPool;

use data_encoding::BASE64;
use serde::{Deserialize, Serialize};
use serde_json::{from_reader, to_string_pretty, Number, Value};

fn to_json_value(a: &Attribute) -> Value {
    match a.get_attrtype() {
        AttrType::BoolType => match a.to_bool() {
            Ok(b) => Value::Bool(b),
            Err(_) => Value::Null,
        },
        AttrType::NumType => match a.to_ulong() {
            Ok(l) => Value::Number(Number::from(u64::from(l))),
            Err(_) => Value::Null,
        },
        AttrType::StringType => match a.to_string() {
            Ok(s) => Value::String(s),
            Err(_) => Value::Null,
        },
        AttrType::BytesType => Value::String(BASE64.encode(a.get_value())),
        AttrType::DateType => match a.to_date_string() {
            Ok(d) => Value::String(d),
            Err(_) => Value::Null,
        },
    }
}

fn from_json_value(key: &str, val: &Value) -> Result<Attribute> {
    let (id, atype) = AttrType::attr_name_to_id_type(key)?;
    let attr = match atype {
        AttrType::BoolType => match val.as_bool() {
            Some(b) => Attribute::from_bool(id, b),
            None => return Err(CKR_ATTRIBUTE_VALUE_INVALID)?,
        },
        AttrType::NumType => match val.as_u64() {
            Some(n) => Attribute::from_u64(id, n)?,
            None => return Err(CKR_ATTRIBUTE_VALUE_INVALID)?,
        },
        AttrType::StringType => match val.as_str() {
            Some(s) => Attribute::from_string(id, s.to_string()),
            None => return Err(CKR_ATTRIBUTE_VALUE_INVALID)?,
        },
        AttrType::BytesType => match val.as_str() {
            Some(s) => Attribute::from_bytes(
                id,
                map_err!(BASE64.decode(s.as_bytes()), CKR_ATTRIBUTE_VALUE_INVALID)?,
            ),
            None => return Err(CKR_ATTRIBUTE_VALUE_INVALID)?,
        },
        AttrType::DateType => match val.as_str() {
            Some(s) => Attribute::from_date_string(id, s)?,
            None => return Err(CKR_ATTRIBUTE_VALUE_INVALID)?,
        },
    };
    Ok(attr)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonObject {
    token: bool,
    private: bool,
    sensitive: bool,
    /* attributes in store order, as name/value pairs */
    attributes: Vec<(String, Value)>,
}

impl JsonObject {
    pub fn from_object(o: &Object) -> JsonObject {
        JsonObject {
            token: o.is_token(),
            private: o.is_private(),
            sensitive: o.is_sensitive(),
            attributes: o
                .attributes()
                .iter()
                .map(|a| (a.name(), to_json_value(a)))
                .collect(),
        }
    }

    pub fn to_object(&self) -> Result<Object> {
        let mut attrs = Vec::with_capacity(self.attributes.len());
        for (key, val) in &self.attributes {
            attrs.push(from_json_value(key, val)?);
        }
        let obj = Object::from_stored(attrs)?;
        if obj.is_token() != self.token
            || obj.is_private() != self.private
            || obj.is_sensitive() != self.sensitive
        {
            return Err(CKR_GENERAL_ERROR)?;
        }
        Ok(obj)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JsonObjects {
    #[serde(default)]
    pub public: Vec<JsonObject>,
    #[serde(default)]
    pub private: Vec<JsonObject>,
}

impl JsonObjects {
    /// Loads the file, a missing file is an empty token
    pub fn load(filename: &str) -> Result<JsonObjects> {
        match std::fs::File::open(filename) {
            Ok(f) => Ok(from_reader::<std::fs::File, JsonObjects>(f)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok(JsonObjects::default())
            }
            Err(e) => Err(Error::other_error(e)),
        }
    }

    pub fn objects(&self) -> Result<Vec<Object>> {
        let mut objects = Vec::with_capacity(self.public.len() + self.private.len());
        for jo in self.public.iter().chain(self.private.iter()) {
            objects.push(jo.to_object()?);
        }
        Ok(objects)
    }

    pub fn from_pool(pool: &ObjectPool) -> Vec<JsonObject> {
        pool.iter().map(JsonObject::from_object).collect()
    }

    /// Writes the file through a temporary copy so that a failed write
    /// never truncates the previous contents
    pub fn save(&self, filename: &str) -> Result<()> {
        let jstr = match to_string_pretty(&self) {
            Ok(j) => j,
            Err(e) => return Err(Error::other_error(e)),
        };
        let tmpname = format!("{}.tmp", filename);
        std::fs::write(&tmpname, jstr)?;
        std::fs::rename(&tmpname, filename)?;
        Ok(())
    }
}
