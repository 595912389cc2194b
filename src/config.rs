// Copyright 2024 Simo Sorce
// See LICENSE.txt file for terms

use std::env;
use std::fs;
use std::path::Path;

use crate::error::{Error, Result};
use crate::pkcs11::vendor::P11R_SLOT_CONFIG;
use crate::pkcs11::*;

use serde::{Deserialize, Serialize};
use toml;

pub const DEFAULT_CONF_NAME: &str = "token.conf";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Slot {
    pub slot: u32,
    pub description: Option<String>,
    pub dbtype: Option<String>,
    pub dbpath: Option<String>,
}

impl Slot {
    pub fn new() -> Slot {
        Slot::default()
    }

    pub fn with_db(slot: u32, dbtype: &str, dbpath: Option<String>) -> Slot {
        Slot {
            slot: slot,
            description: None,
            dbtype: Some(dbtype.to_string()),
            dbpath: dbpath,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub slots: Vec<Slot>,
}

impl Config {
    pub fn new() -> Config {
        Config { slots: Vec::new() }
    }

    pub fn add_slot(&mut self, slot: Slot) -> Result<()> {
        for s in &self.slots {
            if slot.slot == s.slot {
                return Err(Error::ck_rv_with_errmsg(
                    P11R_SLOT_CONFIG,
                    format!("slot {} is defined more than once", slot.slot),
                ));
            }
        }
        self.slots.push(slot);
        Ok(())
    }

    pub fn find_conf() -> Result<String> {
        /* First check for our own env var,
         * this has the highest precedence */
        if let Ok(var) = env::var("P11CORE_CONF") {
            return Ok(var);
        }
        /* Freedesktop specification for config dirs first
         * then fallback to use $HOME/.config */
        let conffile = match env::var("XDG_CONFIG_HOME") {
            Ok(xdg) => format!("{}/p11core/{}", xdg, DEFAULT_CONF_NAME),
            Err(_) => match env::var("HOME") {
                Ok(home) => {
                    format!("{}/.config/p11core/{}", home, DEFAULT_CONF_NAME)
                }
                Err(_) => return Err(CKR_ARGUMENTS_BAD)?,
            },
        };
        if Path::new(&conffile).is_file() {
            Ok(conffile)
        } else {
            Err(CKR_ARGUMENTS_BAD)?
        }
    }

    pub fn from_str(config_str: &str) -> Result<Config> {
        let parsed: Config = toml::from_str(config_str)?;
        /* re-add to catch duplicated slot numbers */
        let mut conf = Config::new();
        for slot in parsed.slots {
            conf.add_slot(slot)?;
        }
        Ok(conf)
    }

    pub fn from_file(filename: &str) -> Result<Config> {
        let config_str = fs::read_to_string(filename)?;
        Self::from_str(&config_str)
    }

    /// Loads the configuration from the default locations
    pub fn default_config() -> Result<Config> {
        Self::from_file(&Self::find_conf()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn parse_slots() {
        let conf = Config::from_str(
            r#"
[[slots]]
slot = 1
description = "Test slot"
dbtype = "json"
dbpath = "/tmp/objects.json"

[[slots]]
slot = 2
"#,
        )
        .unwrap();
        assert_eq!(conf.slots.len(), 2);
        assert_eq!(conf.slots[0].dbtype.as_deref(), Some("json"));
        assert!(conf.slots[1].dbtype.is_none());
    }

    #[test]
    fn duplicate_slots() {
        let err = Config::from_str("[[slots]]\nslot = 3\n[[slots]]\nslot = 3\n")
            .unwrap_err();
        assert_eq!(err.rv(), P11R_SLOT_CONFIG);
        assert_eq!(err.to_string(), "slot 3 is defined more than once");

        let err = Config::from_str("slots = 12").unwrap_err();
        assert_eq!(err.rv(), CKR_TOKEN_NOT_RECOGNIZED);
    }

    #[test]
    #[serial]
    fn conf_from_env() {
        env::set_var("P11CORE_CONF", "/some/where/token.conf");
        assert_eq!(Config::find_conf().unwrap(), "/some/where/token.conf");
        env::remove_var("P11CORE_CONF");
    }
}
