// Copyright 2024 Simo Sorce
// See LICENSE.txt file for terms

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::*;

use crate::object::Object;
use crate::pool::{ObjectPool, PoolKind};
use crate::storage::memory::MemoryStorage;
use crate::storage::Storage;

pub const TEST_SLOT: CK_SLOT_ID = 10;
pub const RO_SESSION: CK_FLAGS = CKF_SERIAL_SESSION;
pub const RW_SESSION: CK_FLAGS = CKF_SERIAL_SESSION | CKF_RW_SESSION;

macro_rules! make_attribute {
    ($type:expr, bool $value:expr) => {
        Attribute::from_bool($type, $value)
    };
    ($type:expr, ulong $value:expr) => {
        Attribute::from_ulong($type, $value)
    };
    ($type:expr, str $value:expr) => {
        Attribute::from_string($type, String::from($value))
    };
    ($type:expr, bytes $value:expr) => {
        Attribute::from_bytes($type, $value.to_vec())
    };
}

macro_rules! ret_or_panic {
    ($ret:expr) => {
        match $ret {
            Ok(r) => r,
            Err(e) => panic!("{e}"),
        }
    };
}

macro_rules! err_rv {
    ($ret:expr) => {
        match $ret {
            Ok(_) => panic!("operation unexpectedly succeeded"),
            Err(e) => e.rv(),
        }
    };
}

/// Memory storage whose flushes can be made to fail on demand
#[derive(Debug)]
pub struct SwitchStorage {
    inner: Arc<Mutex<MemoryStorage>>,
    fail: Arc<AtomicBool>,
    fail_public: Arc<AtomicBool>,
    flushes: Arc<AtomicUsize>,
}

impl Storage for SwitchStorage {
    fn open(&mut self) -> Result<Vec<Object>> {
        self.inner.lock().unwrap().open()
    }

    fn flush(&mut self, pool: &ObjectPool) -> Result<()> {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst)
            || (pool.kind() == PoolKind::Public
                && self.fail_public.load(Ordering::SeqCst))
        {
            return Err(CKR_DEVICE_ERROR)?;
        }
        self.inner.lock().unwrap().flush(pool)
    }
}

pub struct TestToken {
    pub provider: Provider,
    stored: Arc<Mutex<MemoryStorage>>,
    fail: Arc<AtomicBool>,
    fail_public: Arc<AtomicBool>,
    flushes: Arc<AtomicUsize>,
}

impl TestToken {
    pub fn new() -> TestToken {
        let stored = Arc::new(Mutex::new(MemoryStorage::default()));
        let fail = Arc::new(AtomicBool::new(false));
        let fail_public = Arc::new(AtomicBool::new(false));
        let flushes = Arc::new(AtomicUsize::new(0));
        let storage = SwitchStorage {
            inner: stored.clone(),
            fail: fail.clone(),
            fail_public: fail_public.clone(),
            flushes: flushes.clone(),
        };
        let token = ret_or_panic!(Token::new(Box::new(storage)));
        let provider = Provider::new();
        ret_or_panic!(
            provider.add_slot(TEST_SLOT, Slot::with_token("Test slot", token))
        );
        TestToken {
            provider: provider,
            stored: stored,
            fail: fail,
            fail_public: fail_public,
            flushes: flushes,
        }
    }

    pub fn open(&self, flags: CK_FLAGS) -> CK_SESSION_HANDLE {
        ret_or_panic!(self.provider.open_session(TEST_SLOT, flags))
    }

    /// Opens a read-write session and logs the normal user in
    pub fn user_session(&self) -> CK_SESSION_HANDLE {
        let session = self.open(RW_SESSION);
        if !self.is_logged_in(session) {
            ret_or_panic!(self.provider.login(session, CKU_USER));
        }
        session
    }

    fn is_logged_in(&self, session: CK_SESSION_HANDLE) -> bool {
        ret_or_panic!(self.provider.get_session_state(session))
            == CKS_RW_USER_FUNCTIONS
    }

    pub fn fail_flushes(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Only flushes of the public pool fail
    pub fn fail_public_flushes(&self, fail: bool) {
        self.fail_public.store(fail, Ordering::SeqCst);
    }

    /// Returns what the storage currently holds for both token pools
    pub fn stored_objects(&self) -> Vec<Object> {
        ret_or_panic!(self.stored.lock().unwrap().open())
    }

    pub fn flush_count(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }

    pub fn create(
        &self,
        session: CK_SESSION_HANDLE,
        template: &[Attribute],
    ) -> CK_OBJECT_HANDLE {
        ret_or_panic!(self.provider.create_object(session, template))
    }

    /// Returns the handles of all the objects visible to the session
    pub fn find_all(&self, session: CK_SESSION_HANDLE) -> Vec<CK_OBJECT_HANDLE> {
        self.find(session, &[])
    }

    pub fn find(
        &self,
        session: CK_SESSION_HANDLE,
        template: &[Attribute],
    ) -> Vec<CK_OBJECT_HANDLE> {
        ret_or_panic!(self.provider.find_objects_init(session, template));
        let handles = ret_or_panic!(self.provider.find_objects(session, 100));
        ret_or_panic!(self.provider.find_objects_final(session));
        handles
    }

    /// Reads a single attribute, returning its value or the error code
    pub fn get_attr(
        &self,
        session: CK_SESSION_HANDLE,
        handle: CK_OBJECT_HANDLE,
        ck_type: CK_ATTRIBUTE_TYPE,
    ) -> std::result::Result<Vec<u8>, CK_RV> {
        let mut probe = [AttrRequest::length_of(ck_type)];
        if let Err(e) =
            self.provider.get_attribute_value(session, handle, &mut probe)
        {
            return Err(e.rv());
        }
        let mut buf = vec![0u8; probe[0].len as usize];
        let mut req = [AttrRequest::with_buffer(ck_type, &mut buf)];
        if let Err(e) =
            self.provider.get_attribute_value(session, handle, &mut req)
        {
            return Err(e.rv());
        }
        match req[0].filled() {
            Some(v) => Ok(v.to_vec()),
            None => Err(CKR_GENERAL_ERROR),
        }
    }
}

pub fn data_template(token: bool, private: bool, label: &str) -> Vec<Attribute> {
    vec![
        make_attribute!(CKA_CLASS, ulong CKO_DATA),
        make_attribute!(CKA_TOKEN, bool token),
        make_attribute!(CKA_PRIVATE, bool private),
        make_attribute!(CKA_LABEL, str label),
        make_attribute!(CKA_VALUE, bytes b"some data"),
    ]
}

pub fn secret_template(token: bool, private: bool, label: &str) -> Vec<Attribute> {
    vec![
        make_attribute!(CKA_CLASS, ulong CKO_SECRET_KEY),
        make_attribute!(CKA_KEY_TYPE, ulong CKK_AES),
        make_attribute!(CKA_TOKEN, bool token),
        make_attribute!(CKA_PRIVATE, bool private),
        make_attribute!(CKA_LABEL, str label),
        make_attribute!(CKA_VALUE, bytes [0x2bu8; 16]),
    ]
}
