// Copyright 2023 Simo Sorce
// See LICENSE.txt file for terms

use crate::error::Result;
use crate::pkcs11::*;
use crate::pool::{ObjectPool, PoolKind};
use crate::search::SearchContext;

use log::debug;

/// A session: its authentication state, its transient objects and its
/// search slot
#[derive(Debug)]
pub struct Session {
    handle: CK_SESSION_HANDLE,
    slot_id: CK_SLOT_ID,
    state: CK_STATE,
    objects: ObjectPool,
    search: SearchContext,
}

impl Session {
    pub fn new(
        slot_id: CK_SLOT_ID,
        handle: CK_SESSION_HANDLE,
        flags: CK_FLAGS,
    ) -> Result<Session> {
        if flags & CKF_SERIAL_SESSION != CKF_SERIAL_SESSION {
            return Err(CKR_ARGUMENTS_BAD)?;
        }
        let state = if flags & CKF_RW_SESSION == CKF_RW_SESSION {
            CKS_RW_PUBLIC_SESSION
        } else {
            CKS_RO_PUBLIC_SESSION
        };
        Ok(Session {
            handle: handle,
            slot_id: slot_id,
            state: state,
            objects: ObjectPool::new(PoolKind::Session),
            search: SearchContext::default(),
        })
    }

    pub fn get_handle(&self) -> CK_SESSION_HANDLE {
        self.handle
    }

    pub fn get_slot_id(&self) -> CK_SLOT_ID {
        self.slot_id
    }

    pub fn get_state(&self) -> CK_STATE {
        self.state
    }

    /* a user type of CK_UNAVAILABLE_INFORMATION effects a "logout" to public */
    pub fn change_session_state(&mut self, user_type: CK_USER_TYPE) -> CK_RV {
        match self.state {
            CKS_RO_PUBLIC_SESSION => match user_type {
                CK_UNAVAILABLE_INFORMATION => CKR_OK,
                CKU_USER => {
                    self.state = CKS_RO_USER_FUNCTIONS;
                    CKR_OK
                }
                CKU_SO => CKR_SESSION_READ_ONLY,
                _ => CKR_USER_TYPE_INVALID,
            },
            CKS_RW_PUBLIC_SESSION => match user_type {
                CK_UNAVAILABLE_INFORMATION => CKR_OK,
                CKU_USER => {
                    self.state = CKS_RW_USER_FUNCTIONS;
                    CKR_OK
                }
                CKU_SO => {
                    self.state = CKS_RW_SO_FUNCTIONS;
                    CKR_OK
                }
                _ => CKR_USER_TYPE_INVALID,
            },
            CKS_RO_USER_FUNCTIONS => match user_type {
                CK_UNAVAILABLE_INFORMATION => {
                    self.state = CKS_RO_PUBLIC_SESSION;
                    CKR_OK
                }
                CKU_USER => CKR_OK,
                CKU_SO => CKR_USER_ANOTHER_ALREADY_LOGGED_IN,
                _ => CKR_USER_TYPE_INVALID,
            },
            CKS_RW_USER_FUNCTIONS => match user_type {
                CK_UNAVAILABLE_INFORMATION => {
                    self.state = CKS_RW_PUBLIC_SESSION;
                    CKR_OK
                }
                CKU_USER => CKR_OK,
                CKU_SO => CKR_USER_ANOTHER_ALREADY_LOGGED_IN,
                _ => CKR_USER_TYPE_INVALID,
            },
            CKS_RW_SO_FUNCTIONS => match user_type {
                CK_UNAVAILABLE_INFORMATION => {
                    self.state = CKS_RW_PUBLIC_SESSION;
                    CKR_OK
                }
                CKU_USER => CKR_USER_ANOTHER_ALREADY_LOGGED_IN,
                CKU_SO => CKR_OK,
                _ => CKR_USER_TYPE_INVALID,
            },
            _ => CKR_GENERAL_ERROR,
        }
    }

    pub fn is_writable(&self) -> bool {
        match self.state {
            CKS_RW_PUBLIC_SESSION => true,
            CKS_RW_USER_FUNCTIONS => true,
            CKS_RW_SO_FUNCTIONS => true,
            _ => false,
        }
    }

    /// True only for a read-write session with the normal user logged in,
    /// the only state that grants access to private token objects
    pub fn is_rw_user(&self) -> bool {
        self.state == CKS_RW_USER_FUNCTIONS
    }

    pub fn objects(&self) -> &ObjectPool {
        &self.objects
    }

    pub fn objects_mut(&mut self) -> &mut ObjectPool {
        &mut self.objects
    }

    pub fn search_mut(&mut self) -> &mut SearchContext {
        &mut self.search
    }

    /// Installs a new search, dropping any previous one
    pub fn set_search(&mut self, search: SearchContext) {
        self.search.finalize();
        self.search = search;
    }

    /// Releases all the session resources
    pub fn close(&mut self) {
        debug!(
            "Closing session {}, releasing {} objects",
            self.handle,
            self.objects.len()
        );
        self.search.finalize();
        self.objects.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_required() {
        let err = Session::new(0, 1, CKF_RW_SESSION).unwrap_err();
        assert_eq!(err.rv(), CKR_ARGUMENTS_BAD);
    }

    #[test]
    fn state_machine() {
        let mut s = Session::new(0, 1, CKF_SERIAL_SESSION).unwrap();
        assert!(!s.is_writable());
        assert_eq!(s.change_session_state(CKU_USER), CKR_OK);
        assert_eq!(s.get_state(), CKS_RO_USER_FUNCTIONS);
        assert!(!s.is_rw_user());

        let mut s =
            Session::new(0, 2, CKF_SERIAL_SESSION | CKF_RW_SESSION).unwrap();
        assert!(s.is_writable());
        assert_eq!(s.change_session_state(CKU_USER), CKR_OK);
        assert!(s.is_rw_user());
        assert_eq!(
            s.change_session_state(CKU_SO),
            CKR_USER_ANOTHER_ALREADY_LOGGED_IN
        );
        assert_eq!(s.change_session_state(CK_UNAVAILABLE_INFORMATION), CKR_OK);
        assert_eq!(s.get_state(), CKS_RW_PUBLIC_SESSION);
        assert_eq!(s.change_session_state(CKU_SO), CKR_OK);
        assert!(!s.is_rw_user());
    }
}
