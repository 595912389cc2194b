// Copyright 2025 Simo Sorce
// See LICENSE.txt file for terms

//! Operation sets that object builders attach to the objects they create.
//!
//! No mechanism is executed by this crate; the capability only records
//! which family of operations a later crypto layer may run on the object.

use crate::pkcs11::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Capability {
    /// The object supports no cryptographic operation
    #[default]
    Unavailable,
    /// The object can be used as a symmetric cipher key
    SymmetricCipher { key_type: CK_KEY_TYPE },
}

impl Capability {
    pub fn can_encrypt(&self) -> bool {
        matches!(self, Capability::SymmetricCipher { .. })
    }

    pub fn can_decrypt(&self) -> bool {
        matches!(self, Capability::SymmetricCipher { .. })
    }

    pub fn key_type(&self) -> Option<CK_KEY_TYPE> {
        match self {
            Capability::Unavailable => None,
            Capability::SymmetricCipher { key_type } => Some(*key_type),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symmetric() {
        let cap = Capability::SymmetricCipher { key_type: CKK_AES };
        assert!(cap.can_encrypt() && cap.can_decrypt());
        assert_eq!(cap.key_type(), Some(CKK_AES));
        assert!(!Capability::default().can_encrypt());
        assert_eq!(Capability::Unavailable.key_type(), None);
    }
}
