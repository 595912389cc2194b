// Copyright 2024 Simo Sorce
// See LICENSE.txt file for terms

/* misc utilities that do not really belong in any module */

use crate::error::{Error, Result};
use crate::pkcs11::*;

pub const CK_ULONG_SIZE: usize = std::mem::size_of::<CK_ULONG>();

#[macro_export]
macro_rules! map_err {
    ($map:expr, $err:tt) => {{
        $map.map_err(|e| $crate::error::Error::ck_rv_from_error($err, e))
    }};
}

/// Overwrites a buffer with zeros in a way the compiler will not elide
pub fn zeromem(mem: &mut [u8]) {
    for b in mem.iter_mut() {
        /* Safety: the pointer comes from a valid mutable reference */
        unsafe { std::ptr::write_volatile(b, 0) };
    }
    std::sync::atomic::compiler_fence(std::sync::atomic::Ordering::SeqCst);
}

/// Maps a lock poisoning error to CKR_GENERAL_ERROR
pub fn poisoned<T>(_: std::sync::PoisonError<T>) -> Error {
    Error::ck_rv(CKR_GENERAL_ERROR)
}

/// Converts a native length into the CK_ULONG used by the API
pub fn ulong_len(len: usize) -> Result<CK_ULONG> {
    Ok(CK_ULONG::try_from(len)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zeromem_clears() {
        let mut buf = [0xa5u8; 16];
        zeromem(&mut buf);
        assert_eq!(buf, [0u8; 16]);
    }
}
