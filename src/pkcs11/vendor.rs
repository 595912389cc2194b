// Copyright 2025 Simo Sorce
// See LICENSE.txt file for terms

//! PKCS#11 API Vendor extensions

use crate::pkcs11::*;

pub const P11C_VENDOR_OFFSET: CK_ULONG = CKA_VENDOR_DEFINED + 485259;

/* Errors */
pub const P11R_SLOT_CONFIG: CK_ULONG = P11C_VENDOR_OFFSET + 2;

/// Used where no user type is selected (nobody logged in)
pub const P11C_UNSPEC: CK_ULONG = CK_UNAVAILABLE_INFORMATION;
