// Copyright 2025 Simo Sorce
// See LICENSE.txt file for terms

//! Per session search state.

use crate::attribute::Attribute;
use crate::error::Result;
use crate::object::Object;
use crate::pkcs11::*;

/// The filters a search can be initialized with
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchFilter {
    /// Matches every visible object
    All,
    /// Matches objects whose label is exactly the given bytes
    Label(Vec<u8>),
}

impl SearchFilter {
    /// Builds a filter from a search template
    ///
    /// Only an empty template or a template holding just CKA_LABEL are
    /// accepted, anything else fails with CKR_FUNCTION_NOT_SUPPORTED.
    pub fn from_template(template: &[Attribute]) -> Result<SearchFilter> {
        match template {
            [] => Ok(SearchFilter::All),
            [a] if a.get_type() == CKA_LABEL => {
                Ok(SearchFilter::Label(a.get_value().to_vec()))
            }
            _ => Err(CKR_FUNCTION_NOT_SUPPORTED)?,
        }
    }

    pub fn matches(&self, obj: &Object) -> bool {
        match self {
            SearchFilter::All => true,
            SearchFilter::Label(l) => obj.match_label(l),
        }
    }
}

/// A snapshot of matching handles and a cursor into it
#[derive(Debug, Default)]
pub struct SearchContext {
    matches: Vec<CK_OBJECT_HANDLE>,
    cursor: usize,
}

impl SearchContext {
    pub fn new(matches: Vec<CK_OBJECT_HANDLE>) -> SearchContext {
        SearchContext {
            matches: matches,
            cursor: 0,
        }
    }

    /// Returns up to `max` handles from the cursor on and advances it.
    ///
    /// Handles for which `live` returns false (objects destroyed after
    /// the search was initialized) are skipped. An exhausted or empty
    /// context returns no handles.
    pub fn next<F>(&mut self, max: usize, live: F) -> Vec<CK_OBJECT_HANDLE>
    where
        F: Fn(CK_OBJECT_HANDLE) -> bool,
    {
        let mut out = Vec::with_capacity(max.min(self.remaining()));
        while out.len() < max && self.cursor < self.matches.len() {
            let handle = self.matches[self.cursor];
            self.cursor += 1;
            if live(handle) {
                out.push(handle);
            }
        }
        out
    }

    pub fn remaining(&self) -> usize {
        self.matches.len() - self.cursor
    }

    pub fn is_finished(&self) -> bool {
        self.cursor >= self.matches.len()
    }

    /// Releases the snapshot and resets the cursor
    pub fn finalize(&mut self) {
        self.matches = Vec::new();
        self.cursor = 0;
    }
}
