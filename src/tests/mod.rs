// Copyright 2023 Simo Sorce
// See LICENSE.txt file for terms

use super::*;

#[macro_use]
mod util;
use util::*;

mod objects;
mod search;
