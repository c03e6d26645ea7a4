// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Abstract syntax tree of policy modules.
//!
//! Terms wrap [`Value`]s with an optional [`Location`]. Locations never
//! take part in comparison, equality or hashing, so two trees parsed from
//! different files compare equal when their content does.

mod annotations;
mod display;
mod json;
mod policy;
mod term;

pub use annotations::*;
pub use policy::*;
pub use term::*;

/// Implements `PartialEq`, `Eq`, `PartialOrd`, `Ord` and `Hash` for a node in
/// terms of a key made of its content fields. Locations are left out of the
/// key.
macro_rules! impl_structural_eq {
    ($t:ty, $s:ident => $key:expr) => {
        impl $t {
            fn structural_key(&self) -> impl Ord + core::hash::Hash + '_ {
                let $s = self;
                $key
            }
        }

        impl PartialEq for $t {
            fn eq(&self, other: &Self) -> bool {
                self.cmp(other) == core::cmp::Ordering::Equal
            }
        }

        impl Eq for $t {}

        impl PartialOrd for $t {
            fn partial_cmp(&self, other: &Self) -> Option<core::cmp::Ordering> {
                Some(self.cmp(other))
            }
        }

        impl Ord for $t {
            fn cmp(&self, other: &Self) -> core::cmp::Ordering {
                self.structural_key().cmp(&other.structural_key())
            }
        }

        impl core::hash::Hash for $t {
            fn hash<H: core::hash::Hasher>(&self, state: &mut H) {
                self.structural_key().hash(state)
            }
        }
    };
}

pub(crate) use impl_structural_eq;
