//! Building blocks shared by the rcmark crates that do not depend on the
//! collector itself.

#[macro_use]
extern crate log;

pub mod alloc;
