//! Concrete [`crate::source::SourceMount`] implementations bundled with the
//! core for testing and demos. Neither is part of the union-mount engine
//! proper (§1 places "individual source-plugin implementations" out of
//! scope), but both are grounded on teacher reference implementations and
//! are what the test suite and `demos/mirror_mount` stack.

pub mod memory;
pub mod passthrough;
