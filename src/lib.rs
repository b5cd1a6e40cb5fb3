//! mergefs - a userspace composite (union-mount) filesystem engine.
//!
//! A mount stacks an ordered list of [`source::SourceMount`] implementations
//! into one virtual namespace: the top layer is the sole writable one,
//! lower layers are read-through, writes to a lower-owned path trigger a
//! copy-up (`copy_up`), and a bidirectional rename journal
//! (`rename_store`) lets the virtual namespace diverge from every
//! individual source's own tree without mutating any of them.

pub mod buffer;
pub mod composite_mount;
pub mod config;
pub mod copy_up;
pub mod error;
pub mod metadata_store;
pub mod path;
pub mod registry;
pub mod rename_store;
pub mod resolver;
pub mod source;
pub mod sources;
