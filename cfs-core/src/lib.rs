// SPDX-License-Identifier: AGPL-3.0-or-later
//! Chef FS Core
//!
//! The entry contract every backend implements, the logical path type, the
//! error taxonomy, and the tree algorithms (resolve, list, compare, diff,
//! copy) that walk two roots in lock-step.

pub mod checksum;
pub mod entry;
pub mod error;
pub mod memory;
pub mod nonexistent;
pub mod operations;
pub mod path;
pub mod pattern;

pub use entry::{ChildCache, Comparison, Content, Entry, EntryBase, EntryRef};
pub use error::{BackendError, CfsError, CfsResult, Operation};
pub use memory::MemoryEntry;
pub use nonexistent::NonexistentEntry;
pub use path::ChefPath;
pub use pattern::{FilePattern, PatternError};
