// SPDX-License-Identifier: AGPL-3.0-or-later
//! Fuzz target for ChefPath parsing and joining

#![no_main]

use cfs_core::path::{join_printable, split, ChefPath};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(input) = std::str::from_utf8(data) else {
        return;
    };
    let path = ChefPath::parse(input);

    // Display and parse agree
    assert_eq!(ChefPath::parse(path.to_string()), path);
    assert_eq!(path.segments().len(), split(input).count());

    if let Some(parent) = path.parent() {
        let name = path.name().unwrap_or_default();
        assert_eq!(parent.join(name), path);
        assert_eq!(path.relative_to(&parent).as_deref(), Some(name));
    } else {
        assert!(path.is_root());
    }
    assert_eq!(path.relative_to(&ChefPath::root()), Some(path.segments().join("/")));

    if let Some((head, tail)) = input.split_once('|') {
        let _ = join_printable(head, tail);
        let _ = ChefPath::parse(head).join(tail);
    }
});
