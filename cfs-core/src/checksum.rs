// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cookbook file checksums
//!
//! Chef identifies cookbook files by the hex MD5 of their content.

use md5::{Digest, Md5};

/// Hex-encoded MD5 of `data`
pub fn md5_hex(data: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_md5_hex() {
        assert_eq!(md5_hex(b""), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(md5_hex(b"hello"), "5d41402abc4b2a76b9719d911017c592");
    }
}
