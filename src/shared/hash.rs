use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// SHA-256 of a file's contents, hex encoded.
pub fn hash_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let read = file.read(&mut buf)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(hex_encode(&hasher.finalize()))
}

pub fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn hash_is_stable_for_same_content() {
        let dir = tempdir().expect("tempdir");
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.txt");
        fs::write(&a, b"metric: 1\n").expect("write a");
        fs::write(&b, b"metric: 1\n").expect("write b");
        assert_eq!(
            hash_file(&a).expect("hash a"),
            hash_file(&b).expect("hash b")
        );
    }

    #[test]
    fn hash_changes_with_content() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("a.txt");
        fs::write(&path, b"v1").expect("write");
        let first = hash_file(&path).expect("hash v1");
        fs::write(&path, b"v2").expect("rewrite");
        let second = hash_file(&path).expect("hash v2");
        assert_ne!(first, second);
    }
}
