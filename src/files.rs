//! File utilities (C1)
//!
//! Safe-name checks, SHA-256 hashing, temp-then-rename copy, integrity
//! verification, directory pruning, and GPG encrypt-to-recipient.

use anyhow::{Context, Result};
use pgp::composed::{Deserializable, Message, SignedPublicKey};
use pgp::crypto::sym::SymmetricKeyAlgorithm;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{BufReader, Cursor, Read, Write};
use std::path::Path;
use std::process::Command;
use std::time::SystemTime;

const HASH_CHUNK_SIZE: usize = 4096;

const DANGEROUS_SUBSTRINGS: &[&str] = &["..", ">", "<", "|", "*", "$", "&", ";", "`"];

/// Rejects control characters, path-traversal and shell metacharacters, and
/// unsafe leading characters on the final path component.
pub fn is_name_safe(name: &str, is_path: bool) -> bool {
    if name.is_empty() {
        return false;
    }
    for b in name.bytes() {
        if b < 0x20 || b == 0x7F {
            return false;
        }
    }
    for needle in DANGEROUS_SUBSTRINGS {
        if name.contains(needle) {
            return false;
        }
    }
    if name.contains('\\') {
        return false;
    }
    if !is_path && name.contains('/') {
        return false;
    }
    let final_component = name.rsplit('/').next().unwrap_or(name);
    if final_component != "." && final_component != ".." {
        if final_component.starts_with('-') || final_component.starts_with('.') {
            return false;
        }
    }
    true
}

/// SHA-256 of a file's contents, read in 4 KiB chunks.
pub fn hash_file(path: &Path) -> Result<String> {
    let file = File::open(path).with_context(|| format!("failed to open {:?} for hashing", path))?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; HASH_CHUNK_SIZE];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Copies `src` to `dst` via a `.copying` sibling file and an atomic rename.
/// Never leaves a partial file at `dst`.
pub fn copy_temp_then_rename(src: &Path, dst: &Path) -> Result<()> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create parent directory for {:?}", dst))?;
    }
    let temp = temp_path_for(dst);
    if temp.exists() {
        fs::remove_file(&temp).ok();
    }

    let result = fs::copy(src, &temp)
        .with_context(|| format!("failed to copy {:?} to {:?}", src, temp))
        .and_then(|_| {
            fs::rename(&temp, dst)
                .with_context(|| format!("failed to rename {:?} to {:?}", temp, dst))
        });

    if result.is_err() && temp.exists() {
        fs::remove_file(&temp).ok();
    }
    result
}

fn temp_path_for(dst: &Path) -> std::path::PathBuf {
    let mut s = dst.as_os_str().to_owned();
    s.push(".copying");
    std::path::PathBuf::from(s)
}

/// Result of comparing the hashes of two files.
pub struct IntegrityResult {
    pub equal: bool,
    pub hash_a: String,
    pub hash_b: String,
}

/// Computes and compares the hashes of `a` and `b`. An empty file always
/// fails (reports `equal: false`), since a zero-byte copy can never be
/// trusted to represent a successful transfer.
pub fn verify_integrity(a: &Path, b: &Path) -> Result<IntegrityResult> {
    let size_a = fs::metadata(a).map(|m| m.len()).unwrap_or(0);
    let size_b = fs::metadata(b).map(|m| m.len()).unwrap_or(0);
    let hash_a = hash_file(a)?;
    let hash_b = hash_file(b)?;
    let equal = size_a > 0 && size_b > 0 && hash_a == hash_b;
    Ok(IntegrityResult { equal, hash_a, hash_b })
}

/// Encrypts `plain` to `cipher` using the first public key found in
/// `key_file`, trusting it unconditionally (matches `always_trust` in the
/// GPG wrapper this replaces).
pub fn encrypt_to_recipient(plain: &Path, cipher: &Path, key_file: &Path) -> Result<()> {
    let key_bytes = fs::read(key_file)
        .with_context(|| format!("failed to read encryption key file {:?}", key_file))?;
    let (public_key, _headers) = SignedPublicKey::from_armor_single(Cursor::new(&key_bytes))
        .with_context(|| format!("no importable public key found in {:?}", key_file))?;

    let plaintext = fs::read(plain).with_context(|| format!("failed to read {:?}", plain))?;
    let message = Message::new_literal_bytes(
        plain.file_name().and_then(|n| n.to_str()).unwrap_or("file"),
        &plaintext,
    );

    let mut rng = rand::thread_rng();
    let encrypted = message
        .encrypt_to_keys(&mut rng, SymmetricKeyAlgorithm::AES256, &[&public_key])
        .context("encryption to recipient failed")?;

    let armored = encrypted
        .to_armored_bytes(None)
        .context("failed to serialize encrypted message")?;

    let mut out = File::create(cipher).with_context(|| format!("failed to create {:?}", cipher))?;
    out.write_all(&armored)?;
    Ok(())
}

/// True iff the file has not been modified in the last `stability_seconds`.
pub fn is_file_stable(path: &Path, stability_seconds: u64) -> bool {
    let mtime = match fs::metadata(path).and_then(|m| m.modified()) {
        Ok(t) => t,
        Err(_) => return false,
    };
    match SystemTime::now().duration_since(mtime) {
        Ok(elapsed) => elapsed.as_secs() > stability_seconds,
        Err(_) => false,
    }
}

/// Shells out to `lsof` to check whether any process holds the file open.
/// On any prober error (including `lsof` being absent) returns `false` and
/// lets the caller decide whether to log.
pub fn is_file_open(path: &Path) -> bool {
    match Command::new("lsof").arg(path).output() {
        Ok(output) => output.status.success() && !output.stdout.is_empty(),
        Err(_) => false,
    }
}

/// Bottom-up pruning of empty directories under `root`. Never removes
/// `root` itself when `keep_root` is set.
pub fn remove_empty_directories(root: &Path, keep_root: bool) -> Result<()> {
    if !root.is_dir() {
        return Ok(());
    }
    let mut subdirs = Vec::new();
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            subdirs.push(entry.path());
        }
    }
    for dir in subdirs {
        remove_empty_directories(&dir, false)?;
    }
    if !keep_root {
        let mut entries = fs::read_dir(root)?;
        if entries.next().is_none() {
            fs::remove_dir(root).ok();
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_is_name_safe_rejects_traversal() {
        assert!(!is_name_safe("../etc/passwd", true));
        assert!(!is_name_safe("foo/../bar", true));
    }

    #[test]
    fn test_is_name_safe_rejects_slash_when_not_path() {
        assert!(!is_name_safe("a/b", false));
        assert!(is_name_safe("a/b", true));
    }

    #[test]
    fn test_is_name_safe_allows_dot_components() {
        assert!(is_name_safe(".", true));
        assert!(is_name_safe("..", true));
        assert!(!is_name_safe(".hidden", true));
    }

    #[test]
    fn test_is_name_safe_rejects_control_bytes() {
        assert!(!is_name_safe("foo\u{0007}bar", false));
    }

    #[test]
    fn test_hash_file_matches_known_digest() {
        let temp = tempdir().unwrap();
        let p = temp.path().join("a.txt");
        fs::write(&p, b"hello").unwrap();
        let hash = hash_file(&p).unwrap();
        assert_eq!(
            hash,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn test_copy_temp_then_rename_no_partial_leftover() {
        let temp = tempdir().unwrap();
        let src = temp.path().join("src.bin");
        let dst = temp.path().join("nested").join("dst.bin");
        fs::write(&src, b"payload").unwrap();

        copy_temp_then_rename(&src, &dst).unwrap();

        assert!(dst.exists());
        assert!(!temp_path_for(&dst).exists());
        assert_eq!(fs::read(&dst).unwrap(), b"payload");
    }

    #[test]
    fn test_verify_integrity_fails_on_empty_file() {
        let temp = tempdir().unwrap();
        let a = temp.path().join("a");
        let b = temp.path().join("b");
        fs::write(&a, b"").unwrap();
        fs::write(&b, b"").unwrap();
        let result = verify_integrity(&a, &b).unwrap();
        assert!(!result.equal);
    }

    #[test]
    fn test_verify_integrity_matches_identical_content() {
        let temp = tempdir().unwrap();
        let a = temp.path().join("a");
        let b = temp.path().join("b");
        fs::write(&a, b"same bytes").unwrap();
        fs::write(&b, b"same bytes").unwrap();
        let result = verify_integrity(&a, &b).unwrap();
        assert!(result.equal);
    }

    #[test]
    fn test_is_file_stable_false_for_fresh_file() {
        let temp = tempdir().unwrap();
        let p = temp.path().join("fresh.txt");
        fs::write(&p, b"data").unwrap();
        assert!(!is_file_stable(&p, 5));
    }

    #[test]
    fn test_remove_empty_directories_prunes_bottom_up() {
        let temp = tempdir().unwrap();
        let nested = temp.path().join("a").join("b").join("c");
        fs::create_dir_all(&nested).unwrap();

        remove_empty_directories(temp.path(), true).unwrap();

        assert!(temp.path().exists());
        assert!(!temp.path().join("a").exists());
    }

    #[test]
    fn test_remove_empty_directories_keeps_non_empty() {
        let temp = tempdir().unwrap();
        let nested = temp.path().join("a").join("b");
        fs::create_dir_all(&nested).unwrap();
        fs::write(nested.join("keep.txt"), b"x").unwrap();

        remove_empty_directories(temp.path(), true).unwrap();

        assert!(nested.join("keep.txt").exists());
    }
}
