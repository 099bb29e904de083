//! Tests for the signature policy and key ring.

use rstest::{fixture, rstest};
use tempfile::TempDir;

use super::*;

/// Accepts a signature equal to the key followed by the message.
struct ConcatVerifier;

impl SignatureVerifier for ConcatVerifier {
    fn verify(&self, public_key: &[u8], message: &[u8], signature: &[u8]) -> bool {
        signature.len() == public_key.len() + message.len()
            && signature.starts_with(public_key)
            && signature.ends_with(message)
    }
}

fn sign(key: &[u8], message: &[u8]) -> Vec<u8> {
    [key, message].concat()
}

struct Keys {
    _dir: TempDir,
    ring: PublicKeyRing,
}

#[fixture]
fn keys() -> Keys {
    let dir = TempDir::new().expect("temp dir");
    let ring = PublicKeyRing::new(dir.path().join("keys"));
    ring.add("ops.pub", b"ops-key").expect("add ops key");
    ring.add("vendor.pub", b"vendor-key").expect("add vendor key");
    Keys { _dir: dir, ring }
}

fn policy(ring: &PublicKeyRing) -> SignaturePolicy {
    SignaturePolicy::required(Arc::new(ConcatVerifier))
        .with_builtin_key(b"builtin-key".to_vec())
        .with_key_ring(ring.clone(), vec!["missing.pub".to_owned(), "vendor.pub".to_owned()])
}

#[rstest]
#[case::builtin(b"builtin-key".as_slice(), true)]
#[case::configured(b"vendor-key".as_slice(), true)]
#[case::stored_but_untrusted(b"ops-key".as_slice(), false)]
#[case::unknown(b"stranger".as_slice(), false)]
fn signatures_are_checked_against_trusted_keys(
    keys: Keys,
    #[case] signer: &[u8],
    #[case] accepted: bool,
) {
    let archive = b"archive bytes";
    let signature = sign(signer, archive);

    let result = policy(&keys.ring).check(archive, Some(&signature));

    assert_eq!(result.is_ok(), accepted, "result: {result:?}");
    if !accepted {
        assert!(matches!(result, Err(SignatureError::Invalid)));
    }
}

#[rstest]
fn required_signatures_must_be_present(keys: Keys) {
    assert!(matches!(
        policy(&keys.ring).check(b"archive", None),
        Err(SignatureError::Missing)
    ));
}

#[test]
fn permissive_policy_accepts_unsigned_archives() {
    assert!(SignaturePolicy::permissive().check(b"archive", None).is_ok());
}

#[rstest]
fn key_ring_lists_reads_and_deletes(keys: Keys) {
    assert_eq!(keys.ring.list().expect("list"), vec!["ops.pub", "vendor.pub"]);
    assert_eq!(keys.ring.read("ops.pub").expect("read"), b"ops-key".to_vec());

    keys.ring.delete("ops.pub").expect("delete");

    assert_eq!(keys.ring.list().expect("list"), vec!["vendor.pub"]);
    assert!(matches!(
        keys.ring.read("ops.pub"),
        Err(SignatureError::KeyNotFound { .. })
    ));
    assert!(matches!(
        keys.ring.delete("ops.pub"),
        Err(SignatureError::KeyNotFound { .. })
    ));
}

#[rstest]
#[case::empty("")]
#[case::hidden(".secret")]
#[case::traversal("../escape.pub")]
#[case::nested("dir/key.pub")]
fn key_names_must_be_plain_files(keys: Keys, #[case] name: &str) {
    assert!(matches!(
        keys.ring.add(name, b"key"),
        Err(SignatureError::InvalidKeyName { .. })
    ));
}

#[test]
fn missing_key_directory_lists_nothing() {
    let dir = TempDir::new().expect("temp dir");
    let ring = PublicKeyRing::new(dir.path().join("absent"));

    assert!(ring.list().expect("list").is_empty());
}
