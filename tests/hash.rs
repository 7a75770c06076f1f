mod common;

use std::io::Cursor;

use common::{build_image, open_tree, Collect};
use sha2::{Digest, Sha256};

use msi_cfb::{content_hash, file_digest, metadata_prehash, Cfb, Tree};

#[test]
fn content_hash_emits_longer_name_first_on_prefix_tie() {
    let image = build_image(&[("A", b"aa"), ("AB", b"bbbb")]);
    let (cfb, tree) = open_tree(&image);

    let mut sink = Collect::default();
    content_hash(&cfb, &tree, &mut sink).unwrap();

    let mut expected = Vec::new();
    expected.extend_from_slice(b"bbbb"); // AB sorts before A
    expected.extend_from_slice(b"aa");
    expected.extend_from_slice(&[0u8; 16]); // root CLSID
    assert_eq!(sink.0, expected);
}

#[test]
fn content_hash_ignores_inserted_signatures() {
    let image = build_image(&[("S", b"hello"), ("T", b"world")]);
    let (cfb, tree) = open_tree(&image);
    let mut before = Sha256::new();
    content_hash(&cfb, &tree, &mut before).unwrap();

    let mut signed = Cursor::new(Vec::new());
    let mut work = tree.clone();
    msi_cfb::write(&cfb, &mut work, &[0x30; 123], &[0x9C; 32], &mut signed).unwrap();

    let (cfb, tree) = open_tree(&signed.into_inner());
    let mut after = Sha256::new();
    content_hash(&cfb, &tree, &mut after).unwrap();
    assert_eq!(before.finalize(), after.finalize());
}

#[test]
fn metadata_prehash_survives_a_rewrite() {
    let image = build_image(&[("S", b"hello"), ("Data", b"0123456789")]);
    let (cfb, tree) = open_tree(&image);
    let mut before = Collect::default();
    metadata_prehash(&tree, &mut before);

    let mut signed = Cursor::new(Vec::new());
    let mut work = tree.clone();
    msi_cfb::write(&cfb, &mut work, &[0x30; 123], &[], &mut signed).unwrap();

    let (_, tree) = open_tree(&signed.into_inner());
    let mut after = Collect::default();
    metadata_prehash(&tree, &mut after);
    assert_eq!(before.0, after.0);
}

#[test]
fn metadata_prehash_covers_stream_fields() {
    let image = build_image(&[("S", b"0123456")]);
    let (_, tree) = open_tree(&image);

    let mut sink = Collect::default();
    metadata_prehash(&tree, &mut sink);

    let mut expected = Vec::new();
    expected.extend_from_slice(&[0u8; 16]); // root CLSID
    expected.extend_from_slice(&[0u8; 4]); // root state bits
    expected.extend_from_slice(&common::utf16le("S")); // child name
    expected.extend_from_slice(&[7, 0, 0, 0]); // child size, low half
    expected.extend_from_slice(&[0u8; 4]); // child state bits
    expected.extend_from_slice(&[0u8; 16]); // child timestamps
    assert_eq!(sink.0, expected);
}

#[test]
fn file_digest_matches_a_single_shot_digest() {
    let image = build_image(&[("S", b"hello")]);
    let cfb = Cfb::open(image).unwrap();
    assert_eq!(
        file_digest::<Sha256>(cfb.as_bytes()),
        Sha256::digest(cfb.as_bytes())
    );
}

#[test]
fn content_hash_skips_signature_streams_at_the_root() {
    let image = build_image(&[("S", b"hello")]);
    let (cfb, mut tree) = open_tree(&image);
    tree.push_child(0, msi_cfb::Entry::new_stream(&msi_cfb::directory::DIGITAL_SIGNATURE_NAME));

    let mut sink = Collect::default();
    content_hash(&cfb, &tree, &mut sink).unwrap();
    let mut expected = Vec::new();
    expected.extend_from_slice(b"hello"); // signature skipped, S kept
    expected.extend_from_slice(&[0u8; 16]);
    assert_eq!(sink.0, expected);
}

#[test]
fn content_hash_emits_storage_clsids_after_their_children() {
    let image = build_image(&[("S", b"hello")]);
    let (cfb, mut tree) = open_tree(&image);
    let mut storage = msi_cfb::Entry::new_stream(&common::utf16le("Inner"));
    storage.object_type = msi_cfb::ObjectType::Storage;
    storage.clsid = [0xEE; 16];
    let inner = tree.push_child(0, storage);
    tree.push_child(inner, msi_cfb::Entry::new_stream(&common::utf16le("Leaf")));

    let mut sink = Collect::default();
    content_hash(&cfb, &tree, &mut sink).unwrap();

    // "Inner" sorts before "S"; the zero-length leaf contributes nothing,
    // so the storage reduces to its CLSID.
    let mut expected = Vec::new();
    expected.extend_from_slice(&[0xEE; 16]);
    expected.extend_from_slice(b"hello");
    expected.extend_from_slice(&[0u8; 16]);
    assert_eq!(sink.0, expected);
}

#[test]
fn tree_content_round_trips_through_a_rewrite() {
    let body = vec![0x5Au8; 5000];
    let image = build_image(&[("Big", &body), ("Small", b"tiny")]);
    let (cfb, tree) = open_tree(&image);

    let mut out = Cursor::new(Vec::new());
    let mut work = tree.clone();
    msi_cfb::write(&cfb, &mut work, &[], &[], &mut out).unwrap();

    let (cfb, tree) = open_tree(&out.into_inner());
    assert_eq!(tree.children(0).len(), 2);
    let big = tree.child_by_name("Big").unwrap();
    assert_eq!(cfb.read(tree.entry(big), 0, 5000).unwrap(), body);
    let small = tree.child_by_name("Small").unwrap();
    assert_eq!(cfb.read(tree.entry(small), 0, 4).unwrap(), b"tiny");
}
