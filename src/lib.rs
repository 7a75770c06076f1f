//! Reader/writer for the Compound File Binary container carried by
//! Windows Installer packages.
//!
//! A package is opened from memory with [`Cfb::open`], its directory is
//! materialized with [`Tree::build`], and the two signing digests are
//! produced by [`hash::content_hash`] and [`hash::metadata_prehash`].
//! [`writer::write`] re-serializes the container with the
//! `DigitalSignature` and `MsiDigitalSignatureEx` streams replaced at
//! the root, yielding a fresh image that verifies under the platform
//! tooling.
//!
//! https://learn.microsoft.com/en-us/openspecs/windows_protocols/ms-cfb/

pub mod cfb;
pub mod common;
pub mod directory;
pub mod fat;
pub mod hash;
pub mod header;
pub mod mini_fat;
pub mod tree;
pub mod writer;

pub use cfb::Cfb;
pub use common::{CfbError, CfbResult};
pub use directory::{Color, Entry, ObjectType};
pub use hash::{content_hash, file_digest, metadata_prehash};
pub use tree::Tree;
pub use writer::write;
