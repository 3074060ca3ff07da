//! Pure domain logic for evidence packages: hashing, storage-slot math,
//! trie-proof verification, decoding, correlation, witnessing, packaging,
//! interpretation and trust decisions. No network I/O lives here; that is
//! `safelens-rpc`'s job.

pub mod correlator;
pub mod decoder;
pub mod export;
pub mod hashing;
pub mod interpreters;
pub mod mpt;
pub mod package;
pub mod schema;
pub mod slots;
pub mod token_registry;
pub mod trust;
pub mod types;
pub mod url;
pub mod witness;
