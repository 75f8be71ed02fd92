//! # Strand Testkit
//!
//! Testing utilities for strand.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Golden vectors**: Known hashes and addresses other implementations must reproduce
//! - **Generators**: Proptest strategies for property-based testing
//! - **Fixtures**: Wallets and stream builders for setting up test scenarios
//!
//! ## Golden Vectors
//!
//! ```rust
//! use strand_testkit::vectors::{all_vectors, verify_all_vectors};
//!
//! for (name, ok) in verify_all_vectors() {
//!     assert!(ok, "{name}");
//! }
//! assert!(!all_vectors().is_empty());
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use strand_testkit::generators::{event_from_params, EventParams};
//!
//! proptest! {
//!     #[test]
//!     fn event_hash_is_deterministic(params: EventParams) {
//!         let e1 = event_from_params(&params);
//!         let e2 = event_from_params(&params);
//!         prop_assert_eq!(e1.hash, e2.hash);
//!     }
//! }
//! ```
//!
//! ## Test Fixtures
//!
//! ```rust
//! use strand_core::StreamKind;
//! use strand_testkit::fixtures::StreamFixture;
//!
//! let mut stream = StreamFixture::new(StreamKind::Channel);
//! let hello = stream.message("hello");
//! stream.reply("hi back", hello);
//! let miniblock = stream.seal_miniblock(true);
//! assert_eq!(miniblock.events.len(), 3);
//! ```

pub mod fixtures;
pub mod generators;
pub mod vectors;

pub use fixtures::{test_wallets, StreamFixture, TestWallet};
pub use generators::{event_from_params, EventParams};
pub use vectors::{all_vectors, verify_all_vectors, HashVector};
