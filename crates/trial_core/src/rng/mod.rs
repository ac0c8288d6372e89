//! # Seeded Generation Infrastructure
//!
//! The sealed list must be reproducible from its stored seed for regulatory
//! audit, and unpredictable to anyone without it. Both properties come from
//! deriving every draw from a one-way hash of `seed || counter`.
//!
//! ## Module Structure
//!
//! - [`seed`]: the [`Seed`] newtype, fresh seed creation and parsing
//! - [`generator`]: [`SeededGenerator`], the only source of draws for list
//!   construction
//!
//! ## Usage Example
//!
//! ```rust
//! use trial_core::rng::{Seed, SeededGenerator};
//!
//! let seed = Seed::parse("abc").unwrap();
//! let mut a = SeededGenerator::new(seed.clone());
//! let mut b = SeededGenerator::new(seed);
//!
//! assert_eq!(a.gen_uniform(), b.gen_uniform());
//! assert_eq!(a.gen_index(6), b.gen_index(6));
//! ```

pub mod generator;
pub mod seed;

pub use generator::SeededGenerator;
pub use seed::Seed;
