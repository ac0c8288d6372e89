//! # trial_core: Allocation Foundation for Trial Randomisation
//!
//! ## Layer 1 (Foundation) Role
//!
//! trial_core is the bottom layer of the randomisation workspace, providing:
//! - Identifier newtypes and the design model (`types`)
//! - The hash-driven, replayable generator (`rng`)
//! - Sealed list construction for simple, block and stratified designs (`builder`)
//! - Unpersisted design previews (`preview`)
//!
//! ## No Storage Principle
//!
//! Nothing in this crate performs I/O. Persistence, transactions and audit
//! live in `trial_store`; this layer only turns a design plus a seed into an
//! ordered allocation sequence.
//!
//! ## Usage Examples
//!
//! ```rust
//! use std::collections::BTreeMap;
//! use trial_core::builder::build_list;
//! use trial_core::rng::{Seed, SeededGenerator};
//! use trial_core::types::{AllocationDesign, AllocationRatios, DesignType, GroupId};
//!
//! let ratios = AllocationRatios::new(BTreeMap::from([(GroupId(1), 1), (GroupId(2), 1)]));
//! let design = AllocationDesign::block(ratios, 4, 8);
//!
//! let mut rng = SeededGenerator::new(Seed::parse("abc").unwrap());
//! let list = build_list(&design, &mut rng).unwrap();
//! assert_eq!(list.total_slots(), 8);
//! assert_eq!(design.design_type, DesignType::Block);
//! ```

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod builder;
pub mod preview;
pub mod rng;
pub mod types;
