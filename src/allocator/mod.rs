//! Hybrid slab + buddy allocator over the arena's trailing sub-arena
//! (spec §4.4-§4.6).

pub mod buddy;
pub mod hybrid;
pub mod slab;

pub use buddy::BuddyAllocator;
pub use hybrid::{AllocFlags, HybridAllocator};
pub use slab::SlabAllocator;
