//! rsync-style delta codec.
//!
//! The side holding the old version publishes a [`signature::BlockHashManifest`],
//! the side holding the new version computes a [`patch::Patch`] against it with
//! [`delta::diff`], and the old side rebuilds the new content with
//! [`apply::apply`].

pub mod apply;
pub mod delta;
pub mod patch;
pub mod rolling;
pub mod signature;

pub use apply::apply;
pub use delta::diff;
pub use signature::block_hash;
