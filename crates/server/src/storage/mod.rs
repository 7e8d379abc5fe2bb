//! The multiplexing storage layer.
//!
//! Two single-tree [`MetaStore`](common::storage::MetaStore)s sit behind a
//!  [`MultiplexingStore`]: the signer tree holding what publishers push, and
//!  the alternate tree holding either what other callers push (repositories
//!  with no operator root registered) or metadata generated from the signer
//!  tree under an operator root.

pub mod alternate_root;
mod generation_cache;
mod multiplexing;

pub use alternate_root::{GeneratedSet, GenerationError};
pub use generation_cache::{Generation, GenerationCache};
pub use multiplexing::{Channel, ChannelUpdate, MultiplexError, MultiplexingStore};
