//! The public cache handles.
//!
//! Every handle is a cheap, cloneable reference to the same shared core, so a
//! cache can be viewed through [`AsyncCache::synchronous`] without copying.

mod futures;
mod sync;

pub use futures::AsyncCache;
pub use sync::{Cache, LoadingCache};
