//! Deferred work: buffered policy events, the maintenance pass that applies
//! them, and delivery of removal notifications.

pub(crate) mod access_batcher;
pub(crate) mod maintenance;
pub(crate) mod notifier;
pub(crate) mod write_buffer;
