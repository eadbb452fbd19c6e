//! Core types for s3watcher

mod event;
mod notification;
mod policy;
mod queue;
mod record;

pub use event::*;
pub use notification::*;
pub use policy::*;
pub use queue::*;
pub use record::*;
