//! Background services: the broadcast dispatcher delivering scheduled posts and
//! the media worker pool answering inbound photos and videos.

pub mod dispatcher;
pub mod media_worker;

#[cfg(test)]
pub(crate) mod test_support;

pub use dispatcher::{Dispatcher, DispatcherHandle, PostOutcome, TickReport};
pub use media_worker::MediaWorker;
