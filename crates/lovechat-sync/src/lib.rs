//! Message synchronization, streak tracking and reaction merging for a
//! two-person chat.
//!
//! The document store, blob storage and microphone are collaborators behind
//! the traits in [`store`], [`uploads`] and [`capture`]; everything else in
//! this crate is written against those traits.

pub mod capture;
pub mod composer;
pub mod error;
pub mod reactions;
pub mod session;
pub mod store;
pub mod streak;
pub mod synchronizer;
pub mod uploads;

pub use error::ChatError;
