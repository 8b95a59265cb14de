//! Loader module
//!
//! The boundary where flat records leave the engine. A [`Loader`] receives
//! one [`LoadBatch`] per page with the resource's write disposition and
//! primary key; persistence and deduplication are its business.

mod jsonl;
mod types;

pub use jsonl::{JsonlLoader, MemoryLoader};
pub use types::{LoadBatch, LoadReceipt, Loader};

#[cfg(test)]
mod tests;
