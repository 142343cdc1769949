pub mod blob;
pub mod store;
pub mod worker;

pub use store::{ArchiveStore, DirArchiveStore, HttpArchiveStore};
pub use worker::{ArchiveSignal, ArchiveWorker};
