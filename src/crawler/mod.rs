pub mod ingest;
pub mod scheduler;

pub use ingest::Crawler;
pub use scheduler::CrawlScheduler;
