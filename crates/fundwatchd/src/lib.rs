pub mod aggregate;
pub mod cli;
pub mod daemon;
pub mod diff;
pub mod extractor;
pub mod fetcher;
pub mod lock;
pub mod markup;
pub mod persist;
pub mod pipeline;
pub mod publish;
pub mod scheduler;
pub mod server;
pub mod validate;
