pub mod config;
pub mod driver;
pub mod extractor;
pub mod frame;
pub mod reader;
pub mod reconciler;
pub mod source;
