//! Source loading and chunking for the ingestion pipeline.

pub mod html;
pub mod loader;
pub mod splitter;

pub use loader::{is_remote, DocumentLoader, FileLoader, LoaderRegistry, SourceLoader, UrlLoader};
pub use splitter::DocumentSplitter;
