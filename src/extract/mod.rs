pub mod extractor;
pub mod format;
