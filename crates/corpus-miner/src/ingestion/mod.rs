//! Document ingestion: format readers and the external tools they drive

pub mod external_tools;
pub mod pdf;
pub mod reader;

pub use reader::{decode_text, transliterate, FormatReader, ReadError};
