//! Concrete strategies.

pub mod extract_code;
pub mod inline_text;
pub mod pdf_to_text;

pub use extract_code::ExtractCodeStrategy;
pub use inline_text::InlineTextFileStrategy;
pub use pdf_to_text::{PdfToTextInput, PdfToTextStrategy};
