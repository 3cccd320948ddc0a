#[cfg(feature = "pdf")]
mod pdfium;
mod synctex;

#[cfg(feature = "pdf")]
pub use pdfium::PdfiumRenderFactory;
pub use synctex::{parse_edit_output, parse_view_output, SynctexCli};

#[cfg(feature = "pdf")]
pub type PdfRenderFactory = PdfiumRenderFactory;
