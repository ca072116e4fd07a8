pub mod document_loader;

pub use document_loader::{load_unit_input, load_unit_inputs};
