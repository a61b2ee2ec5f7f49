//! Binary-side helpers: source file import and the queue progress spinner.

pub(crate) mod progress_manager;
pub(crate) mod source_file;
