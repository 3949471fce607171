pub mod entry;
pub mod protocol;
