pub mod bulk;
pub mod download;
pub mod symbols;
