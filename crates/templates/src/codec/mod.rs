pub mod headers;
pub mod placeholders;
pub mod shape;
