pub mod conversion;
pub mod packaging;
pub mod preset;
