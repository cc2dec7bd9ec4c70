pub mod validation;
pub mod workspace;
