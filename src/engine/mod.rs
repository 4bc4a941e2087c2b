pub mod anchors;
pub mod checkbox;
pub mod commit;
pub mod config;
pub mod data;
pub mod errors;
pub mod inference;
pub mod pipeline;
pub mod resolver;
pub mod scoring;
pub mod spans;
pub mod tables;
pub mod text;
pub mod traverse;
pub mod types;

#[cfg(test)]
mod tests;
