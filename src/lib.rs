pub mod align;
pub mod annotate;
pub mod config;
pub mod conversion;
pub mod coverage;
pub mod domain;
pub mod error;
pub mod matrix;
pub mod output;
pub mod pathways;
pub mod pipeline;
pub mod resolver;
pub mod simulate;
pub mod store;
