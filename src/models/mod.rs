pub mod dataset;
pub mod label;
