pub mod catalog;
pub mod config;
pub mod cost;
pub mod datatypes;
pub mod error;
pub mod hints;
pub mod memo;
pub mod meta;
pub mod operators;
pub mod optimizer;
pub mod plan;
pub mod properties;
pub mod rules;
pub mod statistics;
#[cfg(test)]
pub mod testing;
#[cfg(test)]
mod tests;
