//! Dataset source adapters.
//!
//! - `ParquetSource`: the production source, one Parquet file
//! - `InMemorySource`: records built in code or from JSON rows

mod memory;
mod parquet;

pub use memory::InMemorySource;
pub use parquet::ParquetSource;
