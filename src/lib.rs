//! External sort engine for a relational database kernel.
//!
//! Rows are accepted in arbitrary order, spilled to temp files as sorted runs
//! under a fixed block-memory budget, merged with a polyphase merge and then
//! served through a bidirectional cursor. The host embeds the engine through
//! [`sort::SortManager`], which owns the shared block pool and the temp-file
//! manager, and drives each operation through a [`sort::Sorter`]:
//!
//! ```no_run
//! use polysort::config::SortConfig;
//! use polysort::sort::SortManager;
//! use polysort::tuple::{AttrType, OrderSpec, Row, TupleType, Value};
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = SortConfig::default();
//! let blocks = config.sort_blocks() * 2;
//! let manager = SortManager::new(config, blocks)?;
//!
//! let schema = TupleType::new(vec![AttrType::Int, AttrType::Text]);
//! let mut sorter = manager.create_sort(schema, vec![OrderSpec::asc(0)])?;
//! sorter.add_tuple(&Row::new(vec![Value::Int(2), Value::Text("b".into())]))?;
//! sorter.add_tuple(&Row::new(vec![Value::Int(1), Value::Text("a".into())]))?;
//! while !sorter.run_merge_step()? {}
//! while let Some(row) = sorter.fetch_next()? {
//!     println!("{:?}", row.values());
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod error;
pub mod mem;
pub mod sort;
pub mod stream;
pub mod temp;
pub mod tuple;
pub mod vtuple;

pub use config::SortConfig;
pub use error::{SortError, SortResult};
pub use sort::{SortManager, Sorter, SorterState};
pub use tuple::{AttrType, OrderSpec, Row, TupleType, Value};
