//! Persistence sinks: partitioned object store and schema-enforced warehouse.

mod object;
mod warehouse;

pub use object::ObjectSink;
pub use warehouse::{MemoryTableStore, RestTableStore, TableStore, WarehouseSink};
