pub mod memory;
pub mod pool;
pub mod postgres;
pub mod store;

pub use memory::MemoryStore;
pub use postgres::PgDocumentStore;
pub use store::{
    Cursor, Document, DocumentPath, DocumentStore, Filter, FilterOp, OrderBy, Query,
    SortDirection, WriteOp,
};
