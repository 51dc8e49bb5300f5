pub mod elastic;
pub mod memory;
pub mod postgres;

pub use elastic::ElasticStore;
pub use memory::MemoryStore;
pub use postgres::PostgresStore;
