pub mod memory;
pub mod postgres;

pub use self::memory::MemoryStore;
pub use self::postgres::PgSessionStore;
