pub mod admin;
pub mod connection;
pub mod manager;
pub mod models;
pub mod registry;


pub use connection::{ContextKey, DbConnection};
pub use manager::ConnectionManager;
pub use models::*;
pub use registry::ManagerRegistry;
