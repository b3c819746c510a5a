mod activity;
pub mod models;
mod sqlite;

pub use activity::ActivityStore;
pub use sqlite::Database;
