pub mod dispatcher;
pub mod tools;
pub mod types;
