pub mod approval_store;
