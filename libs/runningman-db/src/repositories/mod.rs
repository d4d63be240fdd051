pub mod catalog_repo;
pub mod collection_repo;
pub mod invoice_repo;
pub mod user_repo;
