pub mod db;
pub mod issuance;
pub mod models;
pub mod routes;
pub mod session;
pub mod store;
