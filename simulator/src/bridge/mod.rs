pub mod frames;
pub mod hub;
pub mod routes;
pub mod server;
