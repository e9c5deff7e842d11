pub mod activity;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod rules;

pub use routes::create_router;
