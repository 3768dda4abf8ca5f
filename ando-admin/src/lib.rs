pub mod handlers;
pub mod middleware;
pub mod persist;
pub mod server;

pub use server::{start_admin, AdminState};
