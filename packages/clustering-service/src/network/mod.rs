//! HTTP front door (C7): routing, middleware, auth, and shutdown control.

pub mod auth;
pub mod handlers;
pub mod middleware;
pub mod module;
pub mod shutdown;

pub use handlers::AppState;
pub use module::NetworkModule;
pub use shutdown::*;
