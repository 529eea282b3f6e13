pub mod health;
pub mod proxy;

pub use proxy::proxy_router;
