pub mod async_support;
pub mod logging;
