pub mod context;
pub mod environment;
pub mod registry;
pub mod session;
