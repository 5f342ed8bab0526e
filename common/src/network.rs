pub mod endpoint;
pub mod range;
pub mod services;
pub mod target;
pub mod tos;
