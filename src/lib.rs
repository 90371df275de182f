#![doc = include_str!("../README.md")]

pub mod builder;
pub mod capture_loop;
pub mod easy;
pub mod error;
pub mod http;
pub mod logger;
pub mod models;
pub mod neighbors;
pub mod parser;
pub mod receiver;
pub mod relay;
pub mod resolver;
pub mod sender;
pub mod utilities;

pub use capture_loop::*;
pub use error::*;
pub use relay::*;
pub use resolver::*;
