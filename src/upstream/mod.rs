pub mod client;

pub use client::{CallOptions, FallbackPolicy, ServiceClient};
