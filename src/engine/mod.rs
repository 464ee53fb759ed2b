/// Remote inference engine client and cookie handling

pub mod client;
pub mod cookies;

pub use client::EngineClient;
