//! Network access for the worker.

mod client;
#[cfg(test)]
pub mod scripted;
mod types;

pub use client::{HttpNetwork, Network};
pub use types::{is_same_origin, Request, RequestMode, Response, ResponseType};
