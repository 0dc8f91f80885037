//! Langbase Pipes API client.
//!
//! [`LangbaseClient`] is the production [`crate::gateway::CapabilityGateway`]:
//! every worker role runs on a Langbase pipe.

mod client;
mod types;


pub use client::LangbaseClient;
pub use types::*;
