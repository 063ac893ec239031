//! Integration tests for the gateway, the tools and the agentic loop.
//!
//! Everything runs against a throwaway SQLite file seeded with the demo
//! data; the model is scripted so no network access is needed.

pub mod gateway_integration;
pub mod support;
