//! Thin axum HTTP surface over the modelmesh orchestrator: one struct
//! holding the shared state, a `create_router` building the axum `Router`,
//! and a `start`/`stop` pair that spawns the listener in the background.
//!
//! This is glue over `modelmesh-core`, not new orchestration logic — three
//! routes only: `POST /v1/requests` (the orchestrator entry point),
//! `GET /v1/health`, and `GET /v1/events` (an SSE tail of the event bus).

mod rest;

pub use rest::{ModelMeshApi, RestConfig};
