//! # fr0g-registry
//!
//! The service registry and discovery fabric. Keeps an in-memory catalog of
//! live service instances, tracks health from two directions (service
//! heartbeats and registry-driven HTTP probes), evicts records whose TTL and
//! grace have passed, and answers discovery over a Consul-compatible HTTP
//! surface.
//!
//! The catalog is deliberately not durable: a registry restart loses all
//! records and services re-register within one heartbeat interval.

pub mod catalog;
pub mod config;
pub mod http;
pub mod probe;

pub use catalog::Catalog;
pub use config::RegistryServiceConfig;
pub use http::RegistryHttpServer;
pub use probe::Prober;
