//! awl-gateway - local REST gateway for WaterFurnace Symphony (AWL)
//!
//! Symphony exposes home-automation telemetry behind a cookie-authenticated
//! HTTP login and a JSON-over-WebSocket command protocol. This crate keeps
//! one authenticated session alive and re-exposes the read path as a small,
//! stable REST surface.
//!
//! ## Components
//!
//! - **Client**: authenticated session + WebSocket transaction multiplexing
//! - **Supervisor**: exponential-backoff reconnect loop around the client
//! - **Cache**: time-windowed memoization of the per-gateway read
//! - **Server**: hyper HTTP server deriving gateway/zone views for REST

pub mod awl;
pub mod cache;
pub mod config;
pub mod routes;
pub mod server;
pub mod types;

pub use awl::{AwlClient, ClientConfig, ReconnectSupervisor, SharedClient, SupervisorConfig};
pub use config::Args;
pub use server::{run, AppState};
pub use types::{AwlError, Result};
