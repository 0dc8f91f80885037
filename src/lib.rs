//! # Virtual Board
//!
//! Runs a structured, multi-phase product-validation discussion among
//! simulated personas. Every reasoning step is delegated to a Langbase Pipe
//! through a capability gateway wrapped in guardrails, tracing and error
//! recovery.
//!
//! ## Phases
//!
//! - **Warmup**: initial impressions
//! - **Diverge**: hypothesis-targeted exploration with follow-ups and drift checks
//! - **Reflect**: theme validation, only when hypothesis coverage is high enough
//! - **Converge**: trade-offs and priorities
//! - **Closure**: synthesized insights and red-team questions
//!
//! ## Architecture
//!
//! ```text
//! Orchestrator → Session → ProductionMiddleware → CapabilityGateway → Langbase Pipes (HTTP)
//!                   ↓
//!          BoardState + KnowledgeStore
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use virtual_board::{BoardConfig, Config, Orchestrator, ProductionMiddleware, Session};
//! use virtual_board::langbase::LangbaseClient;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let board = BoardConfig::load(&config.paths.board_config)?;
//!     let client = LangbaseClient::new(&config.langbase, &config.request)?;
//!     let middleware = Arc::new(ProductionMiddleware::new(config.retry.clone()));
//!     let session = Session::new(board, &config.pipes, Arc::new(client), middleware)?;
//!     let report = Orchestrator::new(session).run().await?;
//!     println!("{}", report.to_markdown());
//!     Ok(())
//! }
//! ```

/// Discussion records, structured role outputs and board state.
pub mod board;
/// Environment and board configuration.
pub mod config;
/// Error types and result aliases for the application.
pub mod error;
/// Capability gateway port and structured-output decoding.
pub mod gateway;
/// Append-only session memory.
pub mod knowledge;
/// Langbase API client and types for pipe communication.
pub mod langbase;
/// Guardrails, tracing and error recovery around gateway calls.
pub mod middleware;
/// Phase orchestration, reporting and exports.
pub mod orchestrator;
/// Instructions and response schema hints for the worker roles.
pub mod prompts;
/// Worker role registry.
pub mod roles;
/// Discussion session operations.
pub mod session;

pub use board::{BoardState, Phase};
pub use config::{BoardConfig, Config};
pub use error::{AppError, AppResult, GatewayError, GatewayResult};
pub use gateway::CapabilityGateway;
pub use middleware::ProductionMiddleware;
pub use orchestrator::{Orchestrator, SessionExporter, SessionReport};
pub use session::Session;
