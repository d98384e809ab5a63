//! Anvil - local agentic CLI for OpenAI-compatible model servers.
//!
//! This library provides the core functionality for the Anvil CLI:
//! - The tool-call execution loop driving a streamed model conversation
//! - A schema-validated tool registry with sandboxed filesystem, shell,
//!   code-execution, and search tools
//! - A safety gate (blocklist + destructive-tool confirmation)
//! - CLI parsing, configuration, and console rendering around it
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐  ┌─────────────┐
//! │     CLI     │  │   Console   │
//! └──────┬──────┘  └──────┬──────┘
//!        └────────┬───────┘
//!          ┌──────┴──────┐      ┌──────────────┐
//!          │    Agent    │─────▶│ Model server │
//!          │    loop     │      └──────────────┘
//!          └──────┬──────┘
//!     ┌───────────┼───────────┐
//!     │ Safety    │ Registry  │
//!     │ gate      │ + tools   │
//!     └───────────┴───────────┘
//! ```

pub mod cli;
pub mod config;
pub mod console;
pub mod core;

pub use crate::config::Config;
pub use crate::core::agent::{
    Agent, AgentError, CancelToken, ChatEvent, Confirmer, OpenAiProvider, SafetyPolicy,
};
pub use crate::core::tools::{Sandbox, builtin_registry};
