//! Update engine for a plugin-based code-quality tool runner.
//!
//! Given desired plugins (version constraint plus signing expectation) and the
//! installed state, the engine computes an ordered task list and executes it
//! with hash and signature verification, then records the new installed
//! state and a lock file. The crate keeps a strict split:
//!
//! - **[`core`]**: Pure, deterministic logic (descriptors, repository, tasks,
//!   diff rules). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting adapters (config, state files, downloads,
//!   catalogs, gpg, dependency manager, processes).
//! - **[`update`]**: Orchestration of calculation and execution.
//!
//! [`session`] wires configuration to concrete collaborators for the CLI.

pub mod core;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod session;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod update;
