//! CLA assistant — signature bookkeeping and pull request enforcement.
//!
//! ## Module Map
//!
//! ```text
//! ┌──────────┐   HTTP   ┌──────────────────────────────────────────────────┐
//! │  Client  │ ───────> │  server.rs  (axum Router, ServerConfig)          │
//! │          │ <─────── │    └─ api.rs  (route handlers, MaybeUser)        │
//! └──────────┘          │         │                                        │
//!                       │         v                                        │
//!                       │  orchestrator.rs  (ClaOrchestrator)              │
//!                       │    │          │             │                    │
//!                       │    v          v             v                    │
//!                       │  store.rs   status.rs    comment.rs              │
//!                       │  (repos,    (commit      (summary                │
//!                       │   records)   statuses)    comment)               │
//!                       │    │          │             │                    │
//!                       │    v          └──────┬──────┘                    │
//!                       │  db.rs             github.rs  (GitHubApi)        │
//!                       └──────────────────────────────────────────────────┘
//! ```
//!
//! ## Supporting Modules
//!
//! | Module    | Responsibility                                           |
//! |-----------|----------------------------------------------------------|
//! | `models`  | Shared types: `GistRef`, `Signature`, `Request`, queries |
//! | `urls`    | Public CLA page and badge links                          |
//! | `testing` | Recording doubles for every port (tests only)            |

pub mod api;
pub mod comment;
pub mod db;
pub mod github;
pub mod models;
pub mod orchestrator;
pub mod server;
pub mod status;
pub mod store;
pub mod urls;

#[cfg(test)]
pub(crate) mod testing;
