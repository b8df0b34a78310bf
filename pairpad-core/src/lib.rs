//! # pairpad-core — document model and edit pipeline
//!
//! The local half of the synchronization protocol: the text buffer, the
//! wire representation of an edit, and the two write paths into the
//! document (local keystrokes and remote operations).
//!
//! ```text
//!  editor widget                         room channel
//!       │ edit()                              │ EditOperation (JSON)
//!       ▼                                     ▼
//! ┌──────────────┐  Mutation   ┌──────────────────────┐
//! │  Document    │ ──────────► │ MutationObserver     │ ──► outgoing ops
//! │ (TextBuffer) │             │ (checks Suppression) │
//! └──────▲───────┘             └──────────────────────┘
//!        │ apply_with_suppression()
//! ┌──────┴───────┐
//! │RemoteApplier │ ◄── delivery order, clamp stale ranges
//! └──────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`buffer`] — 1-based line/column text buffer
//! - [`operation`] — `EditOperation` and its JSON wire form
//! - [`document`] — `Document`, suppression flag and guard, observers
//! - [`applier`] — `RemoteApplier` with clamp accounting

pub mod applier;
pub mod buffer;
pub mod document;
pub mod operation;

pub use applier::{resolve_range, ApplyOutcome, ApplyStats, RemoteApplier};
pub use buffer::{Position, TextBuffer};
pub use document::{ApplyError, Document, Mutation, MutationObserver, Suppression, SuppressionGuard};
pub use operation::{EditOperation, OperationError, TextRange};
