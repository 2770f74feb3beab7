//! JIT Runtime Integration Module
//!
//! Compiled-function bookkeeping and whole-JIT transitions.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                        JIT Runtime                                  │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐  ┌──────────────────┐                             │
//! │  │  CodeCache   │  │ DeoptCoordinator │                             │
//! │  │              │  │                  │                             │
//! │  │ Compiled     │◀─│ Deopt on hooks,  │                             │
//! │  │ functions    │  │ cold sweeps on   │                             │
//! │  │ and sites    │  │ bulk events      │                             │
//! │  └──────────────┘  └──────────────────┘                             │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```

pub mod code_cache;
pub mod deopt;

pub use code_cache::{CodeCache, CodeCacheStats, CodeId, CodeObject, CompiledFunction};
pub use deopt::{DeoptCoordinator, DeoptStats};
