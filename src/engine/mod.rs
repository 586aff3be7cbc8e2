//! # Engine Module
//!
//! Distributed array engine implementation.
//!
//! Modules, leaf-first:
//! - Identifiers, errors, configuration (`types`, `error`, `config`)
//! - Block geometry (`grid`, `domain`, `blockspec`)
//! - Collaborator interfaces and their local implementations (`memory`,
//!   `future`, `scheduler`, `context`)
//! - Placement (`placement`, `random`)
//! - The PGAS slot store (`directory`)
//! - Operations and the block engines (`ops`, `broadcast`, `reduce`)
//! - Local and distributed arrays (`array`, `darray`)
//!
//! Public API exposure is controlled by `lib.rs`.

pub mod types;
pub mod error;
pub mod config;
pub mod element;
pub mod grid;
pub mod domain;
pub mod blockspec;
pub mod memory;
pub mod future;
pub mod scheduler;
pub mod context;
pub mod random;
pub mod placement;
pub mod directory;
pub mod array;
pub mod ops;
pub mod broadcast;
pub mod reduce;
pub mod darray;
