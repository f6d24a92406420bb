//! # cordon
//!
//! Query and policy engine for classified entity-relationship graphs.
//! Access is gated twice, mandatory (clearance rank vs. classification
//! rank) and attribute-based (sector match, commander bypass), and
//! disclosure is further protected by a k-anonymity gate and per-user query
//! budgets. Queries arrive as free text (mixed Russian/English keyword
//! vocabulary) and are parsed by a deterministic matcher cascade; no
//! language model is involved.
//!
//! ## Architecture
//!
//! - **Data model** (`model`): classification levels, attribute bags,
//!   users, nodes/edges with cross-level `logical_id` identity, audit
//!   entries
//! - **Policy** (`policy`): pure MLS + ABAC + k-anonymity + budget checks
//! - **Parser** (`parser`): ordered keyword/regex matcher cascade producing
//!   a structured filter set plus a human-readable explanation
//! - **Pipeline** (`pipeline`): budget → parse → fetch → filter →
//!   k-anonymity gate → audit → result
//! - **Reconciler** (`reconcile`): virtual / level / overlay projections of
//!   classification-duplicate entities
//! - **Repositories** (`repo`): storage seams plus in-memory reference
//!   implementations with validated graph mutation and level export/import
//!
//! ## Library usage
//!
//! ```no_run
//! use cordon::config::EngineConfig;
//! use cordon::seeds::demo_engine;
//!
//! let engine = demo_engine(EngineConfig::default()).unwrap();
//! let response = engine
//!     .execute("analyst-a", "Сколько беспилотников в секторе A")
//!     .unwrap();
//! println!("{}", response.explanation.render_text());
//! ```

pub mod config;
pub mod error;
pub mod model;
pub mod parser;
pub mod pipeline;
pub mod policy;
pub mod reconcile;
pub mod repo;
pub mod seeds;

pub use config::EngineConfig;
pub use error::{CordonError, CordonResult};
pub use model::{AuditEntry, ClearanceLevel, DenialReason, GraphEdge, GraphNode, User};
pub use pipeline::{QueryEngine, QueryOutcome, QueryResponse};
pub use reconcile::{GraphView, ViewMode};
