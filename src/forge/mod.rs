//! Dynamic capability pipeline
//!
//! A capability request moves through PROPOSED → VALIDATED → REGISTERED →
//! LOADED, or stops at REJECTED:
//!
//! - [`generator::ToolGenerator`]: one inference call produces a function
//!   specification, wrapped here into complete tool source
//! - [`validator`]: static checks on the source and its declared risk tier
//! - [`registry::ToolRegistry`]: content-hashed persistence and hot-load into
//!   the live [`ToolCatalog`](crate::tools::ToolCatalog)
//! - [`script`]: the sandboxed evaluator registered tools run on
//! - [`meta_tool`]: the CRITICAL `create_tool` entry point the model calls

pub mod generator;
pub mod meta_tool;
pub mod registry;
pub mod script;
pub mod types;
pub mod validator;

pub use generator::ToolGenerator;
pub use meta_tool::{CreateToolTool, CREATE_TOOL};
pub use registry::{ScriptTool, ToolRegistry};
pub use types::{ParamSpec, ParamType, RegistryEntry, ToolProposal};
pub use validator::{validate_proposal, validate_source, ValidationReport};
