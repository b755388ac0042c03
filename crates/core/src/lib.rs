//! Functional core for the TinyLinker infrastructure.
//!
//! Everything in this crate is pure: it turns a [`StackConfig`] into a typed,
//! validated resource graph, renders that graph as a CloudFormation template
//! and plans changes between templates. Talking to AWS is left to the
//! `xtask` shell.

pub mod compute;
pub mod config;
pub mod domain;
pub mod error;
pub mod gateway;
pub mod graph;
pub mod planning;
pub mod resource;
pub mod stack;
pub mod tables;
pub mod template;

pub use config::{FunctionSettings, ResolvedConfig, StackConfig};
pub use error::{ConfigError, GraphError, PlanError, Result, StackError};
pub use graph::ResourceGraph;
pub use resource::{LogicalId, RemovalPolicy, Resource, ResourceKind, ResourceProperties, Value};
pub use stack::{compose, Stack, StackOutput};
pub use tables::TableRemovalPolicies;
pub use template::render_template;
