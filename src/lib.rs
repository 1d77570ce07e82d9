//! Core library for the rubric-tools command line application.
//!
//! The library keeps a remote grading rubric (categories holding ordered
//! comments) in step with a declaratively specified desired state. The modules
//! are structured to keep responsibilities narrow and composable: the batched
//! request layer lives in [`rubric::tools::batch`], field rules in
//! [`rubric::tools::validate`], typed resource accessors in
//! [`rubric::tools::api`], IO adapters under [`rubric::tools::io`], and the
//! reconciliation engine in [`rubric::tools::sync`].

pub mod rubric;

pub use rubric::tools::{
    Result, ToolError, api, batch, codec, config, error, io, model, sync, validate,
};
