//! Structural PPTX translation with layout re-fitting.
//!
//! A deck moves through four stages: the zip container and slide XML are
//! parsed losslessly ([`pptx`]), text runs are batched through an LLM
//! backend ([`translate`]), box insets and font sizes are re-fitted for the
//! new language ([`layout`], [`metrics`]), and the package is rewritten with
//! every untouched byte preserved. [`worker`] drives that same pipeline as a
//! polling batch worker over a job store.

pub mod config;
pub mod error;
pub mod ir;
pub mod job;
pub mod layout;
pub mod metrics;
pub mod pptx;
pub mod translate;
pub mod worker;

pub use error::{Error, Result};
