//! Builds a context dependency transducer directly from accumulated acoustic statistics, by
//! greedily splitting phonetic contexts in order of acoustic likelihood gain rather than growing
//! an explicit decision tree.
use std::env;

use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::{Layer, Registry};

pub mod context_builder;
pub mod context_set;
pub mod hmm_compiler;
pub mod model_splitter;
pub mod phone_models;
pub mod phones;
pub mod recipe;
pub mod sample;
pub mod sample_reader;
pub mod scorer;
pub mod set_inventory;
pub mod split_generator;
pub mod split_predictor;
pub mod state_splitter;
pub mod transducer;
pub mod transducer_compiler;

pub use context_builder::ContextBuilder;

/// Convenience function to setup logging for any binaries I create. Automatically sets all
/// binaries and the library crate to `info` logging by default.
pub fn setup_logging() {
    let filter = match env::var("RUST_LOG") {
        Ok(_) => EnvFilter::from_env("RUST_LOG"),
        _ => EnvFilter::new("trainc=info,context_builder=info"),
    };

    let fmt = tracing_subscriber::fmt::Layer::default();

    let subscriber = filter.and_then(fmt).with_subscriber(Registry::default());

    tracing::subscriber::set_global_default(subscriber).unwrap();
}
