//! `featureboard` command-line client.

pub mod feature_cmd;

pub use feature_cmd::FeatureboardCli;
