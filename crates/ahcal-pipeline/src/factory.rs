//! Pipeline assembly from the parsed job configuration.

use anyhow::{bail, Context, Result};
use serde_yaml::Value;
use tracing::info;

use ahcal_core::config::{require, require_str};
use ahcal_core::{registry, Algorithm, RunContext};
use ahcal_io::binary_reader::BinaryRawHitReader;
use ahcal_io::column_input::RootInput;
use ahcal_io::raw_reader::RootRawHitReader;
use ahcal_io::EventSource;

fn cfg_node(node: &Value) -> Value {
    node.get("cfg")
        .cloned()
        .unwrap_or(Value::Mapping(serde_yaml::Mapping::new()))
}

/// Instantiate the `algs` sequence of the configuration, in declared
/// order.
pub fn build_pipeline(ctx: &RunContext, root: &Value) -> Result<Vec<Box<dyn Algorithm>>> {
    let algs = require(root, "algs")?
        .as_sequence()
        .context("'algs' must be a sequence")?;

    let mut pipeline = Vec::with_capacity(algs.len());
    for node in algs {
        let type_name = require_str(node, "type")?;
        let cfg = cfg_node(node);
        let alg = registry::create_algorithm(type_name, ctx, &cfg)
            .with_context(|| format!("building algorithm '{type_name}'"))?;
        info!(r#type = type_name, "algorithm created");
        pipeline.push(alg);
    }
    Ok(pipeline)
}

/// Instantiate the reader named by the `reader` section, attached to the
/// run's input file.
pub fn make_source(ctx: &RunContext, root: &Value) -> Result<Box<dyn EventSource>> {
    let reader = require(root, "reader")?;
    let type_name = require_str(reader, "type")?;
    let cfg = cfg_node(reader);
    let input = &ctx.config.input;

    let source: Box<dyn EventSource> = match type_name {
        "RootRawHitReader" => Box::new(RootRawHitReader::new(input, &cfg)?),
        "BinaryRawHitReader" => Box::new(BinaryRawHitReader::new(input, &cfg)?),
        "RootInput" => Box::new(RootInput::new(input, &cfg)?),
        other => bail!("unknown reader type '{other}'"),
    };
    info!(r#type = type_name, input = %input, "reader created");
    Ok(source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ahcal_core::RunConfig;

    fn test_ctx(input: &str) -> RunContext {
        let run: RunConfig = serde_yaml::from_str(&format!(
            "{{input: {input}, output: out.root, log_file: '', log_level: info}}"
        ))
        .unwrap();
        RunContext::new(run)
    }

    #[test]
    fn unknown_reader_types_are_config_errors() {
        let root: Value =
            serde_yaml::from_str("reader:\n  type: CsvReader\n  cfg: {}\n").unwrap();
        let err = match make_source(&test_ctx("in.root"), &root) {
            Ok(_) => panic!("expected an error for an unknown reader type"),
            Err(e) => e,
        };
        assert!(err.to_string().contains("CsvReader"));
    }

    #[test]
    fn unknown_algorithm_types_are_config_errors() {
        let root: Value =
            serde_yaml::from_str("algs:\n  - type: NoSuchAlg\n    cfg: {}\n").unwrap();
        assert!(build_pipeline(&test_ctx("in.root"), &root).is_err());
    }

    #[test]
    fn a_missing_algs_section_is_a_config_error() {
        let root: Value = serde_yaml::from_str("run: {}\n").unwrap();
        assert!(build_pipeline(&test_ctx("in.root"), &root).is_err());
    }
}
