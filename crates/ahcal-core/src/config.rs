//! YAML job-configuration loading.
//!
//! Configurations are plain YAML with three top-level sections (`run`,
//! `reader`, `algs`). A custom `!include <path>` tag splices another YAML
//! file in place of the tagged node; paths are resolved relative to the
//! directory of the file that contains the tag.

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::de::DeserializeOwned;
use serde_yaml::Value;
use tracing::debug;

/// Load a YAML file and resolve every `!include` tag recursively.
pub fn load_config(path: impl AsRef<Path>) -> Result<Value> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    let root: Value = serde_yaml::from_str(&text)
        .with_context(|| format!("failed to parse YAML: {}", path.display()))?;
    let base = path.parent().unwrap_or_else(|| Path::new("."));
    resolve_includes(root, base)
}

fn resolve_includes(node: Value, base: &Path) -> Result<Value> {
    match node {
        Value::Tagged(tagged) if tagged.tag == "!include" => {
            let rel = match &tagged.value {
                Value::String(s) => s.clone(),
                _ => bail!("!include must be a scalar path"),
            };
            let inc_path = base.join(&rel);
            if !inc_path.exists() {
                bail!("included YAML not found: {}", inc_path.display());
            }
            debug!(path = %inc_path.display(), "resolving !include");
            // The included file's directory becomes the new base.
            load_config(&inc_path)
        }
        Value::Mapping(map) => {
            let mut out = serde_yaml::Mapping::new();
            for (k, v) in map {
                out.insert(k, resolve_includes(v, base)?);
            }
            Ok(Value::Mapping(out))
        }
        Value::Sequence(seq) => {
            let mut out = Vec::with_capacity(seq.len());
            for v in seq {
                out.push(resolve_includes(v, base)?);
            }
            Ok(Value::Sequence(out))
        }
        other => Ok(other),
    }
}

/// Borrow the child node under `key`, failing when it is absent.
pub fn require<'a>(node: &'a Value, key: &str) -> Result<&'a Value> {
    node.get(key)
        .with_context(|| format!("missing config key '{key}'"))
}

/// Borrow the string under `key`, failing when absent or not a string.
pub fn require_str<'a>(node: &'a Value, key: &str) -> Result<&'a str> {
    require(node, key)?
        .as_str()
        .with_context(|| format!("config key '{key}' must be a string"))
}

/// Deserialize a config node into a typed section.
pub fn parse_section<T: DeserializeOwned>(node: &Value) -> Result<T> {
    serde_yaml::from_value(node.clone()).context("malformed config section")
}

/// Parse the required `run` section of a job configuration.
pub fn parse_run_config(root: &Value) -> Result<crate::RunConfig> {
    let run = require(root, "run")?;
    parse_section(run).context("invalid 'run' section")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &Path, name: &str, text: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        let mut f = fs::File::create(&path).unwrap();
        f.write_all(text.as_bytes()).unwrap();
        path
    }

    #[test]
    fn run_section_parses_with_defaults() {
        let root: Value = serde_yaml::from_str(
            r#"
run:
  input: in.root
  output: out.root
  log_file: app.log
  log_level: info
"#,
        )
        .unwrap();
        let cfg = parse_run_config(&root).unwrap();
        assert_eq!(cfg.input, "in.root");
        assert_eq!(cfg.n_events, -1);
        assert_eq!(cfg.run_number, 0);
        assert!(!cfg.mc);
    }

    #[test]
    fn missing_required_run_key_fails() {
        let root: Value = serde_yaml::from_str("run:\n  input: in.root\n").unwrap();
        assert!(parse_run_config(&root).is_err());
    }

    #[test]
    fn includes_are_resolved_relative_to_the_including_file() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("cfg");
        fs::create_dir(&sub).unwrap();
        write_file(&sub, "algs.yaml", "- {type: TrackFitAlg, cfg: {}}\n");
        let main = write_file(
            dir.path(),
            "job.yaml",
            "run:\n  input: in.root\nalgs: !include cfg/algs.yaml\n",
        );

        let root = load_config(&main).unwrap();
        let algs = root.get("algs").unwrap().as_sequence().unwrap();
        assert_eq!(algs.len(), 1);
        assert_eq!(
            algs[0].get("type").unwrap().as_str().unwrap(),
            "TrackFitAlg"
        );
    }

    #[test]
    fn nested_includes_follow_their_own_directory() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("a/b");
        fs::create_dir_all(&b).unwrap();
        write_file(&b, "leaf.yaml", "leaf: 42\n");
        write_file(&a, "mid.yaml", "inner: !include b/leaf.yaml\n");
        let main = write_file(dir.path(), "top.yaml", "outer: !include a/mid.yaml\n");

        let root = load_config(&main).unwrap();
        let leaf = root
            .get("outer")
            .and_then(|v| v.get("inner"))
            .and_then(|v| v.get("leaf"))
            .unwrap();
        assert_eq!(leaf.as_i64(), Some(42));
    }

    #[test]
    fn missing_include_target_fails() {
        let dir = tempfile::tempdir().unwrap();
        let main = write_file(dir.path(), "job.yaml", "algs: !include nope.yaml\n");
        assert!(load_config(&main).is_err());
    }
}
