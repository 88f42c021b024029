//! Process-wide algorithm registry.
//!
//! The registry maps a YAML `type` string to a creator function. It is a
//! global, lazily initialised map guarded by a `RwLock`; algorithm crates
//! install their entries from an explicit `register_builtin()` routine
//! before the pipeline is assembled. Registering the same type twice is an
//! error.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::Result;
use once_cell::sync::Lazy;

use crate::alg::Algorithm;
use crate::context::RunContext;

/// Creator signature: `(context, cfg node, pretty name)` to a ready
/// algorithm with its configuration parsed.
pub type AlgCreator = fn(&RunContext, &serde_yaml::Value, &str) -> Result<Box<dyn Algorithm>>;

static REGISTRY: Lazy<RwLock<HashMap<String, AlgCreator>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Registration and lookup failures.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// A second registration arrived for an already-known type.
    #[error("duplicate algorithm registration for type '{0}'")]
    Duplicate(String),
    /// Lookup of a type that was never registered.
    #[error("unknown algorithm type '{0}'")]
    Unknown(String),
    /// The registry lock was poisoned by a panicking thread.
    #[error("algorithm registry lock poisoned")]
    Poisoned,
}

/// Install a creator for `type_name`.
pub fn register_algorithm(
    type_name: impl Into<String>,
    creator: AlgCreator,
) -> Result<(), RegistryError> {
    let type_name = type_name.into();
    let mut reg = REGISTRY.write().map_err(|_| RegistryError::Poisoned)?;
    if reg.contains_key(&type_name) {
        return Err(RegistryError::Duplicate(type_name));
    }
    reg.insert(type_name, creator);
    Ok(())
}

/// Construct the algorithm registered under `type_name`.
pub fn create_algorithm(
    type_name: &str,
    ctx: &RunContext,
    cfg: &serde_yaml::Value,
) -> Result<Box<dyn Algorithm>> {
    let creator = {
        let reg = REGISTRY.read().map_err(|_| RegistryError::Poisoned)?;
        reg.get(type_name)
            .copied()
            .ok_or_else(|| RegistryError::Unknown(type_name.to_owned()))?
    };
    creator(ctx, cfg, type_name)
}

/// Whether `type_name` has a registered creator.
pub fn is_registered(type_name: &str) -> bool {
    REGISTRY
        .read()
        .map(|reg| reg.contains_key(type_name))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{RunConfig, RunContext};
    use crate::store::EventStore;

    struct Noop;

    impl Algorithm for Noop {
        fn name(&self) -> &str {
            "Noop"
        }
        fn execute(&mut self, _store: &mut EventStore) -> Result<()> {
            Ok(())
        }
    }

    fn make_noop(
        _ctx: &RunContext,
        _cfg: &serde_yaml::Value,
        _name: &str,
    ) -> Result<Box<dyn Algorithm>> {
        Ok(Box::new(Noop))
    }

    fn test_ctx() -> RunContext {
        RunContext::new(RunConfig {
            input: "in.root".into(),
            output: "out.root".into(),
            log_file: String::new(),
            log_level: "info".into(),
            n_events: -1,
            run_number: 0,
            pool_index: 0,
            mc: false,
        })
    }

    #[test]
    fn registered_types_can_be_created() {
        register_algorithm("TestNoopAlg", make_noop).unwrap();
        assert!(is_registered("TestNoopAlg"));
        let ctx = test_ctx();
        let alg = create_algorithm("TestNoopAlg", &ctx, &serde_yaml::Value::Null).unwrap();
        assert_eq!(alg.name(), "Noop");
    }

    #[test]
    fn duplicate_registration_is_an_error() {
        register_algorithm("TestDupAlg", make_noop).unwrap();
        let err = register_algorithm("TestDupAlg", make_noop).unwrap_err();
        assert!(matches!(err, RegistryError::Duplicate(_)));
    }

    #[test]
    fn unknown_type_is_an_error() {
        let ctx = test_ctx();
        let err = match create_algorithm("NoSuchAlg", &ctx, &serde_yaml::Value::Null) {
            Ok(_) => panic!("expected an error for an unknown algorithm type"),
            Err(e) => e,
        };
        assert!(err.to_string().contains("NoSuchAlg"));
    }
}
