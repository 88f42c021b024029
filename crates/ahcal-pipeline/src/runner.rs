//! The per-file event loop and multi-input dispatch.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde_yaml::Value;
use tracing::{info, warn};

use ahcal_core::config::{load_config, parse_run_config};
use ahcal_core::{EventStore, RunContext};

use crate::factory::{build_pipeline, make_source};

/// Rewrite an output filename for one job-list entry:
/// `<stem>-<runNumber padded to 6>-<poolIndex padded to 5>.root`.
pub fn pooled_output_name(output: &str, run_number: i32, pool_index: i32) -> String {
    let stem = output.strip_suffix(".root").unwrap_or(output);
    format!("{stem}-{run_number:06}-{pool_index:05}.root")
}

fn parse_job_list(path: &Path) -> Result<Vec<(String, i32, i32)>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("cannot open job list {}", path.display()))?;
    let mut jobs = Vec::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let mut it = line.split_whitespace();
        let parsed = (|| {
            let file = it.next()?.to_owned();
            let run: i32 = it.next()?.parse().ok()?;
            let pool: i32 = it.next()?.parse().ok()?;
            Some((file, run, pool))
        })();
        match parsed {
            Some(job) => jobs.push(job),
            None => {
                warn!(line, "stopping at malformed job-list line");
                break;
            }
        }
    }
    Ok(jobs)
}

/// Process one input file: build the pipeline, initialize, loop events,
/// finalize.
pub fn run_file(ctx: &RunContext, root: &Value) -> Result<()> {
    let mut algs = build_pipeline(ctx, root)?;
    for alg in &mut algs {
        alg.initialize()
            .with_context(|| format!("initializing '{}'", alg.name()))?;
    }

    let mut source = make_source(ctx, root)?;
    let total = source.entries();
    if let Some(total) = total {
        info!(total, "entries in input file");
    }

    let mut store = EventStore::new();
    let mut n_event: i64 = 0;
    loop {
        if ctx.config.n_events > 0 && n_event >= ctx.config.n_events {
            break;
        }
        if !source.next_event(&mut store)? {
            break;
        }
        for alg in &mut algs {
            alg.execute(&mut store)
                .with_context(|| format!("algorithm '{}' failed", alg.name()))?;
        }
        n_event += 1;
        if n_event % 10_000 == 0 {
            match total {
                Some(total) => info!(processed = n_event, total, "event loop progress"),
                None => info!(processed = n_event, "event loop progress"),
            }
        }
        store.clear();
    }

    for alg in &mut algs {
        alg.finalize()
            .with_context(|| format!("finalizing '{}'", alg.name()))?;
    }
    info!(events = n_event, "input file done");
    Ok(())
}

/// Run a full job: one input file, or every line of a job list.
pub fn run(config_path: &Path, job_list: Option<&Path>) -> Result<()> {
    ahcal_io::register_builtin()?;

    let root = load_config(config_path)?;
    let base = parse_run_config(&root)?;

    let jobs: Vec<(String, i32, i32, String)> = match job_list {
        Some(list) => {
            let jobs = parse_job_list(list)?;
            info!(n = jobs.len(), "input files to process");
            jobs.into_iter()
                .map(|(file, run, pool)| {
                    let output = pooled_output_name(&base.output, run, pool);
                    (file, run, pool, output)
                })
                .collect()
        }
        None => vec![(
            base.input.clone(),
            base.run_number,
            base.pool_index,
            base.output.clone(),
        )],
    };

    let n_jobs = jobs.len();
    for (i, (input, run_number, pool_index, output)) in jobs.into_iter().enumerate() {
        let mut config = base.clone();
        config.input = input;
        config.run_number = run_number;
        config.pool_index = pool_index;
        config.output = output;
        info!(
            input = %config.input,
            run_number,
            pool_index,
            job = i + 1,
            of = n_jobs,
            "processing input file"
        );
        let ctx = RunContext::new(config);
        run_file(&ctx, &root)?;
    }
    Ok(())
}
