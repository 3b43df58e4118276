//! Bulk load delimited text files into a local partition store.
//!
//! `bulkload load --config job.yaml part-0.txt part-1.txt` treats each input
//! file as one shard. `bulkload commit --config job.yaml` retries the commit
//! of whatever a failed load left in the staging directory.

use std::{path::PathBuf, process::ExitCode, sync::Arc};

use anyhow::{bail, Context};
use bulkload::{
    config::{JobConfig, MapperConfig},
    BulkCommitCoordinator, BulkLoadJob, CommitReport, LocalPartitionStore, Mapper, Record,
};
use clap::Parser;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about = "Partition-aligned bulk loader")]
enum Command {
    /// Map, assemble and commit the given input files.
    Load {
        /// YAML job description.
        #[arg(long)]
        config: PathBuf,
        /// Input files; each one is mapped as a separate shard.
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
    },
    /// Commit the files left in the staging directory by an earlier load.
    Commit {
        #[arg(long)]
        config: PathBuf,
    },
    /// Print the table's current partition start keys.
    Partitions {
        #[arg(long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("bulkload=info")))
        .init();

    match Command::parse() {
        Command::Load { config, inputs } => load(config, inputs).await,
        Command::Commit { config } => commit(config).await,
        Command::Partitions { config } => partitions(config).await,
    }
}

async fn open_store(config: &JobConfig) -> anyhow::Result<Arc<LocalPartitionStore>> {
    let store =
        LocalPartitionStore::open_or_create(&config.store_root, &config.table, config.boundary()?)
            .await
            .with_context(|| format!("opening store at {}", config.store_root.display()))?;
    Ok(Arc::new(store))
}

async fn load(config: PathBuf, inputs: Vec<PathBuf>) -> anyhow::Result<ExitCode> {
    let config = JobConfig::from_yaml_file(&config)
        .with_context(|| format!("reading {}", config.display()))?;
    let MapperConfig::Delimited {
        record_delimiter, ..
    } = &config.mapper
    else {
        bail!("only delimited text inputs can be loaded from files");
    };
    let Mapper::Delimited(mapper) = config.mapper()? else {
        bail!("only delimited text inputs can be loaded from files");
    };

    let mut shards: Vec<Vec<Record>> = Vec::with_capacity(inputs.len());
    for input in &inputs {
        let content = tokio::fs::read_to_string(input)
            .await
            .with_context(|| format!("reading {}", input.display()))?;
        shards.push(
            content
                .split(record_delimiter.as_str())
                .filter(|line| !line.trim_end_matches(['\r', '\n']).is_empty())
                .map(|line| mapper.decode(line))
                .collect(),
        );
    }

    let store = open_store(&config).await?;
    let job = BulkLoadJob::new(
        Arc::new(config.load_option()),
        mapper.into(),
        store.clone(),
        store,
    );
    let report = job.run(shards).await?;

    println!(
        "mapped {} records, skipped {}, staged {} files",
        report.stats.mapped, report.stats.skipped, report.staged
    );
    Ok(summarize(&report.commit))
}

async fn commit(config: PathBuf) -> anyhow::Result<ExitCode> {
    let config = JobConfig::from_yaml_file(&config)
        .with_context(|| format!("reading {}", config.display()))?;
    let store = open_store(&config).await?;
    let coordinator =
        BulkCommitCoordinator::new(Arc::new(config.load_option()), store.clone(), store);
    let report = coordinator.commit_staging().await?;
    Ok(summarize(&report))
}

async fn partitions(config: PathBuf) -> anyhow::Result<ExitCode> {
    let config = JobConfig::from_yaml_file(&config)
        .with_context(|| format!("reading {}", config.display()))?;
    let store = LocalPartitionStore::open(&config.store_root, &config.table).await?;
    for range in store.boundary().await.ranges() {
        println!(
            "{}\t{}\t{}",
            range.id,
            hex::encode(range.start),
            range.end.map(hex::encode).unwrap_or_default()
        );
    }
    Ok(ExitCode::SUCCESS)
}

fn summarize(report: &CommitReport) -> ExitCode {
    println!(
        "committed {} files, failed {}, staging {:?}",
        report.committed.len(),
        report.failed.len(),
        report.cleanup
    );
    if report.is_success() {
        return ExitCode::SUCCESS;
    }
    for file in &report.failed {
        eprintln!(
            "failed {} ({}) in {}: {}",
            file.id,
            file.path.display(),
            file.failed_in,
            file.cause
        );
    }
    ExitCode::FAILURE
}
