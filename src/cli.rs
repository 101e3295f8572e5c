use crate::directives;
use crate::model::{ComputeSpec, RunSpec};
use crate::orchestrator::Orchestrator;
use crate::store::MemcachedStore;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "runctl",
    version,
    about = "Out-of-band control for distributed training runs"
)]
pub struct Cli {
    /// Expire control documents this long after their last write (e.g. 7d,
    /// max 30d). Without this, documents live until removed externally.
    #[arg(long)]
    pub doc_ttl: Option<humantime::Duration>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Request a power cap on the GPUs allocated to a run
    PowerCap {
        /// Name of the run to power cap
        run_name: String,
        /// Power cap, in watts, to apply to each GPU in the run
        watts: u64,
    },
    /// Tell a run to checkpoint and optionally stop
    Checkpoint {
        /// Name of the run to checkpoint
        run_name: String,
        /// Stop the run after checkpointing
        #[arg(long)]
        stop: bool,
    },
    /// Start a new run
    Start {
        /// Name to assign to the new run
        name: String,
        /// Container image for the run (e.g. mosaicml/composer)
        image: String,
        /// Command to run
        command: String,
        /// Which cluster to schedule on
        cluster_name: String,
        /// How many GPUs to allocate
        gpus: u32,
    },
    /// Stop an existing run
    Stop {
        /// Handle id or name of the run to stop
        run: String,
    },
}

/// The signal store endpoint comes from the environment; a missing value is
/// fatal before any directive is attempted.
fn signal_store_host() -> Result<String> {
    std::env::var("MEMCACHED_HOST")
        .context("MEMCACHED_HOST must name the signal store endpoint (host or host:port)")
}

fn orchestrator_url() -> Result<String> {
    std::env::var("ORCHESTRATOR_URL").context("ORCHESTRATOR_URL must name the orchestrator API")
}

fn build_store(doc_ttl: Option<humantime::Duration>) -> Result<MemcachedStore> {
    let mut store = MemcachedStore::new(&signal_store_host()?);
    if let Some(ttl) = doc_ttl {
        store = store.with_doc_ttl(ttl.into());
    }
    Ok(store)
}

pub async fn run(args: Cli) -> Result<()> {
    match args.command {
        Command::PowerCap { run_name, watts } => {
            let store = build_store(args.doc_ttl)?;
            directives::request_power_cap(&store, &run_name, watts).await?;
            eprintln!("power cap of {watts} W recorded for {run_name}");
        }
        Command::Checkpoint { run_name, stop } => {
            let store = build_store(args.doc_ttl)?;
            directives::request_checkpoint(&store, &run_name, stop).await?;
            if stop {
                eprintln!("checkpoint-and-stop recorded for {run_name}");
            } else {
                eprintln!("checkpoint recorded for {run_name}");
            }
        }
        Command::Start {
            name,
            image,
            command,
            cluster_name,
            gpus,
        } => {
            let orch = Orchestrator::new(&orchestrator_url()?)?;
            let spec = RunSpec {
                name,
                image,
                command,
                compute: ComputeSpec {
                    cluster: cluster_name,
                    gpus,
                },
            };
            let handle = orch.start(&spec).await?;
            match handle.id {
                Some(id) => println!("started {} ({id})", handle.name),
                None => println!("started {}", handle.name),
            }
        }
        Command::Stop { run } => {
            let orch = Orchestrator::new(&orchestrator_url()?)?;
            orch.stop(&run).await?;
            eprintln!("stop requested for {run}");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn power_cap_args_parse() {
        let cli = Cli::try_parse_from(["runctl", "power-cap", "job-17", "275"]).unwrap();
        match cli.command {
            Command::PowerCap { run_name, watts } => {
                assert_eq!(run_name, "job-17");
                assert_eq!(watts, 275);
            }
            other => panic!("parsed as {other:?}"),
        }
    }

    #[test]
    fn checkpoint_stop_flag_defaults_off() {
        let cli = Cli::try_parse_from(["runctl", "checkpoint", "job-17"]).unwrap();
        assert!(matches!(cli.command, Command::Checkpoint { stop: false, .. }));

        let cli = Cli::try_parse_from(["runctl", "checkpoint", "job-17", "--stop"]).unwrap();
        assert!(matches!(cli.command, Command::Checkpoint { stop: true, .. }));
    }

    #[test]
    fn start_takes_the_full_run_spec() {
        let cli = Cli::try_parse_from([
            "runctl", "start", "job-17", "mosaicml/composer", "python train.py", "r7z2", "8",
        ])
        .unwrap();
        match cli.command {
            Command::Start {
                name,
                image,
                command,
                cluster_name,
                gpus,
            } => {
                assert_eq!(name, "job-17");
                assert_eq!(image, "mosaicml/composer");
                assert_eq!(command, "python train.py");
                assert_eq!(cluster_name, "r7z2");
                assert_eq!(gpus, 8);
            }
            other => panic!("parsed as {other:?}"),
        }
    }

    #[test]
    fn doc_ttl_accepts_humantime() {
        let cli =
            Cli::try_parse_from(["runctl", "--doc-ttl", "7d", "power-cap", "job-17", "250"])
                .unwrap();
        assert_eq!(
            std::time::Duration::from(cli.doc_ttl.unwrap()),
            std::time::Duration::from_secs(7 * 24 * 60 * 60)
        );
    }

    #[test]
    fn non_integer_watts_is_rejected() {
        assert!(Cli::try_parse_from(["runctl", "power-cap", "job-17", "lots"]).is_err());
    }
}
