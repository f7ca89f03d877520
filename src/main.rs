use std::fs;
use std::path::PathBuf;
use std::process::Command as Process;

use anyhow::{bail, ensure, Context};
use chrono::Utc;
use clap::{Parser, Subcommand};
use log::info;

use jatko::chain::{valid_chain_id, Simulation};
use jatko::config::Config;
use jatko::daemon::lock::{read_pid, PidLock};
use jatko::daemon::shutdown::install_shutdown_handler;
use jatko::daemon::Daemon;
use jatko::format::{render_status, StatusFormat};
use jatko::store::{ChainRequest, SqliteStore, StateStore};

#[derive(Parser, Debug)]
#[command(author, version, about = "Keep simulations running across wall-time limited batch jobs", long_about = None)]
struct Args {
    /// Path to the JSON configuration file
    #[arg(short, long, global = true, default_value = "jatko.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the daemon in the foreground until stopped
    Start {
        /// Stop once every chain has ended
        #[arg(long)]
        exit_when_idle: bool,
    },
    /// Show every chain
    Status {
        #[arg(short, long, value_enum, default_value_t = StatusFormat::Table)]
        format: StatusFormat,
    },
    /// Ask the running daemon to stop after its current cycle
    Stop,
    /// Queue a new chain, the daemon submits its first job on its next cycle
    Submit {
        /// Chain id, also the prefix of every job name
        id: String,
        /// Simulation directory on the cluster
        #[arg(long)]
        workdir: String,
        /// Command that runs the simulation
        #[arg(long)]
        executable: String,
        #[arg(long, default_value = "", allow_hyphen_values = true)]
        args: String,
        /// Appended when continuing, `{checkpoint}` becomes the checkpoint path
        #[arg(long, allow_hyphen_values = true)]
        resume_args: Option<String>,
        /// Shell line run before the simulation, e.g. `module load gromacs`
        #[arg(long)]
        preload: Option<String>,
        /// File the simulation writes when it has finished
        #[arg(long)]
        completion_marker: String,
        /// Wall time of each job, overrides the configured resources
        #[arg(long)]
        time: Option<String>,
        #[arg(long)]
        partition: Option<String>,
        #[arg(long)]
        nodes: Option<u32>,
    },
    /// Validate the configuration file
    CheckConfig,
    /// Print a sample configuration for a SLURM cluster
    GenConfig {
        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    match args.command {
        Command::Start { exit_when_idle } => {
            info!("terve! starting up :)");
            let mut config = Config::read(&args.config)?;
            config.policy.exit_when_idle |= exit_when_idle;

            let store = SqliteStore::open(&config.state_dir)?;
            let _lock = PidLock::acquire(&config.state_dir)?;
            let mut daemon = Daemon::from_config(&config, Box::new(store))?;
            let shutdown = install_shutdown_handler().context("Can't install signal handlers")?;
            daemon.run(shutdown).await?;
            info!("bye!");
        }
        Command::Status { format } => {
            let config = Config::read(&args.config)?;
            let store = SqliteStore::open(&config.state_dir)?;
            print!("{}", render_status(&store.load()?, format)?);
        }
        Command::Stop => {
            let config = Config::read(&args.config)?;
            let Some(pid) = read_pid(&config.state_dir) else {
                bail!("No daemon is running for {}", config.state_dir.display());
            };
            info!("Sending SIGTERM to daemon {pid}");
            let status = Process::new("kill").arg("-TERM").arg(pid.to_string()).status().context("Can't run kill")?;
            ensure!(status.success(), "kill -TERM {pid} failed with {status}");
        }
        Command::Submit { id, workdir, executable, args: arguments, resume_args, preload, completion_marker, time, partition, nodes } => {
            ensure!(valid_chain_id(&id), "Chain id {id:?} may only contain letters, digits, '-' and '_'");
            let config = Config::read(&args.config)?;

            let mut resources = config.resources.clone();
            if let Some(time) = time {
                resources.time = time;
            }
            if partition.is_some() {
                resources.partition = partition;
            }
            if nodes.is_some() {
                resources.nodes = nodes;
            }
            resources.wall_time_secs()?;

            let request = ChainRequest {
                id,
                simulation: Simulation { workdir, preload, executable, args: arguments, resume_args, completion_marker },
                resources,
                requested_at: Utc::now(),
            };
            let mut store = SqliteStore::open(&config.state_dir)?;
            store.enqueue(&request)?;
            println!("Queued chain {}", request.id);
        }
        Command::CheckConfig => {
            Config::read(&args.config)?;
            println!("{} is valid", args.config.display());
        }
        Command::GenConfig { output } => {
            let sample = Config::sample().to_json()?;
            match output {
                Some(path) => {
                    fs::write(&path, sample + "\n").with_context(|| format!("Can't write {}", path.display()))?;
                    info!("Wrote sample configuration to {}", path.display());
                }
                None => println!("{sample}"),
            }
        }
    }

    Ok(())
}
