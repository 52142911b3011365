use std::path::PathBuf;
use std::process;

use anyhow::Result;
use clap::{Parser, Subcommand};
use rand::SeedableRng;
use rand::rngs::StdRng;

use restorer::core::types::Subtask;
use restorer::io::config::load_config;
use restorer::io::experience::load_distilled;
use restorer::io::media::needs_super_resolution;
use restorer::io::oracle::{CommandJudge, CommandScheduler};
use restorer::io::tool::CommandToolbox;
use restorer::{exit_codes, logging, planner, session};

/// Multi-degradation image restoration by planned tool composition.
#[derive(Parser)]
#[command(name = "restorer", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Restore an image end to end.
    Run {
        /// Degraded input image.
        #[arg(long)]
        input: PathBuf,
        /// Directory to create the run workspace in.
        #[arg(long)]
        output: PathBuf,
        /// Engine configuration file.
        #[arg(long, default_value = "restorer.toml")]
        config: PathBuf,
        /// Comma-separated preset plan; skips the planner and disables
        /// rollback.
        #[arg(long, value_delimiter = ',')]
        plan: Option<Vec<Subtask>>,
    },
    /// Assess an image and print the proposed plan without executing it.
    Plan {
        #[arg(long)]
        input: PathBuf,
        #[arg(long, default_value = "restorer.toml")]
        config: PathBuf,
    },
    /// Validate the configuration file.
    Validate {
        #[arg(long, default_value = "restorer.toml")]
        config: PathBuf,
    },
}

fn main() {
    logging::init();
    let cli = Cli::parse();
    let code = match dispatch(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            exit_codes::FATAL
        }
    };
    process::exit(code);
}

fn dispatch(cli: Cli) -> Result<i32> {
    match cli.command {
        Commands::Run {
            input,
            output,
            config,
            plan,
        } => {
            let cfg = load_config(&config)?;
            let mut judge = CommandJudge::new(&cfg.oracle, cfg.seed);
            let mut scheduler = CommandScheduler::new(&cfg.oracle, cfg.seed.wrapping_add(1));
            let toolbox = CommandToolbox::new(cfg.toolboxes.clone(), &cfg.tool);

            let outcome = session::run(
                &cfg,
                &mut judge,
                &mut scheduler,
                &toolbox,
                &input,
                &output,
                plan,
            )?;
            println!("{}", outcome.result_image.display());
            Ok(if outcome.compromised {
                exit_codes::COMPROMISE
            } else {
                exit_codes::OK
            })
        }
        Commands::Plan { input, config } => {
            let cfg = load_config(&config)?;
            let mut judge = CommandJudge::new(&cfg.oracle, cfg.seed);
            let mut scheduler = CommandScheduler::new(&cfg.oracle, cfg.seed.wrapping_add(1));
            let mut rng = StdRng::seed_from_u64(cfg.seed);

            let experience = if cfg.retrieval {
                Some(load_distilled(&cfg.experience_path)?)
            } else {
                None
            };
            let add_super_resolution = needs_super_resolution(&input, cfg.min_short_side_px)?;
            let proposed = planner::propose(
                &mut judge,
                &mut scheduler,
                &mut rng,
                &input,
                add_super_resolution,
                experience.as_deref(),
            )?;

            for (degradation, severity) in &proposed.assessment {
                tracing::info!(degradation = %degradation, severity = %severity, "assessed");
            }
            for subtask in &proposed.plan {
                println!("{subtask}");
            }
            Ok(exit_codes::OK)
        }
        Commands::Validate { config } => {
            // load_config validates; reaching here means the file is usable.
            load_config(&config)?;
            println!("configuration ok");
            Ok(exit_codes::OK)
        }
    }
}
