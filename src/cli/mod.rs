// ============================================================
// CLI / Presentation Layer
// ============================================================
// Parses arguments with clap and routes each subcommand to its
// use case. Printing results happens here and nowhere else.
//
// Reference: Rust Book §7 (Modules), §12 (CLI programs)

pub mod commands;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, InspectArgs, PackArgs, StreamArgs, TrainArgs};

use crate::infra::Logger;

#[derive(Parser, Debug)]
#[command(
    name = "tensorbase",
    version = "0.1.0",
    about = "Train, checkpoint and feed image models built on burn."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// `logger` is the writer installed in the tracing subscriber;
    /// training attaches the run's log file to it.
    pub fn run(self, logger: &Logger) -> Result<()> {
        match self.command {
            Commands::Train(args)   => run_train(args, logger),
            Commands::Inspect(args) => run_inspect(args),
            Commands::Pack(args)    => run_pack(args),
            Commands::Stream(args)  => run_stream(args),
        }
    }
}

fn run_train(args: TrainArgs, logger: &Logger) -> Result<()> {
    use crate::application::train_use_case::TrainUseCase;

    let report = TrainUseCase::new(args.into()).execute(logger)?;
    println!(
        "Trained {} epochs ({} steps). Final loss {:.4}, valid accuracy {:.3}, test accuracy {:.3}",
        report.epochs, report.steps, report.final_loss, report.valid_accuracy, report.test_accuracy
    );
    if let Some(path) = report.checkpoint {
        println!("Checkpoint: {}", path.display());
    }
    println!("Logs: {}", report.log_dir.display());
    Ok(())
}

fn run_inspect(args: InspectArgs) -> Result<()> {
    use crate::application::inspect_use_case::InspectUseCase;

    let use_case = InspectUseCase::new(&args.checkpoint);
    for line in use_case.variables()? {
        println!("{:<40} {:?}", line.name, line.shape);
    }
    if args.all {
        let meta = use_case.meta()?;
        println!("\nSection {} at step {}", meta.section, meta.step);
        for layer in &meta.layers {
            println!("{:<20} {:?}", layer.scope, layer.shape);
        }
        println!("\n{}", serde_json::to_string_pretty(&meta.flags)?);
    }
    Ok(())
}

fn run_pack(args: PackArgs) -> Result<()> {
    use crate::application::records_use_case::PackUseCase;

    let paths = PackUseCase::new(args.into()).execute()?;
    for path in &paths {
        println!("{}", path.display());
    }
    Ok(())
}

fn run_stream(args: StreamArgs) -> Result<()> {
    use crate::application::records_use_case::StreamUseCase;

    let report = StreamUseCase::new(args.into()).execute()?;
    println!("Streamed {} batches, {} examples", report.batches, report.examples);
    if let Some(shape) = report.batch_shape {
        println!("Batch shape: {:?}", shape);
    }
    if report.stragglers > 0 {
        println!("{} pipeline threads did not stop in time", report.stragglers);
    }
    Ok(())
}
