use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Compose balanced dishes with the generative pipeline
    Generate {
        /// How many dishes to generate (defaults to the configured count)
        #[arg(short, long)]
        dishes: Option<usize>,
    },
    /// Show random complete dishes from the reference file
    Reference {
        /// How many reference dishes to show
        #[arg(short, long)]
        count: Option<usize>,
    },
}

pub fn parse_args() -> Cli {
    Cli::parse()
}
