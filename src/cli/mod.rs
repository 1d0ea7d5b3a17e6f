use std::path::PathBuf;

use clap::Subcommand;

#[derive(Subcommand)]
pub enum Commands {
    /// Fold newly arrived raw embeddings into the group aggregates
    Run {
        /// Only process these partitions (repeatable, comma separated)
        #[arg(short, long, value_delimiter = ',')]
        partition: Vec<String>,

        /// Skip these partitions
        #[arg(short, long, value_delimiter = ',')]
        exclude: Vec<String>,

        /// Commit every N raw records instead of one transaction per partition
        #[arg(long)]
        batch_size: Option<usize>,

        /// Reject raw vectors of any other dimension
        #[arg(long)]
        dimensions: Option<usize>,

        /// Stop at the first failed partition
        #[arg(long)]
        fail_fast: bool,

        /// Print the run report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show checkpoint lag per partition
    Status {
        #[arg(short, long, value_delimiter = ',')]
        partition: Vec<String>,

        #[arg(long)]
        json: bool,
    },

    /// Show the stored aggregates of a partition
    Show {
        partition: String,

        #[arg(short, long)]
        group: Option<String>,

        /// Number of mean components to print
        #[arg(long, default_value = "4")]
        preview: usize,
    },

    /// Append raw records from a JSON Lines file
    Import { path: PathBuf },
}
