use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "helmet_detector",
    version,
    about = "Checks whether detected persons wear safety helmets"
)]
pub struct Cli {
    /// Directory holding base.yaml and the per-environment files
    #[arg(long, global = true)]
    pub config_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run the HTTP service, plus the live camera loop when enabled
    Serve,
    /// Analyse an image or every image in a directory
    Scan {
        path: PathBuf,
        /// Output directory; defaults to `batch.output_dir`
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

impl Cli {
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Serve)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serve_is_the_default() {
        let cli = Cli::try_parse_from(["helmet_detector"]).unwrap();
        assert_eq!(cli.command(), Command::Serve);
        assert!(cli.config_dir.is_none());
    }

    #[test]
    fn test_scan_arguments() {
        let cli = Cli::try_parse_from([
            "helmet_detector",
            "scan",
            "images",
            "--output",
            "out",
            "--config-dir",
            "/etc/helmet",
        ])
        .unwrap();

        assert_eq!(
            cli.command(),
            Command::Scan {
                path: PathBuf::from("images"),
                output: Some(PathBuf::from("out")),
            }
        );
        assert_eq!(cli.config_dir, Some(PathBuf::from("/etc/helmet")));
    }

    #[test]
    fn test_scan_needs_a_path() {
        assert!(Cli::try_parse_from(["helmet_detector", "scan"]).is_err());
    }
}
