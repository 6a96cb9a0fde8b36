//! CLI interface to move files into template-rendered paths
//!
//! # Example:
//! ```bash
//! tmpl_mv -i ~/Pictures/import -p '*.JPG' -t '{{ .Info.ModTime.Format "2006/01" }}/{{ count "%04d" }}{{ ext .Info.Name }}' -dry-run
//! ```

use clap::Parser;
use tmpl_mv::{app, logging, normalize_flags, Args};

fn main() {
        logging::tracing_subscribe_boilerplate("warn");
        let args = Args::parse_from(normalize_flags(std::env::args_os()));

        if let Err(e) = app(&args) {
                tracing::debug!("fatal error, exiting: {:?}", e);
                eprintln!("Error: {}", e);
                std::process::exit(1);
        }
}
