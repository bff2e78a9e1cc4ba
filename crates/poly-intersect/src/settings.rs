use clap::{Parser, Subcommand};
use poly_intersect_lib::Config;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug, Clone)]
#[clap(author, version, about, long_about = None)]
/// Poly Intersect - overlap statistics between an area of interest and reference polygon layers
pub struct Settings {
    #[clap(subcommand)]
    pub command: Command,

    /// Evaluate graph nodes one at a time instead of on the thread pool
    #[clap(long, global = true, default_value = "false")]
    pub sequential: bool,

    /// Timeout for a single remote fetch, in seconds
    #[clap(long, global = true, default_value = "30")]
    pub fetch_timeout_secs: u64,

    /// Distinct remote requests kept cached per data source (0 disables caching)
    #[clap(long, global = true, default_value = "5")]
    pub cache_capacity: usize,

    /// Write a Chrome trace of the run to this file
    #[cfg(feature = "profiling")]
    #[clap(long, global = true, value_name = "FILE")]
    pub trace: Option<PathBuf>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Evaluate a JSON operation graph and print the requested outputs
    Run {
        /// Graph description file, or `-` for stdin
        #[clap(short, long, value_name = "FILE")]
        graph: PathBuf,

        /// Node to return (repeatable)
        #[clap(short, long = "output", value_name = "NODE", required = true)]
        outputs: Vec<String>,
    },

    /// Report how much of an AOI and its buffers is covered by a reference layer
    Overlap {
        /// AOI GeoJSON file, or `-` for stdin
        #[clap(long, value_name = "FILE")]
        aoi: PathBuf,

        /// Reference layer GeoJSON file
        #[clap(long, value_name = "FILE")]
        reference: PathBuf,

        /// Include the intersection geometries in the report
        #[clap(long, default_value = "false")]
        geometry: bool,

        /// Buffer distance in km (repeatable, defaults to 10 and 50)
        #[clap(long = "distance-km", value_name = "KM")]
        distances_km: Vec<f64>,
    },

    /// Print the dissolved AOI together with its buffers
    Buffer {
        /// AOI GeoJSON file, or `-` for stdin
        #[clap(long, value_name = "FILE")]
        aoi: PathBuf,

        /// Buffer distance in km (repeatable, defaults to 10 and 50)
        #[clap(long = "distance-km", value_name = "KM")]
        distances_km: Vec<f64>,
    },
}

impl Settings {
    pub fn from_cli() -> Self {
        match Settings::try_parse() {
            Ok(args) => args,
            Err(e) => e.exit(),
        }
    }

    /// Engine configuration for these settings
    pub fn config(&self) -> Config {
        let defaults = Config::default();
        let buffer_distances_km = match &self.command {
            Command::Overlap { distances_km, .. } | Command::Buffer { distances_km, .. }
                if !distances_km.is_empty() =>
            {
                distances_km.clone()
            }
            _ => defaults.buffer_distances_km,
        };
        Config {
            parallel: !self.sequential,
            fetch_timeout: Duration::from_secs(self.fetch_timeout_secs),
            fetch_cache_capacity: self.cache_capacity,
            buffer_distances_km,
        }
    }
}
