// crates/davz-cli/src/main.rs

#![forbid(unsafe_code)]
#![deny(
    rust_2018_idioms,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo
)]

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use davz_core::{io, ClustererConfig, DaClusterizer};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(
    name = "davz-cli",
    about = "davz reference CLI",
    long_about = "davz reference CLI.\n\nUse this tool to generate synthetic events and cluster track files into vertex candidates.",
    version = env!("CARGO_PKG_VERSION"),
    disable_help_subcommand = true
)]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Generate a synthetic multi-vertex event (CBOR/JSON by extension).
    Simulate {
        /// Number of primary vertices (>0)
        #[arg(long, default_value_t = 4, value_parser = clap::value_parser!(u16).range(1..))]
        vertices: u16,

        /// Tracks per vertex (>0)
        #[arg(long, default_value_t = 30, value_parser = clap::value_parser!(u16).range(1..))]
        tracks_per_vertex: u16,

        /// Fraction of uniform background tracks, in [0, 1)
        #[arg(long, default_value_t = 0.05)]
        outliers: f64,

        /// RNG seed
        #[arg(long, default_value_t = 42)]
        seed: u64,

        /// Output path for the event (CBOR/JSON)
        #[arg(long, default_value = "event.json")]
        out: PathBuf,
    },

    /// Cluster an event file into vertex candidates
    Cluster {
        /// Input event path (CBOR/JSON/JSONL)
        #[arg(long)]
        input: PathBuf,

        /// Optional clusterer configuration (JSON); defaults apply otherwise
        #[arg(long)]
        config: Option<PathBuf>,

        /// Output path for the clusters (CBOR/JSON)
        #[arg(long, default_value = "clusters.json")]
        out: PathBuf,

        /// Collapse nearby vertices into track groups instead of emitting
        /// one candidate per vertex
        #[arg(long, default_value_t = false)]
        group: bool,
    },

    /// Print the default clusterer configuration as JSON
    DefaultConfig,
}

fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.cmd {
        Cmd::Simulate {
            vertices,
            tracks_per_vertex,
            outliers,
            seed,
            out,
        } => simulate(vertices, tracks_per_vertex, outliers, seed, out),

        Cmd::Cluster {
            input,
            config,
            out,
            group,
        } => cluster(&input, config.as_deref(), &out, group),

        Cmd::DefaultConfig => default_config(),
    }
}

/// Initialize tracing with an env-driven filter (default INFO).
fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = fmt::layer().with_target(false).with_level(true).compact();

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init();
}

fn simulate(vertices: u16, tracks_per_vertex: u16, outliers: f64, seed: u64, out: PathBuf) -> Result<()> {
    use davz_sim::generator::{generate_event, EventSpec};

    let spec = EventSpec {
        n_vertices: usize::from(vertices),
        tracks_per_vertex: usize::from(tracks_per_vertex),
        outlier_fraction: outliers,
        seed,
        ..Default::default()
    };

    info!(vertices, tracks_per_vertex, outliers, seed, "generating synthetic event");
    let event = generate_event(&spec).context("generating event")?;

    io::write_event_auto(&out, &event)
        .with_context(|| format!("writing event to {}", out.display()))?;

    println!(
        "Simulated event: {} vertices × {} tracks (+{} outliers) → {}",
        vertices,
        tracks_per_vertex,
        event.tracks.len() - usize::from(vertices) * usize::from(tracks_per_vertex),
        out.display()
    );
    Ok(())
}

fn cluster(input: &Path, config: Option<&Path>, out: &Path, group: bool) -> Result<()> {
    let cfg = match config {
        Some(path) => read_config(path)?,
        None => ClustererConfig::default(),
    };

    info!(input = %input.display(), out = %out.display(), group, "clustering");
    let event = io::read_event_auto(input)
        .with_context(|| format!("reading event from {}", input.display()))?;

    let clusterizer = DaClusterizer::new(&cfg);

    if group {
        let groups = clusterizer.clusterize(&event.tracks, &event.beam_spot);
        let f = File::create(out).with_context(|| format!("create {}", out.display()))?;
        serde_json::to_writer_pretty(f, &groups).context("serialize track groups")?;
        println!(
            "Clustered {} tracks → {} groups → {}",
            event.tracks.len(),
            groups.len(),
            out.display()
        );
    } else {
        let pv = clusterizer.vertices(&event.tracks, &event.beam_spot);
        io::write_clusters_auto(out, &pv)
            .with_context(|| format!("writing clusters to {}", out.display()))?;
        println!(
            "Clustered {} tracks → {} vertex candidates → {}",
            event.tracks.len(),
            pv.len(),
            out.display()
        );
    }
    Ok(())
}

fn default_config() -> Result<()> {
    let cfg = ClustererConfig::default();
    let s = serde_json::to_string_pretty(&cfg).context("serialize default config")?;
    println!("{s}");
    Ok(())
}

/// Read a clusterer configuration from JSON; missing fields take defaults.
fn read_config(path: &Path) -> Result<ClustererConfig> {
    let f = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let rdr = BufReader::new(f);
    let cfg: ClustererConfig =
        serde_json::from_reader(rdr).with_context(|| format!("parse config {}", path.display()))?;
    Ok(cfg)
}
