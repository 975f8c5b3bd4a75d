//! # Stitcher CLI Module
//!
//! ## Available Commands
//!
//! - `load` - Load JSON records from one data source
//! - `sources` - List registered data sources
//! - `components` - List connected components
//! - `cliques` - Enumerate cliques per component
//! - `resolve` - Run entity resolution
//! - `metrics` - Show graph metrics
//! - `find` - Find entities by stitch value
//! - `delete-source` - Delete a data source and its entities
//! - `history` - Show the change history of a node

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use stitcher_core::{EntityFactory, RedbStore, StitchConfig, StitchError};

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// Stitcher - link records from independent sources by shared values
#[derive(Parser, Debug)]
#[command(name = "stitcher")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to the graph database
    #[arg(short = 'D', long, global = true, default_value = "stitcher.db")]
    pub database: PathBuf,

    /// TOML file with stitching and resolution settings
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Load records from a JSON file
    Load {
        /// Data source name
        #[arg(short, long)]
        source: String,

        /// JSON array (or one object per line) of flat records
        #[arg(short, long)]
        file: PathBuf,

        /// Field mapping, e.g. `I_UNII=unii,N_Name=name,N_Name=synonyms`
        #[arg(short, long)]
        map: String,

        /// Record field holding the record id
        #[arg(long)]
        id_field: Option<String>,

        /// Values never stitched, e.g. `N_Name=WATER,*=UNKNOWN`
        #[arg(long)]
        blacklist: Option<String>,
    },

    /// List registered data sources
    Sources,

    /// List connected components, largest first
    Components {
        /// Include single-entity components
        #[arg(long)]
        singletons: bool,
    },

    /// Enumerate cliques over the resolution keys
    Cliques {
        /// Only this component (id as printed by `components`)
        #[arg(long)]
        component: Option<String>,
    },

    /// Resolve entities into groups
    Resolve,

    /// Show graph metrics
    Metrics,

    /// Find entities holding a value under a stitch key
    Find {
        /// Stitch key name, e.g. `I_UNII`
        key: String,

        /// Value to look up
        value: String,
    },

    /// Delete a data source with every entity loaded from it
    DeleteSource {
        /// Data source name
        name: String,
    },

    /// Show the change history of a node
    History {
        /// Node id
        id: u64,

        /// Restrict to one property
        #[arg(short, long)]
        key: Option<String>,
    },
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Open the database named by `cli`, applying its configuration file.
pub fn open_factory(cli: &Cli) -> Result<EntityFactory<RedbStore>, StitchError> {
    let config = match &cli.config {
        Some(path) => StitchConfig::load(path)?,
        None => StitchConfig::default(),
    };
    EntityFactory::open(&cli.database, config)
}

/// Execute the CLI with parsed arguments.
pub fn execute(cli: Cli) -> Result<(), StitchError> {
    let factory = open_factory(&cli)?;
    let json = cli.json;

    match cli.command {
        Commands::Load {
            source,
            file,
            map,
            id_field,
            blacklist,
        } => {
            let options = LoadOptions {
                source,
                file,
                mappings: parse_mappings(&map)?,
                id_field,
                blacklist: blacklist.as_deref().map(parse_blacklist).transpose()?.unwrap_or_default(),
            };
            let summary = cmd_load(&factory, &options)?;
            print_load_summary(&summary, json);
            Ok(())
        }
        Commands::Sources => cmd_sources(&factory, json),
        Commands::Components { singletons } => cmd_components(&factory, json, singletons),
        Commands::Cliques { component } => cmd_cliques(&factory, json, component.as_deref()),
        Commands::Resolve => cmd_resolve(&factory, json),
        Commands::Metrics => cmd_metrics(&factory, json),
        Commands::Find { key, value } => cmd_find(&factory, json, &key, &value),
        Commands::DeleteSource { name } => cmd_delete_source(&factory, json, &name),
        Commands::History { id, key } => cmd_history(&factory, json, id, key.as_deref()),
    }
}
