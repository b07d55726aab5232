use std::sync::Arc;

use clap::{Args, Subcommand};
use phaselock_core::{BlockService, BlockSpec, Config, Database};

use super::{print_json, CmdResult};

/// Block durations in minutes. Omitted values come from
/// `[block_defaults]` in the config file.
#[derive(Args)]
pub struct SpecArgs {
    /// Total length of the block
    #[arg(long)]
    total: Option<u32>,
    /// Length of each work phase
    #[arg(long)]
    work: Option<u32>,
    /// Length of the breaks between work phases
    #[arg(long)]
    short_break: Option<u32>,
    /// Length of the closing break (0 for none)
    #[arg(long)]
    long_break: Option<u32>,
}

impl SpecArgs {
    fn resolve(&self, defaults: BlockSpec) -> BlockSpec {
        BlockSpec::new(
            self.total.unwrap_or(defaults.total_minutes),
            self.work.unwrap_or(defaults.work_minutes),
            self.short_break.unwrap_or(defaults.short_break_minutes),
            self.long_break.unwrap_or(defaults.long_break_minutes),
        )
    }
}

#[derive(Subcommand)]
pub enum BlockAction {
    /// Create a block
    Create(SpecArgs),
    /// Create a block from the configured defaults
    Default,
    /// Show a block and its phases
    Show {
        /// Block ID
        id: i64,
    },
    /// List all blocks
    List,
    /// Print the phases a block would have, without creating it
    Preview(SpecArgs),
    /// Print the configured default durations
    Defaults,
}

pub fn run(action: BlockAction) -> CmdResult {
    let config = Config::load()?;
    let defaults = config.block_defaults.spec();
    let service = BlockService::new(Arc::new(Database::open()?), defaults);

    match action {
        BlockAction::Create(args) => print_json(&service.create_block(args.resolve(defaults))?),
        BlockAction::Default => print_json(&service.create_default_block()?),
        BlockAction::Show { id } => print_json(&service.get_block(id)?),
        BlockAction::List => print_json(&service.list_blocks()?),
        BlockAction::Preview(args) => {
            print_json(&service.preview_sequence(args.resolve(defaults))?)
        }
        BlockAction::Defaults => print_json(&service.defaults()),
    }
}
