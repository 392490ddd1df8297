use crate::common::Context;
use anyhow::Result;
use clap::Args;

#[derive(Args)]
pub struct ConfigArgs {
    /// Also print the storage file location
    #[arg(long)]
    with_store: bool,
}

impl ConfigArgs {
    pub fn run(&self, ctx: &Context) -> Result<()> {
        println!("{}", serde_json::to_string_pretty(&ctx.config)?);
        if self.with_store {
            println!("store: {}", ctx.store_path().display());
        }
        Ok(())
    }
}
