use crate::common::Context;
use anyhow::{Context as _, Result};
use backoffice_http::TenantContext;
use clap::{ArgGroup, Args, Subcommand};

#[derive(Args)]
pub struct TenantArgs {
    #[command(subcommand)]
    command: TenantCommand,
}

#[derive(Subcommand)]
pub enum TenantCommand {
    /// Switch the stored tenant; an omitted field falls back to the configured default
    #[command(group(ArgGroup::new("tenant").required(true).multiple(true).args(["id", "slug"])))]
    Set {
        #[arg(long)]
        id: Option<String>,
        #[arg(long)]
        slug: Option<String>,
    },
    /// Print the tenant the next request would use
    Show,
    /// Forget the stored tenant
    Clear,
}

impl TenantArgs {
    pub fn run(self, ctx: &Context) -> Result<()> {
        let tenants = ctx.tenants()?;
        match self.command {
            TenantCommand::Set { id, slug } => {
                tenants
                    .set(&TenantContext::new(id, slug))
                    .context("failed to store tenant")?;
            }
            TenantCommand::Show => {}
            TenantCommand::Clear => tenants.clear().context("failed to clear tenant")?,
        }
        println!("{}", serde_json::to_string_pretty(&tenants.resolve())?);
        Ok(())
    }
}
