use crate::common::Context;
use anyhow::{Context as _, Result};
use backoffice_http::{SecretString, TokenStore};
use clap::{Args, Subcommand};
use std::io::BufRead;

#[derive(Args)]
pub struct TokenArgs {
    #[command(subcommand)]
    command: TokenCommand,
}

#[derive(Subcommand)]
pub enum TokenCommand {
    /// Store an access token (and optionally a refresh token)
    Set {
        /// Access token, or `-` to read it from stdin
        access: String,
        #[arg(long)]
        refresh: Option<String>,
    },
    /// Report which tokens are stored; values are never printed
    Show,
    /// Remove every stored token
    Clear,
}

impl TokenArgs {
    pub fn run(self, ctx: &Context) -> Result<()> {
        let tokens = ctx.tokens()?;
        match self.command {
            TokenCommand::Set { access, refresh } => {
                let access = if access == "-" { read_stdin_line()? } else { access };
                set(&tokens, access, refresh)?;
                println!("token stored");
            }
            TokenCommand::Show => println!("{}", describe(&tokens)),
            TokenCommand::Clear => {
                tokens.clear().context("failed to clear tokens")?;
                println!("tokens cleared");
            }
        }
        Ok(())
    }
}

fn set(tokens: &TokenStore, access: String, refresh: Option<String>) -> Result<()> {
    if access.trim().is_empty() {
        anyhow::bail!("access token must not be empty");
    }
    let access = SecretString::from(access);
    let refresh = refresh.map(SecretString::from);
    tokens
        .set(&access, refresh.as_ref())
        .context("failed to store token")
}

fn describe(tokens: &TokenStore) -> String {
    let presence = |present: bool| if present { "present" } else { "absent" };
    let pair = tokens.pair();
    format!(
        "access token: {}\nrefresh token: {}",
        presence(pair.access.is_some()),
        presence(pair.refresh.is_some())
    )
}

fn read_stdin_line() -> Result<String> {
    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .context("failed to read token from stdin")?;
    Ok(line.trim().to_owned())
}
