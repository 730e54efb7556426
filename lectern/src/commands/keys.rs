use crate::keystore::{self, KeyStore};
use anyhow::Result;
use clap::{Args, Subcommand};
use log::info;
use std::path::PathBuf;

/// Manage the KID:KEY file used for decryption.
#[derive(Debug, Clone, Args)]
pub struct Keys {
    #[command(subcommand)]
    pub action: KeysAction,

    /// Json file of KID:KEY pairs.
    #[arg(short, long, global = true, default_value = "keyfile.json")]
    pub keyfile: PathBuf,
}

#[derive(Debug, Clone, Subcommand)]
pub enum KeysAction {
    /// Add or replace keys.
    Add {
        /// KID:KEY pairs in hex format.
        #[arg(required = true, value_name = "KID:KEY", value_parser = keystore::parse_pair)]
        pairs: Vec<(String, String)>,
    },
    /// Print the stored KID:KEY pairs.
    List,
}

impl Keys {
    pub fn execute(self) -> Result<()> {
        match self.action {
            KeysAction::Add { pairs } => {
                let total = KeyStore::upsert(&self.keyfile, &pairs)?;
                info!(
                    "Saved {} key(s) to {} ({} total)",
                    pairs.len(),
                    self.keyfile.display(),
                    total
                );
            }
            KeysAction::List => {
                if !self.keyfile.exists() {
                    info!("{} doesn't exist yet.", self.keyfile.display());
                    return Ok(());
                }

                for (kid, key) in KeyStore::entries(&self.keyfile)? {
                    println!("{}:{}", kid, key);
                }
            }
        }

        Ok(())
    }
}
