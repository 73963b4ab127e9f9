use std::time::Duration;

use anyhow::{anyhow, Result};
use clap::{Args, Parser, Subcommand};
use jamf::{ClientOptions, Credential, PrestageId, RetryPolicy};

#[derive(Parser, Debug, Clone)]
#[command(
    version,
    about = "Look up Jamf Pro computers and manage their prestage and preload records",
    long_about = None
)]
pub struct Config {
    /// Base URL of the Jamf Pro instance, e.g. `https://example.jamfcloud.com`.
    #[arg(long, env = "JAMF_URL")]
    pub base_url: Option<String>,

    /// API client id of the service account.
    #[arg(long, env = "JAMF_CLIENT_ID")]
    pub client_id: Option<String>,

    /// API client secret of the service account.
    #[arg(long, env = "JAMF_CLIENT_SECRET", hide_env_values = true)]
    pub client_secret: Option<String>,

    /// Per-request timeout in seconds.
    #[arg(long, default_value_t = 30)]
    pub timeout_secs: u64,

    /// How many times a request is retried after a connection failure or timeout.
    #[arg(long, default_value_t = 2)]
    pub retries: u32,

    /// Request a new access token for every operation instead of reusing one.
    #[arg(long, default_value_t = false)]
    pub no_token_cache: bool,

    /// Skip the confirmation prompt before changing anything.
    #[arg(long, short = 'y', default_value_t = false)]
    pub yes: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Show a computer, its prestage and its preload record. Falls back to
    /// device enrollment for serial numbers not in inventory yet.
    Lookup {
        /// Computer name, serial number or asset tag.
        query: String,
    },
    /// Remove a computer from a prestage.
    Remove { serial: String, prestage_id: PrestageId },
    /// Add a computer to a prestage, by prestage name.
    Add { serial: String, prestage: String },
    /// Move a computer to another prestage: remove from the current one, then add.
    Move {
        serial: String,
        /// Name of the target prestage.
        prestage: String,
        /// Prestage to remove from. Read from Jamf when omitted.
        #[arg(long)]
        from: Option<PrestageId>,
    },
    /// Replace the whole scope of a prestage with this one computer.
    Replace { serial: String, prestage_id: PrestageId },
    /// Show or edit inventory preload records.
    Preload {
        #[command(subcommand)]
        action: PreloadCommand,
    },
    /// List the prestages on the instance and compare them with the local directory.
    Prestages,
    /// List buildings usable in preload records.
    Buildings,
}

#[derive(Subcommand, Debug, Clone)]
pub enum PreloadCommand {
    Show { serial: String },
    Set(PreloadArgs),
}

#[derive(Args, Debug, Clone)]
pub struct PreloadArgs {
    pub serial: String,

    /// Record to update. Looked up by serial number when omitted.
    #[arg(long)]
    pub id: Option<String>,

    #[arg(long)]
    pub username: Option<String>,

    #[arg(long)]
    pub email: Option<String>,

    #[arg(long)]
    pub building: Option<String>,

    #[arg(long)]
    pub room: Option<String>,

    #[arg(long)]
    pub asset_tag: Option<String>,

    /// Also copy owner, location and asset tag onto the computer's inventory.
    #[arg(long, default_value_t = false)]
    pub sync_inventory: bool,
}

impl Config {
    pub fn validate_auth(&self) -> Result<(), String> {
        let missing: Vec<&str> = [
            ("--base-url / JAMF_URL", &self.base_url),
            ("--client-id / JAMF_CLIENT_ID", &self.client_id),
            ("--client-secret / JAMF_CLIENT_SECRET", &self.client_secret),
        ]
        .into_iter()
        .filter(|(_, value)| value.as_deref().map_or(true, |v| v.trim().is_empty()))
        .map(|(name, _)| name)
        .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(format!("missing {}", missing.join(", ")))
        }
    }

    pub fn credential(&self) -> Result<Credential> {
        if let Err(e) = self.validate_auth() {
            return Err(anyhow!("Authentication configuration error: {}", e));
        }
        let (Some(base_url), Some(client_id), Some(client_secret)) =
            (&self.base_url, &self.client_id, &self.client_secret)
        else {
            return Err(anyhow!("Authentication configuration error"));
        };
        Ok(Credential::new(base_url, client_id.trim(), client_secret.trim())?)
    }

    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            timeout: Duration::from_secs(self.timeout_secs.max(1)),
            retry: RetryPolicy::default().with_max_retries(self.retries),
            cache_tokens: !self.no_token_cache,
        }
    }
}
