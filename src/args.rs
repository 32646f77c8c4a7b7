use clap::Parser;
use roomrtc_core::config::Config;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "roomrtc")]
#[command(version)]
#[command(about = "Join a WebRTC room and follow its events", long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "/etc/roomrtc.toml")]
    pub config: PathBuf,

    /// Media server base URL (overrides the config file)
    #[arg(long)]
    pub base_url: Option<String>,

    /// Room to join
    #[arg(short, long)]
    pub room: String,

    /// Display name of this client
    #[arg(short, long)]
    pub name: Option<String>,

    /// Bearer token for the control plane
    #[arg(long, env = "ROOMRTC_TOKEN")]
    pub token: Option<String>,

    /// Verbose logging
    #[arg(short, long, action)]
    pub verbose: bool,
}

impl Args {
    /// Load the config file and apply command line overrides.
    pub fn load_config(&self) -> roomrtc_core::Result<Config> {
        let mut config = Config::load(&self.config)?;
        if let Some(base_url) = &self.base_url {
            config.api.base_url = base_url.clone();
        }
        if self.token.is_some() {
            config.api.token = self.token.clone();
        }
        Ok(config)
    }
}
