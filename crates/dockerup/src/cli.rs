//! CLI surface (spec.md §6). Ambient addition not covered by the
//! distilled spec's core modules; grounded on the `oj` CLI crate's use of
//! `clap::Parser` derive in the retrieval pack.

use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "dockerupd", about = "Host-local container reconciler")]
pub struct Cli {
    /// Properties file.
    #[arg(long, default_value = "/etc/dockerup/dockerup.conf")]
    pub config: PathBuf,

    /// Spec directory.
    #[arg(long)]
    pub confdir: Option<PathBuf>,

    /// Enable cloud user-data.
    #[arg(long = "aws", overrides_with = "no_aws")]
    aws_flag: bool,
    #[arg(long = "no-aws", overrides_with = "aws_flag")]
    no_aws: bool,

    /// Global pull toggle.
    #[arg(long = "pull", overrides_with = "no_pull")]
    pull_flag: bool,
    #[arg(long = "no-pull", overrides_with = "pull_flag")]
    no_pull: bool,

    /// Daemon vs one-shot.
    #[arg(long = "server", overrides_with = "no_server")]
    server_flag: bool,
    #[arg(long = "no-server", overrides_with = "server_flag")]
    no_server: bool,
}

impl Cli {
    pub fn aws(&self) -> Option<bool> {
        tri_state(self.aws_flag, self.no_aws)
    }

    pub fn pull(&self) -> Option<bool> {
        tri_state(self.pull_flag, self.no_pull)
    }

    pub fn server(&self) -> Option<bool> {
        tri_state(self.server_flag, self.no_server)
    }
}

fn tri_state(positive: bool, negative: bool) -> Option<bool> {
    match (positive, negative) {
        (true, _) => Some(true),
        (_, true) => Some(false),
        (false, false) => None,
    }
}
