// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use uriteller_server::{config::ServerConfig, run_server};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// HTTP listen address (overrides config file)
    #[arg(long, env = "URITELLER_HTTP_ADDR")]
    http_addr: Option<String>,

    /// Public base URL (overrides config file)
    #[arg(long, env = "URITELLER_BASE_URL")]
    base_url: Option<String>,

    /// Visits per committed batch (overrides config file)
    #[arg(long, env = "URITELLER_BATCH_CAP")]
    batch_cap: Option<usize>,

    /// Do not run the enrichment worker in this process
    #[arg(long)]
    no_worker: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = ServerConfig::load(args.config)?;

    // Apply CLI overrides
    if let Some(addr) = args.http_addr {
        config.server.listen_addr = addr;
    }
    if let Some(base_url) = args.base_url {
        config.server.base_url = base_url;
    }
    if let Some(batch_cap) = args.batch_cap {
        config.store.batch_cap = batch_cap;
    }
    if args.no_worker {
        config.worker.enabled = false;
    }

    // Run server
    run_server(config).await
}
