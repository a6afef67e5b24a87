// This file is part of devattach, an application to attach FPGA peripherals through device-tree overlays and expose them to userspace.
//
// Copyright 2025 Canonical Ltd.
//
// SPDX-License-Identifier: GPL-3.0-only
//
// devattach is free software: you can redistribute it and/or modify it under the terms of the GNU General Public License version 3, as published by the Free Software Foundation.
//
// devattach is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the implied warranties of MERCHANTABILITY, SATISFACTORY QUALITY, or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with this program.  If not, see http://www.gnu.org/licenses/.

mod endpoint;
mod proxies;
mod status;

use crate::endpoint::{call_check_identity, read_handler, write_handler};
use crate::status::{endpoints_handler, status_handler};
use clap::{Parser, Subcommand, arg, command};
use log::{debug, error};

#[derive(Parser, Debug)]
#[command(name = "devattach")]
#[command(bin_name = "devattach")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show the identity register, the attached fragment and the last load cycle
    Status,
    /// Queue an identity check, as if the identity interrupt fired
    Check,
    /// List the published peripheral endpoints
    Endpoints,
    /// Read from a peripheral endpoint
    Read {
        endpoint: String,
        #[arg(long, default_value_t = 0)]
        offset: u64,
        #[arg(long, default_value_t = 64)]
        count: u32,
        #[arg(long, help = "print the payload as hex bytes")]
        hex: bool,
    },
    /// Write a value to a peripheral endpoint
    Write { endpoint: String, value: String },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let cli = Cli::parse();
    debug!("parsed cli command with {cli:?}");
    let result = match cli.command {
        Commands::Status => status_handler().await,
        Commands::Check => call_check_identity().await,
        Commands::Endpoints => endpoints_handler().await,
        Commands::Read {
            endpoint,
            offset,
            count,
            hex,
        } => read_handler(&endpoint, offset, count, hex).await,
        Commands::Write { endpoint, value } => write_handler(&endpoint, &value).await,
    };
    match result {
        Ok(msg) => {
            println!("{msg}");
            Ok(())
        }
        Err(e) => {
            error!("{e}");
            Err(e.into())
        }
    }
}
