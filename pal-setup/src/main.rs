// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use anyhow::Context;
use slog::debug;
use slog::error;
use slog::info;
use structopt::StructOpt;

use common::logging::LogFormat;
use pal_client::Transport;
use provision::PortSpec;

mod config;
mod provision;

const SUCCESS: &str = "Port configuration succeeds";
const FAILURE: &str = "Port configuration fails";

#[derive(Debug, Default, StructOpt)]
#[structopt(
    name = "pal-setup",
    about = "add and enable switch ports through the SDE's PAL service"
)]
pub(crate) struct Opt {
    #[structopt(short, long, help = "PAL server's hostname or IP address")]
    host: Option<String>,

    #[structopt(short, long, help = "PAL server's TCP port")]
    port: Option<u16>,

    #[structopt(long, help = "name of the PAL service in the multiplexer")]
    service: Option<String>,

    #[structopt(
        long,
        help = "thrift transport, 'buffered' or 'framed' [default: buffered]"
    )]
    transport: Option<Transport>,

    #[structopt(short, long, help = "TOML file listing the ports to bring up")]
    config: Option<String>,

    #[structopt(
        short = "s",
        long = "spec",
        help = "port to bring up, as DEVICE/PORT:SPEED[:FEC]",
        number_of_values = 1
    )]
    specs: Vec<PortSpec>,

    #[structopt(
        long,
        help = "check the configuration and list the ports without connecting"
    )]
    check: bool,

    #[structopt(
        long,
        about = "send log data to the named file rather than stderr"
    )]
    log_file: Option<String>,

    #[structopt(
        long,
        short = "l",
        about = "log format",
        help = "format logs for 'human' or 'json' consumption"
    )]
    log_format: Option<LogFormat>,
}

fn check(opts: &Opt) -> anyhow::Result<()> {
    let config = config::build_config(opts)?;
    println!(
        "{} port(s) to configure via {} ({}, service {}):",
        config.ports.len(),
        config.pal.address(),
        config.pal.transport,
        config.pal.service,
    );
    for spec in &config.ports {
        println!("  {spec}");
    }
    Ok(())
}

async fn configure_ports(opts: &Opt) -> anyhow::Result<()> {
    let config = config::build_config(opts)?;
    let log = common::logging::init(
        "pal-setup",
        &config.log_file,
        config.log_format,
    )?;
    debug!(log, "configuration: {config:#?}");

    let result =
        provision::provision(&log, &config.pal, &config.ports).await;
    match &result {
        Ok(()) => info!(log, "configured all ports";
            "count" => config.ports.len()),
        Err(e) => error!(log, "port configuration failed: {e}"),
    }
    result.context("port configuration failed")
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let opts = Opt::from_args();
    if opts.check {
        return check(&opts);
    }

    // The logger is dropped inside `configure_ports`, so anything it buffered
    // has been written by the time the result line appears.
    let result = configure_ports(&opts).await;
    match &result {
        Ok(()) => println!("{SUCCESS}"),
        Err(_) => println!("{FAILURE}"),
    }
    result
}
