// SPDX-FileCopyrightText: 2026 meshfw contributors
// SPDX-License-Identifier: GPL-3.0-only

use std::{
    fmt::Write,
    fs,
    io::{self, IsTerminal},
    path::PathBuf,
    sync::atomic::{AtomicBool, Ordering},
};

use anyhow::{Context, Result};
use clap::{Args, Parser, ValueEnum};
use tracing::Level;

use crate::{
    cli::status,
    device::{DEVICES, Device},
    pipeline::{self, Operation, PipelineConfig, SaltMode},
    util::NumBytes,
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn as_level(self) -> Level {
        match self {
            Self::Trace => Level::TRACE,
            Self::Debug => Level::DEBUG,
            Self::Info => Level::INFO,
            Self::Warn => Level::WARN,
            Self::Error => Level::ERROR,
        }
    }
}

#[derive(Debug, Args)]
#[group(required = true, multiple = false)]
pub struct OperationGroup {
    /// Fix partition header lengths and checksums in a recovery image.
    #[arg(short = 'u', long = "UpdateFirmwareHeader")]
    pub update_firmware_header: bool,

    /// Build a signed and encrypted factory image from a recovery image.
    #[arg(short = 'c', long = "CreateFactoryImage")]
    pub create_factory_image: bool,

    /// Verify and decrypt a factory image into a recovery image.
    #[arg(short = 'd', long = "DecryptFactoryImage")]
    pub decrypt_factory_image: bool,
}

impl OperationGroup {
    pub fn get(&self) -> Operation {
        if self.update_firmware_header {
            Operation::UpdateFirmwareHeader
        } else if self.create_factory_image {
            Operation::CreateFactoryImage
        } else {
            Operation::DecryptFactoryImage
        }
    }
}

fn parse_device(name: &str) -> Result<&'static Device, String> {
    pipeline::lookup_device(name).map_err(|e| e.to_string())
}

fn extra_help() -> String {
    let mut help = String::from("Operations:\n");

    for operation in Operation::ALL {
        let _ = writeln!(
            help,
            "  {:<22}{}, input size {:?} minimum",
            operation.to_string(),
            operation.description(),
            NumBytes(operation.min_input_size()),
        );
    }

    help.push_str("\nDevices:\n");

    for device in DEVICES {
        let _ = writeln!(help, "  {:<6}{}", device.name, device.description);
    }

    help
}

/// Convert D-Link AI mesh router firmware between recovery and factory images.
#[derive(Debug, Parser)]
#[command(version, after_help = extra_help())]
pub struct Cli {
    /// Target device.
    #[arg(value_name = "DEVICE", value_parser = parse_device)]
    pub device: &'static Device,

    #[command(flatten)]
    pub operation: OperationGroup,

    /// Path to input image.
    #[arg(value_name = "INPUT_FILE", value_parser)]
    pub input: PathBuf,

    /// Path to output image.
    #[arg(value_name = "OUTPUT_FILE", value_parser)]
    pub output: PathBuf,

    /// Write intermediate buffers to this directory.
    #[arg(long, value_name = "DIRECTORY", value_parser)]
    pub debug: Option<PathBuf>,

    /// Use a random salt instead of the vendor's fixed salt.
    ///
    /// The output is then no longer reproducible.
    #[arg(long)]
    pub random_salt: bool,

    /// Lowest log message severity to output.
    #[arg(long, value_name = "LEVEL", default_value_t, value_enum)]
    pub log_level: LogLevel,
}

pub fn init_logging(log_level: LogLevel) {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal())
        .with_max_level(log_level.as_level())
        .init();
}

pub fn main(cli: &Cli, logging_initialized: &AtomicBool) -> Result<()> {
    init_logging(cli.log_level);
    logging_initialized.store(true, Ordering::SeqCst);

    let operation = cli.operation.get();
    let device = cli.device;

    status!("{operation} for {} ({})", device.name, device.description);

    // Check the size before reading anything into memory.
    let size = fs::metadata(&cli.input)
        .with_context(|| format!("Failed to stat: {:?}", cli.input))?
        .len();
    operation
        .check_input_size(size)
        .with_context(|| format!("Rejected input file: {:?}", cli.input))?;

    let config = PipelineConfig {
        debug_dir: cli.debug.clone(),
        salt: if cli.random_salt {
            SaltMode::Random
        } else {
            SaltMode::Fixed
        },
    };

    if let Some(dir) = config.debug_dir() {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create debug directory: {dir:?}"))?;
        status!("Writing debug files to: {dir:?}");
    }

    let input = fs::read(&cli.input)
        .with_context(|| format!("Failed to read file: {:?}", cli.input))?;
    status!("Read {:?} from: {:?}", NumBytes(input.len()), cli.input);

    let output = operation
        .run(input, device, &config)
        .with_context(|| format!("Failed to run {operation}: {:?}", cli.input))?;

    fs::write(&cli.output, &output)
        .with_context(|| format!("Failed to write file: {:?}", cli.output))?;
    status!("Wrote {:?} to: {:?}", NumBytes(output.len()), cli.output);

    Ok(())
}
