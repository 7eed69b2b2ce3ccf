mod build;
mod elf;
mod error;
mod extended;
mod image;
mod loader;
mod sectors;
#[cfg(test)]
mod testutil;

use crate::build::{build_image, Layout, Named};
use crate::error::Error;
use crate::sectors::{SECTOR_COUNT_OFFSET, SECTOR_SIZE};
use anyhow::Context;
use clap::{Arg, ArgAction, ArgMatches, Command, value_parser};
use std::fs::File;
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

const IMAGE_FILE: &str = "./image";

fn cli() -> Command {
    Command::new(env!("CARGO_PKG_NAME"))
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .version(env!("CARGO_PKG_VERSION"))
        .author(env!("CARGO_PKG_AUTHORS"))
        .arg(
            Arg::new("bootblock")
                .help("Bootblock ELF executable, placed at the start of the image")
                .value_parser(value_parser!(PathBuf))
                .required(true)
                .index(1),
        )
        .arg(
            Arg::new("kernel")
                .help("Kernel ELF executable")
                .value_parser(value_parser!(PathBuf))
                .required(true)
                .index(2),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .help("Image file to write")
                .value_parser(value_parser!(PathBuf))
                .default_value(IMAGE_FILE)
                .action(ArgAction::Set),
        )
        .arg(
            Arg::new("extended")
                .long("extended")
                .help("Prints segment placement and kernel size after building")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("vm")
                .long("vm")
                .help("Accepted for compatibility, has no effect")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("kernel-offset")
                .long("kernel-offset")
                .help("Image offset of the kernel region, decimal or 0x-prefixed hex")
                .value_parser(parse_offset)
                .default_value("512")
                .action(ArgAction::Set),
        )
        .arg(
            Arg::new("sector-count-offset")
                .long("sector-count-offset")
                .help("Image offset of the kernel sector count byte")
                .value_parser(parse_offset)
                .default_value("2")
                .action(ArgAction::Set),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Logs build progress, repeat for more detail")
                .action(ArgAction::Count),
        )
}

fn parse_offset(value: &str) -> Result<u64, String> {
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => value.parse::<u64>(),
    };
    parsed.map_err(|e| format!("invalid offset '{value}': {e}"))
}

#[derive(Debug, PartialEq)]
struct Options {
    bootblock: PathBuf,
    kernel: PathBuf,
    output: PathBuf,
    extended: bool,
    layout: Layout,
    verbosity: u8,
}

impl Options {
    fn from_matches(matches: &ArgMatches) -> Self {
        let path = |id: &str| {
            matches
                .get_one::<PathBuf>(id)
                .cloned()
                .unwrap_or_default()
        };
        let offset = |id: &str, default: u64| matches.get_one::<u64>(id).copied().unwrap_or(default);

        Options {
            bootblock: path("bootblock"),
            kernel: path("kernel"),
            output: path("output"),
            extended: matches.get_flag("extended"),
            layout: Layout {
                bootblock_base: 0,
                kernel_base: offset("kernel-offset", SECTOR_SIZE),
                sector_count_offset: offset("sector-count-offset", SECTOR_COUNT_OFFSET),
            },
            verbosity: matches.get_count("verbose"),
        }
    }
}

fn open_input(path: &Path) -> Result<Named<BufReader<File>>, Error> {
    let file = File::open(path).map_err(|source| Error::InputOpen {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(Named::new(path.display().to_string(), BufReader::new(file)))
}

fn run(options: &Options) -> anyhow::Result<()> {
    // 1. Open both inputs before touching the output
    let bootblock = open_input(&options.bootblock)?;
    let kernel = open_input(&options.kernel)?;
    // 2. The image file is created (or truncated) only now
    let image = File::create(&options.output).map_err(|source| Error::OutputOpen {
        path: options.output.clone(),
        source,
    })?;
    let output = Named::new(options.output.display().to_string(), BufWriter::new(image));

    // 3. Build, then flush everything to disk
    let (report, out) = build_image(bootblock, kernel, output, &options.layout)
        .context("failed to build image")?;
    out.into_inner()
        .map_err(|e| e.into_error())
        .and_then(|file| file.sync_all())
        .with_context(|| format!("failed to finish {}", options.output.display()))?;

    log::info!(
        "wrote {} ({} bytes, {} kernel sectors)",
        options.output.display(),
        report.image_extent,
        report.kernel_sectors
    );

    // 4. Optional layout report
    if options.extended {
        let stdout = io::stdout();
        extended::print_extended(&report, &mut stdout.lock())?;
    }
    Ok(())
}

fn init_logger(verbosity: u8) {
    let default = match verbosity {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default))
        .format_timestamp(None)
        .init();
}

fn main() -> ExitCode {
    let matches = cli().get_matches();
    let options = Options::from_matches(&matches);
    init_logger(options.verbosity);

    if matches.get_flag("vm") {
        log::debug!("--vm given, ignored");
    }

    match run(&options) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}
