// Command-line front end for dfwpatch.
//
// Subcommands mirror the host-side workflow: `diff` builds a patch from two
// images, `apply` rebuilds an image the way the device would, and `inspect`
// walks a patch without touching any image.

use std::path::{Path, PathBuf};
use std::process;

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum, ValueHint};
use log::LevelFilter;

use crate::diff::DiffOptions;
use crate::dfw::PatchCommand;
use crate::io::{self, ApplyFileOptions, CreateFileOptions};
use crate::patch::{FirmwareTarget, PatchContext, ReaderConfig, ReservedRange, inspect_patch};
use crate::xz::encoder::XzOptions;
use crate::xz::{CheckKind, DEFAULT_DICT_MAX};

// ---------------------------------------------------------------------------
// Value parsing (sizes accept K/M/G, addresses accept 0x)
// ---------------------------------------------------------------------------

fn parse_byte_size(s: &str) -> Result<u64, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty size string".into());
    }
    let (num_part, multiplier) = match s.as_bytes().last() {
        Some(b'k' | b'K') => (&s[..s.len() - 1], 1024u64),
        Some(b'm' | b'M') => (&s[..s.len() - 1], 1024 * 1024),
        Some(b'g' | b'G') => (&s[..s.len() - 1], 1024 * 1024 * 1024),
        _ => (s, 1u64),
    };
    let num = parse_address(num_part)?;
    num.checked_mul(multiplier)
        .ok_or_else(|| format!("size overflow: '{s}'"))
}

fn parse_address(s: &str) -> Result<u64, String> {
    let s = s.trim();
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid number '{s}': {e}"))
}

fn parse_u32(s: &str) -> Result<u32, String> {
    let v = parse_byte_size(s)?;
    u32::try_from(v).map_err(|_| format!("'{s}' does not fit 32 bits"))
}

/// `START:STOP`, both inclusive.
fn parse_reserved(s: &str) -> Result<ReservedRange, String> {
    let (start, stop) = s
        .split_once(':')
        .ok_or_else(|| format!("expected START:STOP, got '{s}'"))?;
    ReservedRange::new(parse_address(start)?, parse_address(stop)?)
        .ok_or_else(|| format!("invalid reserved range '{s}'"))
}

// ---------------------------------------------------------------------------
// Clap CLI definition
// ---------------------------------------------------------------------------

/// Delta firmware patch tool.
#[derive(Parser, Debug)]
#[command(
    name = "dfwpatch",
    version,
    about = "bsdiff/XZ delta firmware patches",
    arg_required_else_help = true
)]
struct Cli {
    #[command(subcommand)]
    command: Cmd,

    /// Force overwrite existing output files.
    #[arg(short = 'f', long, global = true)]
    force: bool,

    /// Quiet mode (errors only).
    #[arg(short = 'q', long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Verbose mode (use multiple times for more detail).
    #[arg(short = 'v', long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Output stats as JSON.
    #[arg(long = "json", global = true)]
    json_output: bool,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Rebuild a new image from an old image and a patch.
    Apply(ApplyArgs),
    /// Create a patch turning one image into another.
    Diff(DiffArgs),
    /// Print the header and command statistics of a patch.
    Inspect(InspectArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum CheckArg {
    None,
    Crc32,
    Sha256,
}

impl From<CheckArg> for CheckKind {
    fn from(arg: CheckArg) -> Self {
        match arg {
            CheckArg::None => CheckKind::None,
            CheckArg::Crc32 => CheckKind::Crc32,
            CheckArg::Sha256 => CheckKind::Sha256,
        }
    }
}

#[derive(Args, Debug)]
struct ReaderArgs {
    /// Reader window size (supports K/M suffix).
    #[arg(long = "window-size", value_parser = parse_byte_size, default_value = "512")]
    window_size: u64,

    /// Largest dictionary the decoder accepts (supports K/M suffix).
    #[arg(long = "dict-max", value_parser = parse_u32, default_value_t = DEFAULT_DICT_MAX)]
    dict_max: u32,

    /// Offset of a DFW patch/decompress record in the patch file.
    #[arg(long = "dfw-offset", value_parser = parse_address)]
    dfw_offset: Option<u64>,
}

impl ReaderArgs {
    fn config(&self) -> ReaderConfig {
        ReaderConfig {
            window_size: self.window_size as usize,
            dict_max: self.dict_max,
        }
    }
}

#[derive(Args, Debug)]
struct ApplyArgs {
    /// Old (currently installed) image.
    #[arg(value_hint = ValueHint::FilePath)]
    old: PathBuf,

    /// Patch file.
    #[arg(value_hint = ValueHint::FilePath)]
    patch: PathBuf,

    /// Output image.
    #[arg(value_hint = ValueHint::FilePath)]
    output: PathBuf,

    /// Image being rebuilt.
    #[arg(long, value_enum, default_value_t = FirmwareTarget::Application)]
    target: FirmwareTarget,

    /// Reserved range skipped by application images, as START:STOP.
    #[arg(long, value_parser = parse_reserved)]
    reserved: Option<ReservedRange>,

    /// Physical address of the first old-image byte.
    #[arg(long = "old-base", value_parser = parse_address, default_value = "0")]
    old_base: u64,

    /// Read/write chunk size (supports K suffix).
    #[arg(long = "chunk-size", value_parser = parse_byte_size, default_value = "512")]
    chunk_size: u64,

    /// Expected CRC32 of the rebuilt code sections.
    #[arg(long = "expect-crc", value_parser = parse_address)]
    expect_crc: Option<u64>,

    #[command(flatten)]
    reader: ReaderArgs,
}

#[derive(Args, Debug)]
struct DiffArgs {
    /// Old image.
    #[arg(value_hint = ValueHint::FilePath)]
    old: PathBuf,

    /// New image.
    #[arg(value_hint = ValueHint::FilePath)]
    new: PathBuf,

    /// Output patch file.
    #[arg(value_hint = ValueHint::FilePath)]
    patch: PathBuf,

    /// Hashed block width.
    #[arg(long = "block-size", default_value_t = DiffOptions::default().block_size)]
    block_size: usize,

    /// Shortest match that starts a new command.
    #[arg(long = "min-match", default_value_t = DiffOptions::default().min_match)]
    min_match: usize,

    /// Dictionary size declared in the XZ stream (supports K/M suffix).
    #[arg(long = "dict-size", value_parser = parse_u32, default_value_t = DEFAULT_DICT_MAX)]
    dict_size: u32,

    /// XZ integrity check.
    #[arg(long, value_enum, default_value_t = CheckArg::Crc32)]
    check: CheckArg,

    /// Reserved range removed from both images, as START:STOP.
    #[arg(long, value_parser = parse_reserved)]
    reserved: Option<ReservedRange>,

    /// Prefix the patch with a DFW patch/decompress record.
    #[arg(long = "dfw-record")]
    dfw_record: bool,
}

#[derive(Args, Debug)]
struct InspectArgs {
    /// Patch file.
    #[arg(value_hint = ValueHint::FilePath)]
    patch: PathBuf,

    #[command(flatten)]
    reader: ReaderArgs,
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

fn log_filter(cli: &Cli) -> LevelFilter {
    if cli.quiet {
        return LevelFilter::Error;
    }
    match cli.verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

fn check_output(path: &Path, force: bool) -> Result<(), i32> {
    if path.exists() && !force {
        eprintln!(
            "dfwpatch: to overwrite output file specify -f: {}",
            path.display()
        );
        return Err(1);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// apply
// ---------------------------------------------------------------------------

fn cmd_apply(args: &ApplyArgs, cli: &Cli) -> i32 {
    if let Err(code) = check_output(&args.output, cli.force) {
        return code;
    }
    let expected_crc32 = match args.expect_crc.map(u32::try_from).transpose() {
        Ok(v) => v,
        Err(_) => {
            eprintln!("dfwpatch: --expect-crc does not fit 32 bits");
            return 1;
        }
    };
    let opts = ApplyFileOptions {
        target: args.target,
        old_base: args.old_base,
        reserved: args.reserved,
        reader: args.reader.config(),
        chunk_size: args.chunk_size as usize,
        dfw_offset: args.reader.dfw_offset,
        expected_crc32,
    };

    match io::apply_file(&args.old, &args.patch, &args.output, opts) {
        Ok(stats) => {
            if cli.json_output {
                let json = serde_json::json!({
                    "old_size": stats.old_size,
                    "patch_size": stats.patch_size,
                    "image_size": stats.image_size,
                    "output_size": stats.output_size,
                    "triples": stats.apply.triples,
                    "diff_bytes": stats.apply.diff_bytes,
                    "extra_bytes": stats.apply.extra_bytes,
                    "reserved_skips": stats.apply.reserved_skips,
                    "crc32": format!("{:08x}", stats.image_crc32),
                    "output_sha256": io::hex(&stats.output_sha256),
                });
                eprintln!("{json:#}");
            } else if !cli.quiet {
                eprintln!(
                    "dfwpatch: {} bytes written ({} triples), crc32 {:08x}",
                    stats.output_size, stats.apply.triples, stats.image_crc32
                );
            }
            0
        }
        Err(e) => {
            eprintln!("dfwpatch: apply failed: {e}");
            1
        }
    }
}

// ---------------------------------------------------------------------------
// diff
// ---------------------------------------------------------------------------

fn cmd_diff(args: &DiffArgs, cli: &Cli) -> i32 {
    if let Err(code) = check_output(&args.patch, cli.force) {
        return code;
    }
    let opts = CreateFileOptions {
        diff: DiffOptions {
            block_size: args.block_size,
            min_match: args.min_match,
        },
        xz: XzOptions {
            dict_size: args.dict_size,
            check: args.check.into(),
        },
        reserved: args.reserved,
        dfw_record: args.dfw_record,
    };

    match io::create_patch_file(&args.old, &args.new, &args.patch, opts) {
        Ok(stats) => {
            if cli.json_output {
                let json = serde_json::json!({
                    "old_size": stats.old_size,
                    "new_size": stats.new_size,
                    "payload_size": stats.payload_size,
                    "patch_size": stats.patch_size,
                    "triples": stats.triples,
                    "diff_bytes": stats.diff_bytes,
                    "extra_bytes": stats.extra_bytes,
                    "old_sha256": io::hex(&stats.old_sha256),
                    "new_sha256": io::hex(&stats.new_sha256),
                });
                eprintln!("{json:#}");
            } else if !cli.quiet {
                eprintln!(
                    "dfwpatch: {} -> {} bytes patch ({} triples)",
                    stats.new_size, stats.patch_size, stats.triples
                );
            }
            0
        }
        Err(e) => {
            eprintln!("dfwpatch: diff failed: {e}");
            1
        }
    }
}

// ---------------------------------------------------------------------------
// inspect
// ---------------------------------------------------------------------------

fn cmd_inspect(args: &InspectArgs, cli: &Cli) -> i32 {
    let patch = match std::fs::read(&args.patch) {
        Ok(bytes) => bytes,
        Err(e) => {
            eprintln!("dfwpatch: {}: {e}", args.patch.display());
            return 1;
        }
    };

    let mut command = None;
    let span = match args.reader.dfw_offset {
        Some(offset) => match PatchCommand::read_from(&mut patch.as_slice(), offset) {
            Ok(cmd) => {
                command = Some(cmd);
                cmd.payload_span(offset)
            }
            Err(e) => {
                eprintln!("dfwpatch: {e}");
                return 1;
            }
        },
        None => (0, patch.len() as u64),
    };

    let summary = PatchContext::new(args.reader.config())
        .and_then(|mut ctx| inspect_patch(&mut ctx, patch.as_slice(), span.0, span.1));
    let summary = match summary {
        Ok(summary) => summary,
        Err(e) => {
            eprintln!("dfwpatch: invalid patch: {e}");
            return 1;
        }
    };
    let header = summary.header;

    if cli.json_output {
        let json = serde_json::json!({
            "command": command.map(|c| c.to_string()),
            "ctrl_len": header.ctrl_len,
            "data_len": header.data_len,
            "new_size": header.new_size,
            "triples": summary.triples,
            "diff_bytes": summary.diff_bytes,
            "extra_bytes": summary.extra_bytes,
            "net_seek": summary.net_seek,
            "decoded_bytes": summary.decoded_bytes,
        });
        println!("{json:#}");
    } else {
        if let Some(cmd) = command {
            println!("{cmd}");
        }
        println!("{header}");
        println!("triples:       {}", summary.triples);
        println!("diff bytes:    {}", summary.diff_bytes);
        println!("extra bytes:   {}", summary.extra_bytes);
        println!("net seek:      {}", summary.net_seek);
        println!("decoded bytes: {}", summary.decoded_bytes);
    }
    0
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub fn run() -> ! {
    let cli = Cli::parse();

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(log_filter(&cli).as_str()),
    )
    .format_timestamp(None)
    .format_target(false)
    .init();

    let exit_code = match &cli.command {
        Cmd::Apply(args) => cmd_apply(args, &cli),
        Cmd::Diff(args) => cmd_diff(args, &cli),
        Cmd::Inspect(args) => cmd_inspect(args, &cli),
    };

    process::exit(exit_code);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
