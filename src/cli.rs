// Idiomatic Rust CLI for Oxichm.
//
// Subcommands: `list` (entry names), `extract` (one entry to a file or
// stdout), `info` (container headers and compression parameters). Every
// subcommand supports `--json`.

use std::io::Write;
use std::path::PathBuf;
use std::process;

use clap::{ArgAction, Args, Parser, Subcommand, ValueHint};

use crate::error::Result;
use crate::io;

// ---------------------------------------------------------------------------
// Clap CLI definition
// ---------------------------------------------------------------------------

/// CHM (Compiled HTML Help) lister and extractor.
#[derive(Parser, Debug)]
#[command(
    name = "oxichm",
    version,
    about = "CHM container lister/extractor",
    arg_required_else_help = true
)]
struct Cli {
    #[command(subcommand)]
    command: Cmd,

    /// Quiet mode (suppress non-error output).
    #[arg(short = 'q', long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Verbose mode (use multiple times for more detail).
    #[arg(short = 'v', long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Output as JSON.
    #[arg(long = "json", global = true)]
    json: bool,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// List entry names in on-disk order.
    List(ListArgs),
    /// Extract one entry to a file or stdout.
    Extract(ExtractArgs),
    /// Print container headers and compression parameters.
    Info(InfoArgs),
}

#[derive(Args, Debug)]
struct ListArgs {
    /// CHM input file.
    #[arg(value_hint = ValueHint::FilePath)]
    file: PathBuf,

    /// Only list entries an HTML parser would consume.
    #[arg(long)]
    html: bool,
}

#[derive(Args, Debug)]
struct ExtractArgs {
    /// CHM input file.
    #[arg(value_hint = ValueHint::FilePath)]
    file: PathBuf,

    /// Entry name, e.g. `/index.html`.
    entry: String,

    /// Output file (default: stdout).
    #[arg(short = 'o', long, value_hint = ValueHint::FilePath)]
    output: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct InfoArgs {
    /// CHM input file.
    #[arg(value_hint = ValueHint::FilePath)]
    file: PathBuf,
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

fn cmd_list(args: &ListArgs, json: bool) -> Result<()> {
    let chm = io::open_file(&args.file)?;
    let entries: Vec<_> = chm
        .entries()
        .iter()
        .filter(|e| !args.html || e.is_html())
        .collect();

    if json {
        let items: Vec<serde_json::Value> = entries
            .iter()
            .map(|e| {
                serde_json::json!({
                    "name": e.name,
                    "length": e.length,
                    "compressed": e.kind == crate::EntryKind::Compressed,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&items).unwrap());
    } else {
        for entry in entries {
            println!("{}", entry.name);
        }
    }
    Ok(())
}

fn cmd_extract(args: &ExtractArgs, quiet: bool) -> Result<()> {
    let content = io::extract_entry(&args.file, &args.entry)?;
    match &args.output {
        Some(path) => {
            std::fs::write(path, &content)?;
            if !quiet {
                eprintln!(
                    "oxichm: wrote {} bytes to {}",
                    content.len(),
                    path.display()
                );
            }
        }
        None => {
            std::io::stdout().write_all(&content)?;
        }
    }
    Ok(())
}

fn cmd_info(args: &InfoArgs, json: bool) -> Result<()> {
    let chm = io::open_file(&args.file)?;
    let itsf = chm.itsf();
    let itsp = chm.itsp();

    if json {
        let mut value = serde_json::json!({
            "version": itsf.version,
            "lang_id": itsf.lang_id,
            "dir_offset": itsf.dir_offset,
            "dir_len": itsf.dir_len,
            "data_offset": itsf.data_offset,
            "chunk_size": itsp.chunk_size,
            "num_chunks": itsp.num_chunks,
            "entries": chm.entries().len(),
        });
        if let (Some(cd), Some(rt)) = (chm.control_data(), chm.reset_table()) {
            value["lzx"] = serde_json::json!({
                "window_size": cd.window_size,
                "reset_frame_interval": cd.reset_frame_interval,
                "frames": rt.block_count,
                "compressed_len": rt.compressed_len,
                "uncompressed_len": rt.uncompressed_len,
            });
        }
        println!("{}", serde_json::to_string_pretty(&value).unwrap());
    } else {
        println!("ITSF version:     {}", itsf.version);
        println!("language id:      {:#06X}", itsf.lang_id);
        println!("directory:        {:#X}+{:#X}", itsf.dir_offset, itsf.dir_len);
        println!("data offset:      {:#X}", itsf.data_offset);
        println!("directory chunks: {} x {:#X} bytes", itsp.num_chunks, itsp.chunk_size);
        println!("entries:          {}", chm.entries().len());
        if let (Some(cd), Some(rt)) = (chm.control_data(), chm.reset_table()) {
            println!("LZX window:       {:#X}", cd.window_size);
            println!("reset interval:   {} frame(s)", cd.reset_frame_interval);
            println!(
                "content stream:   {} frame(s), {} -> {} bytes",
                rt.block_count, rt.uncompressed_len, rt.compressed_len
            );
        } else {
            println!("content stream:   none (no compressed section)");
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Main CLI entry point. Parses arguments via clap, dispatches commands.
pub fn run() -> ! {
    let cli = Cli::parse();

    let default_level = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        (false, _) => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp(None)
        .format_target(false)
        .init();

    let result = match &cli.command {
        Cmd::List(args) => cmd_list(args, cli.json),
        Cmd::Extract(args) => cmd_extract(args, cli.quiet),
        Cmd::Info(args) => cmd_info(args, cli.json),
    };

    if let Err(err) = result {
        eprintln!("oxichm: {err}");
        process::exit(1);
    }
    process::exit(0);
}
