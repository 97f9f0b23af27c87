//! demuxfs: browse an ISDB-Tb transport stream as a filesystem tree.
//!
//! Reads a TS from a file, stdin or a UDP (multicast) socket, runs it
//! through the demultiplexer and prints the resulting table tree. A FUSE
//! adapter can mount the same tree; this front-end only projects it to the
//! terminal.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use log::info;

use demuxfs_core::fs::Dentry;
use demuxfs_core::{Demuxer, DentryKind};

mod input;
mod logging;

/// demuxfs - inspect ISDB-Tb PSI/SI tables as a filesystem tree
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Transport stream file to read ("-" for stdin)
    input: Option<PathBuf>,

    /// Receive the stream from a UDP address instead (e.g. 239.0.0.1:1234)
    #[arg(short, long, conflicts_with = "input")]
    udp: Option<SocketAddr>,

    /// Suppress the tree dump, print only statistics
    #[arg(short, long)]
    quiet: bool,

    /// Show file contents next to the leaves
    #[arg(short = 'c', long)]
    contents: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    logging::init_logging(args.verbose)
        .map_err(|e| anyhow::anyhow!("logging setup failed: {e}"))?;

    let mut demuxer = Demuxer::new();

    match (&args.input, args.udp) {
        (_, Some(addr)) => input::run_udp(addr, &mut demuxer).await?,
        (Some(path), None) => input::feed_file(path, &mut demuxer)?,
        (None, None) => anyhow::bail!("no input: pass a file path or --udp"),
    }

    let stats = demuxer.stats();
    info!(
        "{} packets, {} sections, {} tables installed, {} CRC/section errors, {} discontinuities",
        stats.packets, stats.sections, stats.tables_installed, stats.section_errors,
        stats.discontinuities
    );

    if !args.quiet {
        print_tree(&demuxer.root(), 0, args.contents);
    }
    Ok(())
}

/// Render a dentry subtree, one entry per line.
fn print_tree(dentry: &Arc<Dentry>, depth: usize, contents: bool) {
    for child in dentry.children() {
        let indent = "    ".repeat(depth);
        match child.kind() {
            DentryKind::Directory => {
                println!("{indent}{}/", child.name());
                print_tree(&child, depth + 1, contents);
            }
            DentryKind::Symlink => {
                println!(
                    "{indent}{} -> {}",
                    child.name(),
                    child.symlink_target().unwrap_or_default()
                );
            }
            DentryKind::File => {
                if contents {
                    println!("{indent}{} = {}", child.name(), preview(&child.content()));
                } else {
                    println!("{indent}{} ({} bytes)", child.name(), child.size());
                }
            }
        }
    }
}

/// Printable preview of a leaf's content.
fn preview(content: &[u8]) -> String {
    match std::str::from_utf8(content) {
        Ok(text) if text.chars().all(|c| !c.is_control()) && text.len() <= 64 => {
            text.to_string()
        }
        _ => format!("<{} binary bytes>", content.len()),
    }
}
