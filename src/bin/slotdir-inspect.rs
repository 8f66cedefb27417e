//! Inspector for slot directory files.
#![forbid(unsafe_code)]

use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use slotdir::{
    admin::{open_cache, verify_back_reference, verify_chain, BackReferenceReport, ChainReport},
    primitives::pager::BufferCache,
    redo::RedoOptions,
    storage::{dir_page, heap, meta},
    types::{
        page::{PageHeader, PageKind},
        PageId,
    },
};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "slotdir-inspect",
    version,
    about = "Inspect slot directory pages and chain integrity",
    disable_help_subcommand = true
)]
struct Cli {
    #[command(flatten)]
    open: OpenArgs,

    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = OutputFormat::Text,
        help = "Output format for structured responses"
    )]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct OpenArgs {
    #[arg(long, global = true, help = "Page size in bytes")]
    page_size: Option<u32>,

    #[arg(long, global = true, help = "Reserved metadata page number")]
    meta_page: Option<u64>,

    #[arg(long, global = true, help = "Skip page checksum verification")]
    no_checksums: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(about = "Show the metadata page anchors")]
    Meta {
        #[arg(value_name = "DB")]
        db_path: PathBuf,
    },
    #[command(about = "Dump one page")]
    Page {
        #[arg(value_name = "DB")]
        db_path: PathBuf,
        #[arg(value_name = "PAGE")]
        page: u64,
    },
    #[command(about = "Walk the directory chain and check back-references")]
    Verify {
        #[arg(value_name = "DB")]
        db_path: PathBuf,
        #[arg(
            long = "data-page",
            value_name = "PAGE",
            help = "Data page whose back-reference should be checked (repeatable)"
        )]
        data_pages: Vec<u64>,
    },
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Serialize)]
struct MetaReport {
    meta_page: u64,
    lsn: u64,
    first_used: Option<u64>,
    last_used: Option<u64>,
}

#[derive(Serialize)]
struct EntryDump {
    offset: u16,
    len: usize,
    hex: String,
}

#[derive(Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum PageDump {
    Missing {
        page: u64,
    },
    New {
        page: u64,
    },
    Meta(MetaReport),
    Directory {
        page: u64,
        lsn: u64,
        prev: Option<u64>,
        next: Option<u64>,
        max_offset: u16,
        free_space: usize,
        entries: Vec<EntryDump>,
    },
    Data {
        page: u64,
        lsn: u64,
        dir_page: Option<u64>,
        offset: Option<u16>,
    },
}

#[derive(Serialize)]
struct VerifyOutput {
    chain: ChainReport,
    back_references: Vec<BackReferenceReport>,
    success: bool,
}

fn main() {
    init_tracing();
    if let Err(err) = run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let options = build_options(&cli.open);

    match cli.command {
        Command::Meta { db_path } => {
            let cache = open_cache(&db_path, &options)?;
            let report = read_meta(&cache, options.meta_page)?;
            emit(&cli.format, &report, || print_meta_text(&report))?;
        }
        Command::Page { db_path, page } => {
            let cache = open_cache(&db_path, &options)?;
            let dump = dump_page(&cache, PageId(page))?;
            emit(&cli.format, &dump, || print_page_text(&dump))?;
        }
        Command::Verify {
            db_path,
            data_pages,
        } => {
            let cache = open_cache(&db_path, &options)?;
            let chain = verify_chain(&cache, options.meta_page)?;
            let back_references = data_pages
                .into_iter()
                .map(|page| verify_back_reference(&cache, PageId(page)))
                .collect::<Result<Vec<_>, _>>()?;
            let success = chain.success && back_references.iter().all(|r| r.valid);
            let output = VerifyOutput {
                chain,
                back_references,
                success,
            };
            emit(&cli.format, &output, || print_verify_text(&output))?;
            if !output.success {
                std::process::exit(2);
            }
        }
    }
    Ok(())
}

fn build_options(args: &OpenArgs) -> RedoOptions {
    let mut options = RedoOptions::default().verify_checksums(!args.no_checksums);
    if let Some(page_size) = args.page_size {
        options = options.page_size(page_size);
    }
    if let Some(meta_page) = args.meta_page {
        options = options.meta_page(PageId(meta_page));
    }
    options
}

fn read_meta(cache: &Arc<BufferCache>, meta_page: PageId) -> Result<MetaReport, Box<dyn Error>> {
    let page = cache
        .read(meta_page)?
        .ok_or_else(|| format!("metadata page {meta_page} does not exist"))?;
    let state = meta::read(page.data())?;
    Ok(MetaReport {
        meta_page: meta_page.0,
        lsn: page.lsn().0,
        first_used: state.first_used.map(|p| p.0),
        last_used: state.last_used.map(|p| p.0),
    })
}

fn dump_page(cache: &Arc<BufferCache>, id: PageId) -> Result<PageDump, Box<dyn Error>> {
    let Some(page) = cache.read(id)? else {
        return Ok(PageDump::Missing { page: id.0 });
    };
    let data = page.data();
    if slotdir::types::page::is_new(data) {
        return Ok(PageDump::New { page: id.0 });
    }
    let header = PageHeader::decode(data)?;
    let dump = match header.kind {
        PageKind::Meta => {
            let state = meta::read(data)?;
            PageDump::Meta(MetaReport {
                meta_page: id.0,
                lsn: header.lsn.0,
                first_used: state.first_used.map(|p| p.0),
                last_used: state.last_used.map(|p| p.0),
            })
        }
        PageKind::Directory => {
            let trailer = dir_page::trailer(data)?;
            let entries = dir_page::entries(data)?
                .into_iter()
                .map(|(offset, bytes)| EntryDump {
                    offset: offset.0,
                    len: bytes.len(),
                    hex: hex::encode(bytes),
                })
                .collect();
            PageDump::Directory {
                page: id.0,
                lsn: header.lsn.0,
                prev: trailer.prev.map(|p| p.0),
                next: trailer.next.map(|p| p.0),
                max_offset: dir_page::max_offset(data)?,
                free_space: dir_page::free_space(data)?,
                entries,
            }
        }
        PageKind::Data => {
            let location = heap::back_reference(data)?;
            PageDump::Data {
                page: id.0,
                lsn: header.lsn.0,
                dir_page: location.map(|l| l.page.0),
                offset: location.map(|l| l.offset.0),
            }
        }
    };
    Ok(dump)
}

fn emit<T, F>(format: &OutputFormat, value: &T, printer: F) -> Result<(), Box<dyn Error>>
where
    T: Serialize,
    F: Fn(),
{
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{json}");
        }
        OutputFormat::Text => printer(),
    }
    Ok(())
}

fn fmt_page(page: Option<u64>) -> String {
    page.map(|p| p.to_string()).unwrap_or_else(|| "none".into())
}

fn print_field(name: &str, value: impl std::fmt::Display) {
    println!("  {:.<24} {}", name, value);
}

fn print_meta_text(report: &MetaReport) {
    println!("Metadata page {}:", report.meta_page);
    print_field("lsn", report.lsn);
    print_field("first_used", fmt_page(report.first_used));
    print_field("last_used", fmt_page(report.last_used));
}

fn print_page_text(dump: &PageDump) {
    match dump {
        PageDump::Missing { page } => println!("Page {page}: beyond end of file"),
        PageDump::New { page } => println!("Page {page}: never written"),
        PageDump::Meta(report) => print_meta_text(report),
        PageDump::Directory {
            page,
            lsn,
            prev,
            next,
            max_offset,
            free_space,
            entries,
        } => {
            println!("Directory page {page}:");
            print_field("lsn", lsn);
            print_field("prev", fmt_page(*prev));
            print_field("next", fmt_page(*next));
            print_field("max_offset", max_offset);
            print_field("free_space", free_space);
            for entry in entries {
                println!("  [{:>4}] {:>4} bytes  {}", entry.offset, entry.len, entry.hex);
            }
        }
        PageDump::Data {
            page,
            lsn,
            dir_page,
            offset,
        } => {
            println!("Data page {page}:");
            print_field("lsn", lsn);
            match (dir_page, offset) {
                (Some(dir), Some(off)) => print_field("back_reference", format!("{dir}/{off}")),
                _ => print_field("back_reference", "absent"),
            }
        }
    }
}

fn print_verify_text(output: &VerifyOutput) {
    let chain = &output.chain;
    println!(
        "Verify => success={} pages={} first_used={} last_used={}",
        output.success,
        chain.pages.len(),
        fmt_page(chain.first_used),
        fmt_page(chain.last_used)
    );
    for finding in &chain.findings {
        println!("- {:?}: {}", finding.severity, finding.message);
    }
    for report in &output.back_references {
        match &report.message {
            Some(message) => println!("- data page {}: {}", report.data_page, message),
            None => println!("- data page {}: ok", report.data_page),
        }
    }
}
