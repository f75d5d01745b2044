use facet::Facet;
use figue as args;
use goroscope::{Dump, SearchPage, write_entry};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::Path;
use std::rc::Rc;
use tracing::info;

const DEFAULT_LIMIT: usize = 10;
const PAGE_SIZE_ENV: &str = "GOROSCOPE_PAGE_SIZE";

#[derive(Facet, Debug)]
struct Cli {
    #[facet(flatten)]
    builtins: args::FigueBuiltins,
    #[facet(args::subcommand)]
    command: Command,
}

#[derive(Facet, Debug)]
#[repr(u8)]
enum Command {
    Summary {
        #[facet(args::named)]
        dump: String,
        #[facet(args::named, default)]
        json: bool,
    },
    Show {
        #[facet(args::named)]
        dump: String,
        #[facet(args::named, default)]
        offset: Option<usize>,
        #[facet(args::named, default)]
        limit: Option<usize>,
    },
    Search {
        #[facet(args::named)]
        dump: String,
        #[facet(args::named)]
        cond: String,
        #[facet(args::named, default)]
        offset: Option<usize>,
        #[facet(args::named, default)]
        limit: Option<usize>,
    },
    Filter {
        #[facet(args::named)]
        dump: String,
        #[facet(args::named)]
        cond: String,
        #[facet(args::named, default)]
        invert: bool,
        #[facet(args::named)]
        out: String,
    },
    Dedup {
        #[facet(args::named)]
        dump: String,
        #[facet(args::named, default)]
        out: Option<String>,
        #[facet(args::named, default)]
        json: bool,
    },
    Diff {
        #[facet(args::named)]
        left: String,
        #[facet(args::named)]
        right: String,
        #[facet(args::named, default)]
        json: bool,
    },
    Deadlocks {
        #[facet(args::named)]
        dump: String,
        #[facet(args::named, default)]
        json: bool,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    if let Err(err) = run() {
        eprintln!("{err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let figue_config = args::builder::<Cli>()
        .map_err(|e| format!("failed to build CLI schema: {e}"))?
        .cli(|cli| cli.strict())
        .help(|h| {
            h.program_name("goroscope")
                .description("Inspect, filter, dedup and diff goroutine dumps")
                .version(option_env!("CARGO_PKG_VERSION").unwrap_or("dev"))
        })
        .build();
    let cli = args::Driver::new(figue_config)
        .run()
        .into_result()
        .map_err(|e| e.to_string())?;

    match cli.value.command {
        Command::Summary { dump, json } => run_summary(&dump, json),
        Command::Show {
            dump,
            offset,
            limit,
        } => run_show(&dump, offset, limit),
        Command::Search {
            dump,
            cond,
            offset,
            limit,
        } => run_search(&dump, &cond, offset, limit),
        Command::Filter {
            dump,
            cond,
            invert,
            out,
        } => run_filter(&dump, &cond, invert, &out),
        Command::Dedup { dump, out, json } => run_dedup(&dump, out.as_deref(), json),
        Command::Diff { left, right, json } => run_diff(&left, &right, json),
        Command::Deadlocks { dump, json } => run_deadlocks(&dump, json),
    }
}

fn run_summary(path: &str, json: bool) -> Result<(), String> {
    let summary = load(path)?.summary();
    if json {
        print_json(&summary)
    } else {
        print!("{summary}");
        Ok(())
    }
}

fn run_show(path: &str, offset: Option<usize>, limit: Option<usize>) -> Result<(), String> {
    let dump = load(path)?;
    let (offset, limit) = page(offset, limit);
    print_entries(dump.show(offset, limit))
}

fn run_search(
    path: &str,
    cond: &str,
    offset: Option<usize>,
    limit: Option<usize>,
) -> Result<(), String> {
    let dump = load(path)?;
    let (offset, limit) = page(offset, limit);
    let SearchPage { matched, entries } = dump
        .search(cond, offset, limit)
        .map_err(|e| format!("invalid condition: {e}"))?;
    println!("Search with offset {offset} and limit {limit}: {matched} matches.\n");
    print_entries(&entries)
}

fn run_filter(path: &str, cond: &str, invert: bool, out: &str) -> Result<(), String> {
    let mut dump = load(path)?;
    let report = if invert {
        dump.delete(cond)
    } else {
        dump.keep(cond)
    }
    .map_err(|e| format!("invalid condition: {e}"))?;
    println!(
        "Deleted {} goroutines, kept {}.",
        report.deleted, report.kept
    );
    save(&dump, out)
}

fn run_dedup(path: &str, out: Option<&str>, json: bool) -> Result<(), String> {
    let mut dump = load(path)?;
    let report = dump.dedup();
    if json {
        print_json(&report)?;
    } else {
        println!("Dedupped {}, kept {}.", report.total_before, report.kept);
    }
    match out {
        Some(out) => save(&dump, out),
        None => Ok(()),
    }
}

fn run_diff(left: &str, right: &str, json: bool) -> Result<(), String> {
    let diff = load(left)?.diff(&load(right)?);
    let report = diff.report();
    if json {
        return print_json(&report);
    }
    for (label, ids) in [
        ("left only", &report.left_only),
        ("common", &report.common),
        ("right only", &report.right_only),
    ] {
        println!("{label:>10}: {} {ids:?}", ids.len());
    }
    Ok(())
}

fn run_deadlocks(path: &str, json: bool) -> Result<(), String> {
    let suspects = load(path)?.deadlock_suspects();
    if json {
        return print_json(&suspects);
    }
    if suspects.is_empty() {
        println!("No lock-order inversions found.");
    }
    for suspect in &suspects {
        println!(
            "goroutine {} and goroutine {} take shared locks in opposite order",
            suspect.first, suspect.second
        );
    }
    Ok(())
}

fn load(path: &str) -> Result<Dump, String> {
    let path = path.trim_matches('"');
    let file = File::open(path).map_err(|e| format!("open {path}: {e}"))?;
    let dump = goroscope::parse_reader(BufReader::new(file))
        .map_err(|e| format!("load {path}: {e}"))?;
    info!(path, entries = dump.len(), "loaded dump");
    Ok(dump)
}

fn save(dump: &Dump, path: &str) -> Result<(), String> {
    let path = Path::new(path.trim_matches('"'));
    let file = File::create(path).map_err(|e| format!("create {}: {e}", path.display()))?;
    dump.save_to(BufWriter::new(file))
        .map_err(|e| format!("write {}: {e}", path.display()))?;
    info!(path = %path.display(), entries = dump.len(), "saved dump");
    Ok(())
}

fn page(offset: Option<usize>, limit: Option<usize>) -> (usize, usize) {
    let default_limit = std::env::var(PAGE_SIZE_ENV)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_LIMIT);
    (offset.unwrap_or(0), limit.unwrap_or(default_limit))
}

fn print_entries(entries: &[Rc<goroscope::Entry>]) -> Result<(), String> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    for entry in entries {
        write_entry(&mut out, entry).map_err(|e| format!("write stdout: {e}"))?;
    }
    out.flush().map_err(|e| format!("flush stdout: {e}"))
}

fn print_json<'a, T: Facet<'a>>(value: &T) -> Result<(), String> {
    let json = facet_json::to_string_pretty(value).map_err(|e| format!("encode report: {e}"))?;
    println!("{json}");
    Ok(())
}
