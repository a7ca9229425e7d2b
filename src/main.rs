use std::io::{self, Write};
use std::time::Instant;

use histree::{HistoryTree, Interval, StateValue, TreeConfig};

type CliResult = Result<(), Box<dyn std::error::Error>>;

/// Print a usage message
fn print_usage() {
    println!("histree - disk-backed State History Tree");
    println!("Usage:");
    println!("  histree [OPTIONS] COMMAND [ARGS]");
    println!();
    println!("Options:");
    println!("  --path PATH          History file path (default: ./state_history.ht)");
    println!("  --block-size N       Node block size in KB, for demo (default: 64)");
    println!("  --max-children N     Children per core node, for demo (default: 50)");
    println!("  --cache-size N       Node cache slots, power of two (default: 256)");
    println!("  --help               Show this help message");
    println!();
    println!("Commands:");
    println!("  info                         Show tree metadata");
    println!("  query TIME [ATTRIBUTE]       Show the state at TIME (all attributes by default)");
    println!("  range START END [ATTRIBUTE]  List intervals overlapping [START, END]");
    println!("  dump [--verbose]             Print every node");
    println!("  check                        Verify the tree structure");
    println!("  demo [COUNT]                 Build a synthetic tree of COUNT intervals");
    println!("  version                      Show version information");
}

/// Parse command line arguments
fn parse_args() -> Result<(TreeConfig, String, Vec<String>), String> {
    let mut args = std::env::args().skip(1).collect::<Vec<_>>();

    if args.is_empty() || args.contains(&"--help".to_string()) {
        print_usage();
        std::process::exit(0);
    }

    let mut config = TreeConfig::default();

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--path" => {
                let value = option_value(&args, i)?;
                config.path = value.into();
                args.drain(i..i + 2);
            }
            "--block-size" => {
                let kb: usize = option_value(&args, i)?
                    .parse()
                    .map_err(|_| "Invalid block size".to_string())?;
                config.block_size = kb * 1024;
                args.drain(i..i + 2);
            }
            "--max-children" => {
                config.max_children = option_value(&args, i)?
                    .parse()
                    .map_err(|_| "Invalid max children".to_string())?;
                args.drain(i..i + 2);
            }
            "--cache-size" => {
                config.cache_size = option_value(&args, i)?
                    .parse()
                    .map_err(|_| "Invalid cache size".to_string())?;
                args.drain(i..i + 2);
            }
            _ => {
                i += 1;
            }
        }
    }

    if args.is_empty() {
        return Err("Missing command".to_string());
    }

    let command = args[0].clone();
    let command_args = args.into_iter().skip(1).collect();

    Ok((config, command, command_args))
}

fn option_value(args: &[String], i: usize) -> Result<String, String> {
    args.get(i + 1)
        .cloned()
        .ok_or_else(|| format!("Missing value for {}", args[i]))
}

fn parse_arg<T: std::str::FromStr>(args: &[String], i: usize, name: &str) -> Result<T, String> {
    let raw = args.get(i).ok_or_else(|| format!("Missing {} argument", name))?;
    raw.parse().map_err(|_| format!("Invalid {}: {}", name, raw))
}

fn print_interval(interval: &Interval) {
    println!(
        "  attribute {:>6}  [{}, {}]  {}",
        interval.attribute(),
        interval.start(),
        interval.end(),
        interval.value()
    );
}

/// Handle info command
fn handle_info(tree: &HistoryTree, _args: &[String]) -> CliResult {
    let config = tree.config();
    println!("File:            {}", config.path.display());
    println!("Time range:      [{}, {}]", tree.tree_start(), tree.tree_end());
    println!("Nodes:           {}", tree.node_count());
    println!("Depth:           {}", tree.depth());
    println!("Block size:      {} bytes", config.block_size);
    println!("Max children:    {}", config.max_children);
    println!("Provider:        v{}", config.provider_version);
    println!("File size:       {} bytes", tree.file_size()?);
    let trailer = tree.read_trailer()?;
    if !trailer.is_empty() {
        println!("Trailer:         {} bytes at offset {}", trailer.len(), tree.trailer_offset());
    }
    Ok(())
}

/// Handle query command
fn handle_query(tree: &HistoryTree, args: &[String]) -> CliResult {
    let t: i64 = parse_arg(args, 0, "time")?;

    if args.len() > 1 {
        let attribute: i32 = parse_arg(args, 1, "attribute")?;
        match tree.query_at(t, attribute)? {
            Some(interval) => print_interval(&interval),
            None => println!("No state for attribute {} at {}", attribute, t),
        }
        return Ok(());
    }

    let state = tree.query_full(t)?;
    println!("State at {}: {} attributes", t, state.len());
    for interval in &state {
        print_interval(interval);
    }
    Ok(())
}

/// Handle range command
fn handle_range(tree: &HistoryTree, args: &[String]) -> CliResult {
    let start: i64 = parse_arg(args, 0, "start time")?;
    let end: i64 = parse_arg(args, 1, "end time")?;
    let query = if args.len() > 2 {
        tree.query_range(start, end, parse_arg(args, 2, "attribute")?)?
    } else {
        tree.query_range_all(start, end)?
    };

    let intervals = query.sorted()?;
    for interval in &intervals {
        print_interval(interval);
    }
    println!("Total: {} intervals", intervals.len());
    Ok(())
}

/// Handle dump command
fn handle_dump(tree: &HistoryTree, args: &[String]) -> CliResult {
    let verbose = args.iter().any(|arg| arg == "--verbose" || arg == "-v");
    let stdout = io::stdout();
    let mut out = stdout.lock();
    tree.dump(&mut out, verbose)?;
    out.flush()?;
    Ok(())
}

/// Handle check command
fn handle_check(tree: &HistoryTree, _args: &[String]) -> CliResult {
    let start = Instant::now();
    let report = tree.check_integrity()?;
    println!(
        "OK: {} nodes, {} intervals, depth {} ({:?})",
        report.nodes,
        report.intervals,
        report.depth,
        start.elapsed()
    );
    Ok(())
}

/// Handle demo command
///
/// Simulates a small system where attribute `a` changes every `a + 1` ticks,
/// with every fourth attribute holding strings.
fn handle_demo(config: TreeConfig, args: &[String]) -> CliResult {
    const ATTRIBUTES: i64 = 32;
    let count: u64 = if args.is_empty() {
        100_000
    } else {
        parse_arg(args, 0, "count")?
    };

    println!("Building {} intervals into {}...", count, config.path.display());
    let start = Instant::now();
    let mut tree = HistoryTree::create(config)?;

    // Next change time of each attribute; the earliest one closes first
    let mut next_change: Vec<(i64, i64)> = (0..ATTRIBUTES).map(|a| (0, a)).collect();
    for i in 0..count {
        let (idx, &(begin, attribute)) = next_change
            .iter()
            .enumerate()
            .min_by_key(|(_, (begin, attribute))| (begin + attribute, *attribute))
            .ok_or("no attributes")?;
        let end = begin + attribute;
        let value = if attribute % 4 == 0 {
            StateValue::from(format!("state-{}", i % 7))
        } else if i % 11 == 0 {
            StateValue::Null
        } else {
            StateValue::Long(i as i64)
        };
        tree.insert_interval(begin, end, attribute as i32, value)?;
        next_change[idx] = (end + 1, attribute);

        if (i + 1) % 10_000 == 0 {
            print!("\r{}/{} intervals inserted", i + 1, count);
            io::stdout().flush()?;
        }
    }
    let end = tree.tree_end();
    tree.close_tree(end)?;
    let duration = start.elapsed();

    println!(
        "\nInserted {} intervals in {:?} ({:.2} intervals/sec)",
        count,
        duration,
        count as f64 / duration.as_secs_f64()
    );
    println!(
        "Tree: {} nodes, depth {}, [{}, {}], {} bytes",
        tree.node_count(),
        tree.depth(),
        tree.tree_start(),
        tree.tree_end(),
        tree.file_size()?
    );
    Ok(())
}

/// Handle version command
fn handle_version() -> CliResult {
    println!("histree v{}", env!("CARGO_PKG_VERSION"));
    println!("Disk-backed State History Tree");
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let (config, command, args) = match parse_args() {
        Ok(result) => result,
        Err(err) => {
            eprintln!("Error: {}", err);
            print_usage();
            std::process::exit(1);
        }
    };

    let result = match command.as_str() {
        "demo" => handle_demo(config, &args),
        "version" => handle_version(),
        "info" | "query" | "range" | "dump" | "check" => {
            HistoryTree::open(config).map_err(Into::into).and_then(|tree| match command.as_str() {
                "info" => handle_info(&tree, &args),
                "query" => handle_query(&tree, &args),
                "range" => handle_range(&tree, &args),
                "dump" => handle_dump(&tree, &args),
                _ => handle_check(&tree, &args),
            })
        }
        _ => {
            eprintln!("Unknown command: {}", command);
            print_usage();
            std::process::exit(1);
        }
    };

    if let Err(err) = result {
        eprintln!("Error: {}", err);
        std::process::exit(1);
    }

    Ok(())
}
