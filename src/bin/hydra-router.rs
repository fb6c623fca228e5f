use std::path::PathBuf;
use std::time::Instant;
use std::{env, process};

use hydra_router::{route_discordant_mappings, ClassifierOptions, MappingUsage, PairOrientation, RouterParams, StoreParams};
use hydra_router::utils;

use getopts::Options;
use log::info;

//-----------------------------------------------------------------------------

fn main() -> Result<(), String> {
    let start_time = Instant::now();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::new();

    // Route the mappings and write the manifest.
    let summary = route_discordant_mappings(&config.config_file, &config.manifest_file, &config.params)
        .map_err(|x| x.to_string())?;

    let total = summary.total();
    info!("{}", total);
    if config.params.progress {
        info!(
            "Peak memory usage for buffers: {} ({} flush cycles)",
            utils::human_readable_size(summary.store.peak_buffered_bytes), summary.store.flush_cycles
        );
    }

    let end_time = Instant::now();
    let seconds = end_time.duration_since(start_time).as_secs_f64();
    info!("Used {:.3} seconds", seconds);

    Ok(())
}

//-----------------------------------------------------------------------------

struct Config {
    config_file: PathBuf,
    manifest_file: PathBuf,
    params: RouterParams,
}

impl Config {
    fn new() -> Config {
        let args: Vec<String> = env::args().collect();
        let program = args[0].clone();
        let header = format!("Usage: {} -config FILE -routedList FILE [options]", program);

        let mut opts = Options::new();
        opts.long_only(true);
        opts.optflag("h", "help", "print this help");
        opts.optopt("", "config", "configuration file listing the samples (required)", "FILE");
        opts.optopt("", "routedList", "output manifest of bucket files (required)", "FILE");
        opts.optflag("", "useMappings", "use the number of mappings given in the input as support");
        opts.optopt(
            "",
            "memory",
            &format!("memory budget for buffered records in GiB (default: {})", StoreParams::DEFAULT_MEMORY_BUDGET / utils::GIB),
            "FLOAT",
        );
        opts.optopt(
            "",
            "minSupport",
            &format!("minimum support for a discordant pair; a uniquely mapped pair has support 1 (default: {})", ClassifierOptions::DEFAULT_MIN_SUPPORT),
            "INT",
        );
        opts.optopt(
            "",
            "editBeyondBest",
            &format!("edit distance beyond the best alignment allowed for support (default: {})", ClassifierOptions::DEFAULT_EDIT_BEYOND_BEST),
            "INT",
        );
        opts.optflag("", "ignoreSize", "route all supported pairs regardless of insert size");
        opts.optflag("", "flagShortInserts", "also route pairs with inserts shorter than expected");
        opts.optflag("", "lumpInversions", "route +- and -+ pairs of a chromosome pair to the same bucket");
        opts.optopt("", "orientation", "expected orientation of concordant pairs: 'unchecked' (default), 'fr', or 'ss'", "STR");
        opts.optopt("", "threads", &format!("number of worker threads (default: {})", RouterParams::DEFAULT_THREADS), "INT");
        opts.optopt("", "outputDir", "directory for bucket files (default: manifest directory)", "DIR");
        opts.optopt("", "prefix", "prefix for bucket file names (default: manifest name)", "STR");
        opts.optopt("", "maxSkipFraction", "fail if a sample has a larger fraction of malformed records", "FLOAT");
        opts.optflag("", "progress", "log progress information");

        let matches = match opts.parse(&args[1..]) {
            Ok(m) => m,
            Err(f) => {
                eprintln!("{}\n", f);
                eprint!("{}", opts.usage(&header));
                process::exit(1);
            }
        };

        if matches.opt_present("h") {
            eprint!("{}", opts.usage(&header));
            process::exit(1);
        }
        if !matches.free.is_empty() {
            eprintln!("Error: Unexpected arguments: {}\n", matches.free.join(" "));
            eprint!("{}", opts.usage(&header));
            process::exit(1);
        }

        let (config_file, manifest_file) = match (matches.opt_str("config"), matches.opt_str("routedList")) {
            (Some(config), Some(manifest)) => (PathBuf::from(config), PathBuf::from(manifest)),
            _ => {
                eprintln!("Error: Both -config and -routedList are required\n");
                eprint!("{}", opts.usage(&header));
                process::exit(1);
            }
        };

        let mut params = RouterParams::for_manifest(&manifest_file);
        if let Some(dir) = matches.opt_str("outputDir") {
            params.store.output_dir = PathBuf::from(dir);
        }
        if let Some(prefix) = matches.opt_str("prefix") {
            params.store.prefix = prefix;
        }

        if let Some(s) = matches.opt_str("memory") {
            let gib = parse_or_exit::<f64>(&s, "memory");
            if !(gib > 0.0) {
                eprintln!("Error: -memory must be positive");
                process::exit(1);
            }
            params.store.memory_budget = (gib * utils::GIB as f64) as u64;
        }
        if let Some(s) = matches.opt_str("minSupport") {
            params.classifier.min_support = parse_or_exit(&s, "minSupport");
        }
        if let Some(s) = matches.opt_str("editBeyondBest") {
            params.classifier.edit_beyond_best = parse_or_exit(&s, "editBeyondBest");
        }
        if matches.opt_present("useMappings") {
            params.classifier.mapping_usage = MappingUsage::Given;
        }
        params.classifier.ignore_size = matches.opt_present("ignoreSize");
        params.classifier.flag_short_inserts = matches.opt_present("flagShortInserts");
        if let Some(s) = matches.opt_str("orientation") {
            params.classifier.orientation = match s.parse::<PairOrientation>() {
                Ok(orientation) => orientation,
                Err(e) => {
                    eprintln!("Error: {}", e);
                    process::exit(1);
                }
            };
        }
        params.lump_inversions = matches.opt_present("lumpInversions");

        if let Some(s) = matches.opt_str("threads") {
            params.threads = parse_or_exit(&s, "threads");
            if params.threads < 1 {
                eprintln!("Error: -threads must be positive");
                process::exit(1);
            }
        }
        if let Some(s) = matches.opt_str("maxSkipFraction") {
            let fraction = parse_or_exit::<f64>(&s, "maxSkipFraction");
            if !(0.0..=1.0).contains(&fraction) {
                eprintln!("Error: -maxSkipFraction must be between 0 and 1");
                process::exit(1);
            }
            params.max_skip_fraction = Some(fraction);
        }
        params.progress = matches.opt_present("progress");

        Config {
            config_file,
            manifest_file,
            params,
        }
    }
}

fn parse_or_exit<T: std::str::FromStr>(value: &str, option: &str) -> T
where
    T::Err: std::fmt::Display,
{
    match value.parse::<T>() {
        Ok(x) => x,
        Err(e) => {
            eprintln!("Error: Failed to parse -{}: {}", option, e);
            process::exit(1);
        }
    }
}

//-----------------------------------------------------------------------------
