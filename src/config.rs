use clap::error::ErrorKind;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use csv::Writer;
use rand::distributions::Uniform;
use std::fmt;
use std::fs::{create_dir_all, File, OpenOptions};
use std::path::Path;
use std::process::exit;
use std::time::Duration;

pub struct Config {
    pub threads: usize,
    pub num_keys: usize,
    pub buckets: usize,
    pub key_range: u64,
    pub key_dist: Uniform<u64>,
    pub seed: Option<u64>,
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} threads, {} keys, {} buckets, key range [0, {})",
            self.threads, self.num_keys, self.buckets, self.key_range
        )
    }
}

pub struct Perf {
    pub total_keys: usize,
    pub found: usize,
    pub lost: u64,
    pub insert_time: Duration,
    pub get_time: Duration,
}

pub struct BenchWriter {
    output: Option<Writer<File>>,
}

impl BenchWriter {
    pub fn write_record(self, config: &Config, perf: &Perf) {
        if let Some(mut output) = self.output {
            output
                .write_record(&[
                    config.threads.to_string(),
                    config.num_keys.to_string(),
                    config.buckets.to_string(),
                    config.key_range.to_string(),
                    perf.lost.to_string(),
                    perf.found.to_string(),
                    perf.insert_time.as_secs_f64().to_string(),
                    perf.get_time.as_secs_f64().to_string(),
                ])
                .unwrap();
            output.flush().unwrap();
        }
    }
}

fn command() -> Command {
    Command::new("spin-bench")
        .about("Two-phase put/get throughput benchmark over a spin-locked hash table")
        .arg(
            Arg::new("threads")
                .value_name("NUM_THREADS")
                .required(true)
                .allow_hyphen_values(true)
                .help("Number of worker threads per phase"),
        )
        .arg(
            Arg::new("keys")
                .short('k')
                .long("keys")
                .value_parser(value_parser!(usize))
                .help("Number of keys inserted across all threads")
                .default_value("100000"),
        )
        .arg(
            Arg::new("buckets")
                .short('b')
                .long("buckets")
                .value_parser(value_parser!(u64).range(1..))
                .help("Number of buckets in the table")
                .default_value("5"),
        )
        .arg(
            Arg::new("range")
                .short('r')
                .long("range")
                .value_parser(value_parser!(u64).range(1..))
                .help("Keys are sampled uniformly from [0, RANGE)")
                .default_value("2147483648"),
        )
        .arg(
            Arg::new("seed")
                .long("seed")
                .value_parser(value_parser!(u64))
                .help("Seed the key generator for a reproducible key set"),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .help("Output CSV filename. Appends the data if the file already exists."),
        )
        .arg(
            Arg::new("dry run")
                .long("dry-run")
                .action(ArgAction::SetTrue)
                .help("Check whether the arguments are parsable, without running a benchmark"),
        )
}

pub fn setup() -> (Config, BenchWriter) {
    let m = match command().try_get_matches() {
        Ok(m) => m,
        Err(e) => match e.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => e.exit(),
            _ => {
                eprintln!("usage: spin-bench <num_threads> [options]");
                exit(1);
            }
        },
    };

    // The thread count is validated by hand so that zero, negative, and
    // non-numeric input all produce the same diagnostic and exit code.
    let threads = match m.get_one::<String>("threads").unwrap().parse::<i64>() {
        Ok(t) if t > 0 => t as usize,
        _ => {
            eprintln!("must enter a valid number of threads to run");
            exit(1);
        }
    };
    let num_keys = m.get_one::<usize>("keys").copied().unwrap();
    let buckets = m.get_one::<u64>("buckets").copied().unwrap() as usize;
    let key_range = m.get_one::<u64>("range").copied().unwrap();
    let seed = m.get_one::<u64>("seed").copied();

    let config = Config {
        threads,
        num_keys,
        buckets,
        key_range,
        key_dist: Uniform::from(0..key_range),
        seed,
    };
    let writer = bench_writer(&m);

    if m.get_flag("dry run") {
        exit(0);
    }

    (config, writer)
}

fn bench_writer(m: &ArgMatches) -> BenchWriter {
    let output = m.get_one::<String>("output").map(|output_name| {
        let output_path = Path::new(output_name);
        if let Some(dir) = output_path.parent().filter(|d| !d.as_os_str().is_empty()) {
            create_dir_all(dir).unwrap();
        }
        match OpenOptions::new().read(true).append(true).open(output_path) {
            Ok(f) => Writer::from_writer(f),
            Err(_) => {
                let f = OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create(true)
                    .open(output_path)
                    .unwrap();
                let mut output = Writer::from_writer(f);
                output
                    .write_record([
                        "threads",
                        "keys",
                        "buckets",
                        "key_range",
                        "lost",
                        "found",
                        "insert_time",
                        "get_time",
                    ])
                    .unwrap();
                output.flush().unwrap();
                output
            }
        }
    });
    BenchWriter { output }
}

#[cfg(test)]
mod tests {
    use super::command;

    #[test]
    fn parses_thread_count_and_options() {
        let m = command()
            .try_get_matches_from(["spin-bench", "4", "-k", "1000", "-b", "16", "--seed", "7"])
            .unwrap();
        assert_eq!(m.get_one::<String>("threads").unwrap(), "4");
        assert_eq!(m.get_one::<usize>("keys").copied(), Some(1000));
        assert_eq!(m.get_one::<u64>("buckets").copied(), Some(16));
        assert_eq!(m.get_one::<u64>("seed").copied(), Some(7));
    }

    #[test]
    fn missing_thread_count_is_rejected() {
        assert!(command().try_get_matches_from(["spin-bench"]).is_err());
    }

    #[test]
    fn extra_positionals_are_rejected() {
        assert!(command().try_get_matches_from(["spin-bench", "4", "5"]).is_err());
    }

    #[test]
    fn negative_thread_count_reaches_validation() {
        // "-3" must parse as the positional, not an unknown flag, so the
        // hand validation can reject it with the right message.
        let m = command().try_get_matches_from(["spin-bench", "-3"]).unwrap();
        assert_eq!(m.get_one::<String>("threads").unwrap(), "-3");
    }

    #[test]
    fn zero_buckets_is_rejected() {
        assert!(command()
            .try_get_matches_from(["spin-bench", "4", "-b", "0"])
            .is_err());
    }
}
