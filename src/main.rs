use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};

use zipstore::{record, BssStore, Error, Result, StoreConfig};

#[derive(Parser, Debug)]
#[command(name = "zipstore", version, about = "Blocked sequence set store for zip code records")]
struct Cli {
    /// Open a data file even if its stale flag is set
    #[arg(global = true, long)]
    force: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Build a fresh store from a CSV file
    Create {
        csv_file: PathBuf,
        data_file: PathBuf,
        index_file: PathBuf,
        /// Block size in bytes
        #[arg(long, default_value_t = 512)]
        block_size: usize,
    },

    /// Look up a record by zip code
    Search {
        data_file: PathBuf,
        index_file: PathBuf,
        /// Zip code to search for
        #[arg(short = 'Z')]
        zip: String,
    },

    /// Insert the records listed in a CSV file
    Insert {
        data_file: PathBuf,
        index_file: PathBuf,
        record_file: PathBuf,
    },

    /// Delete the zip codes listed in a text file, one per line
    Delete {
        data_file: PathBuf,
        index_file: PathBuf,
        zip_file: PathBuf,
    },

    /// Write a structure dump to stdout and dump_<kind>.txt
    Dump {
        data_file: PathBuf,
        index_file: PathBuf,
        #[arg(value_enum, default_value_t = DumpKind::Physical)]
        kind: DumpKind,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum DumpKind {
    Physical,
    Logical,
    Index,
}

impl DumpKind {
    fn as_str(&self) -> &'static str {
        match self {
            DumpKind::Physical => "physical",
            DumpKind::Logical => "logical",
            DumpKind::Index => "index",
        }
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::from(1)
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Command::Create {
            csv_file,
            data_file,
            index_file,
            block_size,
        } => {
            let config = StoreConfig::default().block_size(block_size);
            let mut store = BssStore::create(&data_file, &index_file, &config)?;
            let reader =
                BufReader::new(File::open(&csv_file).map_err(|e| Error::Io("open csv", e))?);
            let count = store.bulk_load_csv(reader)?;
            println!("Loaded {count} records into {}", data_file.display());
            Ok(ExitCode::SUCCESS)
        }

        Command::Search {
            data_file,
            index_file,
            zip,
        } => {
            let mut store = BssStore::open(&data_file, &index_file, cli.force)?;
            match store.search(&zip)? {
                Some(record) => {
                    println!("Zip Code: {}", record.zip);
                    println!("City: {}", record.city);
                    println!("State: {}", record.state);
                    println!("County: {}", record.county);
                    println!("Latitude: {}", record.latitude);
                    println!("Longitude: {}", record.longitude);
                    Ok(ExitCode::SUCCESS)
                }
                None => {
                    println!("Zip code {zip} not found.");
                    Ok(ExitCode::from(1))
                }
            }
        }

        Command::Insert {
            data_file,
            index_file,
            record_file,
        } => {
            let mut store = BssStore::open(&data_file, &index_file, cli.force)?;
            let reader =
                BufReader::new(File::open(&record_file).map_err(|e| Error::Io("open records", e))?);
            let mut count = 0;
            for record in record::read_csv(reader)? {
                let zip = record.zip.clone();
                match store.insert(record) {
                    Ok(()) => {
                        println!("Inserted: {zip}");
                        count += 1;
                    }
                    Err(err) => eprintln!("Failed to insert {zip}: {err}"),
                }
            }
            println!("Inserted {count} records.");
            Ok(ExitCode::SUCCESS)
        }

        Command::Delete {
            data_file,
            index_file,
            zip_file,
        } => {
            let mut store = BssStore::open(&data_file, &index_file, cli.force)?;
            let reader =
                BufReader::new(File::open(&zip_file).map_err(|e| Error::Io("open zip list", e))?);
            let mut count = 0;
            for line in reader.lines() {
                let line = line.map_err(|e| Error::Io("read zip list", e))?;
                let zip = line.trim();
                if zip.is_empty() {
                    continue;
                }
                match store.remove(zip) {
                    Ok(()) => {
                        println!("Deleted: {zip}");
                        count += 1;
                    }
                    Err(err) => eprintln!("Failed to delete {zip}: {err}"),
                }
            }
            println!("Deleted {count} records.");
            Ok(ExitCode::SUCCESS)
        }

        Command::Dump {
            data_file,
            index_file,
            kind,
        } => {
            let mut store = BssStore::open(&data_file, &index_file, cli.force)?;
            let mut buf = Vec::new();
            match kind {
                DumpKind::Physical => store.dump_physical(&mut buf)?,
                DumpKind::Logical => store.dump_logical(&mut buf)?,
                DumpKind::Index => store.dump_index(&mut buf)?,
            }

            std::io::stdout()
                .write_all(&buf)
                .map_err(|e| Error::Io("write dump", e))?;
            let out_file = format!("dump_{}.txt", kind.as_str());
            std::fs::write(&out_file, &buf).map_err(|e| Error::Io("write dump file", e))?;
            Ok(ExitCode::SUCCESS)
        }
    }
}
