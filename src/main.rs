use anyhow::Context;
use songnote::config::{self, Config};
use songnote::history::HistoryStore;
use songnote::poll::{CycleOutcome, PollLoop};
use songnote::source::JsonFileSource;
use std::io::Read;
use std::path::PathBuf;

#[derive(Debug, Default, PartialEq, Eq)]
enum Command {
    #[default]
    Help,
    Merge {
        file: Option<PathBuf>,
    },
    Poll {
        once: bool,
        source: Option<PathBuf>,
        interval_hours: Option<String>,
    },
    Show {
        user: Option<String>,
    },
}

#[derive(Debug, Default, PartialEq, Eq)]
struct CliArgs {
    data_dir: Option<PathBuf>,
    command: Command,
}

fn main() -> anyhow::Result<()> {
    let args = parse_args(std::env::args().skip(1).collect())?;
    if args.command == Command::Help {
        print_help();
        return Ok(());
    }

    let mut config = Config::from_env()?;
    if let Some(dir) = args.data_dir {
        config.data_dir = dir;
    }
    songnote::log::init(config.log_path().as_deref())?;
    let store = HistoryStore::new(config.history_path());

    match args.command {
        Command::Help => Ok(()),
        Command::Merge { file } => {
            let raw = read_payload(file)?;
            let payload: serde_json::Value =
                serde_json::from_str(&raw).context("payload is not valid JSON")?;
            if !store.save_song_history(&payload) {
                std::process::exit(1);
            }
            Ok(())
        }
        Command::Poll {
            once,
            source,
            interval_hours,
        } => {
            let interval = match interval_hours {
                Some(hours) => config::parse_poll_hours(&hours)?,
                None => config.poll_interval,
            };
            let source = JsonFileSource::new(source.unwrap_or_else(|| config.source_path()));
            let mut poll = PollLoop::new(store, source, interval);
            if !once {
                poll.run_forever();
            }
            match poll.run_once() {
                CycleOutcome::Saved(_) | CycleOutcome::NothingNew(_) => Ok(()),
                CycleOutcome::SourceFailed(reason) | CycleOutcome::SaveFailed(reason) => {
                    anyhow::bail!(reason)
                }
            }
        }
        Command::Show { user } => {
            let loaded = store.load()?;
            if loaded.recovered {
                anyhow::bail!("{} is not a valid history file", store.path().display());
            }
            let json = match user {
                Some(name) => {
                    let Some(history) = loaded.document.user(&name) else {
                        anyhow::bail!("no history for user {name}");
                    };
                    serde_json::to_string_pretty(history)?
                }
                None => serde_json::to_string_pretty(&loaded.document)?,
            };
            println!("{json}");
            Ok(())
        }
    }
}

fn read_payload(file: Option<PathBuf>) -> anyhow::Result<String> {
    match file {
        Some(path) if path.as_os_str() != "-" => std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display())),
        _ => {
            let mut raw = String::new();
            std::io::stdin()
                .read_to_string(&mut raw)
                .context("failed to read payload from stdin")?;
            Ok(raw)
        }
    }
}

fn parse_args(args: Vec<String>) -> anyhow::Result<CliArgs> {
    let mut out = CliArgs::default();
    let mut positional = Vec::new();
    let mut once = false;
    let mut source = None;
    let mut interval_hours = None;
    let mut index = 0;
    while index < args.len() {
        match args[index].as_str() {
            "--data-dir" => {
                out.data_dir = Some(PathBuf::from(flag_value(&args, &mut index, "--data-dir")?));
            }
            "--source" => {
                source = Some(PathBuf::from(flag_value(&args, &mut index, "--source")?));
            }
            "--interval-hours" => {
                interval_hours = Some(flag_value(&args, &mut index, "--interval-hours")?);
            }
            "--once" => once = true,
            "-h" | "--help" => return Ok(CliArgs::default()),
            other if other.starts_with("--") => anyhow::bail!("unknown argument {other}"),
            other => positional.push(other.to_string()),
        }
        index += 1;
    }

    let mut positional = positional.into_iter();
    let command = positional.next();
    let operand = positional.next();
    if let Some(extra) = positional.next() {
        anyhow::bail!("unexpected argument {extra}");
    }

    let poll_flags = once || source.is_some() || interval_hours.is_some();
    out.command = match command.as_deref() {
        None | Some("help") => Command::Help,
        Some("poll") => {
            if let Some(extra) = operand {
                anyhow::bail!("poll takes no operand, got {extra}");
            }
            Command::Poll {
                once,
                source,
                interval_hours,
            }
        }
        Some(name) if poll_flags => {
            anyhow::bail!("--once, --source and --interval-hours only apply to poll, not {name}")
        }
        Some("merge") => Command::Merge {
            file: operand.map(PathBuf::from),
        },
        Some("show") => Command::Show { user: operand },
        Some(other) => anyhow::bail!("unknown command {other}"),
    };
    Ok(out)
}

fn flag_value(args: &[String], index: &mut usize, flag: &str) -> anyhow::Result<String> {
    *index += 1;
    let Some(value) = args.get(*index) else {
        anyhow::bail!("{flag} requires a value");
    };
    if value.trim().is_empty() {
        anyhow::bail!("{flag} cannot be empty");
    }
    Ok(value.trim().to_string())
}

fn print_help() {
    println!("songnote");
    println!("  merge [FILE]              Merge a username -> songs JSON payload (stdin if omitted)");
    println!("  poll                      Poll the song drop file every interval");
    println!("    --once                  Run a single cycle and exit");
    println!("    --source FILE           Drop file to read (default <data dir>/inbox.json)");
    println!("    --interval-hours N      Hours between cycles (default 3)");
    println!("  show [USER]               Print the stored history");
    println!("  --data-dir DIR            Directory holding songs_data.json");
}
