use chrono::Utc;
use clap::{ArgAction, Parser, Subcommand};
use std::path::{Path, PathBuf};
use survey_media::form_state::{FormState, FormStateError};
use survey_media::imaging::RustBackend;
use survey_media::output::{self, SaveOutcome};
use survey_media::registry::PhotoRegistry;
use survey_media::store::BlobStore;
use survey_media::types::PhotoUpload;
use survey_media::{config, report};

fn version_string() -> &'static str {
    let on_tag = env!("ON_RELEASE_TAG");
    if on_tag == "true" {
        env!("CARGO_PKG_VERSION")
    } else {
        let hash = env!("GIT_HASH");
        if hash.is_empty() {
            "dev@unknown"
        } else {
            // Leaked once at startup
            Box::leak(format!("dev@{hash}").into_boxed_str())
        }
    }
}

#[derive(Parser)]
#[command(name = "survey-media")]
#[command(about = "Photo storage for offline field surveys")]
#[command(long_about = "\
Photo storage for offline field surveys

Uploads are transcoded to a bounded full-size copy and a thumbnail, hashed,
and stored once: the same picture saved twice resolves to the same photo id.

Storage layout:

  survey-data/
  ├── config.toml        # Optional settings (see 'gen-config')
  ├── index.redb         # Thumbnails, hash mappings, photo records
  ├── blobs/             # Full-size images (capacity tier)
  │   └── <id>.avif
  └── form-state.json    # Photos attached to each surveyed record

Run 'survey-media gen-config' to generate a documented config.toml.")]
#[command(version = version_string())]
struct Cli {
    /// Storage root
    #[arg(long, default_value = "survey-data", global = true)]
    root: PathBuf,

    /// Log more (-v info, -vv debug). RUST_LOG overrides.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Transcode and store photos, optionally attaching them to a record
    Save {
        /// Image files to store
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Record to attach the photos to
        #[arg(long)]
        parent: Option<String>,
    },
    /// Write a photo's thumbnail to a file
    Thumbnail {
        id: String,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Write a photo's full-size image to a file
    Full {
        id: String,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Delete a photo, or detach it from one record
    Delete {
        id: String,
        /// Only detach from this record; the photo is deleted once unreferenced
        #[arg(long)]
        parent: Option<String>,
    },
    /// List photos attached to records
    List {
        #[arg(long)]
        parent: Option<String>,
    },
    /// Show storage usage against the quota
    Usage,
    /// Request durable storage and report whether it was granted
    Persist,
    /// Render an HTML photo appendix for one record
    Report {
        #[arg(long)]
        parent: String,
        #[arg(short, long)]
        output: PathBuf,
        /// Heading of the report; defaults to the record id
        #[arg(long)]
        title: Option<String>,
    },
    /// Print a stock config.toml with all options documented
    GenConfig,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Command::GenConfig = cli.command {
        print!("{}", config::stock_config_toml());
        return Ok(());
    }

    let config = config::load_config(&cli.root)?;
    init_thread_pool(&config.processing);
    let store = BlobStore::open(&cli.root, &config.storage)?;
    let registry = PhotoRegistry::new(store, RustBackend::new(), config.transcode_config());
    let state_path = FormState::path_in(&cli.root);

    match cli.command {
        Command::Save { files, parent } => {
            let mut state = FormState::load(&state_path)?;
            if let Some(parent) = &parent {
                state.check_policy(parent, &config.policy, 0)?;
            }

            let mut outcomes = Vec::with_capacity(files.len());
            let mut uploads = Vec::with_capacity(files.len());
            let mut slots = Vec::with_capacity(files.len());
            for path in &files {
                match PhotoUpload::from_path(path) {
                    Ok(upload) => {
                        slots.push(None);
                        uploads.push(upload);
                    }
                    Err(e) => slots.push(Some(format!("{}: {}", path.display(), e))),
                }
            }

            let batch_start = Utc::now();
            let mut results = registry.save_photos(&uploads).into_iter();
            let mut rejected_new = Vec::new();
            for slot in slots {
                if let Some(message) = slot {
                    eprintln!("Skipping {}", message);
                    continue;
                }
                let Some(result) = results.next() else {
                    break;
                };
                let meta = match result {
                    Ok(meta) => meta,
                    Err(error) => {
                        let file_name = error.file_name().unwrap_or_default().to_string();
                        outcomes.push(SaveOutcome::Failed { file_name, error });
                        continue;
                    }
                };
                let reused = meta.created_at < batch_start;
                if let Some(parent) = &parent {
                    match state.attach(parent, meta.clone(), &config.policy) {
                        Ok(_) => {}
                        Err(FormStateError::Policy(violation)) => {
                            if !reused {
                                rejected_new.push(meta.id.clone());
                            }
                            outcomes.push(SaveOutcome::Rejected {
                                file_name: meta.file_name,
                                violation,
                            });
                            continue;
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
                outcomes.push(if reused {
                    SaveOutcome::Reused(meta)
                } else {
                    SaveOutcome::Stored(meta)
                });
            }

            rejected_new.sort();
            rejected_new.dedup();
            for id in rejected_new {
                if !state.is_referenced(&id) {
                    registry.delete_photo(&id)?;
                }
            }
            if parent.is_some() {
                state.save(&state_path)?;
            }
            output::print_save_results(&outcomes);
        }
        Command::Thumbnail { id, output } => {
            let bytes = registry.get_thumbnail(&id)?.ok_or_else(|| missing(&id))?;
            write_output(&output, &bytes)?;
        }
        Command::Full { id, output } => {
            let bytes = registry.get_full_image(&id)?.ok_or_else(|| missing(&id))?;
            write_output(&output, &bytes)?;
        }
        Command::Delete { id, parent } => {
            let mut state = FormState::load(&state_path)?;
            let detached = match &parent {
                Some(parent) => usize::from(state.detach(parent, &id)),
                None => state.detach_all(&id),
            };
            if detached > 0 {
                state.save(&state_path)?;
            }
            if state.is_referenced(&id) {
                println!("Detached {} (still attached elsewhere)", id);
            } else {
                registry.delete_photo(&id)?;
                println!("Deleted {}", id);
            }
        }
        Command::List { parent } => {
            let state = FormState::load(&state_path)?;
            output::print_photo_list(&state, parent.as_deref());
        }
        Command::Usage => {
            output::print_usage(&registry.estimate_usage()?);
        }
        Command::Persist => {
            output::print_persistence(&registry.ensure_persistence());
        }
        Command::Report {
            parent,
            output,
            title,
        } => {
            let state = FormState::load(&state_path)?;
            let photos = report::collect_photos(&registry, state.photos(&parent));
            let title = title.unwrap_or_else(|| parent.clone());
            let html = report::render_report(&title, &photos);
            write_output(&output, html.into_string().as_bytes())?;
        }
        Command::GenConfig => unreachable!("handled before the store is opened"),
    }

    Ok(())
}

/// Install the global subscriber. `RUST_LOG` wins over `-v`.
fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// Initialize the rayon thread pool based on processing config.
///
/// Caps at the number of available CPU cores; user can constrain down, not up.
fn init_thread_pool(processing: &config::ProcessingConfig) {
    let threads = config::effective_threads(processing);
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
        .ok();
}

fn missing(id: &str) -> Box<dyn std::error::Error> {
    format!("No stored image for {id}").into()
}

fn write_output(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    std::fs::write(path, bytes)?;
    println!("Wrote {} ({})", path.display(), output::format_bytes(bytes.len() as u64));
    Ok(())
}
