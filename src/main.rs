//! A streaming text-to-speech client for the Aivis Cloud API.

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use std::{env, sync::Arc};

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod audio;
mod config;
mod error;
mod history;
mod playback;
mod synth;
mod tee;

#[cfg(test)]
mod tests;

use audio::{AudioFormat, AudioSink, ProcessSink};
use config::Config;
use history::{
    filter::{Filter, SortBy, SortOrder},
    player::Replay,
    Store,
};
use playback::{Coordinator, PlaybackMode, PlaybackRequest, Settings};
use synth::{HttpSynthesizer, SynthesisRequest};

pub use error::{Error, Result};

/// A streaming text-to-speech client for the Aivis Cloud API.
#[derive(Parser)]
#[command(about, version)]
pub struct Args {
    /// API key; falls back to the AIVIS_API_KEY environment variable.
    #[clap(long)]
    api_key: Option<String>,

    /// Synthesis API endpoint base URL.
    #[clap(long)]
    base_url: Option<String>,

    /// Voice model UUID used when a command doesn't name one.
    #[clap(long, short)]
    model: Option<String>,

    /// History directory; `~` and env vars are expanded, and the result
    /// must be absolute.
    #[clap(long)]
    history_path: Option<String>,

    /// Disable history persistence entirely.
    #[clap(long)]
    no_history: bool,

    /// Keep at most this many history records, pruning the oldest after
    /// each synthesis.
    #[clap(long)]
    history_max: Option<usize>,

    /// Enable debug logging on stderr.
    #[clap(long, short)]
    debug: bool,

    /// The command to run.
    #[command(subcommand)]
    command: Commands,
}

/// Everything the client can do.
#[derive(Subcommand)]
enum Commands {
    /// Synthesizes text and plays it.
    Say {
        /// The text (or SSML, with --ssml) to speak.
        text: String,

        /// Voice style by numeric id. Mutually exclusive with --style-name.
        #[clap(long)]
        style_id: Option<u32>,

        /// Voice style by name. Mutually exclusive with --style-id.
        #[clap(long)]
        style_name: Option<String>,

        /// Treat the text as SSML.
        #[clap(long)]
        ssml: bool,

        /// Audio container to synthesize.
        #[clap(long, short)]
        format: Option<AudioFormat>,

        /// Speaking rate, 0.5..=2.0.
        #[clap(long)]
        rate: Option<f64>,

        /// Pitch shift, -1.0..=1.0.
        #[clap(long)]
        pitch: Option<f64>,

        /// Synthesis-side gain, 0.0..=2.0.
        #[clap(long)]
        volume: Option<f64>,

        /// Playback discipline (immediate pre-empts, queue serializes,
        /// no-queue plays in parallel).
        #[clap(long)]
        mode: Option<PlaybackMode>,

        /// Local playback volume, 0.0..=1.0.
        #[clap(long)]
        playback_volume: Option<f64>,

        /// Return as soon as playback starts instead of waiting for it
        /// to finish.
        #[clap(long)]
        detach: bool,
    },

    /// Works with the playback history.
    History {
        /// The history operation.
        #[command(subcommand)]
        command: HistoryCommands,
    },
}

/// Operations on saved records.
#[derive(Subcommand)]
enum HistoryCommands {
    /// Lists saved records.
    List {
        /// Page size.
        #[clap(long, default_value_t = 20)]
        limit: usize,

        /// Records to skip.
        #[clap(long, default_value_t = 0)]
        offset: usize,

        /// Keep only records with exactly this model UUID.
        #[clap(long)]
        model: Option<String>,

        /// Keep only records whose text contains this.
        #[clap(long)]
        contains: Option<String>,

        /// Sort key; defaults to newest id first.
        #[clap(long)]
        sort: Option<SortBy>,

        /// Sort direction.
        #[clap(long)]
        order: Option<SortOrder>,
    },

    /// Prints one record, request snapshot included, as JSON.
    Show {
        /// Id of the record to print.
        id: u64,
    },

    /// Replays a record's audio.
    Play {
        /// Id of the record to replay.
        id: u64,

        /// Playback discipline; defaults to queueing behind ongoing
        /// playback.
        #[clap(long)]
        mode: Option<PlaybackMode>,

        /// Local playback volume, 0.0..=1.0.
        #[clap(long)]
        playback_volume: Option<f64>,
    },

    /// Deletes records by id.
    Delete {
        /// Ids to delete.
        #[clap(required = true)]
        ids: Vec<u64>,
    },

    /// Deletes every record and resets the id counter.
    Clear,

    /// Prunes records beyond a count or age.
    Cleanup {
        /// Newest records to keep.
        #[clap(long)]
        max_count: usize,

        /// Also drop anything older than this many days.
        #[clap(long)]
        max_age_days: Option<i64>,
    },
}

impl Args {
    /// Folds the CLI flags into a [`Config`].
    fn config(&self) -> Config {
        Config {
            api_key: self
                .api_key
                .clone()
                .or_else(|| env::var("AIVIS_API_KEY").ok()),
            api_base_url: self
                .base_url
                .clone()
                .unwrap_or_else(|| synth::client::DEFAULT_BASE_URL.to_owned()),
            default_model_uuid: self.model.clone(),
            history_enabled: !self.no_history,
            history_max_count: self.history_max,
            history_store_path: self.history_path.clone(),
            ..Config::default()
        }
    }
}

/// Opens the history store when persistence is enabled.
async fn open_store(config: &Config) -> Result<Option<Arc<Store>>> {
    if !config.history_enabled {
        return Ok(None);
    }

    let root = config.history_root()?;
    Ok(Some(Arc::new(Store::open(root).await?)))
}

/// Wires a coordinator with its primary sink and a sink factory for
/// parallel playback.
fn coordinator(config: &Config, store: Option<Arc<Store>>) -> Result<Coordinator> {
    let synthesizer = Arc::new(HttpSynthesizer::new(
        config.api_key.clone().unwrap_or_default(),
        config.api_base_url.clone(),
    )?);

    let settings = Settings {
        default_mode: config.default_playback_mode,
        history_enabled: config.history_enabled,
        history_max_count: config.history_max_count,
    };

    Ok(Coordinator::new(
        Arc::new(ProcessSink::new()),
        synthesizer,
        store,
        settings,
        Some(Box::new(|| {
            let sink: Arc<dyn AudioSink> = Arc::new(ProcessSink::new());
            sink
        })),
    ))
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let args = Args::parse();

    let default_filter = if args.debug { "aivis=debug" } else { "aivis=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = args.config();

    match args.command {
        Commands::Say {
            text,
            style_id,
            style_name,
            ssml,
            format,
            rate,
            pitch,
            volume,
            mode,
            playback_volume,
            detach,
        } => {
            if config.api_key.is_none() {
                eyre::bail!("no API key configured; pass --api-key or set AIVIS_API_KEY");
            }

            let mut request = SynthesisRequest::new(String::new(), text);
            request.style_id = style_id;
            request.style_name = style_name;
            request.use_ssml = ssml.then_some(true);
            request.output_format = format;
            request.speaking_rate = rate;
            request.pitch = pitch;
            request.volume = volume;
            config.apply_defaults(&mut request);

            let store = open_store(&config).await?;
            let coordinator = coordinator(&config, store)?;

            coordinator
                .play(PlaybackRequest {
                    tts: request,
                    mode,
                    wait_for_end: !detach,
                    volume: playback_volume,
                })
                .await?;
        }

        Commands::History { command } => {
            let store = open_store(&config)
                .await?
                .ok_or_else(|| eyre::eyre!("history is disabled"))?;

            match command {
                HistoryCommands::List {
                    limit,
                    offset,
                    model,
                    contains,
                    sort,
                    order,
                } => {
                    let mut filter = Filter {
                        model_uuid: model,
                        text_contains: contains,
                        limit,
                        offset,
                        ..Filter::default()
                    };
                    if let Some(sort) = sort {
                        filter.sort_by = sort;
                    }
                    if let Some(order) = order {
                        filter.sort_order = order;
                    }

                    let page = store.list(&filter).await;
                    for record in &page.records {
                        println!(
                            "{:>5}  {}  {:<4}  {}",
                            record.id,
                            record.created_at.format("%Y-%m-%d %H:%M:%S"),
                            record.file_format,
                            record.text
                        );
                    }
                    println!("{} of {} record(s)", page.records.len(), page.total);
                }

                HistoryCommands::Show { id } => {
                    let record = store.get(id).await?;
                    println!("{}", serde_json::to_string_pretty(&record)?);
                }

                HistoryCommands::Play {
                    id,
                    mode,
                    playback_volume,
                } => {
                    let coordinator = coordinator(&config, Some(Arc::clone(&store)))?;

                    history::player::replay(
                        &coordinator,
                        &store,
                        Replay {
                            id,
                            mode,
                            wait_for_end: true,
                            volume: playback_volume,
                        },
                    )
                    .await?;
                }

                HistoryCommands::Delete { ids } => {
                    if let [id] = ids[..] {
                        store.delete(id).await?;
                        println!("deleted record {id}");
                    } else {
                        let removed = store.delete_many(&ids).await?;
                        println!("deleted {removed} record(s)");
                    }
                }

                HistoryCommands::Clear => {
                    store.clear().await?;
                    println!("history cleared");
                }

                HistoryCommands::Cleanup {
                    max_count,
                    max_age_days,
                } => {
                    let removed = store
                        .cleanup(max_count, max_age_days.map(chrono::Duration::days))
                        .await?;
                    println!("pruned {removed} record(s)");
                }
            }
        }
    }

    Ok(())
}
