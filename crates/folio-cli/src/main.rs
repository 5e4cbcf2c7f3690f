//! folio CLI — chapter audio server and reader.
//!
//! ```text
//! folio serve [--port 4820] [--host 127.0.0.1] [--data-dir ./data] [--synth-url ws://...]
//! folio enqueue <book> <chapter> [--voice ...] [--server http://localhost:4820]
//! folio status <book> <chapter> / cancel <book> <chapter>
//! folio read <file> [--offset 0] [--paragraph] [--synth-url ws://...] [--voice ...]
//! ```

use std::sync::Arc;

use clap::{Parser, Subcommand};

use folio_lib::assemble::Assembler;
use folio_lib::folio_core::text::LIVE_CHUNK_LEN;
use folio_lib::folio_core::types::{PlaybackConfig, PlaybackState, SourceKind, SynthConfig};
use folio_lib::jobs::JobScheduler;
use folio_lib::playback::PlaybackEngine;
use folio_lib::sequence::Sequencer;
use folio_lib::synth::SynthClient;

const DEFAULT_SERVER: &str = "http://localhost:4820";
const DEFAULT_SYNTH_URL: &str = "ws://localhost:8880/stream";

/// folio — book narration audio server
#[derive(Parser)]
#[command(name = "folio", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the chapter audio server
    Serve {
        /// Listen port
        #[arg(long, default_value = "4820")]
        port: u16,
        /// Listen host
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        /// Book store and job state directory
        #[arg(long, default_value = "./data")]
        data_dir: String,
        /// Streaming synthesis endpoint
        #[arg(long, default_value = DEFAULT_SYNTH_URL)]
        synth_url: String,
        /// Default narration voice
        #[arg(long, default_value = "narrator_en")]
        voice: String,
    },
    /// Request audio generation for a chapter
    Enqueue {
        book: String,
        chapter: u32,
        /// Voice override for this job
        #[arg(long)]
        voice: Option<String>,
        #[arg(long, default_value = DEFAULT_SERVER)]
        server: String,
    },
    /// Get a chapter job's status
    Status {
        book: String,
        chapter: u32,
        #[arg(long, default_value = DEFAULT_SERVER)]
        server: String,
    },
    /// Cancel a chapter job
    Cancel {
        book: String,
        chapter: u32,
        #[arg(long, default_value = DEFAULT_SERVER)]
        server: String,
    },
    /// Stream a text file aloud on this machine
    Read {
        /// Path to a narration text file
        file: String,
        /// Start position in the cleaned text
        #[arg(long, default_value = "0")]
        offset: usize,
        /// Treat the file as a single paragraph
        #[arg(long)]
        paragraph: bool,
        /// Streaming synthesis endpoint
        #[arg(long, default_value = DEFAULT_SYNTH_URL)]
        synth_url: String,
        /// Narration voice
        #[arg(long, default_value = "narrator_en")]
        voice: String,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            port,
            host,
            data_dir,
            synth_url,
            voice,
        } => {
            let config = SynthConfig { synth_url, voice };
            let synth = Arc::new(SynthClient::new(config));
            let assembler = Arc::new(Assembler::new(&data_dir));
            let scheduler =
                JobScheduler::new(&data_dir, synth, assembler).expect("failed to open job store");
            let app = folio_lib::server::router(scheduler);

            let addr = format!("{host}:{port}");
            eprintln!("folio listening on {addr}");

            let listener = tokio::net::TcpListener::bind(&addr)
                .await
                .expect("failed to bind");
            axum::serve(listener, app).await.expect("server error");
        }

        Command::Enqueue {
            book,
            chapter,
            voice,
            server,
        } => {
            let resp = reqwest::Client::new()
                .post(format!("{server}/books/{book}/chapters/{chapter}/audio"))
                .json(&serde_json::json!({ "voice": voice }))
                .send()
                .await
                .expect("request failed");
            println!("{}", resp.text().await.unwrap_or_default());
        }

        Command::Status {
            book,
            chapter,
            server,
        } => {
            let resp = reqwest::Client::new()
                .get(format!("{server}/books/{book}/chapters/{chapter}/audio"))
                .send()
                .await
                .expect("request failed");
            println!("{}", resp.text().await.unwrap_or_default());
        }

        Command::Cancel {
            book,
            chapter,
            server,
        } => {
            let resp = reqwest::Client::new()
                .delete(format!("{server}/books/{book}/chapters/{chapter}/audio"))
                .send()
                .await
                .expect("request failed");
            println!("{}", resp.text().await.unwrap_or_default());
        }

        Command::Read {
            file,
            offset,
            paragraph,
            synth_url,
            voice,
        } => {
            let text = std::fs::read_to_string(&file).expect("failed to read text file");

            let engine = PlaybackEngine::new(PlaybackConfig {
                synth: SynthConfig { synth_url, voice },
                max_chunk_len: LIVE_CHUNK_LEN,
            });
            let sequencer = Sequencer::new(Arc::new(engine.clone()), LIVE_CHUNK_LEN);

            let kind = if paragraph {
                SourceKind::Paragraph
            } else {
                SourceKind::Page
            };
            let total = sequencer.play(kind, &file, &text, offset, None);
            if total == 0 {
                eprintln!("nothing to speak in {file}");
                return;
            }
            eprintln!("reading {file}: {total} chunk(s)");

            loop {
                tokio::time::sleep(std::time::Duration::from_millis(200)).await;
                let status = engine.status();
                match status.state {
                    PlaybackState::Error => {
                        eprintln!(
                            "playback error: {}",
                            status.error.unwrap_or_else(|| "unknown".into())
                        );
                        std::process::exit(1);
                    }
                    PlaybackState::Idle if sequencer.remaining() == 0 => {
                        eprintln!("done ({:.1}s played)", status.playback_seconds);
                        return;
                    }
                    _ => {}
                }
            }
        }
    }
}
