//! Audio assembly — container wrapping and external encoding.
//!
//! Concatenated raw samples are wrapped in the minimal WAV container, then an
//! external command-line encoder transcodes the intermediate file into the
//! distributable compressed format. On success only the compressed file
//! remains at the job's output path; on encoder failure the intermediate WAV
//! is retained for diagnosis and cleaned up by the next successful run.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use folio_core::wav::{SAMPLE_RATE, write_wav};

use crate::error::AssembleError;

const DEFAULT_ENCODER: &str = "ffmpeg";
const DEFAULT_BITRATE: &str = "64k";

/// Seam between the job runner and disk/encoder, so the runner is testable
/// without ffmpeg.
#[async_trait]
pub trait AudioWriter: Send + Sync {
    /// Wrap, encode, and persist one chapter's audio. Returns the URL the job
    /// record advertises.
    async fn write(
        &self,
        book_id: &str,
        chapter: u32,
        samples: &[i16],
    ) -> Result<String, AssembleError>;

    /// Whether the compressed output for this chapter already exists.
    fn output_exists(&self, book_id: &str, chapter: u32) -> bool;

    /// The URL advertised for a completed chapter.
    fn audio_url(&self, book_id: &str, chapter: u32) -> String;
}

pub struct Assembler {
    data_dir: PathBuf,
    encoder: String,
    bitrate: String,
}

impl Assembler {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            encoder: DEFAULT_ENCODER.into(),
            bitrate: DEFAULT_BITRATE.into(),
        }
    }

    /// Override the encoder binary (tests, alternative installs).
    pub fn with_encoder(mut self, encoder: impl Into<String>) -> Self {
        self.encoder = encoder.into();
        self
    }

    fn book_dir(&self, book_id: &str) -> PathBuf {
        self.data_dir.join("audio").join(book_id)
    }

    pub fn wav_path(&self, book_id: &str, chapter: u32) -> PathBuf {
        self.book_dir(book_id).join(format!("chapter-{chapter}.wav"))
    }

    pub fn output_path(&self, book_id: &str, chapter: u32) -> PathBuf {
        self.book_dir(book_id).join(format!("chapter-{chapter}.mp3"))
    }

    async fn encode(&self, wav: &Path, part: &Path) -> Result<(), AssembleError> {
        let output = Command::new(&self.encoder)
            .arg("-y")
            .args(["-loglevel", "error"])
            .arg("-i")
            .arg(wav)
            .args(["-codec:a", "libmp3lame", "-b:a", &self.bitrate, "-f", "mp3"])
            .arg(part)
            .output()
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => AssembleError::EncoderMissing(self.encoder.clone()),
                _ => AssembleError::Io(e),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let reason = match stderr.trim() {
                "" => format!("{} exited with {}", self.encoder, output.status),
                msg => msg.to_string(),
            };
            return Err(AssembleError::EncoderFailed(reason));
        }
        Ok(())
    }
}

#[async_trait]
impl AudioWriter for Assembler {
    async fn write(
        &self,
        book_id: &str,
        chapter: u32,
        samples: &[i16],
    ) -> Result<String, AssembleError> {
        tokio::fs::create_dir_all(self.book_dir(book_id)).await?;

        let wav = self.wav_path(book_id, chapter);
        let out = self.output_path(book_id, chapter);
        let part = out.with_extension("mp3.part");

        tokio::fs::write(&wav, write_wav(samples, SAMPLE_RATE)).await?;
        debug!(
            "wrote container: {} samples -> {}",
            samples.len(),
            wav.display()
        );

        // Encoder failure leaves the wav in place for diagnosis.
        self.encode(&wav, &part).await?;

        // The compressed file appears at the output path atomically.
        tokio::fs::rename(&part, &out).await?;
        tokio::fs::remove_file(&wav).await?;

        debug!("encoded chapter audio: {}", out.display());
        Ok(self.audio_url(book_id, chapter))
    }

    fn output_exists(&self, book_id: &str, chapter: u32) -> bool {
        self.output_path(book_id, chapter).is_file()
    }

    fn audio_url(&self, book_id: &str, chapter: u32) -> String {
        format!("/audio/{book_id}/chapter-{chapter}.mp3")
    }
}
