use anyhow::{Context, Result};
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::PathBuf;
use tracing::{info, warn};

/// Recorder configuration
#[derive(Debug, Clone)]
pub struct RecorderConfig {
    /// Duration of each chunk before rotating files
    pub chunk_duration_secs: u64,
    /// Output directory for chunks
    pub output_dir: PathBuf,
    /// Session ID (used for chunk filenames)
    pub session_id: String,
    pub sample_rate: u32,
}

/// Writes the candidate's PCM audio to rotating WAV chunk files, so a
/// recruiter can review the raw interview later. Uncompressed codec only.
pub struct SessionRecorder {
    config: RecorderConfig,
    current: Option<ChunkWriter>,
    chunk_index: usize,
}

impl SessionRecorder {
    pub fn new(config: RecorderConfig) -> Result<Self> {
        fs::create_dir_all(&config.output_dir).context("Failed to create recordings directory")?;

        info!(
            "Session recorder initialized: {} (chunks: {}s each)",
            config.session_id, config.chunk_duration_secs
        );

        Ok(Self {
            config,
            current: None,
            chunk_index: 0,
        })
    }

    /// Append raw 16-bit little-endian PCM bytes.
    pub fn write_pcm(&mut self, bytes: &[u8]) -> Result<()> {
        if self.needs_rotation() {
            self.rotate()?;
        }

        if self.current.is_none() {
            self.current = Some(self.open_chunk()?);
        }

        if let Some(writer) = &mut self.current {
            for sample in bytes.chunks_exact(2) {
                writer.write_sample(i16::from_le_bytes([sample[0], sample[1]]))?;
            }
        }
        Ok(())
    }

    /// Finalize the current chunk and close the recorder.
    pub fn finish(mut self) -> Result<()> {
        if let Some(chunk) = self.current.take() {
            chunk.finish()?;
        }
        info!(
            "Session recording complete: {} chunks written",
            self.chunk_index
        );
        Ok(())
    }

    fn needs_rotation(&self) -> bool {
        match &self.current {
            None => false,
            Some(chunk) => {
                let max_samples =
                    self.config.chunk_duration_secs as usize * self.config.sample_rate as usize;
                chunk.sample_count >= max_samples
            }
        }
    }

    fn rotate(&mut self) -> Result<()> {
        if let Some(chunk) = self.current.take() {
            chunk.finish()?;
        }
        self.current = Some(self.open_chunk()?);
        Ok(())
    }

    fn open_chunk(&mut self) -> Result<ChunkWriter> {
        let path = self.config.output_dir.join(format!(
            "{}-chunk-{:03}.wav",
            self.config.session_id, self.chunk_index
        ));
        self.chunk_index += 1;
        ChunkWriter::new(path, self.config.sample_rate)
    }
}

/// Writes a single chunk to disk as a WAV file
struct ChunkWriter {
    writer: Option<hound::WavWriter<BufWriter<File>>>,
    sample_count: usize,
}

impl ChunkWriter {
    fn new(path: PathBuf, sample_rate: u32) -> Result<Self> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let writer = hound::WavWriter::create(&path, spec)
            .with_context(|| format!("Failed to create WAV file: {:?}", path))?;

        Ok(Self {
            writer: Some(writer),
            sample_count: 0,
        })
    }

    fn write_sample(&mut self, sample: i16) -> Result<()> {
        if let Some(writer) = &mut self.writer {
            writer
                .write_sample(sample)
                .context("Failed to write sample to WAV")?;
            self.sample_count += 1;
        }
        Ok(())
    }

    fn finish(mut self) -> Result<()> {
        if let Some(writer) = self.writer.take() {
            writer.finalize().context("Failed to finalize WAV file")?;
        }
        Ok(())
    }
}

impl Drop for ChunkWriter {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.take() {
            if let Err(e) = writer.finalize() {
                warn!("Failed to finalize WAV writer on drop: {}", e);
            }
        }
    }
}
