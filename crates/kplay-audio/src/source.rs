//! PCM source - streams fixed-size blocks out of a canonical WAV file.
//!
//! The file cursor is the only state touched from two threads: the engine
//! thread reads blocks, the control thread rewinds. Both go through one mutex
//! so a rewind never lands in the middle of a read.

use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use kplay_core::{Frames, SampleFormat, SampleRate};
use kplay_stage::{ProduceError, Producer};
use parking_lot::Mutex;

/// Size of the fixed RIFF/WAVE header
pub const HEADER_LEN: usize = 44;

const ID_RIFF: &[u8; 4] = b"RIFF";
const ID_WAVE: &[u8; 4] = b"WAVE";
const ID_FMT: &[u8; 4] = b"fmt ";
const ID_DATA: &[u8; 4] = b"data";
const FORMAT_PCM: u16 = 1;

/// Validated stream parameters of an opened file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamHeader {
    pub channels: u16,
    pub sample_rate: SampleRate,
    pub bits_per_sample: u16,
    pub format: SampleFormat,
    /// Length of the data chunk as declared by the header
    pub payload_len: u32,
}

impl StreamHeader {
    /// Build a header for a PCM stream, validating the same constraints as `parse`
    pub fn new(
        channels: u16,
        sample_rate: SampleRate,
        bits_per_sample: u16,
        payload_len: u32,
    ) -> Result<Self, OpenError> {
        if channels == 0 || channels > 2 {
            return Err(OpenError::UnsupportedChannels(channels));
        }
        if sample_rate == 0 {
            return Err(OpenError::InvalidSampleRate);
        }
        let format = SampleFormat::from_bits(bits_per_sample)
            .ok_or(OpenError::UnsupportedBitDepth(bits_per_sample))?;

        Ok(Self {
            channels,
            sample_rate,
            bits_per_sample,
            format,
            payload_len,
        })
    }

    /// Parse and validate the 44-byte container header
    pub fn parse(raw: &[u8; HEADER_LEN]) -> Result<Self, OpenError> {
        let tag = |offset: usize| &raw[offset..offset + 4];
        let u16_at = |offset: usize| u16::from_le_bytes([raw[offset], raw[offset + 1]]);
        let u32_at = |offset: usize| {
            u32::from_le_bytes([raw[offset], raw[offset + 1], raw[offset + 2], raw[offset + 3]])
        };

        if tag(0) != ID_RIFF || tag(8) != ID_WAVE {
            return Err(OpenError::NotRiffWave);
        }
        if tag(12) != ID_FMT {
            return Err(OpenError::MissingFormatChunk);
        }
        let audio_format = u16_at(20);
        if audio_format != FORMAT_PCM {
            return Err(OpenError::NotPcm(audio_format));
        }
        if tag(36) != ID_DATA {
            return Err(OpenError::MissingDataChunk);
        }

        Self::new(u16_at(22), u32_at(24), u16_at(34), u32_at(40))
    }

    /// Encode this header as a canonical 44-byte RIFF/WAVE header
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let block_align = self.channels * (self.bits_per_sample / 8);
        let byte_rate = self.sample_rate * u32::from(block_align);

        let mut raw = [0_u8; HEADER_LEN];
        raw[0..4].copy_from_slice(ID_RIFF);
        raw[4..8].copy_from_slice(&self.payload_len.saturating_add(36).to_le_bytes());
        raw[8..12].copy_from_slice(ID_WAVE);
        raw[12..16].copy_from_slice(ID_FMT);
        raw[16..20].copy_from_slice(&16_u32.to_le_bytes());
        raw[20..22].copy_from_slice(&FORMAT_PCM.to_le_bytes());
        raw[22..24].copy_from_slice(&self.channels.to_le_bytes());
        raw[24..28].copy_from_slice(&self.sample_rate.to_le_bytes());
        raw[28..32].copy_from_slice(&byte_rate.to_le_bytes());
        raw[32..34].copy_from_slice(&block_align.to_le_bytes());
        raw[34..36].copy_from_slice(&self.bits_per_sample.to_le_bytes());
        raw[36..40].copy_from_slice(ID_DATA);
        raw[40..44].copy_from_slice(&self.payload_len.to_le_bytes());
        raw
    }

    /// Bytes per interleaved frame
    pub fn frame_size(&self) -> usize {
        usize::from(self.channels) * self.format.bytes_per_sample()
    }

    /// Playing time of the declared payload
    pub fn duration(&self) -> Duration {
        let frames = u64::from(self.payload_len) / self.frame_size() as u64;
        Duration::from_secs_f64(frames as f64 / f64::from(self.sample_rate))
    }
}

/// Reasons an input file is refused
#[derive(Debug, thiserror::Error)]
pub enum OpenError {
    #[error("Unable to open {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Unable to read riff/wave header")]
    TruncatedHeader,

    #[error("Not a riff/wave header")]
    NotRiffWave,

    #[error("No fmt chunk")]
    MissingFormatChunk,

    #[error("Not PCM format (format tag {0})")]
    NotPcm(u16),

    #[error("No data chunk")]
    MissingDataChunk,

    #[error("Can't support {0} channels, mono and stereo are supported")]
    UnsupportedChannels(u16),

    #[error("{0} bits is not supported")]
    UnsupportedBitDepth(u16),

    #[error("Sample rate must be greater than zero")]
    InvalidSampleRate,
}

/// Read position guarded by the source mutex
struct Cursor {
    reader: BufReader<File>,
    consumed: u64,
    exhausted: bool,
}

impl Cursor {
    fn read_block(&mut self, buf: &mut [u8], payload_len: u64) -> Result<(), ProduceError> {
        if self.exhausted {
            return Err(ProduceError::EndOfStream);
        }

        let remaining = payload_len.saturating_sub(self.consumed);
        let wanted = buf.len().min(usize::try_from(remaining).unwrap_or(usize::MAX));

        let mut filled = 0;
        while filled < wanted {
            match self.reader.read(&mut buf[filled..wanted]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
        self.consumed += filled as u64;

        if filled == 0 {
            self.exhausted = true;
            return Err(ProduceError::EndOfStream);
        }

        // Short tail: pad with silence instead of emitting a partial block
        buf[filled..].fill(0);
        Ok(())
    }
}

type ProgressObserver = Box<dyn Fn(f32) + Send + Sync>;

/// Streaming reader over a WAV payload
pub struct PcmSource {
    path: PathBuf,
    header: StreamHeader,
    cursor: Mutex<Cursor>,
    /// Last computed progress as f32 bits, readable without the cursor lock
    progress: AtomicU32,
    observer: Option<ProgressObserver>,
}

impl PcmSource {
    /// Open `path` and validate its header
    pub fn open(path: impl AsRef<Path>) -> Result<Self, OpenError> {
        let path = path.as_ref().to_path_buf();
        let io_error = |source| OpenError::Io {
            path: path.clone(),
            source,
        };

        let file = File::open(&path).map_err(io_error)?;
        let mut reader = BufReader::new(file);

        let mut raw = [0_u8; HEADER_LEN];
        reader.read_exact(&mut raw).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => OpenError::TruncatedHeader,
            _ => io_error(e),
        })?;
        let header = StreamHeader::parse(&raw)?;

        tracing::debug!(
            "Opened {}: {} Hz, {} channels, {} bits, {} payload bytes",
            path.display(),
            header.sample_rate,
            header.channels,
            header.bits_per_sample,
            header.payload_len
        );

        Ok(Self {
            path,
            header,
            cursor: Mutex::new(Cursor {
                reader,
                consumed: 0,
                exhausted: false,
            }),
            progress: AtomicU32::new(0.0_f32.to_bits()),
            observer: None,
        })
    }

    /// Receive the progress fraction after every read
    ///
    /// The observer runs on the reading thread after the cursor lock has been
    /// released, so it must not block.
    pub fn with_progress_observer(mut self, observer: impl Fn(f32) + Send + Sync + 'static) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> &StreamHeader {
        &self.header
    }

    /// Fraction of the payload consumed by the last read, in `[0, 1]`
    pub fn progress(&self) -> f32 {
        f32::from_bits(self.progress.load(Ordering::Acquire))
    }

    /// Read one block of `frames` frames
    pub fn produce(&self, frames: Frames) -> Result<Vec<u8>, ProduceError> {
        let mut block = vec![0; frames * self.header.frame_size()];
        self.produce_into(&mut block)?;
        Ok(block)
    }

    /// Fill `buf` with the next bytes of the payload
    pub fn produce_into(&self, buf: &mut [u8]) -> Result<(), ProduceError> {
        let payload_len = u64::from(self.header.payload_len);

        let (result, progress) = {
            let mut cursor = self.cursor.lock();
            let result = cursor.read_block(buf, payload_len);
            let progress = match &result {
                Ok(()) => fraction(cursor.consumed, payload_len),
                Err(ProduceError::EndOfStream) => 1.0,
                Err(ProduceError::Io(_)) => self.progress(),
            };
            self.progress.store(progress.to_bits(), Ordering::Release);
            (result, progress)
        };

        if let Some(observer) = &self.observer {
            observer(progress);
        }
        result
    }

    /// Rewind to the first payload byte and clear end-of-stream
    pub fn seek_to_begin(&self) -> io::Result<()> {
        let mut cursor = self.cursor.lock();
        cursor.reader.seek(SeekFrom::Start(HEADER_LEN as u64))?;
        cursor.consumed = 0;
        cursor.exhausted = false;
        self.progress.store(0.0_f32.to_bits(), Ordering::Release);
        Ok(())
    }
}

impl Producer for PcmSource {
    fn produce(&self, buf: &mut [u8]) -> Result<(), ProduceError> {
        self.produce_into(buf)
    }
}

impl std::fmt::Debug for PcmSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PcmSource")
            .field("path", &self.path)
            .field("header", &self.header)
            .field("progress", &self.progress())
            .finish_non_exhaustive()
    }
}

fn fraction(consumed: u64, payload_len: u64) -> f32 {
    if payload_len == 0 {
        return 1.0;
    }
    (consumed as f64 / payload_len as f64).min(1.0) as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;
    use tempfile::NamedTempFile;

    fn wav_file(header: &StreamHeader, payload: &[u8]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&header.to_bytes()).unwrap();
        file.write_all(payload).unwrap();
        file.flush().unwrap();
        file
    }

    fn ramp(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    fn stereo16(payload_len: usize) -> StreamHeader {
        StreamHeader::new(2, 44100, 16, payload_len as u32).unwrap()
    }

    #[test]
    fn test_open_reports_stream_parameters() {
        let payload = ramp(4 * 100);
        let file = wav_file(&stereo16(payload.len()), &payload);

        let source = PcmSource::open(file.path()).unwrap();
        let header = source.header();
        assert_eq!(header.channels, 2);
        assert_eq!(header.sample_rate, 44100);
        assert_eq!(header.bits_per_sample, 16);
        assert_eq!(header.format, SampleFormat::S16);
        assert_eq!(header.payload_len, 400);
        assert_eq!(header.frame_size(), 4);
    }

    #[test]
    fn test_open_missing_file() {
        let result = PcmSource::open("/definitely/not/here.wav");
        assert!(matches!(result, Err(OpenError::Io { .. })));
    }

    #[test]
    fn test_open_rejects_wrong_magic() {
        let mut raw = stereo16(0).to_bytes();
        raw[0..4].copy_from_slice(b"RIFX");
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&raw).unwrap();

        let result = PcmSource::open(file.path());
        assert!(matches!(result, Err(OpenError::NotRiffWave)));
    }

    #[test]
    fn test_open_rejects_short_header() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&stereo16(0).to_bytes()[..20]).unwrap();

        let result = PcmSource::open(file.path());
        assert!(matches!(result, Err(OpenError::TruncatedHeader)));
    }

    #[test]
    fn test_parse_rejects_non_pcm() {
        let mut raw = stereo16(0).to_bytes();
        raw[20..22].copy_from_slice(&3_u16.to_le_bytes());
        assert!(matches!(
            StreamHeader::parse(&raw),
            Err(OpenError::NotPcm(3))
        ));
    }

    #[test]
    fn test_parse_rejects_missing_data_chunk() {
        let mut raw = stereo16(0).to_bytes();
        raw[36..40].copy_from_slice(b"LIST");
        assert!(matches!(
            StreamHeader::parse(&raw),
            Err(OpenError::MissingDataChunk)
        ));
    }

    #[test]
    fn test_parse_rejects_too_many_channels() {
        let mut raw = stereo16(0).to_bytes();
        raw[22..24].copy_from_slice(&6_u16.to_le_bytes());
        assert!(matches!(
            StreamHeader::parse(&raw),
            Err(OpenError::UnsupportedChannels(6))
        ));
    }

    #[test]
    fn test_parse_rejects_unsupported_depth() {
        let mut raw = stereo16(0).to_bytes();
        raw[34..36].copy_from_slice(&8_u16.to_le_bytes());
        assert!(matches!(
            StreamHeader::parse(&raw),
            Err(OpenError::UnsupportedBitDepth(8))
        ));
    }

    #[test]
    fn test_header_round_trips_through_bytes() {
        let header = StreamHeader::new(1, 48000, 24, 1234).unwrap();
        assert_eq!(StreamHeader::parse(&header.to_bytes()).unwrap(), header);
    }

    #[test]
    fn test_produce_full_blocks_then_padded_tail_then_eos() {
        // 10 frames of payload, blocks of 4 frames: 4 + 4 + 2 (padded)
        let payload = ramp(40);
        let file = wav_file(&stereo16(payload.len()), &payload);
        let source = PcmSource::open(file.path()).unwrap();

        let first = source.produce(4).unwrap();
        assert_eq!(first, payload[0..16]);
        let second = source.produce(4).unwrap();
        assert_eq!(second, payload[16..32]);

        let tail = source.produce(4).unwrap();
        assert_eq!(tail.len(), 16);
        assert_eq!(tail[..8], payload[32..40]);
        assert!(tail[8..].iter().all(|&b| b == 0));

        assert!(matches!(source.produce(4), Err(ProduceError::EndOfStream)));
        assert!(matches!(source.produce(4), Err(ProduceError::EndOfStream)));
    }

    #[test]
    fn test_exact_multiple_ends_without_padding_block() {
        let payload = ramp(32);
        let file = wav_file(&stereo16(payload.len()), &payload);
        let source = PcmSource::open(file.path()).unwrap();

        assert!(source.produce(4).is_ok());
        assert!(source.produce(4).is_ok());
        assert!(matches!(source.produce(4), Err(ProduceError::EndOfStream)));
    }

    #[test]
    fn test_empty_payload_is_immediately_eos() {
        let file = wav_file(&stereo16(0), &[]);
        let source = PcmSource::open(file.path()).unwrap();

        assert!(matches!(source.produce(4), Err(ProduceError::EndOfStream)));
        assert_eq!(source.progress(), 1.0);
    }

    #[test]
    fn test_reads_stop_at_declared_payload() {
        // Trailing bytes after the data chunk are not audio
        let payload = ramp(16);
        let mut bytes = payload.clone();
        bytes.extend_from_slice(b"LIST\x04\x00\x00\x00junk");
        let file = wav_file(&stereo16(payload.len()), &bytes);
        let source = PcmSource::open(file.path()).unwrap();

        let block = source.produce(8).unwrap();
        assert_eq!(block[..16], payload[..]);
        assert!(block[16..].iter().all(|&b| b == 0));
        assert!(matches!(source.produce(8), Err(ProduceError::EndOfStream)));
    }

    #[test]
    fn test_truncated_payload_reaches_eos_at_full_progress() {
        // Header claims more than the file holds
        let payload = ramp(20);
        let file = wav_file(&stereo16(400), &payload);
        let source = PcmSource::open(file.path()).unwrap();

        assert!(source.produce(8).is_ok());
        assert!(source.progress() < 1.0);
        assert!(matches!(source.produce(8), Err(ProduceError::EndOfStream)));
        assert_eq!(source.progress(), 1.0);
    }

    #[test]
    fn test_seek_reproduces_fresh_sequence() {
        let payload = ramp(4 * 37);
        let file = wav_file(&stereo16(payload.len()), &payload);

        let drain = |source: &PcmSource| {
            let mut blocks = Vec::new();
            while let Ok(block) = source.produce(5) {
                blocks.push(block);
            }
            blocks
        };

        let fresh = drain(&PcmSource::open(file.path()).unwrap());

        let source = PcmSource::open(file.path()).unwrap();
        source.produce(5).unwrap();
        source.produce(5).unwrap();
        source.seek_to_begin().unwrap();
        assert_eq!(source.progress(), 0.0);
        assert_eq!(drain(&source), fresh);

        // Also after reaching end of stream
        source.seek_to_begin().unwrap();
        assert_eq!(drain(&source), fresh);
    }

    #[test]
    fn test_progress_is_monotonic_and_reaches_one() {
        let payload = ramp(4 * 100);
        let file = wav_file(&stereo16(payload.len()), &payload);
        let reported = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&reported);
        let source = PcmSource::open(file.path())
            .unwrap()
            .with_progress_observer(move |p| sink.lock().push(p));

        while source.produce(7).is_ok() {}

        let reported = reported.lock();
        assert!(reported.len() > 2);
        assert!(reported.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(*reported.last().unwrap(), 1.0);
        assert_eq!(source.progress(), 1.0);
    }

    #[test]
    fn test_concurrent_seek_and_produce() {
        let payload = ramp(4 * 2000);
        let file = wav_file(&stereo16(payload.len()), &payload);
        let source = Arc::new(PcmSource::open(file.path()).unwrap());
        let blocks = Arc::new(AtomicUsize::new(0));

        let reader = {
            let source = Arc::clone(&source);
            let blocks = Arc::clone(&blocks);
            std::thread::spawn(move || {
                for _ in 0..500 {
                    match source.produce(16) {
                        Ok(block) => {
                            // Blocks are always full-sized
                            assert_eq!(block.len(), 64);
                            blocks.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(ProduceError::EndOfStream) => {}
                        Err(e) => panic!("unexpected read error: {e}"),
                    }
                }
            })
        };

        for _ in 0..50 {
            source.seek_to_begin().unwrap();
            std::thread::yield_now();
        }
        reader.join().unwrap();
        assert!(blocks.load(Ordering::Relaxed) > 0);
    }

    #[test]
    fn test_duration() {
        let header = StreamHeader::new(2, 44100, 16, 44100 * 4).unwrap();
        assert_eq!(header.duration(), Duration::from_secs(1));
    }
}
