//! Demultiplexing of engine output streams
//!
//! Two wire shapes reach us from the engine:
//!
//! - build logs: newline-delimited JSON objects such as `{"stream":"Step 1/4\n"}`
//!   or `{"error":"..."}`
//! - attach/exec output: frames made of an 8-byte header followed by the payload.
//!   Header byte 0 selects the stream (1 stdout, 2 stderr, anything else is
//!   treated as stdout), bytes 1..4 are reserved and bytes 4..8 hold the payload
//!   length as a big-endian `u32`.
//!
//! The decoders are incremental: push bytes as they arrive and pull out whatever
//! is complete. The async drivers feed a byte stream through a decoder and push
//! the decoded output into a [`LogSink`] as soon as it is available.

use crate::{ProviderError, Result};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::io::Write;
use tokio::sync::mpsc;

/// Length of an attach/exec frame header
pub const FRAME_HEADER_LEN: usize = 8;

/// Frame stream type for stdout
pub const STDOUT_STREAM: u8 = 1;

/// Frame stream type for stderr
pub const STDERR_STREAM: u8 = 2;

/// Where a decoded chunk came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamOrigin {
    Stdout,
    Stderr,
    /// Text carried in the `stream` field of a build-log JSON line
    RawJsonLine,
}

impl StreamOrigin {
    /// Map a frame header stream type to its origin
    pub fn from_stream_type(stream_type: u8) -> Self {
        match stream_type {
            STDERR_STREAM => Self::Stderr,
            _ => Self::Stdout,
        }
    }
}

/// Destination for decoded output.
///
/// Sinks are pushed to while the stream is still being read.
pub trait LogSink: Send {
    fn accept(&mut self, origin: StreamOrigin, payload: &[u8]);
}

/// Collects raw bytes from every origin
impl LogSink for Vec<u8> {
    fn accept(&mut self, _origin: StreamOrigin, payload: &[u8]) {
        self.extend_from_slice(payload);
    }
}

impl LogSink for String {
    fn accept(&mut self, _origin: StreamOrigin, payload: &[u8]) {
        self.push_str(&String::from_utf8_lossy(payload));
    }
}

/// Keeps every chunk together with its origin
impl LogSink for Vec<(StreamOrigin, Vec<u8>)> {
    fn accept(&mut self, origin: StreamOrigin, payload: &[u8]) {
        self.push((origin, payload.to_vec()));
    }
}

/// Forwards text to a progress channel; a closed receiver is ignored
impl LogSink for mpsc::UnboundedSender<String> {
    fn accept(&mut self, _origin: StreamOrigin, payload: &[u8]) {
        let _ = self.send(String::from_utf8_lossy(payload).into_owned());
    }
}

/// Writes output to the process console, stderr chunks to stderr
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleSink;

impl LogSink for ConsoleSink {
    fn accept(&mut self, origin: StreamOrigin, payload: &[u8]) {
        let result = match origin {
            StreamOrigin::Stderr => {
                let mut err = std::io::stderr().lock();
                err.write_all(payload).and_then(|_| err.flush())
            }
            StreamOrigin::Stdout | StreamOrigin::RawJsonLine => {
                let mut out = std::io::stdout().lock();
                out.write_all(payload).and_then(|_| out.flush())
            }
        };
        if let Err(e) = result {
            tracing::debug!("Console write failed: {}", e);
        }
    }
}

/// One attach/exec frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub stream_type: u8,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(stream_type: u8, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            stream_type,
            payload: payload.into(),
        }
    }

    pub fn origin(&self) -> StreamOrigin {
        StreamOrigin::from_stream_type(self.stream_type)
    }

    pub fn encode(&self) -> Vec<u8> {
        encode_frame(self.stream_type, &self.payload)
    }
}

/// Encode a payload in the attach/exec frame format.
///
/// Zero-length payloads produce a bare header.
pub fn encode_frame(stream_type: u8, payload: &[u8]) -> Vec<u8> {
    let mut output = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    output.push(stream_type);
    output.extend_from_slice(&[0, 0, 0]);
    output.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    output.extend_from_slice(payload);
    output
}

/// Incremental decoder for attach/exec frames
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes read from the transport
    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Take the next complete frame, or `None` until more bytes arrive
    pub fn next_frame(&mut self) -> Option<Frame> {
        if self.buf.len() < FRAME_HEADER_LEN {
            return None;
        }

        let len = u32::from_be_bytes([self.buf[4], self.buf[5], self.buf[6], self.buf[7]]) as usize;
        let end = FRAME_HEADER_LEN + len;
        if self.buf.len() < end {
            return None;
        }

        let stream_type = self.buf[0];
        let payload = self.buf[FRAME_HEADER_LEN..end].to_vec();
        self.buf.drain(..end);

        Some(Frame {
            stream_type,
            payload,
        })
    }

    /// Bytes buffered that do not yet form a complete frame
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

/// One line of the build-log stream
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildLogRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aux: Option<serde_json::Value>,
}

impl BuildLogRecord {
    pub fn stream(text: impl Into<String>) -> Self {
        Self {
            stream: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn image_id(id: impl Into<String>) -> Self {
        Self {
            aux: Some(serde_json::json!({ "ID": id.into() })),
            ..Default::default()
        }
    }

    /// Image id announced by the engine at the end of a successful build
    pub fn built_image_id(&self) -> Option<&str> {
        self.aux.as_ref()?.get("ID")?.as_str()
    }

    /// Serialize as one newline-terminated JSON line
    pub fn to_line(&self) -> Vec<u8> {
        let mut line = serde_json::to_vec(self).unwrap_or_else(|_| b"{}".to_vec());
        line.push(b'\n');
        line
    }
}

/// Incremental decoder for newline-delimited build-log JSON
#[derive(Debug, Default)]
pub struct BuildLogDecoder {
    buf: Vec<u8>,
}

impl BuildLogDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes read from the transport
    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Take the next well-formed record. Malformed lines are skipped.
    pub fn next_record(&mut self) -> Option<BuildLogRecord> {
        loop {
            let newline = self.buf.iter().position(|b| *b == b'\n')?;
            let line: Vec<u8> = self.buf.drain(..=newline).collect();
            if let Some(record) = parse_build_line(&line[..newline]) {
                return Some(record);
            }
        }
    }

    /// Decode whatever is left once the stream has ended
    pub fn finish(&mut self) -> Option<BuildLogRecord> {
        let rest = std::mem::take(&mut self.buf);
        parse_build_line(&rest)
    }
}

fn parse_build_line(line: &[u8]) -> Option<BuildLogRecord> {
    if line.iter().all(u8::is_ascii_whitespace) {
        return None;
    }
    match serde_json::from_slice::<BuildLogRecord>(line) {
        Ok(record) => Some(record),
        Err(e) => {
            tracing::trace!("Dropping malformed build log line: {}", e);
            None
        }
    }
}

/// Demultiplex an attach/exec frame stream into `sink`.
///
/// Returns once the stream ends. A truncated trailing frame is discarded.
pub async fn demux_frames<S>(mut stream: S, sink: &mut dyn LogSink) -> Result<()>
where
    S: Stream<Item = Result<Vec<u8>>> + Unpin,
{
    let mut decoder = FrameDecoder::new();

    while let Some(chunk) = stream.next().await {
        decoder.push(&chunk?);
        while let Some(frame) = decoder.next_frame() {
            sink.accept(frame.origin(), &frame.payload);
        }
    }

    if decoder.pending() > 0 {
        tracing::debug!(
            "Discarding {} bytes of truncated trailing frame",
            decoder.pending()
        );
    }

    Ok(())
}

/// Demultiplex a build-log stream into `sink`.
///
/// `stream` text is pushed as it arrives. An `error` record fails the build.
/// Returns the image id when the engine announced one.
pub async fn demux_build_log<S>(mut stream: S, sink: &mut dyn LogSink) -> Result<Option<String>>
where
    S: Stream<Item = Result<Vec<u8>>> + Unpin,
{
    let mut decoder = BuildLogDecoder::new();
    let mut image_id = None;

    loop {
        let chunk = match stream.next().await {
            Some(chunk) => chunk?,
            None => break,
        };
        decoder.push(&chunk);
        while let Some(record) = decoder.next_record() {
            apply_build_record(record, sink, &mut image_id)?;
        }
    }

    if let Some(record) = decoder.finish() {
        apply_build_record(record, sink, &mut image_id)?;
    }

    Ok(image_id)
}

fn apply_build_record(
    record: BuildLogRecord,
    sink: &mut dyn LogSink,
    image_id: &mut Option<String>,
) -> Result<()> {
    if let Some(ref text) = record.stream {
        sink.accept(StreamOrigin::RawJsonLine, text.as_bytes());
    }
    if let Some(error) = record.error {
        return Err(ProviderError::BuildError(error));
    }
    if let Some(id) = record.built_image_id() {
        *image_id = Some(id.to_string());
    }
    if let Some(ref status) = record.status {
        tracing::debug!("{}", status.trim());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunks(parts: Vec<Vec<u8>>) -> impl Stream<Item = Result<Vec<u8>>> + Unpin {
        futures::stream::iter(parts.into_iter().map(Ok))
    }

    fn decode_all(bytes: &[u8]) -> Vec<Frame> {
        let mut decoder = FrameDecoder::new();
        decoder.push(bytes);
        std::iter::from_fn(|| decoder.next_frame()).collect()
    }

    #[test]
    fn test_frame_round_trip_with_empty_payload() {
        let frames = vec![
            Frame::new(STDOUT_STREAM, b"hello\n".to_vec()),
            Frame::new(STDERR_STREAM, Vec::new()),
            Frame::new(STDERR_STREAM, b"warning: unused\n".to_vec()),
            Frame::new(STDOUT_STREAM, Vec::new()),
        ];
        let wire: Vec<u8> = frames.iter().flat_map(Frame::encode).collect();

        assert_eq!(decode_all(&wire), frames);
    }

    #[test]
    fn test_frame_header_layout() {
        let wire = encode_frame(STDERR_STREAM, &[0xAA; 0x0102]);
        assert_eq!(&wire[..FRAME_HEADER_LEN], &[2, 0, 0, 0, 0, 0, 0x01, 0x02]);
        assert_eq!(wire.len(), FRAME_HEADER_LEN + 0x0102);
    }

    #[test]
    fn test_frame_decoder_waits_for_complete_frames() {
        let wire = [encode_frame(1, b"abc"), encode_frame(2, b"de")].concat();
        let mut decoder = FrameDecoder::new();
        let mut decoded = Vec::new();

        for byte in &wire {
            decoder.push(std::slice::from_ref(byte));
            while let Some(frame) = decoder.next_frame() {
                decoded.push(frame);
            }
        }

        assert_eq!(
            decoded,
            vec![Frame::new(1, b"abc".to_vec()), Frame::new(2, b"de".to_vec())]
        );
        assert_eq!(decoder.pending(), 0);
    }

    #[test]
    fn test_unknown_stream_type_is_stdout() {
        assert_eq!(StreamOrigin::from_stream_type(0), StreamOrigin::Stdout);
        assert_eq!(StreamOrigin::from_stream_type(3), StreamOrigin::Stdout);
        assert_eq!(StreamOrigin::from_stream_type(2), StreamOrigin::Stderr);
    }

    #[tokio::test]
    async fn test_demux_frames_discards_truncated_tail() {
        let mut wire = encode_frame(1, b"complete");
        let tail = encode_frame(1, b"never finished");
        wire.extend_from_slice(&tail[..tail.len() - 3]);

        let mut sink: Vec<(StreamOrigin, Vec<u8>)> = Vec::new();
        demux_frames(chunks(vec![wire]), &mut sink).await.unwrap();

        assert_eq!(sink, vec![(StreamOrigin::Stdout, b"complete".to_vec())]);
    }

    #[tokio::test]
    async fn test_demux_frames_across_chunk_boundaries() {
        let wire = [
            encode_frame(1, b"out-1 "),
            encode_frame(2, b"err-1 "),
            encode_frame(1, b"out-2"),
        ]
        .concat();
        let parts: Vec<Vec<u8>> = wire.chunks(5).map(<[u8]>::to_vec).collect();

        let mut sink: Vec<(StreamOrigin, Vec<u8>)> = Vec::new();
        demux_frames(chunks(parts), &mut sink).await.unwrap();

        assert_eq!(
            sink,
            vec![
                (StreamOrigin::Stdout, b"out-1 ".to_vec()),
                (StreamOrigin::Stderr, b"err-1 ".to_vec()),
                (StreamOrigin::Stdout, b"out-2".to_vec()),
            ]
        );
    }

    #[tokio::test]
    async fn test_demux_frames_replay_is_byte_identical() {
        // Multi-byte UTF-8 split across two frames
        let text = "contrat compilé ✓\n".as_bytes();
        let wire = [encode_frame(1, &text[..15]), encode_frame(1, &text[15..])].concat();

        let mut first: Vec<u8> = Vec::new();
        let mut second: Vec<u8> = Vec::new();
        demux_frames(chunks(vec![wire.clone()]), &mut first).await.unwrap();
        demux_frames(chunks(wire.chunks(3).map(<[u8]>::to_vec).collect()), &mut second)
            .await
            .unwrap();

        assert_eq!(first, text);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_demux_frames_propagates_transport_error() {
        let stream = futures::stream::iter(vec![
            Ok(encode_frame(1, b"partial")),
            Err(ProviderError::Stream("connection reset".into())),
        ]);

        let mut sink: Vec<u8> = Vec::new();
        let err = demux_frames(stream, &mut sink).await.unwrap_err();

        assert!(matches!(err, ProviderError::Stream(_)));
        assert_eq!(sink, b"partial");
    }

    #[tokio::test]
    async fn test_build_log_drops_malformed_lines() {
        let wire = b"{\"stream\":\"a\\n\"}\nnot-json\n{\"stream\":\"b\\n\"}\n".to_vec();

        let mut sink: Vec<(StreamOrigin, Vec<u8>)> = Vec::new();
        let id = demux_build_log(chunks(vec![wire]), &mut sink).await.unwrap();

        assert_eq!(id, None);
        assert_eq!(
            sink,
            vec![
                (StreamOrigin::RawJsonLine, b"a\n".to_vec()),
                (StreamOrigin::RawJsonLine, b"b\n".to_vec()),
            ]
        );
    }

    #[tokio::test]
    async fn test_build_log_split_lines_and_unterminated_tail() {
        let parts = vec![
            b"{\"stream\":\"Step 1/2 : FROM ".to_vec(),
            b"eosio/eos\\n\"}\r\n{\"aux\":{\"ID\":\"sha256:feed\"}}\n{\"stream\":".to_vec(),
            b"\"Successfully built feed\\n\"}".to_vec(),
        ];

        let mut sink = String::new();
        let id = demux_build_log(chunks(parts), &mut sink).await.unwrap();

        assert_eq!(id.as_deref(), Some("sha256:feed"));
        assert_eq!(sink, "Step 1/2 : FROM eosio/eos\nSuccessfully built feed\n");
    }

    #[tokio::test]
    async fn test_build_log_error_event_fails() {
        let wire = [
            BuildLogRecord::stream("Step 1/3 : FROM nothing\n").to_line(),
            BuildLogRecord::error("pull access denied for nothing").to_line(),
            BuildLogRecord::stream("never shown\n").to_line(),
        ]
        .concat();

        let mut sink = String::new();
        let err = demux_build_log(chunks(vec![wire]), &mut sink)
            .await
            .unwrap_err();

        assert!(matches!(err, ProviderError::BuildError(msg) if msg.contains("pull access denied")));
        assert_eq!(sink, "Step 1/3 : FROM nothing\n");
    }

    #[test]
    fn test_build_log_decoder_is_deterministic() {
        let wire = b"{\"stream\":\"x\"}\ngarbage\n{\"status\":\"Downloading\"}\n";
        let run = || {
            let mut decoder = BuildLogDecoder::new();
            decoder.push(wire);
            std::iter::from_fn(|| decoder.next_record()).collect::<Vec<_>>()
        };

        let first = run();
        assert_eq!(first.len(), 2);
        assert_eq!(first, run());
    }

    #[test]
    fn test_channel_sink_forwards_text() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut sink = tx;
        sink.accept(StreamOrigin::RawJsonLine, b"Step 2/4\n");
        assert_eq!(rx.try_recv().unwrap(), "Step 2/4\n");
    }
}
