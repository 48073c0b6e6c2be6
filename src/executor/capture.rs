// Bounded line capture for child output streams

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::sync::watch;
use tracing::debug;

const DRAIN_CHUNK_BYTES: usize = 8192;

/// Bytes retained per line; the rest of an overlong line is discarded
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// Text retained from one output stream
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Captured {
    /// First `max_lines` lines, newline-joined, without a trailing newline
    pub text: String,
    /// True iff the stream produced more than `max_lines` lines
    pub truncated: bool,
}

/// Capture progress for one stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CaptureState {
    /// Retaining lines below the cap
    Reading,
    /// Cap reached; consuming and discarding the rest
    Draining,
    /// EOF or cancellation
    Closed,
}

/// Read `reader` to EOF, keeping at most `max_lines` lines.
///
/// After the cap the stream is still drained so the writer never blocks on
/// a full pipe. Capture ends early when `cancel` flips to true; whatever was
/// retained so far is returned.
pub async fn capture_lines<R>(
    reader: R,
    max_lines: usize,
    mut cancel: watch::Receiver<bool>,
) -> std::io::Result<Captured>
where
    R: AsyncRead + Unpin,
{
    let max_lines = max_lines.max(1);
    let mut reader = BufReader::new(reader);
    let mut lines: Vec<String> = Vec::new();
    let mut truncated = false;
    let mut state = CaptureState::Reading;
    let mut line_buf = Vec::new();
    let mut drain_buf = vec![0u8; DRAIN_CHUNK_BYTES];

    loop {
        let read = match state {
            CaptureState::Reading => {
                line_buf.clear();
                tokio::select! {
                    read = read_line_bounded(&mut reader, &mut line_buf, MAX_LINE_BYTES) => Some(read?),
                    _ = cancelled(&mut cancel) => None,
                }
            }
            CaptureState::Draining => {
                tokio::select! {
                    read = reader.read(&mut drain_buf) => Some(read?),
                    _ = cancelled(&mut cancel) => None,
                }
            }
            CaptureState::Closed => break,
        };

        match (state, read) {
            (_, Some(0)) => state = CaptureState::Closed,
            (CaptureState::Reading, Some(_)) if lines.len() == max_lines => {
                truncated = true;
                state = CaptureState::Draining;
                debug!(max_lines, "output cap reached, draining");
            }
            (CaptureState::Reading, Some(_)) => lines.push(decode_line(&line_buf)),
            (CaptureState::Draining | CaptureState::Closed, Some(_)) => {}
            (_, None) => {
                // Keep a partially read line
                if state == CaptureState::Reading
                    && !line_buf.is_empty()
                    && lines.len() < max_lines
                {
                    lines.push(decode_line(&line_buf));
                }
                debug!(lines = lines.len(), "capture cancelled");
                state = CaptureState::Closed;
            }
        }
    }

    Ok(Captured {
        text: lines.join("\n"),
        truncated,
    })
}

/// Read one line, keeping at most `limit` bytes of it in `buf`.
///
/// Returns the number of bytes consumed from `reader`, 0 at EOF. Bytes are
/// consumed as they are copied, so a cancelled read keeps what it had.
async fn read_line_bounded<R>(
    reader: &mut R,
    buf: &mut Vec<u8>,
    limit: usize,
) -> std::io::Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let mut consumed = 0;
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(consumed);
        }

        let (chunk, line_done) = match available.iter().position(|b| *b == b'\n') {
            Some(end) => (&available[..=end], true),
            None => (available, false),
        };
        let room = limit.saturating_sub(buf.len());
        buf.extend_from_slice(&chunk[..chunk.len().min(room)]);

        let used = chunk.len();
        reader.consume(used);
        consumed += used;
        if line_done {
            return Ok(consumed);
        }
    }
}

/// Resolves once `cancel` reads true; never resolves if the sender is gone.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    let sender_gone = cancel.wait_for(|c| *c).await.is_err();
    if sender_gone {
        std::future::pending::<()>().await;
    }
}

fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}
