//! Byte streams in, JSON-RPC frames out.
//!
//! Each connection has one reader loop and one writer loop. Frames are
//! dispatched concurrently, but responses leave in the order their requests
//! were decoded. A reply flagged `stop` fires the dispatcher's stop signal
//! after it has been flushed, and the writer takes no further responses.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Framing;
use crate::dispatch::{error_response, Dispatcher, Reply};
use crate::error::INVALID_REQUEST;

const MAX_IN_FLIGHT: usize = 64;
const MAX_HEADER_LINE: usize = 1024;

/// How a frame arrived, so the answer goes back the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Line,
    Header,
    Prefixed,
}

#[derive(Debug, PartialEq)]
pub enum ReadOutcome {
    Frame(FrameKind, Vec<u8>),
    /// Body was larger than the limit and has been skipped.
    Oversize(FrameKind, usize),
    Eof,
}

/// Read one line, keeping at most `max` bytes. The bool is true when the
/// line was longer and got truncated (the rest is consumed).
async fn read_line_capped<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    max: usize,
) -> io::Result<Option<(Vec<u8>, bool)>> {
    let mut line = Vec::new();
    let mut overflow = false;
    let mut seen_any = false;
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(if seen_any { Some((line, overflow)) } else { None });
        }
        seen_any = true;
        let (chunk, done) = match available.iter().position(|b| *b == b'\n') {
            Some(i) => (&available[..i], i + 1),
            None => (available, available.len()),
        };
        if !overflow {
            if line.len() + chunk.len() > max {
                overflow = true;
                line.clear();
            } else {
                line.extend_from_slice(chunk);
            }
        }
        let found_newline = done > chunk.len();
        reader.consume(done);
        if found_newline {
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            return Ok(Some((line, overflow)));
        }
    }
}

fn parse_content_length(line: &[u8]) -> Option<usize> {
    let text = std::str::from_utf8(line).ok()?;
    let (name, value) = text.split_once(':')?;
    if !name.trim().eq_ignore_ascii_case("content-length") {
        return None;
    }
    value.trim().parse().ok()
}

async fn skip_bytes<R: AsyncRead + Unpin>(reader: &mut R, len: usize) -> io::Result<()> {
    let mut limited = reader.take(len as u64);
    tokio::io::copy(&mut limited, &mut tokio::io::sink()).await?;
    Ok(())
}

/// Read the next frame. Blank lines are skipped in line mode.
pub async fn read_frame<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    framing: Framing,
    max_frame_bytes: usize,
) -> io::Result<ReadOutcome> {
    match framing {
        Framing::LengthPrefixed => {
            let len = match reader.read_u32_le().await {
                Ok(len) => len as usize,
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(ReadOutcome::Eof),
                Err(e) => return Err(e),
            };
            if len > max_frame_bytes {
                skip_bytes(reader, len).await?;
                return Ok(ReadOutcome::Oversize(FrameKind::Prefixed, len));
            }
            let mut body = vec![0u8; len];
            reader.read_exact(&mut body).await?;
            Ok(ReadOutcome::Frame(FrameKind::Prefixed, body))
        }
        Framing::Lines => loop {
            let Some((line, overflow)) = read_line_capped(reader, max_frame_bytes).await? else {
                return Ok(ReadOutcome::Eof);
            };
            if overflow {
                return Ok(ReadOutcome::Oversize(FrameKind::Line, max_frame_bytes + 1));
            }
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            let Some(len) = parse_content_length(&line) else {
                return Ok(ReadOutcome::Frame(FrameKind::Line, line));
            };
            // Header block runs to the first empty line.
            loop {
                match read_line_capped(reader, MAX_HEADER_LINE).await? {
                    None => return Ok(ReadOutcome::Eof),
                    Some((header, _)) if header.is_empty() => break,
                    Some(_) => {}
                }
            }
            if len > max_frame_bytes {
                skip_bytes(reader, len).await?;
                return Ok(ReadOutcome::Oversize(FrameKind::Header, len));
            }
            let mut body = vec![0u8; len];
            reader.read_exact(&mut body).await?;
            return Ok(ReadOutcome::Frame(FrameKind::Header, body));
        },
    }
}

pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    kind: FrameKind,
    message: &Value,
) -> io::Result<()> {
    let body = serde_json::to_vec(message)?;
    match kind {
        FrameKind::Line => {
            writer.write_all(&body).await?;
            writer.write_all(b"\n").await?;
        }
        FrameKind::Header => {
            let header = format!("Content-Length: {}\r\n\r\n", body.len());
            writer.write_all(header.as_bytes()).await?;
            writer.write_all(&body).await?;
        }
        FrameKind::Prefixed => {
            let len = u32::try_from(body.len())
                .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "response too large"))?;
            writer.write_all(&len.to_le_bytes()).await?;
            writer.write_all(&body).await?;
        }
    }
    writer.flush().await
}

type Pending = JoinHandle<(FrameKind, Reply)>;

/// Serve one connection until the peer closes it.
///
/// In-flight work from a dropped connection still runs to completion; its
/// responses are discarded.
pub async fn serve_connection<R, W>(
    reader: R,
    writer: W,
    dispatcher: Arc<Dispatcher>,
    framing: Framing,
    max_frame_bytes: usize,
    label: &str,
) -> io::Result<()>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let mut reader = BufReader::new(reader);
    let (tx, mut rx) = mpsc::channel::<Pending>(MAX_IN_FLIGHT);

    let writer_label = label.to_string();
    let stopper = dispatcher.clone();
    let writer_task = tokio::spawn(async move {
        let mut writer = writer;
        while let Some(pending) = rx.recv().await {
            let (kind, reply) = match pending.await {
                Ok(outgoing) => outgoing,
                Err(e) => {
                    warn!(target: "transport", conn = %writer_label, error = %e, "dispatch task failed");
                    continue;
                }
            };
            if let Some(response) = &reply.response {
                if let Err(e) = write_frame(&mut writer, kind, response).await {
                    debug!(target: "transport", conn = %writer_label, error = %e, "peer gone, dropping responses");
                    return Err(e);
                }
            }
            if reply.stop {
                info!(target: "transport", conn = %writer_label, "peer requested shutdown");
                stopper.request_stop();
                break;
            }
        }
        Ok(())
    });

    let read_result = loop {
        let pending: Pending = match read_frame(&mut reader, framing, max_frame_bytes).await {
            Ok(ReadOutcome::Frame(kind, body)) => {
                let dispatcher = dispatcher.clone();
                tokio::spawn(async move { (kind, dispatcher.reply_to_frame(&body).await) })
            }
            Ok(ReadOutcome::Oversize(kind, len)) => {
                warn!(target: "transport", conn = %label, len, limit = max_frame_bytes, "oversized frame skipped");
                let response = error_response(
                    Value::Null,
                    INVALID_REQUEST,
                    format!("frame exceeds {max_frame_bytes} bytes"),
                );
                tokio::spawn(async move {
                    (
                        kind,
                        Reply {
                            response: Some(response),
                            stop: false,
                        },
                    )
                })
            }
            Ok(ReadOutcome::Eof) => break Ok(()),
            Err(e) => break Err(e),
        };
        if tx.send(pending).await.is_err() {
            // Writer has stopped; nothing more can be answered.
            break Ok(());
        }
    };
    drop(tx);

    let write_result = match writer_task.await {
        Ok(result) => result,
        Err(e) => Err(io::Error::other(e)),
    };
    debug!(target: "transport", conn = %label, "connection closed");
    read_result.and(write_result.or_else(|e| {
        if e.kind() == io::ErrorKind::BrokenPipe {
            Ok(())
        } else {
            Err(e)
        }
    }))
}

/// Serve the process's own stdin/stdout until stdin closes or shutdown fires.
pub async fn serve_stdio(
    dispatcher: Arc<Dispatcher>,
    max_frame_bytes: usize,
    mut shutdown: broadcast::Receiver<()>,
) -> io::Result<()> {
    info!(target: "transport", "serving on stdio");
    tokio::select! {
        result = serve_connection(
            tokio::io::stdin(),
            tokio::io::stdout(),
            dispatcher,
            Framing::Lines,
            max_frame_bytes,
            "stdio",
        ) => result,
        _ = shutdown.recv() => Ok(()),
    }
}

/// Local socket endpoint. Only the owning user can connect.
pub struct IpcServer {
    path: PathBuf,
    framing: Framing,
    max_frame_bytes: usize,
    #[cfg(unix)]
    listener: tokio::net::UnixListener,
}

#[cfg(unix)]
impl IpcServer {
    pub fn bind(path: &Path, framing: Framing, max_frame_bytes: usize) -> io::Result<Self> {
        use std::os::unix::fs::PermissionsExt;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        let listener = tokio::net::UnixListener::bind(path)?;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        info!(target: "transport", path = %path.display(), ?framing, "ipc listening");
        Ok(Self {
            path: path.to_path_buf(),
            framing,
            max_frame_bytes,
            listener,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Accept connections until shutdown. Each peer gets its own task.
    pub async fn run(self, dispatcher: Arc<Dispatcher>, mut shutdown: broadcast::Receiver<()>) -> io::Result<()> {
        let mut next_peer = 0u64;
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, _)) => {
                            next_peer += 1;
                            let label = format!("ipc-{next_peer}");
                            let dispatcher = dispatcher.clone();
                            let (framing, max) = (self.framing, self.max_frame_bytes);
                            tokio::spawn(async move {
                                let (reader, writer) = stream.into_split();
                                if let Err(e) =
                                    serve_connection(reader, writer, dispatcher, framing, max, &label).await
                                {
                                    debug!(target: "transport", conn = %label, error = %e, "ipc peer ended");
                                }
                            });
                        }
                        Err(e) => warn!(target: "transport", error = %e, "ipc accept failed"),
                    }
                }
                _ = shutdown.recv() => {
                    info!(target: "transport", "ipc shutting down");
                    break;
                }
            }
        }
        Ok(())
    }
}

#[cfg(not(unix))]
impl IpcServer {
    pub fn bind(path: &Path, _framing: Framing, _max_frame_bytes: usize) -> io::Result<Self> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            format!("ipc socket {} needs a unix platform", path.display()),
        ))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn run(self, _dispatcher: Arc<Dispatcher>, _shutdown: broadcast::Receiver<()>) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::tests::test_dispatcher;
    use crate::error::METHOD_NOT_FOUND;
    use serde_json::json;
    use std::time::Duration;
    use tokio::io::{duplex, DuplexStream};

    fn spawn_conn(
        dispatcher: Arc<Dispatcher>,
        framing: Framing,
        max: usize,
    ) -> (DuplexStream, JoinHandle<io::Result<()>>) {
        let (client, server) = duplex(64 * 1024);
        let (reader, writer) = tokio::io::split(server);
        let handle = tokio::spawn(async move {
            serve_connection(reader, writer, dispatcher, framing, max, "test").await
        });
        (client, handle)
    }

    async fn next_line(reader: &mut BufReader<tokio::io::ReadHalf<DuplexStream>>) -> Value {
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        serde_json::from_str(&line).unwrap()
    }

    #[tokio::test]
    async fn responses_follow_request_order() {
        let (d, _archive) = test_dispatcher("transport_order", Duration::from_secs(5));
        let (client, server) = spawn_conn(Arc::new(d), Framing::Lines, 1 << 20);
        let (read_half, mut write_half) = tokio::io::split(client);
        let mut reader = BufReader::new(read_half);

        let mut batch = String::new();
        for id in 1..=20 {
            batch.push_str(&format!(
                "{{\"jsonrpc\":\"2.0\",\"id\":{id},\"method\":\"tools/call\",\"params\":{{\"name\":\"get_archive_stats\"}}}}\n"
            ));
        }
        batch.push('\n');
        write_half.write_all(batch.as_bytes()).await.unwrap();

        for id in 1..=20 {
            let resp = next_line(&mut reader).await;
            assert_eq!(resp["id"], id);
            assert_eq!(resp["result"]["origin"], "archive");
        }
        write_half.shutdown().await.unwrap();
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn malformed_frame_keeps_loop_alive() {
        let (d, _archive) = test_dispatcher("transport_malformed", Duration::from_secs(5));
        let (client, server) = spawn_conn(Arc::new(d), Framing::Lines, 1 << 20);
        let (read_half, mut write_half) = tokio::io::split(client);
        let mut reader = BufReader::new(read_half);

        write_half
            .write_all(b"{oops\n{\"jsonrpc\":\"2.0\",\"id\":\"x\",\"method\":\"nope\"}\n{\"jsonrpc\":\"2.0\",\"id\":2,\"method\":\"ping\"}\n")
            .await
            .unwrap();
        let parse = next_line(&mut reader).await;
        assert_eq!(parse["error"]["code"], crate::error::PARSE_ERROR);
        let unknown = next_line(&mut reader).await;
        assert_eq!(unknown["id"], "x");
        assert_eq!(unknown["error"]["code"], METHOD_NOT_FOUND);
        let ping = next_line(&mut reader).await;
        assert_eq!(ping["id"], 2);

        write_half.shutdown().await.unwrap();
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn content_length_frames_are_answered_in_kind() {
        let (d, _archive) = test_dispatcher("transport_header", Duration::from_secs(5));
        let (client, server) = spawn_conn(Arc::new(d), Framing::Lines, 1 << 20);
        let (read_half, mut write_half) = tokio::io::split(client);
        let mut reader = BufReader::new(read_half);

        let body = br#"{"jsonrpc":"2.0","id":9,"method":"ping"}"#;
        let frame = format!("Content-Length: {}\r\n\r\n", body.len());
        write_half.write_all(frame.as_bytes()).await.unwrap();
        write_half.write_all(body).await.unwrap();

        match read_frame(&mut reader, Framing::Lines, 1 << 20).await.unwrap() {
            ReadOutcome::Frame(FrameKind::Header, body) => {
                let resp: Value = serde_json::from_slice(&body).unwrap();
                assert_eq!(resp["id"], 9);
                assert_eq!(resp["result"], json!({}));
            }
            other => panic!("unexpected {other:?}"),
        }
        write_half.shutdown().await.unwrap();
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn length_prefixed_frames() {
        let (d, _archive) = test_dispatcher("transport_prefixed", Duration::from_secs(5));
        let (client, server) = spawn_conn(Arc::new(d), Framing::LengthPrefixed, 64);
        let (read_half, mut write_half) = tokio::io::split(client);
        let mut reader = BufReader::new(read_half);

        // Too big: skipped and answered, then a normal frame still works.
        let big = vec![b' '; 100];
        write_half.write_all(&(big.len() as u32).to_le_bytes()).await.unwrap();
        write_half.write_all(&big).await.unwrap();
        let body = br#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#;
        write_half.write_all(&(body.len() as u32).to_le_bytes()).await.unwrap();
        write_half.write_all(body).await.unwrap();

        let first = read_frame(&mut reader, Framing::LengthPrefixed, 1 << 20).await.unwrap();
        let ReadOutcome::Frame(FrameKind::Prefixed, first) = first else {
            panic!("expected a frame");
        };
        let first: Value = serde_json::from_slice(&first).unwrap();
        assert_eq!(first["error"]["code"], INVALID_REQUEST);

        let second = read_frame(&mut reader, Framing::LengthPrefixed, 1 << 20).await.unwrap();
        let ReadOutcome::Frame(_, second) = second else {
            panic!("expected a frame");
        };
        let second: Value = serde_json::from_slice(&second).unwrap();
        assert_eq!(second["id"], 1);

        write_half.shutdown().await.unwrap();
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn shutdown_request_is_answered_before_stop_fires() {
        let (d, _archive) = test_dispatcher("transport_shutdown", Duration::from_secs(5));
        let d = Arc::new(d);
        let mut stop = d.subscribe_shutdown();
        let (client, server) = spawn_conn(d, Framing::Lines, 1 << 20);
        let (read_half, mut write_half) = tokio::io::split(client);
        let mut reader = BufReader::new(read_half);

        write_half
            .write_all(b"{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"shutdown\"}\n")
            .await
            .unwrap();
        let resp = next_line(&mut reader).await;
        assert_eq!(resp["id"], 1);
        assert_eq!(resp["result"], Value::Null);
        tokio::time::timeout(Duration::from_secs(2), stop.recv())
            .await
            .unwrap()
            .unwrap();

        write_half.shutdown().await.unwrap();
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn overlong_line_is_rejected_not_fatal() {
        let mut input: &[u8] = b"aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa\n{\"id\":1}\n";
        let first = read_frame(&mut input, Framing::Lines, 16).await.unwrap();
        assert!(matches!(first, ReadOutcome::Oversize(FrameKind::Line, _)));
        let second = read_frame(&mut input, Framing::Lines, 16).await.unwrap();
        assert_eq!(second, ReadOutcome::Frame(FrameKind::Line, b"{\"id\":1}".to_vec()));
        assert_eq!(read_frame(&mut input, Framing::Lines, 16).await.unwrap(), ReadOutcome::Eof);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn ipc_socket_is_private_and_removed() {
        use std::os::unix::fs::PermissionsExt;

        let (d, _archive) = test_dispatcher("transport_ipc", Duration::from_secs(5));
        let dir = std::env::temp_dir().join("chatgate_test");
        let path = dir.join(format!("ipc_{}.sock", std::process::id()));
        let server = IpcServer::bind(&path, Framing::Lines, 1 << 20).unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);

        let (tx, rx) = broadcast::channel(1);
        let task = tokio::spawn(server.run(Arc::new(d), rx));

        let stream = tokio::net::UnixStream::connect(&path).await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        write_half
            .write_all(b"{\"jsonrpc\":\"2.0\",\"id\":3,\"method\":\"ping\"}\n")
            .await
            .unwrap();
        let mut reader = BufReader::new(read_half);
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        let resp: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(resp["id"], 3);

        tx.send(()).unwrap();
        task.await.unwrap().unwrap();
        assert!(!path.exists());
    }
}
