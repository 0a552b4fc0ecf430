use crate::auth::{AuthedIdentity, Authenticator};
use crate::cache::ProgressRecord;
use crate::config::StreamConfig;
use crate::connections::ConnectionRegistry;
use crate::message::{
    peek_frame_type, AuthFrame, AuthResponseFrame, ErrorFrame, ProgressBroadcastFrame, ProgressUpdateFrame,
};
use crate::store::HybridProgressStore;
use chrono::Utc;
use db::models::ProgressStatus;
use log::{debug, info, warn};
use provider::TokenBucket;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// The Progress Stream Server: accepts long-lived duplex TCP
/// connections carrying newline-delimited JSON, authenticates each on
/// its first message, admits steady-state traffic under a per-connection
/// token bucket, and broadcasts progress updates to every other live
/// connection.
pub struct StreamServer {
    config: StreamConfig,
    store: HybridProgressStore,
    authenticator: Arc<dyn Authenticator>,
    registry: ConnectionRegistry,
    /// Cancelled only by `stop()`, after the shutdown warning has been
    /// broadcast and its grace period has elapsed. Distinct from the
    /// root cancellation token passed to `run`, which only stops the
    /// accept loop so the warning has time to reach live connections.
    closing: CancellationToken,
}

/// Outcome of a capped line read: either a complete line, EOF, or a line
/// that hit the byte cap before a newline arrived.
enum LineRead {
    Line(usize),
    TooLarge,
    Eof,
}

/// Reads one newline-delimited line, bounding the buffer itself to
/// `max_bytes` via `AsyncReadExt::take` rather than checking the length
/// only after the whole line has already been buffered. If the cap is
/// hit before a newline shows up, drains the remainder of that line
/// straight from the reader so the leftover bytes aren't parsed as the
/// start of the next message.
async fn read_line_capped(
    reader: &mut BufReader<OwnedReadHalf>,
    max_bytes: usize,
    line: &mut String,
) -> std::io::Result<LineRead> {
    line.clear();
    let read = {
        let mut limited = (&mut *reader).take(max_bytes as u64);
        limited.read_line(line).await?
    };

    if read == 0 {
        return Ok(LineRead::Eof);
    }
    if line.ends_with('\n') {
        return Ok(LineRead::Line(read));
    }

    loop {
        let buf = reader.fill_buf().await?;
        if buf.is_empty() {
            break;
        }
        match buf.iter().position(|&b| b == b'\n') {
            Some(pos) => {
                reader.consume(pos + 1);
                break;
            }
            None => {
                let len = buf.len();
                reader.consume(len);
            }
        }
    }

    Ok(LineRead::TooLarge)
}

impl StreamServer {
    pub fn new(config: StreamConfig, store: HybridProgressStore, authenticator: Arc<dyn Authenticator>) -> Self {
        Self {
            config,
            store,
            authenticator,
            registry: ConnectionRegistry::new(),
            closing: CancellationToken::new(),
        }
    }

    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    /// Accepts connections until `cancel` fires, then runs the shutdown
    /// sequence and waits for every connection task to drain.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) -> std::io::Result<()> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        info!("progress stream server listening on {}", self.config.bind_addr);

        let mut handles = Vec::new();

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((socket, addr)) => {
                        let this = self.clone();
                        handles.push(tokio::spawn(async move { this.handle_connection(socket, addr).await }));
                    }
                    Err(err) => warn!("error accepting a progress stream connection: {err}"),
                },
            }
        }

        self.stop().await;

        for handle in handles {
            if let Err(err) = handle.await {
                warn!("progress stream connection task panicked: {err}");
            }
        }

        Ok(())
    }

    /// Broadcasts a system-level shutdown warning, waits out the grace
    /// period, then signals every connection to close. `run` still waits
    /// for each connection task to actually finish after this returns.
    async fn stop(&self) {
        let warning = serde_json::json!({
            "type": "shutdown",
            "message": "server is shutting down",
            "grace_period_secs": self.config.shutdown_warning_secs,
        });
        if let Ok(line) = serde_json::to_string(&warning) {
            self.registry.broadcast_all(line).await;
        }

        tokio::time::sleep(Duration::from_secs(self.config.shutdown_warning_secs)).await;
        self.closing.cancel();
    }

    async fn handle_connection(self: Arc<Self>, socket: TcpStream, peer: std::net::SocketAddr) {
        let (read_half, mut write_half) = socket.into_split();
        let mut reader = BufReader::new(read_half);

        let mut line = String::new();
        let handshake = tokio::time::timeout(
            Duration::from_secs(self.config.handshake_deadline_secs),
            read_line_capped(&mut reader, self.config.max_message_bytes, &mut line),
        )
        .await;

        let identity = match handshake {
            Ok(Ok(LineRead::Eof)) => {
                debug!("{peer} disconnected before completing the handshake");
                return;
            }
            Ok(Ok(LineRead::TooLarge)) => {
                debug!("{peer} sent an oversized handshake line");
                return;
            }
            Ok(Ok(LineRead::Line(_))) => match self.perform_handshake(&line, &mut write_half).await {
                Some(identity) => identity,
                None => return,
            },
            Ok(Err(err)) => {
                warn!("error reading the handshake from {peer}: {err}");
                return;
            }
            Err(_elapsed) => {
                debug!("{peer} did not complete the handshake within the deadline");
                return;
            }
        };

        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
        let conn_id = self.registry.register(identity.user_id, outbound_tx);
        info!("connection {conn_id} from {peer} authenticated as user {}", identity.user_id);

        let writer_task = tokio::spawn(async move {
            while let Some(line) = outbound_rx.recv().await {
                if write_half.write_all(line.as_bytes()).await.is_err() {
                    break;
                }
                if write_half.write_all(b"\n").await.is_err() {
                    break;
                }
            }
        });

        let bucket = TokenBucket::new(self.config.admission.refill_per_second, self.config.admission.burst);
        self.read_loop(conn_id, &identity, &mut reader, &bucket).await;

        self.registry.remove(conn_id);
        if let Err(err) = writer_task.await {
            warn!("connection {conn_id} writer task panicked: {err}");
        }
        info!("connection {conn_id} closed");
    }

    /// Reads the first line, which must be `{type:"auth", data:{token}}`,
    /// and validates it against the authenticator. Any failure — bad
    /// JSON, wrong frame type, or a rejected token — gets the same
    /// `auth_response{success:false}` reply before the connection closes.
    async fn perform_handshake(&self, raw_line: &str, write_half: &mut OwnedWriteHalf) -> Option<AuthedIdentity> {
        let value: serde_json::Value = match serde_json::from_str(raw_line.trim_end()) {
            Ok(value) => value,
            Err(_) => {
                self.write_frame(write_half, &AuthResponseFrame::new(false)).await;
                return None;
            }
        };

        if peek_frame_type(&value) != Some("auth") {
            self.write_frame(write_half, &AuthResponseFrame::new(false)).await;
            return None;
        }

        let frame: AuthFrame = match serde_json::from_value(value) {
            Ok(frame) => frame,
            Err(_) => {
                self.write_frame(write_half, &AuthResponseFrame::new(false)).await;
                return None;
            }
        };

        match self.authenticator.authenticate(&frame.data.token).await {
            Some(identity) => {
                self.write_frame(write_half, &AuthResponseFrame::new(true)).await;
                Some(identity)
            }
            None => {
                self.write_frame(write_half, &AuthResponseFrame::new(false)).await;
                None
            }
        }
    }

    async fn write_frame<T: Serialize>(&self, write_half: &mut OwnedWriteHalf, frame: &T) {
        let Ok(mut bytes) = serde_json::to_vec(frame) else {
            return;
        };
        bytes.push(b'\n');
        let _ = write_half.write_all(&bytes).await;
    }

    async fn read_loop(
        &self,
        conn_id: u64,
        identity: &AuthedIdentity,
        reader: &mut BufReader<OwnedReadHalf>,
        bucket: &TokenBucket,
    ) {
        let steady_deadline = Duration::from_secs(self.config.steady_state_deadline_secs);
        let mut line = String::new();

        loop {
            let read = tokio::select! {
                biased;
                _ = self.closing.cancelled() => {
                    debug!("connection {conn_id} closing for server shutdown");
                    return;
                }
                result = tokio::time::timeout(
                    steady_deadline,
                    read_line_capped(reader, self.config.max_message_bytes, &mut line),
                ) => result,
            };

            match read {
                Ok(Ok(LineRead::Eof)) => {
                    debug!("connection {conn_id} closed by peer");
                    return;
                }
                Ok(Ok(LineRead::TooLarge)) => {
                    self.reply_error(conn_id, "message_too_large", "message exceeds the maximum size");
                    continue;
                }
                Ok(Ok(LineRead::Line(_))) => {
                    if !bucket.try_acquire().await {
                        self.reply_error(conn_id, "rate_limited", "admission rate exceeded, message dropped");
                        continue;
                    }

                    if !self.handle_message(conn_id, identity, &line).await {
                        return;
                    }
                }
                Ok(Err(err)) => {
                    warn!("connection {conn_id} read error: {err}");
                    return;
                }
                Err(_elapsed) => {
                    debug!("connection {conn_id} idle past the steady-state deadline");
                    return;
                }
            }
        }
    }

    fn reply_error(&self, conn_id: u64, code: &'static str, message: &str) {
        if let Ok(line) = serde_json::to_string(&ErrorFrame::new(code, message)) {
            self.registry.send_to(conn_id, line);
        }
    }

    /// Returns `false` if the connection should be closed (the only
    /// connection-terminating case is an authorization failure: a
    /// `progress_update` naming a foreign user id).
    async fn handle_message(&self, conn_id: u64, identity: &AuthedIdentity, raw_line: &str) -> bool {
        let value: serde_json::Value = match serde_json::from_str(raw_line.trim_end()) {
            Ok(value) => value,
            Err(err) => {
                debug!("connection {conn_id} sent invalid JSON: {err}");
                return true;
            }
        };

        if peek_frame_type(&value) == Some("progress_update") {
            return self.handle_progress_update(conn_id, identity, value).await;
        }

        // Any other valid JSON is an opaque presence/typing signal:
        // broadcast it verbatim to every other connection.
        self.registry.broadcast_others(conn_id, raw_line.trim_end().to_string()).await;
        true
    }

    async fn handle_progress_update(&self, conn_id: u64, identity: &AuthedIdentity, value: serde_json::Value) -> bool {
        let frame: ProgressUpdateFrame = match serde_json::from_value(value) {
            Ok(frame) => frame,
            Err(err) => {
                self.reply_error(conn_id, "bad_request", &format!("malformed progress_update: {err}"));
                return true;
            }
        };

        if frame.user_id != identity.user_id {
            warn!(
                "connection {conn_id} (user {}) sent a progress_update for foreign user {}",
                identity.user_id, frame.user_id
            );
            self.reply_error(conn_id, "forbidden", "user_id does not match the authenticated connection");
            return false;
        }

        if frame.manga_id <= 0 || frame.chapter < 0 {
            self.reply_error(conn_id, "bad_request", "manga_id must be positive and chapter must be non-negative");
            return true;
        }

        let existing = self.store.get(frame.user_id, frame.manga_id).await.ok().flatten();
        let (status, page) = match existing {
            Some(existing) => (existing.status, existing.page),
            None => (ProgressStatus::Reading.to_string(), None),
        };

        let record = ProgressRecord {
            user_id: frame.user_id,
            catalog_id: frame.manga_id,
            current_chapter: frame.chapter,
            status,
            page,
            updated_at: Utc::now(),
        };

        if let Err(err) = self.store.save(record).await {
            warn!("connection {conn_id}: failed to save progress update: {err}");
            self.reply_error(conn_id, "internal_error", "failed to persist the progress update");
            return true;
        }

        let broadcast = ProgressBroadcastFrame::new(frame.user_id, frame.manga_id, frame.chapter);
        if let Ok(line) = serde_json::to_string(&broadcast) {
            self.registry.broadcast_others(conn_id, line).await;
        }

        true
    }
}
