use crate::comm::config::CommConfig;
use crate::comm::error::{CommError, CommInitError, Result};
use crate::comm::protocol::{
    HEADER_LEN, decode_header, decode_request_payload, encode_bounded_response,
    encode_request_ack,
};
use crate::comm::types::{MsgType, ResponsePayload, ToolRequest, ToolResponse};
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Sequence deduplication entry
#[derive(Debug)]
struct DedupEntry {
    /// When this entry was created
    instant: Instant,
    /// Cached response to resend if duplicate
    cached_response: Option<Vec<u8>>,
}

type DedupTable = HashMap<SocketAddr, HashMap<u32, DedupEntry>>;

/// Comm server - handles UDP communication with clients
pub struct Comm {
    socket: UdpSocket,
    config: CommConfig,
    /// Channel sender to forward tool calls to the dispatcher
    loop_sender: mpsc::Sender<ToolRequest>,
    /// Sequence deduplication table per client
    dedup: Mutex<DedupTable>,
}

impl Comm {
    /// Get local socket address
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

impl Comm {
    /// Create a new Comm instance and bind UDP socket
    /// Returns the comm instance and receiver of tool calls for the dispatcher
    pub async fn new(
        config: CommConfig,
    ) -> std::result::Result<(Comm, mpsc::Receiver<ToolRequest>), CommInitError> {
        let addr = config.bind_addr();
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| CommInitError::Bind { addr, source })?;

        if let Ok(addr) = socket.local_addr() {
            info!("Comm listening on {}", addr);
        }

        let (tx, rx) = mpsc::channel(1024);

        Ok((
            Self {
                socket,
                config,
                loop_sender: tx,
                dedup: Mutex::new(HashMap::new()),
            },
            rx,
        ))
    }

    /// Run the Comm server
    ///
    /// Each request is handled in its own task so a long-running tool never
    /// blocks the receive loop.
    pub async fn run(self) -> Result<()> {
        let this = Arc::new(self);
        // Extra space for header
        let mut buf = vec![0u8; this.config.max_payload_bytes + 1024];
        let mut cleanup_interval = tokio::time::interval(Duration::from_secs(30));

        loop {
            tokio::select! {
                result = this.socket.recv_from(&mut buf) => {
                    match result {
                        Ok((len, addr)) => {
                            let packet = buf[..len].to_vec();
                            let comm = Arc::clone(&this);
                            tokio::spawn(async move {
                                if let Err(e) = comm.handle_packet(&packet, addr).await {
                                    warn!("Failed to handle packet from {}: {}", addr, e);
                                }
                            });
                        }
                        Err(e) => {
                            error!("Recv error: {}", e);
                            return Err(CommError::Recv(e));
                        }
                    }
                }
                _ = cleanup_interval.tick() => {
                    // Periodic cleanup of dedup table
                    this.cleanup_dedup().await;
                }
            }
        }
    }

    /// Handle incoming packet
    async fn handle_packet(&self, packet: &[u8], client_addr: SocketAddr) -> Result<()> {
        if packet.len() < HEADER_LEN {
            warn!(
                "Truncated packet from {}: only {} bytes",
                client_addr,
                packet.len()
            );
            return Err(CommError::Decode("packet too short".to_string()));
        }

        let payload_len = packet.len() - HEADER_LEN;
        if payload_len > self.config.max_payload_bytes {
            warn!(
                "Payload too large from {}: {} bytes",
                client_addr, payload_len
            );
            return Err(CommError::PayloadTooLarge {
                size: payload_len,
                limit: self.config.max_payload_bytes,
            });
        }

        let (msg_type, seq) = decode_header(packet)?;
        let payload = &packet[HEADER_LEN..];

        debug!(
            "Received {} from {} seq={}",
            msg_type as u8, client_addr, seq
        );

        match msg_type {
            MsgType::Request => self.handle_request(payload, seq, client_addr).await,
            _ => {
                warn!(
                    "Unexpected message type: {} from {}",
                    msg_type as u8, client_addr
                );
                Ok(())
            }
        }
    }

    async fn send(&self, bytes: &[u8], client_addr: SocketAddr) -> Result<()> {
        self.socket
            .send_to(bytes, client_addr)
            .await
            .map_err(CommError::Send)?;
        Ok(())
    }

    /// Register `seq` for `client_addr`; returns the reply owed to a duplicate
    async fn register(&self, seq: u32, client_addr: SocketAddr) -> Result<Option<Vec<u8>>> {
        let mut dedup = self.dedup.lock().await;
        let client_entries = dedup.entry(client_addr).or_default();

        if client_entries.len() >= self.config.dedup_capacity
            && !client_entries.contains_key(&seq)
        {
            // Remove oldest entry to make room
            let oldest_seq = client_entries
                .iter()
                .min_by_key(|(_, e)| e.instant)
                .map(|(seq, _)| *seq);
            if let Some(seq_to_remove) = oldest_seq {
                client_entries.remove(&seq_to_remove);
                debug!(
                    "Dedup table at capacity, removed oldest entry seq={}",
                    seq_to_remove
                );
            }
        }

        match client_entries.entry(seq) {
            Entry::Occupied(entry) => match &entry.get().cached_response {
                Some(cached) => {
                    info!(
                        "Duplicate request seq={} from {}, resending cached response",
                        seq, client_addr
                    );
                    Ok(Some(cached.clone()))
                }
                None => {
                    // First copy still running
                    debug!(
                        "Duplicate request seq={} from {}, no cached response yet, sending ACK",
                        seq, client_addr
                    );
                    Ok(Some(encode_request_ack(seq)?))
                }
            },
            Entry::Vacant(entry) => {
                // Created before processing so duplicates during processing are recognized
                entry.insert(DedupEntry {
                    instant: Instant::now(),
                    cached_response: None,
                });
                Ok(None)
            }
        }
    }

    /// Handle incoming REQUEST
    async fn handle_request(
        &self,
        payload_bytes: &[u8],
        seq: u32,
        client_addr: SocketAddr,
    ) -> Result<()> {
        if let Some(reply) = self.register(seq, client_addr).await? {
            return self.send(&reply, client_addr).await;
        }

        let request_payload = match decode_request_payload(payload_bytes) {
            Ok(p) => p,
            Err(e) => {
                // Undecodable requests can be retried once fixed
                self.forget(seq, client_addr).await;
                return Err(e);
            }
        };

        info!(
            "New request seq={} from {} tool={}",
            seq, client_addr, request_payload.tool
        );

        // Send ACK immediately
        let ack = encode_request_ack(seq)?;
        if let Err(e) = self.send(&ack, client_addr).await {
            self.forget(seq, client_addr).await;
            return Err(e);
        }
        debug!("Sent REQUEST_ACK seq={} to {}", seq, client_addr);

        let (reply_tx, reply_rx) = oneshot::channel::<ToolResponse>();
        let tool_request = ToolRequest {
            tool: request_payload.tool,
            arguments: request_payload.arguments,
            reply: reply_tx,
            source_addr: client_addr,
        };

        if let Err(e) = self.loop_sender.send(tool_request).await {
            error!("Failed to send request to dispatcher: {}", e);
            let payload = ResponsePayload {
                content: "Internal server error".to_string(),
                is_error: true,
            };
            let bytes = encode_bounded_response(seq, &payload, self.config.max_payload_bytes)?;
            self.send(&bytes, client_addr).await?;
            self.forget(seq, client_addr).await;
            return Err(CommError::DispatcherClosed);
        }

        let response = self.await_reply(reply_rx, seq).await;

        let response_bytes =
            encode_bounded_response(seq, &response, self.config.max_payload_bytes)?;

        // Cached before sending so a retry racing the send gets the response
        {
            let mut dedup = self.dedup.lock().await;
            dedup.entry(client_addr).or_default().insert(
                seq,
                DedupEntry {
                    instant: Instant::now(),
                    cached_response: Some(response_bytes.clone()),
                },
            );
        }

        self.send(&response_bytes, client_addr).await?;
        debug!("Sent RESPONSE seq={} to {}", seq, client_addr);

        Ok(())
    }

    /// Wait for the dispatcher's result, bounded by the configured response timeout
    async fn await_reply(
        &self,
        reply_rx: oneshot::Receiver<ToolResponse>,
        seq: u32,
    ) -> ResponsePayload {
        let reply = if self.config.response_timeout_secs == 0 {
            Ok(reply_rx.await)
        } else {
            timeout(
                Duration::from_secs(self.config.response_timeout_secs),
                reply_rx,
            )
            .await
        };

        match reply {
            Ok(Ok(response)) => ResponsePayload {
                content: response.content,
                is_error: response.is_error,
            },
            Ok(Err(_)) => {
                warn!("Channel closed without response for seq={}", seq);
                ResponsePayload {
                    content: "No response from handler".to_string(),
                    is_error: true,
                }
            }
            Err(_) => {
                warn!("Timeout waiting for response for seq={}", seq);
                ResponsePayload {
                    content: "Response timeout".to_string(),
                    is_error: true,
                }
            }
        }
    }

    async fn forget(&self, seq: u32, client_addr: SocketAddr) {
        let mut dedup = self.dedup.lock().await;
        if let Some(client_entries) = dedup.get_mut(&client_addr) {
            client_entries.remove(&seq);
        }
    }

    /// Cleanup expired entries from deduplication table
    async fn cleanup_dedup(&self) {
        let mut dedup = self.dedup.lock().await;
        let ttl = Duration::from_secs(self.config.dedup_ttl_secs);
        let now = Instant::now();

        // Entries still waiting on a result are kept regardless of age
        for entries in dedup.values_mut() {
            entries.retain(|_seq, entry| {
                entry.cached_response.is_none() || now.duration_since(entry.instant) < ttl
            });
        }

        dedup.retain(|_addr, entries| !entries.is_empty());

        debug!("Dedup table cleaned, {} clients tracked", dedup.len());
    }
}
