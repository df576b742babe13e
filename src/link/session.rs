//! Request/response state machine.
//!
//! `Idle -> AwaitingAck -> {Confirmed, Rejected, TimedOut} -> Idle`, with
//! exactly one request outstanding at a time: controller bandwidth is the
//! scarce resource, so there is nothing to gain from a deeper window.
//!
//! Time is a parameter (`now_ms`), never a timer: timeouts and retries are
//! decided inside `poll`, which makes every transition drivable from a test
//! without waiting on a clock. Malformed input counts as a timeout for the
//! outstanding request, per the protocol contract.

use std::sync::Arc;

use crate::observability::{Logger, MetricsRegistry, Severity};

use super::channel::SerialChannel;
use super::errors::LinkError;
use super::frame::{DecodedItem, Frame, FrameDecoder, NackReason};

/// Link tunables. All configuration, not constants.
#[derive(Debug, Clone, Copy)]
pub struct LinkOptions {
    /// How long to wait for an ACK/NACK before retransmitting.
    pub ack_timeout_ms: u64,
    /// Retransmissions allowed after the first send.
    pub max_retries: u32,
    /// Idle heartbeat period; silence for 3x this marks the link down.
    pub heartbeat_interval_ms: u64,
}

impl Default for LinkOptions {
    fn default() -> Self {
        Self {
            ack_timeout_ms: 5_000,
            max_retries: 3,
            heartbeat_interval_ms: 10_000,
        }
    }
}

/// Parameters of a transmit request: the record's identity plus the
/// payload_ref the controller uses to fetch the data.
#[derive(Debug, Clone, Copy)]
pub struct TransmitHandle {
    pub record_id: u64,
    pub priority: f32,
    pub payload_len: u32,
    pub block: u32,
    pub offset: u32,
}

/// Commands the controller can initiate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerCommand {
    Shutdown,
    StatusRequest,
}

/// Resolutions and notifications surfaced by `poll`.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// Controller acknowledged receipt; safe to tombstone.
    Confirmed { record_id: u64 },
    /// Controller cannot take the record now; requeue it.
    Rejected {
        record_id: u64,
        reason: NackReason,
    },
    /// Retry budget exhausted; treated like a rejection by the caller.
    GaveUp { record_id: u64 },
    /// ACK/NACK arrived for a request that is no longer outstanding
    /// (resolved earlier, or cancelled by eviction). A no-op by contract.
    LateResponse { record_id: u64 },
    /// Controller-initiated command.
    Command(ControllerCommand),
    /// Nothing heard for 3x the heartbeat interval.
    LinkDown { silent_ms: u64 },
}

#[derive(Debug, Clone, Copy)]
enum SessionState {
    Idle,
    AwaitingAck {
        record_id: u64,
        sent_at_ms: u64,
        /// Sends so far, including the first.
        attempt: u32,
    },
}

/// The protocol session over one serial channel.
pub struct LinkSession<C: SerialChannel> {
    channel: C,
    opts: LinkOptions,
    decoder: FrameDecoder,
    state: SessionState,
    /// Encoded outstanding request, kept verbatim for retransmission.
    request_bytes: Vec<u8>,
    last_rx_ms: u64,
    last_heartbeat_ms: u64,
    link_down_reported: bool,
    metrics: Arc<MetricsRegistry>,
}

impl<C: SerialChannel> LinkSession<C> {
    pub fn new(channel: C, opts: LinkOptions, metrics: Arc<MetricsRegistry>, now_ms: u64) -> Self {
        Self {
            channel,
            opts,
            decoder: FrameDecoder::new(),
            state: SessionState::Idle,
            request_bytes: Vec::new(),
            last_rx_ms: now_ms,
            last_heartbeat_ms: now_ms,
            link_down_reported: false,
            metrics,
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.state, SessionState::Idle)
    }

    /// The record id awaiting resolution, if any.
    pub fn outstanding(&self) -> Option<u64> {
        match self.state {
            SessionState::AwaitingAck { record_id, .. } => Some(record_id),
            SessionState::Idle => None,
        }
    }

    /// Issue a transmit request. Fails with `Busy` while one is outstanding.
    pub fn request_transmit(
        &mut self,
        handle: &TransmitHandle,
        now_ms: u64,
    ) -> Result<(), LinkError> {
        if let Some(outstanding) = self.outstanding() {
            return Err(LinkError::Busy(outstanding));
        }

        let frame = Frame::TransmitRequest {
            record_id: handle.record_id,
            priority: handle.priority,
            payload_len: handle.payload_len,
            block: handle.block,
            offset: handle.offset,
        };
        self.request_bytes = frame.encode();
        self.channel.send(&self.request_bytes)?;
        self.state = SessionState::AwaitingAck {
            record_id: handle.record_id,
            sent_at_ms: now_ms,
            attempt: 1,
        };
        self.metrics.transmit_request();
        Logger::log(
            Severity::Info,
            "transmit_request",
            &[
                ("record_id", &handle.record_id.to_string()),
                ("priority", &format!("{:.3}", handle.priority)),
            ],
        );
        Ok(())
    }

    /// Cancel the outstanding request for `record_id` (the record was
    /// evicted under pressure). A later ACK/NACK for it becomes a
    /// `LateResponse` no-op.
    pub fn cancel(&mut self, record_id: u64) -> bool {
        match self.state {
            SessionState::AwaitingAck {
                record_id: outstanding,
                ..
            } if outstanding == record_id => {
                self.state = SessionState::Idle;
                self.request_bytes.clear();
                true
            }
            _ => false,
        }
    }

    /// Reply to a `StatusRequest` command.
    pub fn send_status_report(
        &mut self,
        live_records: u32,
        free_blocks: u32,
        pending: u32,
        live_bytes: u64,
    ) -> Result<(), LinkError> {
        let frame = Frame::StatusReport {
            live_records,
            free_blocks,
            pending,
            live_bytes,
        };
        self.channel.send(&frame.encode())
    }

    /// Pump the channel: decode inbound bytes, resolve or retry the
    /// outstanding request, emit heartbeats, watch for link silence.
    /// Non-blocking; returns every event produced this call.
    pub fn poll(&mut self, now_ms: u64) -> Result<Vec<LinkEvent>, LinkError> {
        let mut events = Vec::new();

        let mut buf = [0u8; 256];
        loop {
            match self.channel.recv(&mut buf)? {
                0 => break,
                n => self.decoder.push_bytes(&buf[..n]),
            }
        }

        let mut malformed_seen = false;
        while let Some(item) = self.decoder.next() {
            match item {
                DecodedItem::Frame(frame) => {
                    self.last_rx_ms = now_ms;
                    self.link_down_reported = false;
                    self.handle_frame(frame, &mut events);
                }
                DecodedItem::Malformed { discarded, reason } => {
                    malformed_seen = true;
                    self.metrics.malformed_frame();
                    Logger::log_stderr(
                        Severity::Warn,
                        "malformed_frame",
                        &[
                            ("bytes", &hex_string(&discarded)),
                            ("reason", &reason),
                        ],
                    );
                }
            }
        }

        // A malformed frame counts as a timeout for the outstanding request;
        // otherwise the deadline decides.
        let deadline_hit = match self.state {
            SessionState::AwaitingAck { sent_at_ms, .. } => {
                now_ms.saturating_sub(sent_at_ms) >= self.opts.ack_timeout_ms
            }
            SessionState::Idle => false,
        };
        if (malformed_seen || deadline_hit) && !self.is_idle() {
            self.resolve_timeout(now_ms, &mut events)?;
        }

        if self.is_idle()
            && now_ms.saturating_sub(self.last_heartbeat_ms) >= self.opts.heartbeat_interval_ms
        {
            self.channel.send(&Frame::Heartbeat.encode())?;
            self.last_heartbeat_ms = now_ms;
            self.metrics.heartbeat_sent();
        }

        let silence = now_ms.saturating_sub(self.last_rx_ms);
        if silence >= 3 * self.opts.heartbeat_interval_ms && !self.link_down_reported {
            self.link_down_reported = true;
            Logger::log_stderr(
                Severity::Warn,
                "link_down",
                &[("silent_ms", &silence.to_string())],
            );
            events.push(LinkEvent::LinkDown { silent_ms: silence });
        }

        Ok(events)
    }

    fn handle_frame(&mut self, frame: Frame, events: &mut Vec<LinkEvent>) {
        match frame {
            Frame::Ack { record_id } => match self.state {
                SessionState::AwaitingAck {
                    record_id: outstanding,
                    ..
                } if outstanding == record_id => {
                    self.state = SessionState::Idle;
                    self.request_bytes.clear();
                    self.metrics.transmit_confirm();
                    events.push(LinkEvent::Confirmed { record_id });
                }
                _ => {
                    Logger::log(
                        Severity::Info,
                        "late_ack_ignored",
                        &[("record_id", &record_id.to_string())],
                    );
                    events.push(LinkEvent::LateResponse { record_id });
                }
            },
            Frame::Nack { record_id, reason } => match self.state {
                SessionState::AwaitingAck {
                    record_id: outstanding,
                    ..
                } if outstanding == record_id => {
                    self.state = SessionState::Idle;
                    self.request_bytes.clear();
                    self.metrics.transmit_reject();
                    Logger::log(
                        Severity::Info,
                        "transmit_rejected",
                        &[
                            ("reason", reason.as_str()),
                            ("record_id", &record_id.to_string()),
                        ],
                    );
                    events.push(LinkEvent::Rejected { record_id, reason });
                }
                _ => {
                    Logger::log(
                        Severity::Info,
                        "late_nack_ignored",
                        &[("record_id", &record_id.to_string())],
                    );
                    events.push(LinkEvent::LateResponse { record_id });
                }
            },
            Frame::Heartbeat => {}
            Frame::Shutdown => events.push(LinkEvent::Command(ControllerCommand::Shutdown)),
            Frame::StatusRequest => {
                events.push(LinkEvent::Command(ControllerCommand::StatusRequest))
            }
            Frame::TransmitRequest { .. } | Frame::StatusReport { .. } => {
                // Only this side issues these; a controller echoing them is
                // a firmware bug, not a link fault.
                Logger::log_stderr(
                    Severity::Warn,
                    "unexpected_frame_direction",
                    &[("opcode", &format!("{:?}", frame.opcode()))],
                );
            }
        }
    }

    fn resolve_timeout(
        &mut self,
        now_ms: u64,
        events: &mut Vec<LinkEvent>,
    ) -> Result<(), LinkError> {
        if let SessionState::AwaitingAck {
            record_id, attempt, ..
        } = self.state
        {
            self.metrics.link_timeout();
            if attempt <= self.opts.max_retries {
                self.channel.send(&self.request_bytes)?;
                self.state = SessionState::AwaitingAck {
                    record_id,
                    sent_at_ms: now_ms,
                    attempt: attempt + 1,
                };
                Logger::log_stderr(
                    Severity::Warn,
                    "transmit_retry",
                    &[
                        ("attempt", &(attempt + 1).to_string()),
                        ("record_id", &record_id.to_string()),
                    ],
                );
            } else {
                self.state = SessionState::Idle;
                self.request_bytes.clear();
                self.metrics.transmit_abandon();
                Logger::log_stderr(
                    Severity::Warn,
                    "transmit_abandoned",
                    &[("record_id", &record_id.to_string())],
                );
                events.push(LinkEvent::GaveUp { record_id });
            }
        }
        Ok(())
    }
}

fn hex_string(bytes: &[u8]) -> String {
    // Cap what goes into the log; the first bytes identify the corruption.
    const LOG_LIMIT: usize = 32;
    let mut out = String::with_capacity(bytes.len().min(LOG_LIMIT) * 2 + 1);
    for byte in bytes.iter().take(LOG_LIMIT) {
        out.push_str(&format!("{:02x}", byte));
    }
    if bytes.len() > LOG_LIMIT {
        out.push('…');
    }
    out
}
