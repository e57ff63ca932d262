// pipeline.rs: ingest and fit halves of the processing cycle
//
// Ingest (decode → parse → append) runs on the listener task and is the only
// writer of the raw buffer. The fit worker runs on its own task: it copies the
// latest window under the lock, releases it, fits the copy on a blocking
// thread and emits the result. Triggers that arrive while a fit is running
// collapse into one, so the worker always fits the newest window and never
// queues more than one pending request.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Notify};

use crate::buffer::{RawBuffer, SharedRawBuffer};
use crate::config::ServerConfig;
use crate::error::{DecodeError, IngestError};
use crate::fit::{FitEngine, WindowFit};
use crate::notify::NotificationSink;
use crate::parser::{PacketParser, WireGrammar};
use crate::status::SharedStatus;
use crate::types::SensorPacket;

/// Build the two halves of a pipeline over a fresh raw buffer
pub fn pipeline(
    config: &ServerConfig,
    sink: NotificationSink,
    status: SharedStatus,
) -> (Ingest, FitWorker) {
    let raw = RawBuffer::shared(config.buffer_capacity);
    let trigger = Arc::new(Notify::new());
    if let Ok(mut s) = status.lock() {
        s.grammar = format!("{:?}", config.grammar());
    }

    let ingest = Ingest {
        parser: PacketParser::new(config.grammar()),
        raw: raw.clone(),
        last_packet: SensorPacket::default(),
        trigger: trigger.clone(),
        status: status.clone(),
    };
    let worker = FitWorker {
        raw,
        engine: FitEngine::new(config.fit.clone()),
        window_len: config.window_len,
        sink,
        status,
        trigger,
    };
    (ingest, worker)
}

/// Decode a datagram as UTF-8 text
pub fn decode_datagram(bytes: &[u8]) -> Result<&str, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }
    std::str::from_utf8(bytes).map_err(|e| DecodeError::InvalidUtf8 {
        valid_up_to: e.valid_up_to(),
        len: bytes.len(),
    })
}

/// Writer half: turns datagrams into buffered packets
pub struct Ingest {
    parser: PacketParser,
    raw: SharedRawBuffer,
    last_packet: SensorPacket,
    trigger: Arc<Notify>,
    status: SharedStatus,
}

impl Ingest {
    /// Decode, parse and buffer one datagram, then wake the fit worker
    pub fn ingest(&mut self, bytes: &[u8]) -> Result<SensorPacket, IngestError> {
        if let Ok(mut s) = self.status.lock() {
            s.datagrams_received += 1;
        }
        let text = match decode_datagram(bytes) {
            Ok(text) => text,
            Err(e) => {
                if let Ok(mut s) = self.status.lock() {
                    s.decode_failures += 1;
                }
                return Err(e.into());
            }
        };
        self.ingest_text(text)
    }

    /// Parse and buffer already-decoded text
    pub fn ingest_text(&mut self, text: &str) -> Result<SensorPacket, IngestError> {
        let packet = match self.parser.parse(text, &self.last_packet) {
            Ok(packet) => packet,
            Err(e) => {
                if let Ok(mut s) = self.status.lock() {
                    s.parse_failures += 1;
                }
                return Err(e.into());
            }
        };

        let (evicted, buffer_len) = {
            let mut raw = self.raw.lock().map_err(|_| IngestError::Poisoned)?;
            let evicted = raw.append(packet).is_some();
            (evicted, raw.len())
        };
        self.last_packet = packet;

        if let Ok(mut s) = self.status.lock() {
            s.packets_accepted += 1;
            s.packets_evicted += evicted as u64;
            s.buffer_len = buffer_len;
            s.last_packet = Some(packet);
            s.fit_triggers += 1;
        }
        log::trace!("Accepted {:.3}", packet);

        self.trigger.notify_one();
        Ok(packet)
    }

    /// Carry-forward reference for the next datagram
    pub fn last_packet(&self) -> &SensorPacket {
        &self.last_packet
    }

    pub fn grammar(&self) -> WireGrammar {
        self.parser.grammar()
    }

    pub fn raw_buffer(&self) -> SharedRawBuffer {
        self.raw.clone()
    }
}

/// Output of one fit cycle
#[derive(Clone, Debug)]
pub struct FitCycle {
    pub raw: Vec<SensorPacket>,
    pub fit: WindowFit,
    pub elapsed: Duration,
}

/// Reader half: fits snapshots of the latest window
#[derive(Clone)]
pub struct FitWorker {
    raw: SharedRawBuffer,
    engine: FitEngine,
    window_len: usize,
    sink: NotificationSink,
    status: SharedStatus,
    trigger: Arc<Notify>,
}

impl FitWorker {
    /// Copy of the most recent window, taken under the buffer lock
    pub fn snapshot(&self) -> Vec<SensorPacket> {
        match self.raw.lock() {
            Ok(raw) => raw.window(self.window_len),
            Err(poisoned) => poisoned.into_inner().window(self.window_len),
        }
    }

    /// Run one synchronous cycle: snapshot, fit, emit. `None` when nothing is buffered
    pub fn run_cycle(&self) -> Option<FitCycle> {
        let raw = self.snapshot();
        if raw.is_empty() {
            return None;
        }

        let started = Instant::now();
        let fit = self.engine.fit_window(&raw);
        let elapsed = started.elapsed();

        let converged = fit.converged_count();
        log::debug!(
            "Fit cycle over {} packets in {:.2} ms ({} converged, {} passthrough)",
            raw.len(),
            elapsed.as_secs_f64() * 1000.0,
            converged,
            fit.passthrough_count()
        );
        if let Ok(mut s) = self.status.lock() {
            s.record_fit_cycle(raw.len(), elapsed.as_secs_f64() * 1000.0, converged);
        }

        self.sink.data(raw.clone(), fit.fitted.as_slice().to_vec());
        Some(FitCycle { raw, fit, elapsed })
    }

    /// Fit on every trigger until `shutdown` flips to true or its sender is dropped
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        log::info!(
            "Fit worker started (window {}, model {})",
            self.window_len,
            self.engine.config().model
        );
        loop {
            tokio::select! {
                _ = self.trigger.notified() => {
                    let worker = self.clone();
                    if let Err(e) = tokio::task::spawn_blocking(move || worker.run_cycle()).await {
                        log::error!("Fit cycle aborted: {}", e);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        log::info!("Fit worker stopped");
    }

    pub fn window_len(&self) -> usize {
        self.window_len
    }
}
