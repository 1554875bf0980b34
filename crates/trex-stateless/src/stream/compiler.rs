//! Stream compiler contract and the basic validating compiler.

use std::collections::HashSet;

use thiserror::Error;
use trex_driver::{PortId, TxEntry, TxProgram};

use super::Stream;

/// Shortest frame accepted (an Ethernet header).
pub const MIN_PACKET_LEN: usize = 14;

/// Longest frame accepted (jumbo, without FCS).
pub const MAX_PACKET_LEN: usize = 9216;

/// Reasons the compiler rejects a stream set.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileError {
    #[error("no enabled streams")]
    NoEnabledStreams,

    #[error("no enabled stream is self-starting")]
    NoSelfStartStream,

    #[error("stream {stream_id}: packet of {len} bytes is shorter than 14")]
    PacketTooShort { stream_id: u32, len: usize },

    #[error("stream {stream_id}: packet of {len} bytes is longer than 9216")]
    PacketTooLong { stream_id: u32, len: usize },

    #[error("stream {stream_id}: rate must be positive (got {pps} pps)")]
    InvalidRate { stream_id: u32, pps: f64 },

    #[error("stream {stream_id}: burst size and count must be non-zero")]
    EmptyBurst { stream_id: u32 },

    #[error("stream {stream_id}: next stream {next} is not an enabled stream on this port")]
    UnknownNextStream { stream_id: u32, next: u32 },
}

/// Turns the streams staged on a port into an executable program.
pub trait StreamCompiler: Send + Sync {
    fn compile(&self, port: PortId, streams: &[Stream]) -> Result<TxProgram, CompileError>;
}

/// Compiler that validates each stream and emits one entry per enabled stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct BasicStreamCompiler;

impl BasicStreamCompiler {
    fn check(stream: &Stream, enabled: &HashSet<u32>) -> Result<(), CompileError> {
        let stream_id = stream.id;
        let len = stream.packet.len();
        if len < MIN_PACKET_LEN {
            return Err(CompileError::PacketTooShort { stream_id, len });
        }
        if len > MAX_PACKET_LEN {
            return Err(CompileError::PacketTooLong { stream_id, len });
        }

        let pps = stream.mode.pps();
        if !(pps.is_finite() && pps > 0.0) {
            return Err(CompileError::InvalidRate { stream_id, pps });
        }
        if stream.mode.total_pkts() == Some(0) {
            return Err(CompileError::EmptyBurst { stream_id });
        }

        if let Some(next) = stream.next_stream_id {
            if !enabled.contains(&next) {
                return Err(CompileError::UnknownNextStream { stream_id, next });
            }
        }
        Ok(())
    }
}

impl StreamCompiler for BasicStreamCompiler {
    fn compile(&self, port: PortId, streams: &[Stream]) -> Result<TxProgram, CompileError> {
        let active: Vec<&Stream> = streams.iter().filter(|s| s.enabled).collect();
        if active.is_empty() {
            return Err(CompileError::NoEnabledStreams);
        }
        if !active.iter().any(|s| s.self_start) {
            return Err(CompileError::NoSelfStartStream);
        }

        let enabled: HashSet<u32> = active.iter().map(|s| s.id).collect();
        let mut entries = Vec::with_capacity(active.len());
        for stream in active {
            Self::check(stream, &enabled)?;
            entries.push(TxEntry {
                stream_id: stream.id,
                packet: stream.packet.clone(),
                pps: stream.mode.pps(),
                total_pkts: stream.mode.total_pkts(),
                self_start: stream.self_start,
                isg_usec: stream.isg_usec,
                next_stream_id: stream.next_stream_id,
            });
        }
        Ok(TxProgram::new(port, entries))
    }
}
