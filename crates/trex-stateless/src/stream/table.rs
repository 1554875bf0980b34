//! Insertion-ordered table of the streams staged on one port.
//!
//! The table performs no state or ownership checks; the owning port gates
//! every mutation before delegating here.

use thiserror::Error;

use super::Stream;

/// Error type for stream table lookups.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamTableError {
    #[error("stream {stream_id} not found")]
    NotFound { stream_id: u32 },
}

/// Streams of one port, in the order they were first added.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamTable {
    streams: Vec<Stream>,
}

impl StreamTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a stream.
    ///
    /// A stream with an id already in the table replaces the old definition
    /// in place and the old one is returned.
    pub fn add_stream(&mut self, stream: Stream) -> Option<Stream> {
        match self.position(stream.id) {
            Some(idx) => Some(std::mem::replace(&mut self.streams[idx], stream)),
            None => {
                self.streams.push(stream);
                None
            }
        }
    }

    /// Removes a stream by id.
    pub fn remove_stream(&mut self, stream_id: u32) -> Result<Stream, StreamTableError> {
        let idx = self
            .position(stream_id)
            .ok_or(StreamTableError::NotFound { stream_id })?;
        Ok(self.streams.remove(idx))
    }

    /// Removes every stream, returning how many were dropped.
    pub fn remove_all_streams(&mut self) -> usize {
        let count = self.streams.len();
        self.streams.clear();
        count
    }

    /// Returns the stream with the given id.
    pub fn get_stream(&self, stream_id: u32) -> Result<&Stream, StreamTableError> {
        self.streams
            .iter()
            .find(|s| s.id == stream_id)
            .ok_or(StreamTableError::NotFound { stream_id })
    }

    /// Stream ids in insertion order.
    pub fn stream_ids(&self) -> Vec<u32> {
        self.streams.iter().map(|s| s.id).collect()
    }

    /// All streams in insertion order.
    pub fn streams(&self) -> &[Stream] {
        &self.streams
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    fn position(&self, stream_id: u32) -> Option<usize> {
        self.streams.iter().position(|s| s.id == stream_id)
    }
}
