//! Pipeline system for stream processing
//!
//! Chainable byte sinks: stream data is extracted by writing it through a
//! pipeline and finishing it. Sinks either terminate (buffer, discard) or
//! transform and forward (flate, count).

use flate2::read::{ZlibDecoder, ZlibEncoder};
use flate2::Compression;
use std::io::Read;

use crate::error::{Error, Result};

/// A boxed pipeline for ownership and chaining
pub type PipelineBox = Box<dyn Pipeline>;

/// Pipeline trait for stream processing
///
/// Implementations process data in `write` and flush in `finish`, then
/// forward to the next pipeline in the chain if one exists.
pub trait Pipeline {
    /// Identifier for this pipeline, used in error messages
    fn identifier(&self) -> &str;

    /// Write data to the pipeline
    fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Finish processing and flush any remaining data
    fn finish(&mut self) -> Result<()>;
}

// ============================================================================
// PlBuffer - collect into memory
// ============================================================================

/// Buffer pipeline that collects all written data
pub struct PlBuffer {
    identifier: String,
    data: Vec<u8>,
    ready: bool,
}

impl PlBuffer {
    pub fn new(identifier: &str) -> Self {
        Self {
            identifier: identifier.to_string(),
            data: Vec::new(),
            ready: true,
        }
    }

    /// Take the collected buffer; an error before `finish` has been called
    pub fn get_buffer(&mut self) -> Result<Vec<u8>> {
        if !self.ready {
            return Err(Error::logic(format!(
                "PlBuffer::get_buffer called on {} when not ready",
                self.identifier
            )));
        }
        Ok(std::mem::take(&mut self.data))
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }
}

impl Pipeline for PlBuffer {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        self.data.extend_from_slice(data);
        self.ready = false;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.ready = true;
        Ok(())
    }
}

// ============================================================================
// PlDiscard - throw everything away
// ============================================================================

/// Discard pipeline that throws away all data
pub struct PlDiscard {
    identifier: String,
}

impl PlDiscard {
    pub fn new(identifier: &str) -> Self {
        Self {
            identifier: identifier.to_string(),
        }
    }
}

impl Pipeline for PlDiscard {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn write(&mut self, _data: &[u8]) -> Result<()> {
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

// ============================================================================
// PlCount - count bytes passing through
// ============================================================================

/// Count pipeline that counts bytes on the way to the next sink
pub struct PlCount {
    identifier: String,
    next: PipelineBox,
    count: u64,
}

impl PlCount {
    pub fn new(identifier: &str, next: PipelineBox) -> Self {
        Self {
            identifier: identifier.to_string(),
            next,
            count: 0,
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn into_next(self) -> PipelineBox {
        self.next
    }
}

impl Pipeline for PlCount {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        self.count += data.len() as u64;
        self.next.write(data)
    }

    fn finish(&mut self) -> Result<()> {
        self.next.finish()
    }
}

// ============================================================================
// PlFlate - zlib compression / decompression
// ============================================================================

/// Flate action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlateAction {
    /// Compress data
    Deflate,
    /// Decompress data
    Inflate,
}

/// Flate pipeline; PDF `/FlateDecode` payloads are zlib-wrapped
pub struct PlFlate {
    identifier: String,
    next: PipelineBox,
    action: FlateAction,
    compression_level: u32,
    buffer: Vec<u8>,
    memory_limit: Option<usize>,
}

impl PlFlate {
    /// Output chunk size (64KB)
    pub const DEFAULT_BUFSIZE: usize = 65536;

    pub fn new(identifier: &str, next: PipelineBox, action: FlateAction) -> Self {
        Self {
            identifier: identifier.to_string(),
            next,
            action,
            compression_level: 6,
            buffer: Vec::new(),
            memory_limit: None,
        }
    }

    /// Set the compression level (0-9)
    pub fn set_compression_level(&mut self, level: u32) {
        self.compression_level = level.min(9);
    }

    /// Cap the number of bytes inflation may produce
    pub fn set_memory_limit(&mut self, limit: usize) {
        self.memory_limit = Some(limit);
    }

    pub fn into_next(self) -> PipelineBox {
        self.next
    }

    fn process(&mut self) -> Result<()> {
        let mut reader: Box<dyn Read + '_> = match self.action {
            FlateAction::Deflate => Box::new(ZlibEncoder::new(
                &self.buffer[..],
                Compression::new(self.compression_level),
            )),
            FlateAction::Inflate => Box::new(ZlibDecoder::new(&self.buffer[..])),
        };
        let mut output = vec![0u8; Self::DEFAULT_BUFSIZE];
        let mut written = 0usize;
        loop {
            let n = reader
                .read(&mut output)
                .map_err(|e| Error::logic(format!("{}: flate error: {e}", self.identifier)))?;
            if n == 0 {
                break;
            }
            written += n;
            if let Some(limit) = self.memory_limit {
                if written > limit {
                    return Err(Error::logic(format!(
                        "{}: flate output exceeded memory limit of {limit} bytes",
                        self.identifier
                    )));
                }
            }
            self.next.write(&output[..n])?;
        }
        Ok(())
    }
}

impl Pipeline for PlFlate {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        self.buffer.extend_from_slice(data);
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if !self.buffer.is_empty() {
            self.process()?;
            self.buffer.clear();
        }
        self.next.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_pipeline() {
        let mut buf = PlBuffer::new("test");
        buf.write(b"Hello, ").unwrap();
        assert!(!buf.is_ready());
        buf.write(b"World!").unwrap();
        buf.finish().unwrap();
        assert!(buf.is_ready());
        assert_eq!(buf.get_buffer().unwrap(), b"Hello, World!");
        // taken: a second call yields empty
        assert!(buf.get_buffer().unwrap().is_empty());
    }

    #[test]
    fn test_buffer_not_ready() {
        let mut buf = PlBuffer::new("test");
        buf.write(b"x").unwrap();
        assert!(buf.get_buffer().is_err());
    }

    #[test]
    fn test_discard_pipeline() {
        let mut d = PlDiscard::new("sink");
        d.write(b"anything").unwrap();
        d.finish().unwrap();
    }

    #[test]
    fn test_count_pipeline() {
        let mut count = PlCount::new("count", Box::new(PlDiscard::new("sink")));
        count.write(b"12345").unwrap();
        count.write(b"678").unwrap();
        count.finish().unwrap();
        assert_eq!(count.count(), 8);
    }

    use std::cell::RefCell;
    use std::rc::Rc;

    /// Sink that captures written bytes into a shared buffer
    struct CaptureSink(Rc<RefCell<Vec<u8>>>);

    impl Pipeline for CaptureSink {
        fn identifier(&self) -> &str {
            "capture"
        }

        fn write(&mut self, data: &[u8]) -> Result<()> {
            self.0.borrow_mut().extend_from_slice(data);
            Ok(())
        }

        fn finish(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_flate_roundtrip() {
        let original = b"Flate roundtrip test data. Flate roundtrip test data. \
                         Flate roundtrip test data. Flate roundtrip test data.";

        let compressed = Rc::new(RefCell::new(Vec::new()));
        let mut deflate = PlFlate::new(
            "deflate",
            Box::new(CaptureSink(Rc::clone(&compressed))),
            FlateAction::Deflate,
        );
        deflate.write(original).unwrap();
        deflate.finish().unwrap();
        let compressed = compressed.borrow().clone();
        assert!(compressed.len() < original.len());

        let decompressed = Rc::new(RefCell::new(Vec::new()));
        let mut inflate = PlFlate::new(
            "inflate",
            Box::new(CaptureSink(Rc::clone(&decompressed))),
            FlateAction::Inflate,
        );
        inflate.write(&compressed).unwrap();
        inflate.finish().unwrap();
        assert_eq!(decompressed.borrow().as_slice(), original);
    }

    #[test]
    fn test_flate_memory_limit() {
        let original = vec![0u8; 200_000];
        let mut enc = ZlibEncoder::new(&original[..], Compression::new(6));
        let mut compressed = Vec::new();
        enc.read_to_end(&mut compressed).unwrap();

        let mut inflate = PlFlate::new(
            "inflate",
            Box::new(PlDiscard::new("sink")),
            FlateAction::Inflate,
        );
        inflate.set_memory_limit(1024);
        inflate.write(&compressed).unwrap();
        assert!(inflate.finish().is_err());
    }
}
