//! Input sources for reading PDF data
//!
//! The [`InputSource`] trait is the byte-level interface the rest of the
//! crate consumes: positioned reads over a file, a memory buffer, an
//! offset-translating wrapper (for files with leading garbage before the
//! `%PDF-` header), or the invalidated sentinel installed by
//! `close_input_source`.

use std::cell::RefCell;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::rc::Rc;

use crate::error::{Error, Result};

/// Shared, interiorly mutable input source
pub type SharedInput = Rc<RefCell<dyn InputSource>>;

/// Byte-level input interface
pub trait InputSource {
    /// Name or description of this input (usually the filename)
    fn name(&self) -> String;

    /// Current position
    fn tell(&mut self) -> Result<u64>;

    /// Seek to a position
    fn seek(&mut self, pos: SeekFrom) -> Result<()>;

    /// Seek back to the beginning
    fn rewind(&mut self) -> Result<()> {
        self.seek(SeekFrom::Start(0))
    }

    /// Read into `buf`, returning the number of bytes read (0 at EOF)
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Offset at which the last read started
    fn last_offset(&self) -> u64;

    /// Push the most recently read byte back
    fn unread_byte(&mut self) -> Result<()> {
        self.seek(SeekFrom::Current(-1))
    }

    /// Read a single byte; `None` at EOF
    fn read_byte(&mut self) -> Result<Option<u8>> {
        let mut buf = [0u8; 1];
        Ok(if self.read(&mut buf)? == 1 {
            Some(buf[0])
        } else {
            None
        })
    }

    /// Read up to `max` bytes of one line; the end-of-line marker is
    /// consumed but not returned
    fn read_line(&mut self, max: usize) -> Result<Vec<u8>> {
        let mut line = Vec::new();
        while line.len() < max {
            match self.read_byte()? {
                None => break,
                Some(b'\n') => break,
                Some(b'\r') => {
                    // lone CR terminates the line too
                    match self.read_byte()? {
                        Some(b'\n') | None => {}
                        Some(_) => self.unread_byte()?,
                    }
                    break;
                }
                Some(b) => line.push(b),
            }
        }
        Ok(line)
    }

    /// Advance to just past the next end-of-line sequence, returning the
    /// position after it
    fn find_and_skip_next_eol(&mut self) -> Result<u64> {
        loop {
            match self.read_byte()? {
                None => break,
                Some(b'\r') | Some(b'\n') => {
                    loop {
                        match self.read_byte()? {
                            Some(b'\r') | Some(b'\n') => continue,
                            Some(_) => {
                                self.unread_byte()?;
                                break;
                            }
                            None => break,
                        }
                    }
                    break;
                }
                Some(_) => continue,
            }
        }
        self.tell()
    }

    /// Search a bounded window for `pattern`
    ///
    /// Scans up to `window` bytes starting at `start`. On a match the
    /// position is left at the match and its offset returned.
    fn find_first(&mut self, pattern: &[u8], start: u64, window: usize) -> Result<Option<u64>> {
        if pattern.is_empty() {
            return Ok(None);
        }
        self.seek(SeekFrom::Start(start))?;
        let mut haystack = vec![0u8; window + pattern.len() - 1];
        let mut filled = 0;
        while filled < haystack.len() {
            let n = self.read(&mut haystack[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        haystack.truncate(filled);
        let found = haystack
            .windows(pattern.len())
            .position(|w| w == pattern)
            .filter(|pos| *pos < window);
        match found {
            Some(pos) => {
                let at = start + pos as u64;
                self.seek(SeekFrom::Start(at))?;
                Ok(Some(at))
            }
            None => Ok(None),
        }
    }
}

// ============================================================================
// File input
// ============================================================================

/// File-backed input source
pub struct FileInputSource {
    name: String,
    file: File,
    last_offset: u64,
}

impl FileInputSource {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(&path)?;
        Ok(Self {
            name: path.as_ref().display().to_string(),
            file,
            last_offset: 0,
        })
    }
}

impl InputSource for FileInputSource {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn tell(&mut self) -> Result<u64> {
        Ok(self.file.stream_position()?)
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<()> {
        self.file.seek(pos)?;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.last_offset = self.file.stream_position()?;
        Ok(self.file.read(buf)?)
    }

    fn last_offset(&self) -> u64 {
        self.last_offset
    }
}

// ============================================================================
// Memory input
// ============================================================================

/// Memory-backed input source
pub struct BufferInputSource {
    name: String,
    data: Vec<u8>,
    position: usize,
    last_offset: u64,
}

impl BufferInputSource {
    pub fn new(name: &str, data: Vec<u8>) -> Self {
        Self {
            name: name.to_string(),
            data,
            position: 0,
            last_offset: 0,
        }
    }

    pub fn from_slice(name: &str, data: &[u8]) -> Self {
        Self::new(name, data.to_vec())
    }
}

impl InputSource for BufferInputSource {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn tell(&mut self) -> Result<u64> {
        Ok(self.position as u64)
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<()> {
        let target = match pos {
            SeekFrom::Start(p) => p as i64,
            SeekFrom::Current(d) => self.position as i64 + d,
            SeekFrom::End(d) => self.data.len() as i64 + d,
        };
        if target < 0 {
            return Err(Error::System(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "seek before start of buffer",
            )));
        }
        self.position = target as usize;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.last_offset = self.position as u64;
        let remaining = self.data.len().saturating_sub(self.position);
        let to_read = buf.len().min(remaining);
        buf[..to_read].copy_from_slice(&self.data[self.position..self.position + to_read]);
        self.position += to_read;
        Ok(to_read)
    }

    fn last_offset(&self) -> u64 {
        self.last_offset
    }
}

// ============================================================================
// Offset translation
// ============================================================================

/// Re-bases all offsets so that byte 0 is `global_offset` in the wrapped
/// source
///
/// Installed when the `%PDF-` header is found at a non-zero offset: all
/// explicit offsets in such files are relative to the header.
pub struct OffsetInputSource {
    inner: SharedInput,
    global_offset: u64,
}

impl OffsetInputSource {
    pub fn new(inner: SharedInput, global_offset: u64) -> Self {
        Self {
            inner,
            global_offset,
        }
    }
}

impl InputSource for OffsetInputSource {
    fn name(&self) -> String {
        self.inner.borrow().name()
    }

    fn tell(&mut self) -> Result<u64> {
        let raw = self.inner.borrow_mut().tell()?;
        Ok(raw.saturating_sub(self.global_offset))
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<()> {
        let translated = match pos {
            SeekFrom::Start(p) => SeekFrom::Start(p + self.global_offset),
            other => other,
        };
        self.inner.borrow_mut().seek(translated)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.inner.borrow_mut().read(buf)
    }

    fn last_offset(&self) -> u64 {
        self.inner
            .borrow()
            .last_offset()
            .saturating_sub(self.global_offset)
    }
}

// ============================================================================
// Invalidated sentinel
// ============================================================================

/// Input source installed by `close_input_source`: every I/O attempt is a
/// logic error, already-cached objects stay readable
pub struct InvalidInputSource {
    name: String,
}

impl InvalidInputSource {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }

    fn fail<T>(&self) -> Result<T> {
        Err(Error::logic(
            "operation attempted on a document with no input source; operations are \
             invalid before process_file (or another process method) or after \
             close_input_source",
        ))
    }
}

impl InputSource for InvalidInputSource {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn tell(&mut self) -> Result<u64> {
        self.fail()
    }

    fn seek(&mut self, _pos: SeekFrom) -> Result<()> {
        self.fail()
    }

    fn read(&mut self, _buf: &mut [u8]) -> Result<usize> {
        self.fail()
    }

    fn last_offset(&self) -> u64 {
        0
    }
}

/// Wrap a concrete source for sharing
pub fn shared<S: InputSource + 'static>(source: S) -> SharedInput {
    Rc::new(RefCell::new(source))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_read_seek() {
        let mut src = BufferInputSource::new("test", b"Hello, World!".to_vec());
        let mut buf = [0u8; 5];
        assert_eq!(src.read(&mut buf).unwrap(), 5);
        assert_eq!(&buf, b"Hello");
        assert_eq!(src.tell().unwrap(), 5);
        assert_eq!(src.last_offset(), 0);

        src.seek(SeekFrom::Start(7)).unwrap();
        let mut buf = [0u8; 6];
        assert_eq!(src.read(&mut buf).unwrap(), 6);
        assert_eq!(&buf, b"World!");
        assert_eq!(src.last_offset(), 7);
    }

    #[test]
    fn test_buffer_unread() {
        let mut src = BufferInputSource::new("test", b"ab".to_vec());
        assert_eq!(src.read_byte().unwrap(), Some(b'a'));
        src.unread_byte().unwrap();
        assert_eq!(src.read_byte().unwrap(), Some(b'a'));
        assert_eq!(src.read_byte().unwrap(), Some(b'b'));
        assert_eq!(src.read_byte().unwrap(), None);
    }

    #[test]
    fn test_read_line() {
        let mut src = BufferInputSource::new("test", b"first\r\nsecond\nthird".to_vec());
        assert_eq!(src.read_line(100).unwrap(), b"first");
        assert_eq!(src.read_line(100).unwrap(), b"second");
        assert_eq!(src.read_line(100).unwrap(), b"third");
    }

    #[test]
    fn test_read_line_max() {
        let mut src = BufferInputSource::new("test", b"abcdef\n".to_vec());
        assert_eq!(src.read_line(3).unwrap(), b"abc");
    }

    #[test]
    fn test_find_first() {
        let mut src = BufferInputSource::new("test", b"xxxx%PDF-1.7 rest".to_vec());
        let at = src.find_first(b"%PDF-", 0, 1024).unwrap();
        assert_eq!(at, Some(4));
        assert_eq!(src.tell().unwrap(), 4);
        assert_eq!(src.find_first(b"%PDF-", 5, 1024).unwrap(), None);
    }

    #[test]
    fn test_find_first_window_bound() {
        let mut src = BufferInputSource::new("test", b"....needle".to_vec());
        // match begins at 4, outside a window of 3
        assert_eq!(src.find_first(b"needle", 0, 3).unwrap(), None);
        assert_eq!(src.find_first(b"needle", 0, 5).unwrap(), Some(4));
    }

    #[test]
    fn test_find_and_skip_next_eol() {
        let mut src = BufferInputSource::new("test", b"abc\r\n\r\nxyz".to_vec());
        let pos = src.find_and_skip_next_eol().unwrap();
        assert_eq!(pos, 7);
        assert_eq!(src.read_byte().unwrap(), Some(b'x'));
    }

    #[test]
    fn test_offset_source() {
        let inner = shared(BufferInputSource::new(
            "test",
            b"GARBAGE%PDF-1.4 data".to_vec(),
        ));
        let mut src = OffsetInputSource::new(inner, 7);
        src.seek(SeekFrom::Start(0)).unwrap();
        let mut buf = [0u8; 5];
        src.read(&mut buf).unwrap();
        assert_eq!(&buf, b"%PDF-");
        assert_eq!(src.tell().unwrap(), 5);
        assert_eq!(src.last_offset(), 0);
    }

    #[test]
    fn test_invalid_source() {
        let mut src = InvalidInputSource::new("closed input source");
        assert_eq!(src.name(), "closed input source");
        assert!(src.tell().is_err());
        assert!(src.seek(SeekFrom::Start(0)).is_err());
        assert!(src.read(&mut [0u8; 1]).is_err());
        assert!(matches!(src.read_byte(), Err(Error::Logic(_))));
    }
}
