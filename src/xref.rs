//! Cross-reference table - object location tracking
//!
//! [`XrefTable`] is pure data: the (id, gen) → location map plus its
//! configuration flags. Reading (classic tables, cross-reference streams,
//! hybrid files) and reconstruction of damaged tables live on `Document`,
//! which owns the input source and parser the reading needs.

use std::collections::{BTreeMap, HashSet};
use std::io::SeekFrom;

use crate::document::Document;
use crate::error::{Error, Result};
use crate::filter::FlateParams;
use crate::handle::Handle;
use crate::object::{Dict, Name, ObjGen, Value};
use crate::parser::ObjectParser;

/// Type of xref entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XrefEntryType {
    /// In-use object at a byte offset
    InUse,
    /// Object stored inside an object stream
    InStream,
}

/// Location of one object
#[derive(Debug, Clone, Copy)]
pub struct XrefEntry {
    pub entry_type: XrefEntryType,
    /// Byte offset of `num gen obj` (in-use entries)
    pub offset: u64,
    /// Containing object stream number (in-stream entries)
    pub stream_number: u32,
    /// Index within the object stream (in-stream entries)
    pub stream_index: u16,
}

impl XrefEntry {
    pub fn in_use(offset: u64) -> Self {
        Self {
            entry_type: XrefEntryType::InUse,
            offset,
            stream_number: 0,
            stream_index: 0,
        }
    }

    pub fn in_stream(stream_number: u32, stream_index: u16) -> Self {
        Self {
            entry_type: XrefEntryType::InStream,
            offset: 0,
            stream_number,
            stream_index,
        }
    }

    pub fn is_in_use(&self) -> bool {
        self.entry_type == XrefEntryType::InUse
    }

    pub fn is_in_stream(&self) -> bool {
        self.entry_type == XrefEntryType::InStream
    }
}

/// The (id, gen) → location map
pub(crate) struct XrefTable {
    entries: BTreeMap<ObjGen, XrefEntry>,
    pub initialized: bool,
    pub ignore_streams: bool,
    pub reconstructed: bool,
}

impl XrefTable {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            initialized: false,
            ignore_streams: false,
            reconstructed: false,
        }
    }

    /// First insertion wins: sections are read newest first
    pub fn insert_if_absent(&mut self, og: ObjGen, entry: XrefEntry) {
        self.entries.entry(og).or_insert(entry);
    }

    /// Reconstruction inserts with override: later file positions win
    pub fn insert(&mut self, og: ObjGen, entry: XrefEntry) {
        self.entries.insert(og, entry);
    }

    pub fn get(&self, og: ObjGen) -> Option<XrefEntry> {
        self.entries.get(&og).copied()
    }

    pub fn size(&self) -> usize {
        self.entries.len()
    }

    pub fn max_obj(&self) -> u32 {
        self.entries.keys().map(|og| og.obj).max().unwrap_or(0)
    }

    pub fn entry_ids(&self) -> Vec<ObjGen> {
        self.entries.keys().copied().collect()
    }

    pub fn as_map(&self) -> BTreeMap<ObjGen, XrefEntry> {
        self.entries.clone()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

fn read_big_endian(bytes: &[u8]) -> u64 {
    let mut result = 0u64;
    for &b in bytes {
        result = (result << 8) | (b as u64);
    }
    result
}

impl Document {
    /// Read the trailer and the whole xref chain
    ///
    /// Damage triggers reconstruction when recovery is enabled.
    pub(crate) fn initialize_xref(&self) -> Result<()> {
        match self.read_xref_chain() {
            Ok(()) => {}
            Err(Error::Damaged(d)) if self.attempt_recovery() => {
                self.warn(d)?;
                self.reconstruct_xref()?;
            }
            Err(e) => return Err(e),
        }
        let max = self.st().xref.borrow().max_obj();
        self.st().store.note_id(max);
        self.st().xref.borrow_mut().initialized = true;
        Ok(())
    }

    /// Seed a minimum empty document: an empty table and a trailer whose
    /// `/Root` points at a freshly reserved catalog
    pub(crate) fn initialize_empty_xref(&self) {
        let root = self.new_reserved();
        let mut dict = Dict::new();
        dict.insert(
            Name::new("Size"),
            Handle::new_integer(root.obj_gen().obj as i64 + 1),
        );
        dict.insert(Name::new("Root"), root);
        self.set_trailer(Handle::new(Value::Dictionary(dict)));
        self.st().xref.borrow_mut().initialized = true;
    }

    fn read_xref_chain(&self) -> Result<()> {
        let start = self.find_startxref()?;
        let mut seen = HashSet::new();
        let mut next = Some(start);
        while let Some(offset) = next {
            if !seen.insert(offset) {
                return Err(self.damaged_at(offset, "loop detected following xref tables"));
            }
            next = self.read_xref_section(offset)?;
        }
        if self.st().trailer.borrow().is_none() {
            return Err(self.damaged_pdf("no trailer dictionary found"));
        }
        Ok(())
    }

    /// Locate `startxref` near the end of the input
    fn find_startxref(&self) -> Result<u64> {
        let input = self.file();
        let mut src = input.borrow_mut();
        src.seek(SeekFrom::End(0))?;
        let size = src.tell()?;
        let window = size.min(1054);
        let start = size - window;
        src.seek(SeekFrom::Start(start))?;
        let mut tail = vec![0u8; window as usize];
        let mut filled = 0;
        while filled < tail.len() {
            let n = src.read(&mut tail[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        tail.truncate(filled);

        let pos = tail
            .windows(9)
            .rposition(|w| w == b"startxref")
            .ok_or_else(|| self.damaged_pdf("can't find startxref"))?;
        let rest = &tail[pos + 9..];
        let digits: String = rest
            .iter()
            .skip_while(|b| b.is_ascii_whitespace())
            .take_while(|b| b.is_ascii_digit())
            .map(|&b| b as char)
            .collect();
        digits
            .parse()
            .map_err(|_| self.damaged_pdf("invalid startxref offset"))
    }

    fn read_xref_section(&self, offset: u64) -> Result<Option<u64>> {
        let looks_like_table = {
            let input = self.file();
            let mut src = input.borrow_mut();
            src.seek(SeekFrom::Start(offset))?;
            let mut buf = [0u8; 4];
            let n = src.read(&mut buf)?;
            &buf[..n] == b"xref"
        };
        if looks_like_table {
            let (prev, xrefstm) = self.read_xref_table(offset)?;
            if let Some(xs) = xrefstm {
                if self.st().xref.borrow().ignore_streams {
                    self.warn(self.damage_record("ignoring hybrid cross-reference stream"))?;
                } else {
                    // hybrid file: the table's entries take precedence
                    self.read_xref_stream(xs)?;
                }
            }
            Ok(prev)
        } else {
            if self.st().xref.borrow().ignore_streams {
                return Err(self.damaged_at(offset, "ignoring cross-reference stream"));
            }
            self.read_xref_stream(offset)
        }
    }

    /// Classic `xref` table section; returns (`/Prev`, `/XRefStm`)
    fn read_xref_table(&self, offset: u64) -> Result<(Option<u64>, Option<u64>)> {
        let input = self.file();
        let mut src = input.borrow_mut();
        src.seek(SeekFrom::Start(offset))?;
        let first = src.read_line(64)?;
        if !first.starts_with(b"xref") {
            return Err(self.damaged_at(offset, "expected 'xref' keyword"));
        }

        loop {
            // peek for the trailer keyword
            let mark = src.tell()?;
            let mut probe = Vec::new();
            loop {
                match src.read_byte()? {
                    Some(b) if b.is_ascii_whitespace() => continue,
                    Some(b) => {
                        probe.push(b);
                        break;
                    }
                    None => break,
                }
            }
            if probe.first() == Some(&b't') {
                let mut rest = [0u8; 6];
                let n = src.read(&mut rest)?;
                if &rest[..n] == b"railer" {
                    break;
                }
                return Err(self.damaged_at(mark, "invalid xref subsection header"));
            }
            src.seek(SeekFrom::Start(mark))?;

            let header = src.read_line(64)?;
            let header = String::from_utf8_lossy(&header);
            let mut parts = header.split_whitespace();
            let (start, count) = match (
                parts.next().and_then(|p| p.parse::<u32>().ok()),
                parts.next().and_then(|p| p.parse::<u32>().ok()),
            ) {
                (Some(s), Some(c)) => (s, c),
                _ => {
                    return Err(self.damaged_at(
                        mark,
                        format!("invalid xref subsection header: {}", header.trim()),
                    ))
                }
            };

            for i in 0..count {
                let line = src.read_line(64)?;
                let text = String::from_utf8_lossy(&line);
                let mut fields = text.split_whitespace();
                let (entry_offset, generation, kind) = match (
                    fields.next().and_then(|f| f.parse::<u64>().ok()),
                    fields.next().and_then(|f| f.parse::<u16>().ok()),
                    fields.next(),
                ) {
                    (Some(o), Some(g), Some(k)) => (o, g, k),
                    _ => return Err(self.damaged_pdf("invalid xref entry")),
                };
                match kind {
                    "n" => {
                        self.st().xref.borrow_mut().insert_if_absent(
                            ObjGen::new(start + i, generation),
                            XrefEntry::in_use(entry_offset),
                        );
                    }
                    "f" => {}
                    other => {
                        return Err(
                            self.damaged_pdf(format!("unknown xref entry type: {other}"))
                        )
                    }
                }
            }
        }

        // the trailer dictionary follows the keyword
        let mut parser = ObjectParser::new(self, &mut *src);
        let value = parser.parse_value(0)?;
        drop(parser);
        drop(src);
        if !matches!(value, Value::Dictionary(_)) {
            return Err(self.damaged_pdf("trailer is not a dictionary"));
        }
        let trailer = Handle::new(value);
        let prev = trailer
            .get_key("Prev")
            .as_int()
            .and_then(|p| u64::try_from(p).ok());
        let xrefstm = trailer
            .get_key("XRefStm")
            .as_int()
            .and_then(|p| u64::try_from(p).ok());
        self.set_trailer_if_unset(trailer);
        Ok((prev, xrefstm))
    }

    /// Cross-reference stream; returns `/Prev`
    fn read_xref_stream(&self, offset: u64) -> Result<Option<u64>> {
        let input = self.file();
        let (dict, raw) = {
            let mut src = input.borrow_mut();
            src.seek(SeekFrom::Start(offset))?;
            let mut parser = ObjectParser::new(self, &mut *src);
            let header: Vec<Option<i64>> = (0..2)
                .map(|_| {
                    parser
                        .parse_value(0)
                        .ok()
                        .and_then(|v| v.as_int())
                })
                .collect();
            if header.iter().any(|h| h.is_none()) {
                return Err(self.damaged_at(offset, "expected cross-reference stream object"));
            }
            drop(parser);

            src.seek(SeekFrom::Start(offset))?;
            let mut parser = ObjectParser::new(self, &mut *src);
            let expected = ObjGen::new(header[0].unwrap_or(0) as u32, header[1].unwrap_or(0) as u16);
            let parsed = parser.parse_indirect(expected)?;
            let stream = match parsed.value {
                Value::Stream(s) => s,
                _ => return Err(self.damaged_at(offset, "cross-reference object is not a stream")),
            };
            let dict = stream.dict.clone();
            // /Length must be direct here, nothing else is loaded yet
            let length_handle = dict.get_key("Length");
            let length = if length_handle.is_indirect() {
                None
            } else {
                length_handle.as_int().and_then(|l| usize::try_from(l).ok())
            }
            .ok_or_else(|| {
                self.damaged_at(offset, "cross-reference stream has no direct /Length")
            })?;
            let data_offset = match stream.data {
                crate::object::StreamData::InFile { offset, .. } => offset,
                _ => return Err(self.damaged_at(offset, "cross-reference stream has no data")),
            };
            src.seek(SeekFrom::Start(data_offset))?;
            let mut raw = vec![0u8; length];
            let mut filled = 0;
            while filled < length {
                let n = src.read(&mut raw[filled..])?;
                if n == 0 {
                    return Err(self.damaged_at(data_offset, "EOF reading cross-reference stream"));
                }
                filled += n;
            }
            (dict, raw)
        };

        let decoded = self.decode_with_filters(&dict, &raw)?;

        let w = dict.get_key("W");
        if w.array_len() < 3 {
            return Err(self.damaged_pdf("cross-reference stream /W is invalid"));
        }
        let w1 = w.array_item(0).as_int().unwrap_or(1).max(0) as usize;
        let w2 = w.array_item(1).as_int().unwrap_or(2).max(0) as usize;
        let w3 = w.array_item(2).as_int().unwrap_or(1).max(0) as usize;
        let entry_size = w1 + w2 + w3;
        if entry_size == 0 {
            return Err(self.damaged_pdf("cross-reference stream /W is invalid"));
        }

        let size = dict.get_key("Size").as_int().unwrap_or(0);
        let index = dict.get_key("Index");
        let ranges: Vec<(u32, u32)> = if index.is_array() {
            let items = index.array_items();
            items
                .chunks(2)
                .filter_map(|pair| match pair {
                    [s, c] => Some((
                        s.as_int().unwrap_or(0).max(0) as u32,
                        c.as_int().unwrap_or(0).max(0) as u32,
                    )),
                    _ => None,
                })
                .collect()
        } else {
            vec![(0, size.max(0) as u32)]
        };

        let mut pos = 0usize;
        for (start, count) in ranges {
            for i in 0..count {
                if pos + entry_size > decoded.len() {
                    break;
                }
                let entry = &decoded[pos..pos + entry_size];
                pos += entry_size;
                let f1 = if w1 > 0 {
                    read_big_endian(&entry[..w1])
                } else {
                    1
                };
                let f2 = read_big_endian(&entry[w1..w1 + w2]);
                let f3 = if w3 > 0 {
                    read_big_endian(&entry[w1 + w2..])
                } else {
                    0
                };
                let mut xref = self.st().xref.borrow_mut();
                match f1 {
                    0 => {}
                    1 => xref.insert_if_absent(
                        ObjGen::new(start + i, f3 as u16),
                        XrefEntry::in_use(f2),
                    ),
                    2 => xref.insert_if_absent(
                        ObjGen::new(start + i, 0),
                        XrefEntry::in_stream(f2 as u32, f3 as u16),
                    ),
                    _ => {}
                }
            }
        }

        let prev = dict
            .get_key("Prev")
            .as_int()
            .and_then(|p| u64::try_from(p).ok());
        self.set_trailer_if_unset(dict);
        Ok(prev)
    }

    /// Decode raw stream bytes through `/Filter`, failing on unsupported
    /// filters
    pub(crate) fn decode_with_filters(&self, dict: &Handle, raw: &[u8]) -> Result<Vec<u8>> {
        let filters = self.filter_names(dict);
        let parms = self.decode_parms_list(dict, filters.len());
        let mut data = raw.to_vec();
        for (i, name) in filters.iter().enumerate() {
            let filter_fn = self.lookup_stream_filter(name).ok_or_else(|| {
                Error::unsupported(format!("stream filter /{name} is not registered"))
            })?;
            data = filter_fn(&data, &parms[i])?;
        }
        Ok(data)
    }

    /// The `/Filter` entry as a list of names
    pub(crate) fn filter_names(&self, dict: &Handle) -> Vec<String> {
        let filter = dict.get_key("Filter");
        if let Some(name) = filter.as_name() {
            vec![name.as_str().to_string()]
        } else if filter.is_array() {
            filter
                .array_items()
                .iter()
                .filter_map(|h| h.as_name().map(|n| n.as_str().to_string()))
                .collect()
        } else {
            Vec::new()
        }
    }

    /// `/DecodeParms` aligned with the filter list
    pub(crate) fn decode_parms_list(&self, dict: &Handle, n: usize) -> Vec<Handle> {
        let parms = dict.get_key("DecodeParms");
        let mut out = Vec::with_capacity(n);
        for i in 0..n {
            if parms.is_array() {
                out.push(parms.array_item(i));
            } else if i == 0 {
                out.push(parms.clone());
            } else {
                out.push(Handle::new_null());
            }
        }
        out
    }

    /// Reconstruct the xref by scanning the whole input for object headers
    /// and trailer dictionaries
    pub(crate) fn reconstruct_xref(&self) -> Result<()> {
        if self.st().xref.borrow().reconstructed {
            return Err(self.damaged_pdf("cross-reference reconstruction already attempted"));
        }
        self.warn(self.damage_record("file is damaged"))?;
        self.warn(self.damage_record("attempting to reconstruct cross-reference table"))?;
        {
            let mut xref = self.st().xref.borrow_mut();
            xref.reconstructed = true;
            xref.clear();
        }

        let data = self.read_entire_input()?;

        let headers = scan_object_headers(&data);
        if headers.is_empty() {
            return Err(
                self.damaged_pdf("unable to find objects while reconstructing damaged file")
            );
        }
        for (num, generation, at) in headers {
            self.st()
                .xref
                .borrow_mut()
                .insert(ObjGen::new(num, generation), XrefEntry::in_use(at));
        }
        let max = self.st().xref.borrow().max_obj();
        self.st().store.note_id(max);

        // collect /Root, /Info, /Encrypt, /ID from every trailer; the last
        // occurrence in the file wins
        let trailer = match self.st().trailer.borrow().clone() {
            Some(t) if t.is_dictionary() => t,
            _ => Handle::new_dictionary(),
        };
        let mut search = 0usize;
        while let Some(pos) = find_from(&data, b"trailer", search) {
            search = pos + 7;
            let mut src =
                crate::input::BufferInputSource::from_slice(&self.filename(), &data[search..]);
            let mut parser = ObjectParser::new(self, &mut src);
            if let Ok(Value::Dictionary(d)) = parser.parse_value(0) {
                for (key, value) in d {
                    let _ = trailer.replace_key(key.as_str(), value);
                }
            }
        }

        if !trailer.get_key("Root").is_dictionary() {
            // no usable trailer: hunt for a catalog among the objects
            let ids = self.st().xref.borrow().entry_ids();
            for og in ids {
                let candidate = self.get_object(og);
                if candidate.is_dictionary()
                    && candidate.get_key("Type").is_name_equal("Catalog")
                {
                    let _ = trailer.replace_key("Root", candidate);
                    break;
                }
            }
        }
        let _ = trailer.replace_key(
            "Size",
            Handle::new_integer(self.st().xref.borrow().max_obj() as i64 + 1),
        );
        self.set_trailer(trailer);
        Ok(())
    }

    fn read_entire_input(&self) -> Result<Vec<u8>> {
        let input = self.file();
        let mut src = input.borrow_mut();
        src.seek(SeekFrom::Start(0))?;
        let mut data = Vec::new();
        let mut chunk = [0u8; 65536];
        loop {
            let n = src.read(&mut chunk)?;
            if n == 0 {
                break;
            }
            data.extend_from_slice(&chunk[..n]);
        }
        Ok(data)
    }

    /// Parse every xref entry into the store; `false` means corruption was
    /// seen (callers may reconstruct and retry)
    pub(crate) fn resolve_all_objects(&self) -> bool {
        let ids = self.st().xref.borrow().entry_ids();
        let mut clean = true;
        for og in ids {
            let already = self
                .st()
                .store
                .slot(og)
                .map(|slot| !matches!(&*slot.borrow(), Value::Unresolved))
                .unwrap_or(false);
            if already {
                continue;
            }
            if let Err(err) = self.try_resolve(og) {
                clean = false;
                match err {
                    Error::Damaged(d) => {
                        if self.warn(d).is_err() {
                            break;
                        }
                    }
                    _ => break,
                }
            }
        }
        clean
    }

    /// Log the xref table
    pub fn show_xref(&self) {
        let map = self.st().xref.borrow().as_map();
        for (og, entry) in map {
            match entry.entry_type {
                XrefEntryType::InUse => {
                    log::info!("{og}: uncompressed; offset = {}", entry.offset)
                }
                XrefEntryType::InStream => log::info!(
                    "{og}: compressed; stream = {}, index = {}",
                    entry.stream_number,
                    entry.stream_index
                ),
            }
        }
    }
}

/// Register the built-in filters for a new document
pub(crate) fn flate_decode_filter(data: &[u8], parms: &Handle) -> Result<Vec<u8>> {
    crate::filter::decode_flate(data, FlateParams::from_handle(parms))
}

fn find_from(data: &[u8], pattern: &[u8], from: usize) -> Option<usize> {
    if from >= data.len() {
        return None;
    }
    data[from..]
        .windows(pattern.len())
        .position(|w| w == pattern)
        .map(|p| p + from)
}

fn is_boundary(b: u8) -> bool {
    b.is_ascii_whitespace() || matches!(b, b'<' | b'[' | b'(' | b'/' | b'%')
}

/// Scan for `num gen obj` headers, returning (num, gen, offset)
fn scan_object_headers(data: &[u8]) -> Vec<(u32, u16, u64)> {
    let mut out = Vec::new();
    let mut i = 0usize;
    while i < data.len() {
        if !data[i].is_ascii_digit() || (i > 0 && !data[i - 1].is_ascii_whitespace()) {
            i += 1;
            continue;
        }
        let start = i;
        let mut j = i;
        while j < data.len() && data[j].is_ascii_digit() {
            j += 1;
        }
        let num_end = j;
        while j < data.len() && (data[j] == b' ' || data[j] == b'\t') {
            j += 1;
        }
        if j == num_end {
            i += 1;
            continue;
        }
        let gen_start = j;
        while j < data.len() && data[j].is_ascii_digit() {
            j += 1;
        }
        if j == gen_start {
            i = num_end;
            continue;
        }
        let gen_end = j;
        while j < data.len() && (data[j] == b' ' || data[j] == b'\t') {
            j += 1;
        }
        if !data[j..].starts_with(b"obj") {
            i = num_end;
            continue;
        }
        let after = j + 3;
        if after < data.len() && !is_boundary(data[after]) {
            i = num_end;
            continue;
        }
        let num = std::str::from_utf8(&data[start..num_end])
            .ok()
            .and_then(|s| s.parse::<u32>().ok());
        let generation = std::str::from_utf8(&data[gen_start..gen_end])
            .ok()
            .and_then(|s| s.parse::<u16>().ok());
        if let (Some(num), Some(generation)) = (num, generation) {
            if num > 0 {
                out.push((num, generation, start as u64));
            }
        }
        i = after;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_constructors() {
        let e = XrefEntry::in_use(1234);
        assert!(e.is_in_use());
        assert_eq!(e.offset, 1234);
        let e = XrefEntry::in_stream(7, 3);
        assert!(e.is_in_stream());
        assert_eq!(e.stream_number, 7);
        assert_eq!(e.stream_index, 3);
    }

    #[test]
    fn test_table_first_wins() {
        let mut table = XrefTable::new();
        let og = ObjGen::from_obj(1);
        table.insert_if_absent(og, XrefEntry::in_use(100));
        table.insert_if_absent(og, XrefEntry::in_use(999));
        assert_eq!(table.get(og).unwrap().offset, 100);
        table.insert(og, XrefEntry::in_use(999));
        assert_eq!(table.get(og).unwrap().offset, 999);
    }

    #[test]
    fn test_table_max_obj() {
        let mut table = XrefTable::new();
        table.insert_if_absent(ObjGen::from_obj(3), XrefEntry::in_use(0));
        table.insert_if_absent(ObjGen::from_obj(12), XrefEntry::in_use(0));
        assert_eq!(table.max_obj(), 12);
        assert_eq!(table.size(), 2);
    }

    #[test]
    fn test_read_big_endian() {
        assert_eq!(read_big_endian(&[0x01, 0x00]), 256);
        assert_eq!(read_big_endian(&[0xFF]), 255);
        assert_eq!(read_big_endian(&[]), 0);
    }

    #[test]
    fn test_scan_object_headers() {
        let data = b"junk\n1 0 obj\n<< >>\nendobj\n12 3 obj\nnull\nendobj\nnot 4 0 objx\n";
        let found = scan_object_headers(data);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0], (1, 0, 5));
        assert_eq!(found[1].0, 12);
        assert_eq!(found[1].1, 3);
    }

    #[test]
    fn test_scan_rejects_mid_token() {
        // "34 0 obj" inside a longer number must not match at "4 0 obj"
        let data = b"1234 0 objx 7 0 obj\n";
        let found = scan_object_headers(data);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].0, 7);
    }
}
