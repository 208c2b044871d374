//! Stream filter implementations
//!
//! Only `/FlateDecode` (with PNG/TIFF predictors) ships built in; further
//! filters can be registered per document through
//! `Document::register_stream_filter`.

use std::io::Read;

use flate2::read::ZlibDecoder;

use crate::error::{Error, Result};
use crate::handle::Handle;

/// Parameters from a `/DecodeParms` dictionary
#[derive(Debug, Clone, Copy)]
pub struct FlateParams {
    pub predictor: i64,
    pub columns: i64,
    pub colors: i64,
    pub bits_per_component: i64,
}

impl Default for FlateParams {
    fn default() -> Self {
        Self {
            predictor: 1,
            columns: 1,
            colors: 1,
            bits_per_component: 8,
        }
    }
}

impl FlateParams {
    /// Read from a `/DecodeParms` handle; nulls yield the defaults
    pub fn from_handle(parms: &Handle) -> Self {
        if !parms.is_dictionary() {
            return Self::default();
        }
        Self {
            predictor: parms.get_key("Predictor").as_int().unwrap_or(1),
            columns: parms.get_key("Columns").as_int().unwrap_or(1),
            colors: parms.get_key("Colors").as_int().unwrap_or(1),
            bits_per_component: parms.get_key("BitsPerComponent").as_int().unwrap_or(8),
        }
    }
}

/// Decode FlateDecode (zlib) data, applying any predictor
pub fn decode_flate(data: &[u8], params: FlateParams) -> Result<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(data);
    let mut decompressed = Vec::new();
    decoder
        .read_to_end(&mut decompressed)
        .map_err(|e| Error::logic(format!("FlateDecode failed: {e}")))?;
    if params.predictor > 1 {
        apply_predictor(&decompressed, params)
    } else {
        Ok(decompressed)
    }
}

/// Undo a TIFF (2) or PNG (10-15) predictor
pub fn apply_predictor(data: &[u8], params: FlateParams) -> Result<Vec<u8>> {
    let colors = params.colors.max(1) as usize;
    let bits = params.bits_per_component.max(8) as usize;
    let columns = params.columns.max(1) as usize;
    let bytes_per_pixel = (colors * bits).div_ceil(8);
    let bytes_per_row = (colors * bits * columns).div_ceil(8);

    match params.predictor {
        1 => Ok(data.to_vec()),
        2 => Ok(tiff_predictor(data, bytes_per_row, bytes_per_pixel)),
        10..=15 => png_predictor(data, bytes_per_row, bytes_per_pixel),
        other => Err(Error::unsupported(format!("predictor {other}"))),
    }
}

fn tiff_predictor(data: &[u8], bytes_per_row: usize, bytes_per_pixel: usize) -> Vec<u8> {
    let mut result = Vec::with_capacity(data.len());
    for row in data.chunks(bytes_per_row) {
        let mut prev = vec![0u8; bytes_per_pixel];
        for pixel in row.chunks(bytes_per_pixel) {
            for (i, &byte) in pixel.iter().enumerate() {
                let decoded = byte.wrapping_add(prev[i]);
                result.push(decoded);
                prev[i] = decoded;
            }
        }
    }
    result
}

fn png_predictor(data: &[u8], bytes_per_row: usize, bytes_per_pixel: usize) -> Result<Vec<u8>> {
    // each row is prefixed by a filter-type byte
    let row_size = bytes_per_row + 1;
    let mut result = Vec::with_capacity(data.len());
    let mut prev_row = vec![0u8; bytes_per_row];

    for row_data in data.chunks(row_size) {
        if row_data.len() < 2 {
            continue;
        }
        let filter_type = row_data[0];
        let mut row = row_data[1..].to_vec();
        row.resize(bytes_per_row, 0);

        let row_start = result.len();
        for (i, &byte) in row.iter().enumerate() {
            let left = if i >= bytes_per_pixel {
                result[row_start + i - bytes_per_pixel]
            } else {
                0
            };
            let up = prev_row[i];
            let up_left = if i >= bytes_per_pixel {
                prev_row[i - bytes_per_pixel]
            } else {
                0
            };
            let decoded = match filter_type {
                0 => byte,
                1 => byte.wrapping_add(left),
                2 => byte.wrapping_add(up),
                3 => byte.wrapping_add(((left as u16 + up as u16) / 2) as u8),
                4 => byte.wrapping_add(paeth(left, up, up_left)),
                other => {
                    return Err(Error::unsupported(format!("PNG filter type {other}")));
                }
            };
            result.push(decoded);
        }
        prev_row.copy_from_slice(&result[row_start..]);
    }
    Ok(result)
}

fn paeth(a: u8, b: u8, c: u8) -> u8 {
    let p = a as i16 + b as i16 - c as i16;
    let pa = (p - a as i16).abs();
    let pb = (p - b as i16).abs();
    let pc = (p - c as i16).abs();
    if pa <= pb && pa <= pc {
        a
    } else if pb <= pc {
        b
    } else {
        c
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::ZlibEncoder;
    use flate2::Compression;
    use std::io::Read;

    fn zlib(data: &[u8]) -> Vec<u8> {
        let mut enc = ZlibEncoder::new(data, Compression::new(6));
        let mut out = Vec::new();
        enc.read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn test_decode_flate_plain() {
        let original = b"stream payload stream payload stream payload";
        let decoded = decode_flate(&zlib(original), FlateParams::default()).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_png_up_predictor() {
        // two rows of three columns, filter type 2 (Up)
        let raw = vec![
            2, 1, 2, 3, // row 1: up row is zero, decodes to 1 2 3
            2, 1, 1, 1, // row 2: adds previous row, decodes to 2 3 4
        ];
        let params = FlateParams {
            predictor: 12,
            columns: 3,
            ..Default::default()
        };
        let decoded = apply_predictor(&raw, params).unwrap();
        assert_eq!(decoded, vec![1, 2, 3, 2, 3, 4]);
    }

    #[test]
    fn test_png_sub_predictor() {
        let raw = vec![1, 5, 1, 1];
        let params = FlateParams {
            predictor: 11,
            columns: 3,
            ..Default::default()
        };
        let decoded = apply_predictor(&raw, params).unwrap();
        assert_eq!(decoded, vec![5, 6, 7]);
    }

    #[test]
    fn test_tiff_predictor() {
        let raw = vec![10, 1, 1];
        let params = FlateParams {
            predictor: 2,
            columns: 3,
            ..Default::default()
        };
        let decoded = apply_predictor(&raw, params).unwrap();
        assert_eq!(decoded, vec![10, 11, 12]);
    }

    #[test]
    fn test_unsupported_predictor() {
        let params = FlateParams {
            predictor: 7,
            ..Default::default()
        };
        assert!(apply_predictor(&[0], params).is_err());
    }
}
