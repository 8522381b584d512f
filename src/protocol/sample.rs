//! Sample framing and channel value conversion
//!
//! Every sample on the data connection is one frame:
//!
//! ```text
//! +-----+---------------------+------------------------------------+
//! | tag | timestamp (f64 LE)  | values                             |
//! | u8  | only if tag == 2    | channel_count * value              |
//! +-----+---------------------+------------------------------------+
//!
//! numeric value: fixed-width little-endian (int8..int64, float32, double64)
//! string value:  u32 LE length + bytes
//! ```
//!
//! A tag of 1 means the receiver deduces the timestamp as the previous one
//! plus one sampling interval.
//!
//! Values are carried through the crate in their wire encoding; the
//! [`ChannelValue`] trait converts between caller types and the stream's
//! declared [`ChannelFormat`].

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};
use crate::info::ChannelFormat;
use crate::protocol::constants::{
    MAX_STRING_VALUE_SIZE, TAG_DEDUCED_TIMESTAMP, TAG_TRANSMITTED_TIMESTAMP,
};

/// Borrowed view of one channel value in neutral form
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WireValue<'a> {
    Int(i64),
    Float(f64),
    Blob(&'a [u8]),
}

/// Types that can be pushed into or pulled from a stream
///
/// Numeric types convert into any numeric format (floats are rounded and
/// saturated when the stream is integral). Text and binary types only travel
/// in [`ChannelFormat::String`] streams.
pub trait ChannelValue: Sized + Send + Sync + 'static {
    fn to_wire(&self) -> WireValue<'_>;

    fn from_wire(value: WireValue<'_>) -> Result<Self>;
}

fn mismatch(what: &str) -> Error {
    Error::argument(format!("{} values cannot be converted to this format", what))
}

fn float_to_int(f: f64) -> i64 {
    // `as` saturates and maps NaN to 0
    f.round() as i64
}

macro_rules! int_value {
    ($($t:ty),*) => {$(
        impl ChannelValue for $t {
            fn to_wire(&self) -> WireValue<'_> {
                WireValue::Int(*self as i64)
            }

            fn from_wire(value: WireValue<'_>) -> Result<Self> {
                match value {
                    WireValue::Int(i) => Ok(i.clamp(<$t>::MIN as i64, <$t>::MAX as i64) as $t),
                    WireValue::Float(f) => Ok(f.round() as $t),
                    WireValue::Blob(_) => Err(mismatch("string")),
                }
            }
        }
    )*};
}

int_value!(i8, i16, i32, i64);

impl ChannelValue for f32 {
    fn to_wire(&self) -> WireValue<'_> {
        WireValue::Float(*self as f64)
    }

    fn from_wire(value: WireValue<'_>) -> Result<Self> {
        match value {
            WireValue::Int(i) => Ok(i as f32),
            WireValue::Float(f) => Ok(f as f32),
            WireValue::Blob(_) => Err(mismatch("string")),
        }
    }
}

impl ChannelValue for f64 {
    fn to_wire(&self) -> WireValue<'_> {
        WireValue::Float(*self)
    }

    fn from_wire(value: WireValue<'_>) -> Result<Self> {
        match value {
            WireValue::Int(i) => Ok(i as f64),
            WireValue::Float(f) => Ok(f),
            WireValue::Blob(_) => Err(mismatch("string")),
        }
    }
}

impl ChannelValue for String {
    fn to_wire(&self) -> WireValue<'_> {
        WireValue::Blob(self.as_bytes())
    }

    fn from_wire(value: WireValue<'_>) -> Result<Self> {
        match value {
            WireValue::Blob(b) => Ok(String::from_utf8_lossy(b).into_owned()),
            _ => Err(mismatch("numeric")),
        }
    }
}

impl ChannelValue for Vec<u8> {
    fn to_wire(&self) -> WireValue<'_> {
        WireValue::Blob(self)
    }

    fn from_wire(value: WireValue<'_>) -> Result<Self> {
        match value {
            WireValue::Blob(b) => Ok(b.to_vec()),
            _ => Err(mismatch("numeric")),
        }
    }
}

impl ChannelValue for Bytes {
    fn to_wire(&self) -> WireValue<'_> {
        WireValue::Blob(self)
    }

    fn from_wire(value: WireValue<'_>) -> Result<Self> {
        match value {
            WireValue::Blob(b) => Ok(Bytes::copy_from_slice(b)),
            _ => Err(mismatch("numeric")),
        }
    }
}

/// Append one value in the wire encoding of `format`
pub fn encode_value(format: ChannelFormat, value: WireValue<'_>, buf: &mut BytesMut) -> Result<()> {
    match (format, value) {
        (ChannelFormat::Undefined, _) => {
            return Err(Error::argument("channel format is undefined"));
        }
        (ChannelFormat::String, WireValue::Blob(b)) => {
            if b.len() > MAX_STRING_VALUE_SIZE {
                return Err(Error::argument(format!(
                    "string value of {} bytes exceeds the {} byte limit",
                    b.len(),
                    MAX_STRING_VALUE_SIZE
                )));
            }
            buf.put_u32_le(b.len() as u32);
            buf.put_slice(b);
        }
        (ChannelFormat::String, _) => return Err(mismatch("numeric")),
        (_, WireValue::Blob(_)) => return Err(mismatch("string")),
        (ChannelFormat::Float32, WireValue::Int(i)) => buf.put_f32_le(i as f32),
        (ChannelFormat::Float32, WireValue::Float(f)) => buf.put_f32_le(f as f32),
        (ChannelFormat::Double64, WireValue::Int(i)) => buf.put_f64_le(i as f64),
        (ChannelFormat::Double64, WireValue::Float(f)) => buf.put_f64_le(f),
        (int_format, value) => {
            let i = match value {
                WireValue::Int(i) => i,
                WireValue::Float(f) => float_to_int(f),
                WireValue::Blob(_) => return Err(mismatch("string")),
            };
            match int_format {
                ChannelFormat::Int8 => buf.put_i8(i.clamp(i8::MIN as i64, i8::MAX as i64) as i8),
                ChannelFormat::Int16 => {
                    buf.put_i16_le(i.clamp(i16::MIN as i64, i16::MAX as i64) as i16)
                }
                ChannelFormat::Int32 => {
                    buf.put_i32_le(i.clamp(i32::MIN as i64, i32::MAX as i64) as i32)
                }
                _ => buf.put_i64_le(i),
            }
        }
    }
    Ok(())
}

fn short_read() -> Error {
    Error::internal("sample data ends in the middle of a value")
}

/// Read one value at `pos`, advancing it
pub fn read_value<'a>(format: ChannelFormat, data: &'a [u8], pos: &mut usize) -> Result<WireValue<'a>> {
    let mut cursor = data.get(*pos..).ok_or_else(short_read)?;
    let start = cursor.len();
    let size = format.value_size();
    if format.is_numeric() && cursor.len() < size {
        return Err(short_read());
    }

    let value = match format {
        ChannelFormat::Float32 => WireValue::Float(cursor.get_f32_le() as f64),
        ChannelFormat::Double64 => WireValue::Float(cursor.get_f64_le()),
        ChannelFormat::Int8 => WireValue::Int(cursor.get_i8() as i64),
        ChannelFormat::Int16 => WireValue::Int(cursor.get_i16_le() as i64),
        ChannelFormat::Int32 => WireValue::Int(cursor.get_i32_le() as i64),
        ChannelFormat::Int64 => WireValue::Int(cursor.get_i64_le()),
        ChannelFormat::String => {
            if cursor.len() < 4 {
                return Err(short_read());
            }
            let len = cursor.get_u32_le() as usize;
            if cursor.len() < len {
                return Err(short_read());
            }
            let consumed = 4 + len;
            let blob = &data[*pos + 4..*pos + consumed];
            *pos += consumed;
            return Ok(WireValue::Blob(blob));
        }
        ChannelFormat::Undefined => {
            return Err(Error::argument("channel format is undefined"));
        }
    };
    *pos += start - cursor.len();
    Ok(value)
}

/// One timestamped sample with its values in wire encoding
#[derive(Debug, Clone, PartialEq)]
pub struct RawSample {
    pub timestamp: f64,
    pub data: Bytes,
}

impl RawSample {
    /// Encode `values` (exactly one per channel) into a sample
    pub fn encode<T: ChannelValue>(
        format: ChannelFormat,
        channel_count: usize,
        timestamp: f64,
        values: &[T],
    ) -> Result<Self> {
        if values.len() != channel_count {
            return Err(Error::argument(format!(
                "sample has {} values but the stream has {} channels",
                values.len(),
                channel_count
            )));
        }
        let width = format.value_size().max(8);
        let mut buf = BytesMut::with_capacity(values.len() * width);
        for v in values {
            encode_value(format, v.to_wire(), &mut buf)?;
        }
        Ok(Self {
            timestamp,
            data: buf.freeze(),
        })
    }

    /// Decode the values into `out` (one slot per channel)
    pub fn decode_into<T: ChannelValue>(&self, format: ChannelFormat, out: &mut [T]) -> Result<()> {
        let mut pos = 0;
        for slot in out.iter_mut() {
            *slot = T::from_wire(read_value(format, &self.data, &mut pos)?)?;
        }
        Ok(())
    }

    /// Append the frame (always with a transmitted timestamp)
    pub fn write_frame(&self, buf: &mut BytesMut) {
        buf.reserve(9 + self.data.len());
        buf.put_u8(TAG_TRANSMITTED_TIMESTAMP);
        buf.put_f64_le(self.timestamp);
        buf.put_slice(&self.data);
    }
}

/// Incremental frame decoder for one data connection
#[derive(Debug)]
pub struct SampleDecoder {
    format: ChannelFormat,
    channel_count: usize,
    interval: f64,
    last_timestamp: f64,
}

impl SampleDecoder {
    pub fn new(format: ChannelFormat, channel_count: usize, nominal_srate: f64) -> Self {
        Self {
            format,
            channel_count,
            interval: if nominal_srate > 0.0 {
                1.0 / nominal_srate
            } else {
                0.0
            },
            last_timestamp: 0.0,
        }
    }

    /// Length of the value block starting at `start`, or `None` if incomplete
    fn values_len(&self, buf: &[u8], start: usize) -> Result<Option<usize>> {
        let size = self.format.value_size();
        if size > 0 {
            return Ok(Some(size * self.channel_count));
        }
        if !self.format.is_variable_length() {
            return Err(Error::argument("channel format is undefined"));
        }

        let mut pos = start;
        for _ in 0..self.channel_count {
            let Some(mut header) = buf.get(pos..pos + 4) else {
                return Ok(None);
            };
            let len = header.get_u32_le() as usize;
            if len > MAX_STRING_VALUE_SIZE {
                return Err(Error::internal(format!(
                    "string value of {} bytes exceeds the {} byte limit",
                    len, MAX_STRING_VALUE_SIZE
                )));
            }
            pos += 4 + len;
        }
        Ok(Some(pos - start))
    }

    /// Decode one frame from `buf`
    ///
    /// Returns `Ok(None)` when more data is needed; consumed bytes are split
    /// off the front of `buf`.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<RawSample>> {
        let Some(&tag) = buf.first() else {
            return Ok(None);
        };
        let header = match tag {
            TAG_DEDUCED_TIMESTAMP => 1,
            TAG_TRANSMITTED_TIMESTAMP => 9,
            other => {
                return Err(Error::internal(format!("invalid sample tag {}", other)));
            }
        };
        if buf.len() < header {
            return Ok(None);
        }
        let Some(values_len) = self.values_len(buf, header)? else {
            return Ok(None);
        };
        if buf.len() < header + values_len {
            return Ok(None);
        }

        let mut frame = buf.split_to(header + values_len).freeze();
        frame.advance(1);
        let timestamp = if tag == TAG_TRANSMITTED_TIMESTAMP {
            frame.get_f64_le()
        } else {
            self.last_timestamp + self.interval
        };
        self.last_timestamp = timestamp;

        Ok(Some(RawSample {
            timestamp,
            data: frame,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_conversion_rounds_and_saturates() {
        let s = RawSample::encode(ChannelFormat::Int8, 3, 1.0, &[1.6f64, 1000.0, -1000.0]).unwrap();
        let mut out = [0i32; 3];
        s.decode_into(ChannelFormat::Int8, &mut out).unwrap();
        assert_eq!(out, [2, 127, -128]);

        let s = RawSample::encode(ChannelFormat::Float32, 2, 1.0, &[3i64, -7]).unwrap();
        let mut out = [0f64; 2];
        s.decode_into(ChannelFormat::Float32, &mut out).unwrap();
        assert_eq!(out, [3.0, -7.0]);

        let mut narrow = [0i16; 2];
        let s = RawSample::encode(ChannelFormat::Int64, 2, 1.0, &[70000i64, -70000]).unwrap();
        s.decode_into(ChannelFormat::Int64, &mut narrow).unwrap();
        assert_eq!(narrow, [i16::MAX, i16::MIN]);
    }

    #[test]
    fn test_string_and_numeric_do_not_mix() {
        let err = RawSample::encode(ChannelFormat::Float32, 1, 0.0, &["x".to_string()]).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Argument);
        assert!(RawSample::encode(ChannelFormat::String, 1, 0.0, &[1.0f32]).is_err());
        assert!(RawSample::encode(ChannelFormat::Undefined, 1, 0.0, &[1.0f32]).is_err());

        let s = RawSample::encode(ChannelFormat::String, 1, 0.0, &["x".to_string()]).unwrap();
        let mut out = [0f32; 1];
        assert!(s.decode_into(ChannelFormat::String, &mut out).is_err());
    }

    #[test]
    fn test_channel_count_enforced() {
        let err = RawSample::encode(ChannelFormat::Float32, 3, 0.0, &[1.0f32, 2.0]).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Argument);
    }

    #[test]
    fn test_decoder_handles_partial_frames() {
        let values = ["hello".to_string(), String::new(), "wörld".to_string()];
        let sample = RawSample::encode(ChannelFormat::String, 3, 42.5, &values).unwrap();
        let mut wire = BytesMut::new();
        sample.write_frame(&mut wire);
        let full = wire.clone();

        let mut decoder = SampleDecoder::new(ChannelFormat::String, 3, 0.0);
        let mut buf = BytesMut::new();
        for (i, byte) in full.iter().enumerate() {
            buf.put_u8(*byte);
            let decoded = decoder.decode(&mut buf).unwrap();
            if i + 1 < full.len() {
                assert!(decoded.is_none(), "decoded early at byte {}", i);
            } else {
                let decoded = decoded.unwrap();
                assert_eq!(decoded.timestamp, 42.5);
                let mut out = vec![String::new(); 3];
                decoded.decode_into(ChannelFormat::String, &mut out).unwrap();
                assert_eq!(out, values);
            }
        }
        assert!(buf.is_empty());
    }

    #[test]
    fn test_deduced_timestamps() {
        let mut decoder = SampleDecoder::new(ChannelFormat::Int16, 1, 100.0);
        let mut buf = BytesMut::new();
        RawSample::encode(ChannelFormat::Int16, 1, 10.0, &[1i16])
            .unwrap()
            .write_frame(&mut buf);
        buf.put_u8(TAG_DEDUCED_TIMESTAMP);
        buf.put_i16_le(2);
        buf.put_u8(TAG_DEDUCED_TIMESTAMP);
        buf.put_i16_le(3);

        let a = decoder.decode(&mut buf).unwrap().unwrap();
        let b = decoder.decode(&mut buf).unwrap().unwrap();
        let c = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(a.timestamp, 10.0);
        assert!((b.timestamp - 10.01).abs() < 1e-9);
        assert!((c.timestamp - 10.02).abs() < 1e-9);
        assert!(decoder.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_decoder_rejects_bad_input() {
        let mut decoder = SampleDecoder::new(ChannelFormat::Float32, 1, 0.0);
        let mut buf = BytesMut::from(&[7u8, 0, 0, 0, 0][..]);
        assert!(decoder.decode(&mut buf).is_err());

        let mut decoder = SampleDecoder::new(ChannelFormat::String, 1, 0.0);
        let mut buf = BytesMut::new();
        buf.put_u8(TAG_DEDUCED_TIMESTAMP);
        buf.put_u32_le(u32::MAX);
        assert!(decoder.decode(&mut buf).is_err());
    }

    #[test]
    fn test_blob_types() {
        let blob = vec![0u8, 255, 1];
        let s = RawSample::encode(ChannelFormat::String, 1, 0.0, &[blob.clone()]).unwrap();
        let mut out = [Bytes::new()];
        s.decode_into(ChannelFormat::String, &mut out).unwrap();
        assert_eq!(&out[0][..], &blob[..]);
    }
}
