// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Device wire codec.
//
// Every frame on the stream is `length:u32 | kind:u8 | body`, big-endian,
// where `length` counts the kind byte and the body.
//
//   HELLO     0x01  addr_len:u16 | addr (UTF-8)          device -> gateway
//   ACK       0x02  print_id:u32                         device -> gateway
//   HEARTBEAT 0x03  (empty)                              device -> gateway
//   COMMAND   0x10  print_id:u32 | tag:u8 | count:u8 |   gateway -> device
//                   count x (width:u16 | height:u16 | packed bits)

use sirius_core::error::{Result, SiriusError};
use sirius_core::types::{DeviceAddress, PixelBuffer, PrintId, RASTER_WIDTH};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::messages::{Message, MessageKind};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

pub const KIND_HELLO: u8 = 0x01;
pub const KIND_ACK: u8 = 0x02;
pub const KIND_HEARTBEAT: u8 = 0x03;
pub const KIND_COMMAND: u8 = 0x10;

/// Length prefix plus kind byte.
const HEADER_LEN: usize = 5;

// ---------------------------------------------------------------------------
// Raw frames
// ---------------------------------------------------------------------------

/// One length-delimited frame, not yet interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: u8,
    pub body: Vec<u8>,
}

impl Frame {
    pub fn new(kind: u8, body: Vec<u8>) -> Self {
        Self { kind, body }
    }

    /// Serialise including the length prefix.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN + self.body.len());
        buf.extend_from_slice(&((self.body.len() + 1) as u32).to_be_bytes());
        buf.push(self.kind);
        buf.extend_from_slice(&self.body);
        buf
    }
}

/// Read the next frame.
///
/// Returns `Ok(None)` when the peer closes the stream cleanly between frames.
/// A stream that ends partway through a frame, length prefix included, is
/// truncated.  A frame whose declared length is zero or above `max_len` is a
/// protocol violation; the stream cannot be resynchronised after it.
pub async fn read_frame<R>(reader: &mut R, max_len: usize) -> Result<Option<Frame>>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    let mut filled = 0;
    while filled < len_buf.len() {
        let n = reader.read(&mut len_buf[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(SiriusError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("stream ended after {filled} of 4 length bytes"),
            )));
        }
        filled += n;
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len == 0 {
        return Err(SiriusError::ProtocolViolation(
            "zero-length frame has no kind byte".into(),
        ));
    }
    if len > max_len {
        return Err(SiriusError::ProtocolViolation(format!(
            "frame of {len} bytes exceeds the {max_len} byte limit"
        )));
    }

    let mut data = vec![0u8; len];
    reader.read_exact(&mut data).await?;
    let body = data.split_off(1);
    Ok(Some(Frame {
        kind: data[0],
        body,
    }))
}

/// Write one frame and flush it.
pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&frame.to_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Device frames
// ---------------------------------------------------------------------------

/// Frames a device sends to the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceFrame {
    Hello(DeviceAddress),
    Ack(PrintId),
    Heartbeat,
}

impl DeviceFrame {
    pub fn parse(frame: &Frame) -> Result<Self> {
        match frame.kind {
            KIND_HELLO => {
                let mut cursor = Cursor::new(&frame.body);
                let len = cursor.u16()? as usize;
                let raw = cursor.take(len)?;
                cursor.finish()?;
                let address = std::str::from_utf8(raw).map_err(|e| {
                    SiriusError::ProtocolViolation(format!("HELLO address is not UTF-8: {e}"))
                })?;
                if address.is_empty() {
                    return Err(SiriusError::ProtocolViolation(
                        "HELLO carries an empty address".into(),
                    ));
                }
                Ok(Self::Hello(DeviceAddress::new(address)))
            }
            KIND_ACK => {
                let mut cursor = Cursor::new(&frame.body);
                let id = cursor.u32()?;
                cursor.finish()?;
                Ok(Self::Ack(PrintId(id)))
            }
            KIND_HEARTBEAT => {
                if !frame.body.is_empty() {
                    return Err(SiriusError::ProtocolViolation(format!(
                        "HEARTBEAT carries {} unexpected bytes",
                        frame.body.len()
                    )));
                }
                Ok(Self::Heartbeat)
            }
            other => Err(SiriusError::ProtocolViolation(format!(
                "unexpected frame kind 0x{other:02X} from device"
            ))),
        }
    }

    pub fn to_frame(&self) -> Frame {
        match self {
            Self::Hello(address) => {
                let raw = address.as_str().as_bytes();
                let mut body = Vec::with_capacity(2 + raw.len());
                body.extend_from_slice(&(raw.len() as u16).to_be_bytes());
                body.extend_from_slice(raw);
                Frame::new(KIND_HELLO, body)
            }
            Self::Ack(id) => Frame::new(KIND_ACK, id.0.to_be_bytes().to_vec()),
            Self::Heartbeat => Frame::new(KIND_HEARTBEAT, Vec::new()),
        }
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// A validated command body without its print id.
///
/// Produced before any print id is allocated, so an encoding failure never
/// consumes an id or touches the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedMessage {
    kind: MessageKind,
    payload: Vec<u8>,
}

impl EncodedMessage {
    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    /// `tag | count | bitmaps`, the part of a COMMAND body after the print id.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Full COMMAND frame for `print_id`.
    pub fn command_frame(&self, print_id: PrintId) -> Frame {
        let mut body = Vec::with_capacity(4 + self.payload.len());
        body.extend_from_slice(&print_id.0.to_be_bytes());
        body.extend_from_slice(&self.payload);
        Frame::new(KIND_COMMAND, body)
    }
}

/// Serialises messages for devices of one raster width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageEncoder {
    raster_width: u32,
}

impl Default for MessageEncoder {
    fn default() -> Self {
        Self::new(RASTER_WIDTH)
    }
}

impl MessageEncoder {
    pub fn new(raster_width: u32) -> Self {
        Self { raster_width }
    }

    /// Check every bitmap and build the command payload.
    pub fn encode(&self, message: &Message) -> Result<EncodedMessage> {
        let kind = message.kind();
        let bitmaps = message.bitmaps();

        if self.raster_width > u32::from(u16::MAX) {
            return Err(SiriusError::Encoding(format!(
                "raster width {} does not fit a frame, at most {}",
                self.raster_width,
                u16::MAX
            )));
        }
        for (index, bitmap) in bitmaps.iter().enumerate() {
            if bitmap.width() != self.raster_width {
                return Err(SiriusError::Encoding(format!(
                    "{kind:?} bitmap {index} is {} dots wide, device needs {}",
                    bitmap.width(),
                    self.raster_width
                )));
            }
            if bitmap.height() > u32::from(u16::MAX) {
                return Err(SiriusError::Encoding(format!(
                    "{kind:?} bitmap {index} has {} rows, at most {} fit a frame",
                    bitmap.height(),
                    u16::MAX
                )));
            }
        }

        let size: usize = bitmaps.iter().map(|b| 4 + b.packed().len()).sum();
        let mut payload = Vec::with_capacity(2 + size);
        payload.push(kind.tag());
        payload.push(bitmaps.len() as u8);
        for bitmap in bitmaps {
            payload.extend_from_slice(&(bitmap.width() as u16).to_be_bytes());
            payload.extend_from_slice(&(bitmap.height() as u16).to_be_bytes());
            payload.extend_from_slice(bitmap.packed());
        }

        Ok(EncodedMessage { kind, payload })
    }
}

/// Parse a COMMAND body back into its print id and message.
pub fn decode_command(body: &[u8]) -> Result<(PrintId, Message)> {
    let mut cursor = Cursor::new(body);
    let print_id = PrintId(cursor.u32()?);
    let tag = cursor.u8()?;
    let kind = MessageKind::from_tag(tag)
        .ok_or_else(|| SiriusError::ProtocolViolation(format!("unknown variant tag {tag}")))?;

    let count = cursor.u8()? as usize;
    if count != kind.bitmap_count() {
        return Err(SiriusError::ProtocolViolation(format!(
            "{kind:?} carries {} bitmaps, frame declares {count}",
            kind.bitmap_count()
        )));
    }

    let mut bitmaps = Vec::with_capacity(count);
    for _ in 0..count {
        let width = u32::from(cursor.u16()?);
        let height = u32::from(cursor.u16()?);
        let len = PixelBuffer::stride_for(width) * height as usize;
        let packed = cursor.take(len)?.to_vec();
        let bitmap = PixelBuffer::from_packed(width, height, packed)
            .map_err(|e| SiriusError::ProtocolViolation(e.to_string()))?;
        bitmaps.push(bitmap);
    }
    cursor.finish()?;

    let message = Message::from_parts(kind, bitmaps).ok_or_else(|| {
        SiriusError::ProtocolViolation(format!("{kind:?} frame has the wrong bitmap count"))
    })?;
    Ok((print_id, message))
}

// ---------------------------------------------------------------------------
// Byte cursor
// ---------------------------------------------------------------------------

/// Bounds-checked big-endian reader over a frame body.
struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.data.len() - self.pos < n {
            return Err(SiriusError::ProtocolViolation(format!(
                "truncated frame: wanted {n} bytes at offset {}, {} left",
                self.pos,
                self.data.len() - self.pos
            )));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Fail if bytes remain.
    fn finish(&self) -> Result<()> {
        if self.pos != self.data.len() {
            return Err(SiriusError::ProtocolViolation(format!(
                "{} trailing bytes after frame body",
                self.data.len() - self.pos
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
