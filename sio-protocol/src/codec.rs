//! The codec contract (§6.2): an encoder that turns one [`Packet`] into a
//! sequence of wire frames, and a streaming decoder that reassembles frames
//! back into packets.
//!
//! No published crate implements this exact namespaced, ack-correlated
//! framing, so it is written out like the rest of the protocol logic, using
//! `serde_json` only for the payload layer.

use sio_core::error::{SioError, SioResult};
use tracing::trace;

use crate::packet::{Packet, PacketOptions, PacketType};

/// A single frame handed to or received from the engine transport.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

/// Encoder: packet in, one or more wire frames out (§6.2).
pub trait Encoder: Send + Sync {
    fn encode(&self, packet: &Packet) -> Vec<Frame>;
}

/// Streaming decoder: frames in, in order; complete packets out.
///
/// Implementations buffer a binary packet's header until all declared
/// attachments have arrived before yielding the reassembled [`Packet`].
pub trait Decoder: Send {
    fn add(&mut self, frame: Frame) -> SioResult<Vec<Packet>>;

    /// Discard any in-flight (partially reassembled) packet state.
    fn destroy(&mut self);
}

/// The default text-frame codec described in §6.2.
///
/// Header frame shape: `<type digit>[<attachment count>-][<nsp>,][<id>]<json>`.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultCodec;

impl Encoder for DefaultCodec {
    fn encode(&self, packet: &Packet) -> Vec<Frame> {
        let mut header = String::new();
        header.push(char::from_digit(packet.ptype.as_u8() as u32, 10).unwrap());

        if packet.ptype.is_binary() {
            header.push_str(&packet.attachments.len().to_string());
            header.push('-');
        }

        if packet.nsp != "/" {
            header.push_str(&packet.nsp);
            header.push(',');
        }

        if let Some(id) = packet.id {
            header.push_str(&id.to_string());
        }

        if let Some(data) = &packet.data {
            header.push_str(&data.to_string());
        }

        let mut frames = vec![Frame::Text(header)];
        for attachment in &packet.attachments {
            frames.push(Frame::Binary(attachment.clone()));
        }
        frames
    }
}

/// Stateful streaming [`Decoder`] implementation paired with [`DefaultCodec`].
#[derive(Default)]
pub struct StreamDecoder {
    pending: Option<PendingHeaderState>,
}

struct PendingHeaderState {
    ptype: PacketType,
    nsp: String,
    id: Option<u64>,
    data: Option<serde_json::Value>,
    remaining: usize,
    attachments: Vec<Vec<u8>>,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self { pending: None }
    }

    fn decode_header(text: &str) -> SioResult<PendingHeaderState> {
        let mut chars = text.char_indices().peekable();
        let (_, first) = chars
            .next()
            .ok_or_else(|| SioError::Codec("empty frame".into()))?;
        let ptype = first
            .to_digit(10)
            .and_then(|d| PacketType::from_u8(d as u8))
            .ok_or_else(|| SioError::Codec(format!("unknown packet type {first}")))?;

        let mut rest_start = 1;
        let mut remaining = 0usize;

        if ptype.is_binary() {
            let mut digits = String::new();
            while let Some(&(_, c)) = chars.peek() {
                if c.is_ascii_digit() {
                    digits.push(c);
                    chars.next();
                } else {
                    break
                }
            }
            match chars.next() {
                Some((idx, '-')) => {
                    remaining = digits
                        .parse()
                        .map_err(|_| SioError::Codec("bad attachment count".into()))?;
                    rest_start = idx + 1;
                }
                _ => return Err(SioError::Codec("missing attachment count separator".into())),
            }
        }

        let remainder = &text[rest_start..];

        let (nsp, after_nsp) = if let Some(rest) = remainder.strip_prefix('/') {
            match rest.find(',') {
                Some(comma) => (format!("/{}", &rest[..comma]), &rest[comma + 1..]),
                None => (format!("/{rest}"), ""),
            }
        } else {
            ("/".to_string(), remainder)
        };

        let mut id_digits = String::new();
        let mut json_start = 0;
        for (idx, c) in after_nsp.char_indices() {
            if c.is_ascii_digit() {
                id_digits.push(c);
                json_start = idx + c.len_utf8();
            } else {
                break
            }
        }
        let id = if id_digits.is_empty() {
            None
        } else {
            Some(
                id_digits
                    .parse()
                    .map_err(|_| SioError::Codec("bad ack id".into()))?,
            )
        };

        let json_text = &after_nsp[json_start..];
        let data = if json_text.is_empty() {
            None
        } else {
            Some(serde_json::from_str(json_text)?)
        };

        Ok(PendingHeaderState {
            ptype,
            nsp,
            id,
            data,
            remaining,
            attachments: Vec::new(),
        })
    }
}

impl Decoder for StreamDecoder {
    fn add(&mut self, frame: Frame) -> SioResult<Vec<Packet>> {
        match frame {
            Frame::Text(text) => {
                if self.pending.is_some() {
                    return Err(SioError::Codec(
                        "received text frame while awaiting binary attachments".into(),
                    ));
                }
                let header = Self::decode_header(&text)?;
                trace!(ptype = header.ptype.as_u8(), nsp = %header.nsp, "decoded header frame");
                if header.remaining == 0 {
                    Ok(vec![Packet {
                        ptype: header.ptype,
                        nsp: header.nsp,
                        data: header.data,
                        attachments: Vec::new(),
                        id: header.id,
                        options: PacketOptions::default(),
                        query: None,
                    }])
                } else {
                    self.pending = Some(header);
                    Ok(Vec::new())
                }
            }
            Frame::Binary(bytes) => {
                let pending = self
                    .pending
                    .as_mut()
                    .ok_or_else(|| SioError::Codec("unexpected binary frame".into()))?;
                pending.attachments.push(bytes);
                if pending.attachments.len() >= pending.remaining {
                    let pending = self.pending.take().unwrap();
                    Ok(vec![Packet {
                        ptype: pending.ptype,
                        nsp: pending.nsp,
                        data: pending.data,
                        attachments: pending.attachments,
                        id: pending.id,
                        options: PacketOptions::default(),
                        query: None,
                    }])
                } else {
                    Ok(Vec::new())
                }
            }
        }
    }

    fn destroy(&mut self) {
        self.pending = None;
    }
}
