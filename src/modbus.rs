use tokio_util::bytes::Buf;
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

#[derive(Debug, Clone, Copy)]
pub struct Request {
    pub device_id: u8,
    pub transaction_id: u16,
    pub operation: Operation,
}

#[derive(Debug, Clone, Copy)]
pub enum Operation {
    /// Function 4 -- read input registers (sensor/status space).
    GetInputs { address: u16, count: u16 },
    /// Function 3 -- read holding registers (inverter monitor space).
    GetHoldings { address: u16, count: u16 },
    /// Function 6 -- write a single holding register.
    SetHolding { address: u16, value: u16 },
}

impl Operation {
    pub fn function_code(&self) -> u8 {
        match self {
            Operation::GetHoldings { .. } => 3,
            Operation::GetInputs { .. } => 4,
            Operation::SetHolding { .. } => 6,
        }
    }
}

#[derive(Debug)]
pub struct Response {
    pub device_id: u8,
    /// On RTU links the wire carries no transaction id; the worker stamps the
    /// id of the request it is waiting on.
    pub transaction_id: u16,
    pub kind: ResponseKind,
}

impl Response {
    pub fn exception_code(&self) -> Option<u8> {
        match &self.kind {
            ResponseKind::ErrorCode(c) => Some(*c),
            ResponseKind::GetRegisters { .. } => None,
            ResponseKind::SetHolding { .. } => None,
        }
    }

    /// Register payload as 16-bit words, if this is a read response.
    pub fn registers(&self) -> Option<Vec<u16>> {
        let ResponseKind::GetRegisters { values } = &self.kind else {
            return None;
        };
        Some(values.chunks_exact(2).map(|c| u16::from_be_bytes([c[0], c[1]])).collect())
    }
}

#[derive(Debug)]
pub enum ResponseKind {
    ErrorCode(u8),
    /// Payload of a function 3 or 4 read, as raw big-endian bytes.
    GetRegisters { values: Vec<u8> },
    SetHolding { address: u16, value: u16 },
}

pub trait Codec:
    for<'a> Encoder<&'a Request, Error = std::io::Error>
    + Decoder<Item = Response, Error = std::io::Error>
{
}

fn encode_pdu(req: &Request, dst: &mut tokio_util::bytes::BytesMut) {
    match req.operation {
        Operation::GetInputs { address, count } | Operation::GetHoldings { address, count } => {
            dst.extend([req.device_id, req.operation.function_code()]);
            dst.extend(address.to_be_bytes());
            dst.extend(count.to_be_bytes());
        }
        Operation::SetHolding { address, value } => {
            dst.extend([req.device_id, req.operation.function_code()]);
            dst.extend(address.to_be_bytes());
            dst.extend(value.to_be_bytes());
        }
    }
}

pub struct ModbusTcpCodec {}

impl Encoder<&Request> for ModbusTcpCodec {
    type Error = std::io::Error;
    fn encode(
        &mut self,
        req: &Request,
        dst: &mut tokio_util::bytes::BytesMut,
    ) -> Result<(), Self::Error> {
        dst.extend(req.transaction_id.to_be_bytes());
        // Protocol id 0, length: unit + function + 4 bytes of payload.
        dst.extend([0, 0, 0, 6]);
        encode_pdu(req, dst);
        trace!(message = "sending encoded", buffer = ?dst);
        Ok(())
    }
}

impl Decoder for ModbusTcpCodec {
    type Item = Response;
    type Error = std::io::Error;
    fn decode(
        &mut self,
        src: &mut tokio_util::bytes::BytesMut,
    ) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            trace!(message = "attempt at decoding", buffer = ?src);
            if src.len() < 8 {
                return Ok(None);
            }
            let Some((tr_id_buffer, remainder)) = src.split_first_chunk::<2>() else {
                return Ok(None);
            };
            let transaction_id = u16::from_be_bytes(*tr_id_buffer);
            let Some((proto_buffer, remainder)) = remainder.split_first_chunk::<2>() else {
                return Ok(None);
            };
            if u16::from_be_bytes(*proto_buffer) != 0 {
                src.advance(1);
                continue;
            }
            let Some((length_buffer, remainder)) = remainder.split_first_chunk::<2>() else {
                return Ok(None);
            };
            let required_length = u16::from_be_bytes(*length_buffer);
            let Some((data, _)) = remainder.split_at_checked(required_length.into()) else {
                return Ok(None);
            };
            let [device_id, function_code, code, ..] = data else {
                src.advance(1);
                continue;
            };
            let (device_id, function_code, code) = (*device_id, *function_code, *code);
            if function_code > 0x80 {
                src.advance(6 + 3);
                return Ok(Some(Response {
                    transaction_id,
                    device_id,
                    kind: ResponseKind::ErrorCode(code),
                }));
            }
            let kind = match function_code {
                3 | 4 => {
                    // `code` is the payload byte count; the TCP header length
                    // already told us how much data there is, so it is only
                    // used as a sanity bound here.
                    let [_, _, _, values @ ..] = data else { unreachable!() };
                    let take = values.len().min(usize::from(code));
                    ResponseKind::GetRegisters { values: values[..take].to_vec() }
                }
                6 => {
                    let [_, _, a, b, c, d, ..] = data else {
                        src.advance(1);
                        continue;
                    };
                    ResponseKind::SetHolding {
                        address: u16::from_be_bytes([*a, *b]),
                        value: u16::from_be_bytes([*c, *d]),
                    }
                }
                _ => {
                    src.advance(1);
                    continue;
                }
            };
            src.advance(usize::from(required_length) + 6);
            return Ok(Some(Response { transaction_id, device_id, kind }));
        }
    }
}

impl Codec for ModbusTcpCodec {}

/// CRC-16/MODBUS over the frame so far.
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= u16::from(byte);
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

pub struct ModbusRtuCodec {}

impl Encoder<&Request> for ModbusRtuCodec {
    type Error = std::io::Error;
    fn encode(
        &mut self,
        req: &Request,
        dst: &mut tokio_util::bytes::BytesMut,
    ) -> Result<(), Self::Error> {
        let start = dst.len();
        encode_pdu(req, dst);
        let crc = crc16(&dst[start..]);
        dst.extend(crc.to_le_bytes());
        trace!(message = "sending encoded", buffer = ?dst);
        Ok(())
    }
}

impl Decoder for ModbusRtuCodec {
    type Item = Response;
    type Error = std::io::Error;
    fn decode(
        &mut self,
        src: &mut tokio_util::bytes::BytesMut,
    ) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < 5 {
            return Ok(None);
        }
        let device_id = src[0];
        let function_code = src[1];
        // Frame length is implied by the function code; the serial line has
        // no transport header to consult.
        let frame_len = if function_code > 0x80 {
            5
        } else {
            match function_code {
                3 | 4 => 3 + usize::from(src[2]) + 2,
                6 => 8,
                _ => {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        format!("unexpected RTU function code {function_code}"),
                    ));
                }
            }
        };
        if src.len() < frame_len {
            return Ok(None);
        }
        let (frame, _) = src.split_at(frame_len);
        let (body, crc_bytes) = frame.split_at(frame_len - 2);
        let received_crc = u16::from_le_bytes([crc_bytes[0], crc_bytes[1]]);
        if crc16(body) != received_crc {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "RTU frame failed the CRC check",
            ));
        }
        let kind = if function_code > 0x80 {
            ResponseKind::ErrorCode(frame[2])
        } else {
            match function_code {
                3 | 4 => ResponseKind::GetRegisters { values: frame[3..frame_len - 2].to_vec() },
                6 => ResponseKind::SetHolding {
                    address: u16::from_be_bytes([frame[2], frame[3]]),
                    value: u16::from_be_bytes([frame[4], frame[5]]),
                },
                _ => unreachable!(),
            }
        };
        src.advance(frame_len);
        Ok(Some(Response { device_id, transaction_id: 0, kind }))
    }
}

impl Codec for ModbusRtuCodec {}
