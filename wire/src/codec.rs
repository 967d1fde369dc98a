//! `tokio_util::codec` glue: [`ControlCodec`] turns `BytesMut` into [`ControlLine`]s and
//! [`Command`]s into bytes.
//!
//! Mirrors the shape of a Levin-style bucket codec (a small decode state machine sitting
//! directly on a `BytesMut`), but the control protocol's framing is CRLF-terminated ASCII
//! instead of a fixed-size binary header, so the state tracks an in-progress `+` data
//! block rather than a header/body split.

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::{command::Command, error::ProtocolError, reply::{ControlLine, ReplyLine, ReplyLineKind}};

/// What the decoder is doing with the bytes it has seen so far.
#[derive(Debug, Default)]
enum State {
    /// Waiting for the next complete `DDD(SP|-|+) MESSAGE` line.
    #[default]
    Line,
    /// A `+` line opened a data block; accumulating body lines until a lone `.`.
    DataBlock {
        code: u16,
        sep_is_event: bool,
        keyword_or_message: String,
        lines: Vec<String>,
    },
}

#[derive(Debug, Default)]
pub struct ControlCodec {
    state: State,
}

impl ControlCodec {
    pub fn new() -> Self {
        Self::default()
    }
}

fn find_crlf(src: &[u8]) -> Option<usize> {
    src.windows(2).position(|window| window == b"\r\n")
}

/// Parse one non-data-block line into its status code, separator, and message.
fn parse_status_line(line: &str) -> Result<(u16, u8, &str), ProtocolError> {
    if line.len() < 4 {
        return Err(ProtocolError::MalformedStatusLine(line.to_owned()));
    }
    let (code_str, rest) = line.split_at(3);
    let code = code_str
        .parse::<u16>()
        .map_err(|_| ProtocolError::InvalidStatusCode(code_str.to_owned()))?;
    let mut chars = rest.chars();
    let sep = chars.next().ok_or_else(|| ProtocolError::MalformedStatusLine(line.to_owned()))?;
    Ok((code, sep as u8, chars.as_str()))
}

impl Decoder for ControlCodec {
    type Item = ControlLine;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let Some(pos) = find_crlf(src) else { return Ok(None) };
            let line_bytes = src.split_to(pos);
            src.advance(2);
            let line = std::str::from_utf8(&line_bytes)
                .map_err(|_| ProtocolError::InvalidUtf8)?
                .to_owned();

            match &mut self.state {
                State::Line => {
                    let (code, sep, message) = parse_status_line(&line)?;
                    if code / 100 == 6 {
                        let (keyword, message) = message.split_once(' ').unwrap_or((message, ""));
                        if sep == b'+' {
                            self.state = State::DataBlock {
                                code,
                                sep_is_event: true,
                                keyword_or_message: keyword.to_owned(),
                                lines: Vec::new(),
                            };
                            continue;
                        }
                        return Ok(Some(ControlLine::Event {
                            keyword: keyword.to_owned(),
                            message: message.to_owned(),
                            data: None,
                        }));
                    }

                    match sep {
                        b' ' => {
                            return Ok(Some(ControlLine::Reply(ReplyLine {
                                code,
                                message: message.to_owned(),
                                kind: ReplyLineKind::End,
                                data: None,
                            })));
                        }
                        b'-' => {
                            return Ok(Some(ControlLine::Reply(ReplyLine {
                                code,
                                message: message.to_owned(),
                                kind: ReplyLineKind::Continue,
                                data: None,
                            })));
                        }
                        b'+' => {
                            self.state = State::DataBlock {
                                code,
                                sep_is_event: false,
                                keyword_or_message: message.to_owned(),
                                lines: Vec::new(),
                            };
                            continue;
                        }
                        _ => return Err(ProtocolError::MalformedStatusLine(line)),
                    }
                }
                State::DataBlock {
                    code,
                    sep_is_event,
                    keyword_or_message,
                    lines,
                } => {
                    if line == "." {
                        let code = *code;
                        let sep_is_event = *sep_is_event;
                        let keyword_or_message = std::mem::take(keyword_or_message);
                        let lines = std::mem::take(lines);
                        self.state = State::Line;

                        return Ok(Some(if sep_is_event {
                            ControlLine::Event {
                                keyword: keyword_or_message,
                                message: String::new(),
                                data: Some(lines),
                            }
                        } else {
                            ControlLine::Reply(ReplyLine {
                                code,
                                message: keyword_or_message,
                                kind: ReplyLineKind::Continue,
                                data: Some(lines),
                            })
                        }));
                    }

                    if let Some(rest) = line.strip_prefix("..") {
                        lines.push(format!(".{rest}"));
                    } else {
                        lines.push(line);
                    }
                }
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(item) => Ok(Some(item)),
            None if src.is_empty() => Ok(None),
            None => Err(ProtocolError::UnexpectedEof),
        }
    }
}

impl Encoder<Command> for ControlCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Command, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.extend_from_slice(&item.encode());
        Ok(())
    }
}
