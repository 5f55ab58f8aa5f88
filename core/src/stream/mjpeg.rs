//! Incremental decoder for `multipart/x-mixed-replace` image streams.

const CRLF: &[u8] = b"\r\n";
const HEADER_END: &[u8] = b"\r\n\r\n";
const MAX_HEADER_BYTES: usize = 16 * 1024;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum StreamError {
    #[error("frame exceeds {0} bytes")]
    FrameTooLarge(usize),
    #[error("part headers exceed {0} bytes")]
    HeadersTooLarge(usize),
    #[error("bad part header: {0}")]
    BadHeader(String),
}

/// One image pulled out of the stream.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub sequence: u64,
    pub content_type: Option<String>,
    pub data: Vec<u8>,
}

#[derive(Debug)]
enum State {
    Preamble,
    Headers,
    Body {
        content_type: Option<String>,
        content_length: Option<usize>,
    },
}

/// Splits a multipart byte stream into frames.
///
/// Parts with a `Content-Length` are cut by length; parts without one end at
/// the next `\r\n--boundary`, so such a frame is only emitted once the next
/// delimiter has arrived.
#[derive(Debug)]
pub struct MjpegDecoder {
    delimiter: Vec<u8>,
    terminator: Vec<u8>,
    buffer: Vec<u8>,
    state: State,
    max_frame_bytes: usize,
    /// Where the next terminator search in a length-less body resumes.
    scan_from: usize,
    sequence: u64,
    finished: bool,
}

impl MjpegDecoder {
    pub fn new(boundary: &str, max_frame_bytes: usize) -> Self {
        let delimiter = format!("--{boundary}").into_bytes();
        let mut terminator = CRLF.to_vec();
        terminator.extend_from_slice(&delimiter);
        Self {
            delimiter,
            terminator,
            buffer: Vec::new(),
            state: State::Preamble,
            max_frame_bytes,
            scan_from: 0,
            sequence: 0,
            finished: false,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        if !self.finished {
            self.buffer.extend_from_slice(chunk);
        }
    }

    /// True once the closing `--boundary--` has been seen.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Next complete frame, or `None` if more bytes are needed.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, StreamError> {
        loop {
            if self.finished {
                return Ok(None);
            }
            match &self.state {
                State::Preamble => {
                    let Some(start) = find(&self.buffer, &self.delimiter) else {
                        let keep = self.delimiter.len().saturating_sub(1);
                        let drop = self.buffer.len().saturating_sub(keep);
                        self.buffer.drain(..drop);
                        return Ok(None);
                    };
                    let after = start + self.delimiter.len();
                    if self.buffer.len() < after + 2 {
                        return Ok(None);
                    }
                    if &self.buffer[after..after + 2] == b"--" {
                        self.finished = true;
                        self.buffer.clear();
                        return Ok(None);
                    }
                    let Some(eol) = find(&self.buffer[after..], CRLF) else {
                        if self.buffer.len() - after > MAX_HEADER_BYTES {
                            return Err(StreamError::HeadersTooLarge(MAX_HEADER_BYTES));
                        }
                        return Ok(None);
                    };
                    self.buffer.drain(..after + eol + CRLF.len());
                    self.state = State::Headers;
                }
                State::Headers => {
                    if self.buffer.starts_with(CRLF) {
                        self.buffer.drain(..CRLF.len());
                        self.state = State::Body {
                            content_type: None,
                            content_length: None,
                        };
                        continue;
                    }
                    let Some(end) = find(&self.buffer, HEADER_END) else {
                        if self.buffer.len() > MAX_HEADER_BYTES {
                            return Err(StreamError::HeadersTooLarge(MAX_HEADER_BYTES));
                        }
                        return Ok(None);
                    };
                    let (content_type, content_length) = parse_headers(&self.buffer[..end])?;
                    self.buffer.drain(..end + HEADER_END.len());
                    self.state = State::Body {
                        content_type,
                        content_length,
                    };
                }
                State::Body {
                    content_type,
                    content_length,
                } => {
                    let content_type = content_type.clone();
                    let data = match *content_length {
                        Some(length) => {
                            if length > self.max_frame_bytes {
                                return Err(StreamError::FrameTooLarge(self.max_frame_bytes));
                            }
                            if self.buffer.len() < length {
                                return Ok(None);
                            }
                            self.buffer.drain(..length).collect::<Vec<u8>>()
                        }
                        None => {
                            let from = self.scan_from.min(self.buffer.len());
                            match find(&self.buffer[from..], &self.terminator) {
                                Some(offset) => {
                                    let end = from + offset;
                                    let data = self.buffer[..end].to_vec();
                                    self.buffer.drain(..end + CRLF.len());
                                    data
                                }
                                None => {
                                    let limit = self.max_frame_bytes + self.terminator.len();
                                    if self.buffer.len() > limit {
                                        return Err(StreamError::FrameTooLarge(
                                            self.max_frame_bytes,
                                        ));
                                    }
                                    self.scan_from = (self.buffer.len() + 1)
                                        .saturating_sub(self.terminator.len());
                                    return Ok(None);
                                }
                            }
                        }
                    };
                    self.state = State::Preamble;
                    self.scan_from = 0;
                    self.sequence += 1;
                    return Ok(Some(Frame {
                        sequence: self.sequence,
                        content_type,
                        data,
                    }));
                }
            }
        }
    }
}

/// Extracts the boundary parameter from a multipart `Content-Type` value.
pub fn boundary_from_content_type(value: &str) -> Option<String> {
    let mut parts = value.split(';');
    let mime = parts.next()?.trim();
    if !mime.to_ascii_lowercase().starts_with("multipart/") {
        return None;
    }
    parts.find_map(|param| {
        let (key, raw) = param.split_once('=')?;
        if !key.trim().eq_ignore_ascii_case("boundary") {
            return None;
        }
        let boundary = raw.trim().trim_matches('"');
        let boundary = boundary.strip_prefix("--").unwrap_or(boundary);
        (!boundary.is_empty()).then(|| boundary.to_string())
    })
}

fn parse_headers(raw: &[u8]) -> Result<(Option<String>, Option<usize>), StreamError> {
    let text = String::from_utf8_lossy(raw);
    let mut content_type = None;
    let mut content_length = None;
    for line in text.split("\r\n").filter(|line| !line.is_empty()) {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| StreamError::BadHeader(line.to_string()))?;
        let value = value.trim();
        if name.trim().eq_ignore_ascii_case("content-type") {
            content_type = Some(value.to_string());
        } else if name.trim().eq_ignore_ascii_case("content-length") {
            content_length = Some(
                value
                    .parse()
                    .map_err(|_| StreamError::BadHeader(line.to_string()))?,
            );
        }
    }
    Ok((content_type, content_length))
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn part(body: &[u8]) -> Vec<u8> {
        let mut out = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n".to_vec();
        out.extend_from_slice(body);
        out.extend_from_slice(b"\r\n");
        out
    }

    #[test]
    fn frame_is_released_when_next_boundary_arrives() {
        let mut decoder = MjpegDecoder::new("frame", 1024);
        decoder.push(&part(b"\xff\xd8one\xff\xd9"));
        assert_eq!(decoder.next_frame().unwrap(), None);

        decoder.push(&part(b"two"));
        let first = decoder.next_frame().unwrap().unwrap();
        assert_eq!(first.sequence, 1);
        assert_eq!(first.data, b"\xff\xd8one\xff\xd9");
        assert_eq!(first.content_type.as_deref(), Some("image/jpeg"));
        assert_eq!(decoder.next_frame().unwrap(), None);
    }

    #[test]
    fn byte_at_a_time_delivery() {
        let mut stream = part(b"alpha");
        stream.extend(part(b"beta"));
        stream.extend_from_slice(b"--frame--\r\n");

        let mut decoder = MjpegDecoder::new("frame", 1024);
        let mut frames = Vec::new();
        for byte in stream {
            decoder.push(&[byte]);
            while let Some(frame) = decoder.next_frame().unwrap() {
                frames.push(frame.data);
            }
        }
        assert_eq!(frames, vec![b"alpha".to_vec(), b"beta".to_vec()]);
        assert!(decoder.is_finished());
    }

    #[test]
    fn content_length_parts_do_not_wait() {
        let mut decoder = MjpegDecoder::new("frame", 1024);
        decoder.push(b"preamble junk\r\n--frame\r\n");
        decoder.push(b"Content-Type: image/jpeg\r\nContent-Length: 5\r\n\r\nab\r\ncd");
        let frame = decoder.next_frame().unwrap().unwrap();
        assert_eq!(frame.data, b"ab\r\nc");
    }

    #[test]
    fn delimiter_split_across_chunks_is_found() {
        let mut decoder = MjpegDecoder::new("frame", 1024);
        decoder.push(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n");
        for chunk in [&b"first "[..], b"half", b"\r", b"\n--fr", b"ame\r\n"] {
            assert_eq!(decoder.next_frame().unwrap(), None);
            decoder.push(chunk);
        }
        let frame = decoder.next_frame().unwrap().unwrap();
        assert_eq!(frame.data, b"first half");

        decoder.push(b"Content-Type: image/jpeg\r\n\r\nsecond\r\n--frame--");
        assert_eq!(decoder.next_frame().unwrap().unwrap().data, b"second");
        assert_eq!(decoder.next_frame().unwrap(), None);
        assert!(decoder.is_finished());
    }

    #[test]
    fn oversized_frame_is_rejected() {
        let mut decoder = MjpegDecoder::new("frame", 4);
        decoder.push(b"--frame\r\nContent-Length: 10\r\n\r\n");
        assert_eq!(decoder.next_frame(), Err(StreamError::FrameTooLarge(4)));

        let mut decoder = MjpegDecoder::new("frame", 4);
        decoder.push(&part(b"way too long for the limit"));
        assert_eq!(decoder.next_frame(), Err(StreamError::FrameTooLarge(4)));
    }

    #[test]
    fn boundary_parsing() {
        assert_eq!(
            boundary_from_content_type("multipart/x-mixed-replace; boundary=frame").as_deref(),
            Some("frame")
        );
        assert_eq!(
            boundary_from_content_type("multipart/x-mixed-replace;boundary=\"--myboundary\"")
                .as_deref(),
            Some("myboundary")
        );
        assert_eq!(boundary_from_content_type("image/jpeg"), None);
        assert_eq!(boundary_from_content_type("multipart/x-mixed-replace"), None);
    }
}
