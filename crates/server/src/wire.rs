#![forbid(unsafe_code)]

use std::io::{self, Read, Write};

/// Hard ceiling on a declared request length.
pub(crate) const MAX_REQUEST_LENGTH: u32 = 150_000_000;

/// How far into the payload we look for the command-set tag before parsing.
const SNIFF_WINDOW: usize = 4096;

const COMMAND_SET_TAG: &str = "<CdrCommandSet";

#[derive(Debug)]
pub(crate) enum WireError {
    Io(io::Error),
    /// Peer closed the connection cleanly between messages.
    Closed,
    EmptyRequest,
    TooLarge(u32),
    NotACommandSet,
}

impl std::fmt::Display for WireError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "io: {err}"),
            Self::Closed => write!(f, "connection closed"),
            Self::EmptyRequest => write!(f, "zero-length request"),
            Self::TooLarge(len) => {
                write!(f, "declared length {len} exceeds {MAX_REQUEST_LENGTH}")
            }
            Self::NotACommandSet => write!(f, "request is not a CdrCommandSet"),
        }
    }
}

impl std::error::Error for WireError {}

impl From<io::Error> for WireError {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

/// Reads one length-prefixed request. Rejection happens on the declared
/// length and a cheap tag sniff before any XML parsing is attempted.
pub(crate) fn read_request(stream: &mut impl Read) -> Result<String, WireError> {
    let mut prefix = [0u8; 4];
    match stream.read_exact(&mut prefix) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => {
            return Err(WireError::Closed);
        }
        Err(err) => return Err(err.into()),
    }

    let declared = u32::from_be_bytes(prefix);
    if declared == 0 {
        return Err(WireError::EmptyRequest);
    }
    if declared > MAX_REQUEST_LENGTH {
        return Err(WireError::TooLarge(declared));
    }

    let mut payload = vec![0u8; declared as usize];
    stream.read_exact(&mut payload)?;

    let window = &payload[..payload.len().min(SNIFF_WINDOW)];
    let text_window = String::from_utf8_lossy(window);
    if !text_window.contains(COMMAND_SET_TAG) {
        return Err(WireError::NotACommandSet);
    }

    Ok(String::from_utf8_lossy(&payload).into_owned())
}

pub(crate) fn send_response(stream: &mut impl Write, xml: &str) -> io::Result<()> {
    let bytes = xml.as_bytes();
    let len = u32::try_from(bytes.len()).unwrap_or(u32::MAX);
    stream.write_all(&len.to_be_bytes())?;
    stream.write_all(bytes)?;
    stream.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn framed(payload: &[u8]) -> Vec<u8> {
        let mut out = (payload.len() as u32).to_be_bytes().to_vec();
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn roundtrip() {
        let request = b"<CdrCommandSet><CdrCommand/></CdrCommandSet>";
        let mut cursor = Cursor::new(framed(request));
        assert_eq!(
            read_request(&mut cursor).unwrap(),
            String::from_utf8_lossy(request)
        );
    }

    #[test]
    fn zero_length_is_rejected() {
        let mut cursor = Cursor::new(0u32.to_be_bytes().to_vec());
        assert!(matches!(
            read_request(&mut cursor),
            Err(WireError::EmptyRequest)
        ));
    }

    #[test]
    fn oversized_declaration_is_rejected_without_reading() {
        let mut cursor = Cursor::new((MAX_REQUEST_LENGTH + 1).to_be_bytes().to_vec());
        assert!(matches!(
            read_request(&mut cursor),
            Err(WireError::TooLarge(_))
        ));
    }

    #[test]
    fn non_protocol_traffic_is_rejected() {
        let mut cursor = Cursor::new(framed(b"GET / HTTP/1.1\r\n\r\n"));
        assert!(matches!(
            read_request(&mut cursor),
            Err(WireError::NotACommandSet)
        ));
    }

    #[test]
    fn clean_close_is_distinguished_from_io_error() {
        let mut cursor = Cursor::new(Vec::new());
        assert!(matches!(read_request(&mut cursor), Err(WireError::Closed)));
    }

    #[test]
    fn response_framing_matches_request_framing() {
        let mut out = Vec::new();
        send_response(&mut out, "<CdrResponseSet/>").unwrap();
        let mut cursor = Cursor::new(out);
        let mut prefix = [0u8; 4];
        std::io::Read::read_exact(&mut cursor, &mut prefix).unwrap();
        assert_eq!(u32::from_be_bytes(prefix) as usize, "<CdrResponseSet/>".len());
    }
}
