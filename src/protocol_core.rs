//! Frame codec and shared-folder path resolution
//!
//! Used by both the session handler (server) and the request driver (client)
//! so the two sides cannot drift apart on the wire format.

use crate::error::{Error, ProtocolError};
use crate::protocol::{frame, HEADER_LEN, MAX_FRAME_SIZE};
use std::fmt;
use std::fs;
use std::io::{ErrorKind, Read, Write};
use std::path::{Component, Path, PathBuf};
use tracing::trace;

/// Closed set of command tags. Anything else on the wire is a protocol error.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Command {
    List,
    Upload,
    Download,
    Delete,
    Ok,
    Error,
    FileList,
}

impl Command {
    pub const ALL: [Command; 7] = [
        Command::List,
        Command::Upload,
        Command::Download,
        Command::Delete,
        Command::Ok,
        Command::Error,
        Command::FileList,
    ];

    pub fn tag(self) -> u8 {
        match self {
            Command::List => frame::LIST,
            Command::Upload => frame::UPLOAD,
            Command::Download => frame::DOWNLOAD,
            Command::Delete => frame::DELETE,
            Command::Ok => frame::OK,
            Command::Error => frame::ERROR,
            Command::FileList => frame::FILE_LIST,
        }
    }

}

impl TryFrom<u8> for Command {
    type Error = ProtocolError;

    fn try_from(tag: u8) -> Result<Self, ProtocolError> {
        match tag {
            frame::LIST => Ok(Command::List),
            frame::UPLOAD => Ok(Command::Upload),
            frame::DOWNLOAD => Ok(Command::Download),
            frame::DELETE => Ok(Command::Delete),
            frame::OK => Ok(Command::Ok),
            frame::ERROR => Ok(Command::Error),
            frame::FILE_LIST => Ok(Command::FileList),
            other => Err(ProtocolError::InvalidCommand(other)),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Command::List => "LIST",
            Command::Upload => "UPLOAD",
            Command::Download => "DOWNLOAD",
            Command::Delete => "DELETE",
            Command::Ok => "OK",
            Command::Error => "ERROR",
            Command::FileList => "FILE_LIST",
        };
        f.write_str(name)
    }
}

/// One header-plus-payload unit on the wire.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub command: Command,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(command: Command, payload: Vec<u8>) -> Self {
        Self { command, payload }
    }

    pub fn empty(command: Command) -> Self {
        Self::new(command, Vec::new())
    }

    pub fn text(command: Command, text: &str) -> Self {
        Self::new(command, text.as_bytes().to_vec())
    }

    /// Payload decoded as UTF-8; invalid sequences are replaced.
    pub fn payload_text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

/// Build frame header (5 bytes)
/// Format: TYPE (1) | LENGTH (4, signed little-endian)
pub fn build_frame_header(command: Command, payload_len: usize) -> Result<[u8; HEADER_LEN], ProtocolError> {
    let len = i32::try_from(payload_len).map_err(|_| ProtocolError::PayloadTooLarge {
        size: payload_len,
        max: i32::MAX as usize,
    })?;
    let mut header = [0u8; HEADER_LEN];
    header[0] = command.tag();
    header[1..5].copy_from_slice(&len.to_le_bytes());
    Ok(header)
}

/// Parse frame header
/// Returns: (command, payload_length)
pub fn parse_frame_header(header: &[u8; HEADER_LEN]) -> Result<(Command, usize), ProtocolError> {
    let command = Command::try_from(header[0])?;
    let len = i32::from_le_bytes([header[1], header[2], header[3], header[4]]);
    if len < 0 {
        return Err(ProtocolError::InvalidLength(len as i64));
    }
    let len = len as usize;
    if len > MAX_FRAME_SIZE {
        return Err(ProtocolError::InvalidLength(len as i64));
    }
    Ok((command, len))
}

/// Encode a full frame into a contiguous buffer.
pub fn encode(command: Command, payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let header = build_frame_header(command, payload.len())?;
    let mut buf = Vec::with_capacity(HEADER_LEN + payload.len());
    buf.extend_from_slice(&header);
    buf.extend_from_slice(payload);
    Ok(buf)
}

pub fn write_frame<W: Write>(stream: &mut W, command: Command, payload: &[u8]) -> Result<(), ProtocolError> {
    let header = build_frame_header(command, payload.len())?;
    stream.write_all(&header)?;
    stream.write_all(payload)?;
    stream.flush()?;
    trace!(%command, len = payload.len(), "frame sent");
    Ok(())
}

pub fn send(stream: &mut impl Write, frame: &Frame) -> Result<(), ProtocolError> {
    write_frame(stream, frame.command, &frame.payload)
}

// Fill `buf` completely. A zero-byte read means the peer is gone; `offset`
// is how many bytes of the frame were already read before this call.
fn read_full<R: Read>(stream: &mut R, buf: &mut [u8], offset: usize, frame_len: usize) -> Result<(), ProtocolError> {
    let mut filled = 0;
    while filled < buf.len() {
        match stream.read(&mut buf[filled..]) {
            Ok(0) => {
                return Err(ProtocolError::IncompleteFrame {
                    read: offset + filled,
                    expected: frame_len,
                })
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// Read exactly one frame. Never consumes bytes past the declared payload.
pub fn read_frame<R: Read>(stream: &mut R) -> Result<Frame, ProtocolError> {
    let mut header = [0u8; HEADER_LEN];
    read_full(stream, &mut header, 0, HEADER_LEN)?;
    let (command, len) = parse_frame_header(&header)?;
    let mut payload = vec![0u8; len];
    read_full(stream, &mut payload, HEADER_LEN, HEADER_LEN + len)?;
    trace!(%command, len, "frame received");
    Ok(Frame { command, payload })
}

/// Alias of [`read_frame`] named after the codec operation.
pub fn decode<R: Read>(stream: &mut R) -> Result<Frame, ProtocolError> {
    read_frame(stream)
}

/// Resolve a client-supplied file name to a path inside the shared folder.
///
/// The shared folder is flat, so a name must be exactly one normal path
/// component. Rejects:
/// 1. empty names and names containing NUL
/// 2. separators, `.`/`..`, root and prefix components
/// 3. on Windows, ':' (ADS defense)
/// 4. existing symlinks, dangling or not: LIST never shows them, and
///    following one would read, write or delete outside `root`
///
/// `root` is expected to be canonical already. The returned path is the
/// entry itself, never a link target.
pub fn resolve_in_folder(root: &Path, name: &str) -> Result<PathBuf, Error> {
    if name.is_empty() {
        return Err(Error::InvalidName("empty file name".to_string()));
    }
    if name.contains('\0') {
        return Err(Error::InvalidName("file name contains NUL byte".to_string()));
    }
    #[cfg(windows)]
    if name.contains(':') {
        return Err(Error::InvalidName(format!("{name} (colon not allowed)")));
    }

    let mut components = Path::new(name).components();
    let single = match (components.next(), components.next()) {
        (Some(Component::Normal(s)), None) => s,
        _ => return Err(Error::InvalidName(name.to_string())),
    };
    // `Path::components` drops a trailing separator, so check the raw text too
    if name.contains('/') || name.contains(std::path::MAIN_SEPARATOR) {
        return Err(Error::InvalidName(name.to_string()));
    }

    let joined = root.join(single);
    match fs::symlink_metadata(&joined) {
        Ok(md) if md.file_type().is_symlink() => {
            Err(Error::InvalidName(format!("{name} is a symbolic link")))
        }
        _ if !joined.starts_with(root) => Err(Error::InvalidName(format!("{name} escapes shared folder"))),
        _ => Ok(joined),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::TempDir;

    #[test]
    fn test_frame_round_trip_all_commands() {
        for command in Command::ALL {
            for payload in [Vec::new(), b"x".to_vec(), vec![7u8; 70_000]] {
                let bytes = encode(command, &payload).unwrap();
                assert_eq!(bytes.len(), HEADER_LEN + payload.len());
                let frame = decode(&mut Cursor::new(bytes)).unwrap();
                assert_eq!(frame, Frame::new(command, payload));
            }
        }
    }

    #[test]
    fn test_header_layout_is_little_endian() {
        let bytes = encode(Command::Ok, b"12").unwrap();
        assert_eq!(bytes, vec![10, 2, 0, 0, 0, b'1', b'2']);
    }

    #[test]
    fn test_decode_stops_at_declared_length() {
        let mut bytes = encode(Command::Download, b"a.txt").unwrap();
        bytes.extend_from_slice(b"RAW-BULK-BYTES");
        let mut cursor = Cursor::new(bytes);
        let frame = decode(&mut cursor).unwrap();
        assert_eq!(frame.payload_text(), "a.txt");
        assert_eq!(cursor.position() as usize, HEADER_LEN + 5);

        let mut rest = Vec::new();
        cursor.read_to_end(&mut rest).unwrap();
        assert_eq!(rest, b"RAW-BULK-BYTES");
    }

    #[test]
    fn test_zero_length_payload_is_a_frame() {
        let bytes = encode(Command::List, &[]).unwrap();
        let frame = decode(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(frame.command, Command::List);
        assert!(frame.payload.is_empty());
    }

    #[test]
    fn test_no_frame_vs_torn_frame() {
        let err = decode(&mut Cursor::new(Vec::<u8>::new())).unwrap_err();
        assert!(err.is_clean_close());

        let err = decode(&mut Cursor::new(vec![1u8, 0, 0])).unwrap_err();
        assert!(matches!(err, ProtocolError::IncompleteFrame { read: 3, expected: 5 }));

        let mut bytes = encode(Command::Delete, b"abcdef").unwrap();
        bytes.truncate(HEADER_LEN + 2);
        let err = decode(&mut Cursor::new(bytes)).unwrap_err();
        assert!(matches!(err, ProtocolError::IncompleteFrame { read: 7, expected: 11 }));
        assert!(!err.is_clean_close());
    }

    #[test]
    fn test_invalid_command_tag() {
        let mut bytes = encode(Command::List, &[]).unwrap();
        bytes[0] = 99;
        let err = decode(&mut Cursor::new(bytes)).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidCommand(99)));
    }

    #[test]
    fn test_negative_and_oversized_lengths_rejected() {
        let mut header = [frame::OK, 0, 0, 0, 0];
        header[1..5].copy_from_slice(&(-1i32).to_le_bytes());
        assert!(matches!(
            parse_frame_header(&header),
            Err(ProtocolError::InvalidLength(-1))
        ));

        header[1..5].copy_from_slice(&((MAX_FRAME_SIZE as i32) + 1).to_le_bytes());
        assert!(parse_frame_header(&header).is_err());
    }

    #[test]
    fn test_payload_above_i32_is_caller_error() {
        assert!(matches!(
            build_frame_header(Command::Ok, i32::MAX as usize + 1),
            Err(ProtocolError::PayloadTooLarge { .. })
        ));
        assert!(build_frame_header(Command::Ok, i32::MAX as usize).is_ok());
    }

    #[test]
    fn test_resolve_plain_names() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().canonicalize().unwrap();

        let p = resolve_in_folder(&root, "a.txt").unwrap();
        assert_eq!(p, root.join("a.txt"));

        fs::write(root.join("b.bin"), b"x").unwrap();
        let p = resolve_in_folder(&root, "b.bin").unwrap();
        assert_eq!(p, root.join("b.bin"));
    }

    #[test]
    fn test_resolve_rejects_traversal() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().canonicalize().unwrap();

        for bad in [
            "../secret.txt",
            "..",
            ".",
            "",
            "/etc/passwd",
            "sub/file.txt",
            "sub/",
            "file\0.txt",
        ] {
            assert!(
                matches!(resolve_in_folder(&root, bad), Err(Error::InvalidName(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_rejects_symlink_escape() {
        let outside = TempDir::new().unwrap();
        fs::write(outside.path().join("secret.txt"), b"s").unwrap();
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().canonicalize().unwrap();
        std::os::unix::fs::symlink(outside.path().join("secret.txt"), root.join("link.txt")).unwrap();

        assert!(resolve_in_folder(&root, "link.txt").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_rejects_dangling_symlink() {
        let outside = TempDir::new().unwrap();
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().canonicalize().unwrap();
        let target = outside.path().join("not-yet.txt");
        std::os::unix::fs::symlink(&target, root.join("evil.txt")).unwrap();

        assert!(matches!(
            resolve_in_folder(&root, "evil.txt"),
            Err(Error::InvalidName(_))
        ));
        assert!(!target.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_rejects_link_to_sibling_inside_root() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().canonicalize().unwrap();
        fs::write(root.join("real.txt"), b"r").unwrap();
        std::os::unix::fs::symlink(root.join("real.txt"), root.join("link.txt")).unwrap();

        assert!(resolve_in_folder(&root, "link.txt").is_err());
        assert_eq!(resolve_in_folder(&root, "real.txt").unwrap(), root.join("real.txt"));
    }
}
