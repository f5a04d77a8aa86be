//! Per-connection command loop.
//!
//! A session reads one frame, runs exactly one handler to completion
//! (including any bulk transfer) and only then reads the next frame.

use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::{Error, ProtocolError, Result};
use crate::logger::{stamp, EventSink};
use crate::model::{self, FileEntry, UploadRequest};
use crate::protocol_core::{read_frame, resolve_in_folder, write_frame, Command, Frame};
use crate::transfer;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// Blocked reading the next frame.
    Idle,
    /// Running the handler for one frame.
    Dispatching,
    Closed,
}

/// Why a session loop ended.
#[derive(Debug)]
pub enum SessionEnd {
    /// Peer closed the connection between frames.
    PeerClosed,
    /// Frame read failed or a handler left the connection unusable.
    Failed(Error),
}

/// Name prefix of in-flight uploads; never listed.
const PARTIAL_PREFIX: &str = ".foldershare-partial-";

type Handler<S> = fn(&mut Session<S>, Vec<u8>) -> Result<()>;

// Fixed command -> handler map. The match is exhaustive, so adding a
// Command variant forces a decision here.
fn handler_for<S: Read + Write>(command: Command) -> Handler<S> {
    match command {
        Command::List => handle_list,
        Command::Upload => handle_upload,
        Command::Download => handle_download,
        Command::Delete => handle_delete,
        Command::Ok | Command::Error | Command::FileList => handle_unknown,
    }
}

pub struct Session<S> {
    stream: S,
    root: PathBuf,
    peer: String,
    events: Arc<dyn EventSink>,
    state: SessionState,
    handled: u64,
}

impl<S: Read + Write> Session<S> {
    /// `root` must be the canonical shared-folder path.
    pub fn new(stream: S, root: PathBuf, peer: String, events: Arc<dyn EventSink>) -> Self {
        Self {
            stream,
            root,
            peer,
            events,
            state: SessionState::Idle,
            handled: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Number of frames dispatched so far.
    pub fn handled(&self) -> u64 {
        self.handled
    }

    pub fn into_inner(self) -> S {
        self.stream
    }

    fn log(&self, msg: &str) {
        info!(peer = %self.peer, "{msg}");
        self.events.log(&stamp(&format!("[{}] {}", self.peer, msg)));
    }

    fn reply(&mut self, frame: Frame) -> Result<()> {
        write_frame(&mut self.stream, frame.command, &frame.payload)?;
        Ok(())
    }

    fn reply_error(&mut self, message: &str) -> Result<()> {
        self.log(&format!("Error sent: {message}"));
        self.reply(Frame::text(Command::Error, message))
    }

    /// Run until the peer disconnects or the connection becomes unusable.
    pub fn run(&mut self) -> SessionEnd {
        self.log("connected");
        let end = loop {
            self.state = SessionState::Idle;
            let frame = match read_frame(&mut self.stream) {
                Ok(frame) => frame,
                Err(e) if e.is_clean_close() => break SessionEnd::PeerClosed,
                Err(ProtocolError::InvalidCommand(tag)) => {
                    // Unknown tags end the session; tell the peer why first
                    let msg = ProtocolError::InvalidCommand(tag).to_string();
                    let _ = self.reply_error(&msg);
                    break SessionEnd::Failed(ProtocolError::InvalidCommand(tag).into());
                }
                Err(e) => break SessionEnd::Failed(e.into()),
            };

            self.state = SessionState::Dispatching;
            if let Err(e) = self.dispatch(frame) {
                if e.is_fatal() {
                    break SessionEnd::Failed(e);
                }
                if let Err(e) = self.reply_error(&e.to_string()) {
                    break SessionEnd::Failed(e);
                }
            }
        };
        self.state = SessionState::Closed;
        match &end {
            SessionEnd::PeerClosed => self.log("disconnected"),
            SessionEnd::Failed(e) => {
                warn!(peer = %self.peer, error = %e, "session terminated");
                self.log(&format!("session terminated: {e}"));
            }
        }
        end
    }

    /// Execute the handler for one frame.
    pub fn dispatch(&mut self, frame: Frame) -> Result<()> {
        debug!(peer = %self.peer, command = %frame.command, len = frame.payload.len(), "dispatch");
        self.handled += 1;
        let handler = handler_for::<S>(frame.command);
        handler(self, frame.payload)
    }
}

fn fs_error(what: &str, e: std::io::Error) -> Error {
    Error::app(format!("{what}: {e}"))
}

fn handle_list<S: Read + Write>(s: &mut Session<S>, _payload: Vec<u8>) -> Result<()> {
    let entries = list_folder(&s.root)?;
    let payload = model::to_payload(&entries)?;
    s.reply(Frame::new(Command::FileList, payload))?;
    s.log(&format!("Sent file list: {} files", entries.len()));
    Ok(())
}

/// Direct children of `root` that are regular files. Read fresh on every call.
pub fn list_folder(root: &Path) -> Result<Vec<FileEntry>> {
    let rd = fs::read_dir(root).map_err(|e| fs_error("Error listing files", e))?;
    let mut entries = Vec::new();
    for entry in rd {
        let entry = entry.map_err(|e| fs_error("Error listing files", e))?;
        let md = match entry.metadata() {
            Ok(md) if md.is_file() => md,
            _ => continue,
        };
        let name = match entry.file_name().into_string() {
            Ok(name) if name.starts_with(PARTIAL_PREFIX) => continue,
            Ok(name) => name,
            Err(raw) => {
                debug!(name = ?raw, "skipping non UTF-8 file name");
                continue;
            }
        };
        entries.push(FileEntry::from_metadata(name, &md));
    }
    Ok(entries)
}

fn handle_upload<S: Read + Write>(s: &mut Session<S>, payload: Vec<u8>) -> Result<()> {
    let req: UploadRequest = model::from_payload(&payload)?;
    let path = resolve_in_folder(&s.root, &req.name)?;
    if path.is_dir() {
        return Err(Error::app(format!("Cannot create {}: is a directory", req.name)));
    }
    // Received into a hidden temp file and renamed over the target only once
    // complete, so a failed upload leaves any previous version untouched
    let mut tmp = tempfile::Builder::new()
        .prefix(PARTIAL_PREFIX)
        .tempfile_in(&s.root)
        .map_err(|e| fs_error(&format!("Cannot create {}", req.name), e))?;

    // Ready: the client starts streaming as soon as it sees this
    s.reply(Frame::empty(Command::Ok))?;

    let mut sink = BufWriter::new(tmp.as_file_mut());
    let received = transfer::receive_bytes(&mut s.stream, &mut sink, req.size, |_| {});
    drop(sink);
    match received {
        Ok(_) => {
            tmp.persist(&path)
                .map_err(|e| fs_error(&format!("Cannot save {}", req.name), e.error))?;
            s.log(&format!("Received file: {} ({} bytes)", req.name, req.size));
            s.reply(Frame::empty(Command::Ok))
        }
        Err(e) => {
            // tmp is removed on drop
            if !e.connection_intact() {
                return Err(e.into());
            }
            transfer::discard_bytes(&mut s.stream, req.size - e.transferred())?;
            Err(Error::app(format!("Upload failed: {e}")))
        }
    }
}

fn handle_download<S: Read + Write>(s: &mut Session<S>, payload: Vec<u8>) -> Result<()> {
    let name = String::from_utf8_lossy(&payload).into_owned();
    let path = resolve_in_folder(&s.root, &name)?;
    if !path.is_file() {
        return Err(Error::app(format!("File not found: {name}")));
    }
    let mut file = File::open(&path).map_err(|e| fs_error("Download error", e))?;
    let len = file
        .metadata()
        .map_err(|e| fs_error("Download error", e))?
        .len();

    s.reply(Frame::text(Command::Ok, &len.to_string()))?;
    // Past this point the peer is reading raw bytes; any failure is fatal
    transfer::send_bytes(&mut s.stream, &mut file, len, |_| {})?;
    s.log(&format!("Sent file {name} ({len} bytes)"));
    Ok(())
}

fn handle_delete<S: Read + Write>(s: &mut Session<S>, payload: Vec<u8>) -> Result<()> {
    let name = String::from_utf8_lossy(&payload).into_owned();
    let path = resolve_in_folder(&s.root, &name)?;
    if !path.is_file() {
        return Err(Error::app(format!("File not found: {name}")));
    }
    fs::remove_file(&path).map_err(|e| fs_error("Delete error", e))?;
    s.reply(Frame::empty(Command::Ok))?;
    s.log(&format!("Deleted file '{name}'"));
    Ok(())
}

fn handle_unknown<S: Read + Write>(_s: &mut Session<S>, _payload: Vec<u8>) -> Result<()> {
    Err(Error::app("Unknown command"))
}
