//! Request driver: one request frame out, exactly one response frame back.
//!
//! The `try_*` methods return typed errors. The plain methods are the
//! front-end surface: they never fail loudly, they log and return
//! `false`/`None` instead.

use std::fs::File;
use std::io::BufWriter;
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::error::{Error, ProtocolError, Result};
use crate::logger::{stamp, EventSink};
use crate::model::{self, FileEntry, UploadRequest};
use crate::protocol_core::{read_frame, write_frame, Command, Frame};
use crate::transfer;

/// Optional progress callback, called with 0..=100.
pub type Progress<'a> = Option<&'a mut dyn FnMut(u8)>;

pub struct Client {
    config: ClientConfig,
    stream: Option<TcpStream>,
    events: Arc<dyn EventSink>,
}

impl Client {
    pub fn new(events: Arc<dyn EventSink>) -> Self {
        Self::with_config(ClientConfig::default(), events)
    }

    pub fn with_config(config: ClientConfig, events: Arc<dyn EventSink>) -> Self {
        Self {
            config,
            stream: None,
            events,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn log(&self, msg: &str) {
        debug!("{msg}");
        self.events.log(&stamp(msg));
    }

    // Log a failed operation; drop the connection if it can no longer carry frames.
    fn fail(&mut self, what: &str, e: &Error) {
        warn!(error = %e, "{what} failed");
        self.log(&format!("{what} failed: {e}"));
        if e.is_fatal() {
            self.disconnect();
        }
    }

    fn stream_mut(&mut self) -> Result<&mut TcpStream> {
        self.stream
            .as_mut()
            .ok_or_else(|| Error::app("Not connected to server"))
    }

    /// Open a connection. Any existing connection is closed first.
    pub fn connect(&mut self, host: &str, port: u16) -> bool {
        self.disconnect();
        match self.try_connect(host, port) {
            Ok(stream) => {
                self.stream = Some(stream);
                self.events.connection_changed(true);
                self.log(&format!("Connected to {host}:{port}"));
                true
            }
            Err(e) => {
                self.log(&format!("Failed to connect to {host}:{port}: {e}"));
                false
            }
        }
    }

    fn try_connect(&self, host: &str, port: u16) -> Result<TcpStream> {
        let addrs = (host, port).to_socket_addrs().map_err(Error::Transport)?;
        let mut last_err = None;
        for addr in addrs {
            let attempt = match self.config.connect_timeout() {
                Some(t) => TcpStream::connect_timeout(&addr, t),
                None => TcpStream::connect(addr),
            };
            match attempt {
                Ok(stream) => {
                    let _ = stream.set_nodelay(true);
                    stream
                        .set_read_timeout(self.config.io_timeout())
                        .map_err(Error::Transport)?;
                    stream
                        .set_write_timeout(self.config.io_timeout())
                        .map_err(Error::Transport)?;
                    return Ok(stream);
                }
                Err(e) => last_err = Some(e),
            }
        }
        Err(Error::Transport(last_err.unwrap_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, "no addresses resolved")
        })))
    }

    /// Close the connection. No-op when already disconnected.
    pub fn disconnect(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(std::net::Shutdown::Both);
            self.events.connection_changed(false);
            self.log("Disconnected");
        }
    }

    // Send one request and read exactly one response.
    fn request(&mut self, command: Command, payload: &[u8]) -> Result<Frame> {
        let stream = self.stream_mut()?;
        write_frame(stream, command, payload)?;
        Ok(read_frame(stream)?)
    }

    pub fn list_files(&mut self) -> Option<Vec<FileEntry>> {
        match self.try_list_files() {
            Ok(files) => {
                self.log(&format!("Found {} files", files.len()));
                Some(files)
            }
            Err(e) => {
                self.fail("List", &e);
                None
            }
        }
    }

    pub fn try_list_files(&mut self) -> Result<Vec<FileEntry>> {
        let reply = self.request(Command::List, &[])?;
        match reply.command {
            Command::FileList => model::from_payload(&reply.payload),
            Command::Error => Err(Error::app(reply.payload_text())),
            got => Err(ProtocolError::UnexpectedResponse {
                request: Command::List,
                got,
            }
            .into()),
        }
    }

    pub fn download_file(&mut self, name: &str, save_path: &Path, progress: Progress<'_>) -> bool {
        match self.try_download_file(name, save_path, progress) {
            Ok(size) => {
                self.log(&format!("Downloaded {name} ({size} bytes)"));
                true
            }
            Err(e) => {
                self.fail("Download", &e);
                false
            }
        }
    }

    /// Returns the number of bytes written to `save_path`.
    pub fn try_download_file(&mut self, name: &str, save_path: &Path, mut progress: Progress<'_>) -> Result<u64> {
        let reply = self.request(Command::Download, name.as_bytes())?;
        let size = match reply.command {
            Command::Ok => reply
                .payload_text()
                .trim()
                .parse::<u64>()
                .map_err(|_| ProtocolError::MalformedPayload(Command::Ok))?,
            Command::Error => return Err(Error::app(reply.payload_text())),
            got => {
                return Err(ProtocolError::UnexpectedResponse {
                    request: Command::Download,
                    got,
                }
                .into())
            }
        };
        debug!(name, size, "download accepted");

        let stream = self.stream_mut()?;
        // Written next to the destination and renamed into place on success,
        // so an existing file there survives a failed download
        let dir = save_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let mut tmp = match tempfile::NamedTempFile::new_in(dir) {
            Ok(t) => t,
            Err(e) => {
                // The body is already on its way; consume it to stay in sync
                transfer::discard_bytes(stream, size)?;
                return Err(Error::app(format!("Cannot create {}: {e}", save_path.display())));
            }
        };
        let mut sink = BufWriter::new(tmp.as_file_mut());
        let received = transfer::receive_bytes(stream, &mut sink, size, |p| {
            if let Some(cb) = progress.as_mut() {
                cb(p)
            }
        });
        drop(sink);
        match received {
            Ok(ctx) => {
                tmp.persist(save_path)
                    .map_err(|e| Error::app(format!("Cannot save {}: {}", save_path.display(), e.error)))?;
                Ok(ctx.transferred_bytes)
            }
            Err(e) => {
                if e.connection_intact() {
                    transfer::discard_bytes(stream, size - e.transferred())?;
                }
                Err(e.into())
            }
        }
    }

    pub fn upload_file(&mut self, path: &Path, progress: Progress<'_>) -> bool {
        match self.try_upload_file(path, progress) {
            Ok(size) => {
                self.log(&format!("Uploaded {} ({size} bytes)", path.display()));
                true
            }
            Err(e) => {
                self.fail("Upload", &e);
                false
            }
        }
    }

    /// Returns the number of bytes the server confirmed.
    pub fn try_upload_file(&mut self, path: &Path, mut progress: Progress<'_>) -> Result<u64> {
        let mut file = File::open(path).map_err(|e| Error::app(format!("Cannot open {}: {e}", path.display())))?;
        let size = file
            .metadata()
            .map_err(|e| Error::app(format!("Cannot stat {}: {e}", path.display())))?
            .len();
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::InvalidName(path.display().to_string()))?;
        let payload = model::to_payload(&UploadRequest::new(name, size))?;

        // Server must say it is ready before any byte is sent
        let ack = self.request(Command::Upload, &payload)?;
        match ack.command {
            Command::Ok => {}
            Command::Error => return Err(Error::app(ack.payload_text())),
            got => {
                return Err(ProtocolError::UnexpectedResponse {
                    request: Command::Upload,
                    got,
                }
                .into())
            }
        }

        let stream = self.stream_mut()?;
        transfer::send_bytes(stream, &mut file, size, |p| {
            if let Some(cb) = progress.as_mut() {
                cb(p)
            }
        })?;

        // Bytes are out; only a second OK means the server stored them
        let done = read_frame(stream)?;
        match done.command {
            Command::Ok => Ok(size),
            Command::Error => Err(Error::app(done.payload_text())),
            got => Err(ProtocolError::UnexpectedResponse {
                request: Command::Upload,
                got,
            }
            .into()),
        }
    }

    pub fn delete_file(&mut self, name: &str) -> bool {
        match self.try_delete_file(name) {
            Ok(()) => {
                self.log(&format!("Deleted: {name}"));
                true
            }
            Err(e) => {
                self.fail("Delete", &e);
                false
            }
        }
    }

    pub fn try_delete_file(&mut self, name: &str) -> Result<()> {
        let reply = self.request(Command::Delete, name.as_bytes())?;
        match reply.command {
            Command::Ok => Ok(()),
            Command::Error => Err(Error::app(reply.payload_text())),
            got => Err(ProtocolError::UnexpectedResponse {
                request: Command::Delete,
                got,
            }
            .into()),
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::{ChannelSink, Event, NoopSink};
    use crate::protocol_core::encode;
    use std::fs;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    // Single-connection fake server running a scripted exchange
    fn fake_server<F>(script: F) -> (u16, thread::JoinHandle<()>)
    where
        F: FnOnce(TcpStream) + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            script(stream);
        });
        (port, handle)
    }

    #[test]
    fn not_connected_operations_fail_quietly() {
        let mut client = Client::new(Arc::new(NoopSink));
        assert!(!client.is_connected());
        assert!(client.list_files().is_none());
        assert!(!client.delete_file("a.txt"));
        assert!(matches!(client.try_delete_file("a.txt"), Err(Error::Application(_))));
        client.disconnect();
    }

    #[test]
    fn connect_failure_returns_false() {
        let port = {
            let l = TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap().port()
        };
        let (sink, rx) = ChannelSink::new();
        let mut client = Client::new(Arc::new(sink));
        assert!(!client.connect("127.0.0.1", port));
        assert!(!client.is_connected());
        let events: Vec<Event> = rx.try_iter().collect();
        assert!(events.iter().all(|e| !matches!(e, Event::Connection(_))));
        assert!(matches!(&events[0], Event::Log(l) if l.contains("Failed to connect")));
    }

    #[test]
    fn connection_events_fire_once_per_transition() {
        let (port, server) = fake_server(|mut s| {
            let mut buf = [0u8; 1];
            let _ = s.read(&mut buf);
        });
        let (sink, rx) = ChannelSink::new();
        let mut client = Client::new(Arc::new(sink));
        assert!(client.connect("127.0.0.1", port));
        client.disconnect();
        client.disconnect();
        server.join().unwrap();

        let states: Vec<bool> = rx
            .try_iter()
            .filter_map(|e| match e {
                Event::Connection(c) => Some(c),
                _ => None,
            })
            .collect();
        assert_eq!(states, vec![true, false]);
    }

    #[test]
    fn unexpected_response_drops_connection() {
        let (port, server) = fake_server(|mut s| {
            let req = read_frame(&mut s).unwrap();
            assert_eq!(req.command, Command::List);
            s.write_all(&encode(Command::Ok, &[]).unwrap()).unwrap();
        });
        let mut client = Client::new(Arc::new(NoopSink));
        assert!(client.connect("127.0.0.1", port));
        assert!(client.list_files().is_none());
        assert!(!client.is_connected());
        server.join().unwrap();
    }

    #[test]
    fn server_error_keeps_connection() {
        let (port, server) = fake_server(|mut s| {
            let req = read_frame(&mut s).unwrap();
            assert_eq!(req.payload_text(), "missing.txt");
            write_frame(&mut s, Command::Error, b"File not found: missing.txt").unwrap();
            let _ = read_frame(&mut s);
        });
        let mut client = Client::new(Arc::new(NoopSink));
        assert!(client.connect("127.0.0.1", port));
        let err = client.try_delete_file("missing.txt").unwrap_err();
        assert_eq!(err.to_string(), "File not found: missing.txt");
        assert!(client.is_connected());
        client.disconnect();
        server.join().unwrap();
    }

    #[test]
    fn download_cut_short_removes_partial_file() {
        let (port, server) = fake_server(|mut s| {
            let _ = read_frame(&mut s).unwrap();
            write_frame(&mut s, Command::Ok, b"1000").unwrap();
            s.write_all(&[5u8; 300]).unwrap();
            // drop: connection closes mid-body
        });
        let dir = tempfile::TempDir::new().unwrap();
        let dest = dir.path().join("partial.bin");
        let mut client = Client::new(Arc::new(NoopSink));
        assert!(client.connect("127.0.0.1", port));

        let err = client.try_download_file("x", &dest, None).unwrap_err();
        assert!(matches!(err, Error::Transfer(_)));
        assert!(!dest.exists());
        server.join().unwrap();
    }

    #[test]
    fn failed_download_keeps_existing_destination() {
        let (port, server) = fake_server(|mut s| {
            let _ = read_frame(&mut s).unwrap();
            write_frame(&mut s, Command::Ok, b"50").unwrap();
            s.write_all(b"partial").unwrap();
        });
        let dir = tempfile::TempDir::new().unwrap();
        let dest = dir.path().join("keep.txt");
        fs::write(&dest, b"previous version").unwrap();
        let mut client = Client::new(Arc::new(NoopSink));
        assert!(client.connect("127.0.0.1", port));

        assert!(!client.download_file("keep.txt", &dest, None));
        assert_eq!(fs::read(&dest).unwrap(), b"previous version");
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
        server.join().unwrap();
    }

    #[test]
    fn upload_needs_final_ok() {
        let (port, server) = fake_server(|mut s| {
            let req = read_frame(&mut s).unwrap();
            let up: UploadRequest = model::from_payload(&req.payload).unwrap();
            assert_eq!(up.size, 4);
            write_frame(&mut s, Command::Ok, &[]).unwrap();
            let mut body = [0u8; 4];
            s.read_exact(&mut body).unwrap();
            assert_eq!(&body, b"data");
            write_frame(&mut s, Command::Error, b"disk full").unwrap();
        });
        let dir = tempfile::TempDir::new().unwrap();
        let src = dir.path().join("u.txt");
        fs::write(&src, b"data").unwrap();

        let mut client = Client::new(Arc::new(NoopSink));
        assert!(client.connect("127.0.0.1", port));
        let mut seen = Vec::new();
        let mut record = |p: u8| seen.push(p);
        let cb: &mut dyn FnMut(u8) = &mut record;
        let err = client.try_upload_file(&src, Some(cb)).unwrap_err();
        assert_eq!(err.to_string(), "disk full");
        assert!(client.is_connected());
        assert_eq!(seen, vec![100]);
        server.join().unwrap();
    }
}
