use anyhow::Result;
use chrono::{Local, Utc};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::mpsc::{self, Receiver, Sender};

/// Notifications a front end can observe. Every method defaults to a no-op.
pub trait EventSink: Send + Sync {
    fn log(&self, _line: &str) {}
    fn connection_changed(&self, _connected: bool) {}
    fn client_count_changed(&self, _count: usize) {}
}

/// Prefix a message the way log lines are shown to users: `[HH:MM:SS] msg`.
pub fn stamp(msg: &str) -> String {
    format!("[{}] {}", Local::now().format("%H:%M:%S"), msg)
}

pub struct NoopSink;
impl EventSink for NoopSink {}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    Log(String),
    Connection(bool),
    ClientCount(usize),
}

/// Forwards events over an mpsc channel. FIFO per sink; a dropped receiver
/// silently discards further events.
pub struct ChannelSink {
    tx: Mutex<Sender<Event>>,
}

impl ChannelSink {
    pub fn new() -> (Self, Receiver<Event>) {
        let (tx, rx) = mpsc::channel();
        (Self { tx: Mutex::new(tx) }, rx)
    }

    fn send(&self, ev: Event) {
        let _ = self.tx.lock().send(ev);
    }
}

impl EventSink for ChannelSink {
    fn log(&self, line: &str) {
        self.send(Event::Log(line.to_string()));
    }
    fn connection_changed(&self, connected: bool) {
        self.send(Event::Connection(connected));
    }
    fn client_count_changed(&self, count: usize) {
        self.send(Event::ClientCount(count));
    }
}

/// Prints log lines to stdout; client counts only when they change.
#[derive(Default)]
pub struct ConsoleSink {
    clients: Mutex<Option<usize>>,
}

impl EventSink for ConsoleSink {
    fn log(&self, line: &str) {
        println!("{line}");
    }
    fn connection_changed(&self, connected: bool) {
        println!("{}", if connected { "Connected" } else { "Disconnected" });
    }
    fn client_count_changed(&self, count: usize) {
        let mut last = self.clients.lock();
        if *last != Some(count) {
            *last = Some(count);
            println!("{}", stamp(&format!("Clients: {count}")));
        }
    }
}

/// Appends events to a text file, one RFC3339-stamped line each.
pub struct TextLogger {
    file: Mutex<File>,
}

impl TextLogger {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let f = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(f),
        })
    }

    fn line(&self, s: &str) {
        let mut f = self.file.lock();
        let _ = writeln!(f, "[{}] {}", Utc::now().to_rfc3339(), s);
    }
}

impl EventSink for TextLogger {
    fn log(&self, line: &str) {
        self.line(&format!("LOG {line}"));
    }
    fn connection_changed(&self, connected: bool) {
        self.line(&format!("CONNECTION connected={connected}"));
    }
    fn client_count_changed(&self, count: usize) {
        self.line(&format!("CLIENTS count={count}"));
    }
}

/// Fans every event out to several sinks, in order.
pub struct Tee(pub Vec<Box<dyn EventSink>>);

impl EventSink for Tee {
    fn log(&self, line: &str) {
        self.0.iter().for_each(|s| s.log(line));
    }
    fn connection_changed(&self, connected: bool) {
        self.0.iter().for_each(|s| s.connection_changed(connected));
    }
    fn client_count_changed(&self, count: usize) {
        self.0.iter().for_each(|s| s.client_count_changed(count));
    }
}
