//! Dated log files and the non-blocking queue in front of every output.
//!
//! Callers format a line and push it onto an unbounded channel; a single
//! dedicated thread per output drains the channel into its sink. Lines for
//! one output therefore land in the order they were enqueued.
//!
//! [`DailyFileWriter`] is the file sink: it appends to
//! `<directory>/<file_name>-YYYY-MM-DD.log`, opening a new file when the
//! local date changes. Stdout goes through the same queue.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};

use chrono::{Local, NaiveDate};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing_subscriber::fmt::MakeWriter;

/// Appends to a per-day log file.
#[derive(Debug)]
pub struct DailyFileWriter {
    directory: PathBuf,
    file_name: String,
    date: NaiveDate,
    file: File,
}

impl DailyFileWriter {
    /// Creates `directory` if needed and opens today's file.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or file cannot be created.
    pub fn open(directory: impl Into<PathBuf>, file_name: impl Into<String>) -> io::Result<Self> {
        Self::open_at(directory, file_name, Local::now().date_naive())
    }

    /// Like [`open`](Self::open), for a given date.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or file cannot be created.
    pub fn open_at(
        directory: impl Into<PathBuf>,
        file_name: impl Into<String>,
        date: NaiveDate,
    ) -> io::Result<Self> {
        let directory = directory.into();
        let file_name = file_name.into();
        fs::create_dir_all(&directory)?;
        let file = open_append(&file_path(&directory, &file_name, date))?;
        Ok(Self {
            directory,
            file_name,
            date,
            file,
        })
    }

    /// Path of the file currently written to.
    #[must_use]
    pub fn current_path(&self) -> PathBuf {
        file_path(&self.directory, &self.file_name, self.date)
    }

    /// Appends `line` to the file for `date`, switching files if the date moved.
    ///
    /// # Errors
    ///
    /// Returns an error if the new file cannot be opened or the write fails.
    pub fn write_at(&mut self, date: NaiveDate, line: &[u8]) -> io::Result<()> {
        if date != self.date {
            self.file.flush()?;
            self.file = open_append(&file_path(&self.directory, &self.file_name, date))?;
            self.date = date;
        }
        self.file.write_all(line)
    }

}

impl Write for DailyFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_at(Local::now().date_naive(), buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

fn file_path(directory: &Path, file_name: &str, date: NaiveDate) -> PathBuf {
    directory.join(format!("{file_name}-{}.log", date.format("%Y-%m-%d")))
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

enum Command {
    Line(Vec<u8>),
    Shutdown,
}

/// Cheap, cloneable writer that enqueues lines for the worker thread.
///
/// Never blocks. Lines written after the worker has stopped are dropped.
#[derive(Debug, Clone)]
pub struct NonBlocking {
    sender: UnboundedSender<Command>,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Line(line) => write!(f, "Line({} bytes)", line.len()),
            Self::Shutdown => f.write_str("Shutdown"),
        }
    }
}

impl Write for NonBlocking {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        // A closed queue means the guard is gone; losing the line is fine.
        let _ = self.sender.send(Command::Line(buf.to_vec()));
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for NonBlocking {
    type Writer = Self;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Stops the worker thread when dropped, after it has written every line
/// enqueued before the drop.
#[derive(Debug)]
pub struct WorkerGuard {
    sender: UnboundedSender<Command>,
    handle: Option<JoinHandle<()>>,
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        let _ = self.sender.send(Command::Shutdown);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                eprintln!("log writer thread panicked");
            }
        }
    }
}

/// Moves `sink` onto a thread named `rawsock-log-<name>` and returns the
/// queue feeding it.
///
/// # Errors
///
/// Returns an error if the thread cannot be spawned.
pub fn spawn_worker<W>(name: &str, sink: W) -> io::Result<(NonBlocking, WorkerGuard)>
where
    W: Write + Send + 'static,
{
    let (sender, receiver) = mpsc::unbounded_channel();
    let label = name.to_string();
    let handle = thread::Builder::new()
        .name(format!("rawsock-log-{name}"))
        .spawn(move || run_worker(&label, sink, receiver))?;

    Ok((
        NonBlocking {
            sender: sender.clone(),
        },
        WorkerGuard {
            sender,
            handle: Some(handle),
        },
    ))
}

fn run_worker<W: Write>(name: &str, mut sink: W, mut receiver: UnboundedReceiver<Command>) {
    while let Some(command) = receiver.blocking_recv() {
        match command {
            Command::Line(line) => {
                if let Err(e) = sink.write_all(&line) {
                    eprintln!("failed to write {name} log line: {e}");
                }
            }
            Command::Shutdown => break,
        }
    }
    if let Err(e) = sink.flush() {
        eprintln!("failed to flush {name} log: {e}");
    }
}
