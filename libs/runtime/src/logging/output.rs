use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing_subscriber::fmt::MakeWriter;

use super::LogConfigError;

/// Log file opened create+append. Closing is idempotent and also happens on drop.
#[derive(Debug)]
pub(crate) struct FileOutput {
    path: PathBuf,
    file: Mutex<Option<File>>,
    open_files: Arc<AtomicUsize>,
}

impl FileOutput {
    fn open(path: &Path, open_files: &Arc<AtomicUsize>) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        open_files.fetch_add(1, Ordering::SeqCst);
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(Some(file)),
            open_files: open_files.clone(),
        })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn is_open(&self) -> bool {
        self.file.lock().is_some()
    }

    fn write_all(&self, buf: &[u8]) -> io::Result<()> {
        match self.file.lock().as_mut() {
            Some(f) => f.write_all(buf),
            // closed: the record belongs to a retired generation
            None => Ok(()),
        }
    }

    fn flush(&self) -> io::Result<()> {
        match self.file.lock().as_mut() {
            Some(f) => f.flush(),
            None => Ok(()),
        }
    }

    pub(crate) fn close(&self) {
        if let Some(mut f) = self.file.lock().take() {
            let _ = f.flush();
            let _ = f.sync_data();
            self.open_files.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl Drop for FileOutput {
    fn drop(&mut self) {
        self.close();
    }
}

#[derive(Debug)]
pub(crate) enum OutputTarget {
    Stdout,
    Stderr,
    File(FileOutput),
}

impl OutputTarget {
    fn write_all(&self, buf: &[u8]) -> io::Result<()> {
        match self {
            OutputTarget::Stdout => io::stdout().lock().write_all(buf),
            OutputTarget::Stderr => io::stderr().lock().write_all(buf),
            OutputTarget::File(f) => f.write_all(buf),
        }
    }

    fn flush(&self) -> io::Result<()> {
        match self {
            OutputTarget::Stdout => io::stdout().lock().flush(),
            OutputTarget::Stderr => io::stderr().lock().flush(),
            OutputTarget::File(f) => f.flush(),
        }
    }

    fn is_terminal(&self) -> bool {
        match self {
            OutputTarget::Stdout => atty::is(atty::Stream::Stdout),
            OutputTarget::Stderr => atty::is(atty::Stream::Stderr),
            OutputTarget::File(_) => false,
        }
    }
}

/// The set of destinations of one sink generation.
#[derive(Debug)]
pub(crate) struct Outputs {
    targets: Vec<OutputTarget>,
}

impl Outputs {
    /// Open every entry of a comma-separated output list.
    ///
    /// All-or-nothing: if one entry fails, the files opened so far are closed
    /// again when the partial set is dropped.
    pub(crate) fn open(spec: &str, open_files: &Arc<AtomicUsize>) -> Result<Self, LogConfigError> {
        let mut targets = Vec::new();
        for entry in spec.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let target = match entry {
                "stdout" => OutputTarget::Stdout,
                "stderr" => OutputTarget::Stderr,
                path => OutputTarget::File(FileOutput::open(Path::new(path), open_files).map_err(
                    |source| LogConfigError::OutputOpenFailure {
                        target: path.to_string(),
                        source,
                    },
                )?),
            };
            targets.push(target);
        }

        if targets.is_empty() {
            return Err(LogConfigError::OutputOpenFailure {
                target: spec.to_string(),
                source: io::Error::new(io::ErrorKind::InvalidInput, "no log outputs configured"),
            });
        }
        Ok(Self { targets })
    }

    /// Colors only when every destination is a terminal.
    pub(crate) fn ansi(&self) -> bool {
        self.targets.iter().all(OutputTarget::is_terminal)
    }

    pub(crate) fn files(&self) -> impl Iterator<Item = &FileOutput> {
        self.targets.iter().filter_map(|t| match t {
            OutputTarget::File(f) => Some(f),
            _ => None,
        })
    }

    pub(crate) fn write_all(&self, buf: &[u8]) -> io::Result<()> {
        let mut first_err = None;
        for target in &self.targets {
            if let Err(e) = target.write_all(buf) {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    pub(crate) fn flush(&self) -> io::Result<()> {
        let mut first_err = None;
        for target in &self.targets {
            if let Err(e) = target.flush() {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Flush and close the files of this generation. Standard streams stay open.
    pub(crate) fn close(&self) {
        for f in self.files() {
            f.close();
        }
    }
}

/// `MakeWriter` fanning every record out to all destinations.
#[derive(Debug, Clone)]
pub(crate) struct SharedOutputs(pub(crate) Arc<Outputs>);

pub(crate) struct OutputsWriter<'a>(&'a Outputs);

impl Write for OutputsWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

impl<'a> MakeWriter<'a> for SharedOutputs {
    type Writer = OutputsWriter<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        OutputsWriter(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn opens_files_and_creates_parents() {
        let tmp = tempdir().unwrap();
        let nested = tmp.path().join("nested/dir/app.log");
        let counter = Arc::new(AtomicUsize::new(0));

        let spec = format!(" stdout , {} ", nested.display());
        let outputs = Outputs::open(&spec, &counter).unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(nested.parent().unwrap().exists());
        assert!(!outputs.ansi(), "a file output disables colors");

        outputs.write_all(b"hello\n").unwrap();
        assert_eq!(std::fs::read_to_string(&nested).unwrap(), "hello\n");

        outputs.close();
        outputs.close();
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert!(outputs.files().all(|f| !f.is_open()));

        // writes after close are dropped
        outputs.write_all(b"late\n").unwrap();
        assert_eq!(std::fs::read_to_string(&nested).unwrap(), "hello\n");
    }

    #[test]
    fn partial_open_failure_releases_opened_files() {
        let tmp = tempdir().unwrap();
        let good = tmp.path().join("good.log");
        // a directory cannot be opened for append
        let bad = tmp.path().to_path_buf();
        let counter = Arc::new(AtomicUsize::new(0));

        let spec = format!("{},{}", good.display(), bad.display());
        let err = Outputs::open(&spec, &counter).unwrap_err();
        match err {
            LogConfigError::OutputOpenFailure { target, .. } => {
                assert_eq!(target, bad.display().to_string())
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn empty_output_list_is_rejected() {
        let counter = Arc::new(AtomicUsize::new(0));
        assert!(matches!(
            Outputs::open(" , ", &counter),
            Err(LogConfigError::OutputOpenFailure { .. })
        ));
    }

    #[test]
    fn files_are_appended_not_truncated() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("app.log");
        std::fs::write(&path, "existing\n").unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        let outputs = Outputs::open(&path.display().to_string(), &counter).unwrap();
        outputs.write_all(b"appended\n").unwrap();
        drop(outputs);

        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "existing\nappended\n"
        );
    }
}
