//! Window-partitioned JSON-lines files.
//!
//! Lines for an open window go to a partition file under the temp location.
//! When the window closes the partition is appended to its final object
//! `{prefix}{stem}-{start}-{end}.json` and the temp file is removed, so late
//! lines for an already published window extend it rather than replace it.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;
use vitals_core::Window;

use super::LineSink;

#[derive(Debug, thiserror::Error)]
pub enum FileSinkError {
    #[error("io error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

fn at(path: &Path) -> impl FnOnce(io::Error) -> FileSinkError + '_ {
    move |source| FileSinkError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[derive(Clone)]
pub struct FileLineSink {
    prefix: String,
    stem: String,
    temp_dir: PathBuf,
    open: Arc<Mutex<HashMap<Window, File>>>,
}

impl FileLineSink {
    /// `prefix` is prepended verbatim to every object name, so a trailing
    /// `/` makes it a directory.
    pub fn new(prefix: impl Into<String>, stem: impl Into<String>, temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            prefix: prefix.into(),
            stem: stem.into(),
            temp_dir: temp_dir.into(),
            open: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn partition_name(&self, window: Window) -> String {
        format!(
            "{}-{}-{}",
            self.stem,
            Window::format_bound(window.start),
            Window::format_bound(window.end)
        )
    }

    /// Final location of the partition for `window`.
    pub fn final_path(&self, window: Window) -> PathBuf {
        PathBuf::from(format!("{}{}.json", self.prefix, self.partition_name(window)))
    }

    fn temp_path(&self, window: Window) -> PathBuf {
        self.temp_dir
            .join(format!("{}.json.inprogress", self.partition_name(window)))
    }

    async fn open_temp(&self, window: Window) -> Result<File, FileSinkError> {
        fs::create_dir_all(&self.temp_dir)
            .await
            .map_err(at(&self.temp_dir))?;

        let path = self.temp_path(window);
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(at(&path))
    }

    async fn publish(&self, window: Window) -> Result<(), FileSinkError> {
        let temp = self.temp_path(window);
        let target = self.final_path(window);

        if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await.map_err(at(parent))?;
        }

        let mut source = File::open(&temp).await.map_err(at(&temp))?;
        let mut dest = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&target)
            .await
            .map_err(at(&target))?;

        tokio::io::copy(&mut source, &mut dest)
            .await
            .map_err(at(&target))?;
        dest.flush().await.map_err(at(&target))?;
        fs::remove_file(&temp).await.map_err(at(&temp))?;

        debug!(path = %target.display(), %window, "Published partition");
        Ok(())
    }
}

#[async_trait]
impl LineSink for FileLineSink {
    type Error = FileSinkError;

    async fn append(&self, window: Window, line: String) -> Result<(), Self::Error> {
        let mut open = self.open.lock().await;

        if !open.contains_key(&window) {
            let file = self.open_temp(window).await?;
            open.insert(window, file);
        }

        let path = self.temp_path(window);
        let Some(file) = open.get_mut(&window) else {
            return Ok(());
        };

        let mut buf = line.into_bytes();
        buf.push(b'\n');
        file.write_all(&buf).await.map_err(at(&path))?;

        Ok(())
    }

    async fn close_through(&self, cutoff: i64) -> Result<usize, Self::Error> {
        let mut open = self.open.lock().await;

        let mut closing: Vec<Window> = open.keys().filter(|w| w.end <= cutoff).copied().collect();
        closing.sort();

        for window in &closing {
            if let Some(mut file) = open.remove(window) {
                file.flush().await.map_err(at(&self.temp_path(*window)))?;
            }
            self.publish(*window).await?;
        }

        Ok(closing.len())
    }
}
