//! Byte stream over a converted artifact that owns its working directory.

use std::io;
use std::path::Path;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use pin_project_lite::pin_project;
use tokio::fs::File;
use tokio_util::io::ReaderStream;

use crate::filesystem::FsUtils;
use crate::workspace::WorkingDirectory;

pin_project! {
    /// Streams an artifact from disk.
    ///
    /// Holds the request's [`WorkingDirectory`] so the artifact outlives the
    /// pipeline call. The directory is released when the stream reaches its
    /// end or is dropped (e.g. the client disconnects).
    #[derive(Debug)]
    pub struct ArtifactStream {
        #[pin]
        inner: ReaderStream<File>,
        file_name: String,
        size: u64,
        workspace: Option<WorkingDirectory>,
    }
}

impl ArtifactStream {
    /// Open `path` for streaming, taking ownership of `workspace`.
    pub async fn open(path: &Path, workspace: WorkingDirectory) -> io::Result<Self> {
        let file = File::open(path).await?;
        let size = file.metadata().await?.len();
        Ok(Self {
            inner: ReaderStream::new(file),
            file_name: FsUtils::extract_filename_str(path),
            size,
            workspace: Some(workspace),
        })
    }

    /// File name of the artifact, e.g. `car.glb`.
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Artifact size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }
}

impl Stream for ArtifactStream {
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        let polled = this.inner.poll_next(cx);
        if let Poll::Ready(None) = polled {
            this.workspace.take();
        }
        polled
    }
}
