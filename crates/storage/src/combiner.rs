//! Atomic concatenation of chunk files into a final file.
//!
//! Every combiner writes into a temp file in the destination directory and
//! renames it into place only after the output is verified, so the
//! destination is either absent, its previous content, or the complete file.
//! The temp file is deleted on drop, including when the combine future is
//! cancelled.

use crate::error::{CombineError, CombineResult};
use async_trait::async_trait;
use quilt_core::CombineStrategy;
use std::future::Future;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::process::Command;
use tracing::instrument;

/// Parameters for one combine run.
#[derive(Clone, Debug)]
pub struct CombineRequest {
    /// Chunk files in the exact order they are concatenated.
    pub chunks: Vec<PathBuf>,
    /// Final file path.
    pub destination: PathBuf,
    /// Expected total size; checked before the rename when set.
    pub expected_size: Option<u64>,
    /// Upper bound for the whole run.
    pub timeout: Duration,
}

/// Concatenates chunk files into one file.
#[async_trait]
pub trait FileCombiner: Send + Sync + 'static {
    /// Combine `request.chunks` into `request.destination` and return its size.
    async fn combine(&self, request: &CombineRequest) -> CombineResult<u64>;

    /// Name of the combine mechanism, used in logs.
    fn name(&self) -> &'static str;
}

/// Create the combiner for a configured strategy.
pub fn from_strategy(strategy: CombineStrategy) -> Arc<dyn FileCombiner> {
    match strategy {
        CombineStrategy::Streaming => Arc::new(StreamingCombiner),
        CombineStrategy::Cat => Arc::new(CatCombiner::default()),
    }
}

/// Create the temp output as a hidden sibling of `destination`.
///
/// The file is removed when the returned handle drops, so a combine that
/// fails, times out or is cancelled leaves nothing behind.
fn temp_output_for(destination: &Path) -> CombineResult<NamedTempFile> {
    let file_name = destination.file_name().ok_or_else(|| {
        CombineError::InvalidDestination(format!("{} has no file name", destination.display()))
    })?;
    let parent = match destination.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    Ok(tempfile::Builder::new()
        .prefix(&format!(".{}.", file_name.to_string_lossy()))
        .suffix(".tmp")
        .tempfile_in(parent)?)
}

/// Run `write` against a temp file under the request's timeout, verify the
/// output, and rename it into place.
async fn combine_atomically<F, Fut>(request: &CombineRequest, write: F) -> CombineResult<u64>
where
    F: FnOnce(std::fs::File) -> Fut,
    Fut: Future<Output = CombineResult<()>>,
{
    if request.chunks.is_empty() {
        return Err(CombineError::Empty);
    }

    if let Some(parent) = request.destination.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).await?;
    }
    let temp = temp_output_for(&request.destination)?;
    let output = temp.as_file().try_clone()?;

    match tokio::time::timeout(request.timeout, write(output)).await {
        Ok(result) => result?,
        Err(_) => return Err(CombineError::Timeout(request.timeout)),
    }

    let size = match fs::metadata(temp.path()).await {
        Ok(meta) => meta.len(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(CombineError::NoOutput(request.destination.display().to_string()));
        }
        Err(e) => return Err(e.into()),
    };

    if let Some(expected) = request.expected_size
        && size != expected
    {
        return Err(CombineError::SizeMismatch {
            expected,
            actual: size,
        });
    }

    temp.persist(&request.destination)
        .map_err(|e| CombineError::Io(e.error))?;

    Ok(size)
}

/// Combines chunks with a native streaming copy.
#[derive(Clone, Copy, Debug, Default)]
pub struct StreamingCombiner;

#[async_trait]
impl FileCombiner for StreamingCombiner {
    #[instrument(skip(self, request), fields(chunks = request.chunks.len(), destination = %request.destination.display()))]
    async fn combine(&self, request: &CombineRequest) -> CombineResult<u64> {
        let chunks = request.chunks.clone();
        combine_atomically(request, |output| async move {
            let mut output = fs::File::from_std(output);
            for chunk in &chunks {
                let mut input = fs::File::open(chunk).await?;
                tokio::io::copy(&mut input, &mut output).await?;
            }
            output.sync_all().await?;
            Ok(())
        })
        .await
    }

    fn name(&self) -> &'static str {
        "streaming"
    }
}

/// Combines chunks by running `cat` with stdout redirected to the temp file.
///
/// Arguments are passed directly, never through a shell. The child is killed
/// when the timeout drops its future.
#[derive(Clone, Debug)]
pub struct CatCombiner {
    program: PathBuf,
}

impl CatCombiner {
    /// Use a specific `cat`-compatible program.
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for CatCombiner {
    fn default() -> Self {
        Self::with_program("cat")
    }
}

#[async_trait]
impl FileCombiner for CatCombiner {
    #[instrument(skip(self, request), fields(chunks = request.chunks.len(), destination = %request.destination.display()))]
    async fn combine(&self, request: &CombineRequest) -> CombineResult<u64> {
        let chunks = request.chunks.clone();
        let program = self.program.clone();
        combine_atomically(request, |output| async move {
            let sync_handle = output.try_clone()?;
            let child = Command::new(&program)
                .arg("--")
                .args(&chunks)
                .stdin(Stdio::null())
                .stdout(Stdio::from(output))
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .spawn()
                .map_err(|e| {
                    CombineError::Command(format!("failed to spawn {}: {e}", program.display()))
                })?;

            let result = child.wait_with_output().await?;
            if !result.status.success() {
                let stderr = String::from_utf8_lossy(&result.stderr);
                return Err(CombineError::Command(format!(
                    "{} exited with {}: {}",
                    program.display(),
                    result.status,
                    stderr.trim()
                )));
            }

            fs::File::from_std(sync_handle).sync_all().await?;
            Ok(())
        })
        .await
    }

    fn name(&self) -> &'static str {
        "cat"
    }
}
