//! Stderr discipline (spec.md §4.5): buffer the remote's standard error
//! until either the injector reaches the `done` transition (flush and pass
//! through from then on) or the attempt fails (append the buffer to the
//! returned error). Keeps a clean console on success, full diagnostics on
//! failure.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::exec::ExecStderr;

pub struct DelayedStderr {
    buffer: Arc<Mutex<Vec<u8>>>,
    released: Arc<AtomicBool>,
    reader_task: JoinHandle<()>,
}

impl DelayedStderr {
    /// Spawns a background task draining `stderr` into a buffer until
    /// [`release`](Self::release) is called.
    pub fn spawn(mut stderr: ExecStderr) -> Self {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let released = Arc::new(AtomicBool::new(false));

        let buffer_task = buffer.clone();
        let released_task = released.clone();
        let reader_task = tokio::spawn(async move {
            let mut chunk = [0u8; 4096];
            loop {
                match stderr.read(&mut chunk).await {
                    Ok(0) => break,
                    Ok(n) => {
                        if released_task.load(Ordering::SeqCst) {
                            let mut real_stderr = tokio::io::stderr();
                            if real_stderr.write_all(&chunk[..n]).await.is_err() {
                                break;
                            }
                        } else {
                            buffer_task.lock().await.extend_from_slice(&chunk[..n]);
                        }
                    }
                    Err(_) => break,
                }
            }
        });

        Self {
            buffer,
            released,
            reader_task,
        }
    }

    /// Flushes whatever has accumulated so far to the real stderr and lets
    /// every subsequent chunk pass straight through.
    pub async fn release(&self) {
        self.released.store(true, Ordering::SeqCst);
        let mut buf = self.buffer.lock().await;
        if !buf.is_empty() {
            let mut real_stderr = tokio::io::stderr();
            let _ = real_stderr.write_all(&buf).await;
            buf.clear();
        }
    }

    /// The accumulated tail, for embedding in a failed attempt's error.
    /// Empty once [`release`](Self::release) has run.
    pub async fn tail(&self) -> String {
        String::from_utf8_lossy(&self.buffer.lock().await).to_string()
    }
}

impl Drop for DelayedStderr {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn stderr_of(bytes: &'static [u8]) -> ExecStderr {
        Box::pin(Cursor::new(bytes))
    }

    #[tokio::test]
    async fn unreleased_buffer_is_available_as_tail() {
        let delayed = DelayedStderr::spawn(stderr_of(b"boom: permission denied\n"));
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(delayed.tail().await, "boom: permission denied\n");
    }

    #[tokio::test]
    async fn release_clears_the_buffer() {
        let delayed = DelayedStderr::spawn(stderr_of(b"harmless warning\n"));
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        delayed.release().await;
        assert_eq!(delayed.tail().await, "");
    }
}
