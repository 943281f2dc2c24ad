use std::io;

use tokio::io::{AsyncRead, AsyncReadExt};

const CHUNK_SIZE: usize = 8 * 1024;

/// Output buffer that keeps at most `cap` bytes and silently drops the rest.
/// The reader is always drained to EOF so the writer never blocks on a full pipe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundedCapture {
    cap: usize,
    bytes: Vec<u8>,
    truncated: bool,
}

impl BoundedCapture {
    pub fn new(cap: usize) -> Self {
        Self {
            cap,
            bytes: Vec::with_capacity(cap.min(CHUNK_SIZE)),
            truncated: false,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        let room = self.cap - self.bytes.len();
        if chunk.len() > room {
            self.truncated = true;
        }
        self.bytes.extend_from_slice(&chunk[..chunk.len().min(room)]);
    }

    /// Reads until EOF. Bytes already pushed are kept if this future is dropped midway.
    pub async fn fill_from<R>(&mut self, reader: &mut R) -> io::Result<()>
    where
        R: AsyncRead + Unpin,
    {
        let mut chunk = [0u8; CHUNK_SIZE];
        loop {
            let n = reader.read(&mut chunk).await?;
            if n == 0 {
                return Ok(());
            }
            self.push(&chunk[..n]);
        }
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// (text, truncated). Invalid UTF-8 is replaced, never rejected.
    pub fn into_text(self) -> (String, bool) {
        (String::from_utf8_lossy(&self.bytes).into_owned(), self.truncated)
    }
}
