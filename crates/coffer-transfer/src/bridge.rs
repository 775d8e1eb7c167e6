//! Push/pull adapters between gRPC message streams and byte streams
//!
//! - [`ChunkReader`]: message stream in, `AsyncRead` out (upload on the
//!   server, download on the client)
//! - [`chunk_stream`]: `AsyncRead` in, fixed-size chunks out (download on the
//!   server, upload on the client)

use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use coffer_core::proto::{file_stream::Data, FileStream};
use futures::Stream;
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};
use tonic::Status;

/// Serves reads from the `chunk_data` payloads of a [`FileStream`] sequence.
///
/// Holds at most one chunk; the next message is pulled only once the current
/// one is fully consumed. The metadata message must already have been taken
/// off the stream: a second one is an `InvalidData` error.
pub struct ChunkReader<S> {
    stream: S,
    chunk: Vec<u8>,
    pos: usize,
    done: bool,
}

impl<S> ChunkReader<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            chunk: Vec::new(),
            pos: 0,
            done: false,
        }
    }
}

impl<S> AsyncRead for ChunkReader<S>
where
    S: Stream<Item = Result<FileStream, Status>> + Unpin,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        out: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if out.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        loop {
            if this.pos < this.chunk.len() {
                let n = out.remaining().min(this.chunk.len() - this.pos);
                out.put_slice(&this.chunk[this.pos..this.pos + n]);
                this.pos += n;
                return Poll::Ready(Ok(()));
            }
            if this.done {
                return Poll::Ready(Ok(()));
            }

            match ready!(Pin::new(&mut this.stream).poll_next(cx)) {
                None => this.done = true,
                Some(Err(status)) => {
                    this.done = true;
                    return Poll::Ready(Err(io::Error::other(status)));
                }
                Some(Ok(FileStream {
                    data: Some(Data::ChunkData(bytes)),
                })) => {
                    this.chunk = bytes;
                    this.pos = 0;
                }
                Some(Ok(FileStream {
                    data: Some(Data::Info(_)),
                })) => {
                    this.done = true;
                    return Poll::Ready(Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "file metadata is only allowed as the first message",
                    )));
                }
                Some(Ok(FileStream { data: None })) => {
                    this.done = true;
                    return Poll::Ready(Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "stream message carries neither metadata nor data",
                    )));
                }
            }
        }
    }
}

/// Split a reader into `chunk_size` buffers, the last one possibly short.
///
/// Each buffer is filled completely before it is yielded, so every chunk but
/// the last is exactly `chunk_size` bytes regardless of how the reader
/// returns data. An empty reader yields nothing.
pub fn chunk_stream<R>(
    reader: R,
    chunk_size: usize,
) -> impl Stream<Item = io::Result<Vec<u8>>> + Send
where
    R: AsyncRead + Unpin + Send,
{
    futures::stream::try_unfold(reader, move |mut reader| async move {
        let chunk = read_full(&mut reader, chunk_size).await?;
        if chunk.is_empty() {
            Ok(None)
        } else {
            Ok(Some((chunk, reader)))
        }
    })
}

async fn read_full<R: AsyncRead + Unpin>(reader: &mut R, size: usize) -> io::Result<Vec<u8>> {
    let mut buf = vec![0u8; size];
    let mut filled = 0;
    while filled < size {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    buf.truncate(filled);
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use coffer_core::proto::FileInfo;
    use futures::TryStreamExt;
    use proptest::prelude::*;

    fn messages(data: &[u8], chunk: usize) -> Vec<Result<FileStream, Status>> {
        data.chunks(chunk)
            .map(|c| Ok(FileStream::chunk(c.to_vec())))
            .collect()
    }

    async fn read_with(data: Vec<Result<FileStream, Status>>, read_size: usize) -> io::Result<Vec<u8>> {
        let mut reader = ChunkReader::new(futures::stream::iter(data));
        let mut out = Vec::new();
        let mut buf = vec![0u8; read_size];
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                return Ok(out);
            }
            out.extend_from_slice(&buf[..n]);
        }
    }

    fn sample(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[tokio::test]
    async fn test_reads_smaller_than_chunks() {
        let data = sample(100_000);
        let out = read_with(messages(&data, 1001), 100).await.unwrap();
        assert_eq!(out, data);
    }

    #[tokio::test]
    async fn test_reads_larger_than_chunks() {
        let data = sample(100_000);
        let out = read_with(messages(&data, 1001), 64 * 1024).await.unwrap();
        assert_eq!(out, data);
    }

    #[tokio::test]
    async fn test_empty_stream_is_eof() {
        assert!(read_with(Vec::new(), 16).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_chunks_skipped() {
        let msgs = vec![
            Ok(FileStream::chunk(b"ab".to_vec())),
            Ok(FileStream::chunk(Vec::new())),
            Ok(FileStream::chunk(b"cd".to_vec())),
        ];
        assert_eq!(read_with(msgs, 16).await.unwrap(), b"abcd");
    }

    #[tokio::test]
    async fn test_metadata_mid_stream_rejected() {
        let msgs = vec![
            Ok(FileStream::chunk(b"ab".to_vec())),
            Ok(FileStream::info(FileInfo::default())),
        ];
        let err = read_with(msgs, 16).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn test_transport_error_surfaces() {
        let msgs = vec![
            Ok(FileStream::chunk(b"ab".to_vec())),
            Err(Status::cancelled("client went away")),
        ];
        let err = read_with(msgs, 16).await.unwrap_err();
        assert!(err.to_string().contains("client went away"));
    }

    #[tokio::test]
    async fn test_chunk_stream_sizes() {
        let data = sample(250 * 1024);
        let chunks: Vec<Vec<u8>> = chunk_stream(data.as_slice(), 100 * 1024)
            .try_collect()
            .await
            .unwrap();

        let sizes: Vec<usize> = chunks.iter().map(Vec::len).collect();
        assert_eq!(sizes, [100 * 1024, 100 * 1024, 50 * 1024]);
        assert_eq!(chunks.concat(), data);
    }

    #[tokio::test]
    async fn test_chunk_stream_empty_source() {
        let chunks: Vec<Vec<u8>> = chunk_stream(&b""[..], 1024).try_collect().await.unwrap();
        assert!(chunks.is_empty());
    }

    #[tokio::test]
    async fn test_chunk_stream_fills_from_trickling_reader() {
        // A reader that hands out at most 7 bytes per read
        let data = sample(5000);
        let (client, mut server) = tokio::io::duplex(7);
        let feed = data.clone();
        tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            server.write_all(&feed).await.unwrap();
        });

        let chunks: Vec<Vec<u8>> = chunk_stream(client, 1000).try_collect().await.unwrap();
        assert!(chunks.iter().all(|c| c.len() == 1000));
        assert_eq!(chunks.concat(), data);
    }

    proptest! {
        #[test]
        fn reader_reassembles_any_chunking(
            len in 0usize..20_000,
            chunk in 1usize..3000,
            read_size in 1usize..5000,
        ) {
            let data = sample(len);
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let out = rt.block_on(read_with(messages(&data, chunk), read_size)).unwrap();
            prop_assert_eq!(out, data);
        }
    }
}
