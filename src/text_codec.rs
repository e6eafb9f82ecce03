use std::io;

use tokio::io::AsyncRead;
use tokio_stream::StreamExt;
use tokio_util::bytes::BytesMut;
use tokio_util::codec::{Decoder, FramedRead};

/// Decodes tool output into text chunks without splitting characters.
///
/// Each frame is the longest complete UTF-8 prefix of what has arrived so
/// far. A truncated trailing sequence stays buffered for the next read;
/// bytes that can never form a character are replaced with U+FFFD.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct TextChunkCodec;

impl Decoder for TextChunkCodec {
    type Item = String;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<String>, io::Error> {
        let complete = match std::str::from_utf8(&src[..]) {
            Ok(text) => text.len(),
            Err(error) => match error.error_len() {
                Some(invalid) => error.valid_up_to() + invalid,
                None => error.valid_up_to(),
            },
        };
        if complete == 0 {
            return Ok(None);
        }
        let chunk = src.split_to(complete);
        Ok(Some(String::from_utf8_lossy(&chunk).into_owned()))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<String>, io::Error> {
        if let Some(chunk) = self.decode(src)? {
            return Ok(Some(chunk));
        }
        if src.is_empty() {
            return Ok(None);
        }
        let tail = src.split();
        Ok(Some(String::from_utf8_lossy(&tail).into_owned()))
    }
}

/// Calls `on_chunk` with decoded text until `reader` closes or fails.
pub(crate) async fn for_each_chunk<R, F>(reader: R, mut on_chunk: F) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    F: FnMut(&str),
{
    let mut chunks = FramedRead::new(reader, TextChunkCodec);
    while let Some(chunk) = chunks.next().await {
        on_chunk(&chunk?);
    }
    Ok(())
}
