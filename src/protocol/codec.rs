use std::future::Future;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use super::{LENGTH_BYTES, MAX_FRAME_SIZE};

#[derive(thiserror::Error, Debug)]
pub enum CodecErr {
    #[error("the peer closed the connection between two frames")]
    Eof,

    #[error("the peer closed the connection")]
    ConnectionClosed,

    #[error("the operation was aborted by a shutdown")]
    Aborted,

    #[error("a frame of {0} bytes exceeds the maximum frame size")]
    TooLarge(usize),

    #[error("{0}")]
    Utf(#[from] std::string::FromUtf8Error),

    #[error("{0}")]
    Io(tokio::io::Error),
}

impl From<tokio::io::Error> for CodecErr {
    fn from(err: tokio::io::Error) -> Self {
        use tokio::io::ErrorKind;

        match err.kind() {
            // the peer went away in the middle of an exchange
            ErrorKind::UnexpectedEof
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe => Self::ConnectionClosed,
            _ => Self::Io(err),
        }
    }
}

/// Reads a single frame: a 4 byte big-endian length followed by exactly that many bytes.
///
/// A zero-length frame is valid and returns an empty payload.
/// Returns `CodecErr::Eof` if the peer closes before sending any byte of the frame,
/// `CodecErr::ConnectionClosed` if it closes before the whole frame arrived,
/// and `CodecErr::Aborted` if `cancel` fires while waiting.
pub async fn read_frame<R>(reader: &mut R, cancel: &CancellationToken) -> Result<Vec<u8>, CodecErr>
where
    R: AsyncRead + Unpin,
{
    cancellable(cancel, async {
        let mut header = [0u8; LENGTH_BYTES];
        let mut filled = 0;
        while filled < LENGTH_BYTES {
            match reader.read(&mut header[filled..]).await? {
                0 if filled == 0 => return Err(CodecErr::Eof),
                0 => return Err(CodecErr::ConnectionClosed),
                rcount => filled += rcount,
            }
        }

        let length = u32::from_be_bytes(header);
        if length > MAX_FRAME_SIZE {
            return Err(CodecErr::TooLarge(length as usize));
        }

        // read_exact keeps polling until the buffer is full, or fails with UnexpectedEof
        let mut payload = vec![0u8; length as usize];
        reader.read_exact(&mut payload).await?;

        Ok::<_, CodecErr>(payload)
    })
    .await
}

/// Reads a frame and decodes it as UTF-8 text
pub async fn read_message<R>(reader: &mut R, cancel: &CancellationToken) -> Result<String, CodecErr>
where
    R: AsyncRead + Unpin,
{
    let payload = read_frame(reader, cancel).await?;
    Ok(String::from_utf8(payload)?)
}

/// Writes the length of the payload followed by the payload itself
pub async fn write_frame<W>(
    writer: &mut W,
    payload: &[u8],
    cancel: &CancellationToken,
) -> Result<(), CodecErr>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_frame(payload)?;
    write_raw(writer, &frame, cancel).await
}

/// Builds a frame without sending it, fails if the payload is too large
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>, CodecErr> {
    let length: u32 = payload
        .len()
        .try_into()
        .ok()
        .filter(|length| *length <= MAX_FRAME_SIZE)
        .ok_or(CodecErr::TooLarge(payload.len()))?;

    // send the header and the payload in one go to avoid an extra syscall
    let mut frame = Vec::with_capacity(LENGTH_BYTES + payload.len());
    frame.extend_from_slice(&length.to_be_bytes());
    frame.extend_from_slice(payload);

    Ok(frame)
}

/// Writes raw bytes with no framing, used for the human readable status lines
pub async fn write_raw<W>(
    writer: &mut W,
    data: &[u8],
    cancel: &CancellationToken,
) -> Result<(), CodecErr>
where
    W: AsyncWrite + Unpin,
{
    cancellable(cancel, async {
        // write_all loops over short writes
        writer.write_all(data).await?;
        writer.flush().await?;
        Ok::<_, CodecErr>(())
    })
    .await
}

async fn cancellable<T, F>(cancel: &CancellationToken, fut: F) -> Result<T, CodecErr>
where
    F: Future<Output = Result<T, CodecErr>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(CodecErr::Aborted),
        result = fut => result,
    }
}
