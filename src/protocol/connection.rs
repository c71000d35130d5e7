use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;

use super::{
    codec::{self, CodecErr},
    message::{BatchStatus, Intro, Reply, ReplyInternal},
    message_type,
};

/// A framed view over a client stream
///
/// every read and write is aborted once the connection's cancellation token fires.
pub struct Connection<S> {
    stream: S,
    cancel: CancellationToken,
}

impl<S> Connection<S> {
    pub fn new(stream: S, cancel: CancellationToken) -> Self {
        Self { stream, cancel }
    }
}

impl<S> Connection<S>
where
    S: AsyncRead + Unpin,
{
    /// Reads the token that opens the next exchange
    ///
    /// returns None if the client has closed the connection between two exchanges,
    /// a connection lost in the middle of the token is an error.
    pub async fn read_intro(&mut self) -> Result<Option<Intro>, CodecErr> {
        match codec::read_message(&mut self.stream, &self.cancel).await {
            Ok(token) => Ok(Some(token.into())),
            Err(CodecErr::Eof) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Reads the next batch of bets
    ///
    /// returns None once the client sends the zero-length frame that ends the stream of batches.
    pub async fn read_batch(&mut self) -> Result<Option<Vec<u8>>, CodecErr> {
        let payload = codec::read_frame(&mut self.stream, &self.cancel).await?;
        if payload.is_empty() {
            return Ok(None);
        }

        Ok(Some(payload))
    }

    /// Reads the id of the agency asking for its winners
    pub async fn read_agency(&mut self) -> Result<String, CodecErr> {
        codec::read_message(&mut self.stream, &self.cancel).await
    }
}

impl<S> Connection<S>
where
    S: AsyncWrite + Unpin,
{
    /// Writes the given reply to the client
    pub async fn send_reply(&mut self, reply: Reply) -> Result<(), CodecErr> {
        match reply.internal {
            ReplyInternal::BatchAck { success, count } => {
                // status lines are sent as plain text, not framed
                let line = format!("{}\n", BatchStatus { success, count });
                codec::write_raw(&mut self.stream, line.as_bytes(), &self.cancel).await?
            }
            ReplyInternal::NoWinners => {
                self.send_token(message_type::NOWINN).await?;
            }
            ReplyInternal::Winners { documents } => {
                // both frames are built first, so an oversized list sends nothing at all
                let mut frames = codec::encode_frame(message_type::WINNERS.as_bytes())?;
                frames.extend(codec::encode_frame(documents.join(",").as_bytes())?);
                codec::write_raw(&mut self.stream, &frames, &self.cancel).await?;
            }
        }

        Ok(())
    }

    async fn send_token(&mut self, token: &str) -> Result<(), CodecErr> {
        codec::write_frame(&mut self.stream, token.as_bytes(), &self.cancel).await
    }
}
