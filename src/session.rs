use std::net::SocketAddr;

use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
};
use tokio_util::sync::CancellationToken;

use crate::{
    lottery::{bet::parse_batch, store::StoreErr, AgencyId},
    protocol::{
        codec::CodecErr,
        connection::Connection,
        message::{Intro, Reply},
    },
    SharedLottery,
};

#[derive(thiserror::Error, Debug)]
pub enum SessionErr {
    #[error("{0}")]
    Codec(#[from] CodecErr),

    #[error("{0}")]
    Store(#[from] StoreErr),

    #[error("invalid agency id: {0:?}")]
    InvalidAgency(String),
}

enum State {
    AwaitIntro,
    Ingesting,
    AwaitingWinnerAgencyId,
    Done,
}

/// Serves a client until it disconnects, fails, or receives its winners
///
/// the socket is closed when this function returns, whatever the outcome.
pub async fn serve(
    stream: TcpStream,
    addr: SocketAddr,
    lottery: SharedLottery,
    cancel: CancellationToken,
) {
    let mut conn = Connection::new(stream, cancel);

    match handle(&mut conn, &lottery).await {
        Ok(()) => {}
        Err(SessionErr::Codec(CodecErr::Aborted)) => {
            tracing::info!("action: receive_message | result: aborted | ip: {}", addr.ip())
        }
        Err(err) => {
            tracing::error!("action: receive_message | result: fail | error: {}", err)
        }
    }

    // dropping the connection closes the socket
    drop(conn);
    tracing::info!("action: close_client_socket | result: success | ip: {}", addr.ip());
}

/// Runs the session state machine over an established connection
pub async fn handle<S>(conn: &mut Connection<S>, lottery: &SharedLottery) -> Result<(), SessionErr>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut state = State::AwaitIntro;

    loop {
        state = match state {
            State::AwaitIntro => match conn.read_intro().await? {
                Some(Intro::BetData) => State::Ingesting,
                Some(Intro::RequestWinners) => State::AwaitingWinnerAgencyId,
                Some(Intro::Unknown(token)) => {
                    tracing::info!("Unknown message received: {:?}", token);
                    State::AwaitIntro
                }
                // the client disconnected
                None => State::Done,
            },
            State::Ingesting => {
                ingest_batches(conn, lottery).await?;
                State::AwaitIntro
            }
            State::AwaitingWinnerAgencyId => match answer_winners(conn, lottery).await? {
                true => State::Done,
                false => State::AwaitIntro,
            },
            State::Done => return Ok(()),
        };
    }
}

// Stores batches until the client ends the stream with a zero-length frame
async fn ingest_batches<S>(conn: &mut Connection<S>, lottery: &SharedLottery) -> Result<(), SessionErr>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    while let Some(payload) = conn.read_batch().await? {
        let reply = match parse_batch(&payload) {
            Ok(bets) => {
                lottery.bets.append(&bets).await?;
                tracing::info!(
                    "action: apuesta_recibida | result: success | cantidad: {}",
                    bets.len()
                );
                Reply::batch_stored(bets.len())
            }
            Err(err) => {
                // nothing from this batch is stored, the client may keep sending
                tracing::error!(
                    "action: apuesta_recibida | result: fail | cantidad: {} | error: {}",
                    err.attempted,
                    err
                );
                Reply::batch_rejected(err.attempted)
            }
        };

        conn.send_reply(reply).await?;
    }

    if lottery.barrier.mark_agency_done() {
        tracing::info!("action: sorteo | result: success");
    }
    tracing::debug!(
        "{} out of {} agencies are done",
        lottery.barrier.finished(),
        lottery.barrier.total()
    );

    Ok(())
}

// Answers a winners request
//
// returns true if the winners were sent, which ends the session
async fn answer_winners<S>(conn: &mut Connection<S>, lottery: &SharedLottery) -> Result<bool, SessionErr>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let raw = conn.read_agency().await?;
    let agency: AgencyId = raw
        .trim()
        .parse()
        .map_err(|_| SessionErr::InvalidAgency(raw.clone()))?;

    if !lottery.barrier.is_complete() {
        tracing::debug!("agency {} asked for winners too early", agency);
        conn.send_reply(Reply::no_winners()).await?;
        return Ok(false);
    }

    let documents = lottery.winners.resolve(agency).await?;
    tracing::info!(
        "action: consulta_ganadores | result: success | agencia: {} | cant_ganadores: {}",
        agency,
        documents.len()
    );
    conn.send_reply(Reply::winners(documents)).await?;

    Ok(true)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::io::{AsyncWriteExt, DuplexStream};
    use tokio_util::sync::CancellationToken;

    use super::{handle, SessionErr};
    use crate::{
        lottery::store::{BetStore, MemoryStore},
        protocol::{codec::CodecErr, connection::Connection},
        testing::AgencyClient,
        Lottery, SharedLottery,
    };

    const STORED_ONE: &str = "action: apuesta_recibida | result: success | cantidad: 1";

    fn lottery(agencies: usize) -> (SharedLottery, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::default());
        (Arc::new(Lottery::new(store.clone(), agencies)), store)
    }

    // runs a session in the background and returns the client side of it
    fn start(
        lottery: &SharedLottery,
        cancel: CancellationToken,
    ) -> (
        AgencyClient<DuplexStream>,
        tokio::task::JoinHandle<Result<(), SessionErr>>,
    ) {
        let (client, server) = tokio::io::duplex(4096);
        let lottery = lottery.clone();
        let session = tokio::spawn(async move {
            let mut conn = Connection::new(server, cancel);
            handle(&mut conn, &lottery).await
        });

        (AgencyClient::new(client), session)
    }

    #[tokio::test]
    async fn submit_then_ask_for_winners() {
        let (lottery, store) = lottery(1);
        let (mut client, session) = start(&lottery, CancellationToken::new());

        let statuses = client
            .submit(&["Ana,Gomez,30111222,2001-01-01,7,1\nLuis,Perez,28000111,1990-05-17,7574,1"])
            .await;
        assert_eq!(
            statuses,
            ["action: apuesta_recibida | result: success | cantidad: 2"]
        );

        let winners = client.request_winners(1).await;
        assert_eq!(winners, Some(vec!["28000111".to_string()]));

        // the session ends after the winners are sent
        session.await.unwrap().unwrap();
        assert_eq!(store.load_all().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn single_losing_bet() {
        let (lottery, _) = lottery(1);
        let (mut client, session) = start(&lottery, CancellationToken::new());

        let statuses = client.submit(&["Ana,Gomez,30111222,2001-01-01,7,1"]).await;
        assert_eq!(statuses, [STORED_ONE]);

        assert_eq!(client.request_winners(1).await, Some(vec![]));
        session.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn malformed_batches_keep_the_session_alive() {
        let (lottery, store) = lottery(1);
        let (mut client, _session) = start(&lottery, CancellationToken::new());

        let statuses = client
            .submit(&[
                "Ana,Gomez,30111222",
                "Luis,Perez,28000111,1990-05-17,7574,1\nbroken\nJuan,Diaz,1,2000-01-01,3,1",
                "Luis,Perez,28000111,1990-05-17,7574,1",
            ])
            .await;
        assert_eq!(
            statuses,
            [
                "action: apuesta_recibida | result: fail | cantidad: 1",
                "action: apuesta_recibida | result: fail | cantidad: 3",
                STORED_ONE,
            ]
        );

        let stored = store.load_all().await.unwrap();
        assert_eq!(stored.len(), 1);
        assert!(stored.iter().all(|bet| bet.first_name != "Ana"));
    }

    #[tokio::test]
    async fn too_early_for_winners() {
        let (lottery, _) = lottery(2);
        let (mut client, _session) = start(&lottery, CancellationToken::new());

        client.submit(&["Ana,Gomez,30111222,2001-01-01,7574,1"]).await;

        // one agency is still missing, the client may ask again
        assert_eq!(client.request_winners(1).await, None);
        assert_eq!(client.request_winners(1).await, None);

        // the second agency finishes on its own connection
        let (mut other, _other_session) = start(&lottery, CancellationToken::new());
        other.submit(&["Luis,Perez,28000111,1990-05-17,12,2"]).await;
        assert_eq!(other.request_winners(2).await, Some(vec![]));

        assert_eq!(
            client.request_winners(1).await,
            Some(vec!["30111222".to_string()])
        );
    }

    #[tokio::test]
    async fn unknown_messages_are_ignored() {
        let (lottery, _) = lottery(1);
        let (mut client, session) = start(&lottery, CancellationToken::new());

        client.send(b"HELLO").await;
        client.send(b"").await;
        let statuses = client.submit(&["Ana,Gomez,30111222,2001-01-01,7,1"]).await;
        assert_eq!(statuses, [STORED_ONE]);

        assert_eq!(client.request_winners(1).await, Some(vec![]));
        session.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn disconnecting_ends_the_session() {
        let (lottery, _) = lottery(1);
        let (mut client, session) = start(&lottery, CancellationToken::new());

        client.submit(&["Ana,Gomez,30111222,2001-01-01,7,1"]).await;
        drop(client);

        session.await.unwrap().unwrap();
        assert!(lottery.barrier.is_complete());
    }

    #[tokio::test]
    async fn connection_lost_mid_intro_is_an_error() {
        let (lottery, _) = lottery(1);
        let (mut client, server) = tokio::io::duplex(1024);

        // the intro announces 7 bytes, only 3 arrive before the client goes away
        client.write_all(b"\x00\x00\x00\x07BET").await.unwrap();
        drop(client);

        let mut conn = Connection::new(server, CancellationToken::new());
        let result = handle(&mut conn, &lottery).await;
        assert!(matches!(
            result,
            Err(SessionErr::Codec(CodecErr::ConnectionClosed))
        ));
        assert_eq!(lottery.barrier.finished(), 0);
    }

    #[tokio::test]
    async fn bad_agency_ids_end_the_session() {
        let (lottery, _) = lottery(1);
        let (mut client, session) = start(&lottery, CancellationToken::new());

        client.send(b"REQWINN").await;
        client.send(b"agency one").await;

        let result = session.await.unwrap();
        assert!(matches!(result, Err(SessionErr::InvalidAgency(_))));
    }

    #[tokio::test]
    async fn cancellation_aborts_a_waiting_session() {
        let (lottery, _) = lottery(1);
        let cancel = CancellationToken::new();
        let (mut client, session) = start(&lottery, cancel.clone());

        // leave the session in the middle of a stream of batches
        client.send(b"BETDATA").await;
        cancel.cancel();

        let result = session.await.unwrap();
        assert!(matches!(result, Err(SessionErr::Codec(CodecErr::Aborted))));
        assert!(!lottery.barrier.is_complete());
    }

    #[tokio::test]
    async fn every_finished_stream_counts() {
        // the same agency finishing twice completes a lottery of two agencies
        let (lottery, _) = lottery(2);
        let (mut client, _session) = start(&lottery, CancellationToken::new());

        client.submit(&["Ana,Gomez,30111222,2001-01-01,7574,1"]).await;
        client.submit(&[]).await;

        assert_eq!(
            client.request_winners(1).await,
            Some(vec!["30111222".to_string()])
        );
    }
}
