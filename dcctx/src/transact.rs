//! The core request/response driver shared by every `Ctx` operation.
//! Mirrors `dc_client.c`'s `int_transact`: write the request, pump the plug
//! until a matching response is fully reassembled, and fail closed on any
//! mismatch rather than handing back a response for the wrong request.

use std::time::Duration;

use dcache_proto::frame::Operation;
use dcache_proto::{AnyStream, Plug};
use tokio::time::sleep;

use crate::error::ClientError;

/// How long to idle between non-blocking `io()` attempts while waiting for
/// a response. `io()` is a single non-blocking attempt per call, so this
/// loop polls on a short fixed interval instead of blocking on a selector.
const POLL_INTERVAL: Duration = Duration::from_millis(2);

/// Writes `payload` as a single command under `request_uid`, then drives the
/// plug's I/O until a response to that exact `(request_uid, cmd)` pair has
/// fully reassembled, consuming it before returning its body.
pub(crate) async fn transact(
    plug: &mut Plug<AnyStream>,
    request_uid: u32,
    cmd: Operation,
    payload: &[u8],
) -> Result<Vec<u8>, ClientError> {
    plug.write(false, request_uid, cmd, payload)?;
    plug.commit()?;

    loop {
        plug.io().await?;
        if let Some((uid, got_cmd, data)) = plug.read(false) {
            if uid != request_uid || got_cmd != cmd {
                return Err(ClientError::ProtocolMismatch);
            }
            let body = data.to_vec();
            plug.consume()?;
            return Ok(body);
        }
        sleep(POLL_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dcache_proto::TO_SERVER;
    use slog::Logger;
    use tokio::io::duplex;

    fn test_log() -> Logger {
        Logger::root(slog::Discard, slog::o!())
    }

    #[tokio::test]
    async fn transact_round_trips_against_a_peer_plug() {
        let (client_stream, server_stream) = duplex(8192);
        let mut client = Plug::new(client_stream, TO_SERVER, test_log());
        let mut server = Plug::new(server_stream, 0, test_log());

        let responder = tokio::spawn(async move {
            loop {
                server.io().await.unwrap();
                if let Some((uid, cmd, payload)) = server.read(false) {
                    let body = payload.to_vec();
                    server.write(false, uid, cmd, &body).unwrap();
                    server.commit().unwrap();
                    server.consume().unwrap();
                    server.io().await.unwrap();
                    break;
                }
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        });

        let got = transact(&mut client, 5, Operation::Get, b"abc").await.unwrap();
        assert_eq!(got, b"abc");
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn mismatched_response_is_rejected() {
        let (client_stream, server_stream) = duplex(8192);
        let mut client = Plug::new(client_stream, TO_SERVER, test_log());
        let mut server = Plug::new(server_stream, 0, test_log());

        let responder = tokio::spawn(async move {
            loop {
                server.io().await.unwrap();
                if let Some((uid, _cmd, _payload)) = server.read(false) {
                    // Respond under the wrong command to trigger a mismatch.
                    server.write(false, uid, Operation::Have, b"x").unwrap();
                    server.commit().unwrap();
                    server.consume().unwrap();
                    server.io().await.unwrap();
                    break;
                }
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        });

        let err = transact(&mut client, 5, Operation::Get, b"abc").await.unwrap_err();
        assert!(matches!(err, ClientError::ProtocolMismatch));
        responder.await.unwrap();
    }
}
