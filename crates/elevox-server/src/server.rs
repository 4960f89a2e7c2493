//! HTTP serving with graceful shutdown.

use std::future::Future;

use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::api::create_router;
use crate::state::AppState;

/// Serve the API on `listener` until `signal` resolves.
///
/// Once the signal fires, open status streams are ended so the in-flight
/// connections can drain and this returns.
///
/// # Errors
///
/// Returns an error if accepting connections fails.
pub async fn serve<F>(listener: TcpListener, state: AppState, signal: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = create_router(state.clone())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            signal.await;
            info!("Closing status streams");
            state.begin_shutdown();
        })
        .await
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio::sync::oneshot;

    use super::*;
    use crate::api::test_support::server_state;

    #[tokio::test]
    async fn test_shutdown_completes_with_open_status_stream() {
        let (state, _scheduler) = server_state();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop, stopped) = oneshot::channel::<()>();
        let server = tokio::spawn(serve(listener, state, async move {
            let _ = stopped.await;
        }));

        let mut client = TcpStream::connect(addr).await.unwrap();
        client
            .write_all(b"GET /api/status/stream HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .await
            .unwrap();

        let mut received = Vec::new();
        let mut buf = [0_u8; 512];
        while !String::from_utf8_lossy(&received).contains("200 OK") {
            let n = tokio::time::timeout(Duration::from_secs(3), client.read(&mut buf))
                .await
                .unwrap()
                .unwrap();
            assert!(n > 0, "connection closed before the stream started");
            received.extend_from_slice(&buf[..n]);
        }
        assert!(String::from_utf8_lossy(&received).contains("text/event-stream"));

        stop.send(()).unwrap();

        tokio::time::timeout(Duration::from_secs(3), server)
            .await
            .expect("server kept running with a status stream open")
            .unwrap()
            .unwrap();
    }
}
