//! Raw TCP front end.

use crate::error::{ErrorKind, Result};
use crate::protocol::{Reply, read_name};
use crate::session::Session;
use crate::IngestHandle;
use exn::ResultExt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tracing::Instrument;

/// How long to keep reading after replying, so that closing a connection
/// with unread input does not reset it before the reply arrives.
const LINGER: Duration = Duration::from_secs(2);
/// Rejected connections allowed to linger at once. Past this, rejections
/// close straight after the reply.
const MAX_LINGERING: usize = 32;

pub async fn bind(addr: SocketAddr) -> Result<TcpListener> {
    TcpListener::bind(addr).await.or_raise(|| ErrorKind::Bind(addr))
}

/// Accept connections until `shutdown` resolves.
///
/// Connections are accepted one at a time. Each is either admitted and
/// handed to the worker pool, or answered with `QUEUE_FULL` and closed
/// without touching a worker. A failed accept is logged and skipped.
pub async fn serve(listener: TcpListener, ingest: IngestHandle, shutdown: impl Future<Output = ()>) {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, "Socket listener ready");
    }
    let lingering = Arc::new(Semaphore::new(MAX_LINGERING));
    tokio::pin!(shutdown);
    loop {
        let (stream, peer) = tokio::select! {
            () = &mut shutdown => break,
            accepted = listener.accept() => match accepted {
                Ok(connection) => connection,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to accept connection");
                    continue;
                },
            },
        };
        admit(&ingest, &lingering, stream, peer).await;
    }
    tracing::info!("Socket listener stopped");
}

async fn admit(ingest: &IngestHandle, lingering: &Arc<Semaphore>, stream: TcpStream, peer: SocketAddr) {
    let Ok(permit) = ingest.try_admit() else {
        tracing::info!(%peer, "Queue full; rejecting upload");
        match Arc::clone(lingering).try_acquire_owned() {
            Ok(slot) => {
                tokio::spawn(async move {
                    reject(stream, peer, true).await;
                    drop(slot);
                });
            },
            Err(_) => reject(stream, peer, false).await,
        }
        return;
    };
    tracing::debug!(%peer, "Upload admitted");
    let session = ingest.session().clone();
    if let Err(err) = ingest.dispatch(permit, handle(stream, peer, session)).await {
        tracing::warn!(%peer, error = ?err, "Could not queue upload");
    }
}

async fn reject(mut stream: TcpStream, peer: SocketAddr, linger_after: bool) {
    if let Err(err) = Reply::QueueFull.send(&mut stream).await {
        tracing::debug!(%peer, error = ?err, "Could not tell client the queue is full");
    }
    let _ = stream.shutdown().await;
    if linger_after {
        linger(&mut stream).await;
    }
}

async fn linger<R: AsyncRead + Unpin>(reader: &mut R) {
    let _ = tokio::time::timeout(LINGER, tokio::io::copy(reader, &mut tokio::io::sink())).await;
}

async fn handle(mut stream: TcpStream, peer: SocketAddr, session: Session) {
    let span = tracing::info_span!("connection", %peer);
    async move {
        let (mut reader, mut writer) = stream.split();
        let reply = match read_name(&mut reader).await {
            Ok(name) => match session.run(&name, &mut reader).await {
                Ok(stored) => Reply::Success(stored.name),
                Err(_) => Reply::Failed,
            },
            Err(err) => {
                tracing::warn!(error = ?err, "Malformed upload request");
                Reply::Failed
            },
        };
        // Best effort: the upload is already settled either way.
        if let Err(err) = reply.send(&mut writer).await {
            tracing::warn!(error = ?err, reply = %reply, "Could not send reply");
        }
        let _ = writer.shutdown().await;
        linger(&mut reader).await;
    }
    .instrument(span)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Ingestor;
    use crate::testing::{Copying, Panicking, Slow, eventually};
    use reel_storage::MediaDir;
    use reel_transcode::{Passthrough, Transcoder};
    use std::collections::HashSet;
    use tokio::io::AsyncReadExt;

    async fn start(workers: usize, queue: usize, transcoder: impl Transcoder + 'static) -> Server {
        let tmp = tempfile::tempdir().unwrap();
        let dir = Arc::new(MediaDir::new(tmp.path()).unwrap());
        let ingest = Arc::new(Ingestor::new(workers, queue, Session::new(dir, Arc::new(transcoder))));
        let listener = bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(listener, Arc::clone(&ingest), std::future::pending()));
        Server { tmp, ingest, addr }
    }

    struct Server {
        tmp: tempfile::TempDir,
        ingest: IngestHandle,
        addr: SocketAddr,
    }
    impl Server {
        /// Connect and send the name, leaving the body open.
        async fn begin(&self, name: &str) -> TcpStream {
            let mut stream = TcpStream::connect(self.addr).await.unwrap();
            stream.write_u16(u16::try_from(name.len()).unwrap()).await.unwrap();
            stream.write_all(name.as_bytes()).await.unwrap();
            stream
        }

        async fn upload(&self, name: &str, body: &[u8]) -> String {
            finish(self.begin(name).await, body).await
        }

        async fn settled(&self) {
            eventually(|| self.ingest.available() == self.ingest.capacity()).await;
        }
    }

    async fn finish(mut stream: TcpStream, body: &[u8]) -> String {
        stream.write_all(body).await.unwrap();
        stream.shutdown().await.unwrap();
        read_reply(stream).await
    }

    async fn read_reply(mut stream: TcpStream) -> String {
        let mut reply = String::new();
        tokio::time::timeout(Duration::from_secs(5), stream.read_to_string(&mut reply)).await.unwrap().unwrap();
        reply
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn upload_round_trip() {
        let server = start(2, 2, Copying(b"smaller".to_vec())).await;
        assert_eq!(server.upload("clip.mp4", b"raw video").await, "UPLOAD_SUCCESS:clip.mp4\n");
        assert_eq!(std::fs::read(server.tmp.path().join("clip.mp4")).unwrap(), b"smaller");
        server.settled().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn saturated_server_rejects_exactly_one() {
        let (workers, queue) = (2, 1);
        let server = start(workers, queue, Passthrough).await;
        let mut held = Vec::new();
        for _ in 0..workers + queue {
            held.push(server.begin("clip.mp4").await);
        }
        // Accepted strictly after the others, while they all hold permits.
        let extra = server.begin("clip.mp4").await;
        assert_eq!(read_reply(extra).await, "QUEUE_FULL\n");

        // Whichever session claims the directory first waits for its body, so
        // every body goes out before any reply is awaited.
        for stream in &mut held {
            stream.write_all(b"bytes").await.unwrap();
            stream.shutdown().await.unwrap();
        }
        let mut names = HashSet::new();
        for stream in held {
            let reply = read_reply(stream).await;
            let name = reply.strip_prefix("UPLOAD_SUCCESS:").unwrap().trim_end().to_string();
            assert!(names.insert(name));
        }
        assert_eq!(names, HashSet::from(["clip.mp4", "clip(1).mp4", "clip(2).mp4"].map(String::from)));
        server.settled().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn single_permit_back_to_back() {
        let server = start(1, 0, Slow(Duration::from_millis(500))).await;
        let mut first = server.begin("a.mp4").await;
        first.write_all(b"first").await.unwrap();
        first.shutdown().await.unwrap();
        // The first upload keeps the only permit through its transcode.
        assert_eq!(server.upload("b.mp4", b"second").await, "QUEUE_FULL\n");
        assert_eq!(read_reply(first).await, "UPLOAD_SUCCESS:a.mp4\n");
        server.settled().await;
        assert!(!server.tmp.path().join("b.mp4").exists());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn rejections_past_the_linger_cap_are_still_answered() {
        let server = start(1, 0, Passthrough).await;
        let _held = server.ingest.try_admit().unwrap();
        let mut rejected = Vec::new();
        for _ in 0..MAX_LINGERING * 2 {
            rejected.push(TcpStream::connect(server.addr).await.unwrap());
        }
        for stream in rejected {
            assert_eq!(read_reply(stream).await, "QUEUE_FULL\n");
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn same_name_twice_concurrently() {
        let server = start(1, 1, Passthrough).await;
        let (a, b) = tokio::join!(server.upload("clip.mp4", b"one"), server.upload("clip.mp4", b"two"));
        let names: HashSet<_> = [a, b].into_iter().collect();
        assert_eq!(
            names,
            HashSet::from(["UPLOAD_SUCCESS:clip.mp4\n".to_string(), "UPLOAD_SUCCESS:clip(1).mp4\n".to_string()])
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn failures_return_permits() {
        let server = start(1, 1, Panicking).await;
        assert_eq!(server.upload("clip.mp4", b"bytes").await, "UPLOAD_FAILED\n");
        // Malformed: a name length with no name behind it.
        let mut stream = TcpStream::connect(server.addr).await.unwrap();
        stream.write_all(&[0, 9]).await.unwrap();
        stream.shutdown().await.unwrap();
        assert_eq!(read_reply(stream).await, "UPLOAD_FAILED\n");
        // Client disconnects before sending anything.
        drop(TcpStream::connect(server.addr).await.unwrap());
        server.settled().await;
        // The worker survived the panic.
        assert_eq!(server.upload("other.mp4", b"bytes").await, "UPLOAD_FAILED\n");
        server.settled().await;
    }
}
