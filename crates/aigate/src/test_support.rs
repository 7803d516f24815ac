//! Shared test fixtures.

use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// An upstream that accepts connections and never writes a byte.
///
/// Returns its base URL. Accepted sockets are held open until the handle is
/// dropped with the runtime.
pub(crate) async fn silent_upstream() -> (String, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let mut held: Vec<TcpStream> = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });
    (format!("http://{}", addr), handle)
}
