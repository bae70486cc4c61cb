use log::*;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use wsforge::handshake::accept_async;
use wsforge::WebSocketStream;

async fn handle_connection(_: SocketAddr, stream: TcpStream) {
    let connection = match accept_async(WebSocketStream::Plain(stream)).await {
        Ok(connection) => connection,
        Err(err) => {
            error!("Error when performing handshake: {err}");
            return;
        }
    };

    loop {
        match connection.read().await {
            Ok((message_type, bytes)) => {
                if connection.write(message_type, &bytes).await.is_err() {
                    error!("Failed to send message");
                    break;
                }
            }
            Err(e) => {
                error!("Received error from the stream: {e}");
                break;
            }
        }
    }
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let addr = "127.0.0.1:9002";
    let listener = TcpListener::bind(&addr).await.expect("Can't listen");
    info!("Listening on: {addr}");

    while let Ok((stream, _)) = listener.accept().await {
        let peer = stream
            .peer_addr()
            .expect("connected streams should have a peer address");
        info!("Peer address: {peer}");

        tokio::spawn(handle_connection(peer, stream));
    }
}
