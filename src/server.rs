//! Convenience porcelain on top of `accept_async`: bind a listener, accept connections, and
//! forward new-client/message/disconnect/error events through a single stream.
//!
//! This is a ready-to-use server for callers who don't want to manage the `TcpListener` loop
//! themselves; it spawns one task per accepted connection plus one reader-forwarding task, none
//! of which is part of the connection engine itself (see `Connection`'s own concurrency model).

use crate::config::AcceptOptions;
use crate::event::{generate_new_uuid, Event, EventStream};
use crate::handshake::accept_async_with_config;
use crate::stream::WebSocketStream;
use futures::StreamExt;
use std::io;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_rustls::TlsAcceptor;

/// Spawns a plaintext (`ws://`) server on `port` with default options.
pub async fn start_server(port: u16) -> Result<EventStream, io::Error> {
    start_server_with_config(port, AcceptOptions::default(), None).await
}

/// Spawns a server on `port`, optionally terminating TLS (`wss://`) via `tls_acceptor`.
pub async fn start_server_with_config(
    port: u16,
    options: AcceptOptions,
    tls_acceptor: Option<TlsAcceptor>,
) -> Result<EventStream, io::Error> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    let (tx, rx) = mpsc::channel(1024);

    tokio::spawn(async move {
        loop {
            let (tcp, _) = match listener.accept().await {
                Ok(pair) => pair,
                Err(err) => {
                    log::warn!("accept failed: {err}");
                    continue;
                }
            };

            let id = generate_new_uuid();
            let tx = tx.clone();
            let options = options.clone();
            let tls_acceptor = tls_acceptor.clone();

            tokio::spawn(async move {
                let stream = match tls_acceptor {
                    Some(acceptor) => match acceptor.accept(tcp).await {
                        Ok(tls) => WebSocketStream::ServerTls(Box::new(tls)),
                        Err(err) => {
                            let _ = tx.send(Event::Error(id, err.into())).await;
                            return;
                        }
                    },
                    None => WebSocketStream::Plain(tcp),
                };

                let connection = match accept_async_with_config(stream, options).await {
                    Ok(connection) => connection,
                    Err(err) => {
                        let _ = tx.send(Event::Error(id, err)).await;
                        return;
                    }
                };

                let (mut reader, writer) = connection.split();
                if tx.send(Event::NewClient(id, writer)).await.is_err() {
                    return;
                }

                while let Some(result) = reader.next().await {
                    match result {
                        Ok(message) => {
                            if tx.send(Event::NewMessage(id, message)).await.is_err() {
                                break;
                            }
                        }
                        Err(err) => {
                            let _ = tx.send(Event::Error(id, err)).await;
                            break;
                        }
                    }
                }
                let _ = tx.send(Event::Disconnect(id)).await;
            });
        }
    });

    Ok(EventStream::new(rx))
}
