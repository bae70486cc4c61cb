use futures::StreamExt;
use log::*;
use std::collections::HashMap;
use wsforge::event::{Event, ID};
use wsforge::server::start_server;
use wsforge::split::WSWriter;

#[tokio::main]
async fn main() {
    env_logger::init();

    let port: u16 = 8080;
    match start_server(port).await {
        Ok(mut event_stream) => {
            let mut clients: HashMap<ID, WSWriter> = HashMap::new();
            info!("Server started on address 127.0.0.1:{port}");
            while let Some(event) = event_stream.next().await {
                match event {
                    Event::NewClient(id, writer) => {
                        info!("New client {id} connected");
                        clients.insert(id, writer);
                    }
                    Event::NewMessage(client_id, message) => {
                        info!("Message from client {client_id}: {message:?}");
                        if let Some(writer) = clients.get(&client_id) {
                            let _ = writer.send(message).await;
                        }
                    }
                    Event::Disconnect(client_id) => {
                        info!("Client {client_id} disconnected");
                        clients.remove(&client_id);
                    }
                    Event::Error(client_id, error) => {
                        error!("Error occurred for client {client_id}: {error:?}");
                    }
                }
            }
        }
        Err(err) => {
            eprintln!("Could not start the server due to: {err:?}");
        }
    }
}
