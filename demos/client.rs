use rand::distr::Alphanumeric;
use rand::{thread_rng, Rng};
use tokio::select;
use tokio::time::{interval, Duration};
use wsforge::handshake::connect_async;
use wsforge::MessageType;

async fn handle_connection(addr: &str) {
    let connection = match connect_async(addr).await {
        Ok(connection) => connection,
        Err(err) => {
            eprintln!("Error when performing handshake: {err}");
            return;
        }
    };

    let mut ticker = interval(Duration::from_secs(5));
    let mut counter = 0;

    loop {
        select! {
            result = connection.read() => {
                match result {
                    Ok((_, bytes)) => {
                        println!("Received message: {}", String::from_utf8_lossy(&bytes));
                        counter += 1;
                        if counter >= 3 {
                            if connection.close(wsforge::close::StatusCode::NORMAL_CLOSURE, "bye").await.is_err() {
                                eprintln!("Error occurred when closing connection");
                            }
                            break;
                        }
                    }
                    Err(err) => {
                        eprintln!("Received error from the stream: {err}");
                        break;
                    }
                }
            }
            _ = ticker.tick() => {
                let random_string = generate_random_string();
                if connection.write(MessageType::Text, random_string.as_bytes()).await.is_err() {
                    eprintln!("Failed to send message");
                    break;
                }
            }
        }
    }
}

#[tokio::main]
async fn main() {
    handle_connection("ws://127.0.0.1:9002").await;
}

fn generate_random_string() -> String {
    thread_rng().sample_iter(&Alphanumeric).take(30).map(char::from).collect()
}
