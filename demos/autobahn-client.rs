//! Runs the autobahn fuzzing server's test cases.
//!
//! ```not_rust
//! docker run -it --rm -p 9001:9001 crossbario/autobahn-testsuite
//! cargo run --release --example autobahn-client
//! ```

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;
use websocketz_client::{
    CloseCode, Delegate, Error, Message, Options, TcpConnector, WebSocket,
};

const URL: &str = "ws://localhost:9001";

#[derive(Debug)]
enum Event {
    Message(Message),
    Closed,
}

#[derive(Debug)]
struct Forwarder(mpsc::UnboundedSender<Event>);

impl Delegate for Forwarder {
    fn on_message(&self, message: Message) {
        let _ = self.0.send(Event::Message(message));
    }

    fn on_close(&self, _: CloseCode, _: String, _: bool) {
        let _ = self.0.send(Event::Closed);
    }

    fn on_error(&self, error: Error) {
        tracing::debug!(%error, "Case error");
    }
}

/// Opens `path` and returns the socket together with its events.
async fn connect(
    path: &str,
) -> Result<(WebSocket, mpsc::UnboundedReceiver<Event>, Arc<Forwarder>), Box<dyn std::error::Error>>
{
    let socket = WebSocket::builder(format!("{URL}{path}").parse()?)
        .with_options(
            Options::default()
                .with_ping_interval(None)
                .with_max_message_size(24 * 1024 * 1024),
        )
        .build();

    let (sender, receiver) = mpsc::unbounded_channel();
    let forwarder = Arc::new(Forwarder(sender));
    socket.set_delegate(&forwarder);

    let driver = socket.open(TcpConnector::new()).await?;
    tokio::spawn(driver.run());

    Ok((socket, receiver, forwarder))
}

async fn get_case_count() -> Result<u32, Box<dyn std::error::Error>> {
    let (socket, mut events, _forwarder) = connect("/getCaseCount").await?;

    let count = loop {
        match events.recv().await.ok_or("No message received")? {
            Event::Message(Message::Text(count)) => break count.parse()?,
            Event::Message(_) => return Err("Expected a text message".into()),
            Event::Closed => return Err("Closed before the case count arrived".into()),
        }
    };

    socket.close();

    Ok(count)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let count = get_case_count().await?;

    for case in 1..=count {
        println!("Running case {case} of {count}");

        let Ok((socket, mut events, _forwarder)) =
            connect(&format!("/runCase?case={case}&agent=websocketz-client")).await
        else {
            continue;
        };

        while let Some(event) = events.recv().await {
            match event {
                Event::Message(Message::Text(text)) => {
                    let _ = socket.send_text(text);
                }
                Event::Message(Message::Binary(data)) => {
                    let _ = socket.send_binary(data);
                }
                Event::Message(_) => {}
                Event::Closed => break,
            }
        }
    }

    let (socket, mut events, _forwarder) =
        connect("/updateReports?agent=websocketz-client").await?;

    socket.close();
    while let Some(Event::Message(_)) = events.recv().await {}

    Ok(())
}
