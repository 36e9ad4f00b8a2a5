//! Downstream consumer
//!
//! Subscribes to the relay output and prints every frame it receives.
//!
//! Run with: cargo run --example tap [ENDPOINT] [TOPIC]
//!
//! Examples:
//!   cargo run --example tap                         # all topics from 127.0.0.1:5560
//!   cargo run --example tap 127.0.0.1:5560 gps      # GPS events only

use std::time::Duration;

use traffic_relay::{ChannelConfig, Subscriber, TopicFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(1);
    let endpoint = args.next().unwrap_or_else(|| "127.0.0.1:5560".to_string());
    let filter = args
        .next()
        .map(|t| TopicFilter::from(t.as_str()))
        .unwrap_or_default();

    let mut sub = Subscriber::connect(&endpoint, filter.clone(), &ChannelConfig::default()).await?;
    println!("Listening on {} (filter: {})", endpoint, filter);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            frame = sub.recv_timeout(Duration::from_secs(1)) => {
                match frame {
                    Ok(Some(frame)) => println!(
                        "[{}] {} bytes: {}",
                        frame.topic_lossy(),
                        frame.len(),
                        String::from_utf8_lossy(frame.body())
                    ),
                    Ok(None) => {}
                    Err(e) if e.is_disconnect() => {
                        println!("Relay closed the connection");
                        break;
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }
    }

    println!("Received {} frames", sub.received());
    Ok(())
}
