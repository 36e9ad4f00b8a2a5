//! Synthetic sensor producers
//!
//! Binds the camera, inductive-loop and GPS producer endpoints and publishes
//! an event on each every interval, so the relay has something to forward.
//!
//! Run with: cargo run --example sensor_sim [CONFIG_JSON] [INTERVAL_MS]
//!
//! Examples:
//!   cargo run --example sensor_sim                                  # default ports, 1s
//!   cargo run --example sensor_sim config/city_config.json 200      # ports from config

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde_json::json;
use traffic_relay::{ChannelConfig, Frame, Publisher, RelayConfig, Topic, TopicFilter};

const INTERSECTIONS: [&str; 4] = ["INT-A1", "INT-B2", "INT-C3", "INT-D4"];

fn congestion_level(speed: f64) -> &'static str {
    if speed < 10.0 {
        "ALTA"
    } else if speed < 40.0 {
        "NORMAL"
    } else {
        "BAJA"
    }
}

/// Event body for `topic`; values cycle so consecutive events differ
fn event_body(topic: Topic, seq: u64) -> serde_json::Value {
    let intersection = INTERSECTIONS[(seq as usize) % INTERSECTIONS.len()];
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    match topic {
        Topic::Camera => json!({
            "sensor_id": format!("CAM-{}", &intersection[4..]),
            "tipo_sensor": "camara",
            "interseccion": intersection,
            "volumen": seq % 21,
            "velocidad_promedio": 5.0 + (seq % 46) as f64,
            "timestamp": now,
        }),
        Topic::Inductive => json!({
            "sensor_id": format!("ESP-{}", &intersection[4..]),
            "tipo_sensor": "espira_inductiva",
            "interseccion": intersection,
            "vehiculos_contados": seq % 31,
            "intervalo_segundos": 30,
            "timestamp_inicio": now.saturating_sub(30),
            "timestamp_fin": now,
        }),
        Topic::Gps => {
            let speed = 5.0 + (seq % 51) as f64;
            json!({
                "sensor_id": format!("GPS-{}", &intersection[4..]),
                "tipo_sensor": "gps",
                "interseccion": intersection,
                "nivel_congestion": congestion_level(speed),
                "velocidad_promedio": speed,
                "timestamp": now,
            })
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "traffic_relay=info".into()),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let config = match args.next() {
        Some(path) => RelayConfig::from_file(path)?,
        None => RelayConfig::default(),
    };
    let interval = args
        .next()
        .and_then(|ms| ms.parse().ok())
        .map(Duration::from_millis)
        .unwrap_or(Duration::from_secs(1));

    let mut producers = Vec::new();
    for producer in &config.producers {
        let topic = Topic::ALL
            .into_iter()
            .find(|t| TopicFilter::from(*t) == producer.filter)
            .ok_or_else(|| format!("no sensor topic for filter {}", producer.filter))?;
        let publisher = Publisher::bind(&producer.endpoint, &ChannelConfig::default()).await?;
        println!("{} sensors publishing on {}", topic, publisher.local_addr());
        producers.push((topic, publisher));
    }

    let mut ticker = tokio::time::interval(interval);
    let mut seq = 0u64;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => {
                for (topic, publisher) in &producers {
                    let frame = Frame::new(topic.as_str(), event_body(*topic, seq).to_string());
                    let delivered = publisher.send(frame).await?;
                    println!("[{}] #{} -> {} subscriber(s)", topic, seq, delivered);
                }
                seq += 1;
            }
        }
    }

    for (_, publisher) in producers {
        publisher.close(Duration::from_millis(500)).await;
    }
    println!("Sensors stopped after {} rounds", seq);
    Ok(())
}
