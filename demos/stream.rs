use std::time::Duration;

use plotly_stream::{Stream, StreamConfig};
use serde_json::json;

fn main() -> anyhow::Result<()> {
    let token = std::env::var("PLOTLY_STREAM_TOKEN")?;
    let config = StreamConfig::from_env().map_err(anyhow::Error::msg)?;

    let mut stream = Stream::new(token, config);
    stream.open()?;

    for step in 0..20 {
        let x = f64::from(step) * 0.5;
        stream.write(json!({"x": x, "y": x.sin()}), None, true)?;
        std::thread::sleep(Duration::from_millis(500));
    }

    stream.heartbeat()?;
    stream.close()?;
    Ok(())
}
