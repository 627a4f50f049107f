use std::time::Duration;

/// Relay tuning knobs.
#[derive(Clone, Debug)]
pub struct Config {
  /// Interval between liveness pings; a connection missing one pong is dropped.
  pub heartbeat_interval: Duration,
  /// Interval between sweeps for rooms left empty.
  pub sweep_interval: Duration,
}

impl Default for Config {
  fn default() -> Self {
    Self { heartbeat_interval: Duration::from_secs(10), sweep_interval: Duration::from_secs(10) }
  }
}
