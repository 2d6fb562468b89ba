use crate::one_euro::EuroConfig;
use crate::optical_flow::FlowConfig;
use crate::tracker::TrackerConfig;

/// Command line tunables for the tracking pipeline. Converted into the
/// per-module configs before use.
#[derive(Debug)]
#[derive(clap::Parser)]
pub struct Config {
    #[clap(long, default_value = "5")]
    pub keyframe_interval: usize,

    #[clap(long, default_value = "0.05")]
    pub drift_threshold: f64,

    #[clap(long, default_value = "0.7")]
    pub min_confidence: f64,

    /// Disable the adaptive keyframe cadence.
    #[clap(long)]
    pub fixed_interval: bool,

    #[clap(long, default_value = "3")]
    pub min_interval: usize,

    #[clap(long, default_value = "8")]
    pub max_interval: usize,

    #[clap(long, default_value = "15")]
    pub win_size: usize,

    #[clap(long, default_value = "3")]
    pub levels: usize,

    #[clap(long, default_value = "10")]
    pub max_iterations: usize,

    #[clap(long, default_value = "0.01")]
    pub epsilon: f64,

    #[clap(long, default_value = "1.0")]
    pub min_cutoff: f64,

    #[clap(long, default_value = "0.007")]
    pub beta: f64,

    #[clap(long, default_value = "1.0")]
    pub d_cutoff: f64,

    #[clap(long, default_value = "30.0")]
    pub rate: f64,
}

impl Config {
    pub fn tracker(&self) -> TrackerConfig {
        TrackerConfig {
            keyframe_interval: self.keyframe_interval,
            drift_threshold: self.drift_threshold,
            min_confidence: self.min_confidence,
            adaptive_interval: !self.fixed_interval,
            min_interval: self.min_interval,
            max_interval: self.max_interval,
            ..TrackerConfig::default()
        }
    }

    pub fn flow(&self) -> FlowConfig {
        FlowConfig {
            win_size: self.win_size,
            levels: self.levels,
            max_iterations: self.max_iterations,
            epsilon: self.epsilon,
            ..FlowConfig::default()
        }
    }

    pub fn filter(&self) -> EuroConfig {
        EuroConfig {
            min_cutoff: self.min_cutoff,
            beta: self.beta,
            d_cutoff: self.d_cutoff,
            rate: self.rate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_defaults_match_module_configs() {
        let config = Config::parse_from(["handtrack"]);
        let tracker = config.tracker();
        assert_eq!(tracker.keyframe_interval, 5);
        assert!(tracker.adaptive_interval);
        assert_eq!(config.flow().win_size, 15);
        assert_eq!(config.filter().beta, 0.007);

        let config = Config::parse_from(["handtrack", "--fixed-interval", "--levels", "2"]);
        assert!(!config.tracker().adaptive_interval);
        assert_eq!(config.flow().levels, 2);
    }
}
