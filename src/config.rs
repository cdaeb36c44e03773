// src/config.rs
use crate::error::{Error, Result};
use std::str::FromStr;

pub const ENV_BACKEND: &str = "FERROX_BACKEND";
pub const ENV_SIM_DEVICES: &str = "FERROX_SIM_DEVICES";
pub const ENV_SIM_STREAM_LIMIT: &str = "FERROX_SIM_STREAM_LIMIT";

/// Which driver backs the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backend {
    #[default]
    Sim,
    Cuda,
}

impl FromStr for Backend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sim" | "simulated" => Ok(Backend::Sim),
            "cuda" => Ok(Backend::Cuda),
            other => Err(Error::Config(format!("unknown backend '{}'", other))),
        }
    }
}

/// Runtime construction settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    pub backend: Backend,
    /// Number of simulated devices (ignored by the CUDA backend).
    pub sim_devices: usize,
    /// Optional cap on live simulated pool queues.
    pub sim_stream_limit: Option<usize>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Sim,
            sim_devices: 2,
            sim_stream_limit: None,
        }
    }
}

impl RuntimeConfig {
    pub fn new(backend: Backend) -> Self {
        Self {
            backend,
            ..Self::default()
        }
    }

    /// One simulated device
    pub fn single_device() -> Self {
        Self {
            sim_devices: 1,
            ..Self::default()
        }
    }

    /// `count` simulated devices
    pub fn multi_device(count: usize) -> Self {
        Self {
            sim_devices: count,
            ..Self::default()
        }
    }

    pub fn with_backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_sim_devices(mut self, count: usize) -> Self {
        self.sim_devices = count;
        self
    }

    pub fn with_sim_stream_limit(mut self, limit: usize) -> Self {
        self.sim_stream_limit = Some(limit);
        self
    }

    /// Read settings from `FERROX_*` environment variables, defaulting the rest.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env`, with an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(value) = lookup(ENV_BACKEND) {
            config.backend = value.parse()?;
        }
        if let Some(value) = lookup(ENV_SIM_DEVICES) {
            config.sim_devices = parse_count(ENV_SIM_DEVICES, &value)?;
        }
        if let Some(value) = lookup(ENV_SIM_STREAM_LIMIT) {
            config.sim_stream_limit = Some(parse_count(ENV_SIM_STREAM_LIMIT, &value)?);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.backend == Backend::Cuda && !cfg!(feature = "cuda") {
            return Err(Error::Config(
                "CUDA backend requested but the `cuda` feature is not compiled".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_count(key: &str, value: &str) -> Result<usize> {
    value
        .trim()
        .parse::<usize>()
        .map_err(|e| Error::Config(format!("{}='{}': {}", key, value, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_empty_environment_gives_defaults() {
        let config = RuntimeConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config, RuntimeConfig::default());
        assert_eq!(config.sim_devices, 2);
    }

    #[test]
    fn test_environment_overrides() {
        let config = RuntimeConfig::from_lookup(lookup_from(&[
            (ENV_BACKEND, "SIM"),
            (ENV_SIM_DEVICES, " 4 "),
            (ENV_SIM_STREAM_LIMIT, "16"),
        ]))
        .unwrap();
        assert_eq!(config.backend, Backend::Sim);
        assert_eq!(config.sim_devices, 4);
        assert_eq!(config.sim_stream_limit, Some(16));
    }

    #[test]
    fn test_bad_values_are_config_errors() {
        let err = RuntimeConfig::from_lookup(lookup_from(&[(ENV_SIM_DEVICES, "two")])).unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let err = RuntimeConfig::from_lookup(lookup_from(&[(ENV_BACKEND, "opencl")])).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[cfg(not(feature = "cuda"))]
    #[test]
    fn test_cuda_backend_requires_feature() {
        let err = RuntimeConfig::from_lookup(lookup_from(&[(ENV_BACKEND, "cuda")])).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_builders() {
        let config = RuntimeConfig::single_device().with_sim_stream_limit(3);
        assert_eq!(config.sim_devices, 1);
        assert_eq!(config.sim_stream_limit, Some(3));
        assert_eq!(RuntimeConfig::multi_device(8).with_sim_devices(4).sim_devices, 4);
    }
}
